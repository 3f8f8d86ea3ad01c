//! txn/buffered — буферизованный страничный слой (транзакционный I/O).
//!
//! Оборачивает Pager:
//! - read: write-set транзакции (read-your-writes) либо закоммиченная
//!   страница (через LRU-кэш);
//! - write с транзакцией — upsert в write-set; без транзакции — прямая
//!   запись (только инициализация и vacuum);
//! - commit: под эксклюзивным commit-мьютексом — проверка пересечений с
//!   недавними коммитами (postранично), WAL-группа с барьером, сброс
//!   write-set'а, применение отложенных правок версий/каталога,
//!   регистрация в журнале недавних коммитов;
//! - abort: отбросить write-set без I/O;
//! - refresh_snapshot: свежий снапшот тем же tx_id для ретрая после
//!   конфликта.
//!
//! Правило конфликта постраничное, не построчное: две транзакции, писавшие
//! одну страницу, не закоммитятся обе.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::catalog::CatalogOp;
use crate::consts::PAGE_TYPE_DOCUMENT;
use crate::errors::{GaldrError, Result};
use crate::metrics::{
    record_abort, record_commit, record_conflict, record_page_cache_hit, record_page_cache_miss,
    record_pages_flushed,
};
use crate::page::page_update_checksum;
use crate::pager::cache::PageCache;
use crate::pager::{PageAccess, Pager};
use crate::wal::WalWriter;

use super::manager::TxManager;
use super::transaction::{PendingVersion, Transaction, TxState};

pub struct BufferedPageStore {
    pager: Pager,
    cache: Mutex<PageCache>,
    wal: Option<Mutex<WalWriter>>,
    data_fsync: bool,
}

impl BufferedPageStore {
    pub fn new(
        pager: Pager,
        cache_bytes: usize,
        wal: Option<WalWriter>,
        data_fsync: bool,
    ) -> Self {
        let ps = pager.page_size() as usize;
        Self {
            pager,
            cache: Mutex::new(PageCache::new(cache_bytes, ps)),
            wal: wal.map(Mutex::new),
            data_fsync,
        }
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn page_size(&self) -> u32 {
        self.pager.page_size()
    }

    pub fn wal_enabled(&self) -> bool {
        self.wal.is_some()
    }

    /// Чтение: сперва write-set транзакции, затем закоммиченное состояние.
    pub fn read(&self, page_id: u32, tx: Option<&Transaction>) -> Result<Vec<u8>> {
        if let Some(t) = tx {
            if let Some(buf) = t.buffered_page(page_id) {
                return Ok(buf.clone());
            }
        }

        let mut buf = vec![0u8; self.page_size() as usize];
        {
            let mut cache = self.cache.lock().expect("cache lock poisoned");
            if cache.get(page_id, &mut buf) {
                record_page_cache_hit();
                return Ok(buf);
            }
        }
        record_page_cache_miss();
        self.pager.read_page(page_id, &mut buf)?;
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        cache.put(page_id, &buf);
        Ok(buf)
    }

    /// Запись: с транзакцией — в write-set; без — напрямую в Pager
    /// (инициализация, vacuum).
    pub fn write(&self, page_id: u32, bytes: &[u8], tx: Option<&mut Transaction>) -> Result<()> {
        if bytes.len() != self.page_size() as usize {
            return Err(GaldrError::invalid_arg(format!(
                "buffer size {} != page_size {}",
                bytes.len(),
                self.page_size()
            )));
        }
        match tx {
            Some(t) => {
                t.require_active()?;
                t.buffer_write(page_id, bytes.to_vec());
                Ok(())
            }
            None => {
                let mut copy = bytes.to_vec();
                self.pager.write_page(page_id, &mut copy)?;
                let mut cache = self.cache.lock().expect("cache lock poisoned");
                cache.put(page_id, &copy);
                Ok(())
            }
        }
    }

    /// Коммит write-set'а. apply вызывается под commit-мьютексом после
    /// сброса страниц и до регистрации коммита: применяет отложенные правки
    /// индекса версий и каталога с присвоенным commit_tx_id.
    pub fn commit_with<F>(&self, tx: &mut Transaction, txm: &TxManager, apply: F) -> Result<u64>
    where
        F: FnOnce(u64, Vec<PendingVersion>, Vec<CatalogOp>) -> Result<()>,
    {
        tx.require_active()?;

        let _guard = txm.commit_lock.lock().expect("commit lock poisoned");

        if let Err(e) = txm.conflict_check(tx.snapshot_tx_id, tx.write_set.keys()) {
            record_conflict();
            return Err(e);
        }

        let commit_tx_id = txm.alloc_tx_id();
        let pages: HashSet<u32> = tx.write_set.keys().copied().collect();

        // Checksum страниц документов до WAL: after-image в логе совпадает
        // с тем, что ляжет в основной файл.
        for (pid, buf) in tx.write_set.iter_mut() {
            if *pid != 0 && buf[0] == PAGE_TYPE_DOCUMENT {
                page_update_checksum(buf);
            }
        }

        if let Some(wal) = &self.wal {
            let mut w = wal.lock().expect("wal lock poisoned");
            for (pid, buf) in tx.write_set.iter() {
                w.append_page(commit_tx_id, *pid, buf)?;
            }
            w.append_barrier(commit_tx_id)?;
            w.fsync()?;
        }

        let flushed = tx.write_set.len() as u64;
        {
            let mut cache = self.cache.lock().expect("cache lock poisoned");
            for (pid, buf) in tx.write_set.iter_mut() {
                self.pager.write_page(*pid, buf)?;
                cache.put(*pid, buf);
            }
        }
        if self.data_fsync {
            self.pager.sync()?;
        }
        record_pages_flushed(flushed);

        let versions = std::mem::take(&mut tx.pending_versions);
        let catalog_ops = std::mem::take(&mut tx.pending_catalog);
        apply(commit_tx_id, versions, catalog_ops)?;

        txm.note_commit(commit_tx_id, pages);
        txm.release_snapshot(tx.snapshot_tx_id);
        tx.write_set.clear();
        tx.state = TxState::Committed;
        record_commit();

        if txm.due_header_persist() {
            self.pager
                .update_header(|h| h.next_tx_id = txm.peek_next_tx_id());
            self.pager.persist_header()?;
        }

        Ok(commit_tx_id)
    }

    /// Коммит без отложенных правок (низкоуровневые постраничные
    /// транзакции).
    pub fn commit(&self, tx: &mut Transaction, txm: &TxManager) -> Result<u64> {
        self.commit_with(tx, txm, |_, _, _| Ok(()))
    }

    /// Отбросить write-set; никакого I/O.
    pub fn abort(&self, tx: &mut Transaction, txm: &TxManager) -> Result<()> {
        match tx.state {
            TxState::Committed => Err(GaldrError::invalid_op(format!(
                "transaction {} already committed",
                tx.tx_id
            ))),
            TxState::Aborted => Ok(()),
            TxState::Active => {
                txm.release_snapshot(tx.snapshot_tx_id);
                tx.clear_buffers();
                tx.state = TxState::Aborted;
                record_abort();
                Ok(())
            }
        }
    }

    /// Свежий снапшот без пересоздания tx_id; буферы очищаются.
    pub fn refresh_snapshot(&self, tx: &mut Transaction, txm: &TxManager) -> Result<()> {
        if tx.state == TxState::Committed {
            return Err(GaldrError::invalid_op(format!(
                "transaction {} already committed",
                tx.tx_id
            )));
        }
        if tx.state == TxState::Active {
            txm.release_snapshot(tx.snapshot_tx_id);
        }
        let snapshot = txm.register_snapshot();
        tx.reset_for_retry(snapshot);
        Ok(())
    }

    /// Синхронизировать заголовок (checkpoint/close).
    pub fn persist_header_with_counters(&self, txm: &TxManager) -> Result<()> {
        self.pager
            .update_header(|h| h.next_tx_id = txm.peek_next_tx_id());
        self.pager.persist_header()?;
        self.pager.sync()
    }

    pub fn wal_checkpoint(&self, txm: &TxManager) -> Result<bool> {
        let Some(wal) = &self.wal else {
            return Ok(false);
        };
        let _guard = txm.commit_lock.lock().expect("commit lock poisoned");
        self.persist_header_with_counters(txm)?;
        let mut w = wal.lock().expect("wal lock poisoned");
        w.truncate_to_header(txm.current_snapshot())?;
        Ok(true)
    }
}

/// PageAccess внутри транзакции: чтение с учётом write-set'а, запись в него.
pub struct TxPages<'a> {
    pub store: &'a BufferedPageStore,
    pub tx: &'a mut Transaction,
}

impl<'a> TxPages<'a> {
    pub fn new(store: &'a BufferedPageStore, tx: &'a mut Transaction) -> Self {
        Self { store, tx }
    }
}

impl PageAccess for TxPages<'_> {
    fn page_size(&self) -> u32 {
        self.store.page_size()
    }

    fn read(&mut self, page_id: u32) -> Result<Vec<u8>> {
        self.store.read(page_id, Some(self.tx))
    }

    fn write(&mut self, page_id: u32, page: &[u8]) -> Result<()> {
        self.store.write(page_id, page, Some(self.tx))
    }

    fn allocate(&mut self) -> Result<u32> {
        self.store.pager().allocate_page()
    }

    fn allocate_consecutive(&mut self, count: u32) -> Result<u32> {
        self.store.pager().allocate_consecutive(count)
    }
}

/// PageAccess с прямыми записями (инициализация, vacuum, drop —
/// вне транзакций, под commit-мьютексом у вызывающего).
pub struct DirectPages<'a> {
    pub store: &'a BufferedPageStore,
}

impl PageAccess for DirectPages<'_> {
    fn page_size(&self) -> u32 {
        self.store.page_size()
    }

    fn read(&mut self, page_id: u32) -> Result<Vec<u8>> {
        self.store.read(page_id, None)
    }

    fn write(&mut self, page_id: u32, page: &[u8]) -> Result<()> {
        self.store.write(page_id, page, None)
    }

    fn allocate(&mut self) -> Result<u32> {
        self.store.pager().allocate_page()
    }

    fn allocate_consecutive(&mut self, count: u32) -> Result<u32> {
        self.store.pager().allocate_consecutive(count)
    }
}

/// PageAccess по закоммиченному состоянию (запросы, пересборка индексов
/// на открытии). Запись запрещена.
pub struct ReadPages<'a> {
    pub store: &'a BufferedPageStore,
}

impl PageAccess for ReadPages<'_> {
    fn page_size(&self) -> u32 {
        self.store.page_size()
    }

    fn read(&mut self, page_id: u32) -> Result<Vec<u8>> {
        self.store.read(page_id, None)
    }

    fn write(&mut self, _page_id: u32, _page: &[u8]) -> Result<()> {
        Err(GaldrError::invalid_op("write through a read-only page view"))
    }

    fn allocate(&mut self) -> Result<u32> {
        Err(GaldrError::invalid_op("allocate through a read-only page view"))
    }

    fn allocate_consecutive(&mut self, _count: u32) -> Result<u32> {
        Err(GaldrError::invalid_op("allocate through a read-only page view"))
    }
}
