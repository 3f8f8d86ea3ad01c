//! db/core — структура Db, create/open/close, схема коллекций и индексов.
//!
//! Db разделяется потоками по &self: внутренняя синхронизация — в
//! подсистемах (commit-мьютекс, защёлки индекса версий, RwLock каталога).
//! После Corruption движок переводится в read-only до переоткрытия.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::{debug, info, warn};
use serde::Serialize;

use crate::btree::{doc_id_from_primary, primary_key, BTree};
use crate::catalog::{validate_collection_name, Catalog, CatalogOp, CollectionEntry};
use crate::config::GaldrConfig;
use crate::consts::NO_PAGE;
use crate::errors::{GaldrError, IoResultExt, Result};
use crate::header::validate_page_size;
use crate::io::{FileIo, MmapIo, PageIo};
use crate::lock::{try_acquire_exclusive_lock, LockGuard};
use crate::metrics::{metrics_snapshot, MetricsSnapshot};
use crate::pager::Pager;
use crate::record::Record;
use crate::txn::{
    BufferedPageStore, DirectPages, ReadPages, Transaction, TxManager, TxPages,
};
use crate::version::{DocumentLocation, VersionIndex};
use crate::wal::{wal_path, wal_replay, WalWriter};

pub struct Db {
    pub(crate) store: BufferedPageStore,
    pub(crate) txm: TxManager,
    pub(crate) versions: VersionIndex,
    pub(crate) catalog: Catalog,
    pub(crate) doc_counters: Mutex<HashMap<String, u64>>,
    closed: AtomicBool,
    read_only: AtomicBool,
    path: PathBuf,
    _lock: LockGuard,
}

/// Транзакция уровня документов. Drop без commit() — abort.
pub struct DbTx<'db> {
    pub(crate) db: &'db Db,
    pub(crate) tx: Transaction,
}

/// Read-only транзакция: снапшот без tx_id.
pub struct ReadTx<'db> {
    pub(crate) db: &'db Db,
    pub(crate) snapshot: u64,
    released: bool,
}

impl Db {
    /// Создать новую базу с параметрами по умолчанию (плюс env).
    pub fn create(path: &Path) -> Result<Self> {
        Self::create_with_config(path, GaldrConfig::from_env())
    }

    pub fn create_with_config(path: &Path, cfg: GaldrConfig) -> Result<Self> {
        validate_page_size(cfg.page_size)?;
        if path.exists() {
            return Err(GaldrError::invalid_op(format!(
                "database already exists at {}",
                path.display()
            )));
        }

        let io: Box<dyn PageIo> = if cfg.use_mmap {
            Box::new(MmapIo::create(path, cfg.page_size)?)
        } else {
            Box::new(FileIo::create(path, cfg.page_size)?)
        };
        let pager = Pager::create(io, path, cfg.use_wal)?;
        let lock = try_acquire_exclusive_lock(path)?;

        let wal = if cfg.use_wal {
            Some(WalWriter::open_or_create(&wal_path(path))?)
        } else {
            None
        };
        let store = BufferedPageStore::new(pager, cfg.cache_bytes, wal, cfg.data_fsync);

        // Разметка каталога — прямыми записями (транзакций ещё нет).
        let cols_first = {
            let mut pages = DirectPages { store: &store };
            Catalog::bootstrap(&mut pages)?
        };
        store.pager().update_header(|h| h.catalog_root_page_id = cols_first);
        store.pager().persist_header()?;
        store.pager().sync()?;

        let catalog = {
            let mut pages = DirectPages { store: &store };
            Catalog::load(&mut pages, cols_first)?
        };
        let txm = TxManager::new(store.pager().header().next_tx_id);

        info!("created database at {} ({})", path.display(), cfg);
        Ok(Self {
            store,
            txm,
            versions: VersionIndex::new(),
            catalog,
            doc_counters: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            read_only: AtomicBool::new(false),
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    /// Открыть существующую базу (env-конфигурация).
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_config(path, GaldrConfig::from_env())
    }

    pub fn open_with_config(path: &Path, cfg: GaldrConfig) -> Result<Self> {
        let page_size = probe_page_size(path)?;
        let io: Box<dyn PageIo> = if cfg.use_mmap {
            Box::new(MmapIo::open(path, page_size)?)
        } else {
            Box::new(FileIo::open(path, page_size)?)
        };
        let pager = Pager::open(io, path)?;
        let lock = try_acquire_exclusive_lock(path)?;

        let header = pager.header();
        let wal = if header.wal_enabled() {
            let wp = wal_path(path);
            let wal = WalWriter::open_or_create(&wp)?;
            // Накат зафиксированных групп, затем checkpoint.
            let stats = wal_replay(&pager, &wp)?;
            if stats.groups_applied > 0 {
                pager.update_header(|h| {
                    h.next_tx_id = h.next_tx_id.max(stats.max_commit_tx_id + 1);
                });
            }
            Some(wal)
        } else {
            None
        };

        // Счётчики заголовка могли отстать от файла (сброс каждые N коммитов).
        let file_pages = pager.len_pages()?;
        pager.update_header(|h| h.next_page_id = h.next_page_id.max(file_pages));
        pager.persist_header()?;
        pager.sync()?;

        let header = pager.header();
        if header.catalog_root_page_id == NO_PAGE {
            return Err(GaldrError::corruption("header has no catalog root"));
        }

        let store = BufferedPageStore::new(pager, cfg.cache_bytes, wal, cfg.data_fsync);
        let txm = TxManager::new(header.next_tx_id);
        if store.wal_enabled() {
            store.wal_checkpoint(&txm)?;
        }

        let catalog = {
            let mut pages = ReadPages { store: &store };
            Catalog::load(&mut pages, header.catalog_root_page_id)?
        };

        debug!(
            "opened database at {} (page_size {}, next_tx {})",
            path.display(),
            header.page_size,
            header.next_tx_id
        );
        Ok(Self {
            store,
            txm,
            versions: VersionIndex::new(),
            catalog,
            doc_counters: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            read_only: AtomicBool::new(false),
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> u32 {
        self.store.page_size()
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GaldrError::Disposed);
        }
        Ok(())
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        self.check_open()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(GaldrError::invalid_op(
                "engine is read-only after detected corruption; reopen the database",
            ));
        }
        Ok(())
    }

    /// Пометить движок read-only, если ошибка — Corruption.
    pub(crate) fn note_error(&self, e: &GaldrError) {
        if e.is_corruption() {
            warn!("corruption detected, engine goes read-only: {}", e);
            self.read_only.store(true, Ordering::SeqCst);
        }
    }

    /// Закрыть базу: vacuum (best-effort), checkpoint/заголовок, fsync.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.read_only.load(Ordering::SeqCst) {
            if let Err(e) = self.vacuum_inner() {
                warn!("vacuum on close failed: {}", e);
            }
        }
        if self.store.wal_enabled() {
            self.store.wal_checkpoint(&self.txm)?;
        } else {
            self.store.persist_header_with_counters(&self.txm)?;
        }
        Ok(())
    }

    // ---------- транзакции ----------

    pub fn begin_transaction(&self) -> Result<DbTx<'_>> {
        self.check_writable()?;
        let (tx_id, snapshot) = self.txm.begin();
        Ok(DbTx {
            db: self,
            tx: Transaction::new(tx_id, snapshot),
        })
    }

    pub fn begin_read_only_transaction(&self) -> Result<ReadTx<'_>> {
        self.check_open()?;
        let snapshot = self.txm.register_snapshot();
        Ok(ReadTx {
            db: self,
            snapshot,
            released: false,
        })
    }

    /// Низкоуровневый доступ к буферизованному слою и менеджеру транзакций
    /// (постраничные транзакции, инструменты).
    pub fn page_store(&self) -> &BufferedPageStore {
        &self.store
    }

    pub fn tx_manager(&self) -> &TxManager {
        &self.txm
    }

    /// Постраничная транзакция без документного слоя.
    pub fn begin_page_transaction(&self) -> Result<Transaction> {
        self.check_writable()?;
        let (tx_id, snapshot) = self.txm.begin();
        Ok(Transaction::new(tx_id, snapshot))
    }

    // ---------- схема ----------

    /// Создать коллекцию по метаданным типа R: первичный индекс всегда,
    /// вторичные — для полей с indexed.
    pub fn create_collection<R: Record>(&self, name: &str) -> Result<()> {
        self.create_collection_with(name, R::descriptors())
    }

    pub fn create_collection_with(
        &self,
        name: &str,
        fields: Vec<crate::record::FieldDescriptor>,
    ) -> Result<()> {
        self.check_writable()?;
        validate_collection_name(name)?;
        let primaries: Vec<_> = fields.iter().filter(|f| f.primary).collect();
        if primaries.len() != 1 {
            return Err(GaldrError::invalid_arg(format!(
                "collection '{}' must declare exactly one primary field",
                name
            )));
        }
        if primaries[0].kind != crate::record::FieldKind::U64 {
            return Err(GaldrError::invalid_arg(
                "primary field must be a 64-bit unsigned id",
            ));
        }

        let mut dbtx = self.begin_transaction()?;
        let res = dbtx.create_collection_in_tx(name, fields);
        match res {
            Ok(()) => dbtx.commit(),
            Err(e) => {
                let _ = dbtx.abort();
                self.note_error(&e);
                Err(e)
            }
        }
    }

    /// Построить вторичный индекс по полю существующей коллекции.
    pub fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        self.check_writable()?;
        let mut dbtx = self.begin_transaction()?;
        let res = dbtx.create_index_in_tx(collection, field);
        match res {
            Ok(()) => dbtx.commit(),
            Err(e) => {
                let _ = dbtx.abort();
                self.note_error(&e);
                Err(e)
            }
        }
    }

    pub fn get_collection_names(&self) -> Result<Vec<String>> {
        self.check_open()?;
        Ok(self.catalog.collection_names())
    }

    pub fn get_index_names(&self, collection: &str) -> Result<Vec<String>> {
        self.check_open()?;
        if self.catalog.collection(&[], collection).is_none() {
            return Err(GaldrError::not_found(format!(
                "collection '{}'",
                collection
            )));
        }
        Ok(self.catalog.index_names(collection))
    }

    /// Удалить коллекцию. Непустая коллекция требует delete_documents.
    pub fn drop_collection(&self, name: &str, delete_documents: bool) -> Result<()> {
        self.check_writable()?;
        validate_collection_name(name)?;
        let (entry, meta) = self
            .catalog
            .collection(&[], name)
            .ok_or_else(|| GaldrError::not_found(format!("collection '{}'", name)))?;

        // Снимаем число живых документов по первичному индексу.
        let count = self.count_live_documents(&entry)?;
        if count > 0 && !delete_documents {
            return Err(GaldrError::invalid_op(format!(
                "{} document(s) in collection '{}'; pass deleteDocuments to drop them",
                count, name
            )));
        }

        // Drop — обслуживание: прямые записи под commit-мьютексом.
        let _guard = self.txm.commit_lock.lock().expect("commit lock poisoned");
        let mut pages = DirectPages { store: &self.store };

        let mut freed: Vec<u32> = Vec::new();
        freed.extend(crate::heap::heap_pages(&mut pages, entry.first_doc_page)?);
        {
            let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
            freed.extend(tree.collect_pages()?);
        }
        for idx in self.catalog.indexes_of(&[], name) {
            let mut tree = BTree::open(
                &mut pages,
                idx.root,
                crate::btree::key_width(idx.kind) + 8,
            );
            freed.extend(tree.collect_pages()?);
            crate::heap::heap_delete(
                &mut pages,
                self.catalog
                    .index(&[], name, &idx.field)
                    .expect("index entry just listed")
                    .1
                    .location,
            )?;
        }
        crate::heap::heap_delete(&mut pages, meta.location)?;

        for pid in freed {
            self.store.pager().free_page(pid)?;
        }
        self.catalog.apply(vec![CatalogOp::DropCollection {
            name: name.to_string(),
        }]);
        self.versions.drop_collection(name);
        self.doc_counters
            .lock()
            .expect("doc counters lock poisoned")
            .remove(name);
        self.store.persist_header_with_counters(&self.txm)?;
        Ok(())
    }

    /// Удалить вторичный индекс.
    pub fn drop_index(&self, collection: &str, field: &str) -> Result<()> {
        self.check_writable()?;
        let (idx, meta) = self
            .catalog
            .index(&[], collection, field)
            .ok_or_else(|| {
                GaldrError::not_found(format!("index '{}' on '{}'", field, collection))
            })?;

        let _guard = self.txm.commit_lock.lock().expect("commit lock poisoned");
        let mut pages = DirectPages { store: &self.store };
        let freed = {
            let mut tree = BTree::open(&mut pages, idx.root, crate::btree::key_width(idx.kind) + 8);
            tree.collect_pages()?
        };
        crate::heap::heap_delete(&mut pages, meta.location)?;
        for pid in freed {
            self.store.pager().free_page(pid)?;
        }
        self.catalog.apply(vec![CatalogOp::DropIndex {
            collection: collection.to_string(),
            field: field.to_string(),
        }]);
        Ok(())
    }

    // ---------- внутренние помощники ----------

    /// Живые документы коллекции по первичному индексу (без payload'ов).
    pub(crate) fn count_live_documents(&self, entry: &CollectionEntry) -> Result<u64> {
        let mut pages = ReadPages { store: &self.store };
        let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
        let mut count = 0u64;
        tree.for_each(&mut |_k, v| {
            if !v.is_deleted() {
                count += 1;
            }
            Ok(true)
        })?;
        Ok(count)
    }

    /// Видимое положение документа: цепочка версий, иначе подъём из
    /// первичного индекса (created_by = 0).
    pub(crate) fn resolve_visible(
        &self,
        collection: &str,
        doc_id: u64,
        snapshot: u64,
    ) -> Result<Option<DocumentLocation>> {
        if let Some(loc) = self.versions.get_visible(collection, doc_id, snapshot) {
            return Ok(Some(loc));
        }
        if self.versions.has_chain(collection, doc_id) {
            return Ok(None);
        }

        let (entry, _) = match self.catalog.collection(&[], collection) {
            Some(e) => e,
            None => return Ok(None),
        };
        let mut pages = ReadPages { store: &self.store };
        let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
        match tree.search(&primary_key(doc_id))? {
            Some(v) if !v.is_deleted() => {
                let loc = v.location();
                self.versions.adopt_existing(collection, doc_id, loc);
                Ok(Some(loc))
            }
            _ => Ok(None),
        }
    }

    /// Выдать следующий doc_id коллекции; счётчик сеется максимумом ключей
    /// первичного индекса.
    pub(crate) fn alloc_doc_id(&self, collection: &str, entry: &CollectionEntry) -> Result<u64> {
        let mut counters = self.doc_counters.lock().expect("doc counters lock poisoned");
        if let Some(last) = counters.get_mut(collection) {
            *last += 1;
            return Ok(*last);
        }

        let mut max_id = entry.last_doc_id;
        {
            let mut pages = ReadPages { store: &self.store };
            let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
            tree.for_each(&mut |k, _v| {
                max_id = max_id.max(doc_id_from_primary(k));
                Ok(true)
            })?;
        }
        let next = max_id + 1;
        counters.insert(collection.to_string(), next);
        Ok(next)
    }

    pub(crate) fn note_doc_id(&self, collection: &str, id: u64) {
        let mut counters = self.doc_counters.lock().expect("doc counters lock poisoned");
        let e = counters.entry(collection.to_string()).or_insert(0);
        *e = (*e).max(id);
    }

    /// Снимок состояния для CLI status.
    pub fn status(&self) -> Result<DbStatus> {
        self.check_open()?;
        let h = self.store.pager().header();
        let mut collections = Vec::new();
        for name in self.catalog.collection_names() {
            let (entry, _) = self
                .catalog
                .collection(&[], &name)
                .expect("name just listed");
            collections.push(CollectionStatus {
                documents: self.count_live_documents(&entry)?,
                indexes: self.catalog.index_names(&name),
                name,
            });
        }
        Ok(DbStatus {
            path: self.path.display().to_string(),
            db_id: format!("{:016x}", self.store.pager().db_id()),
            page_size: h.page_size,
            next_page_id: h.next_page_id,
            next_tx_id: self.txm.peek_next_tx_id(),
            wal_enabled: self.store.wal_enabled(),
            active_snapshots: self.txm.active_snapshot_count(),
            collections,
            metrics: metrics_snapshot(),
        })
    }

    pub(crate) fn vacuum_inner(&self) -> Result<crate::db::maintenance::VacuumStats> {
        crate::db::maintenance::vacuum_impl(self)
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.close() {
                warn!("close on drop failed: {}", e);
            }
        }
    }
}

impl DbTx<'_> {
    pub fn tx_id(&self) -> u64 {
        self.tx.tx_id
    }

    pub fn snapshot_tx_id(&self) -> u64 {
        self.tx.snapshot_tx_id
    }

    pub fn commit(&mut self) -> Result<()> {
        let db = self.db;
        let res = db.store.commit_with(&mut self.tx, &db.txm, |commit_id, versions, ops| {
            for pv in versions {
                match pv {
                    crate::txn::PendingVersion::Upsert {
                        collection,
                        doc_id,
                        location,
                    } => db.versions.add_version(&collection, doc_id, commit_id, location),
                    crate::txn::PendingVersion::Delete { collection, doc_id } => {
                        db.versions.mark_deleted(&collection, doc_id, commit_id)?
                    }
                }
            }
            db.catalog.apply(ops);
            Ok(())
        });
        match res {
            Ok(_commit_id) => Ok(()),
            Err(e) => {
                db.note_error(&e);
                Err(e)
            }
        }
    }

    pub fn abort(&mut self) -> Result<()> {
        self.db.store.abort(&mut self.tx, &self.db.txm)
    }

    /// Свежий снапшот для ретрая после PageConflict.
    pub fn refresh_snapshot(&mut self) -> Result<()> {
        self.db.store.refresh_snapshot(&mut self.tx, &self.db.txm)
    }

    pub(crate) fn pages(&mut self) -> TxPages<'_> {
        TxPages::new(&self.db.store, &mut self.tx)
    }
}

impl Drop for DbTx<'_> {
    fn drop(&mut self) {
        if self.tx.is_active() {
            let _ = self.db.store.abort(&mut self.tx, &self.db.txm);
        }
    }
}

impl ReadTx<'_> {
    pub fn snapshot_tx_id(&self) -> u64 {
        self.snapshot
    }

    /// Read-only транзакция завершается без коммита.
    pub fn dispose(&mut self) {
        if !self.released {
            self.db.txm.release_snapshot(self.snapshot);
            self.released = true;
        }
    }
}

impl Drop for ReadTx<'_> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
    pub name: String,
    pub documents: u64,
    pub indexes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbStatus {
    pub path: String,
    pub db_id: String,
    pub page_size: u32,
    pub next_page_id: u32,
    pub next_tx_id: u64,
    pub wal_enabled: bool,
    pub active_snapshots: usize,
    pub collections: Vec<CollectionStatus>,
    pub metrics: MetricsSnapshot,
}

/// Узнать page_size существующего файла до конструирования PageIo.
fn probe_page_size(path: &Path) -> Result<u32> {
    use std::io::Read;
    let mut f = std::fs::File::open(path).ctx(|| format!("open {}", path.display()))?;
    let mut head = [0u8; 8];
    f.read_exact(&mut head)
        .ctx(|| format!("read header of {}", path.display()))?;
    if &head[..4] != crate::consts::DB_MAGIC {
        return Err(GaldrError::corruption(format!(
            "bad db magic in {}",
            path.display()
        )));
    }
    let raw = u16::from_le_bytes([head[6], head[7]]);
    Ok(if raw == 0 { 65536 } else { raw as u32 })
}
