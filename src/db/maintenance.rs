//! db/maintenance — vacuum и checkpoint.
//!
//! Vacuum идёт под commit-мьютексом прямыми записями:
//! 1) prune индекса версий по минимальному живому снапшоту;
//! 2) tombstone освободившихся слотов + освобождение overflow-цепочек;
//! 3) снятие умерших записей из первичного и вторичных индексов;
//! 4) свип-сверка ростеров с первичным индексом (мусор после переоткрытия);
//! 5) compaction slotted-страниц с достаточным мёртвым местом.
//!
//! Корректность движка от vacuum не зависит — это возврат места.

use std::collections::HashSet;

use log::{debug, info};
use serde::Serialize;

use crate::btree::{key_width, primary_key, BTree};
use crate::consts::{COMPACTION_MIN_GAIN, NO_PAGE, PAGE_TYPE_DOCUMENT};
use crate::errors::Result;
use crate::heap::heap_pages;
use crate::metrics::{record_slots_tombstoned, record_vacuum_run, record_versions_pruned};
use crate::page::{
    slotted_compact, slotted_delete, slotted_get, slotted_header_read, slotted_needs_compaction,
};
use crate::txn::DirectPages;
use crate::version::DocumentLocation;

use super::core::Db;

#[derive(Debug, Default, Clone, Serialize)]
pub struct VacuumStats {
    pub versions_pruned: u64,
    pub slots_tombstoned: u64,
    pub overflow_pages_freed: u64,
    pub index_entries_removed: u64,
    pub pages_compacted: u64,
}

impl Db {
    /// Вычистить недостижимые версии и вернуть место.
    pub fn vacuum(&self) -> Result<VacuumStats> {
        self.check_writable()?;
        self.vacuum_inner()
    }

    /// checkpoint: fsync основного файла, усечение WAL, новый high-water
    /// mark. false — WAL не сконфигурирован.
    pub fn checkpoint(&self) -> Result<bool> {
        self.check_open()?;
        self.store.wal_checkpoint(&self.txm)
    }
}

pub(crate) fn vacuum_impl(db: &Db) -> Result<VacuumStats> {
    let _guard = db.txm.commit_lock.lock().expect("commit lock poisoned");
    let mut stats = VacuumStats::default();
    record_vacuum_run();

    // Подсказка last_doc_id уходит в каталог до вычистки: счётчик id не
    // должен переиспользовать значения удалённого максимума после
    // переоткрытия.
    persist_doc_id_hints(db)?;

    let min = db.txm.min_active_snapshot();
    // Освобождать overflow-страницы безопасно только без живых транзакций:
    // чужой write-set мог забуферизовать страницу вместе со старым слотом, и
    // его коммит воскресил бы ссылку на уже переиспользованную цепочку.
    // Tombstone'ы этим не страдают (воскресшую запись никто не читает).
    let quiescent = db.txm.active_snapshot_count() == 0;
    let prune = db.versions.prune(min);
    stats.versions_pruned = prune.versions_pruned;
    record_versions_pruned(prune.versions_pruned);

    // [1] Слоты вычищенных версий.
    for (_c, _doc, loc) in &prune.reclaimed {
        stats.slots_tombstoned += 1;
        stats.overflow_pages_freed += tombstone_slot(db, *loc, quiescent)?;
    }

    // [2] Целиком удалённые документы: снять записи индексов.
    for (coll, doc_id) in &prune.removed_docs {
        let Some((entry, _)) = db.catalog.collection(&[], coll) else {
            continue;
        };
        let mut pages = DirectPages { store: &db.store };
        let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
        if tree.remove(&primary_key(*doc_id))? {
            stats.index_entries_removed += 1;
        }
    }

    // [3] По каждой пользовательской коллекции: свип и индексы.
    for name in db.catalog.collection_names() {
        let Some((entry, _)) = db.catalog.collection(&[], &name) else {
            continue;
        };
        let referenced = db.versions.referenced_locations(&name);

        // Свип ростера: живой слот без версии обязан совпадать с первичным
        // индексом, иначе это мусор (старые версии после переоткрытия,
        // хвосты прерванных транзакций).
        let roster = {
            let mut pages = DirectPages { store: &db.store };
            heap_pages(&mut pages, entry.first_doc_page)?
        };
        for pid in roster {
            let page = db.store.read(pid, None)?;
            let h = slotted_header_read(&page)?;
            for slot in 0..h.slot_count {
                if slotted_get(&page, slot)?.is_none() {
                    continue;
                }
                let loc = DocumentLocation { page_id: pid, slot };
                if referenced.contains(&loc) {
                    continue;
                }
                let keep = {
                    let mut pages = DirectPages { store: &db.store };
                    let (doc_id, _) = crate::heap::heap_read(&mut pages, loc)?;
                    let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
                    match tree.search(&primary_key(doc_id))? {
                        Some(v) => !v.is_deleted() && v.location() == loc,
                        None => false,
                    }
                };
                if !keep {
                    stats.slots_tombstoned += 1;
                    stats.overflow_pages_freed += tombstone_slot(db, loc, quiescent)?;
                }
            }
        }

        // Первичные записи с флагом удаления и без цепочки: документ мёртв
        // для всех будущих снапшотов — запись снимается.
        {
            let mut dead_keys: Vec<u64> = Vec::new();
            let mut pages = DirectPages { store: &db.store };
            let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
            tree.for_each(&mut |k, v| {
                if v.is_deleted() {
                    dead_keys.push(crate::btree::doc_id_from_primary(k));
                }
                Ok(true)
            })?;
            for doc_id in dead_keys {
                if db.versions.has_chain(&name, doc_id) {
                    continue;
                }
                if tree.remove(&primary_key(doc_id))? {
                    stats.index_entries_removed += 1;
                }
            }
        }

        // Устаревшие записи вторичных индексов: слот затомбстонен — запись
        // лишняя. Живой слот с чужим doc_id невозможен: compaction не
        // перенумеровывает слоты.
        for idx in db.catalog.indexes_of(&[], &name) {
            let kw = key_width(idx.kind) + 8;
            let mut stale: Vec<Vec<u8>> = Vec::new();
            {
                let mut pages = DirectPages { store: &db.store };
                let mut tree = BTree::open(&mut pages, idx.root, kw);
                tree.for_each(&mut |k, v| {
                    let loc = v.location();
                    let page = db.store.read(loc.page_id, None)?;
                    let live = page[0] == PAGE_TYPE_DOCUMENT
                        && slotted_get(&page, loc.slot)?.is_some();
                    if !live {
                        stale.push(k.to_vec());
                    }
                    Ok(true)
                })?;
            }
            for key in stale {
                let mut pages = DirectPages { store: &db.store };
                let mut tree = BTree::open(&mut pages, idx.root, kw);
                if tree.remove(&key)? {
                    stats.index_entries_removed += 1;
                }
            }
        }
    }

    // [4] Compaction: ростеры коллекций и цепочки каталога.
    let mut chains: Vec<u32> = vec![db.catalog.cols_first_page(), db.catalog.idxs_first_page()];
    for name in db.catalog.collection_names() {
        if let Some((entry, _)) = db.catalog.collection(&[], &name) {
            chains.push(entry.first_doc_page);
        }
    }
    let mut seen: HashSet<u32> = HashSet::new();
    for first in chains {
        if first == NO_PAGE {
            continue;
        }
        let roster = {
            let mut pages = DirectPages { store: &db.store };
            heap_pages(&mut pages, first)?
        };
        for pid in roster {
            if !seen.insert(pid) {
                continue;
            }
            let mut page = db.store.read(pid, None)?;
            if slotted_needs_compaction(&page, COMPACTION_MIN_GAIN)? {
                slotted_compact(&mut page)?;
                db.store.write(pid, &page, None)?;
                stats.pages_compacted += 1;
            }
        }
    }

    record_slots_tombstoned(stats.slots_tombstoned);
    db.store.persist_header_with_counters(&db.txm)?;
    if stats.slots_tombstoned + stats.versions_pruned + stats.pages_compacted > 0 {
        info!(
            "vacuum: {} version(s) pruned, {} slot(s) tombstoned, {} overflow page(s) freed, {} index entr(ies) removed, {} page(s) compacted",
            stats.versions_pruned,
            stats.slots_tombstoned,
            stats.overflow_pages_freed,
            stats.index_entries_removed,
            stats.pages_compacted
        );
    } else {
        debug!("vacuum: nothing to reclaim");
    }
    Ok(stats)
}

fn persist_doc_id_hints(db: &Db) -> Result<()> {
    for name in db.catalog.collection_names() {
        let Some((mut entry, meta)) = db.catalog.collection(&[], &name) else {
            continue;
        };
        let mut max_id = entry.last_doc_id;
        {
            let mut pages = DirectPages { store: &db.store };
            let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
            tree.for_each(&mut |k, _v| {
                max_id = max_id.max(crate::btree::doc_id_from_primary(k));
                Ok(true)
            })?;
        }
        {
            let counters = db.doc_counters.lock().expect("doc counters lock poisoned");
            if let Some(c) = counters.get(&name) {
                max_id = max_id.max(*c);
            }
        }
        if max_id > entry.last_doc_id {
            entry.last_doc_id = max_id;
            let payload = serde_json::to_vec(&entry).map_err(|e| {
                crate::errors::GaldrError::corruption(format!("encode catalog entry: {}", e))
            })?;
            let mut pages = DirectPages { store: &db.store };
            crate::heap::heap_delete(&mut pages, meta.location)?;
            let location = crate::heap::heap_insert(
                &mut pages,
                db.catalog.cols_first_page(),
                meta.meta_doc_id,
                &payload,
            )?;
            db.catalog.apply(vec![crate::catalog::CatalogOp::UpsertCollection {
                entry,
                meta_doc_id: meta.meta_doc_id,
                location,
            }]);
        }
    }
    Ok(())
}

/// Tombstone слота; overflow-цепочка освобождается только при quiescent.
fn tombstone_slot(db: &Db, loc: DocumentLocation, free_overflow: bool) -> Result<u64> {
    let mut page = db.store.read(loc.page_id, None)?;
    let entry = match slotted_delete(&mut page, loc.slot) {
        Ok(e) => e,
        // Слот уже затомбстонен (например, двойной учёт) — не фатально.
        Err(_) => return Ok(0),
    };
    db.store.write(loc.page_id, &page, None)?;

    let mut freed = 0u64;
    if free_overflow && entry.has_overflow() {
        for i in 0..entry.overflow_pages() {
            db.store.pager().free_page(entry.first_overflow + i)?;
            freed += 1;
        }
    }
    Ok(freed)
}
