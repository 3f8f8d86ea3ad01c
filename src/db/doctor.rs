//! db/doctor — проверка целостности и сверка каталога с физикой.
//!
//! check(): заголовок, checksum страниц документов, инварианты slot-каталога,
//! порядок и глубина B+-деревьев, orphan-сверка.
//!
//! Orphans: запись каталога без физических страниц (orphaned collection)
//! либо физические страницы индекса без записи каталога (orphaned index) —
//! последствия сбоя или частичного replay.

use std::collections::HashSet;

use log::warn;
use serde::Serialize;

use crate::btree::{key_width, BTree};
use crate::consts::{
    NO_PAGE, PAGE_TYPE_BTREE_INTERNAL, PAGE_TYPE_BTREE_LEAF, PAGE_TYPE_DOCUMENT,
};
use crate::errors::{GaldrError, Result};
use crate::heap::heap_pages;
use crate::page::{slotted_contiguous_free, slotted_header_read, slotted_logical_free};
use crate::txn::DirectPages;

use super::core::Db;

#[derive(Debug, Default, Clone, Serialize)]
pub struct OrphanReport {
    /// Коллекции каталога без корректных физических страниц.
    pub collections: Vec<String>,
    /// Страницы B+-деревьев, не достижимые ни из одного каталожного корня.
    pub index_pages: Vec<u32>,
}

impl OrphanReport {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.index_pages.is_empty()
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CheckReport {
    pub pages_scanned: u32,
    pub corrupt_pages: Vec<u32>,
    pub btree_keys: u64,
    pub orphans: OrphanReport,
}

impl CheckReport {
    pub fn ok(&self) -> bool {
        self.corrupt_pages.is_empty() && self.orphans.is_empty()
    }
}

impl Db {
    /// Полная проверка файла. Повреждения собираются в отчёт, движок
    /// остаётся работоспособным (сами чтения помечают read-only при
    /// Corruption только на обычных путях).
    pub fn check(&self) -> Result<CheckReport> {
        self.check_open()?;
        let mut report = CheckReport::default();
        let next_page = self.store.pager().header().next_page_id;

        for pid in 1..next_page {
            report.pages_scanned += 1;
            let page = match self.store.read(pid, None) {
                Ok(p) => p,
                Err(e) => {
                    warn!("check: page {} unreadable: {}", pid, e);
                    report.corrupt_pages.push(pid);
                    continue;
                }
            };
            if page[0] == PAGE_TYPE_DOCUMENT {
                // Инвариант учёта места: logical >= contiguous.
                let ok = slotted_header_read(&page)
                    .and_then(|_| {
                        let c = slotted_contiguous_free(&page)?;
                        let l = slotted_logical_free(&page)?;
                        if l < c {
                            return Err(GaldrError::corruption(format!(
                                "page {}: logical free {} < contiguous free {}",
                                pid, l, c
                            )));
                        }
                        Ok(())
                    })
                    .is_ok();
                if !ok {
                    report.corrupt_pages.push(pid);
                }
            }
        }

        // Деревья каталога: порядок ключей и глубина листьев.
        for name in self.catalog.collection_names() {
            let Some((entry, _)) = self.catalog.collection(&[], &name) else {
                continue;
            };
            let mut pages = DirectPages { store: &self.store };
            let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
            match tree.verify() {
                Ok((keys, _depth)) => report.btree_keys += keys,
                Err(e) => {
                    warn!("check: primary index of '{}' broken: {}", name, e);
                    report.corrupt_pages.push(entry.primary_root);
                }
            }
            for idx in self.catalog.indexes_of(&[], &name) {
                let mut pages = DirectPages { store: &self.store };
                let mut tree = BTree::open(&mut pages, idx.root, key_width(idx.kind) + 8);
                match tree.verify() {
                    Ok((keys, _)) => report.btree_keys += keys,
                    Err(e) => {
                        warn!("check: index '{}' on '{}' broken: {}", idx.field, name, e);
                        report.corrupt_pages.push(idx.root);
                    }
                }
            }
        }

        report.orphans = self.get_orphaned_schema()?;
        Ok(report)
    }

    /// Сироты каталога и физики.
    pub fn get_orphaned_schema(&self) -> Result<OrphanReport> {
        self.check_open()?;
        let mut report = OrphanReport::default();
        let next_page = self.store.pager().header().next_page_id;

        let (cols, idxs) = self.catalog.snapshot();

        // Каталожные записи без физики.
        let mut reachable: HashSet<u32> = HashSet::new();
        for (entry, _) in &cols {
            let mut valid = true;
            if entry.first_doc_page != NO_PAGE {
                match self.store.read(entry.first_doc_page, None) {
                    Ok(p) if p[0] == PAGE_TYPE_DOCUMENT => {
                        let mut pages = DirectPages { store: &self.store };
                        reachable.extend(heap_pages(&mut pages, entry.first_doc_page)?);
                    }
                    _ => valid = false,
                }
            }
            if entry.primary_root != NO_PAGE {
                match self.store.read(entry.primary_root, None) {
                    Ok(p)
                        if p[0] == PAGE_TYPE_BTREE_LEAF
                            || p[0] == PAGE_TYPE_BTREE_INTERNAL =>
                    {
                        let mut pages = DirectPages { store: &self.store };
                        let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
                        match tree.collect_pages() {
                            Ok(ps) => reachable.extend(ps),
                            Err(_) => valid = false,
                        }
                    }
                    _ => valid = false,
                }
            }
            if !valid {
                report.collections.push(entry.name.clone());
            }
        }
        for (idx, _) in &idxs {
            match self.store.read(idx.root, None) {
                Ok(p) if p[0] == PAGE_TYPE_BTREE_LEAF || p[0] == PAGE_TYPE_BTREE_INTERNAL => {
                    let mut pages = DirectPages { store: &self.store };
                    let mut tree = BTree::open(&mut pages, idx.root, key_width(idx.kind) + 8);
                    if let Ok(ps) = tree.collect_pages() {
                        reachable.extend(ps);
                    }
                }
                _ => {
                    // Индекс без физики считается сиротой коллекции-владельца.
                    if !report.collections.contains(&idx.collection) {
                        report.collections.push(idx.collection.clone());
                    }
                }
            }
        }

        // Физические страницы деревьев без каталога.
        for pid in 1..next_page {
            let Ok(page) = self.store.read(pid, None) else {
                continue;
            };
            if (page[0] == PAGE_TYPE_BTREE_LEAF || page[0] == PAGE_TYPE_BTREE_INTERNAL)
                && !reachable.contains(&pid)
            {
                report.index_pages.push(pid);
            }
        }
        report.collections.sort();
        report.collections.dedup();
        report.index_pages.sort_unstable();
        Ok(report)
    }

    /// Удалить сирот; возвращает перечень вычищенного.
    pub fn cleanup_orphaned_schema(&self, delete_documents: bool) -> Result<Vec<String>> {
        self.check_writable()?;
        let orphans = self.get_orphaned_schema()?;
        let mut cleaned = Vec::new();

        for name in &orphans.collections {
            match self.drop_collection(name, delete_documents) {
                Ok(()) => cleaned.push(format!("collection '{}'", name)),
                Err(GaldrError::InvalidOperation(msg)) => {
                    // Непустая коллекция без delete_documents остаётся.
                    warn!("cleanup: skipping '{}': {}", name, msg);
                }
                Err(e) => {
                    // Физика может быть слишком битой для аккуратного drop —
                    // снимаем только каталожную запись.
                    warn!("cleanup: forced catalog removal of '{}': {}", name, e);
                    if let Some((_, meta)) = self.catalog.collection(&[], name) {
                        let mut pages = DirectPages { store: &self.store };
                        let _ = crate::heap::heap_delete(&mut pages, meta.location);
                    }
                    self.catalog
                        .apply(vec![crate::catalog::CatalogOp::DropCollection {
                            name: name.clone(),
                        }]);
                    self.versions.drop_collection(name);
                    cleaned.push(format!("collection '{}' (forced)", name));
                }
            }
        }

        for pid in &orphans.index_pages {
            self.store.pager().free_page(*pid)?;
            cleaned.push(format!("index page {}", pid));
        }
        if !cleaned.is_empty() {
            self.store.persist_header_with_counters(&self.txm)?;
        }
        Ok(cleaned)
    }
}
