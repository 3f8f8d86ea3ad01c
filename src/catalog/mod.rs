//! catalog — коллекции и индексы.
//!
//! Персистентность — «коллекции коллекций»: записи каталога лежат
//! документами в двух зарезервированных цепочках. Голова цепочки
//! $collections — в заголовке файла; $indexes находится по записи о нём в
//! $collections (там же записи о самих зарезервированных коллекциях).
//! Записи сериализуются в JSON поверх обычного конверта документа.
//!
//! Правки каталога внутри транзакции едут в её write-set'е (страницы) и в
//! pending-списке CatalogOp; in-memory карты обновляются только на коммите,
//! поэтому abort ничего не оставляет.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::consts::{CATALOG_COLLECTIONS, CATALOG_INDEXES, NO_PAGE};
use crate::errors::{GaldrError, Result};
use crate::heap::{heap_insert, heap_iter, heap_new_chain};
use crate::pager::PageAccess;
use crate::record::{FieldDescriptor, FieldKind};
use crate::version::DocumentLocation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub name: String,
    pub first_doc_page: u32,
    pub primary_root: u32,
    /// Подсказка для счётчика doc_id; уточняется по первичному индексу.
    pub last_doc_id: u64,
    pub fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub collection: String,
    pub field: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub root: u32,
}

/// Отложенная правка каталога; применяется к in-memory картам на коммите.
#[derive(Debug, Clone)]
pub enum CatalogOp {
    UpsertCollection {
        entry: CollectionEntry,
        meta_doc_id: u64,
        location: DocumentLocation,
    },
    UpsertIndex {
        entry: IndexEntry,
        meta_doc_id: u64,
        location: DocumentLocation,
    },
    DropCollection {
        name: String,
    },
    DropIndex {
        collection: String,
        field: String,
    },
}

/// Положение персистентной записи каталога.
#[derive(Debug, Clone, Copy)]
pub struct MetaLoc {
    pub meta_doc_id: u64,
    pub location: DocumentLocation,
}

#[derive(Default)]
struct CatalogInner {
    collections: HashMap<String, (CollectionEntry, MetaLoc)>,
    indexes: HashMap<(String, String), (IndexEntry, MetaLoc)>,
    next_meta_doc_id: u64,
}

pub struct Catalog {
    inner: RwLock<CatalogInner>,
    cols_first_page: u32,
    idxs_first_page: u32,
}

fn is_reserved(name: &str) -> bool {
    name == CATALOG_COLLECTIONS || name == CATALOG_INDEXES
}

impl Catalog {
    /// Разметить каталог новой базы. Возвращает голову $collections для
    /// заголовка файла.
    pub fn bootstrap(access: &mut dyn PageAccess) -> Result<u32> {
        let cols_first = heap_new_chain(access)?;
        let idxs_first = heap_new_chain(access)?;

        let cols_entry = CollectionEntry {
            name: CATALOG_COLLECTIONS.to_string(),
            first_doc_page: cols_first,
            primary_root: NO_PAGE,
            last_doc_id: 2,
            fields: Vec::new(),
        };
        let idxs_entry = CollectionEntry {
            name: CATALOG_INDEXES.to_string(),
            first_doc_page: idxs_first,
            primary_root: NO_PAGE,
            last_doc_id: 0,
            fields: Vec::new(),
        };
        let p1 = serde_json::to_vec(&cols_entry)
            .map_err(|e| GaldrError::corruption(format!("encode catalog entry: {}", e)))?;
        let p2 = serde_json::to_vec(&idxs_entry)
            .map_err(|e| GaldrError::corruption(format!("encode catalog entry: {}", e)))?;
        heap_insert(access, cols_first, 1, &p1)?;
        heap_insert(access, cols_first, 2, &p2)?;
        Ok(cols_first)
    }

    /// Загрузить каталог из зарезервированных цепочек.
    pub fn load(access: &mut dyn PageAccess, cols_first_page: u32) -> Result<Self> {
        let mut inner = CatalogInner::default();
        let mut max_meta_id = 0u64;

        heap_iter(access, cols_first_page, &mut |loc, meta_doc_id, payload| {
            let entry: CollectionEntry = serde_json::from_slice(&payload).map_err(|e| {
                GaldrError::corruption(format!(
                    "bad catalog entry at page {} slot {}: {}",
                    loc.page_id, loc.slot, e
                ))
            })?;
            max_meta_id = max_meta_id.max(meta_doc_id);
            inner.collections.insert(
                entry.name.clone(),
                (
                    entry,
                    MetaLoc {
                        meta_doc_id,
                        location: loc,
                    },
                ),
            );
            Ok(true)
        })?;

        let idxs_first_page = inner
            .collections
            .get(CATALOG_INDEXES)
            .map(|(e, _)| e.first_doc_page)
            .ok_or_else(|| GaldrError::corruption("catalog has no $indexes chain"))?;

        heap_iter(access, idxs_first_page, &mut |loc, meta_doc_id, payload| {
            let entry: IndexEntry = serde_json::from_slice(&payload).map_err(|e| {
                GaldrError::corruption(format!(
                    "bad index entry at page {} slot {}: {}",
                    loc.page_id, loc.slot, e
                ))
            })?;
            max_meta_id = max_meta_id.max(meta_doc_id);
            inner.indexes.insert(
                (entry.collection.clone(), entry.field.clone()),
                (
                    entry,
                    MetaLoc {
                        meta_doc_id,
                        location: loc,
                    },
                ),
            );
            Ok(true)
        })?;

        inner.next_meta_doc_id = max_meta_id + 1;
        Ok(Self {
            inner: RwLock::new(inner),
            cols_first_page,
            idxs_first_page,
        })
    }

    pub fn cols_first_page(&self) -> u32 {
        self.cols_first_page
    }

    pub fn idxs_first_page(&self) -> u32 {
        self.idxs_first_page
    }

    pub fn alloc_meta_doc_id(&self) -> u64 {
        let mut inner = self.inner.write().expect("catalog lock poisoned");
        let id = inner.next_meta_doc_id;
        inner.next_meta_doc_id += 1;
        id
    }

    // ---------- чтение (с наложением pending-операций транзакции) ----------

    /// Запись коллекции глазами транзакции: pending-оп перекрывает карту.
    pub fn collection(
        &self,
        pending: &[CatalogOp],
        name: &str,
    ) -> Option<(CollectionEntry, MetaLoc)> {
        for op in pending.iter().rev() {
            match op {
                CatalogOp::UpsertCollection {
                    entry,
                    meta_doc_id,
                    location,
                } if entry.name == name => {
                    return Some((
                        entry.clone(),
                        MetaLoc {
                            meta_doc_id: *meta_doc_id,
                            location: *location,
                        },
                    ))
                }
                CatalogOp::DropCollection { name: n } if n == name => return None,
                _ => {}
            }
        }
        let inner = self.inner.read().expect("catalog lock poisoned");
        inner
            .collections
            .get(name)
            .map(|(e, m)| (e.clone(), *m))
    }

    pub fn index(
        &self,
        pending: &[CatalogOp],
        collection: &str,
        field: &str,
    ) -> Option<(IndexEntry, MetaLoc)> {
        for op in pending.iter().rev() {
            match op {
                CatalogOp::UpsertIndex {
                    entry,
                    meta_doc_id,
                    location,
                } if entry.collection == collection && entry.field == field => {
                    return Some((
                        entry.clone(),
                        MetaLoc {
                            meta_doc_id: *meta_doc_id,
                            location: *location,
                        },
                    ))
                }
                CatalogOp::DropIndex {
                    collection: c,
                    field: f,
                } if c == collection && f == field => return None,
                CatalogOp::DropCollection { name } if name == collection => return None,
                _ => {}
            }
        }
        let inner = self.inner.read().expect("catalog lock poisoned");
        inner
            .indexes
            .get(&(collection.to_string(), field.to_string()))
            .map(|(e, m)| (e.clone(), *m))
    }

    /// Все индексы коллекции (pending-операции наложены).
    pub fn indexes_of(&self, pending: &[CatalogOp], collection: &str) -> Vec<IndexEntry> {
        let mut map: HashMap<String, IndexEntry> = {
            let inner = self.inner.read().expect("catalog lock poisoned");
            inner
                .indexes
                .iter()
                .filter(|((c, _), _)| c == collection)
                .map(|((_, f), (e, _))| (f.clone(), e.clone()))
                .collect()
        };
        for op in pending.iter() {
            match op {
                CatalogOp::UpsertIndex { entry, .. } if entry.collection == collection => {
                    map.insert(entry.field.clone(), entry.clone());
                }
                CatalogOp::DropIndex {
                    collection: c,
                    field,
                } if c == collection => {
                    map.remove(field);
                }
                CatalogOp::DropCollection { name } if name == collection => {
                    map.clear();
                }
                _ => {}
            }
        }
        let mut out: Vec<IndexEntry> = map.into_values().collect();
        out.sort_by(|a, b| a.field.cmp(&b.field));
        out
    }

    /// Имена пользовательских коллекций (без зарезервированных).
    pub fn collection_names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("catalog lock poisoned");
        let mut names: Vec<String> = inner
            .collections
            .keys()
            .filter(|n| !is_reserved(n))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn index_names(&self, collection: &str) -> Vec<String> {
        let inner = self.inner.read().expect("catalog lock poisoned");
        let mut names: Vec<String> = inner
            .indexes
            .keys()
            .filter(|(c, _)| c == collection)
            .map(|(_, f)| f.clone())
            .collect();
        names.sort();
        names
    }

    /// Снимок всех записей (doctor/status/vacuum).
    pub fn snapshot(&self) -> (Vec<(CollectionEntry, MetaLoc)>, Vec<(IndexEntry, MetaLoc)>) {
        let inner = self.inner.read().expect("catalog lock poisoned");
        (
            inner.collections.values().cloned().collect(),
            inner.indexes.values().cloned().collect(),
        )
    }

    /// Живые положения записей каталога (страховка vacuum-свипа).
    pub fn live_meta_locations(&self) -> std::collections::HashSet<DocumentLocation> {
        let inner = self.inner.read().expect("catalog lock poisoned");
        inner
            .collections
            .values()
            .map(|(_, m)| m.location)
            .chain(inner.indexes.values().map(|(_, m)| m.location))
            .collect()
    }

    // ---------- применение на коммите ----------

    pub fn apply(&self, ops: Vec<CatalogOp>) {
        let mut inner = self.inner.write().expect("catalog lock poisoned");
        for op in ops {
            match op {
                CatalogOp::UpsertCollection {
                    entry,
                    meta_doc_id,
                    location,
                } => {
                    inner.collections.insert(
                        entry.name.clone(),
                        (
                            entry,
                            MetaLoc {
                                meta_doc_id,
                                location,
                            },
                        ),
                    );
                }
                CatalogOp::UpsertIndex {
                    entry,
                    meta_doc_id,
                    location,
                } => {
                    inner.indexes.insert(
                        (entry.collection.clone(), entry.field.clone()),
                        (
                            entry,
                            MetaLoc {
                                meta_doc_id,
                                location,
                            },
                        ),
                    );
                }
                CatalogOp::DropCollection { name } => {
                    inner.collections.remove(&name);
                    inner.indexes.retain(|(c, _), _| c != &name);
                }
                CatalogOp::DropIndex { collection, field } => {
                    inner.indexes.remove(&(collection, field));
                }
            }
        }
    }

    /// Обновление подсказки last_doc_id вне транзакций (vacuum/close).
    pub fn set_last_doc_id_hint(&self, collection: &str, last: u64) {
        let mut inner = self.inner.write().expect("catalog lock poisoned");
        if let Some((e, _)) = inner.collections.get_mut(collection) {
            e.last_doc_id = e.last_doc_id.max(last);
        }
    }
}

/// Проверка имени пользовательской коллекции.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GaldrError::invalid_arg("collection name is empty"));
    }
    if is_reserved(name) || name.starts_with('$') {
        return Err(GaldrError::invalid_arg(format!(
            "collection name '{}' is reserved",
            name
        )));
    }
    Ok(())
}
