//! version — MVCC-индекс версий: цепочки документов и предикат видимости.
//!
//! Структура уровня процесса: collection -> (doc_id -> голова цепочки).
//! Версии лежат в арене с монотонными индексами; цепочка — это индексы
//! previous от новой версии к старой. Голова append-only: новая версия
//! добавляется под write-защёлкой коллекции, читатели идут через
//! read-защёлку и не блокируют друг друга.
//!
//! Версии помечаются commit-TxId: версия становится видимой снапшотам,
//! взятым после её коммита. Предикат видимости (единственная опора
//! snapshot isolation):
//!
//!   visible(v, s) = v.created_by <= s && (v.deleted_by is none || s < v.deleted_by)
//!
//! Слева включительно (снапшот, взятый после коммита, видит версию),
//! справа строго (удаление в T скрывает от снапшотов >= T).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::errors::{GaldrError, Result};

/// Физическое положение payload'а документа.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentLocation {
    pub page_id: u32,
    pub slot: u16,
}

#[derive(Debug, Clone)]
pub struct DocumentVersion {
    pub created_by: u64,
    pub location: DocumentLocation,
    pub deleted_by: Option<u64>,
    pub previous: Option<u32>,
}

/// Предикат видимости версии для снапшота.
#[inline]
pub fn visible(v: &DocumentVersion, snapshot: u64) -> bool {
    v.created_by <= snapshot && v.deleted_by.map_or(true, |d| snapshot < d)
}

#[derive(Default)]
struct CollectionVersions {
    arena: Vec<Option<DocumentVersion>>,
    free_slots: Vec<u32>,
    heads: HashMap<u64, u32>,
}

impl CollectionVersions {
    fn alloc(&mut self, v: DocumentVersion) -> u32 {
        if let Some(idx) = self.free_slots.pop() {
            self.arena[idx as usize] = Some(v);
            idx
        } else {
            self.arena.push(Some(v));
            (self.arena.len() - 1) as u32
        }
    }

    fn release(&mut self, idx: u32) {
        self.arena[idx as usize] = None;
        self.free_slots.push(idx);
    }

    fn get(&self, idx: u32) -> Option<&DocumentVersion> {
        self.arena.get(idx as usize).and_then(|o| o.as_ref())
    }
}

#[derive(Default)]
pub struct VersionIndex {
    collections: RwLock<HashMap<String, Arc<RwLock<CollectionVersions>>>>,
}

#[derive(Debug, Default)]
pub struct PruneStats {
    pub versions_pruned: u64,
    /// Слоты, на которые больше не ссылается ни одна версия.
    pub reclaimed: Vec<(String, u64, DocumentLocation)>,
    /// Документы, чьи цепочки удалены целиком (удаление стало невидимым
    /// для всех живых снапшотов).
    pub removed_docs: Vec<(String, u64)>,
}

impl VersionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn coll(&self, collection: &str) -> Arc<RwLock<CollectionVersions>> {
        {
            let map = self.collections.read().expect("version lock poisoned");
            if let Some(c) = map.get(collection) {
                return Arc::clone(c);
            }
        }
        let mut map = self.collections.write().expect("version lock poisoned");
        Arc::clone(map.entry(collection.to_string()).or_default())
    }

    /// Новая голова цепочки документа.
    pub fn add_version(
        &self,
        collection: &str,
        doc_id: u64,
        created_by: u64,
        location: DocumentLocation,
    ) {
        let coll = self.coll(collection);
        let mut cv = coll.write().expect("version lock poisoned");
        let previous = cv.heads.get(&doc_id).copied();
        let idx = cv.alloc(DocumentVersion {
            created_by,
            location,
            deleted_by: None,
            previous,
        });
        cv.heads.insert(doc_id, idx);
    }

    /// Пометить текущую голову удалённой: снапшоты >= deleted_by документа
    /// не видят.
    pub fn mark_deleted(&self, collection: &str, doc_id: u64, deleted_by: u64) -> Result<()> {
        let coll = self.coll(collection);
        let mut cv = coll.write().expect("version lock poisoned");
        let head = *cv
            .heads
            .get(&doc_id)
            .ok_or_else(|| GaldrError::not_found(format!("document {} has no versions", doc_id)))?;
        let v = cv.arena[head as usize]
            .as_mut()
            .expect("version head points at a released arena slot");
        v.deleted_by = Some(deleted_by);
        Ok(())
    }

    /// Первая видимая версия от головы цепочки.
    pub fn get_visible(
        &self,
        collection: &str,
        doc_id: u64,
        snapshot: u64,
    ) -> Option<DocumentLocation> {
        let coll = self.coll(collection);
        let cv = coll.read().expect("version lock poisoned");
        let mut cur = cv.heads.get(&doc_id).copied();
        while let Some(idx) = cur {
            let v = cv.get(idx)?;
            if visible(v, snapshot) {
                return Some(v.location);
            }
            cur = v.previous;
        }
        None
    }

    /// Есть ли у документа цепочка в памяти (иначе решает первичный индекс).
    pub fn has_chain(&self, collection: &str, doc_id: u64) -> bool {
        let coll = self.coll(collection);
        let cv = coll.read().expect("version lock poisoned");
        cv.heads.contains_key(&doc_id)
    }

    /// Синтетическая голова для документа, поднятого из первичного индекса
    /// (created_by = 0 — видим любому снапшоту). Не затирает существующую
    /// цепочку: гонка двух читателей разрешается в пользу первого.
    pub fn adopt_existing(&self, collection: &str, doc_id: u64, location: DocumentLocation) {
        let coll = self.coll(collection);
        let mut cv = coll.write().expect("version lock poisoned");
        if cv.heads.contains_key(&doc_id) {
            return;
        }
        let idx = cv.alloc(DocumentVersion {
            created_by: 0,
            location,
            deleted_by: None,
            previous: None,
        });
        cv.heads.insert(doc_id, idx);
    }

    pub fn drop_collection(&self, collection: &str) {
        let mut map = self.collections.write().expect("version lock poisoned");
        map.remove(collection);
    }

    /// Все слоты, на которые ссылаются живые версии коллекции (страховка
    /// vacuum-свипа от реклейма ещё видимых версий).
    pub fn referenced_locations(&self, collection: &str) -> HashSet<DocumentLocation> {
        let coll = self.coll(collection);
        let cv = coll.read().expect("version lock poisoned");
        let mut out = HashSet::new();
        for v in cv.arena.iter().flatten() {
            out.insert(v.location);
        }
        out
    }

    /// Вычистить версии, недостижимые для min_snapshot и всех более новых
    /// снапшотов. Возвращает освободившиеся слоты и целиком удалённые
    /// документы.
    pub fn prune(&self, min_snapshot: u64) -> PruneStats {
        let mut stats = PruneStats::default();
        let map = self.collections.read().expect("version lock poisoned");
        for (name, coll) in map.iter() {
            let mut cv = coll.write().expect("version lock poisoned");
            let doc_ids: Vec<u64> = cv.heads.keys().copied().collect();
            for doc_id in doc_ids {
                let head = cv.heads[&doc_id];

                // Идём от головы: держим версии новее min_snapshot, затем
                // границу — новейшую с created_by <= min_snapshot, если она
                // ещё видима хоть какому-то живому снапшоту.
                let mut keep_last: Option<u32> = None;
                let mut cur = Some(head);
                let mut boundary: Option<u32> = None;
                while let Some(idx) = cur {
                    let v = cv.get(idx).expect("chain points at a released arena slot");
                    if v.created_by > min_snapshot {
                        keep_last = Some(idx);
                        cur = v.previous;
                        continue;
                    }
                    boundary = Some(idx);
                    break;
                }

                let boundary_dead = boundary.map_or(false, |idx| {
                    let v = cv.get(idx).expect("boundary released");
                    v.deleted_by.map_or(false, |d| d <= min_snapshot)
                });

                // Хвост, подлежащий реклейму: всё старше границы, плюс сама
                // граница, если её удаление уже невидимо никому.
                let cut_from = if boundary_dead {
                    boundary
                } else {
                    boundary.and_then(|idx| cv.get(idx).expect("boundary released").previous)
                };

                // Отцепляем хвост.
                if let Some(first_dead) = cut_from {
                    match (keep_last, boundary_dead) {
                        (Some(last), true) => {
                            let v = cv.arena[last as usize].as_mut().expect("released");
                            v.previous = None;
                        }
                        (Some(_), false) => {
                            if let Some(bidx) = boundary {
                                let v = cv.arena[bidx as usize].as_mut().expect("released");
                                v.previous = None;
                            }
                        }
                        (None, true) => {
                            // Вся цепочка мертва.
                            cv.heads.remove(&doc_id);
                            stats.removed_docs.push((name.clone(), doc_id));
                        }
                        (None, false) => {
                            if let Some(bidx) = boundary {
                                let v = cv.arena[bidx as usize].as_mut().expect("released");
                                v.previous = None;
                            }
                        }
                    }

                    let mut cur = Some(first_dead);
                    while let Some(idx) = cur {
                        let v = cv.get(idx).expect("dead tail released").clone();
                        stats
                            .reclaimed
                            .push((name.clone(), doc_id, v.location));
                        cv.release(idx);
                        stats.versions_pruned += 1;
                        cur = v.previous;
                    }
                } else if boundary.is_none() && keep_last.is_none() {
                    // Пустая цепочка — не должно случаться.
                    cv.heads.remove(&doc_id);
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(p: u32, s: u16) -> DocumentLocation {
        DocumentLocation { page_id: p, slot: s }
    }

    #[test]
    fn visibility_predicate_table() {
        // Таблица случаев для visible(v, s).
        let live = DocumentVersion {
            created_by: 10,
            location: loc(1, 0),
            deleted_by: None,
            previous: None,
        };
        assert!(!visible(&live, 9));
        assert!(visible(&live, 10)); // слева включительно
        assert!(visible(&live, 11));

        let dead = DocumentVersion {
            created_by: 10,
            location: loc(1, 0),
            deleted_by: Some(20),
            previous: None,
        };
        assert!(visible(&dead, 19));
        assert!(!visible(&dead, 20)); // справа строго
        assert!(!visible(&dead, 25));
        assert!(!visible(&dead, 5));
    }

    #[test]
    fn chain_walk_selects_first_visible() {
        let vi = VersionIndex::new();
        vi.add_version("people", 1, 10, loc(1, 0));
        vi.add_version("people", 1, 20, loc(2, 0));
        vi.add_version("people", 1, 30, loc(3, 0));

        assert_eq!(vi.get_visible("people", 1, 9), None);
        assert_eq!(vi.get_visible("people", 1, 15), Some(loc(1, 0)));
        assert_eq!(vi.get_visible("people", 1, 20), Some(loc(2, 0)));
        assert_eq!(vi.get_visible("people", 1, 99), Some(loc(3, 0)));
    }

    #[test]
    fn delete_hides_from_newer_snapshots() {
        let vi = VersionIndex::new();
        vi.add_version("people", 7, 10, loc(1, 0));
        vi.mark_deleted("people", 7, 25).unwrap();

        assert_eq!(vi.get_visible("people", 7, 24), Some(loc(1, 0)));
        assert_eq!(vi.get_visible("people", 7, 25), None);
    }

    #[test]
    fn adopt_existing_does_not_clobber() {
        let vi = VersionIndex::new();
        vi.adopt_existing("people", 3, loc(5, 1));
        assert_eq!(vi.get_visible("people", 3, 0), Some(loc(5, 1)));

        vi.add_version("people", 3, 8, loc(6, 0));
        vi.adopt_existing("people", 3, loc(9, 9)); // no-op
        assert_eq!(vi.get_visible("people", 3, 100), Some(loc(6, 0)));
        assert_eq!(vi.get_visible("people", 3, 1), Some(loc(5, 1)));
    }

    #[test]
    fn prune_cuts_invisible_tail() {
        let vi = VersionIndex::new();
        vi.add_version("people", 1, 10, loc(1, 0));
        vi.add_version("people", 1, 20, loc(2, 0));
        vi.add_version("people", 1, 30, loc(3, 0));

        // Минимальный живой снапшот 25: версия@20 — граница, версия@10 мертва.
        let stats = vi.prune(25);
        assert_eq!(stats.versions_pruned, 1);
        assert_eq!(stats.reclaimed, vec![("people".to_string(), 1, loc(1, 0))]);
        assert_eq!(vi.get_visible("people", 1, 25), Some(loc(2, 0)));
        assert_eq!(vi.get_visible("people", 1, 99), Some(loc(3, 0)));
    }

    #[test]
    fn prune_removes_fully_deleted_chain() {
        let vi = VersionIndex::new();
        vi.add_version("people", 2, 10, loc(4, 0));
        vi.mark_deleted("people", 2, 15).unwrap();

        let stats = vi.prune(20);
        assert_eq!(stats.versions_pruned, 1);
        assert_eq!(stats.removed_docs, vec![("people".to_string(), 2)]);
        assert!(!vi.has_chain("people", 2));
    }
}
