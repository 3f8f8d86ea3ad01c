//! O(1) LRU-кэш страниц.
//!
//! Устройство:
//! - HashMap<page_id, Entry> хранит содержимое и указатели prev/next по
//!   page_id; head = MRU, tail = LRU.
//! - get() переносит узел в голову и копирует байты в out.
//! - put() обновляет существующий узел (перенос в голову) либо вставляет
//!   новый, вытесняя хвост при переполнении.
//! - invalidate() выбрасывает страницу (вызывается при коммите write-set).
//! - Ёмкость 0 выключает кэш (no-op).

use std::collections::HashMap;

pub(crate) struct PageCache {
    cap: usize,
    page_size: usize,
    map: HashMap<u32, Entry>,
    head: Option<u32>, // most-recently used
    tail: Option<u32>, // least-recently used
}

struct Entry {
    data: Vec<u8>,
    prev: Option<u32>,
    next: Option<u32>,
}

impl PageCache {
    /// Кэш на cache_bytes/page_size страниц.
    pub(crate) fn new(cache_bytes: usize, page_size: usize) -> Self {
        let cap = if page_size == 0 { 0 } else { cache_bytes / page_size };
        Self {
            cap,
            page_size,
            map: HashMap::with_capacity(cap.max(1)),
            head: None,
            tail: None,
        }
    }

    pub(crate) fn get(&mut self, page_id: u32, out: &mut [u8]) -> bool {
        if self.cap == 0 || out.len() != self.page_size {
            return false;
        }
        if !self.map.contains_key(&page_id) {
            return false;
        }
        self.detach(page_id);
        self.attach_front(page_id);
        if let Some(e) = self.map.get(&page_id) {
            out.copy_from_slice(&e.data);
            return true;
        }
        false
    }

    pub(crate) fn put(&mut self, page_id: u32, data: &[u8]) {
        if self.cap == 0 || data.len() != self.page_size {
            return;
        }
        if let Some(e) = self.map.get_mut(&page_id) {
            e.data.copy_from_slice(data);
            self.detach(page_id);
            self.attach_front(page_id);
            return;
        }

        if self.map.len() >= self.cap {
            if let Some(lru) = self.tail {
                self.detach(lru);
                self.map.remove(&lru);
            }
        }
        self.map.insert(
            page_id,
            Entry {
                data: data.to_vec(),
                prev: None,
                next: None,
            },
        );
        self.attach_front(page_id);
    }

    pub(crate) fn invalidate(&mut self, page_id: u32) {
        if self.map.contains_key(&page_id) {
            self.detach(page_id);
            self.map.remove(&page_id);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.head = None;
        self.tail = None;
    }

    fn detach(&mut self, page_id: u32) {
        let (prev, next) = match self.map.get(&page_id) {
            Some(e) => (e.prev, e.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(pe) = self.map.get_mut(&p) {
                    pe.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(ne) = self.map.get_mut(&n) {
                    ne.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(e) = self.map.get_mut(&page_id) {
            e.prev = None;
            e.next = None;
        }
    }

    fn attach_front(&mut self, page_id: u32) {
        let old_head = self.head;
        if let Some(e) = self.map.get_mut(&page_id) {
            e.prev = None;
            e.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(he) = self.map.get_mut(&h) {
                he.prev = Some(page_id);
            }
        }
        self.head = Some(page_id);
        if self.tail.is_none() {
            self.tail = Some(page_id);
        }
    }
}
