//! btree/node — сериализация узла в страницу.
//!
//! Узел занимает ровно одну страницу. После 16-байтового заголовка идут
//! записи фиксированной ширины:
//! - лист: [ключ kw][page_id u32][slot u16][flags u8];
//! - внутренний: [ключ kw][child u32]; child_i держит ключи < key_i,
//!   правый (крайний) ребёнок — в поле next заголовка.
//!
//! order подбирается при инициализации: order * entry + header <= page_size.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    BT_CHILD_SIZE, BT_HDR_SIZE, BT_OFF_KEY_COUNT, BT_OFF_NEXT, BT_OFF_ORDER, BT_OFF_PARENT,
    BT_OFF_TYPE, BT_VALUE_SIZE, BT_VFLAG_DELETED, PAGE_TYPE_BTREE_INTERNAL, PAGE_TYPE_BTREE_LEAF,
};
use crate::errors::{GaldrError, Result};
use crate::version::DocumentLocation;

/// Значение листа: положение документа + флаги (bit0 — удалён).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafValue {
    pub page_id: u32,
    pub slot: u16,
    pub flags: u8,
}

impl LeafValue {
    pub fn new(loc: DocumentLocation) -> Self {
        Self {
            page_id: loc.page_id,
            slot: loc.slot,
            flags: 0,
        }
    }

    pub fn location(&self) -> DocumentLocation {
        DocumentLocation {
            page_id: self.page_id,
            slot: self.slot,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.flags & BT_VFLAG_DELETED != 0
    }

    pub fn deleted(mut self) -> Self {
        self.flags |= BT_VFLAG_DELETED;
        self
    }
}

#[inline]
pub fn leaf_entry_size(key_width: usize) -> usize {
    key_width + BT_VALUE_SIZE
}

#[inline]
pub fn internal_entry_size(key_width: usize) -> usize {
    key_width + BT_CHILD_SIZE
}

/// Инициализировать узел; возвращает вычисленный order.
pub fn node_init(page: &mut [u8], leaf: bool, key_width: usize) -> u16 {
    page.fill(0);
    let entry = if leaf {
        leaf_entry_size(key_width)
    } else {
        internal_entry_size(key_width)
    };
    let order = ((page.len() - BT_HDR_SIZE) / entry).min(u16::MAX as usize) as u16;
    page[BT_OFF_TYPE] = if leaf {
        PAGE_TYPE_BTREE_LEAF
    } else {
        PAGE_TYPE_BTREE_INTERNAL
    };
    LittleEndian::write_u16(&mut page[BT_OFF_ORDER..], order);
    order
}

pub fn node_is_leaf(page: &[u8]) -> Result<bool> {
    match page[BT_OFF_TYPE] {
        t if t == PAGE_TYPE_BTREE_LEAF => Ok(true),
        t if t == PAGE_TYPE_BTREE_INTERNAL => Ok(false),
        other => Err(GaldrError::corruption(format!(
            "not a btree node (type {})",
            other
        ))),
    }
}

pub fn node_key_count(page: &[u8]) -> u16 {
    LittleEndian::read_u16(&page[BT_OFF_KEY_COUNT..])
}

pub fn node_set_key_count(page: &mut [u8], n: u16) {
    LittleEndian::write_u16(&mut page[BT_OFF_KEY_COUNT..], n);
}

pub fn node_order(page: &[u8]) -> u16 {
    LittleEndian::read_u16(&page[BT_OFF_ORDER..])
}

/// next_leaf у листа / правый ребёнок у внутреннего узла.
pub fn node_next(page: &[u8]) -> u32 {
    LittleEndian::read_u32(&page[BT_OFF_NEXT..])
}

pub fn node_set_next(page: &mut [u8], next: u32) {
    LittleEndian::write_u32(&mut page[BT_OFF_NEXT..], next);
}

/// Подсказка о родителе; не авторитетна при восстановлении.
pub fn node_parent(page: &[u8]) -> u32 {
    LittleEndian::read_u32(&page[BT_OFF_PARENT..])
}

pub fn node_set_parent(page: &mut [u8], parent: u32) {
    LittleEndian::write_u32(&mut page[BT_OFF_PARENT..], parent);
}

// ---------- лист ----------

#[inline]
fn leaf_base(key_width: usize, i: u16) -> usize {
    BT_HDR_SIZE + i as usize * leaf_entry_size(key_width)
}

pub fn leaf_key<'a>(page: &'a [u8], key_width: usize, i: u16) -> &'a [u8] {
    let b = leaf_base(key_width, i);
    &page[b..b + key_width]
}

pub fn leaf_value(page: &[u8], key_width: usize, i: u16) -> LeafValue {
    let b = leaf_base(key_width, i) + key_width;
    LeafValue {
        page_id: LittleEndian::read_u32(&page[b..]),
        slot: LittleEndian::read_u16(&page[b + 4..]),
        flags: page[b + 6],
    }
}

pub fn leaf_set_value(page: &mut [u8], key_width: usize, i: u16, v: LeafValue) {
    let b = leaf_base(key_width, i) + key_width;
    LittleEndian::write_u32(&mut page[b..], v.page_id);
    LittleEndian::write_u16(&mut page[b + 4..], v.slot);
    page[b + 6] = v.flags;
}

/// Вставка с раздвижкой вправо; сортировку поддерживает вызывающий.
pub fn leaf_insert_at(page: &mut [u8], key_width: usize, i: u16, key: &[u8], v: LeafValue) {
    let n = node_key_count(page);
    let entry = leaf_entry_size(key_width);
    let src = leaf_base(key_width, i);
    let end = leaf_base(key_width, n);
    page.copy_within(src..end, src + entry);

    page[src..src + key_width].copy_from_slice(key);
    leaf_set_value(page, key_width, i, v);
    node_set_key_count(page, n + 1);
}

pub fn leaf_remove_at(page: &mut [u8], key_width: usize, i: u16) {
    let n = node_key_count(page);
    let entry = leaf_entry_size(key_width);
    let src = leaf_base(key_width, i + 1);
    let end = leaf_base(key_width, n);
    page.copy_within(src..end, src - entry);
    node_set_key_count(page, n - 1);
}

// ---------- внутренний узел ----------

#[inline]
fn internal_base(key_width: usize, i: u16) -> usize {
    BT_HDR_SIZE + i as usize * internal_entry_size(key_width)
}

pub fn internal_key<'a>(page: &'a [u8], key_width: usize, i: u16) -> &'a [u8] {
    let b = internal_base(key_width, i);
    &page[b..b + key_width]
}

pub fn internal_child(page: &[u8], key_width: usize, i: u16) -> u32 {
    let b = internal_base(key_width, i) + key_width;
    LittleEndian::read_u32(&page[b..])
}

pub fn internal_set_child(page: &mut [u8], key_width: usize, i: u16, child: u32) {
    let b = internal_base(key_width, i) + key_width;
    LittleEndian::write_u32(&mut page[b..], child);
}

pub fn internal_insert_at(page: &mut [u8], key_width: usize, i: u16, key: &[u8], child: u32) {
    let n = node_key_count(page);
    let entry = internal_entry_size(key_width);
    let src = internal_base(key_width, i);
    let end = internal_base(key_width, n);
    page.copy_within(src..end, src + entry);

    page[src..src + key_width].copy_from_slice(key);
    internal_set_child(page, key_width, i, child);
    node_set_key_count(page, n + 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_insert_keeps_entries() {
        let mut page = vec![0u8; 4096];
        let kw = 9usize;
        let order = node_init(&mut page, true, kw);
        assert!(order > 200);
        assert!(node_is_leaf(&page).unwrap());

        let k1 = [1u8; 9];
        let k2 = [2u8; 9];
        let k0 = [0u8; 9];
        let v = |p| LeafValue {
            page_id: p,
            slot: 3,
            flags: 0,
        };
        leaf_insert_at(&mut page, kw, 0, &k1, v(10));
        leaf_insert_at(&mut page, kw, 1, &k2, v(20));
        leaf_insert_at(&mut page, kw, 0, &k0, v(5));

        assert_eq!(node_key_count(&page), 3);
        assert_eq!(leaf_key(&page, kw, 0), &k0);
        assert_eq!(leaf_key(&page, kw, 1), &k1);
        assert_eq!(leaf_key(&page, kw, 2), &k2);
        assert_eq!(leaf_value(&page, kw, 1).page_id, 10);

        leaf_remove_at(&mut page, kw, 1);
        assert_eq!(node_key_count(&page), 2);
        assert_eq!(leaf_key(&page, kw, 1), &k2);
        assert_eq!(leaf_value(&page, kw, 1).page_id, 20);
    }

    #[test]
    fn deleted_flag_roundtrip() {
        let mut page = vec![0u8; 4096];
        let kw = 9usize;
        node_init(&mut page, true, kw);
        let k = [7u8; 9];
        leaf_insert_at(
            &mut page,
            kw,
            0,
            &k,
            LeafValue {
                page_id: 2,
                slot: 1,
                flags: 0,
            },
        );
        let v = leaf_value(&page, kw, 0);
        assert!(!v.is_deleted());
        leaf_set_value(&mut page, kw, 0, v.deleted());
        assert!(leaf_value(&page, kw, 0).is_deleted());
    }

    #[test]
    fn internal_children_layout() {
        let mut page = vec![0u8; 4096];
        let kw = 9usize;
        node_init(&mut page, false, kw);
        node_set_next(&mut page, 99); // правый ребёнок

        let k5 = [5u8; 9];
        internal_insert_at(&mut page, kw, 0, &k5, 11);
        let k9 = [9u8; 9];
        internal_insert_at(&mut page, kw, 1, &k9, 22);

        assert_eq!(node_key_count(&page), 2);
        assert_eq!(internal_child(&page, kw, 0), 11);
        assert_eq!(internal_child(&page, kw, 1), 22);
        assert_eq!(node_next(&page), 99);
    }
}
