//! page/slotted — страница документов со слотовым каталогом.
//!
//! Раскладка:
//! - Заголовок 16 B (см. consts.rs), slot-каталог растёт вверх от заголовка,
//!   payload'ы пакуются вниз от конца страницы.
//! - free_space_offset — конец slot-каталога; free_space_end — начало
//!   упакованной области. Оба хранятся как u16 по модулю 65536.
//!
//! Инварианты:
//! - free_space_offset <= free_space_end;
//! - contiguous_free = free_space_end - free_space_offset;
//! - logical_free = contiguous_free + мёртвые байты payload-области
//!   (tombstone'ы и хвосты после укорачивающего update_in_place);
//! - индексы слотов стабильны: compaction не перенумеровывает слоты,
//!   tombstone'ы остаются на месте.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    SE_OFF_FIRST_OVF, SE_OFF_LENGTH, SE_OFF_OFFSET, SE_OFF_PAGE_COUNT, SE_OFF_TOTAL,
    SLOT_ENTRY_SIZE, SLOT_HDR_SIZE, SP_OFF_CHECKSUM, SP_OFF_FREE_END, SP_OFF_FREE_START,
    SP_OFF_NEXT_PAGE, SP_OFF_SLOT_COUNT, SP_OFF_TYPE,
};
use crate::errors::{GaldrError, Result};

#[derive(Debug, Clone)]
pub struct SlottedHeader {
    pub page_type: u8,
    pub slot_count: u16,
    pub free_space_offset: u32,
    pub free_space_end: u32,
    pub next_page_id: u32,
    pub checksum: u32,
}

/// Слот каталога. page_count считает домашнюю страницу плюс overflow:
/// length>0/page_count=1 — документ в странице; length=0/page_count>1 —
/// документ в overflow-цепочке; length=0/page_count=0 — tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    pub offset: u32,
    pub length: u32,
    pub total_size: u32,
    pub page_count: u16,
    pub first_overflow: u32,
}

impl SlotEntry {
    pub fn is_tombstone(&self) -> bool {
        self.length == 0 && self.page_count == 0
    }

    pub fn has_overflow(&self) -> bool {
        self.page_count > 1
    }

    /// Число overflow-страниц цепочки.
    pub fn overflow_pages(&self) -> u32 {
        self.page_count.saturating_sub(1) as u32
    }
}

/// Живой слот вместе с его внутристраничными байтами.
pub struct SlotView<'a> {
    pub entry: SlotEntry,
    pub in_page: &'a [u8],
}

// free_space_end == 0 означает page_size (64 KiB-страницы).
#[inline]
fn load_pos(raw: u16, page_size: usize) -> u32 {
    if raw == 0 && page_size == 65536 {
        65536
    } else {
        raw as u32
    }
}

#[inline]
fn store_pos(pos: u32) -> u16 {
    (pos % 65536) as u16
}

/// Инициализировать пустую slotted-страницу заданного типа.
pub fn slotted_init(page: &mut [u8], page_type: u8) {
    let page_len = page.len();
    page.fill(0);
    page[SP_OFF_TYPE] = page_type;
    LittleEndian::write_u16(&mut page[SP_OFF_SLOT_COUNT..], 0);
    LittleEndian::write_u16(&mut page[SP_OFF_FREE_START..], SLOT_HDR_SIZE as u16);
    LittleEndian::write_u16(&mut page[SP_OFF_FREE_END..], store_pos(page_len as u32));
}

pub fn slotted_header_read(page: &[u8]) -> Result<SlottedHeader> {
    if page.len() < SLOT_HDR_SIZE {
        return Err(GaldrError::corruption("page too small for slotted header"));
    }
    let ps = page.len();
    let h = SlottedHeader {
        page_type: page[SP_OFF_TYPE],
        slot_count: LittleEndian::read_u16(&page[SP_OFF_SLOT_COUNT..]),
        free_space_offset: LittleEndian::read_u16(&page[SP_OFF_FREE_START..]) as u32,
        free_space_end: load_pos(LittleEndian::read_u16(&page[SP_OFF_FREE_END..]), ps),
        next_page_id: LittleEndian::read_u32(&page[SP_OFF_NEXT_PAGE..]),
        checksum: LittleEndian::read_u32(&page[SP_OFF_CHECKSUM..]),
    };
    if h.free_space_offset > h.free_space_end || h.free_space_end as usize > ps {
        return Err(GaldrError::corruption(format!(
            "slotted header out of bounds (free_start={}, free_end={}, ps={})",
            h.free_space_offset, h.free_space_end, ps
        )));
    }
    if SLOT_HDR_SIZE + h.slot_count as usize * SLOT_ENTRY_SIZE != h.free_space_offset as usize {
        return Err(GaldrError::corruption(format!(
            "slot directory size mismatch (slots={}, free_start={})",
            h.slot_count, h.free_space_offset
        )));
    }
    Ok(h)
}

pub fn slotted_header_write(page: &mut [u8], h: &SlottedHeader) {
    page[SP_OFF_TYPE] = h.page_type;
    LittleEndian::write_u16(&mut page[SP_OFF_SLOT_COUNT..], h.slot_count);
    LittleEndian::write_u16(&mut page[SP_OFF_FREE_START..], store_pos(h.free_space_offset));
    LittleEndian::write_u16(&mut page[SP_OFF_FREE_END..], store_pos(h.free_space_end));
    LittleEndian::write_u32(&mut page[SP_OFF_NEXT_PAGE..], h.next_page_id);
    LittleEndian::write_u32(&mut page[SP_OFF_CHECKSUM..], h.checksum);
}

/// Ссылка на следующую страницу ростера коллекции.
pub fn slotted_next_page(page: &[u8]) -> u32 {
    LittleEndian::read_u32(&page[SP_OFF_NEXT_PAGE..])
}

pub fn slotted_set_next_page(page: &mut [u8], next: u32) {
    LittleEndian::write_u32(&mut page[SP_OFF_NEXT_PAGE..], next);
}

#[inline]
fn slot_base(idx: u16) -> usize {
    SLOT_HDR_SIZE + idx as usize * SLOT_ENTRY_SIZE
}

fn slot_read_raw(page: &[u8], idx: u16) -> SlotEntry {
    let b = slot_base(idx);
    SlotEntry {
        offset: LittleEndian::read_u16(&page[b + SE_OFF_OFFSET..]) as u32,
        length: LittleEndian::read_u16(&page[b + SE_OFF_LENGTH..]) as u32,
        total_size: LittleEndian::read_u32(&page[b + SE_OFF_TOTAL..]),
        page_count: LittleEndian::read_u16(&page[b + SE_OFF_PAGE_COUNT..]),
        first_overflow: LittleEndian::read_u32(&page[b + SE_OFF_FIRST_OVF..]),
    }
}

fn slot_write_raw(page: &mut [u8], idx: u16, e: &SlotEntry) {
    let b = slot_base(idx);
    LittleEndian::write_u16(&mut page[b + SE_OFF_OFFSET..], store_pos(e.offset));
    LittleEndian::write_u16(&mut page[b + SE_OFF_LENGTH..], e.length as u16);
    LittleEndian::write_u32(&mut page[b + SE_OFF_TOTAL..], e.total_size);
    LittleEndian::write_u16(&mut page[b + SE_OFF_PAGE_COUNT..], e.page_count);
    LittleEndian::write_u32(&mut page[b + SE_OFF_FIRST_OVF..], e.first_overflow);
    LittleEndian::write_u16(&mut page[b + SE_OFF_FIRST_OVF + 4..], 0); // reserved
}

/// Добавить документ. Возвращает индекс нового слота или None, если
/// непрерывного свободного места не хватает (слот + внутристраничная часть).
pub fn slotted_add(
    page: &mut [u8],
    payload: &[u8],
    first_overflow: u32,
    page_count: u16,
    total_size: u32,
) -> Result<Option<u16>> {
    let h = slotted_header_read(page)?;
    let needed = SLOT_ENTRY_SIZE + payload.len();
    let contiguous = (h.free_space_end - h.free_space_offset) as usize;
    if needed > contiguous || h.slot_count == u16::MAX {
        return Ok(None);
    }

    let new_end = h.free_space_end - payload.len() as u32;
    let offset = if payload.is_empty() { 0 } else { new_end };
    if !payload.is_empty() {
        page[new_end as usize..new_end as usize + payload.len()].copy_from_slice(payload);
    }

    let idx = h.slot_count;
    slot_write_raw(
        page,
        idx,
        &SlotEntry {
            offset,
            length: payload.len() as u32,
            total_size,
            page_count,
            first_overflow,
        },
    );

    let mut h2 = h;
    h2.slot_count += 1;
    h2.free_space_offset += SLOT_ENTRY_SIZE as u32;
    h2.free_space_end = new_end;
    slotted_header_write(page, &h2);
    Ok(Some(idx))
}

/// Прочитать живой слот; None для tombstone и выхода за диапазон.
pub fn slotted_get(page: &[u8], idx: u16) -> Result<Option<SlotView<'_>>> {
    let h = slotted_header_read(page)?;
    if idx >= h.slot_count {
        return Ok(None);
    }
    let e = slot_read_raw(page, idx);
    if e.is_tombstone() {
        return Ok(None);
    }
    let start = e.offset as usize;
    let end = start + e.length as usize;
    if e.length > 0 && (start < h.free_space_end as usize || end > page.len()) {
        return Err(GaldrError::corruption(format!(
            "slot {} payload out of bounds ({}..{})",
            idx, start, end
        )));
    }
    Ok(Some(SlotView {
        entry: e,
        in_page: &page[start..end],
    }))
}

/// Переписать payload на месте; новая длина не больше прежней. Короткая
/// запись оставляет внутреннюю фрагментацию до ближайшего compaction.
pub fn slotted_update_in_place(page: &mut [u8], idx: u16, payload: &[u8]) -> Result<()> {
    let h = slotted_header_read(page)?;
    if idx >= h.slot_count {
        return Err(GaldrError::invalid_arg(format!("slot {} out of range", idx)));
    }
    let mut e = slot_read_raw(page, idx);
    if e.is_tombstone() {
        return Err(GaldrError::invalid_op(format!("slot {} is a tombstone", idx)));
    }
    if e.has_overflow() {
        return Err(GaldrError::invalid_op(format!(
            "slot {} has an overflow chain, update_in_place is page-local",
            idx
        )));
    }
    if payload.len() as u32 > e.length {
        return Err(GaldrError::invalid_arg(format!(
            "update_in_place payload {} > slot length {}",
            payload.len(),
            e.length
        )));
    }
    let start = e.offset as usize;
    page[start..start + payload.len()].copy_from_slice(payload);
    e.length = payload.len() as u32;
    e.total_size = payload.len() as u32;
    slot_write_raw(page, idx, &e);
    Ok(())
}

/// Превратить слот в tombstone; байты данных остаются до compaction.
/// Возвращает прежний слот, чтобы вызывающий освободил overflow-цепочку.
pub fn slotted_delete(page: &mut [u8], idx: u16) -> Result<SlotEntry> {
    let h = slotted_header_read(page)?;
    if idx >= h.slot_count {
        return Err(GaldrError::invalid_arg(format!("slot {} out of range", idx)));
    }
    let e = slot_read_raw(page, idx);
    if e.is_tombstone() {
        return Err(GaldrError::invalid_op(format!("slot {} already deleted", idx)));
    }
    slot_write_raw(
        page,
        idx,
        &SlotEntry {
            offset: 0,
            length: 0,
            total_size: 0,
            page_count: 0,
            first_overflow: 0,
        },
    );
    Ok(e)
}

/// Непрерывное свободное место между каталогом и payload-областью.
pub fn slotted_contiguous_free(page: &[u8]) -> Result<usize> {
    let h = slotted_header_read(page)?;
    Ok((h.free_space_end - h.free_space_offset) as usize)
}

/// Логическое свободное место: непрерывное + мёртвые байты payload-области.
pub fn slotted_logical_free(page: &[u8]) -> Result<usize> {
    let h = slotted_header_read(page)?;
    let mut live = 0usize;
    for idx in 0..h.slot_count {
        let e = slot_read_raw(page, idx);
        if !e.is_tombstone() {
            live += e.length as usize;
        }
    }
    let payload_region = page.len() - h.free_space_end as usize;
    let contiguous = (h.free_space_end - h.free_space_offset) as usize;
    Ok(contiguous + (payload_region - live))
}

/// true, если compaction вернёт не меньше min_gain байт.
pub fn slotted_needs_compaction(page: &[u8], min_gain: usize) -> Result<bool> {
    let logical = slotted_logical_free(page)?;
    let contiguous = slotted_contiguous_free(page)?;
    Ok(logical - contiguous >= min_gain)
}

/// Переупаковать payload-область снизу вверх в порядке индексов слотов,
/// пропуская tombstone'ы. Индексы слотов и байты живых слотов сохраняются;
/// free_space_offset не меняется, free_space_end поднимается. Идемпотентно.
pub fn slotted_compact(page: &mut [u8]) -> Result<()> {
    let h = slotted_header_read(page)?;
    let ps = page.len() as u32;

    // Собираем живые payload'ы заранее: переупаковка на месте могла бы
    // затереть ещё не перенесённые байты.
    let mut moved: Vec<(u16, SlotEntry, Vec<u8>)> = Vec::new();
    for idx in 0..h.slot_count {
        let e = slot_read_raw(page, idx);
        if e.is_tombstone() || e.length == 0 {
            continue;
        }
        let start = e.offset as usize;
        moved.push((idx, e, page[start..start + e.length as usize].to_vec()));
    }

    let mut cursor = ps;
    for (idx, mut e, bytes) in moved {
        cursor -= e.length;
        page[cursor as usize..cursor as usize + bytes.len()].copy_from_slice(&bytes);
        e.offset = cursor;
        slot_write_raw(page, idx, &e);
    }

    let mut h2 = h;
    h2.free_space_end = cursor;
    slotted_header_write(page, &h2);
    crate::metrics::record_page_compaction();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{COMPACTION_MIN_GAIN, PAGE_TYPE_DOCUMENT};

    fn new_page(ps: usize) -> Vec<u8> {
        let mut p = vec![0u8; ps];
        slotted_init(&mut p, PAGE_TYPE_DOCUMENT);
        p
    }

    fn add(page: &mut [u8], payload: &[u8]) -> u16 {
        slotted_add(page, payload, 0, 1, payload.len() as u32)
            .unwrap()
            .expect("page must have room")
    }

    #[test]
    fn add_get_roundtrip() {
        let mut p = new_page(4096);
        let a = add(&mut p, b"alpha");
        let b = add(&mut p, b"bravo-bravo");
        assert_eq!(a, 0);
        assert_eq!(b, 1);

        let va = slotted_get(&p, a).unwrap().unwrap();
        assert_eq!(va.in_page, b"alpha");
        let vb = slotted_get(&p, b).unwrap().unwrap();
        assert_eq!(vb.in_page, b"bravo-bravo");
        assert!(slotted_get(&p, 5).unwrap().is_none());
    }

    #[test]
    fn delete_marks_tombstone_and_keeps_indices() {
        let mut p = new_page(4096);
        let a = add(&mut p, b"first");
        let b = add(&mut p, b"second");
        let c = add(&mut p, b"third");

        slotted_delete(&mut p, b).unwrap();
        assert!(slotted_get(&p, b).unwrap().is_none());
        assert_eq!(slotted_get(&p, a).unwrap().unwrap().in_page, b"first");
        assert_eq!(slotted_get(&p, c).unwrap().unwrap().in_page, b"third");

        // Повторное удаление — ошибка использования.
        assert!(slotted_delete(&mut p, b).is_err());
    }

    #[test]
    fn free_space_accounting() {
        // contiguous + мёртвые байты == logical, всегда.
        let mut p = new_page(4096);
        let base_contig = slotted_contiguous_free(&p).unwrap();
        assert_eq!(base_contig, 4096 - SLOT_HDR_SIZE);
        assert_eq!(slotted_logical_free(&p).unwrap(), base_contig);

        let a = add(&mut p, &[7u8; 100]);
        let _b = add(&mut p, &[8u8; 200]);
        let contig = slotted_contiguous_free(&p).unwrap();
        assert_eq!(contig, 4096 - SLOT_HDR_SIZE - 2 * SLOT_ENTRY_SIZE - 300);
        assert_eq!(slotted_logical_free(&p).unwrap(), contig);

        slotted_delete(&mut p, a).unwrap();
        assert_eq!(slotted_contiguous_free(&p).unwrap(), contig);
        assert_eq!(slotted_logical_free(&p).unwrap(), contig + 100);
    }

    #[test]
    fn update_in_place_shrink_leaves_fragmentation() {
        let mut p = new_page(4096);
        let a = add(&mut p, &[9u8; 120]);
        slotted_update_in_place(&mut p, a, &[1u8; 50]).unwrap();

        let v = slotted_get(&p, a).unwrap().unwrap();
        assert_eq!(v.in_page, &[1u8; 50][..]);
        // 70 байт фрагментации до compaction.
        let contig = slotted_contiguous_free(&p).unwrap();
        assert_eq!(slotted_logical_free(&p).unwrap(), contig + 70);

        // Рост на месте запрещён.
        assert!(slotted_update_in_place(&mut p, a, &[2u8; 60]).is_err());
    }

    #[test]
    fn compaction_preserves_live_slots() {
        // Compaction сохраняет байты живых слотов и их индексы.
        let mut p = new_page(4096);
        let a = add(&mut p, &[1u8; 300]);
        let b = add(&mut p, &[2u8; 400]);
        let c = add(&mut p, &[3u8; 500]);
        slotted_delete(&mut p, b).unwrap();

        assert!(slotted_needs_compaction(&p, COMPACTION_MIN_GAIN).unwrap());
        slotted_compact(&mut p).unwrap();

        assert_eq!(slotted_get(&p, a).unwrap().unwrap().in_page, &[1u8; 300][..]);
        assert!(slotted_get(&p, b).unwrap().is_none());
        assert_eq!(slotted_get(&p, c).unwrap().unwrap().in_page, &[3u8; 500][..]);

        // Мёртвое место вернулось в contiguous.
        let contig = slotted_contiguous_free(&p).unwrap();
        assert_eq!(slotted_logical_free(&p).unwrap(), contig);
        assert!(!slotted_needs_compaction(&p, 1).unwrap());

        // Повторный compaction — no-op.
        let before = p.clone();
        slotted_compact(&mut p).unwrap();
        assert_eq!(p, before);
    }

    #[test]
    fn add_returns_none_when_full() {
        let mut p = new_page(4096);
        let big = vec![5u8; 2000];
        assert!(slotted_add(&mut p, &big, 0, 1, 2000).unwrap().is_some());
        assert!(slotted_add(&mut p, &big, 0, 1, 2000).unwrap().is_some());
        // Третий не помещается.
        assert!(slotted_add(&mut p, &big, 0, 1, 2000).unwrap().is_none());
    }

    #[test]
    fn spilled_slot_has_no_in_page_bytes() {
        let mut p = new_page(4096);
        let idx = slotted_add(&mut p, &[], 17, 4, 9000).unwrap().unwrap();
        let v = slotted_get(&p, idx).unwrap().unwrap();
        assert!(v.in_page.is_empty());
        assert!(v.entry.has_overflow());
        assert_eq!(v.entry.first_overflow, 17);
        assert_eq!(v.entry.overflow_pages(), 3);
        assert_eq!(v.entry.total_size, 9000);
    }

    #[test]
    fn page_64k_end_wraps() {
        let mut p = new_page(65536);
        let h = slotted_header_read(&p).unwrap();
        assert_eq!(h.free_space_end, 65536);
        let a = add(&mut p, b"tail");
        let v = slotted_get(&p, a).unwrap().unwrap();
        assert_eq!(v.in_page, b"tail");
        assert_eq!(v.entry.offset, 65536 - 4);
    }
}
