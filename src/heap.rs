//! heap — хранение payload'ов документов в цепочках slotted-страниц.
//!
//! Ростер коллекции — односвязная цепочка страниц документов через
//! next-поле заголовка slotted-страницы. Каждый payload хранится с
//! конвертом [doc_id u64 LE]: vacuum и сканы получают doc_id без внешней
//! десериализации.
//!
//! Payload крупнее постраничного бюджета уходит целиком в overflow-цепочку
//! из последовательных страниц; слот держит first_overflow и page_count.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    DOC_ENVELOPE_SIZE, NO_PAGE, PAGE_TYPE_DOCUMENT, SLOT_ENTRY_SIZE, SLOT_HDR_SIZE,
};
use crate::errors::{GaldrError, Result};
use crate::page::{
    ovf_chunk_capacity, ovf_chunk_read, ovf_chunk_write, ovf_pages_needed, slotted_add,
    slotted_delete, slotted_get, slotted_init, slotted_next_page, slotted_set_next_page,
    SlotEntry,
};
use crate::pager::PageAccess;
use crate::version::DocumentLocation;

/// Постраничный бюджет слота: payload не крупнее четверти полезного места
/// страницы хранится в самой странице.
pub fn in_page_budget(page_size: u32) -> usize {
    (page_size as usize - SLOT_HDR_SIZE - SLOT_ENTRY_SIZE) / 4
}

/// Новая цепочка из одной пустой страницы документов.
pub fn heap_new_chain(access: &mut dyn PageAccess) -> Result<u32> {
    let pid = access.allocate()?;
    let mut page = vec![0u8; access.page_size() as usize];
    slotted_init(&mut page, PAGE_TYPE_DOCUMENT);
    access.write(pid, &page)?;
    Ok(pid)
}

fn envelope(doc_id: u64, payload: &[u8]) -> Vec<u8> {
    let mut full = Vec::with_capacity(DOC_ENVELOPE_SIZE + payload.len());
    let mut id8 = [0u8; 8];
    LittleEndian::write_u64(&mut id8, doc_id);
    full.extend_from_slice(&id8);
    full.extend_from_slice(payload);
    full
}

/// Вставить документ в цепочку; возвращает положение нового слота.
pub fn heap_insert(
    access: &mut dyn PageAccess,
    first_page: u32,
    doc_id: u64,
    payload: &[u8],
) -> Result<DocumentLocation> {
    let ps = access.page_size();
    let full = envelope(doc_id, payload);

    let (in_page, first_ovf, page_count, total): (Vec<u8>, u32, u16, u32) =
        if full.len() <= in_page_budget(ps) {
            (full, 0, 1, 0)
        } else {
            // Целиком в overflow: последовательные страницы.
            let n = ovf_pages_needed(full.len(), ps);
            let start = access.allocate_consecutive(n)?;
            let cap = ovf_chunk_capacity(ps);
            for (i, chunk) in full.chunks(cap).enumerate() {
                let mut page = vec![0u8; ps as usize];
                ovf_chunk_write(&mut page, chunk)?;
                access.write(start + i as u32, &page)?;
            }
            (Vec::new(), start, 1 + n as u16, full.len() as u32)
        };
    let total_size = if total == 0 { in_page.len() as u32 } else { total };

    // Ищем страницу с местом, идя по цепочке; при нужде наращиваем хвост.
    let mut pid = first_page;
    loop {
        let mut page = access.read(pid)?;
        if page[0] != PAGE_TYPE_DOCUMENT {
            return Err(GaldrError::corruption(format!(
                "roster page {} is not a document page (type {})",
                pid, page[0]
            )));
        }
        if let Some(slot) = slotted_add(&mut page, &in_page, first_ovf, page_count, total_size)? {
            access.write(pid, &page)?;
            return Ok(DocumentLocation { page_id: pid, slot });
        }
        let next = slotted_next_page(&page);
        if next != NO_PAGE {
            pid = next;
            continue;
        }
        // Хвост: новая страница.
        let new_pid = access.allocate()?;
        let mut fresh = vec![0u8; ps as usize];
        slotted_init(&mut fresh, PAGE_TYPE_DOCUMENT);
        access.write(new_pid, &fresh)?;
        slotted_set_next_page(&mut page, new_pid);
        access.write(pid, &page)?;
        pid = new_pid;
    }
}

/// Прочитать документ по положению: (doc_id, payload без конверта).
pub fn heap_read(access: &mut dyn PageAccess, loc: DocumentLocation) -> Result<(u64, Vec<u8>)> {
    let page = access.read(loc.page_id)?;
    let view = slotted_get(&page, loc.slot)?.ok_or_else(|| {
        GaldrError::not_found(format!(
            "no document at page {} slot {}",
            loc.page_id, loc.slot
        ))
    })?;

    let full: Vec<u8> = if view.entry.has_overflow() {
        let mut out = Vec::with_capacity(view.entry.total_size as usize);
        let n = view.entry.overflow_pages();
        let first = view.entry.first_overflow;
        // Копия метаданных слота: дальше page будет перечитан.
        let total = view.entry.total_size as usize;
        for i in 0..n {
            let ovf = access.read(first + i)?;
            out.extend_from_slice(ovf_chunk_read(&ovf, first + i)?);
        }
        if out.len() != total {
            return Err(GaldrError::corruption(format!(
                "overflow length mismatch at page {} slot {}: got {}, expected {}",
                loc.page_id,
                loc.slot,
                out.len(),
                total
            )));
        }
        out
    } else {
        view.in_page.to_vec()
    };

    if full.len() < DOC_ENVELOPE_SIZE {
        return Err(GaldrError::corruption(format!(
            "document at page {} slot {} shorter than its envelope",
            loc.page_id, loc.slot
        )));
    }
    let doc_id = LittleEndian::read_u64(&full[..8]);
    Ok((doc_id, full[DOC_ENVELOPE_SIZE..].to_vec()))
}

/// Затомбстонить слот; возвращает прежний слот (для освобождения overflow).
pub fn heap_delete(access: &mut dyn PageAccess, loc: DocumentLocation) -> Result<SlotEntry> {
    let mut page = access.read(loc.page_id)?;
    let entry = slotted_delete(&mut page, loc.slot)?;
    access.write(loc.page_id, &page)?;
    Ok(entry)
}

/// Обход всех живых документов цепочки в порядке вставки.
/// Колбэк возвращает false для досрочной остановки.
pub fn heap_iter(
    access: &mut dyn PageAccess,
    first_page: u32,
    f: &mut dyn FnMut(DocumentLocation, u64, Vec<u8>) -> Result<bool>,
) -> Result<()> {
    let mut pid = first_page;
    while pid != NO_PAGE {
        let page = access.read(pid)?;
        let h = crate::page::slotted_header_read(&page)?;
        for slot in 0..h.slot_count {
            if slotted_get(&page, slot)?.is_none() {
                continue;
            }
            let loc = DocumentLocation { page_id: pid, slot };
            let (doc_id, payload) = heap_read(access, loc)?;
            if !f(loc, doc_id, payload)? {
                return Ok(());
            }
        }
        pid = slotted_next_page(&page);
    }
    Ok(())
}

/// Все страницы цепочки (для drop/vacuum/doctor).
pub fn heap_pages(access: &mut dyn PageAccess, first_page: u32) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    let mut pid = first_page;
    while pid != NO_PAGE {
        out.push(pid);
        let page = access.read(pid)?;
        pid = slotted_next_page(&page);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use crate::io::{MemIo, PageIo};

    struct RawPages {
        io: MemIo,
        next: u32,
    }

    impl RawPages {
        fn new(ps: u32) -> Self {
            Self {
                io: MemIo::new(ps),
                next: 1,
            }
        }
    }

    impl PageAccess for RawPages {
        fn page_size(&self) -> u32 {
            self.io.page_size()
        }
        fn read(&mut self, page_id: u32) -> Result<Vec<u8>> {
            let mut buf = vec![0u8; self.page_size() as usize];
            self.io.read_page(page_id, &mut buf)?;
            Ok(buf)
        }
        fn write(&mut self, page_id: u32, page: &[u8]) -> Result<()> {
            self.io.write_page(page_id, page)
        }
        fn allocate(&mut self) -> Result<u32> {
            let pid = self.next;
            self.next += 1;
            Ok(pid)
        }
        fn allocate_consecutive(&mut self, count: u32) -> Result<u32> {
            let pid = self.next;
            self.next += count;
            Ok(pid)
        }
    }

    #[test]
    fn insert_read_roundtrip_in_page() {
        let mut pages = RawPages::new(4096);
        let first = heap_new_chain(&mut pages).unwrap();
        let loc = heap_insert(&mut pages, first, 7, b"hello doc").unwrap();
        let (id, payload) = heap_read(&mut pages, loc).unwrap();
        assert_eq!(id, 7);
        assert_eq!(payload, b"hello doc");
    }

    #[test]
    fn big_payload_spills_to_consecutive_overflow() {
        let mut pages = RawPages::new(4096);
        let first = heap_new_chain(&mut pages).unwrap();
        let big = vec![0xEE; 10_000];
        let loc = heap_insert(&mut pages, first, 9, &big).unwrap();

        let page = pages.read(loc.page_id).unwrap();
        let view = slotted_get(&page, loc.slot).unwrap().unwrap();
        assert!(view.entry.has_overflow());
        assert!(view.in_page.is_empty());

        let (id, payload) = heap_read(&mut pages, loc).unwrap();
        assert_eq!(id, 9);
        assert_eq!(payload, big);
    }

    #[test]
    fn chain_grows_and_iterates_in_insert_order() {
        let mut pages = RawPages::new(4096);
        let first = heap_new_chain(&mut pages).unwrap();
        let payload = vec![5u8; 700]; // ~5 на страницу при 4 KiB
        let mut locs = Vec::new();
        for id in 0..20u64 {
            locs.push(heap_insert(&mut pages, first, id, &payload).unwrap());
        }
        assert!(heap_pages(&mut pages, first).unwrap().len() > 1);

        let mut seen = Vec::new();
        heap_iter(&mut pages, first, &mut |loc, id, p| {
            assert_eq!(p.len(), 700);
            assert_eq!(loc, locs[id as usize]);
            seen.push(id);
            Ok(true)
        })
        .unwrap();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn delete_tombstones_slot() {
        let mut pages = RawPages::new(4096);
        let first = heap_new_chain(&mut pages).unwrap();
        let a = heap_insert(&mut pages, first, 1, b"one").unwrap();
        let b = heap_insert(&mut pages, first, 2, b"two").unwrap();
        heap_delete(&mut pages, a).unwrap();

        assert!(heap_read(&mut pages, a).is_err());
        let (id, _) = heap_read(&mut pages, b).unwrap();
        assert_eq!(id, 2);

        let mut seen = Vec::new();
        heap_iter(&mut pages, first, &mut |_l, id, _p| {
            seen.push(id);
            Ok(true)
        })
        .unwrap();
        assert_eq!(seen, vec![2]);
    }
}
