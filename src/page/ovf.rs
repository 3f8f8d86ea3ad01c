//! page/ovf — overflow-страницы для payload'ов крупнее slot-бюджета.
//!
//! Формат: [page_type u8][reserved u8][chunk_len u16][reserved u32], далее
//! chunk. Цепочка занимает последовательные page_id (слот хранит
//! first_overflow и page_count), поэтому next-ссылки нет.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{OVF_HDR_SIZE, OVF_OFF_CHUNK_LEN, PAGE_TYPE_OVERFLOW};
use crate::errors::{GaldrError, Result};

/// Байт полезной нагрузки на одну overflow-страницу.
pub fn ovf_chunk_capacity(page_size: u32) -> usize {
    page_size as usize - OVF_HDR_SIZE
}

/// Сколько overflow-страниц нужно под payload длиной len.
pub fn ovf_pages_needed(len: usize, page_size: u32) -> u32 {
    len.div_ceil(ovf_chunk_capacity(page_size)) as u32
}

/// Записать chunk в образ overflow-страницы.
pub fn ovf_chunk_write(page: &mut [u8], chunk: &[u8]) -> Result<()> {
    if chunk.len() > ovf_chunk_capacity(page.len() as u32) {
        return Err(GaldrError::invalid_arg(format!(
            "overflow chunk {} exceeds capacity {}",
            chunk.len(),
            ovf_chunk_capacity(page.len() as u32)
        )));
    }
    page.fill(0);
    page[0] = PAGE_TYPE_OVERFLOW;
    LittleEndian::write_u16(&mut page[OVF_OFF_CHUNK_LEN..], chunk.len() as u16);
    page[OVF_HDR_SIZE..OVF_HDR_SIZE + chunk.len()].copy_from_slice(chunk);
    Ok(())
}

/// Прочитать chunk из образа overflow-страницы.
pub fn ovf_chunk_read(page: &[u8], page_id: u32) -> Result<&[u8]> {
    if page[0] != PAGE_TYPE_OVERFLOW {
        return Err(GaldrError::corruption(format!(
            "page {} is not an overflow page (type {})",
            page_id, page[0]
        )));
    }
    let len = LittleEndian::read_u16(&page[OVF_OFF_CHUNK_LEN..]) as usize;
    if OVF_HDR_SIZE + len > page.len() {
        return Err(GaldrError::corruption(format!(
            "overflow chunk_len {} too big on page {}",
            len, page_id
        )));
    }
    Ok(&page[OVF_HDR_SIZE..OVF_HDR_SIZE + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_roundtrip() {
        let mut page = vec![0u8; 4096];
        let chunk = vec![0xCD; 1000];
        ovf_chunk_write(&mut page, &chunk).unwrap();
        assert_eq!(ovf_chunk_read(&page, 9).unwrap(), chunk.as_slice());
    }

    #[test]
    fn pages_needed() {
        let cap = ovf_chunk_capacity(4096);
        assert_eq!(ovf_pages_needed(1, 4096), 1);
        assert_eq!(ovf_pages_needed(cap, 4096), 1);
        assert_eq!(ovf_pages_needed(cap + 1, 4096), 2);
        assert_eq!(ovf_pages_needed(3 * cap, 4096), 3);
    }

    #[test]
    fn wrong_type_is_corruption() {
        let page = vec![0u8; 4096];
        assert!(ovf_chunk_read(&page, 1).unwrap_err().is_corruption());
    }
}
