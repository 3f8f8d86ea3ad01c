// src/header.rs — заголовочная страница (страница 0).
//
// Формат (LE):
// 0x00  u32  magic = "GDB1"
// 0x04  u16  format_version = 1
// 0x06  u16  page_size        (по модулю 65536: 0 означает 65536)
// 0x08  u32  catalog_root_page_id
// 0x0C  u32  free_list_head_page_id
// 0x10  u64  next_tx_id
// 0x18  u32  next_page_id
// 0x1C  u64  flags (bit0 = wal_enabled)
// ...   остаток — нули
//
// Политика:
// - Счётчики (next_tx_id/next_page_id) сбрасываются на диск каждые
//   HEADER_PERSIST_INTERVAL коммитов и на checkpoint/close; после сбоя WAL
//   replay поднимает их по максимуму из применённых записей.
// - validate_page_size: 4096..=65536, степень двойки.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    DB_MAGIC, FLAG_WAL_ENABLED, FORMAT_VERSION, HDR_OFF_CATALOG_ROOT, HDR_OFF_FLAGS,
    HDR_OFF_FREE_HEAD, HDR_OFF_MAGIC, HDR_OFF_NEXT_PAGE_ID, HDR_OFF_NEXT_TX_ID,
    HDR_OFF_PAGE_SIZE, HDR_OFF_VERSION, MAX_PAGE_SIZE, MIN_PAGE_SIZE, NO_PAGE,
};
use crate::errors::{GaldrError, Result};

#[derive(Debug, Clone)]
pub struct HeaderState {
    pub version: u16, // == 1
    pub page_size: u32,
    pub catalog_root_page_id: u32,
    pub free_list_head_page_id: u32,
    pub next_tx_id: u64,
    pub next_page_id: u32,
    pub flags: u64,
}

impl HeaderState {
    /// Заголовок свежесозданной базы: страница 0 занята, каталога ещё нет.
    pub fn new(page_size: u32, wal_enabled: bool) -> Self {
        Self {
            version: FORMAT_VERSION,
            page_size,
            catalog_root_page_id: NO_PAGE,
            free_list_head_page_id: NO_PAGE,
            next_tx_id: crate::consts::FIRST_TX_ID,
            next_page_id: 1,
            flags: if wal_enabled { FLAG_WAL_ENABLED } else { 0 },
        }
    }

    pub fn wal_enabled(&self) -> bool {
        self.flags & FLAG_WAL_ENABLED != 0
    }
}

/// Проверка корректности размера страницы (2^n, 4 KiB..=64 KiB).
pub fn validate_page_size(page_size: u32) -> Result<()> {
    if page_size < MIN_PAGE_SIZE
        || page_size > MAX_PAGE_SIZE
        || (page_size & (page_size - 1)) != 0
    {
        return Err(GaldrError::invalid_arg(format!(
            "page_size must be a power of two in [{} .. {}], got {}",
            MIN_PAGE_SIZE, MAX_PAGE_SIZE, page_size
        )));
    }
    Ok(())
}

/// Сериализовать заголовок в образ страницы 0 (buf.len() == page_size).
pub fn header_write(buf: &mut [u8], h: &HeaderState) {
    buf.fill(0);
    buf[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 4].copy_from_slice(DB_MAGIC);
    LittleEndian::write_u16(&mut buf[HDR_OFF_VERSION..], h.version);
    // 65536 не помещается в u16 и хранится как 0.
    LittleEndian::write_u16(&mut buf[HDR_OFF_PAGE_SIZE..], (h.page_size % 65536) as u16);
    LittleEndian::write_u32(&mut buf[HDR_OFF_CATALOG_ROOT..], h.catalog_root_page_id);
    LittleEndian::write_u32(&mut buf[HDR_OFF_FREE_HEAD..], h.free_list_head_page_id);
    LittleEndian::write_u64(&mut buf[HDR_OFF_NEXT_TX_ID..], h.next_tx_id);
    LittleEndian::write_u32(&mut buf[HDR_OFF_NEXT_PAGE_ID..], h.next_page_id);
    LittleEndian::write_u64(&mut buf[HDR_OFF_FLAGS..], h.flags);
}

/// Прочитать и валидировать заголовок из образа страницы 0.
pub fn header_read(buf: &[u8]) -> Result<HeaderState> {
    if buf.len() < 0x24 {
        return Err(GaldrError::corruption("header page truncated"));
    }
    if &buf[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 4] != DB_MAGIC {
        return Err(GaldrError::corruption(format!(
            "bad db magic (expected {:?}, got {:?})",
            DB_MAGIC,
            &buf[..4]
        )));
    }
    let version = LittleEndian::read_u16(&buf[HDR_OFF_VERSION..]);
    if version != FORMAT_VERSION {
        return Err(GaldrError::corruption(format!(
            "unsupported format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    let raw_ps = LittleEndian::read_u16(&buf[HDR_OFF_PAGE_SIZE..]);
    let page_size = if raw_ps == 0 { 65536 } else { raw_ps as u32 };
    validate_page_size(page_size)
        .map_err(|_| GaldrError::corruption(format!("bad page_size {} in header", page_size)))?;

    Ok(HeaderState {
        version,
        page_size,
        catalog_root_page_id: LittleEndian::read_u32(&buf[HDR_OFF_CATALOG_ROOT..]),
        free_list_head_page_id: LittleEndian::read_u32(&buf[HDR_OFF_FREE_HEAD..]),
        next_tx_id: LittleEndian::read_u64(&buf[HDR_OFF_NEXT_TX_ID..]),
        next_page_id: LittleEndian::read_u32(&buf[HDR_OFF_NEXT_PAGE_ID..]),
        flags: LittleEndian::read_u64(&buf[HDR_OFF_FLAGS..]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut h = HeaderState::new(4096, true);
        h.catalog_root_page_id = 12;
        h.free_list_head_page_id = 34;
        h.next_tx_id = 567;
        h.next_page_id = 89;

        let mut buf = vec![0u8; 4096];
        header_write(&mut buf, &h);

        let g = header_read(&buf).unwrap();
        assert_eq!(g.version, 1);
        assert_eq!(g.page_size, 4096);
        assert_eq!(g.catalog_root_page_id, 12);
        assert_eq!(g.free_list_head_page_id, 34);
        assert_eq!(g.next_tx_id, 567);
        assert_eq!(g.next_page_id, 89);
        assert!(g.wal_enabled());
    }

    #[test]
    fn header_page_size_64k_wraps_to_zero() {
        let h = HeaderState::new(65536, false);
        let mut buf = vec![0u8; 65536];
        header_write(&mut buf, &h);
        assert_eq!(LittleEndian::read_u16(&buf[HDR_OFF_PAGE_SIZE..]), 0);
        let g = header_read(&buf).unwrap();
        assert_eq!(g.page_size, 65536);
        assert!(!g.wal_enabled());
    }

    #[test]
    fn header_bad_magic_is_corruption() {
        let mut buf = vec![0u8; 4096];
        header_write(&mut buf, &HeaderState::new(4096, false));
        buf[0] = b'X';
        let err = header_read(&buf).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn page_size_validation() {
        assert!(validate_page_size(4096).is_ok());
        assert!(validate_page_size(65536).is_ok());
        assert!(validate_page_size(2048).is_err());
        assert!(validate_page_size(5000).is_err());
        assert!(validate_page_size(131072).is_err());
    }
}
