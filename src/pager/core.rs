//! pager/core — ядро Pager: заголовок в памяти, сырое чтение/запись страниц,
//! контроль checksum страниц документов.
//!
//! Политика заголовка: счётчики обновляются только в памяти; на диск
//! заголовок сбрасывается каждые HEADER_PERSIST_INTERVAL коммитов, на
//! checkpoint и при close. После сбоя WAL replay поднимает счётчики заново.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::consts::PAGE_TYPE_DOCUMENT;
use crate::errors::{GaldrError, Result};
use crate::header::{header_read, header_write, validate_page_size, HeaderState};
use crate::io::PageIo;
use crate::page::{page_update_checksum, page_verify_checksum};

/// Низкоуровневый менеджер страниц поверх PageIo.
pub struct Pager {
    pub(crate) io: Box<dyn PageIo>,
    pub(crate) state: Mutex<HeaderState>,
    path: PathBuf,
    db_id: u64,
}

impl Pager {
    /// Создать новую базу: валидация page_size, запись страницы 0.
    pub fn create(io: Box<dyn PageIo>, path: &Path, wal_enabled: bool) -> Result<Self> {
        let page_size = io.page_size();
        validate_page_size(page_size)?;

        let h = HeaderState::new(page_size, wal_enabled);
        let mut page0 = vec![0u8; page_size as usize];
        header_write(&mut page0, &h);
        io.write_page(0, &page0)?;
        io.sync()?;

        Ok(Self {
            io,
            state: Mutex::new(h),
            path: path.to_path_buf(),
            db_id: compute_db_id(path),
        })
    }

    /// Открыть существующую базу по странице 0.
    pub fn open(io: Box<dyn PageIo>, path: &Path) -> Result<Self> {
        let page_size = io.page_size();
        let mut page0 = vec![0u8; page_size as usize];
        io.read_page(0, &mut page0)?;
        let h = header_read(&page0)?;
        if h.page_size != page_size {
            return Err(GaldrError::corruption(format!(
                "header page_size {} != io page_size {}",
                h.page_size, page_size
            )));
        }
        Ok(Self {
            io,
            state: Mutex::new(h),
            path: path.to_path_buf(),
            db_id: compute_db_id(path),
        })
    }

    pub fn page_size(&self) -> u32 {
        self.io.page_size()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Стабильный идентификатор экземпляра БД (для status/диагностики).
    pub fn db_id(&self) -> u64 {
        self.db_id
    }

    /// Снимок заголовка.
    pub fn header(&self) -> HeaderState {
        self.state.lock().expect("header lock poisoned").clone()
    }

    /// Изменить заголовок в памяти.
    pub fn update_header<F: FnOnce(&mut HeaderState)>(&self, f: F) {
        let mut st = self.state.lock().expect("header lock poisoned");
        f(&mut st);
    }

    /// Сбросить заголовок на диск (без fsync; его делает вызывающий).
    pub fn persist_header(&self) -> Result<()> {
        let h = self.header();
        let mut page0 = vec![0u8; self.page_size() as usize];
        header_write(&mut page0, &h);
        self.io.write_page(0, &page0)
    }

    /// Прочитать страницу; для страниц документов сверяется checksum.
    pub fn read_page(&self, page_id: u32, buf: &mut [u8]) -> Result<()> {
        self.io.read_page(page_id, buf)?;
        if page_id != 0 && buf[0] == PAGE_TYPE_DOCUMENT {
            page_verify_checksum(buf, page_id)?;
        }
        Ok(())
    }

    /// Записать страницу; страницам документов перед записью обновляется
    /// checksum (поэтому буфер мутабельный, как у commit-пути).
    pub fn write_page(&self, page_id: u32, page: &mut [u8]) -> Result<()> {
        if page.len() != self.page_size() as usize {
            return Err(GaldrError::invalid_arg(format!(
                "buffer size {} != page_size {}",
                page.len(),
                self.page_size()
            )));
        }
        if page_id != 0 && page[0] == PAGE_TYPE_DOCUMENT {
            page_update_checksum(page);
        }
        self.io.write_page(page_id, page)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    pub fn len_pages(&self) -> Result<u32> {
        self.io.len_pages()
    }

    pub fn describe(&self) -> String {
        self.io.describe()
    }
}

/// Стабильный идентификатор БД (канонический путь + dev/ino на Unix).
fn compute_db_id(path: &Path) -> u64 {
    use std::hash::Hasher;
    let mut h = twox_hash::XxHash64::with_seed(0x6A1D_9E04_C3F7_5B21);
    let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let s = canon.to_string_lossy();
    h.write(s.as_bytes());
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Ok(md) = std::fs::metadata(&canon) {
            h.write_u64(md.dev());
            h.write_u64(md.ino());
        }
    }
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemIo;

    #[test]
    fn create_persist_reread_header() {
        let path = Path::new("/tmp/galdr-pager-test-nonexistent");
        let io = Box::new(MemIo::new(4096));
        let pager = Pager::create(io, path, true).unwrap();
        pager.update_header(|h| {
            h.next_page_id = 42;
            h.catalog_root_page_id = 7;
        });
        pager.persist_header().unwrap();

        let mut page0 = vec![0u8; 4096];
        pager.io.read_page(0, &mut page0).unwrap();
        let h = crate::header::header_read(&page0).unwrap();
        assert_eq!(h.next_page_id, 42);
        assert_eq!(h.catalog_root_page_id, 7);
        assert!(h.wal_enabled());
    }

    #[test]
    fn document_page_checksum_roundtrip() {
        let pager = Pager::create(
            Box::new(MemIo::new(4096)),
            Path::new("/tmp/galdr-pager-cksum"),
            false,
        )
        .unwrap();

        let mut page = vec![0u8; 4096];
        crate::page::slotted_init(&mut page, PAGE_TYPE_DOCUMENT);
        crate::page::slotted_add(&mut page, b"payload", 0, 1, 7).unwrap();
        pager.write_page(3, &mut page).unwrap();

        let mut back = vec![0u8; 4096];
        pager.read_page(3, &mut back).unwrap();
        assert_eq!(back, page);

        // Испорченный байт ловится на чтении.
        let mut raw = back.clone();
        raw[100] ^= 0xFF;
        pager.io.write_page(3, &raw).unwrap();
        assert!(pager.read_page(3, &mut back).unwrap_err().is_corruption());
    }
}
