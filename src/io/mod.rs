//! io — абстракция блочного устройства: чтение/запись страниц фиксированного
//! размера поверх файлоподобного хранилища.
//!
//! Движок не выбирает бэкенд сам: FileIo (обычный файловый I/O), MmapIo
//! (memory-mapped) и MemIo (тесты) реализуют один узкий трейт PageIo.
//!
//! Семантика:
//! - Смещение страницы = page_id * page_size.
//! - Чтение за концом файла возвращает нули (sparse-семантика записи).
//! - Запись за концом файла расширяет хранилище.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use memmap2::MmapMut;

use crate::errors::{GaldrError, IoResultExt, Result};

/// Узкий интерфейс блочного устройства.
pub trait PageIo: Send + Sync {
    fn page_size(&self) -> u32;

    /// Прочитать страницу целиком; buf.len() == page_size.
    fn read_page(&self, page_id: u32, buf: &mut [u8]) -> Result<()>;

    /// Записать страницу целиком; buf.len() == page_size.
    fn write_page(&self, page_id: u32, buf: &[u8]) -> Result<()>;

    /// fsync/flush хранилища.
    fn sync(&self) -> Result<()>;

    /// Текущее число страниц (по длине хранилища, с округлением вверх).
    fn len_pages(&self) -> Result<u32>;

    /// Человекочитаемое описание для контекста ошибок.
    fn describe(&self) -> String;
}

fn check_buf(buf_len: usize, page_size: u32) -> Result<()> {
    if buf_len != page_size as usize {
        return Err(GaldrError::invalid_arg(format!(
            "buffer size {} != page_size {}",
            buf_len, page_size
        )));
    }
    Ok(())
}

// ---------------- FileIo ----------------

/// Обычный файловый бэкенд с позиционным I/O (без общего курсора).
pub struct FileIo {
    file: File,
    path: PathBuf,
    page_size: u32,
}

impl FileIo {
    pub fn create(path: &Path, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .ctx(|| format!("create {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
        })
    }

    pub fn open(path: &Path, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .ctx(|| format!("open {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], off: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, off)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], off: u64) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, off)
    }

    #[cfg(unix)]
    fn write_all_at(&self, buf: &[u8], off: u64) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, off)
    }

    #[cfg(windows)]
    fn write_all_at(&self, mut buf: &[u8], mut off: u64) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            let n = self.file.seek_write(buf, off)?;
            buf = &buf[n..];
            off += n as u64;
        }
        Ok(())
    }
}

impl PageIo for FileIo {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read_page(&self, page_id: u32, buf: &mut [u8]) -> Result<()> {
        check_buf(buf.len(), self.page_size)?;
        let off = page_id as u64 * self.page_size as u64;
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = self
                .read_at(&mut buf[filled..], off + filled as u64)
                .ctx(|| format!("read page {} at {} of {}", page_id, off, self.path.display()))?;
            if n == 0 {
                // За концом файла — нули.
                for b in &mut buf[filled..] {
                    *b = 0;
                }
                break;
            }
            filled += n;
        }
        Ok(())
    }

    fn write_page(&self, page_id: u32, buf: &[u8]) -> Result<()> {
        check_buf(buf.len(), self.page_size)?;
        let off = page_id as u64 * self.page_size as u64;
        self.write_all_at(buf, off)
            .ctx(|| format!("write page {} at {} of {}", page_id, off, self.path.display()))
    }

    fn sync(&self) -> Result<()> {
        self.file
            .sync_all()
            .ctx(|| format!("fsync {}", self.path.display()))
    }

    fn len_pages(&self) -> Result<u32> {
        let len = self
            .file
            .metadata()
            .ctx(|| format!("metadata {}", self.path.display()))?
            .len();
        Ok(len.div_ceil(self.page_size as u64) as u32)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ---------------- MmapIo ----------------

/// memory-mapped бэкенд. Рост файла — remap c запасом, чтобы не дёргать
/// mmap на каждую страницу.
pub struct MmapIo {
    file: File,
    path: PathBuf,
    page_size: u32,
    map: RwLock<MmapMut>,
}

/// Шаг роста mmap-файла (в страницах).
const MMAP_GROW_PAGES: u64 = 256;

impl MmapIo {
    pub fn create(path: &Path, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .ctx(|| format!("create {}", path.display()))?;
        file.set_len(page_size as u64 * MMAP_GROW_PAGES)
            .ctx(|| format!("set_len {}", path.display()))?;
        let map = unsafe { MmapMut::map_mut(&file) }
            .ctx(|| format!("mmap {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
            map: RwLock::new(map),
        })
    }

    pub fn open(path: &Path, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .ctx(|| format!("open {}", path.display()))?;
        let len = file
            .metadata()
            .ctx(|| format!("metadata {}", path.display()))?
            .len();
        if len == 0 {
            file.set_len(page_size as u64 * MMAP_GROW_PAGES)
                .ctx(|| format!("set_len {}", path.display()))?;
        }
        let map = unsafe { MmapMut::map_mut(&file) }
            .ctx(|| format!("mmap {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
            map: RwLock::new(map),
        })
    }

    /// Гарантировать, что отображение покрывает страницу page_id.
    fn ensure_capacity(&self, page_id: u32) -> Result<()> {
        let need = (page_id as u64 + 1) * self.page_size as u64;
        {
            let map = self.map.read().expect("mmap lock poisoned");
            if (map.len() as u64) >= need {
                return Ok(());
            }
        }
        let mut map = self.map.write().expect("mmap lock poisoned");
        if (map.len() as u64) >= need {
            return Ok(());
        }
        map.flush()
            .ctx(|| format!("flush before grow {}", self.path.display()))?;
        let new_len = need.max(map.len() as u64 + self.page_size as u64 * MMAP_GROW_PAGES);
        self.file
            .set_len(new_len)
            .ctx(|| format!("grow {}", self.path.display()))?;
        *map = unsafe { MmapMut::map_mut(&self.file) }
            .ctx(|| format!("remap {}", self.path.display()))?;
        Ok(())
    }
}

impl PageIo for MmapIo {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read_page(&self, page_id: u32, buf: &mut [u8]) -> Result<()> {
        check_buf(buf.len(), self.page_size)?;
        let off = page_id as usize * self.page_size as usize;
        let map = self.map.read().expect("mmap lock poisoned");
        if off >= map.len() {
            buf.fill(0);
            return Ok(());
        }
        let avail = (map.len() - off).min(buf.len());
        buf[..avail].copy_from_slice(&map[off..off + avail]);
        buf[avail..].fill(0);
        Ok(())
    }

    fn write_page(&self, page_id: u32, buf: &[u8]) -> Result<()> {
        check_buf(buf.len(), self.page_size)?;
        self.ensure_capacity(page_id)?;
        let off = page_id as usize * self.page_size as usize;
        let mut map = self.map.write().expect("mmap lock poisoned");
        map[off..off + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let map = self.map.read().expect("mmap lock poisoned");
        map.flush()
            .ctx(|| format!("mmap flush {}", self.path.display()))
    }

    fn len_pages(&self) -> Result<u32> {
        let map = self.map.read().expect("mmap lock poisoned");
        Ok((map.len() as u64).div_ceil(self.page_size as u64) as u32)
    }

    fn describe(&self) -> String {
        format!("{} (mmap)", self.path.display())
    }
}

// ---------------- MemIo ----------------

/// In-memory бэкенд для unit-тестов подсистем.
pub struct MemIo {
    page_size: u32,
    data: RwLock<Vec<u8>>,
}

impl MemIo {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            data: RwLock::new(Vec::new()),
        }
    }
}

impl PageIo for MemIo {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read_page(&self, page_id: u32, buf: &mut [u8]) -> Result<()> {
        check_buf(buf.len(), self.page_size)?;
        let off = page_id as usize * self.page_size as usize;
        let data = self.data.read().expect("mem lock poisoned");
        if off >= data.len() {
            buf.fill(0);
            return Ok(());
        }
        let avail = (data.len() - off).min(buf.len());
        buf[..avail].copy_from_slice(&data[off..off + avail]);
        buf[avail..].fill(0);
        Ok(())
    }

    fn write_page(&self, page_id: u32, buf: &[u8]) -> Result<()> {
        check_buf(buf.len(), self.page_size)?;
        let off = page_id as usize * self.page_size as usize;
        let mut data = self.data.write().expect("mem lock poisoned");
        if data.len() < off + buf.len() {
            data.resize(off + buf.len(), 0);
        }
        data[off..off + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn len_pages(&self) -> Result<u32> {
        let data = self.data.read().expect("mem lock poisoned");
        Ok((data.len() as u64).div_ceil(self.page_size as u64) as u32)
    }

    fn describe(&self) -> String {
        "<mem>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_io_roundtrip_and_zero_fill() {
        let io = MemIo::new(4096);
        let mut buf = vec![0u8; 4096];

        // Непрописанная страница читается нулями.
        io.read_page(7, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        let mut img = vec![0u8; 4096];
        img[0] = 0x42;
        img[4095] = 0x99;
        io.write_page(7, &img).unwrap();
        io.read_page(7, &mut buf).unwrap();
        assert_eq!(buf, img);

        // Страницы до записанной остаются нулевыми.
        io.read_page(3, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(io.len_pages().unwrap(), 8);
    }

    #[test]
    fn mem_io_rejects_wrong_buffer() {
        let io = MemIo::new(4096);
        let mut small = vec![0u8; 100];
        assert!(io.read_page(0, &mut small).is_err());
    }
}
