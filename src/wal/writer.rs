//! wal/writer — дозапись групп страниц и барьеров, fsync, truncate.
//!
//! Писатель один: вызовы идут под commit-мьютексом движка, поэтому
//! внутренних блокировок здесь нет.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::consts::{WAL_BARRIER_PAGE_ID, WAL_HDR_SIZE, WAL_MAGIC, WAL_REC_HDR_SIZE};
use crate::errors::{GaldrError, IoResultExt, Result};
use crate::metrics::{record_wal_append, record_wal_fsync, record_wal_truncation};

pub struct WalWriter {
    file: File,
    path: PathBuf,
}

impl WalWriter {
    /// Открыть WAL, создав и проинициализировав заголовок при отсутствии.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .ctx(|| format!("open wal {}", path.display()))?;

        let len = file
            .metadata()
            .ctx(|| format!("metadata wal {}", path.display()))?
            .len();
        if len < WAL_HDR_SIZE as u64 {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(WAL_MAGIC)?;
            file.write_u64::<LittleEndian>(0)?; // checkpoint_tx_id
            file.sync_all()?;
        } else {
            let mut magic = [0u8; 8];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut magic)?;
            if &magic != WAL_MAGIC {
                return Err(GaldrError::corruption(format!(
                    "bad wal magic in {}",
                    path.display()
                )));
            }
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Последний зафиксированный checkpoint (high-water mark).
    pub fn checkpoint_tx_id(&mut self) -> Result<u64> {
        self.file.seek(SeekFrom::Start(8))?;
        let mut buf = [0u8; 8];
        self.file.read_exact(&mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    fn append_record(&mut self, commit_tx_id: u64, page_id: u32, image: &[u8]) -> Result<()> {
        let mut rec = Vec::with_capacity(WAL_REC_HDR_SIZE + image.len() + 4);
        rec.write_u64::<LittleEndian>(commit_tx_id)?;
        rec.write_u32::<LittleEndian>(page_id)?;
        rec.write_u32::<LittleEndian>(image.len() as u32)?;
        rec.extend_from_slice(image);

        let mut h = crc32fast::Hasher::new();
        h.update(&rec);
        rec.write_u32::<LittleEndian>(h.finalize())?;

        self.file.seek(SeekFrom::End(0))?;
        self.file
            .write_all(&rec)
            .ctx(|| format!("append wal record to {}", self.path.display()))?;
        record_wal_append(rec.len());
        Ok(())
    }

    /// Дописать образ страницы группы commit_tx_id.
    pub fn append_page(&mut self, commit_tx_id: u64, page_id: u32, image: &[u8]) -> Result<()> {
        if page_id == WAL_BARRIER_PAGE_ID {
            return Err(GaldrError::invalid_arg("page_id reserved for wal barrier"));
        }
        self.append_record(commit_tx_id, page_id, image)
    }

    /// Барьер фиксации группы: после него replay применит группу.
    pub fn append_barrier(&mut self, commit_tx_id: u64) -> Result<()> {
        self.append_record(commit_tx_id, WAL_BARRIER_PAGE_ID, &[])
    }

    pub fn fsync(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .ctx(|| format!("fsync wal {}", self.path.display()))?;
        record_wal_fsync();
        Ok(())
    }

    /// Усечь лог до заголовка, записав новый high-water mark.
    pub fn truncate_to_header(&mut self, checkpoint_tx_id: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(8))?;
        self.file.write_u64::<LittleEndian>(checkpoint_tx_id)?;
        self.file
            .set_len(WAL_HDR_SIZE as u64)
            .ctx(|| format!("truncate wal {}", self.path.display()))?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.sync_all()?;
        record_wal_truncation();
        Ok(())
    }
}
