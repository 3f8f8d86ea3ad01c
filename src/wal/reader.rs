//! wal/reader — последовательное чтение записей с проверкой crc.
//!
//! Оборванный хвост (недописанная запись, битый crc) не считается
//! фатальным: чтение останавливается, хвост отбрасывается replay'ем.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::consts::{
    MAX_PAGE_SIZE, WAL_HDR_SIZE, WAL_MAGIC, WAL_REC_HDR_SIZE, WAL_REC_OFF_LEN,
    WAL_REC_OFF_PAGE_ID, WAL_REC_OFF_TX,
};
use crate::errors::{GaldrError, IoResultExt, Result};

#[derive(Debug, Clone)]
pub struct WalRecord {
    pub commit_tx_id: u64,
    pub page_id: u32,
    pub image: Vec<u8>,
}

pub struct WalReader {
    rd: BufReader<File>,
    pub checkpoint_tx_id: u64,
}

impl WalReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).ctx(|| format!("open wal {}", path.display()))?;
        let mut rd = BufReader::new(file);

        let mut hdr = [0u8; WAL_HDR_SIZE];
        rd.read_exact(&mut hdr)
            .ctx(|| format!("read wal header {}", path.display()))?;
        if &hdr[..8] != WAL_MAGIC {
            return Err(GaldrError::corruption(format!(
                "bad wal magic in {}",
                path.display()
            )));
        }
        let checkpoint_tx_id = LittleEndian::read_u64(&hdr[8..]);
        rd.seek(SeekFrom::Start(WAL_HDR_SIZE as u64))?;

        Ok(Self {
            rd,
            checkpoint_tx_id,
        })
    }

    /// Следующая валидная запись; None — конец (или оборванный хвост).
    pub fn next_record(&mut self) -> Result<Option<WalRecord>> {
        let mut hdr = [0u8; WAL_REC_HDR_SIZE];
        match read_full(&mut self.rd, &mut hdr)? {
            false => return Ok(None),
            true => {}
        }

        let commit_tx_id = LittleEndian::read_u64(&hdr[WAL_REC_OFF_TX..]);
        let page_id = LittleEndian::read_u32(&hdr[WAL_REC_OFF_PAGE_ID..]);
        let length = LittleEndian::read_u32(&hdr[WAL_REC_OFF_LEN..]);
        if length > MAX_PAGE_SIZE {
            warn!("wal: implausible record length {}, dropping tail", length);
            return Ok(None);
        }

        let mut image = vec![0u8; length as usize];
        if !read_full(&mut self.rd, &mut image)? {
            return Ok(None);
        }
        let mut crc_buf = [0u8; 4];
        if !read_full(&mut self.rd, &mut crc_buf)? {
            return Ok(None);
        }
        let stored = LittleEndian::read_u32(&crc_buf);

        let mut h = crc32fast::Hasher::new();
        h.update(&hdr);
        h.update(&image);
        if stored != h.finalize() {
            warn!("wal: crc mismatch on record (tx {}), dropping tail", commit_tx_id);
            return Ok(None);
        }

        Ok(Some(WalRecord {
            commit_tx_id,
            page_id,
            image,
        }))
    }
}

/// true — буфер прочитан целиком; false — EOF (частичное чтение хвоста).
fn read_full<R: Read>(rd: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = rd.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}
