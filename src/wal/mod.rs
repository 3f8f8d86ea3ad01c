//! wal — опциональный write-ahead (redo) лог.
//!
//! Формат файла <db>.wal:
//! - Заголовок 16 B: [magic8 "GDB1WAL1"][checkpoint_tx_id u64].
//! - Записи: [commit_tx_id u64][page_id u32][length u32][after_image][crc32].
//!
//! Каждая зафиксированная группа страниц завершается барьером
//! (page_id = u32::MAX, length = 0) с тем же commit_tx_id. Replay применяет
//! только группы, завершённые валидным барьером, и только с
//! commit_tx_id > checkpoint_tx_id.

pub mod reader;
pub mod replay;
pub mod writer;

pub use reader::{WalReader, WalRecord};
pub use replay::{wal_replay, ReplayStats};
pub use writer::WalWriter;

use std::path::{Path, PathBuf};

/// Путь WAL-файла рядом с файлом базы.
pub fn wal_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push(".wal");
    PathBuf::from(os)
}
