//! Файловая блокировка единственного процесса-владельца БД.
//!
//! Advisory-блокировка (fs2) берётся на сам файл базы:
//! - Exclusive: обычный режим, один процесс с движком.
//! - Shared: зарезервировано под read-only инструменты.
//!
//! Блокировка снимается на Drop.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::errors::{GaldrError, IoResultExt, Result};

#[derive(Debug, Clone, Copy)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Ошибки unlock на Drop игнорируются сознательно.
        let _ = self.file.unlock();
    }
}

/// Попытаться взять блокировку; ошибка InvalidOperation, если файл уже занят.
pub fn try_acquire_lock(path: &Path, mode: LockMode) -> Result<LockGuard> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .ctx(|| format!("open for lock {}", path.display()))?;

    let res = match mode {
        LockMode::Shared => fs2::FileExt::try_lock_shared(&file),
        LockMode::Exclusive => fs2::FileExt::try_lock_exclusive(&file),
    };
    res.map_err(|_| {
        GaldrError::invalid_op(format!(
            "database is locked by another process: {}",
            path.display()
        ))
    })?;

    Ok(LockGuard {
        file,
        path: path.to_path_buf(),
        mode,
    })
}

pub fn try_acquire_exclusive_lock(path: &Path) -> Result<LockGuard> {
    try_acquire_lock(path, LockMode::Exclusive)
}
