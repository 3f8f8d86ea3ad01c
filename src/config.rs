//! Централизованная конфигурация и builder для GaldrDB.
//!
//! Назначение:
//! - Одно место для tunables вместо разбросанных env-чтений.
//! - GaldrConfig::from_env() читает переменные с префиксом GDB_.
//! - DbBuilder отдаёт готовый GaldrConfig, который потребляет Db.

use std::fmt;

/// Конфигурация открытия/создания базы.
#[derive(Clone, Debug)]
pub struct GaldrConfig {
    /// Размер страницы при создании БД (степень двойки, 4096..=65536).
    /// Env: GDB_PAGE_SIZE (default 4096)
    pub page_size: u32,

    /// Вести write-ahead log (redo) при создании БД.
    /// Env: GDB_USE_WAL (default false)
    pub use_wal: bool,

    /// Использовать mmap-бэкенд вместо обычного файлового I/O.
    /// Env: GDB_USE_MMAP (default false)
    pub use_mmap: bool,

    /// Бюджет страничного read-кэша в байтах (0 — выключен).
    /// Env: GDB_CACHE_BYTES (default 0)
    pub cache_bytes: usize,

    /// fsync файла данных при каждом коммите (помимо fsync WAL).
    /// Env: GDB_DATA_FSYNC (default true; "0|false|off|no" => false)
    pub data_fsync: bool,
}

impl Default for GaldrConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            use_wal: false,
            use_mmap: false,
            cache_bytes: 0,
            data_fsync: true,
        }
    }
}

impl GaldrConfig {
    /// Загрузить конфигурацию из переменных окружения.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("GDB_PAGE_SIZE") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.page_size = n;
            }
        }

        if let Ok(v) = std::env::var("GDB_USE_WAL") {
            cfg.use_wal = parse_bool(&v);
        }

        if let Ok(v) = std::env::var("GDB_USE_MMAP") {
            cfg.use_mmap = parse_bool(&v);
        }

        if let Ok(v) = std::env::var("GDB_CACHE_BYTES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.cache_bytes = n;
            }
        }

        if let Ok(v) = std::env::var("GDB_DATA_FSYNC") {
            let s = v.trim().to_ascii_lowercase();
            cfg.data_fsync = !(s == "0" || s == "false" || s == "off" || s == "no");
        }

        cfg
    }

    /// Fluent-сеттеры для переопределения отдельных полей.

    pub fn with_page_size(mut self, ps: u32) -> Self {
        self.page_size = ps;
        self
    }

    pub fn with_wal(mut self, on: bool) -> Self {
        self.use_wal = on;
        self
    }

    pub fn with_mmap(mut self, on: bool) -> Self {
        self.use_mmap = on;
        self
    }

    pub fn with_cache_bytes(mut self, bytes: usize) -> Self {
        self.cache_bytes = bytes;
        self
    }

    pub fn with_data_fsync(mut self, on: bool) -> Self {
        self.data_fsync = on;
        self
    }
}

fn parse_bool(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

/// Лёгкий builder, производящий GaldrConfig.
#[derive(Clone, Debug, Default)]
pub struct DbBuilder {
    cfg: GaldrConfig,
}

impl DbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Стартовать от env вместо чистого default.
    pub fn from_env() -> Self {
        Self {
            cfg: GaldrConfig::from_env(),
        }
    }

    pub fn page_size(mut self, ps: u32) -> Self {
        self.cfg.page_size = ps;
        self
    }

    pub fn use_wal(mut self, on: bool) -> Self {
        self.cfg.use_wal = on;
        self
    }

    pub fn use_mmap(mut self, on: bool) -> Self {
        self.cfg.use_mmap = on;
        self
    }

    pub fn cache_bytes(mut self, bytes: usize) -> Self {
        self.cfg.cache_bytes = bytes;
        self
    }

    pub fn data_fsync(mut self, on: bool) -> Self {
        self.cfg.data_fsync = on;
        self
    }

    /// Завершить builder и получить конфигурацию.
    pub fn build(self) -> GaldrConfig {
        self.cfg
    }
}

impl fmt::Display for GaldrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GaldrConfig {{ page_size: {}, use_wal: {}, use_mmap: {}, cache_bytes: {}, data_fsync: {} }}",
            self.page_size, self.use_wal, self.use_mmap, self.cache_bytes, self.data_fsync
        )
    }
}
