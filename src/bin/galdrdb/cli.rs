//! Разбор аргументов CLI.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "galdrdb", version, about = "GaldrDB maintenance CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Создать пустую базу.
    Init {
        /// Путь к файлу базы.
        #[arg(long)]
        path: PathBuf,
        /// Размер страницы (степень двойки, 4096..=65536).
        #[arg(long, default_value_t = 4096)]
        page_size: u32,
        /// Вести write-ahead log.
        #[arg(long, default_value_t = false)]
        wal: bool,
    },
    /// Показать состояние базы.
    Status {
        #[arg(long)]
        path: PathBuf,
        /// Вывод в JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Проверить целостность; код выхода 3 при повреждениях.
    Check {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// fsync основного файла и усечение WAL.
    Checkpoint {
        #[arg(long)]
        path: PathBuf,
    },
    /// Вычистить недостижимые версии и вернуть место.
    Vacuum {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Найти и (опционально) удалить сирот каталога/индексов.
    Orphans {
        #[arg(long)]
        path: PathBuf,
        /// Удалить найденных сирот.
        #[arg(long, default_value_t = false)]
        cleanup: bool,
        /// При cleanup удалять и документы непустых коллекций-сирот.
        #[arg(long, default_value_t = false)]
        delete_documents: bool,
    },
}
