#![allow(non_snake_case)]

// Базовые модули
pub mod config;
pub mod consts;
pub mod errors;
pub mod header;
pub mod lock;
pub mod metrics;
pub mod record;

// Хранилище (папки с mod.rs)
pub mod db; // src/db/{mod,core,docs,query,maintenance,doctor}.rs
pub mod io; // src/io/mod.rs
pub mod page; // src/page/{mod,checksum,slotted,ovf}.rs
pub mod pager; // src/pager/{mod,core,alloc,cache}.rs
pub mod wal; // src/wal/{mod,writer,reader,replay}.rs

// Документы и индексы
pub mod btree; // src/btree/{mod,key,node,tree}.rs
pub mod catalog;
pub mod heap;

// Транзакции и MVCC
pub mod txn; // src/txn/{mod,manager,transaction,buffered}.rs
pub mod version;

// Удобные реэкспорты
pub use config::{DbBuilder, GaldrConfig};
pub use db::{Db, DbStatus, DbTx, Explain, Op, Query, ReadTx, ScanType};
pub use errors::{GaldrError, Result};
pub use record::{FieldDescriptor, FieldKind, Record, Value};
pub use version::{DocumentLocation, DocumentVersion, VersionIndex};
