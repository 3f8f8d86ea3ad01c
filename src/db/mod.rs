//! db — высокоуровневый фасад движка: жизненный цикл, операции над
//! документами, запросы, обслуживание, doctor.

pub mod core;
pub mod docs;
pub mod doctor;
pub mod maintenance;
pub mod query;

pub use core::{Db, DbStatus, DbTx, ReadTx};
pub use doctor::{CheckReport, OrphanReport};
pub use maintenance::VacuumStats;
pub use query::{Explain, Op, Predicate, Query, ScanType};
