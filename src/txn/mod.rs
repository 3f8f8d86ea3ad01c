//! txn — транзакции: выдача TxId и снапшотов, write-set'ы, буферизованный
//! страничный слой с обнаружением конфликтов на коммите.

pub mod buffered;
pub mod manager;
pub mod transaction;

pub use buffered::{BufferedPageStore, DirectPages, ReadPages, TxPages};
pub use manager::TxManager;
pub use transaction::{PendingVersion, Transaction, TxState};
