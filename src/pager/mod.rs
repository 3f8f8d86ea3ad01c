//! pager — менеджер страниц: заголовок, аллокация/free-лист, сырой I/O.

pub mod alloc;
pub mod cache;
pub mod core;

pub use core::Pager;

use crate::errors::Result;

/// Доступ к страницам для подсистем, работающих и в транзакции (через
/// write-set), и вне её (напрямую через Pager). B+-дерево и хранилище
/// документов видят страницы только через этот трейт.
pub trait PageAccess {
    fn page_size(&self) -> u32;

    fn read(&mut self, page_id: u32) -> Result<Vec<u8>>;

    fn write(&mut self, page_id: u32, page: &[u8]) -> Result<()>;

    /// Выделить одну страницу (free-лист или хвост файла).
    fn allocate(&mut self) -> Result<u32>;

    /// Выделить count последовательных страниц (только хвост файла —
    /// overflow-цепочкам нужна непрерывность).
    fn allocate_consecutive(&mut self, count: u32) -> Result<u32>;
}
