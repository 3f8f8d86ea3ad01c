//! errors — типизированные ошибки движка и alias Result.
//!
//! Все восстановимые ошибки возвращаются значением; паника допустима только
//! для нарушений внутренних предусловий. Контекст ввода-вывода (путь,
//! смещение) добавляется через `IoResultExt::ctx`.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum GaldrError {
    /// Коллекция, документ или индекс не найдены.
    #[error("not found: {0}")]
    NotFound(String),

    /// Некорректное использование API. Фатально для операции, не для движка.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Пересечение write-set'ов при коммите; транзакцию нужно прервать
    /// и (опционально) повторить с новым снапшотом. Движок сам не ретраит.
    #[error("page conflict: {0}")]
    PageConflict(String),

    /// Повреждение формата: магия, checksum, усечённая страница, инвариант
    /// цепочки версий. Движок переводится в read-only до переоткрытия.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Ошибка нижележащего хранилища, с контекстом пути/смещения.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Неверный аргумент: размер страницы, длина буфера и т.п.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Использование после close().
    #[error("database handle is disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, GaldrError>;

impl GaldrError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        GaldrError::NotFound(msg.into())
    }

    pub fn invalid_op(msg: impl Into<String>) -> Self {
        GaldrError::InvalidOperation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        GaldrError::PageConflict(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        GaldrError::Corruption(msg.into())
    }

    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        GaldrError::InvalidArgument(msg.into())
    }

    /// true для ошибок, после которых движок помечает себя read-only.
    pub fn is_corruption(&self) -> bool {
        matches!(self, GaldrError::Corruption(_))
    }
}

impl From<io::Error> for GaldrError {
    fn from(e: io::Error) -> Self {
        GaldrError::Io {
            context: "io error".to_string(),
            source: e,
        }
    }
}

/// Добавление контекста к io-ошибкам в стиле `with_context`.
pub trait IoResultExt<T> {
    fn ctx<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, io::Error> {
    fn ctx<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| GaldrError::Io {
            context: f(),
            source: e,
        })
    }
}
