//! txn/transaction — объект транзакции: write-set страниц и отложенные
//! изменения индекса версий/каталога.
//!
//! Транзакция однопоточна (не разделяется между потоками); все её
//! изменения до коммита живут только в write-set'е и pending-списках.

use std::collections::HashMap;

use crate::catalog::CatalogOp;
use crate::errors::{GaldrError, Result};
use crate::version::DocumentLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Отложенная правка индекса версий; применяется на коммите под
/// защёлкой коллекции внутри commit-секции.
#[derive(Debug, Clone)]
pub enum PendingVersion {
    Upsert {
        collection: String,
        doc_id: u64,
        location: DocumentLocation,
    },
    Delete {
        collection: String,
        doc_id: u64,
    },
}

pub struct Transaction {
    pub tx_id: u64,
    pub snapshot_tx_id: u64,
    pub(crate) write_set: HashMap<u32, Vec<u8>>,
    pub(crate) pending_versions: Vec<PendingVersion>,
    pub(crate) pending_catalog: Vec<CatalogOp>,
    pub state: TxState,
}

impl Transaction {
    pub(crate) fn new(tx_id: u64, snapshot_tx_id: u64) -> Self {
        Self {
            tx_id,
            snapshot_tx_id,
            write_set: HashMap::new(),
            pending_versions: Vec::new(),
            pending_catalog: Vec::new(),
            state: TxState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    pub(crate) fn require_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(GaldrError::invalid_op(format!(
                "transaction {} is not active ({:?})",
                self.tx_id, self.state
            )));
        }
        Ok(())
    }

    /// Буферизованная копия страницы (read-your-writes).
    pub(crate) fn buffered_page(&self, page_id: u32) -> Option<&Vec<u8>> {
        self.write_set.get(&page_id)
    }

    pub(crate) fn buffer_write(&mut self, page_id: u32, bytes: Vec<u8>) {
        self.write_set.insert(page_id, bytes);
    }

    pub fn write_set_len(&self) -> usize {
        self.write_set.len()
    }

    /// Свой взгляд транзакции на документ: None — нет отложенных правок,
    /// Some(None) — удалён этой транзакцией, Some(Some(loc)) — записан ею.
    pub(crate) fn pending_doc(
        &self,
        collection: &str,
        doc_id: u64,
    ) -> Option<Option<DocumentLocation>> {
        for pv in self.pending_versions.iter().rev() {
            match pv {
                PendingVersion::Upsert {
                    collection: c,
                    doc_id: d,
                    location,
                } if c == collection && *d == doc_id => return Some(Some(*location)),
                PendingVersion::Delete {
                    collection: c,
                    doc_id: d,
                } if c == collection && *d == doc_id => return Some(None),
                _ => {}
            }
        }
        None
    }

    /// Документы коллекции, записанные/удалённые этой транзакцией
    /// (для наложения на результаты запросов).
    pub(crate) fn pending_docs_in(
        &self,
        collection: &str,
    ) -> HashMap<u64, Option<DocumentLocation>> {
        let mut out = HashMap::new();
        for pv in self.pending_versions.iter() {
            match pv {
                PendingVersion::Upsert {
                    collection: c,
                    doc_id,
                    location,
                } if c == collection => {
                    out.insert(*doc_id, Some(*location));
                }
                PendingVersion::Delete {
                    collection: c,
                    doc_id,
                } if c == collection => {
                    out.insert(*doc_id, None);
                }
                _ => {}
            }
        }
        out
    }

    /// Сброс для ретрая после конфликта: новый снапшот, чистые буферы,
    /// тот же tx_id.
    pub(crate) fn reset_for_retry(&mut self, snapshot_tx_id: u64) {
        self.snapshot_tx_id = snapshot_tx_id;
        self.write_set.clear();
        self.pending_versions.clear();
        self.pending_catalog.clear();
        self.state = TxState::Active;
    }

    pub(crate) fn clear_buffers(&mut self) {
        self.write_set.clear();
        self.pending_versions.clear();
        self.pending_catalog.clear();
    }
}
