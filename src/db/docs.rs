//! db/docs — операции над документами.
//!
//! Мутации MVCC-дисциплины: новая версия — всегда новый слот; старые слоты
//! не трогаются до vacuum, чтобы старые снапшоты дочитывали свои байты.
//! Первичный индекс хранит положение новейшей закоммиченной версии (с
//! флагом удаления); вторичные — композитные ключи (значение, doc_id),
//! устаревшие записи отфильтровываются сверкой положения с видимой версией.

use log::debug;

use crate::btree::{encode_field_key, key_width, primary_key, BTree};
use crate::catalog::{CatalogOp, CollectionEntry, IndexEntry, MetaLoc};
use crate::errors::{GaldrError, Result};
use crate::heap::{heap_delete, heap_insert, heap_new_chain, heap_read};
use crate::record::{FieldDescriptor, Record, Value};
use crate::txn::PendingVersion;
use crate::version::DocumentLocation;

use super::core::{Db, DbTx, ReadTx};

impl DbTx<'_> {
    fn collection_entry(&self, name: &str) -> Result<(CollectionEntry, MetaLoc)> {
        self.db
            .catalog
            .collection(&self.tx.pending_catalog, name)
            .ok_or_else(|| GaldrError::not_found(format!("collection '{}'", name)))
    }

    /// Значение поля по дескриптору; отсутствующее поле — Null.
    fn field_of<R: Record>(rec: &R, d: &FieldDescriptor) -> Result<Value> {
        let v = rec.field_value(&d.name).unwrap_or(Value::Null);
        v.check_kind(d)?;
        Ok(v)
    }

    /// Переписать персистентную запись коллекции внутри транзакции.
    fn rewrite_collection_entry(
        &mut self,
        entry: CollectionEntry,
        meta: MetaLoc,
    ) -> Result<()> {
        let cols_first = self.db.catalog.cols_first_page();
        let payload = serde_json::to_vec(&entry)
            .map_err(|e| GaldrError::corruption(format!("encode catalog entry: {}", e)))?;
        let location = {
            let mut pages = self.pages();
            heap_delete(&mut pages, meta.location)?;
            heap_insert(&mut pages, cols_first, meta.meta_doc_id, &payload)?
        };
        self.tx.pending_catalog.push(CatalogOp::UpsertCollection {
            entry,
            meta_doc_id: meta.meta_doc_id,
            location,
        });
        Ok(())
    }

    fn rewrite_index_entry(&mut self, entry: IndexEntry, meta: MetaLoc) -> Result<()> {
        let idxs_first = self.db.catalog.idxs_first_page();
        let payload = serde_json::to_vec(&entry)
            .map_err(|e| GaldrError::corruption(format!("encode index entry: {}", e)))?;
        let location = {
            let mut pages = self.pages();
            heap_delete(&mut pages, meta.location)?;
            heap_insert(&mut pages, idxs_first, meta.meta_doc_id, &payload)?
        };
        self.tx.pending_catalog.push(CatalogOp::UpsertIndex {
            entry,
            meta_doc_id: meta.meta_doc_id,
            location,
        });
        Ok(())
    }

    pub(crate) fn create_collection_in_tx(
        &mut self,
        name: &str,
        fields: Vec<FieldDescriptor>,
    ) -> Result<()> {
        if self
            .db
            .catalog
            .collection(&self.tx.pending_catalog, name)
            .is_some()
        {
            return Err(GaldrError::invalid_op(format!(
                "collection '{}' already exists",
                name
            )));
        }

        let (first_doc_page, primary_root) = {
            let mut pages = self.pages();
            let first = heap_new_chain(&mut pages)?;
            let root = BTree::create(&mut pages, 9)?;
            (first, root)
        };

        let entry = CollectionEntry {
            name: name.to_string(),
            first_doc_page,
            primary_root,
            last_doc_id: 0,
            fields: fields.clone(),
        };
        let meta_doc_id = self.db.catalog.alloc_meta_doc_id();
        let cols_first = self.db.catalog.cols_first_page();
        let payload = serde_json::to_vec(&entry)
            .map_err(|e| GaldrError::corruption(format!("encode catalog entry: {}", e)))?;
        let location = {
            let mut pages = self.pages();
            heap_insert(&mut pages, cols_first, meta_doc_id, &payload)?
        };
        self.tx.pending_catalog.push(CatalogOp::UpsertCollection {
            entry,
            meta_doc_id,
            location,
        });

        // Вторичные индексы объявленных полей.
        for d in fields.iter().filter(|d| d.indexed && !d.primary) {
            self.create_index_in_tx(name, &d.name)?;
        }
        debug!("created collection '{}'", name);
        Ok(())
    }

    pub(crate) fn create_index_in_tx(&mut self, collection: &str, field: &str) -> Result<()> {
        let (entry, _meta) = self.collection_entry(collection)?;
        let d = entry
            .fields
            .iter()
            .find(|d| d.name == field)
            .ok_or_else(|| {
                GaldrError::not_found(format!("field '{}' in collection '{}'", field, collection))
            })?
            .clone();
        if d.primary {
            return Err(GaldrError::invalid_op(
                "the primary field is always indexed",
            ));
        }
        if self
            .db
            .catalog
            .index(&self.tx.pending_catalog, collection, field)
            .is_some()
        {
            return Err(GaldrError::invalid_op(format!(
                "index '{}' on '{}' already exists",
                field, collection
            )));
        }

        let kw = key_width(d.kind) + 8;
        let root = {
            let mut pages = self.pages();
            BTree::create(&mut pages, kw)?
        };

        // Пересборка по существующим документам: значения поля поднимаются
        // из payload'ов (см. extract_field).
        let mut filled_root = root;
        {
            let (doc_ids, locs): (Vec<u64>, Vec<DocumentLocation>) = {
                let mut pages = self.pages();
                let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
                let mut ids = Vec::new();
                let mut ls = Vec::new();
                tree.for_each(&mut |k, v| {
                    if !v.is_deleted() {
                        ids.push(crate::btree::doc_id_from_primary(k));
                        ls.push(v.location());
                    }
                    Ok(true)
                })?;
                (ids, ls)
            };
            for (doc_id, loc) in doc_ids.into_iter().zip(locs) {
                let payload = {
                    let mut pages = self.pages();
                    heap_read(&mut pages, loc)?.1
                };
                let value = extract_field(&payload, &d)?;
                let fk = encode_field_key(&value, d.kind)?;
                let ck = crate::btree::composite_key(&fk, doc_id);
                let mut pages = self.pages();
                let mut tree = BTree::open(&mut pages, filled_root, kw);
                tree.insert(&ck, crate::btree::LeafValue::new(loc))?;
                filled_root = tree.root();
            }
        }

        let idx_entry = IndexEntry {
            collection: collection.to_string(),
            field: field.to_string(),
            kind: d.kind,
            nullable: d.nullable,
            root: filled_root,
        };
        let meta_doc_id = self.db.catalog.alloc_meta_doc_id();
        let idxs_first = self.db.catalog.idxs_first_page();
        let payload = serde_json::to_vec(&idx_entry)
            .map_err(|e| GaldrError::corruption(format!("encode index entry: {}", e)))?;
        let location = {
            let mut pages = self.pages();
            heap_insert(&mut pages, idxs_first, meta_doc_id, &payload)?
        };
        self.tx.pending_catalog.push(CatalogOp::UpsertIndex {
            entry: idx_entry,
            meta_doc_id,
            location,
        });
        debug!("created index '{}' on '{}'", field, collection);
        Ok(())
    }

    /// Вставка; возвращает присвоенный doc_id.
    pub fn insert<R: Record>(&mut self, collection: &str, rec: &mut R) -> Result<u64> {
        self.db.check_writable()?;
        self.tx.require_active()?;
        let (mut entry, meta) = self.collection_entry(collection)?;

        // Проверка видов значений по дескрипторам.
        for d in entry.fields.iter().filter(|d| !d.primary) {
            Self::field_of(rec, d)?;
        }

        let doc_id = if rec.doc_id() == 0 {
            let id = self.db.alloc_doc_id(collection, &entry)?;
            rec.set_doc_id(id);
            id
        } else {
            let id = rec.doc_id();
            self.db.note_doc_id(collection, id);
            id
        };

        // Уникальность id: живая версия или pending-запись — дубликат;
        // pending Delete освобождает id внутри этой же транзакции.
        let duplicate = match self.tx.pending_doc(collection, doc_id) {
            Some(None) => false,
            Some(Some(_)) => true,
            None => self
                .db
                .resolve_visible(collection, doc_id, self.tx.snapshot_tx_id)?
                .is_some(),
        };
        if duplicate {
            return Err(GaldrError::invalid_op(format!(
                "document {} already exists in '{}'",
                doc_id, collection
            )));
        }

        let payload = rec.encode()?;
        let loc = {
            let mut pages = self.pages();
            heap_insert(&mut pages, entry.first_doc_page, doc_id, &payload)?
        };

        // Первичный индекс: новая запись либо реанимация tombstone-ключа.
        let pk = primary_key(doc_id);
        let new_root = {
            let mut pages = self.pages();
            let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
            match tree.search(&pk)? {
                Some(v) if v.is_deleted() => {
                    tree.update_value(&pk, crate::btree::LeafValue::new(loc))?;
                }
                Some(_) => {
                    return Err(GaldrError::invalid_op(format!(
                        "document {} already exists in '{}'",
                        doc_id, collection
                    )))
                }
                None => tree.insert(&pk, crate::btree::LeafValue::new(loc))?,
            }
            tree.root()
        };
        if new_root != entry.primary_root {
            entry.primary_root = new_root;
            self.rewrite_collection_entry(entry.clone(), meta)?;
        }

        self.upsert_secondary_entries(collection, rec, doc_id, loc)?;

        self.tx.pending_versions.push(PendingVersion::Upsert {
            collection: collection.to_string(),
            doc_id,
            location: loc,
        });
        Ok(doc_id)
    }

    /// Записи вторичных индексов для новой версии документа.
    fn upsert_secondary_entries<R: Record>(
        &mut self,
        collection: &str,
        rec: &R,
        doc_id: u64,
        loc: DocumentLocation,
    ) -> Result<()> {
        let indexes = self.db.catalog.indexes_of(&self.tx.pending_catalog, collection);
        for idx in indexes {
            let d = FieldDescriptor {
                name: idx.field.clone(),
                kind: idx.kind,
                nullable: idx.nullable,
                indexed: true,
                primary: false,
            };
            let v = Self::field_of(rec, &d)?;
            let fk = encode_field_key(&v, idx.kind)?;
            let ck = crate::btree::composite_key(&fk, doc_id);
            let kw = key_width(idx.kind) + 8;

            let new_root = {
                let mut pages = self.pages();
                let mut tree = BTree::open(&mut pages, idx.root, kw);
                match tree.search(&ck)? {
                    // То же значение поля: запись уже есть, обновим положение.
                    Some(_) => {
                        tree.update_value(&ck, crate::btree::LeafValue::new(loc))?;
                    }
                    None => tree.insert(&ck, crate::btree::LeafValue::new(loc))?,
                }
                tree.root()
            };
            if new_root != idx.root {
                let (mut e, m) = self
                    .db
                    .catalog
                    .index(&self.tx.pending_catalog, collection, &idx.field)
                    .expect("index entry just listed");
                e.root = new_root;
                self.rewrite_index_entry(e, m)?;
            }
        }
        Ok(())
    }

    /// Точечное чтение по id под снапшотом транзакции (плюс её own writes).
    pub fn get_by_id<R: Record>(&mut self, collection: &str, doc_id: u64) -> Result<Option<R>> {
        self.db.check_open()?;
        self.tx.require_active()?;
        let loc = match self.tx.pending_doc(collection, doc_id) {
            Some(None) => return Ok(None),
            Some(Some(loc)) => Some(loc),
            None => self
                .db
                .resolve_visible(collection, doc_id, self.tx.snapshot_tx_id)?,
        };
        let Some(loc) = loc else {
            return Ok(None);
        };
        let mut pages = self.pages();
        read_document(&mut pages, loc, doc_id).map(Some)
    }

    /// Обновление: новая версия в новом слоте.
    pub fn update<R: Record>(&mut self, collection: &str, doc_id: u64, rec: &R) -> Result<()> {
        self.db.check_writable()?;
        self.tx.require_active()?;
        let (entry, _meta) = self.collection_entry(collection)?;

        let exists = match self.tx.pending_doc(collection, doc_id) {
            Some(None) => false,
            Some(Some(_)) => true,
            None => self
                .db
                .resolve_visible(collection, doc_id, self.tx.snapshot_tx_id)?
                .is_some(),
        };
        if !exists {
            return Err(GaldrError::not_found(format!(
                "document {} in '{}'",
                doc_id, collection
            )));
        }

        for d in entry.fields.iter().filter(|d| !d.primary) {
            Self::field_of(rec, d)?;
        }

        let payload = rec.encode()?;
        let loc = {
            let mut pages = self.pages();
            heap_insert(&mut pages, entry.first_doc_page, doc_id, &payload)?
        };

        let pk = primary_key(doc_id);
        {
            let mut pages = self.pages();
            let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
            if !tree.update_value(&pk, crate::btree::LeafValue::new(loc))? {
                tree.insert(&pk, crate::btree::LeafValue::new(loc))?;
            }
        }

        self.upsert_secondary_entries(collection, rec, doc_id, loc)?;
        self.tx.pending_versions.push(PendingVersion::Upsert {
            collection: collection.to_string(),
            doc_id,
            location: loc,
        });
        Ok(())
    }

    /// Удаление; false — документа не было видно.
    pub fn delete(&mut self, collection: &str, doc_id: u64) -> Result<bool> {
        self.db.check_writable()?;
        self.tx.require_active()?;
        let (entry, _meta) = self.collection_entry(collection)?;

        let exists = match self.tx.pending_doc(collection, doc_id) {
            Some(None) => false,
            Some(Some(_)) => true,
            None => self
                .db
                .resolve_visible(collection, doc_id, self.tx.snapshot_tx_id)?
                .is_some(),
        };
        if !exists {
            return Ok(false);
        }

        // Пометка в первичном индексе — durability удаления.
        let pk = primary_key(doc_id);
        {
            let mut pages = self.pages();
            let mut tree = BTree::open(&mut pages, entry.primary_root, 9);
            if let Some(v) = tree.search(&pk)? {
                tree.update_value(&pk, v.deleted())?;
            }
        }

        self.tx.pending_versions.push(PendingVersion::Delete {
            collection: collection.to_string(),
            doc_id,
        });
        Ok(true)
    }
}

/// Чтение и декодирование документа по положению.
pub(crate) fn read_document<R: Record>(
    pages: &mut dyn crate::pager::PageAccess,
    loc: DocumentLocation,
    expect_id: u64,
) -> Result<R> {
    let (stored_id, payload) = heap_read(pages, loc)?;
    if stored_id != expect_id {
        return Err(GaldrError::corruption(format!(
            "document envelope id {} != expected {} at page {} slot {}",
            stored_id, expect_id, loc.page_id, loc.slot
        )));
    }
    R::decode(&payload)
}

/// Значение индексируемого поля из payload'а без знания типа: полный
/// payload остаётся внешним форматом, поэтому пересборка индексов по
/// существующим документам опирается на JSON-представление внешнего
/// кодека (каталожные записи используют его же).
fn extract_field(payload: &[u8], d: &FieldDescriptor) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
        GaldrError::invalid_op(format!(
            "cannot rebuild index for field '{}': payload is not self-describing ({})",
            d.name, e
        ))
    })?;
    let v = json.get(&d.name).cloned().unwrap_or(serde_json::Value::Null);
    json_to_value(v, d)
}

/// Значение поля из payload'а для остаточного фильтра Count без типа
/// (то же JSON-допущение, что и у extract_field).
pub(crate) fn field_from_payload(
    payload: &[u8],
    field: &str,
    kind: crate::record::FieldKind,
) -> Result<Value> {
    let d = FieldDescriptor::new(field, kind);
    extract_field(payload, &d)
}

fn json_to_value(v: serde_json::Value, d: &FieldDescriptor) -> Result<Value> {
    use crate::record::FieldKind as K;
    let err = || {
        GaldrError::invalid_arg(format!(
            "field '{}' has JSON value incompatible with {:?}",
            d.name, d.kind
        ))
    };
    if v.is_null() {
        return Ok(Value::Null);
    }
    Ok(match d.kind {
        K::Bool => Value::Bool(v.as_bool().ok_or_else(err)?),
        K::U8 => Value::U8(v.as_u64().ok_or_else(err)? as u8),
        K::U16 => Value::U16(v.as_u64().ok_or_else(err)? as u16),
        K::U32 => Value::U32(v.as_u64().ok_or_else(err)? as u32),
        K::U64 => Value::U64(v.as_u64().ok_or_else(err)?),
        K::I8 => Value::I8(v.as_i64().ok_or_else(err)? as i8),
        K::I16 => Value::I16(v.as_i64().ok_or_else(err)? as i16),
        K::I32 => Value::I32(v.as_i64().ok_or_else(err)? as i32),
        K::I64 => Value::I64(v.as_i64().ok_or_else(err)?),
        K::F32 => Value::F32(v.as_f64().ok_or_else(err)? as f32),
        K::F64 => Value::F64(v.as_f64().ok_or_else(err)?),
        K::Str => Value::Str(v.as_str().ok_or_else(err)?.to_string()),
        K::Char => Value::Char(
            v.as_str()
                .and_then(|s| s.chars().next())
                .ok_or_else(err)?,
        ),
        K::Timestamp => Value::Timestamp(v.as_i64().ok_or_else(err)?),
        K::Duration => Value::Duration(v.as_i64().ok_or_else(err)?),
        K::Enum => Value::Enum(v.as_u64().ok_or_else(err)?),
    })
}

// ---------- авто-коммит поверх Db ----------

impl Db {
    /// Вставка в одно-операционной транзакции.
    pub fn insert<R: Record>(&self, collection: &str, rec: &mut R) -> Result<u64> {
        let mut tx = self.begin_transaction()?;
        match tx.insert(collection, rec) {
            Ok(id) => {
                tx.commit()?;
                Ok(id)
            }
            Err(e) => {
                let _ = tx.abort();
                self.note_error(&e);
                Err(e)
            }
        }
    }

    /// Точечное чтение по свежему снапшоту.
    pub fn get_by_id<R: Record>(&self, collection: &str, doc_id: u64) -> Result<Option<R>> {
        self.check_open()?;
        let rtx = self.begin_read_only_transaction()?;
        rtx.get_by_id(collection, doc_id)
    }

    pub fn update<R: Record>(&self, collection: &str, doc_id: u64, rec: &R) -> Result<()> {
        let mut tx = self.begin_transaction()?;
        match tx.update(collection, doc_id, rec) {
            Ok(()) => tx.commit(),
            Err(e) => {
                let _ = tx.abort();
                self.note_error(&e);
                Err(e)
            }
        }
    }

    pub fn delete(&self, collection: &str, doc_id: u64) -> Result<bool> {
        let mut tx = self.begin_transaction()?;
        match tx.delete(collection, doc_id) {
            Ok(existed) => {
                tx.commit()?;
                Ok(existed)
            }
            Err(e) => {
                let _ = tx.abort();
                self.note_error(&e);
                Err(e)
            }
        }
    }
}

impl ReadTx<'_> {
    /// Чтение под снапшотом read-only транзакции.
    pub fn get_by_id<R: Record>(&self, collection: &str, doc_id: u64) -> Result<Option<R>> {
        self.db.check_open()?;
        let Some(loc) = self.db.resolve_visible(collection, doc_id, self.snapshot)? else {
            return Ok(None);
        };
        let mut pages = crate::txn::ReadPages {
            store: &self.db.store,
        };
        read_document(&mut pages, loc, doc_id).map(Some)
    }
}
