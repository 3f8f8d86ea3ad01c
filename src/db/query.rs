//! db/query — планировщик и исполнитель запросов.
//!
//! Приоритет планирования:
//! 1. Equals по индексированному полю (PrimaryIndex, если поле — id);
//! 2. range-оператор по индексированному полю;
//! 3. StartsWith по индексированному строковому полю (диапазон префикса);
//! 4. полный скан коллекции.
//!
//! Предикаты выбранного поля «забираются индексом» и уходят из остаточного
//! фильтра. Запрос из одних индексных предикатов считает Count без
//! десериализации документов. Skip/Limit — после пост-фильтра; порядок
//! результатов — порядок пути доступа (возрастание ключей индекса либо
//! порядок вставки при полном скане).
//!
//! MVCC при сканах: кандидат квалифицируется сверкой положения из индекса
//! с положением видимой версии (устаревшие записи вторичного индекса и
//! старые версии в ростере отсеиваются без чтения payload'а).

use std::collections::HashMap;

use serde::Serialize;

use crate::btree::{
    composite_key, doc_id_from_composite, doc_id_from_primary, encode_field_key, key_width,
    max_field_key, min_non_null_key, prefix_bounds, BTree,
};
use crate::catalog::CollectionEntry;
use crate::errors::{GaldrError, Result};
use crate::heap::heap_iter;
use crate::record::{FieldDescriptor, FieldKind, Record, Value};
use crate::txn::{ReadPages, Transaction, TxPages};
use crate::version::DocumentLocation;

use super::core::{Db, DbTx, ReadTx};
use super::docs::read_document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Op {
    Equals,
    StartsWith,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Between,
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub field: String,
    pub op: Op,
    pub value: Value,
    /// Верхняя граница Between.
    pub value2: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanType {
    FullScan,
    PrimaryIndex,
    SecondaryIndex,
}

/// Результат Explain().
#[derive(Debug, Clone, Serialize)]
pub struct Explain {
    pub scan_type: ScanType,
    pub indexed_field: Option<String>,
    pub filters_used_by_index: usize,
    pub residual_filter_count: usize,
}

/// План: границы по ключу поля (включительность отрабатывается сверкой
/// префикса) + остаточные предикаты.
struct Plan {
    scan: ScanType,
    field: Option<String>,
    field_kind: Option<FieldKind>,
    index_root: u32,
    lo: Vec<u8>,
    lo_exclusive: bool,
    hi: Vec<u8>,
    hi_exclusive: bool,
    used: Vec<usize>,
    residual: Vec<usize>,
}

pub struct Query<'a> {
    db: &'a Db,
    tx: Option<&'a mut Transaction>,
    snapshot: u64,
    owned_snapshot: bool,
    collection: String,
    predicates: Vec<Predicate>,
    skip: usize,
    limit: Option<usize>,
}

impl Drop for Query<'_> {
    fn drop(&mut self) {
        if self.owned_snapshot {
            self.db.tx_manager().release_snapshot(self.snapshot);
        }
    }
}

impl Db {
    /// Запрос по свежему снапшоту.
    pub fn query(&self, collection: &str) -> Result<Query<'_>> {
        self.check_open()?;
        let snapshot = self.tx_manager().register_snapshot();
        Ok(Query {
            db: self,
            tx: None,
            snapshot,
            owned_snapshot: true,
            collection: collection.to_string(),
            predicates: Vec::new(),
            skip: 0,
            limit: None,
        })
    }
}

impl<'db> DbTx<'db> {
    /// Запрос под снапшотом транзакции, с её own writes.
    pub fn query(&mut self, collection: &str) -> Query<'_> {
        let snapshot = self.tx.snapshot_tx_id;
        Query {
            db: self.db,
            tx: Some(&mut self.tx),
            snapshot,
            owned_snapshot: false,
            collection: collection.to_string(),
            predicates: Vec::new(),
            skip: 0,
            limit: None,
        }
    }
}

impl ReadTx<'_> {
    pub fn query(&self, collection: &str) -> Query<'_> {
        Query {
            db: self.db,
            tx: None,
            snapshot: self.snapshot,
            owned_snapshot: false,
            collection: collection.to_string(),
            predicates: Vec::new(),
            skip: 0,
            limit: None,
        }
    }
}

impl<'a> Query<'a> {
    pub fn where_(mut self, field: &str, op: Op, value: Value) -> Self {
        self.predicates.push(Predicate {
            field: field.to_string(),
            op,
            value,
            value2: None,
        });
        self
    }

    pub fn where_between(mut self, field: &str, lo: Value, hi: Value) -> Self {
        self.predicates.push(Predicate {
            field: field.to_string(),
            op: Op::Between,
            value: lo,
            value2: Some(hi),
        });
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    // ---------- планирование ----------

    fn entry(&self) -> Result<CollectionEntry> {
        let pending: &[crate::catalog::CatalogOp] = match &self.tx {
            Some(tx) => &tx.pending_catalog,
            None => &[],
        };
        self.db
            .catalog
            .collection(pending, &self.collection)
            .map(|(e, _)| e)
            .ok_or_else(|| GaldrError::not_found(format!("collection '{}'", self.collection)))
    }

    fn descriptor<'e>(entry: &'e CollectionEntry, field: &str) -> Option<&'e FieldDescriptor> {
        entry.fields.iter().find(|d| d.name == field)
    }

    fn plan(&self, entry: &CollectionEntry) -> Result<Plan> {
        let pending: &[crate::catalog::CatalogOp] = match &self.tx {
            Some(tx) => &tx.pending_catalog,
            None => &[],
        };
        let primary_field = entry
            .fields
            .iter()
            .find(|d| d.primary)
            .map(|d| d.name.clone());
        let indexes = self.db.catalog.indexes_of(pending, &self.collection);
        let index_of = |f: &str| indexes.iter().find(|i| i.field == f);
        let is_indexed = |f: &str| primary_field.as_deref() == Some(f) || index_of(f).is_some();

        let usable = |p: &Predicate| -> bool {
            if !is_indexed(&p.field) {
                return false;
            }
            match p.op {
                Op::Equals => true,
                Op::LessThan | Op::LessThanOrEqual | Op::GreaterThan | Op::GreaterThanOrEqual
                | Op::Between => true,
                Op::StartsWith => {
                    Self::descriptor(entry, &p.field).map(|d| d.kind) == Some(FieldKind::Str)
                }
            }
        };

        // Приоритеты выбора поля.
        let chosen = self
            .predicates
            .iter()
            .position(|p| p.op == Op::Equals && usable(p))
            .or_else(|| {
                self.predicates.iter().position(|p| {
                    matches!(
                        p.op,
                        Op::LessThan
                            | Op::LessThanOrEqual
                            | Op::GreaterThan
                            | Op::GreaterThanOrEqual
                            | Op::Between
                    ) && usable(p)
                })
            })
            .or_else(|| {
                self.predicates
                    .iter()
                    .position(|p| p.op == Op::StartsWith && usable(p))
            });

        let Some(first) = chosen else {
            return Ok(Plan {
                scan: ScanType::FullScan,
                field: None,
                field_kind: None,
                index_root: 0,
                lo: Vec::new(),
                lo_exclusive: false,
                hi: Vec::new(),
                hi_exclusive: false,
                used: Vec::new(),
                residual: (0..self.predicates.len()).collect(),
            });
        };

        let field = self.predicates[first].field.clone();
        let (scan, kind, root) = if primary_field.as_deref() == Some(field.as_str()) {
            (ScanType::PrimaryIndex, FieldKind::U64, entry.primary_root)
        } else {
            let idx = index_of(&field).expect("usable implies indexed");
            (ScanType::SecondaryIndex, idx.kind, idx.root)
        };

        // Все предикаты выбранного поля, пригодные индексу, сужают диапазон.
        let mut lo = min_non_null_key(kind);
        let mut lo_excl = false;
        let mut hi = max_field_key(kind);
        let mut hi_excl = false;
        let mut used = Vec::new();
        let mut residual = Vec::new();

        for (i, p) in self.predicates.iter().enumerate() {
            if p.field != field || !usable(p) {
                residual.push(i);
                continue;
            }
            used.push(i);
            match p.op {
                Op::Equals => {
                    let k = encode_field_key(&p.value, kind)?;
                    tighten_lo(&mut lo, &mut lo_excl, &k, false);
                    tighten_hi(&mut hi, &mut hi_excl, &k, false);
                }
                Op::LessThan => {
                    let k = encode_field_key(&p.value, kind)?;
                    tighten_hi(&mut hi, &mut hi_excl, &k, true);
                }
                Op::LessThanOrEqual => {
                    let k = encode_field_key(&p.value, kind)?;
                    tighten_hi(&mut hi, &mut hi_excl, &k, false);
                }
                Op::GreaterThan => {
                    let k = encode_field_key(&p.value, kind)?;
                    tighten_lo(&mut lo, &mut lo_excl, &k, true);
                }
                Op::GreaterThanOrEqual => {
                    let k = encode_field_key(&p.value, kind)?;
                    tighten_lo(&mut lo, &mut lo_excl, &k, false);
                }
                Op::Between => {
                    let k1 = encode_field_key(&p.value, kind)?;
                    let k2 = encode_field_key(
                        p.value2.as_ref().ok_or_else(|| {
                            GaldrError::invalid_arg("Between requires an upper bound")
                        })?,
                        kind,
                    )?;
                    tighten_lo(&mut lo, &mut lo_excl, &k1, false);
                    tighten_hi(&mut hi, &mut hi_excl, &k2, false);
                }
                Op::StartsWith => {
                    let Value::Str(prefix) = &p.value else {
                        return Err(GaldrError::invalid_arg("StartsWith expects a string"));
                    };
                    let (plo, phi) = prefix_bounds(prefix)?;
                    tighten_lo(&mut lo, &mut lo_excl, &plo, false);
                    tighten_hi(&mut hi, &mut hi_excl, &phi, false);
                }
            }
        }

        Ok(Plan {
            scan,
            field: Some(field),
            field_kind: Some(kind),
            index_root: root,
            lo,
            lo_exclusive: lo_excl,
            hi,
            hi_exclusive: hi_excl,
            used,
            residual,
        })
    }

    pub fn explain(&self) -> Result<Explain> {
        let entry = self.entry()?;
        let plan = self.plan(&entry)?;
        Ok(Explain {
            scan_type: plan.scan,
            indexed_field: plan.field.clone(),
            filters_used_by_index: plan.used.len(),
            residual_filter_count: plan.residual.len(),
        })
    }

    // ---------- исполнение ----------

    /// Кандидаты в порядке пути доступа: (doc_id, положение из пути).
    fn collect_candidates(&mut self, entry: &CollectionEntry, plan: &Plan) -> Result<Vec<(u64, DocumentLocation)>> {
        let mut out: Vec<(u64, DocumentLocation)> = Vec::new();

        match plan.scan {
            ScanType::FullScan => {
                let first = entry.first_doc_page;
                let mut run = |pages: &mut dyn crate::pager::PageAccess| -> Result<()> {
                    heap_iter(pages, first, &mut |loc, doc_id, _payload| {
                        out.push((doc_id, loc));
                        Ok(true)
                    })
                };
                match &mut self.tx {
                    Some(tx) => run(&mut TxPages::new(&self.db.store, tx))?,
                    None => run(&mut ReadPages {
                        store: &self.db.store,
                    })?,
                }
            }
            ScanType::PrimaryIndex | ScanType::SecondaryIndex => {
                let kw = key_width(plan.field_kind.expect("index scan has a kind"));
                let secondary = plan.scan == ScanType::SecondaryIndex;
                let (full_lo, full_hi) = if secondary {
                    (composite_key(&plan.lo, 0), composite_key(&plan.hi, u64::MAX))
                } else {
                    (plan.lo.clone(), plan.hi.clone())
                };
                let tree_kw = if secondary { kw + 8 } else { kw };

                let lo_field = plan.lo.clone();
                let lo_excl = plan.lo_exclusive;
                let hi_field = plan.hi.clone();
                let hi_excl = plan.hi_exclusive;

                let mut visit = |key: &[u8], v: crate::btree::LeafValue| -> Result<bool> {
                    let field_part = &key[..kw];
                    // Включительность границ — сверкой префикса поля.
                    if field_part < lo_field.as_slice()
                        || (lo_excl && field_part == lo_field.as_slice())
                    {
                        return Ok(true);
                    }
                    if field_part > hi_field.as_slice()
                        || (hi_excl && field_part == hi_field.as_slice())
                    {
                        return Ok(false);
                    }
                    let doc_id = if secondary {
                        doc_id_from_composite(key)
                    } else {
                        doc_id_from_primary(key)
                    };
                    out.push((doc_id, v.location()));
                    Ok(true)
                };

                match &mut self.tx {
                    Some(tx) => {
                        let mut pages = TxPages::new(&self.db.store, tx);
                        let mut tree = BTree::open(&mut pages, plan.index_root, tree_kw);
                        tree.for_each_range(&full_lo, &full_hi, &mut visit)?;
                    }
                    None => {
                        let mut pages = ReadPages {
                            store: &self.db.store,
                        };
                        let mut tree = BTree::open(&mut pages, plan.index_root, tree_kw);
                        tree.for_each_range(&full_lo, &full_hi, &mut visit)?;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Квалификация кандидата: видимое положение документа, с наложением
    /// own writes транзакции. None — документ не видим.
    fn qualify(
        &self,
        overlay: &HashMap<u64, Option<DocumentLocation>>,
        doc_id: u64,
    ) -> Result<Option<DocumentLocation>> {
        if let Some(pending) = overlay.get(&doc_id) {
            return Ok(*pending);
        }
        self.db
            .resolve_visible(&self.collection, doc_id, self.snapshot)
    }

    /// Прогнать запрос; on_match получает (doc_id, видимое положение).
    fn run(
        &mut self,
        need_payload_match: bool,
        mut on_match: impl FnMut(&mut Self, u64, DocumentLocation) -> Result<bool>,
    ) -> Result<()> {
        let entry = self.entry()?;
        let plan = self.plan(&entry)?;
        let overlay = match &self.tx {
            Some(tx) => tx.pending_docs_in(&self.collection),
            None => HashMap::new(),
        };

        let candidates = self.collect_candidates(&entry, &plan)?;
        let mut seen_pending: std::collections::HashSet<u64> = std::collections::HashSet::new();

        for (doc_id, path_loc) in candidates {
            let Some(vis) = self.qualify(&overlay, doc_id)? else {
                continue;
            };
            // Индексная/скановая запись соответствует видимой версии, если
            // указывает на неё же (устаревшие записи отсеиваются).
            let require_match =
                need_payload_match || plan.scan == ScanType::SecondaryIndex;
            if require_match && vis != path_loc {
                continue;
            }
            if overlay.contains_key(&doc_id) && !seen_pending.insert(doc_id) {
                continue;
            }
            if !on_match(self, doc_id, vis)? {
                return Ok(());
            }
        }
        Ok(())
    }

    fn residual_matches<R: Record>(
        entry: &CollectionEntry,
        plan: &Plan,
        predicates: &[Predicate],
        rec: &R,
    ) -> Result<bool> {
        for &i in &plan.residual {
            let p = &predicates[i];
            let kind = Self::descriptor(entry, &p.field)
                .map(|d| d.kind)
                .or_else(|| p.value.kind());
            let doc_v = rec.field_value(&p.field).unwrap_or(Value::Null);
            if !eval_predicate(&doc_v, p, kind)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn read_record<R: Record>(&mut self, doc_id: u64, loc: DocumentLocation) -> Result<R> {
        match &mut self.tx {
            Some(tx) => {
                let mut pages = TxPages::new(&self.db.store, tx);
                read_document(&mut pages, loc, doc_id)
            }
            None => {
                let mut pages = ReadPages {
                    store: &self.db.store,
                };
                read_document(&mut pages, loc, doc_id)
            }
        }
    }

    /// Материализовать результаты в порядке пути доступа.
    pub fn to_list<R: Record>(&mut self) -> Result<Vec<R>> {
        let entry = self.entry()?;
        let plan = self.plan(&entry)?;
        let predicates = self.predicates.clone();
        let skip = self.skip;
        let limit = self.limit;

        let mut out: Vec<R> = Vec::new();
        let mut matched = 0usize;
        self.run(plan.scan == ScanType::FullScan, |q, doc_id, loc| {
            let rec: R = q.read_record(doc_id, loc)?;
            if !Self::residual_matches(&entry, &plan, &predicates, &rec)? {
                return Ok(true);
            }
            matched += 1;
            if matched <= skip {
                return Ok(true);
            }
            out.push(rec);
            if let Some(l) = limit {
                if out.len() >= l {
                    return Ok(false);
                }
            }
            Ok(true)
        })?;
        Ok(out)
    }

    pub fn first_or_default<R: Record>(&mut self) -> Result<Option<R>> {
        let saved = self.limit;
        self.limit = Some(1);
        let list = self.to_list::<R>()?;
        self.limit = saved;
        Ok(list.into_iter().next())
    }

    /// Count: без десериализации, когда остаточных предикатов нет.
    pub fn count(&mut self) -> Result<usize> {
        let entry = self.entry()?;
        let plan = self.plan(&entry)?;

        if plan.residual.is_empty() {
            let skip = self.skip;
            let limit = self.limit;
            let mut matched = 0usize;
            let mut counted = 0usize;
            self.run(plan.scan == ScanType::FullScan, |_q, _doc_id, _loc| {
                matched += 1;
                if matched <= skip {
                    return Ok(true);
                }
                counted += 1;
                if let Some(l) = limit {
                    if counted >= l {
                        return Ok(false);
                    }
                }
                Ok(true)
            })?;
            return Ok(counted);
        }

        // Остаточный фильтр требует декодирования — считаем через to_list
        // нельзя (нужен тип); остаточные предикаты без типа оцениваются по
        // JSON-представлению payload'а, как при пересборке индексов.
        let predicates = self.predicates.clone();
        let skip = self.skip;
        let limit = self.limit;
        let mut matched = 0usize;
        let mut counted = 0usize;
        self.run(plan.scan == ScanType::FullScan, |q, doc_id, loc| {
            let payload = {
                let raw = match &mut q.tx {
                    Some(tx) => {
                        let mut pages = TxPages::new(&q.db.store, tx);
                        crate::heap::heap_read(&mut pages, loc)?
                    }
                    None => {
                        let mut pages = ReadPages {
                            store: &q.db.store,
                        };
                        crate::heap::heap_read(&mut pages, loc)?
                    }
                };
                debug_assert_eq!(raw.0, doc_id);
                raw.1
            };
            let mut ok = true;
            for &i in &plan.residual {
                let p = &predicates[i];
                let kind = Self::descriptor(&entry, &p.field)
                    .map(|d| d.kind)
                    .or_else(|| p.value.kind())
                    .ok_or_else(|| {
                        GaldrError::invalid_arg(format!(
                            "cannot evaluate residual predicate on untyped field '{}'",
                            p.field
                        ))
                    })?;
                let doc_v = super::docs::field_from_payload(&payload, &p.field, kind)?;
                if !eval_predicate(&doc_v, p, Some(kind))? {
                    ok = false;
                    break;
                }
            }
            if !ok {
                return Ok(true);
            }
            matched += 1;
            if matched <= skip {
                return Ok(true);
            }
            counted += 1;
            if let Some(l) = limit {
                if counted >= l {
                    return Ok(false);
                }
            }
            Ok(true)
        })?;
        Ok(counted)
    }
}

// ---------- границы ----------

fn tighten_lo(lo: &mut Vec<u8>, lo_excl: &mut bool, k: &[u8], excl: bool) {
    if k > lo.as_slice() || (k == lo.as_slice() && excl) {
        *lo = k.to_vec();
        *lo_excl = excl;
    }
}

fn tighten_hi(hi: &mut Vec<u8>, hi_excl: &mut bool, k: &[u8], excl: bool) {
    if k < hi.as_slice() || (k == hi.as_slice() && excl) {
        *hi = k.to_vec();
        *hi_excl = excl;
    }
}

/// Остаточный предикат над значением поля. Null не проходит range-операторы
/// и StartsWith; Equals(Null) совпадает только с Null.
pub(crate) fn eval_predicate(doc_v: &Value, p: &Predicate, kind: Option<FieldKind>) -> Result<bool> {
    if doc_v.is_null() || p.value.is_null() {
        return Ok(match p.op {
            Op::Equals => doc_v.is_null() && p.value.is_null(),
            _ => false,
        });
    }
    if p.op == Op::StartsWith {
        return match (doc_v, &p.value) {
            (Value::Str(s), Value::Str(prefix)) => Ok(s.starts_with(prefix.as_str())),
            _ => Err(GaldrError::invalid_arg("StartsWith expects string operands")),
        };
    }

    let kind = kind
        .or_else(|| doc_v.kind())
        .ok_or_else(|| GaldrError::invalid_arg("untyped predicate"))?;
    let dk = encode_field_key(doc_v, kind)?;
    let pk = encode_field_key(&p.value, kind)?;
    Ok(match p.op {
        Op::Equals => dk == pk,
        Op::LessThan => dk < pk,
        Op::LessThanOrEqual => dk <= pk,
        Op::GreaterThan => dk > pk,
        Op::GreaterThanOrEqual => dk >= pk,
        Op::Between => {
            let hi = p
                .value2
                .as_ref()
                .ok_or_else(|| GaldrError::invalid_arg("Between requires an upper bound"))?;
            if hi.is_null() {
                return Ok(false);
            }
            let hk = encode_field_key(hi, kind)?;
            dk >= pk && dk <= hk
        }
        Op::StartsWith => unreachable!("handled above"),
    })
}
