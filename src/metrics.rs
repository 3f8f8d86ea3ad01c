//! Lightweight global metrics for GaldrDB.
//!
//! Потокобезопасные атомарные счётчики подсистем:
//! - Транзакции: commits / conflicts / aborts
//! - WAL: appends / fsyncs / replay
//! - Pager: flushed pages / page cache hits & misses
//! - Slotted-страницы: compactions
//! - Vacuum: запуски, вычищенные версии, tombstoned-слоты

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ----- Транзакции -----
static TX_COMMITS: AtomicU64 = AtomicU64::new(0);
static TX_CONFLICTS: AtomicU64 = AtomicU64::new(0);
static TX_ABORTS: AtomicU64 = AtomicU64::new(0);

// ----- WAL -----
static WAL_APPENDS_TOTAL: AtomicU64 = AtomicU64::new(0);
static WAL_BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static WAL_FSYNC_CALLS: AtomicU64 = AtomicU64::new(0);
static WAL_REPLAY_GROUPS: AtomicU64 = AtomicU64::new(0);
static WAL_TRUNCATIONS: AtomicU64 = AtomicU64::new(0);

// ----- Pager -----
static PAGES_FLUSHED: AtomicU64 = AtomicU64::new(0);
static PAGE_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static PAGE_CACHE_MISSES: AtomicU64 = AtomicU64::new(0);

// ----- Slotted / B+-tree -----
static PAGE_COMPACTIONS: AtomicU64 = AtomicU64::new(0);
static BTREE_SPLITS: AtomicU64 = AtomicU64::new(0);

// ----- Vacuum -----
static VACUUM_RUNS: AtomicU64 = AtomicU64::new(0);
static VERSIONS_PRUNED: AtomicU64 = AtomicU64::new(0);
static SLOTS_TOMBSTONED: AtomicU64 = AtomicU64::new(0);

// ----- record_* -----

pub fn record_commit() {
    TX_COMMITS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_conflict() {
    TX_CONFLICTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_abort() {
    TX_ABORTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_wal_append(bytes: usize) {
    WAL_APPENDS_TOTAL.fetch_add(1, Ordering::Relaxed);
    WAL_BYTES_WRITTEN.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub fn record_wal_fsync() {
    WAL_FSYNC_CALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_wal_replay_group() {
    WAL_REPLAY_GROUPS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_wal_truncation() {
    WAL_TRUNCATIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_pages_flushed(n: u64) {
    PAGES_FLUSHED.fetch_add(n, Ordering::Relaxed);
}

pub fn record_page_cache_hit() {
    PAGE_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_page_cache_miss() {
    PAGE_CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_page_compaction() {
    PAGE_COMPACTIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_btree_split() {
    BTREE_SPLITS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_vacuum_run() {
    VACUUM_RUNS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_versions_pruned(n: u64) {
    VERSIONS_PRUNED.fetch_add(n, Ordering::Relaxed);
}

pub fn record_slots_tombstoned(n: u64) {
    SLOTS_TOMBSTONED.fetch_add(n, Ordering::Relaxed);
}

// ----- Снимок метрик -----

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tx_commits: u64,
    pub tx_conflicts: u64,
    pub tx_aborts: u64,
    pub wal_appends_total: u64,
    pub wal_bytes_written: u64,
    pub wal_fsync_calls: u64,
    pub wal_replay_groups: u64,
    pub wal_truncations: u64,
    pub pages_flushed: u64,
    pub page_cache_hits: u64,
    pub page_cache_misses: u64,
    pub page_compactions: u64,
    pub btree_splits: u64,
    pub vacuum_runs: u64,
    pub versions_pruned: u64,
    pub slots_tombstoned: u64,
}

/// Снять согласованный (по Relaxed) снимок всех счётчиков.
pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        tx_commits: TX_COMMITS.load(Ordering::Relaxed),
        tx_conflicts: TX_CONFLICTS.load(Ordering::Relaxed),
        tx_aborts: TX_ABORTS.load(Ordering::Relaxed),
        wal_appends_total: WAL_APPENDS_TOTAL.load(Ordering::Relaxed),
        wal_bytes_written: WAL_BYTES_WRITTEN.load(Ordering::Relaxed),
        wal_fsync_calls: WAL_FSYNC_CALLS.load(Ordering::Relaxed),
        wal_replay_groups: WAL_REPLAY_GROUPS.load(Ordering::Relaxed),
        wal_truncations: WAL_TRUNCATIONS.load(Ordering::Relaxed),
        pages_flushed: PAGES_FLUSHED.load(Ordering::Relaxed),
        page_cache_hits: PAGE_CACHE_HITS.load(Ordering::Relaxed),
        page_cache_misses: PAGE_CACHE_MISSES.load(Ordering::Relaxed),
        page_compactions: PAGE_COMPACTIONS.load(Ordering::Relaxed),
        btree_splits: BTREE_SPLITS.load(Ordering::Relaxed),
        vacuum_runs: VACUUM_RUNS.load(Ordering::Relaxed),
        versions_pruned: VERSIONS_PRUNED.load(Ordering::Relaxed),
        slots_tombstoned: SLOTS_TOMBSTONED.load(Ordering::Relaxed),
    }
}
