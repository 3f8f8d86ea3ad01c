//! txn/manager — владелец TxId-счётчика, активных снапшотов и журнала
//! недавних коммитов.
//!
//! TxId монотонный (u64). Снапшот транзакции — последний закоммиченный
//! TxId на момент begin. Журнал недавних коммитов хранит (commit_tx_id,
//! множество страниц write-set'а) и служит только проверке конфликтов;
//! записи собираются, как только минимальный активный снапшот их догоняет.
//!
//! Проверка конфликтов и регистрация коммита выполняются под
//! commit_lock (его держит BufferedPageStore::commit_with).

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::consts::HEADER_PERSIST_INTERVAL;
use crate::errors::{GaldrError, Result};

pub(crate) struct CommitRecord {
    pub commit_tx_id: u64,
    pub pages: HashSet<u32>,
}

pub struct TxManager {
    next_tx_id: AtomicU64,
    last_committed: AtomicU64,
    active_snapshots: Mutex<BTreeMap<u64, usize>>,
    recent_commits: Mutex<VecDeque<CommitRecord>>,
    pub(crate) commit_lock: Mutex<()>,
    commits_since_persist: AtomicU64,
}

impl TxManager {
    /// next_tx_id — из заголовка файла (после replay); всё, что меньше,
    /// считается закоммиченным до открытия.
    pub fn new(next_tx_id: u64) -> Self {
        Self {
            next_tx_id: AtomicU64::new(next_tx_id),
            last_committed: AtomicU64::new(next_tx_id.saturating_sub(1)),
            active_snapshots: Mutex::new(BTreeMap::new()),
            recent_commits: Mutex::new(VecDeque::new()),
            commit_lock: Mutex::new(()),
            commits_since_persist: AtomicU64::new(0),
        }
    }

    pub fn alloc_tx_id(&self) -> u64 {
        self.next_tx_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek_next_tx_id(&self) -> u64 {
        self.next_tx_id.load(Ordering::SeqCst)
    }

    /// Последний закоммиченный TxId — снапшот для новых транзакций.
    pub fn current_snapshot(&self) -> u64 {
        self.last_committed.load(Ordering::SeqCst)
    }

    /// begin_transaction: снапшот + новый tx_id (tx_id >= snapshot всегда).
    pub fn begin(&self) -> (u64, u64) {
        let snapshot = self.register_snapshot();
        let tx_id = self.alloc_tx_id();
        (tx_id, snapshot)
    }

    /// begin_read_only: снапшот без tx_id.
    pub fn register_snapshot(&self) -> u64 {
        let mut act = self.active_snapshots.lock().expect("snapshot lock poisoned");
        // Снапшот фиксируется под блокировкой, чтобы GC не обогнал регистрацию.
        let snapshot = self.current_snapshot();
        *act.entry(snapshot).or_insert(0) += 1;
        snapshot
    }

    pub fn release_snapshot(&self, snapshot: u64) {
        let mut act = self.active_snapshots.lock().expect("snapshot lock poisoned");
        if let Some(cnt) = act.get_mut(&snapshot) {
            *cnt -= 1;
            if *cnt == 0 {
                act.remove(&snapshot);
            }
        }
    }

    /// Минимальный снапшот, который ещё может что-то видеть.
    pub fn min_active_snapshot(&self) -> u64 {
        let act = self.active_snapshots.lock().expect("snapshot lock poisoned");
        act.keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.current_snapshot())
    }

    pub fn active_snapshot_count(&self) -> usize {
        let act = self.active_snapshots.lock().expect("snapshot lock poisoned");
        act.values().sum()
    }

    /// Постраничная проверка конфликтов: транзакции, закоммиченные после
    /// нашего снапшота, не должны пересекаться с нашим write-set'ом.
    pub fn conflict_check<'a, I: IntoIterator<Item = &'a u32>>(
        &self,
        snapshot: u64,
        pages: I,
    ) -> Result<()> {
        let ours: HashSet<u32> = pages.into_iter().copied().collect();
        let recent = self.recent_commits.lock().expect("commit log poisoned");
        for rec in recent.iter() {
            if rec.commit_tx_id <= snapshot {
                continue;
            }
            if let Some(pid) = ours.iter().find(|p| rec.pages.contains(p)) {
                return Err(GaldrError::conflict(format!(
                    "page {} was committed by tx {} after snapshot {}",
                    pid, rec.commit_tx_id, snapshot
                )));
            }
        }
        Ok(())
    }

    /// Зарегистрировать коммит и собрать устаревшие записи журнала.
    pub fn note_commit(&self, commit_tx_id: u64, pages: HashSet<u32>) {
        {
            let mut recent = self.recent_commits.lock().expect("commit log poisoned");
            recent.push_back(CommitRecord {
                commit_tx_id,
                pages,
            });
        }
        self.last_committed.fetch_max(commit_tx_id, Ordering::SeqCst);

        let min = self.min_active_snapshot();
        let mut recent = self.recent_commits.lock().expect("commit log poisoned");
        while recent.front().map_or(false, |r| r.commit_tx_id <= min) {
            recent.pop_front();
        }
    }

    pub fn recent_commit_count(&self) -> usize {
        self.recent_commits.lock().expect("commit log poisoned").len()
    }

    /// true каждые HEADER_PERSIST_INTERVAL коммитов.
    pub fn due_header_persist(&self) -> bool {
        let n = self.commits_since_persist.fetch_add(1, Ordering::Relaxed) + 1;
        n % HEADER_PERSIST_INTERVAL == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_ids_are_monotonic_and_snapshot_lags() {
        let txm = TxManager::new(1);
        let (t1, s1) = txm.begin();
        let (t2, s2) = txm.begin();
        assert!(t2 > t1);
        assert_eq!(s1, 0);
        assert_eq!(s2, 0); // ничего не закоммичено

        txm.note_commit(txm.alloc_tx_id(), HashSet::from([5]));
        let (_t3, s3) = txm.begin();
        assert!(s3 > s2);
        txm.release_snapshot(s1);
        txm.release_snapshot(s2);
        txm.release_snapshot(s3);
    }

    #[test]
    fn conflict_on_intersecting_pages() {
        let txm = TxManager::new(1);
        let snap = txm.register_snapshot();
        txm.note_commit(100, HashSet::from([10, 11]));

        assert!(txm.conflict_check(snap, [10u32].iter()).is_err());
        assert!(txm.conflict_check(snap, [12u32].iter()).is_ok());
        // Снапшот после коммита не конфликтует.
        assert!(txm.conflict_check(100, [10u32].iter()).is_ok());
        txm.release_snapshot(snap);
    }

    #[test]
    fn recent_commits_are_garbage_collected() {
        let txm = TxManager::new(1);
        let old = txm.register_snapshot();
        txm.note_commit(50, HashSet::from([1]));
        assert_eq!(txm.recent_commit_count(), 1);

        // Пока жив старый снапшот, запись держится.
        txm.note_commit(60, HashSet::from([2]));
        assert_eq!(txm.recent_commit_count(), 2);

        txm.release_snapshot(old);
        txm.note_commit(70, HashSet::from([3]));
        // Новых активных снапшотов нет: min == last_committed, всё собрано.
        assert_eq!(txm.recent_commit_count(), 0);
    }
}
