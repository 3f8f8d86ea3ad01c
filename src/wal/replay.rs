//! wal/replay — накат зафиксированных групп при открытии базы.
//!
//! Группа страниц применяется, только если завершена барьером с валидным
//! crc и её commit_tx_id больше checkpoint_tx_id. Запись другой группы до
//! барьера означает оборванную фиксацию — группа отбрасывается целиком.

use std::path::Path;

use log::{info, warn};

use crate::consts::WAL_BARRIER_PAGE_ID;
use crate::errors::{GaldrError, Result};
use crate::metrics::record_wal_replay_group;
use crate::pager::Pager;

use super::reader::WalReader;

#[derive(Debug, Default, Clone)]
pub struct ReplayStats {
    pub groups_applied: u64,
    pub pages_written: u64,
    pub max_commit_tx_id: u64,
}

pub fn wal_replay(pager: &Pager, wal_path: &Path) -> Result<ReplayStats> {
    let mut rd = WalReader::open(wal_path)?;
    let checkpoint = rd.checkpoint_tx_id;
    let ps = pager.page_size() as usize;

    let mut stats = ReplayStats::default();
    let mut group_tx: Option<u64> = None;
    let mut group: Vec<(u32, Vec<u8>)> = Vec::new();

    while let Some(rec) = rd.next_record()? {
        match group_tx {
            Some(tx) if tx != rec.commit_tx_id => {
                warn!(
                    "wal: group {} not terminated by a barrier, discarding {} page(s)",
                    tx,
                    group.len()
                );
                group.clear();
                group_tx = Some(rec.commit_tx_id);
            }
            None => group_tx = Some(rec.commit_tx_id),
            _ => {}
        }

        if rec.page_id == WAL_BARRIER_PAGE_ID {
            let tx = rec.commit_tx_id;
            if tx > checkpoint {
                for (pid, mut image) in group.drain(..) {
                    pager.write_page(pid, &mut image)?;
                    stats.pages_written += 1;
                }
                stats.groups_applied += 1;
                stats.max_commit_tx_id = stats.max_commit_tx_id.max(tx);
                record_wal_replay_group();
            } else {
                group.clear();
            }
            group_tx = None;
            continue;
        }

        if rec.image.len() != ps {
            return Err(GaldrError::corruption(format!(
                "wal image length {} != page_size {} (page {})",
                rec.image.len(),
                ps,
                rec.page_id
            )));
        }
        group.push((rec.page_id, rec.image));
    }

    if let Some(tx) = group_tx {
        warn!(
            "wal: trailing group {} without barrier, discarding {} page(s)",
            tx,
            group.len()
        );
    }

    if stats.groups_applied > 0 {
        pager.sync()?;
        info!(
            "wal replay: {} group(s), {} page(s), max commit tx {}",
            stats.groups_applied, stats.pages_written, stats.max_commit_tx_id
        );
    }
    Ok(stats)
}
