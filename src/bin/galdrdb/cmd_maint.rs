use std::path::Path;

use anyhow::Result;

use GaldrDB::Db;

pub fn checkpoint(path: &Path) -> Result<i32> {
    let db = Db::open(path)?;
    if db.checkpoint()? {
        println!("checkpoint done");
    } else {
        println!("no wal configured");
    }
    Ok(0)
}

pub fn vacuum(path: &Path, json: bool) -> Result<i32> {
    let db = Db::open(path)?;
    let stats = db.vacuum()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "vacuum: {} version(s) pruned, {} slot(s) tombstoned, {} overflow page(s) freed, {} index entr(ies) removed, {} page(s) compacted",
            stats.versions_pruned,
            stats.slots_tombstoned,
            stats.overflow_pages_freed,
            stats.index_entries_removed,
            stats.pages_compacted
        );
    }
    Ok(0)
}

pub fn orphans(path: &Path, cleanup: bool, delete_documents: bool) -> Result<i32> {
    let db = Db::open(path)?;
    let report = db.get_orphaned_schema()?;
    if report.is_empty() {
        println!("no orphans");
        return Ok(0);
    }
    println!("orphaned collections: {:?}", report.collections);
    println!("orphaned index pages: {:?}", report.index_pages);
    if cleanup {
        let cleaned = db.cleanup_orphaned_schema(delete_documents)?;
        for c in &cleaned {
            println!("cleaned {}", c);
        }
    }
    Ok(0)
}
