use std::path::Path;

use anyhow::Result;

use GaldrDB::Db;

pub fn run(path: &Path, json: bool) -> Result<i32> {
    let db = Db::open(path)?;
    let report = db.check()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("pages_scanned: {}", report.pages_scanned);
        println!("btree_keys:    {}", report.btree_keys);
        if !report.corrupt_pages.is_empty() {
            println!("corrupt pages: {:?}", report.corrupt_pages);
        }
        if !report.orphans.is_empty() {
            println!("orphaned collections: {:?}", report.orphans.collections);
            println!("orphaned index pages: {:?}", report.orphans.index_pages);
        }
        println!("result: {}", if report.ok() { "OK" } else { "CORRUPT" });
    }

    Ok(if report.ok() { 0 } else { 3 })
}
