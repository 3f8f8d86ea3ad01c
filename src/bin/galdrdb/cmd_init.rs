use std::path::Path;

use anyhow::Result;

use GaldrDB::{Db, GaldrConfig};

pub fn run(path: &Path, page_size: u32, wal: bool) -> Result<i32> {
    let cfg = GaldrConfig::default()
        .with_page_size(page_size)
        .with_wal(wal);
    let db = Db::create_with_config(path, cfg)?;
    db.close()?;
    println!(
        "initialized {} (page_size {}, wal {})",
        path.display(),
        page_size,
        wal
    );
    Ok(0)
}
