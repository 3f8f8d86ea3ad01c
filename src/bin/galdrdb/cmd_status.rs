use std::path::Path;

use anyhow::Result;

use GaldrDB::Db;

pub fn run(path: &Path, json: bool) -> Result<i32> {
    let db = Db::open(path)?;
    let st = db.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&st)?);
        return Ok(0);
    }

    println!("path:            {}", st.path);
    println!("db_id:           {}", st.db_id);
    println!("page_size:       {}", st.page_size);
    println!("next_page_id:    {}", st.next_page_id);
    println!("next_tx_id:      {}", st.next_tx_id);
    println!("wal_enabled:     {}", st.wal_enabled);
    println!("active_snapshots:{}", st.active_snapshots);
    println!("collections:     {}", st.collections.len());
    for c in &st.collections {
        println!(
            "  {} — {} doc(s), indexes: [{}]",
            c.name,
            c.documents,
            c.indexes.join(", ")
        );
    }
    Ok(0)
}
