//! Постраничные транзакции: read-your-writes, abort, конфликт на коммите
//! и ретрай со свежим снапшотом.

mod common;

use anyhow::Result;

use GaldrDB::{Db, GaldrConfig, GaldrError};

use common::{cleanup, unique_path};

fn page_of(db: &Db, byte: u8) -> Vec<u8> {
    let mut buf = vec![0u8; db.page_size() as usize];
    buf[0] = 0; // нейтральный тип: без checksum-логики
    buf[1] = byte;
    buf[db.page_size() as usize - 1] = byte;
    buf
}

#[test]
fn read_your_writes_with_abort() -> Result<()> {
    let path = unique_path("ryw");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    let store = db.page_store();

    let mut tx = db.begin_page_transaction()?;
    let image = page_of(&db, 0x42);
    store.write(500, &image, Some(&mut tx))?;

    // Буферизованная копия видна транзакции...
    assert_eq!(store.read(500, Some(&tx))?, image);
    // ...но не закоммиченному состоянию.
    let committed = store.read(500, None)?;
    assert!(committed.iter().all(|&b| b == 0));

    store.abort(&mut tx, db.tx_manager())?;
    let after = store.read(500, None)?;
    assert!(after.iter().all(|&b| b == 0), "abort must not flush");

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn page_conflict_then_retry_with_fresh_snapshot() -> Result<()> {
    let path = unique_path("conflict");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    let store = db.page_store();
    let txm = db.tx_manager();

    // Оба стартуют с одного снапшота и пишут одну страницу.
    let mut t1 = db.begin_page_transaction()?;
    let mut t2 = db.begin_page_transaction()?;
    assert_eq!(t1.snapshot_tx_id, t2.snapshot_tx_id);

    let img1 = page_of(&db, 0x11);
    let img2 = page_of(&db, 0x22);
    store.write(600, &img1, Some(&mut t1))?;
    store.write(600, &img2, Some(&mut t2))?;

    store.commit(&mut t2, txm)?;

    match store.commit(&mut t1, txm) {
        Err(GaldrError::PageConflict(_)) => {}
        other => panic!("expected PageConflict, got {:?}", other.map(|_| ())),
    }

    // Ретрай: abort, свежий снапшот, повторная запись — проходит.
    store.abort(&mut t1, txm)?;
    store.refresh_snapshot(&mut t1, txm)?;
    store.write(600, &img1, Some(&mut t1))?;
    store.commit(&mut t1, txm)?;

    assert_eq!(store.read(600, None)?, img1);

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn disjoint_pages_do_not_conflict() -> Result<()> {
    let path = unique_path("noconflict");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    let store = db.page_store();
    let txm = db.tx_manager();

    let mut t1 = db.begin_page_transaction()?;
    let mut t2 = db.begin_page_transaction()?;
    store.write(700, &page_of(&db, 0x01), Some(&mut t1))?;
    store.write(701, &page_of(&db, 0x02), Some(&mut t2))?;

    store.commit(&mut t2, txm)?;
    store.commit(&mut t1, txm)?;

    assert_eq!(store.read(700, None)?[1], 0x01);
    assert_eq!(store.read(701, None)?[1], 0x02);

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn write_without_tx_goes_straight_through() -> Result<()> {
    let path = unique_path("direct");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    let store = db.page_store();

    let img = page_of(&db, 0x77);
    store.write(800, &img, None)?;
    assert_eq!(store.read(800, None)?, img);

    db.close()?;
    cleanup(&path);
    Ok(())
}
