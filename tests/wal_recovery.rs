//! WAL: replay зафиксированных групп на открытии, отбрасывание оборванных
//! групп, checkpoint.

mod common;

use anyhow::Result;

use GaldrDB::wal::{wal_path, WalWriter};
use GaldrDB::{Db, GaldrConfig};

use common::{cleanup, unique_path, Person};

#[test]
fn wal_basic_commit_and_reopen() -> Result<()> {
    let path = unique_path("wal-basic");
    {
        let db = Db::create_with_config(&path, GaldrConfig::default().with_wal(true))?;
        db.create_collection::<Person>("people")?;
        let mut p = Person::new("Logged", 12);
        db.insert("people", &mut p)?;
        db.close()?;
    }
    {
        let db = Db::open(&path)?;
        let got: Person = db.get_by_id("people", 1)?.expect("survives reopen");
        assert_eq!(got.name, "Logged");
        db.close()?;
    }
    cleanup(&path);
    Ok(())
}

#[test]
fn replay_applies_barrier_terminated_groups_only() -> Result<()> {
    let path = unique_path("wal-replay");
    let page_size = 4096usize;

    // База с WAL, закрытая чисто (checkpoint усёк лог).
    {
        let db = Db::create_with_config(&path, GaldrConfig::default().with_wal(true))?;
        db.close()?;
    }

    // Эмуляция сбоя: группа страниц попала в WAL, но не в основной файл.
    let target_page: u32 = 300;
    let mut image = vec![0u8; page_size];
    image[1] = 0xAB;
    image[page_size - 1] = 0xCD;

    let torn_page: u32 = 301;
    let mut torn_image = vec![0u8; page_size];
    torn_image[1] = 0xEE;

    {
        let mut w = WalWriter::open_or_create(&wal_path(&path))?;
        // Полная группа с барьером.
        w.append_page(1_000_000, target_page, &image)?;
        w.append_barrier(1_000_000)?;
        // Оборванная группа без барьера.
        w.append_page(1_000_001, torn_page, &torn_image)?;
        w.fsync()?;
    }

    {
        let db = Db::open(&path)?;
        let store = db.page_store();
        let applied = store.read(target_page, None)?;
        assert_eq!(applied[1], 0xAB);
        assert_eq!(applied[page_size - 1], 0xCD);

        // Группа без барьера отброшена.
        let dropped = store.read(torn_page, None)?;
        assert!(dropped.iter().all(|&b| b == 0));

        // Счётчик транзакций поднят выше применённого commit id.
        assert!(db.tx_manager().peek_next_tx_id() > 1_000_000);
        db.close()?;
    }
    cleanup(&path);
    Ok(())
}

#[test]
fn replay_skips_groups_below_checkpoint() -> Result<()> {
    let path = unique_path("wal-ckpt");
    {
        let db = Db::create_with_config(&path, GaldrConfig::default().with_wal(true))?;
        db.close()?;
    }

    let page: u32 = 400;
    let mut image = vec![0u8; 4096];
    image[1] = 0x55;

    {
        let mut w = WalWriter::open_or_create(&wal_path(&path))?;
        // checkpoint выше commit id группы: replay обязан её пропустить.
        w.truncate_to_header(2_000_000)?;
        w.append_page(1_500_000, page, &image)?;
        w.append_barrier(1_500_000)?;
        w.fsync()?;
    }

    {
        let db = Db::open(&path)?;
        let raw = db.page_store().read(page, None)?;
        assert!(raw.iter().all(|&b| b == 0), "stale group must be skipped");
        db.close()?;
    }
    cleanup(&path);
    Ok(())
}

#[test]
fn checkpoint_reports_wal_presence() -> Result<()> {
    let with_wal = unique_path("wal-yes");
    {
        let db = Db::create_with_config(&with_wal, GaldrConfig::default().with_wal(true))?;
        assert!(db.checkpoint()?);
        db.close()?;
    }
    cleanup(&with_wal);

    let without = unique_path("wal-no");
    {
        let db = Db::create_with_config(&without, GaldrConfig::default())?;
        assert!(!db.checkpoint()?);
        db.close()?;
    }
    cleanup(&without);
    Ok(())
}
