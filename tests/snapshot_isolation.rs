//! Snapshot isolation поверх цепочек версий: читатели видят состояние на
//! момент своего снапшота независимо от последующих коммитов.

mod common;

use anyhow::Result;

use GaldrDB::{Db, GaldrConfig};

use common::{cleanup, unique_path, Person};

#[test]
fn snapshots_across_versions() -> Result<()> {
    let path = unique_path("mvcc");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;

    // v1
    let mut p = Person::new("Quinn v1", 30);
    let id = db.insert("people", &mut p)?;

    // T_A видит v1
    let t_a = db.begin_read_only_transaction()?;

    // v2 коммитится после начала T_A
    let mut v2 = p.clone();
    v2.name = "Quinn v2".into();
    db.update("people", id, &v2)?;

    // T_C видит v2
    let t_c = db.begin_read_only_transaction()?;

    // v3
    let mut v3 = p.clone();
    v3.name = "Quinn v3".into();
    db.update("people", id, &v3)?;

    assert_eq!(
        t_a.get_by_id::<Person>("people", id)?.unwrap().name,
        "Quinn v1"
    );
    assert_eq!(
        t_c.get_by_id::<Person>("people", id)?.unwrap().name,
        "Quinn v2"
    );
    assert_eq!(
        db.get_by_id::<Person>("people", id)?.unwrap().name,
        "Quinn v3"
    );

    drop(t_a);
    drop(t_c);
    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn delete_is_invisible_to_older_snapshot() -> Result<()> {
    let path = unique_path("mvcc-del");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;

    let mut p = Person::new("Vanishing", 50);
    let id = db.insert("people", &mut p)?;

    let before = db.begin_read_only_transaction()?;
    assert!(db.delete("people", id)?);

    // Старый снапшот дочитывает удалённый документ.
    assert_eq!(
        before.get_by_id::<Person>("people", id)?.unwrap().name,
        "Vanishing"
    );
    // Новый — уже нет.
    assert!(db.get_by_id::<Person>("people", id)?.is_none());

    drop(before);
    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn write_transaction_is_isolated_from_later_commits() -> Result<()> {
    let path = unique_path("mvcc-writer");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;

    let mut p = Person::new("Base", 1);
    let id = db.insert("people", &mut p)?;

    let mut tx = db.begin_transaction()?;
    // Конкурентный коммит после снапшота tx.
    let mut newer = p.clone();
    newer.name = "Newer".into();
    db.update("people", id, &newer)?;

    // tx держит свой снапшот.
    assert_eq!(tx.get_by_id::<Person>("people", id)?.unwrap().name, "Base");
    tx.abort()?;

    assert_eq!(db.get_by_id::<Person>("people", id)?.unwrap().name, "Newer");

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn vacuum_preserves_versions_needed_by_active_snapshots() -> Result<()> {
    let path = unique_path("mvcc-vacuum");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;

    let mut p = Person::new("Keep v1", 7);
    let id = db.insert("people", &mut p)?;

    let old = db.begin_read_only_transaction()?;
    let mut v2 = p.clone();
    v2.name = "Keep v2".into();
    db.update("people", id, &v2)?;

    // Старый снапшот жив: его версию vacuum не трогает.
    db.vacuum()?;
    assert_eq!(
        old.get_by_id::<Person>("people", id)?.unwrap().name,
        "Keep v1"
    );
    drop(old);

    // Снапшот отпущен: старая версия подлежит вычистке.
    let stats = db.vacuum()?;
    assert!(stats.versions_pruned >= 1);
    assert_eq!(
        db.get_by_id::<Person>("people", id)?.unwrap().name,
        "Keep v2"
    );

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn concurrent_readers_see_consistent_documents() -> Result<()> {
    let path = unique_path("mvcc-threads");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;

    let n = 64u64;
    for i in 0..n {
        let mut p = Person::new(&format!("P{:03}", i), i as i32);
        db.insert("people", &mut p)?;
    }

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for i in 1..=n {
                    let got: Option<Person> = db.get_by_id("people", i).expect("read must not fail");
                    let got = got.expect("document must exist");
                    assert_eq!(got.id, i);
                    assert_eq!(got.age, (i - 1) as i32);
                }
            });
        }
    });

    db.close()?;
    cleanup(&path);
    Ok(())
}
