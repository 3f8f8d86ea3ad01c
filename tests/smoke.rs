mod common;

use anyhow::Result;

use GaldrDB::{Db, GaldrConfig, GaldrError};

use common::{cleanup, unique_path, Person};

#[test]
fn smoke_create_insert_get_update_delete_reopen() -> Result<()> {
    let path = unique_path("smoke");

    // 1) create + schema
    {
        let db = Db::create_with_config(&path, GaldrConfig::default())?;
        db.create_collection::<Person>("people")?;
        assert_eq!(db.get_collection_names()?, vec!["people".to_string()]);
        assert_eq!(
            db.get_index_names("people")?,
            vec![
                "age".to_string(),
                "name".to_string(),
                "nullable_int".to_string()
            ]
        );

        // 2) insert: id присваивается движком
        let mut quinn = Person::new("Quinn", 33);
        let id = db.insert("people", &mut quinn)?;
        assert_eq!(id, 1);
        assert_eq!(quinn.id, 1);

        let mut riley = Person::new("Riley", 27);
        let id2 = db.insert("people", &mut riley)?;
        assert_eq!(id2, 2);

        // 3) get
        let got: Person = db.get_by_id("people", id)?.expect("quinn must exist");
        assert_eq!(got.name, "Quinn");
        assert_eq!(got.age, 33);

        // 4) update
        let mut q2 = got.clone();
        q2.age = 34;
        db.update("people", id, &q2)?;
        let got2: Person = db.get_by_id("people", id)?.expect("still there");
        assert_eq!(got2.age, 34);

        // 5) delete
        assert!(db.delete("people", id2)?);
        assert!(db.get_by_id::<Person>("people", id2)?.is_none());
        assert!(!db.delete("people", id2)?);

        db.close()?;
    }

    // 6) reopen: данные и схема на месте
    {
        let db = Db::open(&path)?;
        let got: Person = db.get_by_id("people", 1)?.expect("quinn survives reopen");
        assert_eq!(got.name, "Quinn");
        assert_eq!(got.age, 34);
        assert!(db.get_by_id::<Person>("people", 2)?.is_none());

        // Счётчик id не переиспользует прожитые значения.
        let mut p = Person::new("Sasha", 41);
        let id3 = db.insert("people", &mut p)?;
        assert!(id3 > 2, "id {} must not collide", id3);
        db.close()?;
    }

    cleanup(&path);
    Ok(())
}

#[test]
fn duplicate_insert_is_invalid_operation() -> Result<()> {
    let path = unique_path("dup");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;

    let mut p = Person::new("One", 1);
    let id = db.insert("people", &mut p)?;

    let mut same = Person::new("Two", 2);
    same.id = id;
    match db.insert("people", &mut same) {
        Err(GaldrError::InvalidOperation(_)) => {}
        other => panic!("expected InvalidOperation, got {:?}", other.map(|_| ())),
    }

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn use_after_close_is_disposed() -> Result<()> {
    let path = unique_path("disposed");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;
    db.close()?;

    match db.get_by_id::<Person>("people", 1) {
        Err(GaldrError::Disposed) => {}
        other => panic!("expected Disposed, got {:?}", other.map(|_| ())),
    }
    cleanup(&path);
    Ok(())
}

#[test]
fn unknown_collection_is_not_found() -> Result<()> {
    let path = unique_path("nocoll");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;

    let mut p = Person::new("Ghost", 0);
    match db.insert("missing", &mut p) {
        Err(GaldrError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
    }
    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn transaction_read_your_writes_and_abort() -> Result<()> {
    let path = unique_path("txdocs");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;

    // Незакоммиченная вставка видна самой транзакции и не видна снаружи.
    let mut tx = db.begin_transaction()?;
    let mut p = Person::new("Pending", 5);
    let id = tx.insert("people", &mut p)?;
    let inside: Option<Person> = tx.get_by_id("people", id)?;
    assert_eq!(inside.unwrap().name, "Pending");
    assert!(db.get_by_id::<Person>("people", id)?.is_none());

    tx.abort()?;
    assert!(db.get_by_id::<Person>("people", id)?.is_none());

    // После коммита — видна.
    let mut tx2 = db.begin_transaction()?;
    let mut p2 = Person::new("Durable", 6);
    let id2 = tx2.insert("people", &mut p2)?;
    tx2.commit()?;
    assert_eq!(
        db.get_by_id::<Person>("people", id2)?.unwrap().name,
        "Durable"
    );

    db.close()?;
    cleanup(&path);
    Ok(())
}
