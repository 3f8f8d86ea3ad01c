//! Каталог: создание/удаление коллекций и индексов, отказ дропать непустую
//! коллекцию без флага, сверка сирот.

mod common;

use anyhow::Result;

use GaldrDB::{Db, FieldDescriptor, FieldKind, GaldrConfig, GaldrError, Op, ScanType, Value};

use common::{cleanup, unique_path, Person};

#[test]
fn create_and_drop_collection() -> Result<()> {
    let path = unique_path("cat-drop");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;

    let mut p = Person::new("Blocker", 1);
    db.insert("people", &mut p)?;

    // Непустая коллекция без флага не удаляется.
    match db.drop_collection("people", false) {
        Err(GaldrError::InvalidOperation(msg)) => {
            assert!(msg.contains("1 document(s)"), "got message: {}", msg);
            assert!(msg.contains("deleteDocuments"), "got message: {}", msg);
        }
        other => panic!("expected InvalidOperation, got {:?}", other),
    }

    db.drop_collection("people", true)?;
    assert!(db.get_collection_names()?.is_empty());
    match db.get_index_names("people") {
        Err(GaldrError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {:?}", other),
    }

    // Имя снова свободно.
    db.create_collection::<Person>("people")?;
    assert!(db.get_by_id::<Person>("people", 1)?.is_none());

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn create_index_over_existing_documents() -> Result<()> {
    let path = unique_path("cat-index");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;

    // Коллекция только с первичным индексом.
    let fields = vec![
        FieldDescriptor::new("id", FieldKind::U64).primary(),
        FieldDescriptor::new("name", FieldKind::Str),
        FieldDescriptor::new("age", FieldKind::I32),
    ];
    db.create_collection_with("crew", fields)?;
    assert!(db.get_index_names("crew")?.is_empty());

    for i in 0..30 {
        let mut p = Person::new(&format!("C{:02}", i), i);
        db.insert("crew", &mut p)?;
    }

    // Пока индекса нет — полный скан.
    let ex = db
        .query("crew")?
        .where_("age", Op::GreaterThan, Value::I32(10))
        .explain()?;
    assert_eq!(ex.scan_type, ScanType::FullScan);

    // Индекс строится по уже существующим документам.
    db.create_index("crew", "age")?;
    assert_eq!(db.get_index_names("crew")?, vec!["age".to_string()]);

    let mut q = db
        .query("crew")?
        .where_("age", Op::GreaterThan, Value::I32(10));
    assert_eq!(q.explain()?.scan_type, ScanType::SecondaryIndex);
    let rows = q.to_list::<Person>()?;
    assert_eq!(rows.len(), 19, "11..=29");

    // Повторное создание — ошибка использования.
    match db.create_index("crew", "age") {
        Err(GaldrError::InvalidOperation(_)) => {}
        other => panic!("expected InvalidOperation, got {:?}", other),
    }

    db.drop_index("crew", "age")?;
    assert!(db.get_index_names("crew")?.is_empty());

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn reserved_names_are_rejected() -> Result<()> {
    let path = unique_path("cat-reserved");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;

    for name in ["$collections", "$indexes", "$mine", ""] {
        match db.create_collection::<Person>(name) {
            Err(GaldrError::InvalidArgument(_)) => {}
            other => panic!("expected InvalidArgument for {:?}, got {:?}", name, other),
        }
    }

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn clean_database_has_no_orphans() -> Result<()> {
    let path = unique_path("cat-orphans");
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;
    for i in 0..10 {
        let mut p = Person::new(&format!("O{}", i), i);
        db.insert("people", &mut p)?;
    }

    let report = db.get_orphaned_schema()?;
    assert!(report.is_empty(), "unexpected orphans: {:?}", report);
    assert!(db.cleanup_orphaned_schema(false)?.is_empty());

    let check = db.check()?;
    assert!(check.ok(), "check must pass: {:?}", check);
    assert!(check.btree_keys >= 10);

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn schema_survives_reopen() -> Result<()> {
    let path = unique_path("cat-reopen");
    {
        let db = Db::create_with_config(&path, GaldrConfig::default())?;
        db.create_collection::<Person>("people")?;
        db.create_collection_with(
            "crew",
            vec![
                FieldDescriptor::new("id", FieldKind::U64).primary(),
                FieldDescriptor::new("name", FieldKind::Str).indexed(),
                FieldDescriptor::new("age", FieldKind::I32),
            ],
        )?;
        db.close()?;
    }
    {
        let db = Db::open(&path)?;
        assert_eq!(
            db.get_collection_names()?,
            vec!["crew".to_string(), "people".to_string()]
        );
        assert_eq!(db.get_index_names("crew")?, vec!["name".to_string()]);
        assert_eq!(
            db.get_index_names("people")?,
            vec![
                "age".to_string(),
                "name".to_string(),
                "nullable_int".to_string()
            ]
        );
        db.close()?;
    }
    cleanup(&path);
    Ok(())
}
