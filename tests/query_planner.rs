//! Планировщик: выбор индекса, диапазон префикса, остаточный фильтр,
//! пагинация, Count без десериализации, Explain.

mod common;

use anyhow::Result;

use GaldrDB::{Db, GaldrConfig, Op, ScanType, Value};

use common::{cleanup, unique_path, Person};

fn setup(prefix: &str) -> Result<(std::path::PathBuf, Db)> {
    let path = unique_path(prefix);
    let db = Db::create_with_config(&path, GaldrConfig::default())?;
    db.create_collection::<Person>("people")?;
    Ok((path, db))
}

#[test]
fn equals_beats_starts_with_and_uses_both() -> Result<()> {
    let (path, db) = setup("plan-eq")?;
    for i in 0..10 {
        let mut p = Person::new(&format!("Test{}", i), i);
        db.insert("people", &mut p)?;
    }
    let mut other = Person::new("Other", 99);
    db.insert("people", &mut other)?;

    let mut q = db
        .query("people")?
        .where_("name", Op::StartsWith, Value::Str("Test".into()))
        .where_("name", Op::Equals, Value::Str("Test5".into()));

    let ex = q.explain()?;
    assert_eq!(ex.scan_type, ScanType::SecondaryIndex);
    assert_eq!(ex.indexed_field.as_deref(), Some("name"));
    assert_eq!(ex.filters_used_by_index, 2);
    assert_eq!(ex.residual_filter_count, 0);

    let rows = q.to_list::<Person>()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "Test5");

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn equals_on_id_uses_primary_index() -> Result<()> {
    let (path, db) = setup("plan-pk")?;
    for i in 0..5 {
        let mut p = Person::new(&format!("N{}", i), i);
        db.insert("people", &mut p)?;
    }

    let mut q = db
        .query("people")?
        .where_("id", Op::Equals, Value::U64(3));
    let ex = q.explain()?;
    assert_eq!(ex.scan_type, ScanType::PrimaryIndex);
    assert_eq!(ex.indexed_field.as_deref(), Some("id"));
    assert_eq!(ex.filters_used_by_index, 1);

    let rows = q.to_list::<Person>()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, 3);

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn range_query_excludes_nulls() -> Result<()> {
    let (path, db) = setup("plan-null")?;
    // 50 с числом, 50 с null.
    for i in 0..50i64 {
        let mut p = Person::new(&format!("Num{}", i), i as i32);
        p.nullable_int = Some(i);
        db.insert("people", &mut p)?;
    }
    for i in 0..50 {
        let mut p = Person::new(&format!("Null{}", i), i);
        p.nullable_int = None;
        db.insert("people", &mut p)?;
    }

    let mut q = db
        .query("people")?
        .where_("nullable_int", Op::GreaterThan, Value::I64(40));
    let ex = q.explain()?;
    assert_eq!(ex.scan_type, ScanType::SecondaryIndex);
    assert_eq!(ex.indexed_field.as_deref(), Some("nullable_int"));

    let rows = q.to_list::<Person>()?;
    assert_eq!(rows.len(), 9, "41..=49 inclusive");
    assert!(rows.iter().all(|p| p.nullable_int.unwrap() > 40));
    assert_eq!(q.count()?, 9);

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn between_and_pagination_in_index_order() -> Result<()> {
    let (path, db) = setup("plan-between")?;
    for i in (0..100).rev() {
        let mut p = Person::new(&format!("B{:03}", i), i);
        db.insert("people", &mut p)?;
    }

    let mut q = db
        .query("people")?
        .where_between("age", Value::I32(10), Value::I32(39))
        .skip(5)
        .limit(10);
    let rows = q.to_list::<Person>()?;

    // Порядок — возрастание ключа индекса age.
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0].age, 15);
    assert_eq!(rows[9].age, 24);

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn full_scan_with_residual_filter() -> Result<()> {
    let (path, db) = setup("plan-full")?;
    for i in 0..20 {
        let mut p = Person::new(&format!("F{}", i), i);
        db.insert("people", &mut p)?;
    }

    let mut q = db
        .query("people")?
        .where_("age", Op::GreaterThanOrEqual, Value::I32(10))
        .where_("name", Op::StartsWith, Value::Str("F1".into()));

    // Range-путь выбирает age; StartsWith по другому полю уходит в остаток.
    let ex = q.explain()?;
    assert_eq!(ex.scan_type, ScanType::SecondaryIndex);
    assert_eq!(ex.indexed_field.as_deref(), Some("age"));
    assert_eq!(ex.filters_used_by_index, 1);
    assert_eq!(ex.residual_filter_count, 1);

    let rows = q.to_list::<Person>()?;
    // age >= 10 и имя начинается с "F1": F10..F19.
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|p| p.name.starts_with("F1") && p.age >= 10));

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn no_predicates_is_a_full_scan_in_insertion_order() -> Result<()> {
    let (path, db) = setup("plan-scan")?;
    for i in 0..7 {
        let mut p = Person::new(&format!("S{}", i), 100 - i);
        db.insert("people", &mut p)?;
    }

    let mut q = db.query("people")?;
    let ex = q.explain()?;
    assert_eq!(ex.scan_type, ScanType::FullScan);
    assert_eq!(ex.indexed_field, None);

    let rows = q.to_list::<Person>()?;
    let names: Vec<&str> = rows.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["S0", "S1", "S2", "S3", "S4", "S5", "S6"]);

    assert_eq!(db.query("people")?.count()?, 7);

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn first_or_default_returns_lowest_key_match() -> Result<()> {
    let (path, db) = setup("plan-first")?;
    for i in 0..10 {
        let mut p = Person::new(&format!("W{}", i), i * 10);
        db.insert("people", &mut p)?;
    }

    let mut q = db
        .query("people")?
        .where_("age", Op::GreaterThan, Value::I32(25));
    let first: Option<Person> = q.first_or_default()?;
    assert_eq!(first.unwrap().age, 30);

    let mut none_q = db
        .query("people")?
        .where_("age", Op::GreaterThan, Value::I32(1000));
    assert!(none_q.first_or_default::<Person>()?.is_none());

    db.close()?;
    cleanup(&path);
    Ok(())
}

#[test]
fn query_sees_committed_updates_not_stale_index_entries() -> Result<()> {
    let (path, db) = setup("plan-stale")?;
    let mut p = Person::new("Old", 1);
    let id = db.insert("people", &mut p)?;

    let mut newer = p.clone();
    newer.name = "New".into();
    db.update("people", id, &newer)?;

    // Устаревшая запись индекса (Old) не должна всплыть.
    let old_rows = db
        .query("people")?
        .where_("name", Op::Equals, Value::Str("Old".into()))
        .to_list::<Person>()?;
    assert!(old_rows.is_empty());

    let new_rows = db
        .query("people")?
        .where_("name", Op::Equals, Value::Str("New".into()))
        .to_list::<Person>()?;
    assert_eq!(new_rows.len(), 1);
    assert_eq!(new_rows[0].id, id);

    db.close()?;
    cleanup(&path);
    Ok(())
}
