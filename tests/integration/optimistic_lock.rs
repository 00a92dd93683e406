mod common;

use common::{seed, session};
use quarry::{Predicate, QueryBuilder, Record, Result, UpdateBuilder, Value};

fn reload(session: &mut quarry::Session<quarry::SqliteExecutor>, pet: &Record) -> Result<Record> {
    let id = pet.get("id").cloned().unwrap_or(Value::Null);
    Ok(session.find_by_id("pet", id)?.expect("pet still stored"))
}

#[test]
fn stale_version_conflicts_and_fresh_row_updates() -> Result<()> {
    let mut session = session()?;
    let seeded = seed(&mut session)?;
    let leo = reload(&mut session, &seeded.pets[0])?;
    assert_eq!(leo.get("version"), Some(&Value::Int(0)));

    let mut first = leo.clone();
    first.set("name", "Leonardo");
    session.update(&mut first)?;
    assert_eq!(first.get("version"), Some(&Value::Int(1)));

    let mut stale = leo;
    stale.set("name", "Leopold");
    let err = session.update(&mut stale).unwrap_err();
    assert_eq!(err.code(), "ConcurrencyConflictError");
    assert_eq!(stale.get("version"), Some(&Value::Int(0)));

    let mut fresh = reload(&mut session, &stale)?;
    assert_eq!(fresh.get("name").and_then(Value::as_str), Some("Leonardo"));
    fresh.set("name", "Leopold");
    session.update(&mut fresh)?;
    let stored = reload(&mut session, &fresh)?;
    assert_eq!(stored.get("name").and_then(Value::as_str), Some("Leopold"));
    assert_eq!(stored.get("version"), Some(&Value::Int(2)));
    Ok(())
}

#[test]
fn stale_delete_conflicts() -> Result<()> {
    let mut session = session()?;
    let seeded = seed(&mut session)?;
    // Basil's only visit references it through a foreign key.
    session.delete(&seeded.visits[2])?;
    let basil = reload(&mut session, &seeded.pets[1])?;

    let mut bumped = basil.clone();
    session.update(&mut bumped)?;
    let err = session.delete(&basil).unwrap_err();
    assert_eq!(err.code(), "ConcurrencyConflictError");
    session.delete(&bumped)?;
    assert!(!session.exists(&QueryBuilder::new("pet").filter(Predicate::eq("name", "Basil")))?);
    Ok(())
}

#[test]
fn unversioned_missing_row_is_not_found() -> Result<()> {
    let mut session = session()?;
    let ghost = Record::new("owner")
        .with("id", 42i64)
        .with("first_name", "Nobody")
        .with("last_name", "Here");
    let err = session.delete(&ghost).unwrap_err();
    assert_eq!(err.code(), "EntityNotFound");
    let mut ghost = ghost;
    assert_eq!(session.update(&mut ghost).unwrap_err().code(), "EntityNotFound");
    Ok(())
}

#[test]
fn bulk_updates_need_a_filter_or_an_explicit_opt_in() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let err = UpdateBuilder::new("pet")
        .set("birth_date", Value::Null)
        .to_statement(session.context())
        .unwrap_err();
    assert_eq!(err.code(), "SqlTemplateException");

    let statement = UpdateBuilder::new("pet")
        .set("name", "Shared")
        .filter(Predicate::eq("owner.id", 1i64))
        .to_statement(session.context());
    // Joins are not available inside UPDATE; filter through the owning column.
    assert_eq!(statement.unwrap_err().code(), "PathResolutionError");

    let statement = UpdateBuilder::new("pet")
        .set("name", "Shared")
        .filter(Predicate::eq("owner", 1i64))
        .to_statement(session.context())?;
    assert_eq!(session.execute(&statement)?, 2);
    Ok(())
}

#[test]
fn constraint_failures_surface_with_their_cause() -> Result<()> {
    let mut session = session()?;
    let mut orphan = Record::new("pet").with("name", "Stray").with("owner_id", 77i64);
    let err = session.insert(&mut orphan).unwrap_err();
    assert_eq!(err.code(), "ConstraintViolationError");
    assert!(std::error::Error::source(&err).is_some());
    Ok(())
}
