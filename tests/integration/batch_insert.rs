mod common;

use common::{names, seed, session, session_with};
use quarry::{CompileConfig, QueryBuilder, Record, Result, Value};

fn pet(name: &str, owner: i64) -> Record {
    Record::new("pet").with("name", name).with("owner_id", owner)
}

#[test]
fn generated_keys_follow_the_current_maximum_in_order() -> Result<()> {
    let mut session = session()?;
    let seeded = seed(&mut session)?;
    let max = seeded
        .pets
        .iter()
        .filter_map(|p| p.get("id").and_then(Value::as_int))
        .max()
        .unwrap_or(0);

    let mut batch = vec![pet("Max", 1), pet("Samantha", 2)];
    session.insert_all(&mut batch)?;
    let ids: Vec<_> = batch.iter().filter_map(|p| p.get("id").and_then(Value::as_int)).collect();
    assert_eq!(ids, [max + 1, max + 2]);
    assert!(batch.iter().all(|p| p.get("version") == Some(&Value::Int(0))));
    Ok(())
}

#[test]
fn cursor_executes_one_batch_per_step() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let input = (0..5).map(|i| pet(&format!("pup{i}"), 2));
    let mut cursor = session.insert_batched(input, Some(2))?;

    let first = cursor.next().expect("first batch")?;
    assert_eq!((first.index, first.affected), (0, 2));
    assert!(first.records.iter().all(|r| r.get("id").is_some()));
    assert_eq!(cursor.executed(), 1);

    let rest: Vec<_> = cursor.by_ref().collect::<Result<_>>()?;
    assert_eq!(rest.iter().map(|b| b.records.len()).collect::<Vec<_>>(), [2, 1]);
    assert!(cursor.is_done());
    drop(cursor);

    let pups = session.fetch_all(
        &QueryBuilder::new("pet")
            .filter(quarry::Predicate::like("name", "pup%"))
            .order_by("id"),
    )?;
    assert_eq!(names(&pups), ["pup0", "pup1", "pup2", "pup3", "pup4"]);
    Ok(())
}

#[test]
fn failed_batch_stops_the_cursor_and_keeps_earlier_batches() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    // The third record points at a missing owner.
    let input = vec![pet("a", 1), pet("b", 1), pet("c", 404), pet("d", 1)];
    let mut cursor = session.insert_batched(input, Some(2))?;
    assert!(cursor.next().expect("first batch").is_ok());
    let err = cursor.next().expect("second batch").unwrap_err();
    assert_eq!(err.code(), "ConstraintViolationError");
    assert!(cursor.next().is_none());
    drop(cursor);

    assert_eq!(session.count(&QueryBuilder::new("pet"))?, 5);
    Ok(())
}

#[test]
fn configured_batch_size_is_the_default() -> Result<()> {
    let mut session = session_with(CompileConfig::default().with_batch_size(3))?;
    seed(&mut session)?;
    let summary = session
        .insert_batched((0..7).map(|i| pet(&format!("kit{i}"), 3)), None)?
        .drain()?;
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.affected, 7);
    Ok(())
}

#[test]
fn batched_updates_bump_every_version() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let pets = session.fetch_all(&QueryBuilder::new("pet").order_by("id"))?;
    let outcomes: Vec<_> = session
        .update_batched(pets, Some(2))?
        .collect::<Result<_>>()?;
    assert_eq!(outcomes.len(), 2);
    let stored = session.fetch_all(&QueryBuilder::new("pet"))?;
    assert!(stored.iter().all(|p| p.get("version") == Some(&Value::Int(1))));
    Ok(())
}

#[test]
fn stale_record_rolls_back_its_whole_batch() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let pets = session.fetch_all(&QueryBuilder::new("pet").order_by("id"))?;
    // Someone else bumps the second pet first.
    let mut basil = pets[1].clone();
    session.update(&mut basil)?;

    let renamed: Vec<Record> = pets
        .into_iter()
        .map(|mut p| {
            let name = p.get("name").and_then(Value::as_str).unwrap_or_default().to_owned();
            p.set("name", format!("{name}!"));
            p
        })
        .collect();
    let mut cursor = session.update_batched(renamed, Some(3))?;
    let err = cursor.next().expect("one batch").unwrap_err();
    assert_eq!(err.code(), "ConcurrencyConflictError");
    let failed = cursor.take_failed().expect("failed batch handed back");
    assert_eq!(names(&failed), ["Leo!", "Basil!", "Rosy!"]);
    assert_eq!(failed[0].get("version"), Some(&Value::Int(0)));
    drop(cursor);

    let stored = session.fetch_all(&QueryBuilder::new("pet").order_by("id"))?;
    assert_eq!(names(&stored), ["Leo", "Basil", "Rosy"]);
    assert_eq!(stored[0].get("version"), Some(&Value::Int(0)));
    assert_eq!(stored[1].get("version"), Some(&Value::Int(1)));
    Ok(())
}

#[test]
fn zero_batch_size_is_rejected_up_front() -> Result<()> {
    let mut session = session()?;
    let err = session
        .insert_batched(vec![pet("x", 1)], Some(0))
        .err()
        .expect("rejected");
    assert_eq!(err.code(), "InvalidArgument");
    Ok(())
}
