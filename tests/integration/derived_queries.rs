mod common;

use common::{names, seed, session};
use quarry::{Arg, DerivedOutcome, DerivedQuery, ParamKind, Result, Value};

fn records(outcome: DerivedOutcome) -> Vec<quarry::Record> {
    match outcome {
        DerivedOutcome::Records(records) => records,
        other => panic!("expected records, got {other:?}"),
    }
}

#[test]
fn find_through_relation_and_operator_suffix() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let query = DerivedQuery::parse(
        session.context(),
        "pet",
        "findByOwnerLastNameAndNameLikeOrderByNameDesc",
        &[ParamKind::Scalar, ParamKind::Scalar],
    )?;
    let found = records(session.run_derived(&query, &["Franklin".into(), "%l%".into()])?);
    assert_eq!(names(&found), ["Leo", "Basil"]);
    Ok(())
}

#[test]
fn count_exists_and_in_lists() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let ctx = session.context().clone();

    let count = DerivedQuery::parse(&ctx, "pet", "countByOwnerAddressCity", &[ParamKind::Scalar])?;
    assert_eq!(
        session.run_derived(&count, &["Sun Prairie".into()])?,
        DerivedOutcome::Count(1)
    );

    let exists = DerivedQuery::parse(&ctx, "pet", "existsByBirthDateIsNotNull", &[])?;
    assert_eq!(session.run_derived(&exists, &[])?, DerivedOutcome::Exists(false));

    let within = DerivedQuery::parse(&ctx, "pet", "findByNameIn", &[ParamKind::Collection])?;
    let found = records(session.run_derived(
        &within,
        &[Arg::Collection(vec![Value::from("Rosy"), Value::from("Leo")])],
    )?);
    assert_eq!(found.len(), 2);

    let nothing = records(session.run_derived(&within, &[Arg::Collection(Vec::new())])?);
    assert!(nothing.is_empty());
    Ok(())
}

#[test]
fn entity_argument_and_first_modifier() -> Result<()> {
    let mut session = session()?;
    let seeded = seed(&mut session)?;
    let ctx = session.context().clone();
    let by_owner = DerivedQuery::parse(&ctx, "pet", "findFirstByOwnerOrderByNameAsc", &[ParamKind::Entity])?;
    let found = records(session.run_derived(&by_owner, &[Arg::Entity(seeded.owners[0].clone())])?);
    assert_eq!(names(&found), ["Basil"]);
    Ok(())
}

#[test]
fn derived_delete_removes_matching_rows() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let ctx = session.context().clone();
    let delete = DerivedQuery::parse(&ctx, "visit", "deleteByDescriptionIsNull", &[])?;
    assert_eq!(session.run_derived(&delete, &[])?, DerivedOutcome::Deleted(2));
    let remaining = DerivedQuery::parse(&ctx, "visit", "countAll", &[])?;
    assert_eq!(session.run_derived(&remaining, &[])?, DerivedOutcome::Count(1));
    Ok(())
}

#[test]
fn malformed_declarations_fail_before_execution() -> Result<()> {
    let session = session()?;
    let ctx = session.context();
    let err = DerivedQuery::parse(ctx, "pet", "findByOwnerPhone", &[ParamKind::Scalar]).unwrap_err();
    assert_eq!(err.code(), "PathResolutionError");
    let err = DerivedQuery::parse(ctx, "pet", "findByNameBetween", &[ParamKind::Scalar]).unwrap_err();
    assert_eq!(err.code(), "InvalidArgument");
    let err = DerivedQuery::parse(ctx, "pet", "findByNameAnd", &[ParamKind::Scalar]).unwrap_err();
    assert_eq!(err.code(), "InvalidArgument");
    Ok(())
}
