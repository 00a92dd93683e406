mod common;

use common::{names, seed, session, session_with};
use quarry::exec::RecordMaterializer;
use quarry::query::Compiler;
use quarry::{
    ColumnRef, CompileConfig, Predicate, QueryBuilder, Ref, ResultMaterializer, Result, Template,
    Value,
};

#[test]
fn auto_join_filters_pets_by_owner() -> Result<()> {
    let mut session = session()?;
    let seeded = seed(&mut session)?;
    let george = seeded.owners[0].get("id").cloned().unwrap_or(Value::Null);

    let pets = session.fetch_all(
        &QueryBuilder::new("pet")
            .filter(Predicate::eq("owner.id", george.clone()))
            .order_by("name"),
    )?;
    assert_eq!(names(&pets), ["Basil", "Leo"]);
    assert!(pets.iter().all(|p| p.get("owner_id") == Some(&george)));

    let template = Template::new()
        .sql("SELECT ")
        .select("pet")
        .sql(" FROM ")
        .from("pet")
        .sql(" WHERE ")
        .column(ColumnRef::of("owner", "id"))
        .sql(" = ")
        .param(george);
    let statement = Compiler::new(session.context()).compile(&template)?;
    let rows = session.query_rows(&statement)?;
    assert_eq!(rows.len(), 2);
    let first = RecordMaterializer.materialize(&statement.projection, rows[0].clone())?;
    assert_eq!(first.entity, "pet");
    Ok(())
}

#[test]
fn two_paths_to_owner_need_a_qualifier() -> Result<()> {
    let mut session = session()?;
    let seeded = seed(&mut session)?;
    let george = seeded.owners[0].clone();

    let err = session
        .fetch_all(&QueryBuilder::new("visit").where_matches(george.clone()))
        .unwrap_err();
    assert_eq!(err.code(), "AliasAmbiguityError");
    assert!(err.is_compile_time());

    let visits = session.fetch_all(
        &QueryBuilder::new("visit")
            .where_matches_via(george, "pet1.owner")
            .order_by("id"),
    )?;
    let ids: Vec<_> = visits.iter().map(|v| v.get("id").cloned()).collect();
    assert_eq!(
        ids,
        [
            seeded.visits[0].get("id").cloned(),
            seeded.visits[2].get("id").cloned()
        ]
    );
    Ok(())
}

#[test]
fn first_strategy_takes_the_first_declared_path() -> Result<()> {
    let mut session = session_with(CompileConfig::lenient())?;
    let seeded = seed(&mut session)?;
    let betty = seeded.owners[1].clone();
    let visits = session.fetch_all(&QueryBuilder::new("visit").where_matches(betty))?;
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].get("pet1_id"), seeded.pets[2].get("id"));
    Ok(())
}

#[test]
fn counts_exists_and_pagination() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    assert_eq!(session.count(&QueryBuilder::new("pet"))?, 3);
    assert_eq!(
        session.count(&QueryBuilder::new("pet").filter(Predicate::eq("owner.address.city", "Madison")))?,
        2
    );
    assert!(session.exists(&QueryBuilder::new("pet").filter(Predicate::eq("name", "Rosy")))?);
    assert!(!session.exists(&QueryBuilder::new("pet").filter(Predicate::eq("name", "Max")))?);

    let page = session.fetch_all(
        &QueryBuilder::new("pet")
            .order_by_desc("name")
            .limit(2)
            .offset(1),
    )?;
    assert_eq!(names(&page), ["Leo", "Basil"]);
    let tail = session.fetch_all(&QueryBuilder::new("pet").order_by("name").offset(2))?;
    assert_eq!(names(&tail), ["Rosy"]);
    Ok(())
}

#[test]
fn empty_collections_follow_operator_semantics() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let none = session.fetch_all(
        &QueryBuilder::new("pet").filter(Predicate::in_list("name", Vec::<String>::new())),
    )?;
    assert!(none.is_empty());
    let all = session.fetch_all(
        &QueryBuilder::new("pet").filter(Predicate::not_in_list("name", Vec::<String>::new())),
    )?;
    assert_eq!(all.len(), 3);
    let err = session
        .fetch_all(&QueryBuilder::new("pet").filter(Predicate::eq(
            "name",
            quarry::Operand::List(Vec::new()),
        )))
        .unwrap_err();
    assert_eq!(err.code(), "SqlTemplateException");
    Ok(())
}

#[test]
fn correlated_subquery_finds_owners_with_pets() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let with_pets = QueryBuilder::new("pet").filter(Predicate::raw(
        Template::new()
            .column("owner")
            .sql(" = ")
            .column(ColumnRef::new("id").outer()),
    ));
    let owners = session.fetch_all(
        &QueryBuilder::new("owner")
            .filter_with(|p| {
                p.exists(&with_pets);
            })
            .order_by("id"),
    )?;
    let last: Vec<_> = owners
        .iter()
        .filter_map(|o| o.get("last_name").and_then(Value::as_str))
        .collect();
    assert_eq!(last, ["Franklin", "Davis"]);
    Ok(())
}

#[test]
fn deferred_handle_fetches_on_demand() -> Result<()> {
    let mut session = session()?;
    let seeded = seed(&mut session)?;
    let visit_descriptor = session.context().descriptor("visit")?;
    let mut handle = Ref::from_relation(&visit_descriptor, &seeded.visits[0], "pet2")?
        .expect("second pet set");
    assert!(!handle.is_resolved());
    let rosy = handle.fetch(&mut session)?;
    assert_eq!(rosy.get("name").and_then(Value::as_str), Some("Rosy"));
    assert!(handle.is_resolved());

    assert!(Ref::from_relation(&visit_descriptor, &seeded.visits[2], "pet2")?.is_none());
    let mut missing = Ref::unresolved("pet", 99i64);
    assert_eq!(missing.fetch(&mut session).unwrap_err().code(), "EntityNotFound");
    Ok(())
}

#[test]
fn duplicate_filters_are_rejected_before_execution() -> Result<()> {
    let mut session = session()?;
    let err = session
        .fetch_all(
            &QueryBuilder::new("pet")
                .filter(Predicate::eq("name", "Leo"))
                .filter(Predicate::eq("name", "Rosy")),
        )
        .unwrap_err();
    assert_eq!(err.code(), "SqlTemplateException");
    let combined = QueryBuilder::new("pet")
        .filter(Predicate::eq("name", "Leo"))
        .or_where(Predicate::eq("name", "Rosy"));
    assert_eq!(session.count(&combined)?, 0);
    Ok(())
}

#[test]
fn predicate_groups_need_an_explicit_junction() -> Result<()> {
    let mut session = session()?;
    seed(&mut session)?;
    let err = session
        .fetch_all(&QueryBuilder::new("pet").filter_with(|p| {
            p.eq("name", "Leo");
            p.eq("name", "Rosy");
        }))
        .unwrap_err();
    assert_eq!(err.code(), "SqlTemplateException");

    let either = session.fetch_all(
        &QueryBuilder::new("pet")
            .filter_with(|p| {
                p.or_group(|g| {
                    g.eq("name", "Leo").eq("name", "Rosy");
                });
            })
            .order_by("name"),
    )?;
    assert_eq!(names(&either), ["Leo", "Rosy"]);
    Ok(())
}
