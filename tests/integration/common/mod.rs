#![allow(dead_code)]

use quarry::{
    Catalog, ColumnDecl, CompileConfig, ComponentDecl, Context, EntityDecl, Record, Result,
    Session, SqlType, SqliteExecutor, Value,
};

pub const SCHEMA: &str = "
    CREATE TABLE owner (
        id INTEGER PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        street TEXT,
        city TEXT
    );
    CREATE TABLE pet (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        birth_date TEXT,
        owner_id INTEGER NOT NULL REFERENCES owner(id),
        version INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE visit (
        id INTEGER PRIMARY KEY,
        pet1_id INTEGER NOT NULL REFERENCES pet(id),
        pet2_id INTEGER REFERENCES pet(id),
        description TEXT
    );
";

pub fn petclinic() -> Catalog {
    Catalog::new()
        .with(
            EntityDecl::new("owner", "owner")
                .id("id")
                .column("first_name")
                .column("last_name")
                .inline(
                    "address",
                    ComponentDecl::new("Address").column("street").column("city"),
                ),
        )
        .with(
            EntityDecl::new("pet", "pet")
                .id("id")
                .column("name")
                .column_with(
                    ColumnDecl::new("birth_date")
                        .nullable()
                        .sql_type(SqlType::Date),
                )
                .relation("owner", "owner")
                .version("version"),
        )
        .with(
            EntityDecl::new("visit", "visit")
                .id("id")
                .relation("pet1", "pet")
                .optional_relation("pet2", "pet")
                .nullable_column("description"),
        )
}

/// Routes library events to the test harness; `RUST_LOG=quarry=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn session_with(config: CompileConfig) -> Result<Session<SqliteExecutor>> {
    init_tracing();
    let mut executor = SqliteExecutor::open_in_memory()?;
    executor.execute_batch(SCHEMA)?;
    Ok(Session::new(
        executor,
        Context::from_catalog(petclinic(), config),
    ))
}

pub fn session() -> Result<Session<SqliteExecutor>> {
    session_with(CompileConfig::default())
}

pub struct Seeded {
    pub owners: Vec<Record>,
    pub pets: Vec<Record>,
    pub visits: Vec<Record>,
}

fn owner(first: &str, last: &str, city: &str) -> Record {
    Record::new("owner")
        .with("first_name", first)
        .with("last_name", last)
        .with("city", city)
}

fn pet(name: &str, owner: &Record) -> Record {
    Record::new("pet")
        .with("name", name)
        .with("owner_id", owner.get("id").cloned().unwrap_or(Value::Null))
}

/// Three owners; George owns Leo and Basil, Betty owns Rosy, Eduardo owns
/// nothing. Visits: (Leo, Rosy), (Rosy, Leo), (Basil, -).
pub fn seed(session: &mut Session<SqliteExecutor>) -> Result<Seeded> {
    let mut owners = vec![
        owner("George", "Franklin", "Madison"),
        owner("Betty", "Davis", "Sun Prairie"),
        owner("Eduardo", "Rodriquez", "McFarland"),
    ];
    session.insert_all(&mut owners)?;
    let mut pets = vec![
        pet("Leo", &owners[0]),
        pet("Basil", &owners[0]),
        pet("Rosy", &owners[1]),
    ];
    session.insert_all(&mut pets)?;
    let id = |record: &Record| record.get("id").cloned().unwrap_or(Value::Null);
    let mut visits = vec![
        Record::new("visit")
            .with("pet1_id", id(&pets[0]))
            .with("pet2_id", id(&pets[2]))
            .with("description", "rabies shot"),
        Record::new("visit")
            .with("pet1_id", id(&pets[2]))
            .with("pet2_id", id(&pets[0])),
        Record::new("visit").with("pet1_id", id(&pets[1])),
    ];
    session.insert_all(&mut visits)?;
    Ok(Seeded {
        owners,
        pets,
        visits,
    })
}

pub fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get("name").and_then(|v| v.as_str()).map(str::to_owned))
        .collect()
}
