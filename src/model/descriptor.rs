//! Validated, immutable entity metadata.

use std::collections::HashSet;

use smallvec::SmallVec;

use crate::error::{QueryError, Result};
use crate::model::decl::{EntityDecl, FieldDecl};
use crate::value::{Record, SqlType, Value};

/// Column indices of an identity or a relation's owning columns.
pub type ColumnIdxs = SmallVec<[usize; 2]>;

/// Returns true when `name` is a plain SQL identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A mapped column after flattening inline components.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// Dotted field path from the entity root (`address.city`).
    pub path: String,
    /// Column name in the table.
    pub name: String,
    pub sql_type: Option<SqlType>,
    pub nullable: bool,
    pub insertable: bool,
    pub updatable: bool,
    pub primary_key: bool,
    pub generated: bool,
    pub version: bool,
    /// Owning relation, for foreign-key columns.
    pub relation: Option<usize>,
}

/// A foreign-key relation after flattening inline components.
#[derive(Clone, Debug, PartialEq)]
pub struct Relation {
    /// Dotted field path from the entity root.
    pub path: String,
    /// Target entity name.
    pub target: String,
    /// Owning columns, aligned with the target's identity columns.
    pub columns: ColumnIdxs,
    pub nullable: bool,
    pub deferred: bool,
    pub primary_key: bool,
}

/// Navigable field tree mirroring the declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Column(usize),
    Relation(usize),
    Inline {
        component: String,
        fields: Vec<Field>,
    },
}

/// Declarative metadata for one mapped entity type.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityDescriptor {
    name: String,
    table: String,
    fields: Vec<Field>,
    columns: Vec<Column>,
    relations: Vec<Relation>,
    identity: ColumnIdxs,
    version: Option<usize>,
}

struct Flattener<'a> {
    entity: &'a str,
    columns: Vec<Column>,
    relations: Vec<Relation>,
    names: HashSet<String>,
}

impl Flattener<'_> {
    fn add_column(&mut self, column: Column) -> Result<usize> {
        if !is_identifier(&column.name) {
            return Err(QueryError::mapping(
                self.entity,
                format!("column name '{}' is not a plain identifier", column.name),
            ));
        }
        if !self.names.insert(column.name.clone()) {
            return Err(QueryError::mapping(
                self.entity,
                format!("column '{}' is mapped more than once", column.name),
            ));
        }
        self.columns.push(column);
        Ok(self.columns.len() - 1)
    }

    fn flatten(
        &mut self,
        decls: &[FieldDecl],
        prefix: &str,
        components: &mut Vec<String>,
        in_identity: bool,
    ) -> Result<Vec<Field>> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(decls.len());
        for decl in decls {
            let name = decl.field();
            if name.is_empty() || name.contains('.') {
                return Err(QueryError::mapping(
                    self.entity,
                    format!("invalid field name '{name}'"),
                ));
            }
            if !seen.insert(name.to_owned()) {
                return Err(QueryError::mapping(
                    self.entity,
                    format!("field '{name}' declared twice"),
                ));
            }
            if decl.is_primary_key() && (!prefix.is_empty() || in_identity) {
                return Err(QueryError::mapping(
                    self.entity,
                    format!("identity field '{name}' must be declared at the entity root"),
                ));
            }
            let path = if prefix.is_empty() {
                name.to_owned()
            } else {
                format!("{prefix}.{name}")
            };
            let identity = in_identity || decl.is_primary_key();
            let kind = match decl {
                FieldDecl::Column(c) => {
                    let idx = self.add_column(Column {
                        path: path.clone(),
                        name: c.column.clone().unwrap_or_else(|| c.field.clone()),
                        sql_type: c.sql_type,
                        nullable: c.nullable,
                        insertable: c.insertable,
                        updatable: c.updatable && !identity,
                        primary_key: identity,
                        generated: c.generated,
                        version: c.version,
                        relation: None,
                    })?;
                    FieldKind::Column(idx)
                }
                FieldDecl::Relation(r) => {
                    let rel_idx = self.relations.len();
                    let names: Vec<String> = if r.columns.is_empty() {
                        vec![format!("{}_id", r.field)]
                    } else {
                        r.columns.clone()
                    };
                    let mut columns = ColumnIdxs::new();
                    for (i, col) in names.iter().enumerate() {
                        let col_path = if names.len() == 1 {
                            path.clone()
                        } else {
                            format!("{path}.{i}")
                        };
                        columns.push(self.add_column(Column {
                            path: col_path,
                            name: col.clone(),
                            sql_type: None,
                            nullable: r.nullable,
                            insertable: r.insertable,
                            updatable: r.updatable && !identity,
                            primary_key: identity,
                            generated: false,
                            version: false,
                            relation: Some(rel_idx),
                        })?);
                    }
                    self.relations.push(Relation {
                        path: path.clone(),
                        target: r.target.clone(),
                        columns,
                        nullable: r.nullable,
                        deferred: r.deferred,
                        primary_key: identity,
                    });
                    FieldKind::Relation(rel_idx)
                }
                FieldDecl::Inline(i) => {
                    if components.iter().any(|c| *c == i.component.name) {
                        return Err(QueryError::mapping(
                            self.entity,
                            format!(
                                "inline component '{}' embeds itself through '{path}'",
                                i.component.name
                            ),
                        ));
                    }
                    components.push(i.component.name.clone());
                    let nested = self.flatten(&i.component.fields, &path, components, identity);
                    components.pop();
                    let nested = nested?;
                    if nested.is_empty() {
                        return Err(QueryError::mapping(
                            self.entity,
                            format!("inline component '{path}' has no fields"),
                        ));
                    }
                    FieldKind::Inline {
                        component: i.component.name.clone(),
                        fields: nested,
                    }
                }
            };
            fields.push(Field {
                name: name.to_owned(),
                kind,
            });
        }
        Ok(fields)
    }
}

impl EntityDescriptor {
    /// Validates a declaration and builds the descriptor.
    pub fn from_decl(decl: &EntityDecl) -> Result<Self> {
        let entity = decl.name.as_str();
        if entity.is_empty() {
            return Err(QueryError::mapping(entity, "entity name is empty"));
        }
        if !is_identifier(&decl.table) {
            return Err(QueryError::mapping(
                entity,
                format!("table name '{}' is not a plain identifier", decl.table),
            ));
        }
        let identity_fields: Vec<&str> = decl
            .fields
            .iter()
            .filter(|f| f.is_primary_key())
            .map(FieldDecl::field)
            .collect();
        match identity_fields.len() {
            0 => return Err(QueryError::mapping(entity, "entity declares no identity")),
            1 => {}
            _ => {
                return Err(QueryError::mapping(
                    entity,
                    format!("entity declares more than one identity: {identity_fields:?}"),
                ))
            }
        }

        let mut flattener = Flattener {
            entity,
            columns: Vec::new(),
            relations: Vec::new(),
            names: HashSet::new(),
        };
        let fields = flattener.flatten(&decl.fields, "", &mut Vec::new(), false)?;
        let Flattener {
            columns, relations, ..
        } = flattener;

        let identity: ColumnIdxs = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        let mut version = None;
        for (idx, column) in columns.iter().enumerate() {
            if column.primary_key && column.nullable {
                return Err(QueryError::mapping(
                    entity,
                    format!("identity column '{}' cannot be nullable", column.name),
                ));
            }
            if column.generated && (!column.primary_key || identity.len() != 1) {
                return Err(QueryError::mapping(
                    entity,
                    format!(
                        "column '{}' is generated but is not a single-column identity",
                        column.name
                    ),
                ));
            }
            if column.version {
                if column.primary_key || column.nullable || !column.updatable {
                    return Err(QueryError::mapping(
                        entity,
                        format!(
                            "version column '{}' must be a non-null, updatable, non-identity column",
                            column.name
                        ),
                    ));
                }
                if version.replace(idx).is_some() {
                    return Err(QueryError::mapping(
                        entity,
                        "entity declares more than one version column",
                    ));
                }
            }
        }

        Ok(Self {
            name: decl.name.clone(),
            table: decl.table.clone(),
            fields,
            columns,
            relations,
            identity,
            version,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Top-level fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// All columns, flattened, in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// All relations, flattened, in declaration order.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, idx: usize) -> &Relation {
        &self.relations[idx]
    }

    /// Identity column indices in declaration order.
    pub fn identity(&self) -> &[usize] {
        &self.identity
    }

    pub fn identity_columns(&self) -> impl Iterator<Item = &Column> + '_ {
        self.identity.iter().map(move |&i| &self.columns[i])
    }

    /// True when the database assigns the identity on insert.
    pub fn has_generated_identity(&self) -> bool {
        self.identity_columns().any(|c| c.generated)
    }

    pub fn version_column(&self) -> Option<&Column> {
        self.version.map(|i| &self.columns[i])
    }

    pub fn has_foreign_keys(&self) -> bool {
        !self.relations.is_empty()
    }

    pub fn has_inline_components(&self) -> bool {
        fn any_inline(fields: &[Field]) -> bool {
            fields
                .iter()
                .any(|f| matches!(f.kind, FieldKind::Inline { .. }))
        }
        any_inline(&self.fields)
    }

    /// Finds a top-level field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Identity values of a record, in identity column order.
    pub fn identity_values(&self, record: &Record) -> Result<Vec<Value>> {
        self.identity_columns()
            .map(|column| {
                record.get(&column.name).cloned().ok_or_else(|| {
                    QueryError::InvalidArgument(format!(
                        "{} record lacks identity column '{}'",
                        self.name, column.name
                    ))
                })
            })
            .collect()
    }

    /// True when every identity column of the record is null or absent.
    pub fn is_new(&self, record: &Record) -> bool {
        self.identity_columns()
            .all(|c| record.get(&c.name).map_or(true, Value::is_null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::decl::{ColumnDecl, ComponentDecl, InlineDecl};

    fn owner() -> EntityDecl {
        EntityDecl::new("owner", "owner")
            .id("id")
            .column("first_name")
            .inline(
                "address",
                ComponentDecl::new("Address").column("street").column("city"),
            )
            .version("version")
    }

    #[test]
    fn flattens_inline_components() {
        let descriptor = EntityDescriptor::from_decl(&owner()).expect("valid owner");
        let names: Vec<_> = descriptor.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "first_name", "street", "city", "version"]);
        assert_eq!(descriptor.columns()[3].path, "address.city");
        assert!(descriptor.has_inline_components());
        assert!(descriptor.has_generated_identity());
        assert_eq!(descriptor.version_column().map(|c| c.name.as_str()), Some("version"));
    }

    #[test]
    fn relation_defaults_owning_column() {
        let pet = EntityDecl::new("pet", "pet").id("id").relation("owner", "owner");
        let descriptor = EntityDescriptor::from_decl(&pet).expect("valid pet");
        let relation = &descriptor.relations()[0];
        assert_eq!(descriptor.column(relation.columns[0]).name, "owner_id");
        assert_eq!(descriptor.column(relation.columns[0]).path, "owner");
    }

    #[test]
    fn rejects_missing_identity() {
        let err = EntityDescriptor::from_decl(&EntityDecl::new("x", "x").column("a")).unwrap_err();
        assert_eq!(err.code(), "MappingError");
    }

    #[test]
    fn rejects_two_identities() {
        let decl = EntityDecl::new("x", "x").key("a").key("b");
        assert_eq!(
            EntityDescriptor::from_decl(&decl).unwrap_err().code(),
            "MappingError"
        );
    }

    #[test]
    fn rejects_self_embedding_component() {
        let inner = ComponentDecl::new("Node").column("value");
        let outer = ComponentDecl::new("Node").column("label").field(FieldDecl::Inline(InlineDecl {
            field: "child".into(),
            component: inner,
            primary_key: false,
        }));
        let decl = EntityDecl::new("tree", "tree").id("id").inline("root", outer);
        let err = EntityDescriptor::from_decl(&decl).unwrap_err();
        assert!(err.to_string().contains("embeds itself"), "{err}");
    }

    #[test]
    fn rejects_generated_non_identity_column() {
        let decl = EntityDecl::new("x", "x")
            .key("id")
            .column_with(ColumnDecl::new("seq").generated());
        assert_eq!(
            EntityDescriptor::from_decl(&decl).unwrap_err().code(),
            "MappingError"
        );
    }

    #[test]
    fn rejects_read_only_version() {
        let decl = EntityDecl::new("x", "x")
            .id("id")
            .column_with(ColumnDecl::new("version").version().updatable(false));
        assert_eq!(
            EntityDescriptor::from_decl(&decl).unwrap_err().code(),
            "MappingError"
        );
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let decl = EntityDecl::new("x", "x; drop table x").id("id");
        assert_eq!(
            EntityDescriptor::from_decl(&decl).unwrap_err().code(),
            "MappingError"
        );
        let decl = EntityDecl::new("x", "x").id("id").column_with(ColumnDecl::new("a").column("a b"));
        assert_eq!(
            EntityDescriptor::from_decl(&decl).unwrap_err().code(),
            "MappingError"
        );
    }

    #[test]
    fn composite_identity_through_inline_key() {
        let decl = EntityDecl::new("vet_specialty", "vet_specialty").inline_key(
            "pk",
            ComponentDecl::new("VetSpecialtyPk")
                .field(FieldDecl::Relation(crate::model::decl::RelationDecl::new("vet", "vet")))
                .field(FieldDecl::Relation(crate::model::decl::RelationDecl::new(
                    "specialty",
                    "specialty",
                ))),
        );
        let descriptor = EntityDescriptor::from_decl(&decl).expect("valid composite key");
        let identity: Vec<_> = descriptor.identity_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(identity, ["vet_id", "specialty_id"]);
        assert!(descriptor.relations().iter().all(|r| r.primary_key));
    }
}
