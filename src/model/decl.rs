//! Raw entity declarations as supplied by an external descriptor source.
//!
//! Declarations are plain data: a code generator, a hand-written table, or a
//! TOML document can produce them. They are validated once, when the
//! [`Registry`](super::Registry) turns them into an
//! [`EntityDescriptor`](super::EntityDescriptor).

use serde::{Deserialize, Serialize};

use crate::value::SqlType;

fn yes() -> bool {
    true
}

/// Declaration of one mapped entity type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDecl {
    /// Entity name used by queries and relations.
    pub name: String,
    /// Backing table.
    pub table: String,
    /// Fields in declaration order.
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

/// A declared field: a column, a relation, or an inline component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldDecl {
    Column(ColumnDecl),
    Relation(RelationDecl),
    Inline(InlineDecl),
}

impl FieldDecl {
    /// Field name as used in paths.
    pub fn field(&self) -> &str {
        match self {
            FieldDecl::Column(c) => &c.field,
            FieldDecl::Relation(r) => &r.field,
            FieldDecl::Inline(i) => &i.field,
        }
    }

    pub(crate) fn is_primary_key(&self) -> bool {
        match self {
            FieldDecl::Column(c) => c.primary_key,
            FieldDecl::Relation(r) => r.primary_key,
            FieldDecl::Inline(i) => i.primary_key,
        }
    }
}

/// A plain column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub field: String,
    /// Column name; defaults to the field name.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub sql_type: Option<SqlType>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default = "yes")]
    pub insertable: bool,
    #[serde(default = "yes")]
    pub updatable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// Value assigned by the database on insert.
    #[serde(default)]
    pub generated: bool,
    /// Optimistic-lock version column.
    #[serde(default)]
    pub version: bool,
}

impl ColumnDecl {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            column: None,
            sql_type: None,
            nullable: false,
            insertable: true,
            updatable: true,
            primary_key: false,
            generated: false,
            version: false,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn sql_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    pub fn version(mut self) -> Self {
        self.version = true;
        self
    }

    pub fn insertable(mut self, insertable: bool) -> Self {
        self.insertable = insertable;
        self
    }

    pub fn updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }
}

/// A foreign-key relation to another entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationDecl {
    pub field: String,
    /// Target entity name.
    pub target: String,
    /// Owning columns, one per target identity column. Defaults to `<field>_id`.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub nullable: bool,
    /// Lazy handle: never auto-joined.
    #[serde(default)]
    pub deferred: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default = "yes")]
    pub insertable: bool,
    #[serde(default = "yes")]
    pub updatable: bool,
}

impl RelationDecl {
    pub fn new(field: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target: target.into(),
            columns: Vec::new(),
            nullable: false,
            deferred: false,
            primary_key: false,
            insertable: true,
            updatable: true,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// An embedded component contributing columns without a join.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InlineDecl {
    pub field: String,
    pub component: ComponentDecl,
    /// The component is the entity's (composite) identity.
    #[serde(default)]
    pub primary_key: bool,
}

/// Named structure embedded through [`InlineDecl`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentDecl {
    /// Component type name; used to detect self-embedding.
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

impl ComponentDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn column(mut self, field: impl Into<String>) -> Self {
        self.fields.push(FieldDecl::Column(ColumnDecl::new(field)));
        self
    }

    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }
}

impl EntityDecl {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Database-generated single-column identity.
    pub fn id(self, field: impl Into<String>) -> Self {
        self.field(FieldDecl::Column(
            ColumnDecl::new(field)
                .primary_key()
                .generated()
                .sql_type(SqlType::Integer),
        ))
    }

    /// Caller-assigned single-column identity.
    pub fn key(self, field: impl Into<String>) -> Self {
        self.field(FieldDecl::Column(ColumnDecl::new(field).primary_key()))
    }

    pub fn column(self, field: impl Into<String>) -> Self {
        self.field(FieldDecl::Column(ColumnDecl::new(field)))
    }

    pub fn nullable_column(self, field: impl Into<String>) -> Self {
        self.field(FieldDecl::Column(ColumnDecl::new(field).nullable()))
    }

    pub fn column_with(self, column: ColumnDecl) -> Self {
        self.field(FieldDecl::Column(column))
    }

    /// Integer version column for optimistic locking.
    pub fn version(self, field: impl Into<String>) -> Self {
        self.field(FieldDecl::Column(
            ColumnDecl::new(field).version().sql_type(SqlType::Integer),
        ))
    }

    /// Mandatory relation, auto-joined with an inner join.
    pub fn relation(self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.field(FieldDecl::Relation(RelationDecl::new(field, target)))
    }

    /// Nullable relation, auto-joined with a left join.
    pub fn optional_relation(self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.field(FieldDecl::Relation(
            RelationDecl::new(field, target).nullable(),
        ))
    }

    /// Lazy-handle relation, never auto-joined.
    pub fn deferred_relation(self, field: impl Into<String>, target: impl Into<String>) -> Self {
        self.field(FieldDecl::Relation(
            RelationDecl::new(field, target).nullable().deferred(),
        ))
    }

    pub fn relation_with(self, relation: RelationDecl) -> Self {
        self.field(FieldDecl::Relation(relation))
    }

    pub fn inline(self, field: impl Into<String>, component: ComponentDecl) -> Self {
        self.field(FieldDecl::Inline(InlineDecl {
            field: field.into(),
            component,
            primary_key: false,
        }))
    }

    /// Composite identity carried by an inline component.
    pub fn inline_key(self, field: impl Into<String>, component: ComponentDecl) -> Self {
        self.field(FieldDecl::Inline(InlineDecl {
            field: field.into(),
            component,
            primary_key: true,
        }))
    }

    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }
}
