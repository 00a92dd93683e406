//! Derived queries: turns a declared method name plus its parameter kinds into
//! a predicate tree over an entity.
//!
//! ```text
//! (find|read|get|query|stream|count|exists|delete|remove)
//!     [All] [Distinct] [(First|Top)[N]]
//!     By <Property><Operator> ((And|Or) <Property><Operator>)*
//!     [OrderBy (<Property>[Asc|Desc])+]
//! ```
//!
//! Properties are camel-case field paths resolved against the descriptors,
//! through relations and inline components (`OwnerAddressCity`). `And` binds
//! tighter than `Or`.

use std::sync::Arc;

use crate::context::Context;
use crate::error::{QueryError, Result};
use crate::model::{EntityDescriptor, Field, FieldKind};
use crate::query::builder::QueryBuilder;
use crate::query::compiler::Statement;
use crate::query::dml::DeleteBuilder;
use crate::query::metamodel::Metamodel;
use crate::query::predicate::{Operand, Operator, Predicate};
use crate::query::template::ColumnRef;
use crate::value::{Record, Value};

/// What a derived method does with the matching rows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Subject {
    Find,
    Count,
    Exists,
    Delete,
}

/// Declared shape of one method parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParamKind {
    /// Single scalar value.
    Scalar,
    /// Collection of scalars.
    Collection,
    /// Entity instance.
    Entity,
}

/// Argument bound to a derived method call.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Scalar(Value),
    Collection(Vec<Value>),
    Entity(Record),
}

impl Arg {
    pub fn kind(&self) -> ParamKind {
        match self {
            Arg::Scalar(_) => ParamKind::Scalar,
            Arg::Collection(_) => ParamKind::Collection,
            Arg::Entity(_) => ParamKind::Entity,
        }
    }
}

macro_rules! scalar_arg {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for Arg {
                fn from(value: $source) -> Self {
                    Arg::Scalar(value.into())
                }
            }
        )*
    };
}

scalar_arg!(Value, &str, String, bool, i64, i32, f64, Vec<u8>, &[u8]);

/// One `<Property><Operator>` part of a method name.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub path: Metamodel,
    pub op: Operator,
}

impl Condition {
    fn arity(&self) -> usize {
        match self.op {
            Operator::Between => 2,
            op if op.arity() == Some(0) => 0,
            _ => 1,
        }
    }
}

/// Parsed method name, validated against the entity and parameter kinds.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedQuery {
    pub entity: String,
    pub subject: Subject,
    pub distinct: bool,
    pub limit: Option<u64>,
    /// Disjunction of conjunctions.
    pub conditions: Vec<Vec<Condition>>,
    pub order: Vec<(Metamodel, bool)>,
    params: Vec<ParamKind>,
}

const SUFFIXES: &[(&[&str], Operator)] = &[
    (&["Is", "Not", "Null"], Operator::IsNotNull),
    (&["Greater", "Than", "Equal"], Operator::GreaterOrEqual),
    (&["Less", "Than", "Equal"], Operator::LessOrEqual),
    (&["Is", "Null"], Operator::IsNull),
    (&["Not", "Null"], Operator::IsNotNull),
    (&["Not", "Like"], Operator::NotLike),
    (&["Not", "In"], Operator::NotIn),
    (&["Greater", "Than"], Operator::Greater),
    (&["Less", "Than"], Operator::Less),
    (&["Is", "True"], Operator::IsTrue),
    (&["Is", "False"], Operator::IsFalse),
    (&["Null"], Operator::IsNull),
    (&["Like"], Operator::Like),
    (&["In"], Operator::In),
    (&["Between"], Operator::Between),
    (&["Not"], Operator::NotEquals),
    (&["True"], Operator::IsTrue),
    (&["False"], Operator::IsFalse),
    (&["Equals"], Operator::Equals),
    (&["Is"], Operator::Equals),
];

impl DerivedQuery {
    /// Parses `method` for `entity`, checking that `params` line up with the
    /// conditions it declares.
    pub fn parse(ctx: &Context, entity: &str, method: &str, params: &[ParamKind]) -> Result<Self> {
        let descriptor = ctx.descriptor(entity)?;
        let words = camel_words(method);
        let invalid = |message: &str| {
            QueryError::InvalidArgument(format!("derived method '{method}': {message}"))
        };
        let (subject_word, rest) = words
            .split_first()
            .ok_or_else(|| invalid("empty method name"))?;
        let subject = match subject_word.as_str() {
            "find" | "read" | "get" | "query" | "stream" => Subject::Find,
            "count" => Subject::Count,
            "exists" => Subject::Exists,
            "delete" | "remove" => Subject::Delete,
            other => return Err(invalid(&format!("unknown subject '{other}'"))),
        };

        let by = rest.iter().position(|w| w == "By");
        let (modifiers, body) = match by {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        let mut distinct = false;
        let mut limit = None;
        let mut i = 0;
        while i < modifiers.len() {
            match modifiers[i].as_str() {
                "All" => {}
                "Distinct" => distinct = true,
                "First" | "Top" => {
                    let count = modifiers
                        .get(i + 1)
                        .and_then(|w| w.parse::<u64>().ok());
                    if count.is_some() {
                        i += 1;
                    }
                    limit = Some(count.unwrap_or(1));
                }
                other => return Err(invalid(&format!("unexpected '{other}' before By"))),
            }
            i += 1;
        }
        if limit.is_some() && subject != Subject::Find {
            return Err(invalid("First/Top only apply to find methods"));
        }

        let order_at = body
            .windows(2)
            .position(|pair| pair[0] == "Order" && pair[1] == "By");
        let (filter_words, order_words) = match order_at {
            Some(pos) => (&body[..pos], &body[pos + 2..]),
            None => (body, &body[body.len()..]),
        };
        if by.is_some() && filter_words.is_empty() && order_at.is_none() {
            return Err(invalid("By names no property"));
        }

        let mut conditions = Vec::new();
        if !filter_words.is_empty() {
            for group in split_on(filter_words, "Or") {
                let mut conjunction = Vec::new();
                for part in split_on(group, "And") {
                    if part.is_empty() {
                        return Err(invalid("dangling And/Or"));
                    }
                    conjunction.push(parse_condition(ctx, &descriptor, part, method)?);
                }
                conditions.push(conjunction);
            }
        }

        let mut order = Vec::new();
        let mut start = 0;
        for (i, word) in order_words.iter().enumerate() {
            if word == "Asc" || word == "Desc" {
                let property = &order_words[start..i];
                order.push((resolve(ctx, &descriptor, property, method)?, word == "Desc"));
                start = i + 1;
            }
        }
        if start < order_words.len() {
            order.push((resolve(ctx, &descriptor, &order_words[start..], method)?, false));
        }
        if order_at.is_some() && order.is_empty() {
            return Err(invalid("OrderBy names no property"));
        }

        let query = DerivedQuery {
            entity: descriptor.name().to_owned(),
            subject,
            distinct,
            limit,
            conditions,
            order,
            params: params.to_vec(),
        };
        query.check_params(method)?;
        Ok(query)
    }

    fn flat_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter().flatten()
    }

    fn check_params(&self, method: &str) -> Result<()> {
        let expected: usize = self.flat_conditions().map(Condition::arity).sum();
        if expected != self.params.len() {
            return Err(QueryError::InvalidArgument(format!(
                "derived method '{method}' takes {expected} parameter(s), {} declared",
                self.params.len()
            )));
        }
        let mut params = self.params.iter();
        for condition in self.flat_conditions() {
            for _ in 0..condition.arity() {
                let Some(&kind) = params.next() else { break };
                let ok = match condition.op {
                    Operator::In | Operator::NotIn => kind == ParamKind::Collection,
                    Operator::Equals | Operator::NotEquals => kind != ParamKind::Collection,
                    _ => kind == ParamKind::Scalar,
                };
                if !ok {
                    return Err(QueryError::InvalidArgument(format!(
                        "derived method '{method}': {kind:?} parameter cannot feed {:?} on '{}'",
                        condition.op, condition.path
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of arguments a call binds.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Builds the predicate tree for one call.
    pub fn predicate(&self, args: &[Arg]) -> Result<Option<Predicate>> {
        if args.len() != self.params.len() {
            return Err(QueryError::InvalidArgument(format!(
                "expected {} argument(s), got {}",
                self.params.len(),
                args.len()
            )));
        }
        for (arg, kind) in args.iter().zip(&self.params) {
            if arg.kind() != *kind {
                return Err(QueryError::InvalidArgument(format!(
                    "argument {arg:?} does not match declared {kind:?}"
                )));
            }
        }
        let mut args = args.iter().cloned();
        let mut disjunction = Vec::with_capacity(self.conditions.len());
        for group in &self.conditions {
            let mut conjunction = Vec::with_capacity(group.len());
            for condition in group {
                let operands: Vec<Operand> = (&mut args)
                    .take(condition.arity())
                    .map(|arg| match arg {
                        Arg::Scalar(value) => Operand::Value(value),
                        Arg::Collection(values) => Operand::List(values),
                        Arg::Entity(record) => Operand::Entity(record),
                    })
                    .collect();
                conjunction.push(Predicate::compare(
                    ColumnRef::new(condition.path.clone()),
                    condition.op,
                    operands,
                ));
            }
            disjunction.push(match conjunction.len() {
                1 => conjunction.remove(0),
                _ => Predicate::And(conjunction),
            });
        }
        Ok(match disjunction.len() {
            0 => None,
            1 => Some(disjunction.remove(0)),
            _ => Some(Predicate::Or(disjunction)),
        })
    }

    /// Select builder for find/count/exists subjects.
    pub fn to_builder(&self, args: &[Arg]) -> Result<QueryBuilder> {
        let mut builder = QueryBuilder::new(self.entity.clone());
        if let Some(predicate) = self.predicate(args)? {
            builder = builder.filter(predicate);
        }
        if self.distinct {
            builder = builder.distinct();
        }
        for (path, desc) in &self.order {
            builder = if *desc {
                builder.order_by_desc(path.clone())
            } else {
                builder.order_by(path.clone())
            };
        }
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        Ok(builder)
    }

    /// Compiles the statement for one call.
    pub fn to_statement(&self, ctx: &Context, args: &[Arg]) -> Result<Statement> {
        match self.subject {
            Subject::Find => self.to_builder(args)?.to_statement(ctx),
            Subject::Count => self.to_builder(args)?.to_count_statement(ctx),
            Subject::Exists => self.to_builder(args)?.to_exists_statement(ctx),
            Subject::Delete => {
                let delete = DeleteBuilder::new(self.entity.clone());
                let delete = match self.predicate(args)? {
                    Some(predicate) => delete.filter(predicate),
                    None => delete.unsafe_all(),
                };
                delete.to_statement(ctx)
            }
        }
    }
}

fn parse_condition(
    ctx: &Context,
    descriptor: &Arc<EntityDescriptor>,
    words: &[String],
    method: &str,
) -> Result<Condition> {
    for (suffix, op) in SUFFIXES {
        if words.len() <= suffix.len() {
            continue;
        }
        let split = words.len() - suffix.len();
        if words[split..].iter().zip(suffix.iter()).all(|(w, s)| w == s) {
            if let Some(path) = lookup_path(ctx, descriptor, &words[..split]) {
                return Ok(Condition { path, op: *op });
            }
        }
    }
    Ok(Condition {
        path: resolve(ctx, descriptor, words, method)?,
        op: Operator::Equals,
    })
}

fn resolve(
    ctx: &Context,
    descriptor: &Arc<EntityDescriptor>,
    words: &[String],
    method: &str,
) -> Result<Metamodel> {
    lookup_path(ctx, descriptor, words).ok_or_else(|| {
        QueryError::path(
            words.concat(),
            format!("derived method '{method}' names no property of '{}'", descriptor.name()),
        )
    })
}

fn lookup_path(ctx: &Context, descriptor: &Arc<EntityDescriptor>, words: &[String]) -> Option<Metamodel> {
    if words.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    if walk(ctx, descriptor, descriptor.fields(), words, &mut segments) {
        Some(Metamodel::parse(&segments.join(".")))
    } else {
        None
    }
}

/// Longest-prefix match of camel words against field names, descending
/// through relations and inline components.
fn walk(
    ctx: &Context,
    descriptor: &Arc<EntityDescriptor>,
    fields: &[Field],
    words: &[String],
    segments: &mut Vec<String>,
) -> bool {
    for take in (1..=words.len()).rev() {
        let candidate = words[..take].concat().to_ascii_lowercase();
        let Some(field) = fields
            .iter()
            .find(|f| f.name.replace('_', "").to_ascii_lowercase() == candidate)
        else {
            continue;
        };
        let rest = &words[take..];
        segments.push(field.name.clone());
        if rest.is_empty() {
            return true;
        }
        let found = match &field.kind {
            FieldKind::Column(_) => false,
            FieldKind::Inline { fields, .. } => walk(ctx, descriptor, fields, rest, segments),
            FieldKind::Relation(idx) => match ctx.descriptor(&descriptor.relation(*idx).target) {
                Ok(target) => walk(ctx, &target, target.fields(), rest, segments),
                Err(_) => false,
            },
        };
        if found {
            return true;
        }
        segments.pop();
    }
    false
}

fn split_on<'w>(words: &'w [String], separator: &str) -> Vec<&'w [String]> {
    words.split(|w| w == separator).collect()
}

/// Splits `findByOwnerLastName2` into `find`, `By`, `Owner`, `Last`, `Name`, `2`.
fn camel_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in name.chars() {
        let boundary = match current.chars().last() {
            None => false,
            Some(prev) => {
                (c.is_ascii_uppercase() && !prev.is_ascii_uppercase())
                    || (c.is_ascii_digit() != prev.is_ascii_digit())
            }
        };
        if boundary {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
