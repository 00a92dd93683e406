//! Predicate trees.

use crate::query::metamodel::Metamodel;
use crate::query::template::{ColumnRef, Template};
use crate::value::{BoundParam, Record, SqlType, Value};

/// Comparison operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Between,
    IsTrue,
    IsFalse,
}

impl Operator {
    /// Number of values the operator consumes; `None` for set operators.
    pub fn arity(self) -> Option<usize> {
        match self {
            Operator::IsNull | Operator::IsNotNull | Operator::IsTrue | Operator::IsFalse => {
                Some(0)
            }
            Operator::Between => Some(2),
            Operator::In | Operator::NotIn => None,
            _ => Some(1),
        }
    }

    pub(crate) fn binary_sql(self) -> Option<&'static str> {
        Some(match self {
            Operator::Equals => "=",
            Operator::NotEquals => "<>",
            Operator::Less => "<",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            _ => return None,
        })
    }
}

/// Right-hand side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// Single value bound with the column's type hint.
    Value(Value),
    /// Single value with an explicit type hint.
    Typed(BoundParam),
    /// Collection; expanded according to the operator.
    List(Vec<Value>),
    /// Entity instance; compared through its identity (for relations) or the
    /// matching columns (for inline components).
    Entity(Record),
}

macro_rules! scalar_operand {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for Operand {
                fn from(value: $source) -> Self {
                    Operand::Value(value.into())
                }
            }
        )*
    };
}

scalar_operand!(Value, &str, String, bool, i64, i32, f64, Vec<u8>, &[u8]);

/// Left-hand side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Column(ColumnRef),
    Expr(Template),
}

/// Composite predicate tree over comparison leaves.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare {
        target: Target,
        op: Operator,
        operands: Vec<Operand>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Caller-written condition.
    Raw(Template),
    /// `EXISTS (...)` / `NOT EXISTS (...)`.
    Exists { query: Template, negated: bool },
    /// `col IN (...)` / `col NOT IN (...)` over a sub-query.
    InQuery {
        target: ColumnRef,
        query: Template,
        negated: bool,
    },
    /// Matches an entity instance reachable from the scope root.
    Matches {
        record: Record,
        path: Option<Metamodel>,
    },
}

impl Predicate {
    /// Generic comparison constructor.
    pub fn compare(target: impl Into<ColumnRef>, op: Operator, operands: Vec<Operand>) -> Self {
        Predicate::Compare {
            target: Target::Column(target.into()),
            op,
            operands,
        }
    }

    pub fn eq(target: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        Self::compare(target, Operator::Equals, vec![value.into()])
    }

    pub fn ne(target: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        Self::compare(target, Operator::NotEquals, vec![value.into()])
    }

    pub fn lt(target: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        Self::compare(target, Operator::Less, vec![value.into()])
    }

    pub fn le(target: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        Self::compare(target, Operator::LessOrEqual, vec![value.into()])
    }

    pub fn gt(target: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        Self::compare(target, Operator::Greater, vec![value.into()])
    }

    pub fn ge(target: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        Self::compare(target, Operator::GreaterOrEqual, vec![value.into()])
    }

    pub fn like(target: impl Into<ColumnRef>, pattern: impl Into<Value>) -> Self {
        Self::compare(target, Operator::Like, vec![Operand::Value(pattern.into())])
    }

    pub fn not_like(target: impl Into<ColumnRef>, pattern: impl Into<Value>) -> Self {
        Self::compare(target, Operator::NotLike, vec![Operand::Value(pattern.into())])
    }

    pub fn in_list<I, V>(target: impl Into<ColumnRef>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::compare(
            target,
            Operator::In,
            vec![Operand::List(values.into_iter().map(Into::into).collect())],
        )
    }

    pub fn not_in_list<I, V>(target: impl Into<ColumnRef>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::compare(
            target,
            Operator::NotIn,
            vec![Operand::List(values.into_iter().map(Into::into).collect())],
        )
    }

    pub fn between(
        target: impl Into<ColumnRef>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self::compare(
            target,
            Operator::Between,
            vec![Operand::Value(low.into()), Operand::Value(high.into())],
        )
    }

    pub fn is_null(target: impl Into<ColumnRef>) -> Self {
        Self::compare(target, Operator::IsNull, Vec::new())
    }

    pub fn is_not_null(target: impl Into<ColumnRef>) -> Self {
        Self::compare(target, Operator::IsNotNull, Vec::new())
    }

    /// Comparison with an explicit SQL type hint on the bound value.
    pub fn typed(
        target: impl Into<ColumnRef>,
        op: Operator,
        value: impl Into<Value>,
        hint: SqlType,
    ) -> Self {
        Self::compare(target, op, vec![Operand::Typed(BoundParam::typed(value, hint))])
    }

    /// Comparison over an arbitrary expression instead of a column.
    pub fn expr(expr: Template, op: Operator, operands: Vec<Operand>) -> Self {
        Predicate::Compare {
            target: Target::Expr(expr),
            op,
            operands,
        }
    }

    pub fn raw(template: Template) -> Self {
        Predicate::Raw(template)
    }

    pub fn exists(query: Template) -> Self {
        Predicate::Exists {
            query,
            negated: false,
        }
    }

    pub fn not_exists(query: Template) -> Self {
        Predicate::Exists {
            query,
            negated: true,
        }
    }

    pub fn in_query(target: impl Into<ColumnRef>, query: Template) -> Self {
        Predicate::InQuery {
            target: target.into(),
            query,
            negated: false,
        }
    }

    pub fn not_in_query(target: impl Into<ColumnRef>, query: Template) -> Self {
        Predicate::InQuery {
            target: target.into(),
            query,
            negated: true,
        }
    }

    /// Matches `record`, locating its entity through the relation graph.
    pub fn matches(record: Record) -> Self {
        Predicate::Matches { record, path: None }
    }

    /// Matches `record` through an explicit relation path.
    pub fn matches_via(record: Record, path: impl Into<Metamodel>) -> Self {
        Predicate::Matches {
            record,
            path: Some(path.into()),
        }
    }

    /// Conjunction, flattening nested `And` nodes.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut args) => {
                args.push(other);
                Predicate::And(args)
            }
            this => Predicate::And(vec![this, other]),
        }
    }

    /// Disjunction, flattening nested `Or` nodes.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut args) => {
                args.push(other);
                Predicate::Or(args)
            }
            this => Predicate::Or(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        match self {
            Predicate::And(args) | Predicate::Or(args) => {
                1 + args.iter().map(Predicate::node_count).sum::<usize>()
            }
            Predicate::Not(inner) => 1 + inner.node_count(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combinators_flatten() {
        let p = Predicate::eq("a", 1i64)
            .and(Predicate::eq("b", 2i64))
            .and(Predicate::eq("c", 3i64));
        match &p {
            Predicate::And(args) => assert_eq!(args.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
        let q = p.or(Predicate::is_null("d")).not();
        assert_eq!(q.node_count(), 7);
    }

    #[test]
    fn operator_arity() {
        assert_eq!(Operator::Between.arity(), Some(2));
        assert_eq!(Operator::IsNull.arity(), Some(0));
        assert_eq!(Operator::In.arity(), None);
        assert_eq!(Operator::Equals.binary_sql(), Some("="));
        assert_eq!(Operator::In.binary_sql(), None);
    }
}
