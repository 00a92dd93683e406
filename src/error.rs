use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Convenience alias for fallible compiler and session operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Errors raised while describing entities, compiling statements, or running them.
///
/// Compile-time variants abort the whole statement build: nothing is ever
/// partially compiled. Execution-time variants wrap whatever the
/// [`StatementExecutor`](crate::exec::StatementExecutor) reported and keep it
/// reachable through [`std::error::Error::source`].
#[derive(Debug, Error)]
pub enum QueryError {
    /// Entity declaration is unusable (no identity, conflicting flags, cycles).
    #[error("mapping error on '{entity}': {message}")]
    Mapping { entity: String, message: String },
    /// Path, column, or join target could not be resolved.
    #[error("cannot resolve '{path}': {message}")]
    PathResolution { path: String, message: String },
    /// Relation traversal went deeper than the configured bound.
    #[error("path '{path}' exceeds the join depth limit of {max}")]
    PathRecursion { path: String, max: usize },
    /// More than one join candidate and no usable disambiguation.
    #[error("'{entity}' is reachable through {candidates:?}; {message}")]
    AliasAmbiguity {
        entity: String,
        candidates: Vec<String>,
        message: String,
    },
    /// Malformed fragment sequence or builder misuse.
    #[error("sql template error: {0}")]
    SqlTemplate(String),
    /// Version-checked update/delete matched no row.
    #[error("concurrent modification of '{entity}' detected (stale version)")]
    ConcurrencyConflict { entity: String },
    /// Record update/delete without a version column matched no row.
    #[error("'{entity}' row not found")]
    EntityNotFound { entity: String },
    /// Integrity violation reported by the executor.
    #[error("constraint violation: {source}")]
    ConstraintViolation {
        #[source]
        source: ExecutorError,
    },
    /// Any other executor failure.
    #[error("statement execution failed: {source}")]
    Execution {
        #[source]
        source: ExecutorError,
    },
    /// Caller-supplied argument rejected before any work was done.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl QueryError {
    pub(crate) fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::Mapping {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub(crate) fn path(path: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::PathResolution {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn template(message: impl Into<String>) -> Self {
        QueryError::SqlTemplate(message.into())
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Mapping { .. } => "MappingError",
            QueryError::PathResolution { .. } => "PathResolutionError",
            QueryError::PathRecursion { .. } => "PathRecursionError",
            QueryError::AliasAmbiguity { .. } => "AliasAmbiguityError",
            QueryError::SqlTemplate(_) => "SqlTemplateException",
            QueryError::ConcurrencyConflict { .. } => "ConcurrencyConflictError",
            QueryError::EntityNotFound { .. } => "EntityNotFound",
            QueryError::ConstraintViolation { .. } => "ConstraintViolationError",
            QueryError::Execution { .. } => "ExecutionError",
            QueryError::InvalidArgument(_) => "InvalidArgument",
            QueryError::Config(_) => "ConfigError",
        }
    }

    /// True for errors raised before a statement reached the executor.
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            QueryError::Mapping { .. }
                | QueryError::PathResolution { .. }
                | QueryError::PathRecursion { .. }
                | QueryError::AliasAmbiguity { .. }
                | QueryError::SqlTemplate(_)
                | QueryError::InvalidArgument(_)
        )
    }
}

impl From<ExecutorError> for QueryError {
    fn from(source: ExecutorError) -> Self {
        match source.kind {
            ExecutorErrorKind::Constraint => QueryError::ConstraintViolation { source },
            ExecutorErrorKind::Other => QueryError::Execution { source },
        }
    }
}

/// Coarse classification an executor attaches to its failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutorErrorKind {
    /// Unique, foreign-key, check or not-null violation.
    Constraint,
    /// Anything else.
    Other,
}

/// Opaque failure reported by a statement executor.
#[derive(Debug)]
pub struct ExecutorError {
    /// Failure class used to pick the [`QueryError`] variant.
    pub kind: ExecutorErrorKind,
    message: String,
    cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl ExecutorError {
    /// Creates an error without an underlying cause.
    pub fn new(kind: ExecutorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Wraps a driver error, keeping it reachable through `source()`.
    pub fn with_cause<E>(kind: ExecutorErrorKind, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            kind,
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Returns the underlying driver error, if any.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for ExecutorError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Convenience wrapper that formats errors with their codes.
pub struct QueryErrorWithCode<'a>(pub &'a QueryError);

impl fmt::Display for QueryErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_constraint_maps_to_constraint_violation() {
        let err: QueryError =
            ExecutorError::new(ExecutorErrorKind::Constraint, "UNIQUE constraint failed").into();
        assert_eq!(err.code(), "ConstraintViolationError");
        assert!(err.source().is_some());
        assert!(!err.is_compile_time());
    }

    #[test]
    fn formatted_with_code() {
        let err = QueryError::template("multiple unconditioned filters");
        assert_eq!(
            QueryErrorWithCode(&err).to_string(),
            "[SqlTemplateException] sql template error: multiple unconditioned filters"
        );
    }
}
