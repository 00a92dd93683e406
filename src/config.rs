use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// Batch size used when a caller does not supply one.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
/// Default bound on relation hops followed by path resolution and auto-joins.
pub const DEFAULT_MAX_JOIN_DEPTH: usize = 8;

/// Policy applied when an entity is reachable through more than one relation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasResolveStrategy {
    /// Take the first path in declaration order.
    First,
    /// Require an explicit qualifier path.
    #[default]
    All,
    /// Reject every ambiguous reference, qualified or not.
    Fail,
}

/// Placeholder syntax emitted for bound parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// `?`
    #[default]
    Positional,
    /// `$1`, `$2`, ...
    Numbered,
}

/// Settings threaded through every compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Ambiguous auto-join policy.
    pub alias_strategy: AliasResolveStrategy,
    /// Maximum relation hops in one path.
    pub max_join_depth: usize,
    /// Rows per batch for streamed inserts/updates/deletes.
    pub batch_size: usize,
    /// Parameter placeholder syntax.
    pub placeholder: PlaceholderStyle,
    /// Append `RETURNING <identity>` to inserts with generated identities.
    pub returning_keys: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            alias_strategy: AliasResolveStrategy::All,
            max_join_depth: DEFAULT_MAX_JOIN_DEPTH,
            batch_size: DEFAULT_BATCH_SIZE,
            placeholder: PlaceholderStyle::Positional,
            returning_keys: true,
        }
    }
}

impl CompileConfig {
    /// Lenient preset: ambiguous references take the first declared path.
    pub fn lenient() -> Self {
        Self {
            alias_strategy: AliasResolveStrategy::First,
            ..Self::default()
        }
    }

    /// Strict preset: every ambiguous reference is an error.
    pub fn strict() -> Self {
        Self {
            alias_strategy: AliasResolveStrategy::Fail,
            ..Self::default()
        }
    }

    /// Preset for PostgreSQL-style `$n` placeholders.
    pub fn numbered() -> Self {
        Self {
            placeholder: PlaceholderStyle::Numbered,
            ..Self::default()
        }
    }

    /// Returns a copy with the given strategy.
    pub fn with_strategy(mut self, strategy: AliasResolveStrategy) -> Self {
        self.alias_strategy = strategy;
        self
    }

    /// Returns a copy with the given batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: CompileConfig =
            toml::from_str(raw).map_err(|err| QueryError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| QueryError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Rejects values that cannot drive a compilation.
    pub fn validate(&self) -> Result<()> {
        validate_batch_size(self.batch_size)?;
        if self.max_join_depth == 0 {
            return Err(QueryError::InvalidArgument(
                "max_join_depth must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(QueryError::InvalidArgument(
            "batch size must be positive".into(),
        ));
    }
    Ok(())
}
