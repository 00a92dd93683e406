//! Scoped alias table of one compiled statement.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{QueryError, Result};
use crate::model::descriptor::is_identifier;
use crate::query::template::ScopeQualifier;

/// Words never handed out as generated aliases.
const RESERVED: &[&str] = &[
    "as", "at", "by", "do", "if", "in", "is", "no", "of", "on", "or", "to", "all", "and", "any",
    "asc", "end", "for", "key", "not", "set", "add", "use", "case", "cast", "desc", "from",
    "full", "into", "join", "left", "like", "null", "only", "over", "then", "true", "when",
    "with", "false", "inner", "limit", "order", "outer", "right", "table", "union", "where",
    "group", "select", "values", "having", "offset", "update", "delete", "insert",
];

/// Returns true for words that cannot serve as aliases.
pub(crate) fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

#[derive(Debug, Default)]
struct ScopeAliases {
    parent: Option<usize>,
    bound: FxHashMap<String, usize>,
}

/// Alias assignments of one statement, one scope per (sub-)statement.
///
/// Generated aliases are unique across the whole statement and never collide
/// with an explicit alias declared anywhere in it. Explicit aliases are unique
/// within their scope and may shadow an enclosing scope.
#[derive(Debug, Default)]
pub struct AliasTable {
    explicit: FxHashSet<String>,
    generated: FxHashSet<String>,
    scopes: Vec<ScopeAliases>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an explicit alias declared somewhere in the statement so that
    /// generated aliases avoid it.
    pub fn reserve(&mut self, alias: &str) -> Result<()> {
        if !is_identifier(alias) || is_reserved(alias) {
            return Err(QueryError::template(format!(
                "'{alias}' is not a valid alias"
            )));
        }
        self.explicit.insert(alias.to_ascii_lowercase());
        Ok(())
    }

    /// Opens a scope nested in `parent`.
    pub fn push_scope(&mut self, parent: Option<usize>) -> usize {
        self.scopes.push(ScopeAliases {
            parent,
            bound: FxHashMap::default(),
        });
        self.scopes.len() - 1
    }

    pub fn parent(&self, scope: usize) -> Option<usize> {
        self.scopes[scope].parent
    }

    /// Generates a fresh alias for `table`: its initials, suffixed with a
    /// counter when already taken.
    pub fn generate(&mut self, table: &str) -> String {
        let prefix = initials(table);
        let taken = |alias: &str, table: &AliasTable| {
            table.generated.contains(alias) || table.explicit.contains(alias) || is_reserved(alias)
        };
        let mut alias = prefix.clone();
        let mut counter = 1usize;
        while taken(&alias, self) {
            counter += 1;
            alias = format!("{prefix}{counter}");
        }
        self.generated.insert(alias.clone());
        alias
    }

    /// Binds `alias` to `node` in `scope`.
    pub fn bind(&mut self, scope: usize, alias: &str, node: usize) -> Result<()> {
        let bound = &mut self.scopes[scope].bound;
        let key = alias.to_ascii_lowercase();
        if bound.contains_key(&key) {
            return Err(QueryError::template(format!(
                "alias '{alias}' is declared twice in the same scope"
            )));
        }
        bound.insert(key, node);
        Ok(())
    }

    /// Finds the scope and node bound to `alias`, honouring the qualifier.
    pub fn lookup(
        &self,
        scope: usize,
        alias: &str,
        qualifier: ScopeQualifier,
    ) -> Option<(usize, usize)> {
        let key = alias.to_ascii_lowercase();
        let mut current = match qualifier {
            ScopeQualifier::Outer => self.scopes[scope].parent,
            _ => Some(scope),
        };
        while let Some(id) = current {
            if let Some(&node) = self.scopes[id].bound.get(&key) {
                return Some((id, node));
            }
            if qualifier == ScopeQualifier::Inner {
                return None;
            }
            current = self.scopes[id].parent;
        }
        None
    }

    /// True when `alias`, bound in `target`, is hidden from `from` by a scope
    /// nested between them.
    pub fn is_shadowed(&self, from: usize, target: usize, alias: &str) -> bool {
        let key = alias.to_ascii_lowercase();
        let mut current = Some(from);
        while let Some(id) = current {
            if id == target {
                return false;
            }
            if self.scopes[id].bound.contains_key(&key) {
                return true;
            }
            current = self.scopes[id].parent;
        }
        false
    }
}

fn initials(table: &str) -> String {
    let prefix: String = table
        .split('_')
        .filter_map(|part| part.chars().next())
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if prefix.is_empty() {
        "t".to_owned()
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_aliases_use_initials_and_counters() {
        let mut aliases = AliasTable::new();
        assert_eq!(aliases.generate("pet"), "p");
        assert_eq!(aliases.generate("pet"), "p2");
        assert_eq!(aliases.generate("pet_type"), "pt");
        assert_eq!(aliases.generate("owner"), "o");
    }

    #[test]
    fn generated_aliases_skip_explicit_and_reserved_words() {
        let mut aliases = AliasTable::new();
        aliases.reserve("v").expect("valid alias");
        assert_eq!(aliases.generate("visit"), "v2");
        assert_eq!(aliases.generate("order_status"), "os");
        assert_eq!(aliases.generate("on_sale"), "os2");
        assert_eq!(aliases.generate("order_row"), "or2");
    }

    #[test]
    fn rejects_invalid_explicit_alias() {
        let mut aliases = AliasTable::new();
        assert_eq!(aliases.reserve("p; --").unwrap_err().code(), "SqlTemplateException");
        assert_eq!(aliases.reserve("where").unwrap_err().code(), "SqlTemplateException");
    }

    #[test]
    fn scopes_shadow_and_qualify() {
        let mut aliases = AliasTable::new();
        let outer = aliases.push_scope(None);
        let inner = aliases.push_scope(Some(outer));
        aliases.bind(outer, "p", 0).expect("bind outer");
        aliases.bind(inner, "p", 7).expect("shadowing is allowed");
        assert_eq!(aliases.lookup(inner, "p", ScopeQualifier::Auto), Some((inner, 7)));
        assert_eq!(aliases.lookup(inner, "p", ScopeQualifier::Outer), Some((outer, 0)));
        assert!(aliases.is_shadowed(inner, outer, "p"));
        assert_eq!(aliases.lookup(inner, "o", ScopeQualifier::Inner), None);
        assert_eq!(
            aliases.bind(inner, "P", 8).unwrap_err().code(),
            "SqlTemplateException"
        );
    }
}
