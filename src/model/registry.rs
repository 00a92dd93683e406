//! Process-wide descriptor cache and the in-memory declaration source.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::model::decl::EntityDecl;
use crate::model::descriptor::EntityDescriptor;

/// Supplies raw declarations by entity name.
pub trait DescriptorSource: Send + Sync {
    /// Returns the declaration for `entity`, if the source knows it.
    fn declaration(&self, entity: &str) -> Option<EntityDecl>;
}

/// In-memory declaration source.
#[derive(Default)]
pub struct Catalog {
    decls: RwLock<FxHashMap<String, EntityDecl>>,
}

#[derive(Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    entity: Vec<EntityDecl>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide catalog backing [`Context::global`](crate::Context::global).
    pub fn global() -> &'static Arc<Catalog> {
        static GLOBAL: OnceLock<Arc<Catalog>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Catalog::new()))
    }

    /// Registers a declaration. A declaration already registered under the
    /// same name is kept; registries may already have built a descriptor from it.
    pub fn register(&self, decl: EntityDecl) -> bool {
        let mut decls = self.decls.write();
        if decls.contains_key(&decl.name) {
            return false;
        }
        decls.insert(decl.name.clone(), decl);
        true
    }

    /// Builder-style registration.
    pub fn with(self, decl: EntityDecl) -> Self {
        self.register(decl);
        self
    }

    /// Parses `[[entity]]` tables from a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let doc: CatalogDocument =
            toml::from_str(raw).map_err(|err| QueryError::Config(err.to_string()))?;
        let catalog = Catalog::new();
        for decl in doc.entity {
            let name = decl.name.clone();
            if !catalog.register(decl) {
                return Err(QueryError::mapping(name, "entity declared twice"));
            }
        }
        Ok(catalog)
    }

    /// Registered entity names, sorted.
    pub fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.decls.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl DescriptorSource for Catalog {
    fn declaration(&self, entity: &str) -> Option<EntityDecl> {
        self.decls.read().get(entity).cloned()
    }
}

/// Lazily built, immutable descriptors keyed by entity name.
///
/// The first resolution of a name builds the descriptor while holding the
/// upgradable lock, so concurrent first resolutions of the same name observe a
/// single instance. Cached lookups only take the shared read lock.
pub struct Registry {
    source: Arc<dyn DescriptorSource>,
    cache: RwLock<FxHashMap<String, Arc<EntityDescriptor>>>,
    built: AtomicUsize,
}

impl Registry {
    /// Creates a registry over a declaration source.
    pub fn new(source: Arc<dyn DescriptorSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(FxHashMap::default()),
            built: AtomicUsize::new(0),
        }
    }

    /// Convenience constructor over an owned catalog.
    pub fn from_catalog(catalog: Catalog) -> Self {
        Self::new(Arc::new(catalog))
    }

    /// Returns the descriptor for `entity`, building it on first use.
    pub fn resolve(&self, entity: &str) -> Result<Arc<EntityDescriptor>> {
        if let Some(descriptor) = self.cache.read().get(entity) {
            return Ok(Arc::clone(descriptor));
        }
        let cache = self.cache.upgradable_read();
        if let Some(descriptor) = cache.get(entity) {
            return Ok(Arc::clone(descriptor));
        }
        let decl = self
            .source
            .declaration(entity)
            .ok_or_else(|| QueryError::mapping(entity, "entity is not registered"))?;
        let descriptor = Arc::new(EntityDescriptor::from_decl(&decl)?);
        let mut cache = RwLockUpgradableReadGuard::upgrade(cache);
        cache.insert(entity.to_owned(), Arc::clone(&descriptor));
        self.built.fetch_add(1, Ordering::Relaxed);
        debug!(
            entity = %entity,
            columns = descriptor.columns().len(),
            relations = descriptor.relations().len(),
            "registry.descriptor.built"
        );
        Ok(descriptor)
    }

    /// Number of descriptors constructed so far.
    pub fn constructed(&self) -> usize {
        self.built.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn registry() -> Registry {
        Registry::from_catalog(
            Catalog::new()
                .with(EntityDecl::new("owner", "owner").id("id").column("name"))
                .with(EntityDecl::new("broken", "broken").column("name")),
        )
    }

    #[test]
    fn caches_descriptors() {
        let registry = registry();
        let a = registry.resolve("owner").expect("owner resolves");
        let b = registry.resolve("owner").expect("owner resolves again");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.constructed(), 1);
    }

    #[test]
    fn concurrent_first_resolution_builds_once() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.resolve("owner").expect("owner resolves"))
            })
            .collect();
        let descriptors: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread completes"))
            .collect();
        assert!(descriptors.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.constructed(), 1);
    }

    #[test]
    fn invalid_declaration_is_not_cached() {
        let registry = registry();
        assert_eq!(registry.resolve("broken").unwrap_err().code(), "MappingError");
        assert_eq!(registry.resolve("missing").unwrap_err().code(), "MappingError");
        assert_eq!(registry.constructed(), 0);
    }

    #[test]
    fn catalog_from_toml() {
        let catalog = Catalog::from_toml_str(
            r#"
            [[entity]]
            name = "owner"
            table = "owner"
            fields = [
              { kind = "column", field = "id", primary_key = true, generated = true },
              { kind = "column", field = "last_name" },
            ]

            [[entity]]
            name = "pet"
            table = "pet"
            fields = [
              { kind = "column", field = "id", primary_key = true, generated = true },
              { kind = "relation", field = "owner", target = "owner", nullable = true },
            ]
            "#,
        )
        .expect("catalog parses");
        assert_eq!(catalog.entities(), ["owner", "pet"]);
        let registry = Registry::from_catalog(catalog);
        let pet = registry.resolve("pet").expect("pet resolves");
        assert_eq!(pet.relations()[0].target, "owner");
        assert!(pet.relations()[0].nullable);
    }
}
