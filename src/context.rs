use std::sync::{Arc, OnceLock};

use crate::config::CompileConfig;
use crate::error::Result;
use crate::model::{Catalog, EntityDescriptor, Registry};

/// Registry handle plus configuration, threaded through every compilation.
///
/// Alias counters are not part of the context: each compiled statement owns
/// its own alias table.
#[derive(Clone)]
pub struct Context {
    registry: Arc<Registry>,
    config: CompileConfig,
}

impl Context {
    /// Creates a context over an existing registry.
    pub fn new(registry: Arc<Registry>, config: CompileConfig) -> Self {
        Self { registry, config }
    }

    /// Creates a context with its own registry over `catalog`.
    pub fn from_catalog(catalog: Catalog, config: CompileConfig) -> Self {
        Self::new(Arc::new(Registry::from_catalog(catalog)), config)
    }

    /// Process-wide default context backed by [`Catalog::global`].
    pub fn global() -> &'static Context {
        static GLOBAL: OnceLock<Context> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let source = Arc::clone(Catalog::global());
            Context::new(Arc::new(Registry::new(source)), CompileConfig::default())
        })
    }

    /// Returns a context sharing the registry with different settings.
    pub fn with_config(&self, config: CompileConfig) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Resolves a descriptor through the registry.
    pub fn descriptor(&self, entity: &str) -> Result<Arc<EntityDescriptor>> {
        self.registry.resolve(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityDecl;

    #[test]
    fn global_context_sees_global_catalog() {
        Catalog::global().register(EntityDecl::new("global_probe", "global_probe").id("id"));
        let descriptor = Context::global()
            .descriptor("global_probe")
            .expect("registered globally");
        assert_eq!(descriptor.table(), "global_probe");
    }
}
