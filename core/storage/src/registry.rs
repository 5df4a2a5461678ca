//! Tree registry for resolving a backend by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::tree::FileTree;
use encryptall_common::{Error, Result};

/// Factory function type for creating trees from JSON configuration.
pub type TreeFactory = Box<dyn Fn(Value) -> Result<Arc<dyn FileTree>> + Send + Sync>;

/// Registry of file tree factories.
pub struct TreeRegistry {
    factories: HashMap<String, TreeFactory>,
}

impl TreeRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a tree factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: TreeFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a tree by backend name and configuration.
    ///
    /// # Errors
    /// - Backend not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn FileTree>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::NotFound(format!(
                "Backend '{}' is not registered (available: {})",
                name,
                self.backends().join(", ")
            ))
        })?;
        factory(config)
    }

    /// Registered backend names, sorted.
    pub fn backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TreeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in backends.
///
/// - `memory`: empty in-memory tree, no configuration
/// - `local`: `{"root": "<data directory>"}`
pub fn create_default_registry() -> TreeRegistry {
    let mut registry = TreeRegistry::new();

    // Built-in names are distinct, so these inserts cannot collide.
    registry.factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryTree::new()))),
    );
    registry.factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = config.get("root").and_then(|v| v.as_str()).ok_or_else(|| {
                Error::InvalidInput("Local backend requires 'root' path".to_string())
            })?;
            Ok(Arc::new(crate::local::LocalTree::new(root)?))
        }),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTree;
    use serde_json::json;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = TreeRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryTree::new()))))
            .unwrap();

        let tree = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(tree.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = create_default_registry();
        let result = registry.register("memory", Box::new(|_| Ok(Arc::new(MemoryTree::new()))));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_default_backends() {
        let registry = create_default_registry();
        assert_eq!(registry.backends(), vec!["local", "memory"]);
    }

    #[test]
    fn test_local_requires_root() {
        let registry = create_default_registry();
        assert!(registry.resolve("local", json!({})).is_err());

        let temp = tempfile::TempDir::new().unwrap();
        let tree = registry
            .resolve("local", json!({ "root": temp.path() }))
            .unwrap();
        assert_eq!(tree.name(), "local");
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = TreeRegistry::new();
        assert!(matches!(
            registry.resolve("gdrive", Value::Null),
            Err(Error::NotFound(_))
        ));
    }
}
