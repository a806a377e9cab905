//! C7 — host resolver registry: process-wide, keyed on resolver type name,
//! read-mostly after start-of-day registration (spec.md §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

pub type HostId = String;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("resolver type {0} is not registered")]
    UnknownType(String),
    #[error("resolver {0} failed: {1}")]
    Failed(String, String),
}

pub trait Resolver: Send + Sync {
    fn resolve(&self, query: &str) -> Result<Vec<HostId>, ResolverError>;
}

/// Splits `query` on commas, trims, drops empties, dedups, sorts ascending —
/// the built-in `"string"` resolver (spec.md §4.7).
pub struct StringResolver;

impl Resolver for StringResolver {
    fn resolve(&self, query: &str) -> Result<Vec<HostId>, ResolverError> {
        let mut hosts: Vec<String> = query
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        hosts.sort();
        hosts.dedup();
        Ok(hosts)
    }
}

pub struct ResolverRegistry {
    resolvers: RwLock<HashMap<String, Arc<dyn Resolver>>>,
}

impl ResolverRegistry {
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(Self {
            resolvers: RwLock::new(HashMap::new()),
        });
        registry.register("string", Arc::new(StringResolver));
        registry
    }

    /// Registers a resolver under `type_name`. Panics on a duplicate
    /// registration — this only ever happens at process start and a
    /// collision there is a misconfiguration worth crashing loudly on
    /// (spec.md §4.7).
    pub fn register(&self, type_name: &str, resolver: Arc<dyn Resolver>) {
        let mut guard = self.resolvers.write();
        if guard.contains_key(type_name) {
            panic!("resolver type '{type_name}' registered twice");
        }
        guard.insert(type_name.to_string(), resolver);
    }

    pub fn resolve(&self, type_name: &str, query: &str) -> Result<Vec<HostId>, ResolverError> {
        let guard = self.resolvers.read();
        let resolver = guard
            .get(type_name)
            .ok_or_else(|| ResolverError::UnknownType(type_name.to_string()))?;
        resolver.resolve(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_resolver_dedups_and_sorts() {
        let registry = ResolverRegistry::new();
        let hosts = registry.resolve("string", "b, a, a, , c").unwrap();
        assert_eq!(hosts, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn unknown_resolver_type_errors() {
        let registry = ResolverRegistry::new();
        assert!(matches!(
            registry.resolve("nope", "a"),
            Err(ResolverError::UnknownType(_))
        ));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let registry = ResolverRegistry::new();
        registry.register("string", Arc::new(StringResolver));
    }
}
