use crate::driver::DialectProvider;
use crate::factory::ConnectionFactory;
use crate::locks::LockRegistry;
use crate::{Error, Result};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<Registry> = Arc::new(Registry::default());
    static ref NAME_REGEX: regex::Regex = regex::Regex::new("^[a-zA-Z][a-zA-Z0-9+._-]*$").unwrap();
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The dialect providers registered by name.
#[derive(Default)]
pub struct DialectRegistry {
    providers: RwLock<HashMap<String, Arc<dyn DialectProvider>>>,
}

impl DialectRegistry {
    /// Register a provider, replacing any provider previously registered with the same name.
    pub fn register(&self, name: &str, provider: Arc<dyn DialectProvider>) -> Result<()> {
        if name.is_empty() {
            return Err(Error::ArgumentNull { name: "provider_name" });
        }
        if !NAME_REGEX.is_match(name) {
            return Err(Error::InvalidArgument {
                name: "provider_name",
                reason: format!("'{}' is not a valid provider name", name),
            });
        }
        debug!("Registering dialect provider '{}' ({})", name, provider.name());
        write(&self.providers).insert(name.to_string(), provider);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn DialectProvider>> {
        self.get(name).ok_or_else(|| Error::DialectNotSupported { provider: name.to_string() })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DialectProvider>> {
        read(&self.providers).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        read(&self.providers).contains_key(name)
    }

    /// The names of the registered providers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.providers).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read(&self.providers).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.providers).is_empty()
    }
}

/// The connection factories registered by name.
#[derive(Default)]
pub struct NamedConnections {
    factories: RwLock<HashMap<String, ConnectionFactory>>,
}

impl NamedConnections {
    /// Register a factory, the last registration for a given name wins.
    pub fn register(&self, name: &str, factory: ConnectionFactory) -> Result<()> {
        if name.is_empty() {
            return Err(Error::ArgumentNull { name: "named_connection" });
        }
        debug!("Registering named connection '{}'", name);
        write(&self.factories).insert(name.to_string(), factory);
        Ok(())
    }

    /// Get the factory registered under the given name.
    ///
    /// The factory returned is a snapshot: registering another factory under the same name afterward does not affect
    /// the caller.
    pub fn resolve(&self, name: &str) -> Result<ConnectionFactory> {
        if name.is_empty() {
            return Err(Error::ArgumentNull { name: "named_connection" });
        }
        read(&self.factories)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NamedConnectionNotFound { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        read(&self.factories).contains_key(name)
    }

    /// The names of the registered connections, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.factories).keys().cloned().collect();
        names.sort();
        names
    }
}

/// Everything a [ConnectionFactory] needs to resolve names: dialect providers, named connections and their write
/// locks.
///
/// A registry is usually created once at startup and shared by all the factories of the application. Applications
/// that prefer a process-wide registry can use [Registry::global].
#[derive(Default)]
pub struct Registry {
    dialects: DialectRegistry,
    connections: NamedConnections,
    locks: LockRegistry,
    default_dialect: RwLock<Option<Arc<dyn DialectProvider>>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide registry.
    pub fn global() -> Arc<Self> {
        GLOBAL_REGISTRY.clone()
    }

    pub fn dialects(&self) -> &DialectRegistry {
        &self.dialects
    }

    pub fn connections(&self) -> &NamedConnections {
        &self.connections
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn register_dialect_provider(&self, name: &str, provider: Arc<dyn DialectProvider>) -> Result<()> {
        self.dialects.register(name, provider)
    }

    /// Register a named connection along with its write lock.
    ///
    /// The write lock is created only once per name, re-registering a name keeps the existing lock. A factory
    /// referring to this registry is stored with a weak reference to it, dropping the registry drops the factory.
    pub fn register_connection(self: &Arc<Self>, name: &str, factory: ConnectionFactory) -> Result<()> {
        self.connections.register(name, factory.registered_in(self))?;
        self.locks.add_lock(name);
        Ok(())
    }

    /// The provider used by factories that have none.
    pub fn default_dialect_provider(&self) -> Option<Arc<dyn DialectProvider>> {
        read(&self.default_dialect).clone()
    }

    pub fn set_default_dialect_provider(&self, provider: Arc<dyn DialectProvider>) {
        *write(&self.default_dialect) = Some(provider);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDialectProvider;
    use crate::error::ErrorKind;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_dialect_registry() {
        let dialects = DialectRegistry::default();
        assert!(dialects.is_empty());
        assert_ok!(dialects.register("sqlite", MockDialectProvider::with_default("sqlite")));
        assert_ok!(dialects.register("postgres", MockDialectProvider::with_default("postgres")));
        assert_eq!(dialects.names(), vec!["postgres".to_string(), "sqlite".to_string()]);
        assert_eq!(assert_ok!(dialects.resolve("sqlite")).name(), "sqlite");

        // replaced without error
        assert_ok!(dialects.register("sqlite", MockDialectProvider::with_default("sqlite3")));
        assert_eq!(assert_ok!(dialects.resolve("sqlite")).name(), "sqlite3");
        assert_eq!(dialects.len(), 2);

        let error = dialects.resolve("oracle").err().unwrap();
        assert_eq!(error.kind(), ErrorKind::NotSupported);
        assert!(error.to_string().contains("oracle"));

        let provider = MockDialectProvider::with_default("x");
        assert!(matches!(dialects.register("", provider), Err(Error::ArgumentNull { .. })));
        assert!(matches!(
            dialects.register("9sql server", MockDialectProvider::with_default("x")),
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(dialects.len(), 2);
    }

    #[test]
    fn test_named_connections() {
        let registry = Registry::new();
        let error = assert_err!(registry.connections().resolve("reporting"));
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(error.to_string().contains("reporting"));
        assert!(matches!(registry.connections().resolve(""), Err(Error::ArgumentNull { .. })));

        let first = ConnectionFactory::new("mock://first", MockDialectProvider::with_default("mock"));
        let second = ConnectionFactory::new("mock://second", MockDialectProvider::with_default("mock"));
        assert_ok!(registry.register_connection("reporting", first));
        let lock = registry.locks().get(Some("reporting"));
        assert_ok!(registry.register_connection("reporting", second));

        let resolved = assert_ok!(registry.connections().resolve("reporting"));
        assert_eq!(resolved.connection_string(), Some("mock://second"));
        assert!(Arc::ptr_eq(&lock, &registry.locks().get(Some("reporting"))));
        assert_eq!(registry.connections().names(), vec!["reporting".to_string()]);
    }

    #[test]
    fn test_default_dialect_provider() {
        let registry = Registry::new();
        assert!(registry.default_dialect_provider().is_none());
        registry.set_default_dialect_provider(MockDialectProvider::with_default("mock"));
        assert_eq!(registry.default_dialect_provider().unwrap().name(), "mock");
    }
}
