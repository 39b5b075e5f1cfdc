use crate::connection::{ConnectionCore, DbConnection, DisposedConnection, Ownership, SharedConnection};
use crate::connection_info::{ConnectionInfo, ConnectionTarget};
use crate::driver::{DialectProvider, DriverCommand, DriverTransaction};
use crate::registry::Registry;
use crate::write_locked::WriteLockedConnection;
use crate::{Error, Result};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::debug;

/// The connection string of an in-memory database.
///
/// An in-memory database cannot be re-opened without losing its content, so a factory using this connection string
/// creates a single connection and shares it between all the callers.
pub const IN_MEMORY_CONNECTION_STRING: &str = ":memory:";

/// An alternative form of [IN_MEMORY_CONNECTION_STRING], normalized into it.
pub const IN_MEMORY_DATA_SOURCE: &str = "DataSource=:memory:";

/// A function applied to every connection created by a factory before it's handed over.
pub type ConnectionFilter = Arc<dyn Fn(DbConnection) -> DbConnection + Send + Sync>;

/// A function called each time a connection created by a factory is disposed.
pub type DisposeObserver = Arc<dyn Fn(&DisposedConnection) + Send + Sync>;

/// How a factory manages the lifetime of the connections it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryMode {
    /// A new connection is created for each call and closed when disposed.
    Standard,
    /// A single connection is created and shared, disposing a connection doesn't close it.
    SingletonBacked,
}

#[derive(Clone)]
enum Lifetime {
    Standard,
    SingletonBacked { shared: Arc<Mutex<Option<SharedConnection>>> },
}

impl Lifetime {
    fn for_connection_string(connection_string: Option<&str>) -> Self {
        match connection_string {
            Some(IN_MEMORY_CONNECTION_STRING) => Lifetime::SingletonBacked { shared: Arc::new(Mutex::new(None)) },
            _ => Lifetime::Standard,
        }
    }
}

/// How a factory refers to its registry.
///
/// A factory registered as a named connection is owned by the registry it refers to, it only keeps a weak reference
/// so that dropping the registry drops the named factories and their shared connections.
#[derive(Clone)]
enum RegistryRef {
    Owned(Arc<Registry>),
    Registered(Weak<Registry>),
}

impl RegistryRef {
    fn get(&self) -> Result<Arc<Registry>> {
        match self {
            RegistryRef::Owned(registry) => Ok(registry.clone()),
            RegistryRef::Registered(registry) => registry
                .upgrade()
                .ok_or_else(|| Error::invalid_configuration("The registry of the factory has been dropped")),
        }
    }
}

/// Filter, mocks and observers of a factory.
///
/// They are shared with the transient factories derived by [ConnectionFactory::open_connection_string].
#[derive(Default)]
struct Hooks {
    filter: Option<ConnectionFilter>,
    always_return_command: Option<Arc<dyn DriverCommand>>,
    always_return_transaction: Option<Arc<dyn DriverTransaction>>,
    dispose_observers: RwLock<Vec<DisposeObserver>>,
}

#[derive(Clone)]
struct FactoryInner {
    connection_string: Option<String>,
    dialect_provider: Option<Arc<dyn DialectProvider>>,
    lifetime: Lifetime,
    hooks: Arc<Hooks>,
    registry: RegistryRef,
}

/// Creates and opens connections.
///
/// A factory is bound to a default connection string and dialect provider and resolves named connections and
/// dialect providers through its [Registry]. Cloning a factory is cheap, clones share everything.
///
/// ```rust,ignore
/// use dbconn_core::factory::ConnectionFactory;
///
/// let factory = ConnectionFactory::new("app.db", sqlite_provider.clone());
/// factory.register_connection("reporting", "reports.db", sqlite_provider)?;
///
/// let conn = factory.open()?;
/// let reports = factory.open_named("reporting")?;
/// ```
#[derive(Clone)]
pub struct ConnectionFactory {
    inner: Arc<FactoryInner>,
}

fn normalize_connection_string(connection_string: String) -> String {
    match connection_string.as_str() {
        IN_MEMORY_DATA_SOURCE => IN_MEMORY_CONNECTION_STRING.to_string(),
        _ => connection_string,
    }
}

impl ConnectionFactory {
    /// Create a factory with its own registry.
    ///
    /// The provider becomes the default provider of that registry.
    pub fn new<S: Into<String>>(connection_string: S, dialect_provider: Arc<dyn DialectProvider>) -> Self {
        Self::builder().connection_string(connection_string).dialect_provider(dialect_provider).build()
    }

    pub fn builder() -> FactoryBuilder {
        FactoryBuilder::default()
    }

    pub fn connection_string(&self) -> Option<&str> {
        self.inner.connection_string.as_deref()
    }

    /// `true` unless the factory is backed by a single shared connection.
    pub fn auto_dispose_connection(&self) -> bool {
        self.mode() == FactoryMode::Standard
    }

    pub fn mode(&self) -> FactoryMode {
        match self.inner.lifetime {
            Lifetime::Standard => FactoryMode::Standard,
            Lifetime::SingletonBacked { .. } => FactoryMode::SingletonBacked,
        }
    }

    /// The registry used to resolve names.
    ///
    /// Fails only for a named connection factory whose registry has been dropped.
    pub fn registry(&self) -> Result<Arc<Registry>> {
        self.inner.registry.get()
    }

    pub fn always_return_command(&self) -> Option<Arc<dyn DriverCommand>> {
        self.inner.hooks.always_return_command.clone()
    }

    pub fn always_return_transaction(&self) -> Option<Arc<dyn DriverTransaction>> {
        self.inner.hooks.always_return_transaction.clone()
    }

    /// The dialect provider of the factory, or the default provider of the registry if the factory has none.
    pub fn dialect_provider(&self) -> Result<Arc<dyn DialectProvider>> {
        match &self.inner.dialect_provider {
            Some(provider) => Ok(provider.clone()),
            None => self
                .registry()?
                .default_dialect_provider()
                .ok_or_else(|| Error::invalid_configuration("No dialect provider is configured")),
        }
    }

    /// Resolve a dialect provider: an explicit provider name wins over a named connection which wins over the
    /// factory's own provider.
    pub fn resolve_dialect_provider(
        &self,
        provider_name: Option<&str>,
        named_connection: Option<&str>,
    ) -> Result<Arc<dyn DialectProvider>> {
        match (provider_name.filter(|name| !name.is_empty()), named_connection.filter(|name| !name.is_empty())) {
            (Some(provider_name), _) => self.registry()?.dialects().resolve(provider_name),
            (None, Some(named_connection)) => {
                self.registry()?.connections().resolve(named_connection)?.dialect_provider()
            }
            (None, None) => self.dialect_provider(),
        }
    }

    /// The dialect provider a connection opened with [ConnectionFactory::open_info] would use.
    ///
    /// With an explicit connection string, the named connection is never looked up.
    pub fn dialect_provider_for(&self, info: Option<&ConnectionInfo>) -> Result<Arc<dyn DialectProvider>> {
        match info {
            Some(info) if info.connection_string().is_some() => {
                self.resolve_dialect_provider(info.provider_name(), None)
            }
            Some(info) => self.resolve_dialect_provider(info.provider_name(), info.named_connection()),
            None => self.dialect_provider(),
        }
    }

    /// Create a connection without opening it.
    ///
    /// For an in-memory database, the same driver connection is returned each time.
    pub fn create_connection(&self) -> Result<DbConnection> {
        self.create_connection_as(None)
    }

    /// Create a connection for a named connection without opening it.
    pub fn create_named_connection(&self, named_connection: &str) -> Result<DbConnection> {
        if named_connection.is_empty() {
            return Err(Error::ArgumentNull { name: "named_connection" });
        }
        let factory = self.registry()?.connections().resolve(named_connection)?;
        factory.create_connection_as(Some(named_connection))
    }

    fn create_connection_as(&self, named_connection: Option<&str>) -> Result<DbConnection> {
        let connection_string = self
            .inner
            .connection_string
            .as_deref()
            .ok_or_else(|| Error::invalid_configuration("ConnectionString must be set"))?;
        let named_connection = named_connection.map(str::to_string);
        let connection = match &self.inner.lifetime {
            Lifetime::Standard => {
                let core = ConnectionCore::new(self.dialect_provider()?.create_connection(connection_string)?);
                DbConnection::new(core, Ownership::AutoDispose, self.clone(), named_connection)
            }
            Lifetime::SingletonBacked { shared } => {
                let mut shared = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let core = match shared.as_ref() {
                    Some(core) if !core.is_closed() => core.clone(),
                    _ => {
                        let core = ConnectionCore::new(self.dialect_provider()?.create_connection(connection_string)?);
                        *shared = Some(core.clone());
                        core
                    }
                };
                DbConnection::new(core, Ownership::Shared, self.clone(), named_connection)
            }
        };
        Ok(match &self.inner.hooks.filter {
            Some(filter) => filter(connection),
            None => connection,
        })
    }

    pub fn open(&self) -> Result<DbConnection> {
        self.open_with(|_| Ok(()))
    }

    /// Create a connection, let the caller configure it, then open it.
    pub fn open_with<F>(&self, configure: F) -> Result<DbConnection>
    where
        F: FnOnce(&mut DbConnection) -> Result<()>,
    {
        Self::configure_and_open(self.create_connection()?, configure)
    }

    pub fn open_named(&self, named_connection: &str) -> Result<DbConnection> {
        self.open_named_with(named_connection, |_| Ok(()))
    }

    pub fn open_named_with<F>(&self, named_connection: &str, configure: F) -> Result<DbConnection>
    where
        F: FnOnce(&mut DbConnection) -> Result<()>,
    {
        Self::configure_and_open(self.create_named_connection(named_connection)?, configure)
    }

    /// Open a connection for an explicit connection string.
    ///
    /// The dialect provider is resolved by name if one is given, otherwise the factory's own provider is used. The
    /// factory used to create the connection is transient: it's not registered anywhere.
    pub fn open_connection_string(&self, connection_string: &str, provider_name: Option<&str>) -> Result<DbConnection> {
        self.open_connection_string_with(connection_string, provider_name, |_| Ok(()))
    }

    pub fn open_connection_string_with<F>(
        &self,
        connection_string: &str,
        provider_name: Option<&str>,
        configure: F,
    ) -> Result<DbConnection>
    where
        F: FnOnce(&mut DbConnection) -> Result<()>,
    {
        self.derive(connection_string, provider_name)?.open_with(configure)
    }

    /// Open a connection following the hint given: explicit connection string first, then named connection, then
    /// the factory defaults.
    pub fn open_info(&self, info: Option<&ConnectionInfo>) -> Result<DbConnection> {
        self.open_info_with(info, |_| Ok(()))
    }

    pub fn open_info_with<F>(&self, info: Option<&ConnectionInfo>, configure: F) -> Result<DbConnection>
    where
        F: FnOnce(&mut DbConnection) -> Result<()>,
    {
        match info.map(ConnectionInfo::target).unwrap_or(ConnectionTarget::Default) {
            ConnectionTarget::ConnectionString { connection_string, provider_name } => {
                self.open_connection_string_with(connection_string, provider_name, configure)
            }
            ConnectionTarget::Named(named_connection) => self.open_named_with(named_connection, configure),
            ConnectionTarget::Default => self.open_with(configure),
        }
    }

    /// Create (without opening) the connection [ConnectionFactory::open_info] would open.
    pub fn create_connection_for(&self, info: Option<&ConnectionInfo>) -> Result<DbConnection> {
        match info.map(ConnectionInfo::target).unwrap_or(ConnectionTarget::Default) {
            ConnectionTarget::ConnectionString { connection_string, provider_name } => {
                self.derive(connection_string, provider_name)?.create_connection()
            }
            ConnectionTarget::Named(named_connection) => self.create_named_connection(named_connection),
            ConnectionTarget::Default => self.create_connection(),
        }
    }

    /// Wrap a connection owned by the caller.
    ///
    /// Disposing the returned connection never closes the driver connection.
    pub fn use_connection(
        &self,
        connection: SharedConnection,
        transaction: Option<Arc<dyn DriverTransaction>>,
    ) -> DbConnection {
        DbConnection::new(connection, Ownership::External, self.clone(), None).with_transaction(transaction)
    }

    /// Create a connection guarded by the write lock of the given named connection (the default lock if `None`).
    ///
    /// The lock is acquired when the connection is opened and released when it's closed.
    pub fn create_write_locked_connection(&self, named_connection: Option<&str>) -> Result<WriteLockedConnection> {
        let connection = match named_connection {
            Some(named_connection) => self.create_named_connection(named_connection)?,
            None => self.create_connection()?,
        };
        let lock = self.registry()?.locks().get(named_connection);
        Ok(WriteLockedConnection::new(connection, lock))
    }

    /// Acquire the write lock of the given named connection then open the connection.
    ///
    /// This blocks the current thread until the lock is available.
    pub fn open_write_locked(&self, named_connection: Option<&str>) -> Result<WriteLockedConnection> {
        let mut connection = self.create_write_locked_connection(named_connection)?;
        connection.open()?;
        Ok(connection)
    }

    pub fn register_dialect_provider(&self, provider_name: &str, provider: Arc<dyn DialectProvider>) -> Result<()> {
        self.registry()?.register_dialect_provider(provider_name, provider)
    }

    /// Register a named connection.
    ///
    /// The factory created for the named connection shares the registry of this factory but doesn't change its
    /// default dialect provider.
    pub fn register_connection(
        &self,
        named_connection: &str,
        connection_string: &str,
        provider: Arc<dyn DialectProvider>,
    ) -> Result<()> {
        if connection_string.is_empty() {
            return Err(Error::ArgumentNull { name: "connection_string" });
        }
        let factory = Self::builder()
            .connection_string(connection_string)
            .dialect_provider(provider)
            .registry(self.registry()?)
            .set_global_dialect_provider(false)
            .build();
        self.register_named_factory(named_connection, factory)
    }

    pub fn register_named_factory(&self, named_connection: &str, factory: ConnectionFactory) -> Result<()> {
        self.registry()?.register_connection(named_connection, factory)
    }

    /// The names of the registered connections, sorted.
    pub fn named_connections(&self) -> Vec<String> {
        self.registry().map(|registry| registry.connections().names()).unwrap_or_default()
    }

    /// The same factory holding only a weak reference to the given registry, if it refers to it.
    ///
    /// Shared connections, hooks and observers are kept.
    pub(crate) fn registered_in(self, registry: &Arc<Registry>) -> ConnectionFactory {
        if !matches!(&self.inner.registry, RegistryRef::Owned(owned) if Arc::ptr_eq(owned, registry)) {
            return self;
        }
        ConnectionFactory {
            inner: Arc::new(FactoryInner {
                registry: RegistryRef::Registered(Arc::downgrade(registry)),
                ..(*self.inner).clone()
            }),
        }
    }

    /// Register a function called each time a connection created by this factory is disposed.
    ///
    /// Observers are called in registration order, after the driver connection is closed, once per connection.
    pub fn on_dispose<F>(&self, observer: F)
    where
        F: Fn(&DisposedConnection) + Send + Sync + 'static,
    {
        let mut observers = self.inner.hooks.dispose_observers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        observers.push(Arc::new(observer));
    }

    pub(crate) fn notify_disposed(&self, disposed: &DisposedConnection) {
        let observers =
            self.inner.hooks.dispose_observers.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
        for observer in observers {
            observer(disposed);
        }
    }

    fn configure_and_open<F>(mut connection: DbConnection, configure: F) -> Result<DbConnection>
    where
        F: FnOnce(&mut DbConnection) -> Result<()>,
    {
        configure(&mut connection)?;
        connection.open()?;
        Ok(connection)
    }

    /// A transient factory for an explicit connection string, sharing the registry and the hooks of this factory.
    fn derive(&self, connection_string: &str, provider_name: Option<&str>) -> Result<ConnectionFactory> {
        if connection_string.is_empty() {
            return Err(Error::ArgumentNull { name: "connection_string" });
        }
        let provider = match provider_name {
            Some("") => return Err(Error::ArgumentNull { name: "provider_name" }),
            Some(provider_name) => self.registry()?.dialects().resolve(provider_name)?,
            None => self.dialect_provider()?,
        };
        debug!("Deriving a transient factory (provider: {})", provider.name());
        let connection_string = normalize_connection_string(connection_string.to_string());
        Ok(ConnectionFactory {
            inner: Arc::new(FactoryInner {
                lifetime: Lifetime::for_connection_string(Some(&connection_string)),
                connection_string: Some(connection_string),
                dialect_provider: Some(provider),
                hooks: self.inner.hooks.clone(),
                registry: self.inner.registry.clone(),
            }),
        })
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("connection_string", &self.inner.connection_string)
            .field("dialect_provider", &self.inner.dialect_provider.as_ref().map(|provider| provider.name()))
            .field("mode", &self.mode())
            .finish()
    }
}

/// Builds a [ConnectionFactory].
pub struct FactoryBuilder {
    connection_string: Option<String>,
    dialect_provider: Option<Arc<dyn DialectProvider>>,
    registry: Option<Arc<Registry>>,
    set_global_dialect_provider: bool,
    hooks: Hooks,
}

impl Default for FactoryBuilder {
    fn default() -> Self {
        Self {
            connection_string: None,
            dialect_provider: None,
            registry: None,
            set_global_dialect_provider: true,
            hooks: Hooks::default(),
        }
    }
}

impl FactoryBuilder {
    pub fn connection_string<S: Into<String>>(mut self, connection_string: S) -> Self {
        self.connection_string = Some(normalize_connection_string(connection_string.into()));
        self
    }

    pub fn dialect_provider(mut self, provider: Arc<dyn DialectProvider>) -> Self {
        self.dialect_provider = Some(provider);
        self
    }

    /// The registry used to resolve names, a new registry is created if none is given.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Whether the dialect provider becomes the default provider of the registry (`true` by default).
    pub fn set_global_dialect_provider(mut self, value: bool) -> Self {
        self.set_global_dialect_provider = value;
        self
    }

    pub fn connection_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(DbConnection) -> DbConnection + Send + Sync + 'static,
    {
        self.hooks.filter = Some(Arc::new(filter));
        self
    }

    /// Force the connections to always return this command.
    pub fn always_return_command(mut self, command: Arc<dyn DriverCommand>) -> Self {
        self.hooks.always_return_command = Some(command);
        self
    }

    /// Force the connections to always return this transaction.
    pub fn always_return_transaction(mut self, transaction: Arc<dyn DriverTransaction>) -> Self {
        self.hooks.always_return_transaction = Some(transaction);
        self
    }

    pub fn on_dispose<F>(self, observer: F) -> Self
    where
        F: Fn(&DisposedConnection) + Send + Sync + 'static,
    {
        self.hooks.dispose_observers.write().unwrap_or_else(|poisoned| poisoned.into_inner()).push(Arc::new(observer));
        self
    }

    pub fn build(self) -> ConnectionFactory {
        let registry = self.registry.unwrap_or_else(Registry::new);
        if let (true, Some(provider)) = (self.set_global_dialect_provider, &self.dialect_provider) {
            registry.set_default_dialect_provider(provider.clone());
        }
        ConnectionFactory {
            inner: Arc::new(FactoryInner {
                lifetime: Lifetime::for_connection_string(self.connection_string.as_deref()),
                connection_string: self.connection_string,
                dialect_provider: self.dialect_provider,
                hooks: Arc::new(self.hooks),
                registry: RegistryRef::Owned(registry),
            }),
        }
    }
}

/// The capabilities of a connection factory, for the consumers that don't need to know the concrete factory type.
pub trait DbConnectionFactory: Send + Sync {
    fn create_connection(&self) -> Result<DbConnection>;
    fn create_named_connection(&self, named_connection: &str) -> Result<DbConnection>;
    fn open(&self) -> Result<DbConnection>;
    fn open_with(&self, configure: &dyn Fn(&mut DbConnection) -> Result<()>) -> Result<DbConnection>;
    fn open_named(&self, named_connection: &str) -> Result<DbConnection>;
    fn open_connection_string(&self, connection_string: &str, provider_name: Option<&str>) -> Result<DbConnection>;
    fn open_info(&self, info: Option<&ConnectionInfo>) -> Result<DbConnection>;
    fn use_connection(
        &self,
        connection: SharedConnection,
        transaction: Option<Arc<dyn DriverTransaction>>,
    ) -> DbConnection;
    fn open_write_locked(&self, named_connection: Option<&str>) -> Result<WriteLockedConnection>;
    fn dialect_provider(&self) -> Result<Arc<dyn DialectProvider>>;
    fn dialect_provider_for(&self, info: Option<&ConnectionInfo>) -> Result<Arc<dyn DialectProvider>>;
    fn register_dialect_provider(&self, provider_name: &str, provider: Arc<dyn DialectProvider>) -> Result<()>;
    fn register_connection(
        &self,
        named_connection: &str,
        connection_string: &str,
        provider: Arc<dyn DialectProvider>,
    ) -> Result<()>;
    fn named_connections(&self) -> Vec<String>;
}

impl DbConnectionFactory for ConnectionFactory {
    fn create_connection(&self) -> Result<DbConnection> {
        ConnectionFactory::create_connection(self)
    }

    fn create_named_connection(&self, named_connection: &str) -> Result<DbConnection> {
        ConnectionFactory::create_named_connection(self, named_connection)
    }

    fn open(&self) -> Result<DbConnection> {
        ConnectionFactory::open(self)
    }

    fn open_with(&self, configure: &dyn Fn(&mut DbConnection) -> Result<()>) -> Result<DbConnection> {
        ConnectionFactory::open_with(self, configure)
    }

    fn open_named(&self, named_connection: &str) -> Result<DbConnection> {
        ConnectionFactory::open_named(self, named_connection)
    }

    fn open_connection_string(&self, connection_string: &str, provider_name: Option<&str>) -> Result<DbConnection> {
        ConnectionFactory::open_connection_string(self, connection_string, provider_name)
    }

    fn open_info(&self, info: Option<&ConnectionInfo>) -> Result<DbConnection> {
        ConnectionFactory::open_info(self, info)
    }

    fn use_connection(
        &self,
        connection: SharedConnection,
        transaction: Option<Arc<dyn DriverTransaction>>,
    ) -> DbConnection {
        ConnectionFactory::use_connection(self, connection, transaction)
    }

    fn open_write_locked(&self, named_connection: Option<&str>) -> Result<WriteLockedConnection> {
        ConnectionFactory::open_write_locked(self, named_connection)
    }

    fn dialect_provider(&self) -> Result<Arc<dyn DialectProvider>> {
        ConnectionFactory::dialect_provider(self)
    }

    fn dialect_provider_for(&self, info: Option<&ConnectionInfo>) -> Result<Arc<dyn DialectProvider>> {
        ConnectionFactory::dialect_provider_for(self, info)
    }

    fn register_dialect_provider(&self, provider_name: &str, provider: Arc<dyn DialectProvider>) -> Result<()> {
        ConnectionFactory::register_dialect_provider(self, provider_name, provider)
    }

    fn register_connection(
        &self,
        named_connection: &str,
        connection_string: &str,
        provider: Arc<dyn DialectProvider>,
    ) -> Result<()> {
        ConnectionFactory::register_connection(self, named_connection, connection_string, provider)
    }

    fn named_connections(&self) -> Vec<String> {
        ConnectionFactory::named_connections(self)
    }
}
