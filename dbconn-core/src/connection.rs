use crate::driver::{DialectProvider, DriverCommand, DriverConnection, DriverTransaction};
use crate::factory::ConnectionFactory;
use crate::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error};
use uuid::Uuid;

/// A driver connection shared by one or more [DbConnection].
pub type SharedConnection = Arc<ConnectionCore>;

/// The driver connection along with the identifier used to correlate logs across concurrent connections.
///
/// The driver connection is closed when the core is closed explicitly or when the last reference to the core is
/// dropped.
pub struct ConnectionCore {
    id: Uuid,
    driver_name: String,
    inner: Mutex<Option<Box<dyn DriverConnection>>>,
}

impl ConnectionCore {
    pub fn new(inner: Box<dyn DriverConnection>) -> SharedConnection {
        let id = Uuid::new_v4();
        let driver_name = inner.driver_name().to_string();
        debug!("Connection {} created (driver: {})", id, driver_name);
        Arc::new(Self { id, driver_name, inner: Mutex::new(Some(inner)) })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn is_open(&self) -> bool {
        self.driver().as_ref().map(|inner| inner.is_open()).unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.driver().is_none()
    }

    /// Run a function against the driver connection.
    ///
    /// Returns [Error::ConnectionClosed] if the connection has already been closed.
    pub fn with_driver<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn DriverConnection) -> Result<T>,
    {
        match self.driver().as_mut() {
            Some(inner) => f(inner.as_mut()),
            None => Err(Error::ConnectionClosed { connection_id: self.id }),
        }
    }

    /// Open the driver connection unless it is already opened.
    pub fn open(&self) -> Result<()> {
        self.with_driver(|inner| {
            if !inner.is_open() {
                inner.open()?;
                debug!("Connection {} opened", self.id);
            }
            Ok(())
        })
    }

    /// Close the driver connection.
    ///
    /// Closing an already closed connection is a no-op.
    pub fn close(&self) -> Result<()> {
        let inner = self.driver().take();
        match inner {
            Some(inner) => {
                debug!("Connection {} closed", self.id);
                inner.close().map_err(Error::from)
            }
            None => Ok(()),
        }
    }

    // The guarded value is either a connection or nothing, a panic while holding the lock leaves it usable.
    fn driver(&self) -> MutexGuard<'_, Option<Box<dyn DriverConnection>>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ConnectionCore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close connection {}: {}", self.id, e);
        }
    }
}

/// Who is responsible for closing the driver connection when a [DbConnection] is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The handle owns the driver connection and closes it when disposed.
    AutoDispose,
    /// The driver connection is owned by the factory and shared by all its handles (in-memory databases).
    Shared,
    /// The driver connection is owned by the caller, see [ConnectionFactory::use_connection].
    External,
}

/// What the dispose observers of a factory are told about a connection being disposed.
#[derive(Debug, Clone)]
pub struct DisposedConnection {
    pub connection_id: Uuid,
    pub named_connection: Option<String>,
    pub ownership: Ownership,
    /// `true` if the driver connection was actually closed, `false` for shared connections or a failed close.
    pub closed: bool,
}

/// A connection handed over by a [ConnectionFactory].
///
/// ```rust,ignore
/// use dbconn_core::factory::ConnectionFactory;
///
/// let factory = ConnectionFactory::new(":memory:", sqlite_provider);
/// let conn = factory.open()?;
/// conn.create_command()?.execute("CREATE TABLE employee (id BIGINT)")?;
/// // dropping `conn` closes the driver connection unless it's shared.
/// ```
pub struct DbConnection {
    core: SharedConnection,
    ownership: Ownership,
    factory: ConnectionFactory,
    named_connection: Option<String>,
    transaction: Option<Arc<dyn DriverTransaction>>,
    disposed: bool,
}

impl DbConnection {
    pub(crate) fn new(
        core: SharedConnection,
        ownership: Ownership,
        factory: ConnectionFactory,
        named_connection: Option<String>,
    ) -> Self {
        Self { core, ownership, factory, named_connection, transaction: None, disposed: false }
    }

    pub(crate) fn with_transaction(mut self, transaction: Option<Arc<dyn DriverTransaction>>) -> Self {
        self.transaction = transaction;
        self
    }

    /// The unique identifier of the connection, stable for the connection's lifetime.
    pub fn id(&self) -> Uuid {
        self.core.id()
    }

    /// Get the driver name used by the connection.
    pub fn driver_name(&self) -> &str {
        self.core.driver_name()
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// `true` if disposing this handle closes the driver connection.
    pub fn auto_dispose(&self) -> bool {
        self.ownership == Ownership::AutoDispose
    }

    /// The name of the connection this handle was resolved through, if any.
    pub fn named_connection(&self) -> Option<&str> {
        self.named_connection.as_deref()
    }

    /// The factory that created this connection.
    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    pub fn dialect_provider(&self) -> Result<Arc<dyn DialectProvider>> {
        self.factory.dialect_provider()
    }

    /// The driver connection, to be handed over to [ConnectionFactory::use_connection].
    pub fn shared(&self) -> SharedConnection {
        self.core.clone()
    }

    /// `true` if both handles are backed by the same driver connection.
    pub fn same_connection(&self, other: &DbConnection) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    pub fn is_open(&self) -> bool {
        self.core.is_open()
    }

    /// Set a driver specific option, usually from the `configure` callback of the `open_with` functions.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.core.with_driver(|inner| inner.set_option(name, value).map_err(Error::from))
    }

    /// Open the connection.
    ///
    /// Opening a connection already opened is a no-op, which is always the case for the shared connection of an
    /// in-memory database after its first use.
    pub fn open(&mut self) -> Result<()> {
        self.core.open()
    }

    /// Create a new command.
    ///
    /// If the factory is configured to always return a given command, that command is returned instead of asking the
    /// driver for a new one.
    pub fn create_command(&self) -> Result<Command> {
        let inner = match self.factory.always_return_command() {
            Some(command) => command,
            None => self.core.with_driver(|inner| Ok(Arc::from(inner.create_command()?)))?,
        };
        Ok(Command { inner, connection_id: self.id() })
    }

    /// Start a new transaction.
    ///
    /// If the factory is configured to always return a given transaction, that transaction is returned instead of
    /// asking the driver to start a new one.
    pub fn begin_transaction(&mut self) -> Result<Transaction> {
        let inner = match self.factory.always_return_transaction() {
            Some(transaction) => transaction,
            None => self.core.with_driver(|inner| Ok(Arc::from(inner.begin_transaction()?)))?,
        };
        Ok(Transaction { inner, connection_id: self.id() })
    }

    /// The transaction this connection was enlisted in by [ConnectionFactory::use_connection].
    pub fn transaction(&self) -> Option<Transaction> {
        self.transaction.as_ref().map(|inner| Transaction { inner: inner.clone(), connection_id: self.id() })
    }

    /// Close the connection.
    ///
    /// This is the same as dropping the connection except that the error returned by the driver, if any, is returned
    /// instead of being logged.
    pub fn close(mut self) -> Result<()> {
        self.dispose()
    }

    fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        let result = match self.ownership {
            Ownership::AutoDispose => self.core.close(),
            Ownership::Shared | Ownership::External => Ok(()),
        };
        self.factory.notify_disposed(&DisposedConnection {
            connection_id: self.id(),
            named_connection: self.named_connection.clone(),
            ownership: self.ownership,
            closed: self.ownership == Ownership::AutoDispose && result.is_ok(),
        });
        result
    }
}

impl Drop for DbConnection {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            error!("Failed to close connection {}: {}", self.id(), e);
        }
    }
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("id", &self.id())
            .field("driver_name", &self.driver_name())
            .field("ownership", &self.ownership)
            .field("named_connection", &self.named_connection)
            .finish()
    }
}

/// A command created by a [DbConnection].
#[derive(Clone)]
pub struct Command {
    inner: Arc<dyn DriverCommand>,
    connection_id: Uuid,
}

impl Command {
    /// Execute a statement and return the number of rows affected.
    pub fn execute<S: AsRef<str>>(&self, statement: S) -> Result<u64> {
        self.inner.execute(statement.as_ref()).map_err(Error::from)
    }

    /// Execute a statement and return the first column of the first row.
    pub fn query_scalar<S: AsRef<str>>(&self, statement: S) -> Result<Option<i64>> {
        self.inner.query_scalar(statement.as_ref()).map_err(Error::from)
    }

    /// The identifier of the connection that created this command.
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn as_driver(&self) -> &Arc<dyn DriverCommand> {
        &self.inner
    }
}

/// A transaction started by a [DbConnection].
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<dyn DriverTransaction>,
    connection_id: Uuid,
}

impl Transaction {
    pub fn commit(&self) -> Result<()> {
        self.inner.commit().map_err(Error::from)
    }

    pub fn rollback(&self) -> Result<()> {
        self.inner.rollback().map_err(Error::from)
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn as_driver(&self) -> &Arc<dyn DriverTransaction> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDialectProvider, MockDriverCommand, MockDriverConnection};
    use crate::mock::ConnectionTracker;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_core_open_close() {
        let core = ConnectionCore::new(Box::new(MockDriverConnection::with_default()));
        assert_eq!(core.driver_name(), "mock");
        assert!(!core.is_open());
        assert_ok!(core.open());
        assert!(core.is_open());
        assert_ok!(core.open()); // no-op
        assert_ok!(core.close());
        assert!(core.is_closed());
        assert_ok!(core.close()); // no-op
        assert!(matches!(core.open(), Err(Error::ConnectionClosed { .. })));
    }

    #[test]
    fn test_core_closed_on_drop() {
        let tracker = ConnectionTracker::new();
        let core = ConnectionCore::new(Box::new(MockDriverConnection::tracked(&tracker, true)));
        assert_ok!(core.open());
        let other = core.clone();
        drop(core);
        assert_eq!(tracker.closed(), 0);
        drop(other);
        assert_eq!(tracker.closed(), 1);
    }

    #[test]
    fn test_connection() {
        let tracker = ConnectionTracker::new();
        let factory = ConnectionFactory::new("mock://", MockDialectProvider::tracked("mock", &tracker));
        let mut conn = assert_ok!(factory.create_connection());
        assert_eq!(conn.driver_name(), "mock");
        assert!(conn.auto_dispose());
        assert!(!conn.is_open());
        assert_ok!(conn.set_option("timeout", "10"));
        assert_err!(conn.set_option("unknown", "10"));
        assert_ok!(conn.open());
        assert!(conn.is_open());

        // commands report the connection that created them
        let command = assert_ok!(conn.create_command());
        assert_eq!(command.connection_id(), conn.id());
        assert_eq!(assert_ok!(command.execute("INSERT 1")), 1);
        assert_eq!(assert_ok!(command.query_scalar("SELECT 42")), Some(42));
        assert_eq!(assert_ok!(command.query_scalar("SELECT NULL")), None);
        assert!(command.query_scalar("SELECT X").is_err());

        let transaction = assert_ok!(conn.begin_transaction());
        assert_ok!(transaction.commit());
        assert!(conn.transaction().is_none());

        assert_ok!(conn.close());
        assert_eq!(tracker.opened(), 1);
        assert_eq!(tracker.closed(), 1);
    }

    #[test]
    fn test_always_return_command() {
        let command: Arc<dyn DriverCommand> = Arc::new(MockDriverCommand::with_default());
        let factory = ConnectionFactory::builder()
            .connection_string("mock://")
            .dialect_provider(MockDialectProvider::with_default("mock"))
            .always_return_command(command.clone())
            .build();
        let conn = assert_ok!(factory.open());
        assert!(Arc::ptr_eq(assert_ok!(conn.create_command()).as_driver(), &command));
        assert!(Arc::ptr_eq(assert_ok!(conn.create_command()).as_driver(), &command));

        // a second connection from the same factory gets the same command too
        let other = assert_ok!(factory.open());
        assert!(Arc::ptr_eq(assert_ok!(other.create_command()).as_driver(), &command));
    }

    #[test]
    fn test_disposed_after_failed_close() {
        let mut provider = MockDialectProvider::new();
        provider.expect_name().return_const("mock".to_string());
        provider.expect_create_connection().returning(|_| {
            let mut mock_connection = MockDriverConnection::new();
            mock_connection.expect_driver_name().return_const("mock".to_string());
            mock_connection.expect_is_open().return_const(true);
            mock_connection.expect_close().returning(|| Err("disk I/O error".into()));
            Ok(Box::new(mock_connection))
        });
        let factory = ConnectionFactory::new("mock://", Arc::new(provider));
        let disposed = Arc::new(Mutex::new(Vec::new()));
        let observed = disposed.clone();
        factory.on_dispose(move |connection| observed.lock().unwrap().push(connection.closed));

        let conn = assert_ok!(factory.create_connection());
        assert_err!(conn.close());
        assert_eq!(*disposed.lock().unwrap(), vec![false]);
    }
}
