#[cfg(any(test, feature = "mock"))]
use mockall::automock;

/// The error type that the drivers will use to return errors.
///
/// It's a pass-through error type that the drivers will use to return errors. Because each driver may have to deal with
/// specific error types coming from the underlying crate used to interact with the database, the drivers will have to
/// convert those errors to this error type.
///
/// It doesn't prevent the drivers from using {{crate::error::Error}} when appropriate but it should be converted into
/// this error type using {{crate::error::Error::into}}.
pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, DriverError>;

/// A backend-specific plugin able to create connections for a given connection string.
///
/// Dialect providers are registered once, at startup, under a provider name and then shared by all the factories
/// using them. They must be stateless enough to be used concurrently.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait DialectProvider: Send + Sync {
    /// Get the name of the dialect.
    ///
    /// This name is mostly intended for logging and debugging purposes, the name used to resolve the provider is the
    /// one given at registration.
    fn name(&self) -> &str;

    /// Create a new connection for the given connection string.
    ///
    /// The connection returned must not be opened yet: the caller may still configure it before calling
    /// {{DriverConnection::open}}.
    fn create_connection(&self, connection_string: &str) -> Result<Box<dyn DriverConnection>>;

    /// Quote an identifier (table name, column name...).
    fn quote_name(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Get the placeholder to use for the parameter at the given position (starting at 1).
    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }
}

impl std::fmt::Debug for dyn DialectProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DialectProvider").field(&self.name()).finish()
    }
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait DriverConnection: Send {
    /// Get the name of the driver.
    fn driver_name(&self) -> &str;

    /// Set a driver specific option.
    ///
    /// Options are expected to be set before the connection is opened, drivers are free to reject an option they
    /// don't know or an option that can only be set before opening the connection.
    fn set_option(&mut self, name: &str, value: &str) -> Result<()>;

    /// Open the connection.
    fn open(&mut self) -> Result<()>;

    /// Check if the connection is opened.
    fn is_open(&self) -> bool;

    /// Create a new command bound to this connection.
    fn create_command(&self) -> Result<Box<dyn DriverCommand>>;

    /// Start a new transaction.
    fn begin_transaction(&mut self) -> Result<Box<dyn DriverTransaction>>;

    /// Close the connection.
    fn close(self: Box<Self>) -> Result<()>;
}

/// A command ready to be executed against the connection that created it.
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait DriverCommand: Send + Sync {
    /// Execute a statement and return the number of rows affected.
    fn execute(&self, statement: &str) -> Result<u64>;

    /// Execute a statement and return the first column of the first row.
    ///
    /// Returns `Ok(None)` if the statement returned no rows or if the value is `NULL`.
    fn query_scalar(&self, statement: &str) -> Result<Option<i64>>;
}

#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait DriverTransaction: Send + Sync {
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}
