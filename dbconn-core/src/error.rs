use thiserror::Error;

/// Error type for library.
///
/// This library is defining 2 error types:
/// - {Error}: is the main error type for the library and the one the users of the library will interact with.
/// - {DriverError}: is the error type that the drivers will use to return errors. Only developers of drivers will
///   interact with this error type. Driver errors are never translated, they are carried as is by
///   [Error::DriverError].
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument was missing or empty.
    #[error("Argument '{name}' must be set")]
    ArgumentNull { name: &'static str },

    /// An argument was provided but its value is not acceptable.
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// The factory is not configured well enough to create a connection (no connection string, no dialect
    /// provider...).
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The dialect provider requested by name has never been registered.
    #[error("Dialect provider is not registered '{provider}'")]
    DialectNotSupported { provider: String },

    /// The named connection requested has never been registered.
    #[error("No factory registered is named '{name}'")]
    NamedConnectionNotFound { name: String },

    /// The operation was cancelled before the connection could be handed over to the caller.
    #[error("The operation was cancelled")]
    Cancelled,

    /// The connection was already closed.
    #[error("Connection {connection_id} is closed")]
    ConnectionClosed { connection_id: uuid::Uuid },

    #[error("{error}")]
    InternalError {
        error: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An error returned by the driver.
    #[error("{error}")]
    DriverError {
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// The category of an [Error].
///
/// Configuration errors and resolution errors are kept apart: a missing dialect provider is [ErrorKind::NotSupported]
/// while a missing named connection is [ErrorKind::NotFound].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Argument,
    Configuration,
    NotSupported,
    NotFound,
    Cancelled,
    Closed,
    Driver,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ArgumentNull { .. } | Error::InvalidArgument { .. } => ErrorKind::Argument,
            Error::InvalidConfiguration { .. } => ErrorKind::Configuration,
            Error::DialectNotSupported { .. } => ErrorKind::NotSupported,
            Error::NamedConnectionNotFound { .. } => ErrorKind::NotFound,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::ConnectionClosed { .. } => ErrorKind::Closed,
            Error::DriverError { .. } => ErrorKind::Driver,
            Error::InternalError { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid_configuration<S: Into<String>>(reason: S) -> Self {
        Error::InvalidConfiguration { reason: reason.into() }
    }
}

/// Driver errors are boxed errors, if the box is actually holding an [Error] it's unwrapped instead of being
/// nested into a [Error::DriverError].
impl From<crate::driver::DriverError> for Error {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        match err.downcast::<Error>() {
            Ok(error) => *error,
            Err(error) => Error::DriverError { error },
        }
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::InternalError { error: e.into() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidConfiguration { reason: e.to_string() }
    }
}
