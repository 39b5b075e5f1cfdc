use crate::driver::MockDialectProvider;
use crate::driver::MockDriverCommand;
use crate::driver::MockDriverConnection;
use crate::driver::MockDriverTransaction;
use crate::driver::{DialectProvider, DriverCommand, DriverTransaction};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared by all the mock connections created through a tracked provider.
///
/// ```rust
/// use dbconn_core::driver::MockDialectProvider;
/// use dbconn_core::mock::ConnectionTracker;
/// use dbconn_core::factory::ConnectionFactory;
///
/// let tracker = ConnectionTracker::new();
/// let factory = ConnectionFactory::new("mock://", MockDialectProvider::tracked("mock", &tracker));
/// let conn = factory.open().unwrap();
/// assert_eq!(tracker.opened(), 1);
/// drop(conn);
/// assert_eq!(tracker.closed(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    created: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl ConnectionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of connections opened and not closed yet.
    pub fn live(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }
}

/// A provider for mocking a [DialectProvider].
///
/// # Example
/// ```rust
/// use dbconn_core::driver::{DialectProvider, MockDialectProvider};
///
/// let provider = MockDialectProvider::with_default("mock");
///
/// // This should return a mock connection
/// let mut conn = provider.create_connection("mock://").unwrap();
/// assert!(!conn.is_open());
/// assert!(conn.open().is_ok());
/// assert!(conn.is_open());
///
/// // Creating a connection with a connection string containing "?error" should return an error
/// assert!(provider.create_connection("mock://?error").is_err());
///
/// // Opening a connection with a connection string containing "?open_error" should return an error
/// let mut conn = provider.create_connection("mock://?open_error").unwrap();
/// assert!(conn.open().is_err());
/// ```
impl MockDialectProvider {
    pub fn with_default(name: &str) -> Arc<dyn DialectProvider> {
        Arc::new(Self::build(name, Arc::new(ConnectionTracker::default())))
    }

    pub fn tracked(name: &str, tracker: &Arc<ConnectionTracker>) -> Arc<dyn DialectProvider> {
        Arc::new(Self::build(name, tracker.clone()))
    }

    fn build(name: &str, tracker: Arc<ConnectionTracker>) -> MockDialectProvider {
        let mut mock_provider = MockDialectProvider::new();
        mock_provider.expect_name().return_const(name.to_string());
        mock_provider.expect_quote_name().returning(|name| format!("\"{}\"", name));
        mock_provider.expect_param_placeholder().returning(|_| "?".to_string());
        mock_provider.expect_create_connection().returning(move |connection_string| {
            if connection_string.contains("?error") {
                return Err(format!("Invalid connection string: {}", connection_string).into());
            }
            tracker.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockDriverConnection::tracked(
                &tracker,
                !connection_string.contains("?open_error"),
            )))
        });
        mock_provider
    }
}

impl MockDriverConnection {
    pub fn with_default() -> MockDriverConnection {
        Self::tracked(&Arc::new(ConnectionTracker::default()), true)
    }

    /// A mock connection reporting its life cycle to the given tracker.
    ///
    /// When `can_open` is false, calling `open` returns an error.
    pub fn tracked(tracker: &Arc<ConnectionTracker>, can_open: bool) -> MockDriverConnection {
        let is_open = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut mock_connection = MockDriverConnection::default();
        mock_connection.expect_driver_name().return_const("mock".to_string());
        mock_connection.expect_set_option().returning(|name, _value| match name {
            "timeout" => Ok(()),
            _ => Err(format!("Unknown option: {}", name).into()),
        });
        let open_state = is_open.clone();
        let open_tracker = tracker.clone();
        mock_connection.expect_open().returning(move || match can_open {
            true => {
                open_state.store(true, Ordering::SeqCst);
                open_tracker.opened.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            false => Err("Unable to open the connection".into()),
        });
        let is_open_state = is_open.clone();
        mock_connection.expect_is_open().returning(move || is_open_state.load(Ordering::SeqCst));
        mock_connection.expect_create_command().returning(|| Ok(Box::new(MockDriverCommand::with_default())));
        mock_connection
            .expect_begin_transaction()
            .returning(|| Ok(Box::new(MockDriverTransaction::with_default())));
        let close_tracker = tracker.clone();
        mock_connection.expect_close().returning(move || {
            if is_open.swap(false, Ordering::SeqCst) {
                close_tracker.closed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
        mock_connection
    }
}

/// A default mock command.
///
/// - `execute` returns 1 unless the statement starts with "SELECT".
/// - `query_scalar` returns the number following "SELECT", `None` for "SELECT NULL" and fails for anything else.
impl MockDriverCommand {
    pub fn with_default() -> MockDriverCommand {
        let mut mock_command = MockDriverCommand::new();
        mock_command.expect_execute().returning(|statement| match statement.starts_with("SELECT ") {
            false => Ok(1),
            true => Err("Invalid statement".into()),
        });
        mock_command.expect_query_scalar().returning(|statement| {
            match regex::Regex::new(r"^SELECT\s+(-?[0-9]+|NULL)$")?.captures(statement) {
                Some(captures) => match &captures[1] {
                    "NULL" => Ok(None),
                    value => Ok(Some(value.parse::<i64>()?)),
                },
                None => Err(format!("Invalid statement: {}", statement).into()),
            }
        });
        mock_command
    }

    pub fn shared() -> Arc<dyn DriverCommand> {
        Arc::new(Self::with_default())
    }
}

impl MockDriverTransaction {
    pub fn with_default() -> MockDriverTransaction {
        let mut mock_transaction = MockDriverTransaction::new();
        mock_transaction.expect_commit().returning(|| Ok(()));
        mock_transaction.expect_rollback().returning(|| Ok(()));
        mock_transaction
    }

    pub fn shared() -> Arc<dyn DriverTransaction> {
        Arc::new(Self::with_default())
    }
}
