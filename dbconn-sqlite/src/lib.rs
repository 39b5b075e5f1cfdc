use dbconn_core::driver::{DialectProvider, DriverConnection, Result};
use dbconn_core::registry::Registry;
use std::sync::Arc;
use tracing::error;

pub mod connection_string;
mod driver;

pub use connection_string::{IN_MEMORY, IN_MEMORY_URI};
pub use driver::{OPTION_BUSY_TIMEOUT, OPTION_PRAGMA_PREFIX};

/// The name of the driver for SQLite.
pub const DRIVER_NAME: &str = "sqlite";

/// The name the provider is registered with.
pub const PROVIDER_NAME: &str = "sqlite";

/// The dialect provider for SQLite.
///
/// # Example
/// ```rust
/// use dbconn_core::factory::ConnectionFactory;
/// use dbconn_sqlite::SqliteDialect;
///
/// let factory = ConnectionFactory::new(":memory:", SqliteDialect::provider());
/// let conn = factory.open().unwrap();
/// conn.create_command().unwrap().execute("CREATE TABLE employee (id INTEGER PRIMARY KEY)").unwrap();
/// ```
#[derive(Debug, Default)]
pub struct SqliteDialect {}

impl SqliteDialect {
    pub fn provider() -> Arc<dyn DialectProvider> {
        Arc::new(SqliteDialect {})
    }
}

impl DialectProvider for SqliteDialect {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn create_connection(&self, connection_string: &str) -> Result<Box<dyn DriverConnection>> {
        let target = connection_string::SqliteConnectionString::parse(connection_string)?;
        Ok(Box::new(driver::SqliteConnection::new(target)))
    }
}

/// Register the SQLite dialect provider into the given registry.
pub fn register_dialect_provider(registry: &Registry) -> dbconn_core::Result<()> {
    registry.register_dialect_provider(PROVIDER_NAME, SqliteDialect::provider())
}

/// Register the SQLite dialect provider into the process-wide registry, only the first call has an effect.
pub fn register_global_dialect_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if let Err(e) = register_dialect_provider(&Registry::global()) {
            error!("Failed to register the SQLite dialect provider: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctor::ctor;
    use dbconn_core::error::ErrorKind;
    use dbconn_core::factory::ConnectionFactory;
    use tokio_test::assert_ok;

    #[ctor]
    fn before_all() {
        register_global_dialect_provider();
    }

    #[test]
    fn test_global_registration() {
        assert!(Registry::global().dialects().contains(PROVIDER_NAME));
        let provider = assert_ok!(Registry::global().dialects().resolve("sqlite"));
        assert_eq!(provider.name(), "sqlite");
        assert_eq!(provider.quote_name("employee"), "\"employee\"");
        assert_eq!(provider.param_placeholder(1), "?");
    }

    #[test]
    fn test_in_memory_factory_keeps_data() {
        let factory = ConnectionFactory::new(":memory:", SqliteDialect::provider());
        assert!(!factory.auto_dispose_connection());
        {
            let conn = assert_ok!(factory.open());
            let command = assert_ok!(conn.create_command());
            assert_ok!(command.execute("CREATE TABLE employee (id INTEGER PRIMARY KEY)"));
            assert_ok!(command.execute("INSERT INTO employee (id) VALUES (1)"));
        }
        let conn = assert_ok!(factory.open());
        let command = assert_ok!(conn.create_command());
        assert_eq!(assert_ok!(command.query_scalar("SELECT COUNT(*) FROM employee")), Some(1));
    }

    #[test]
    fn test_file_connections_are_independent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("app.db");
        let factory = ConnectionFactory::new(file_path.display().to_string(), SqliteDialect::provider());
        assert!(factory.auto_dispose_connection());
        let first = assert_ok!(factory.open());
        let second = assert_ok!(factory.open_with(|conn| conn.set_option(OPTION_BUSY_TIMEOUT, "1000")));
        assert!(!first.same_connection(&second));
        assert_ok!(assert_ok!(first.create_command()).execute("CREATE TABLE employee (id INTEGER PRIMARY KEY)"));
        assert_ok!(first.close());
        let command = assert_ok!(second.create_command());
        assert_eq!(assert_ok!(command.query_scalar("SELECT COUNT(*) FROM employee")), Some(0));
    }

    #[test]
    fn test_invalid_connection_string() {
        let factory = ConnectionFactory::new("Data Source=app.db;Pooling=True", SqliteDialect::provider());
        let error = factory.open().err().unwrap();
        assert_eq!(error.kind(), ErrorKind::Argument);
    }
}
