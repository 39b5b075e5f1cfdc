//! # Crate Topology
//!
//! The [`dbconn`] project is implemented as multiple sub-crates, which are then re-exported by this top-level crate.
//!
//! Crate authors can choose to depend on this top-level crate, or just the sub-crates they need.
//!
//! The current list of sub-crates is:
//!
//! * [`dbconn-core`][dbconn_core] - the registries, the connection factory and the driver traits
//! * [`dbconn-sqlite`][dbconn_sqlite] - the [SQLite](https://sqlite.org) dialect provider
//! * [`dbconn-async`][dbconn_async] - asynchronous and cancellable open paths

pub use dbconn_core::config::{FactoryConfig, NamedConnectionConfig};
pub use dbconn_core::connection::{Command, DbConnection, DisposedConnection, Ownership, SharedConnection, Transaction};
pub use dbconn_core::connection_info::{ConnectionInfo, ConnectionTarget};
pub use dbconn_core::driver::DialectProvider;
pub use dbconn_core::error::ErrorKind;
pub use dbconn_core::factory::{ConnectionFactory, DbConnectionFactory, FactoryBuilder, FactoryMode};
pub use dbconn_core::registry::Registry;
pub use dbconn_core::write_locked::WriteLockedConnection;
pub use dbconn_core::{Error, Result};

#[cfg(feature = "async-conn")]
pub mod futures {
    pub use dbconn_async::AsyncConnectionFactory;
    pub use dbconn_async::CancellationToken;
}

/// Register the dialect providers enabled by the features of this crate into the given registry.
pub fn register_dialect_providers(registry: &Registry) -> Result<()> {
    #[cfg(feature = "sqlite")]
    dbconn_sqlite::register_dialect_provider(registry)?;
    #[cfg(not(feature = "sqlite"))]
    let _ = registry;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctor::ctor;
    use dbconn_async::AsyncConnectionFactory;
    use dbconn_core::driver::{MockDialectProvider, MockDriverCommand};
    use dbconn_sqlite::SqliteDialect;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use tokio_util::sync::CancellationToken;

    #[ctor]
    fn before_all() {
        dbconn_sqlite::register_global_dialect_provider();
    }

    fn sqlite_registry() -> Arc<Registry> {
        let registry = Registry::new();
        assert_ok!(dbconn_sqlite::register_dialect_provider(&registry));
        registry
    }

    #[test]
    fn test_global_registry() {
        let provider = assert_ok!(Registry::global().dialects().resolve("sqlite"));
        let factory = ConnectionFactory::builder()
            .connection_string(":memory:")
            .dialect_provider(provider)
            .registry(Registry::global())
            .set_global_dialect_provider(false)
            .build();
        let conn = assert_ok!(factory.open());
        assert_eq!(conn.driver_name(), "sqlite");
    }

    #[test]
    fn test_in_memory_database_outlives_connections() {
        let factory = ConnectionFactory::builder()
            .connection_string("DataSource=:memory:")
            .dialect_provider(SqliteDialect::provider())
            .registry(sqlite_registry())
            .build();
        assert_eq!(factory.mode(), FactoryMode::SingletonBacked);
        assert_ok!(assert_ok!(assert_ok!(factory.open()).create_command()).execute("CREATE TABLE t (id INTEGER)"));
        assert_ok!(assert_ok!(assert_ok!(factory.open()).create_command()).execute("INSERT INTO t VALUES (1)"));
        let conn = assert_ok!(factory.open());
        assert_eq!(assert_ok!(assert_ok!(conn.create_command()).query_scalar("SELECT COUNT(*) FROM t")), Some(1));
    }

    #[test]
    fn test_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let reports = temp_dir.path().join("reports.db");
        let config = assert_ok!(FactoryConfig::from_vars(vec![
            ("DBCONN_CONNECTION_STRING".to_string(), ":memory:".to_string()),
            ("DBCONN_PROVIDER".to_string(), "sqlite".to_string()),
            ("DBCONN_CONNECTION__REPORTING".to_string(), format!("Data Source={}", reports.display())),
        ]));
        let factory = assert_ok!(config.build(sqlite_registry()));
        assert_eq!(factory.named_connections(), vec!["reporting".to_string()]);

        let conn = assert_ok!(factory.open_named("reporting"));
        assert_ok!(assert_ok!(conn.create_command()).execute("CREATE TABLE report (id INTEGER)"));
        assert!(reports.exists());

        let config = FactoryConfig { provider_name: Some("postgres".to_string()), ..Default::default() };
        assert_eq!(assert_err!(config.build(sqlite_registry())).kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_resolution_errors() {
        let factory = ConnectionFactory::builder()
            .connection_string(":memory:")
            .dialect_provider(SqliteDialect::provider())
            .registry(sqlite_registry())
            .build();
        let not_supported = assert_err!(factory.open_connection_string(":memory:", Some("unknown-provider")));
        let not_found = assert_err!(factory.open_named("no-such-name"));
        assert_eq!(not_supported.kind(), ErrorKind::NotSupported);
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_ne!(not_supported.kind(), not_found.kind());
        assert_eq!(factory.registry().unwrap().dialects().names(), vec!["sqlite".to_string()]);
    }

    #[test]
    fn test_write_locked_file_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("app.db");
        let factory = ConnectionFactory::builder()
            .connection_string(path.display().to_string())
            .dialect_provider(SqliteDialect::provider())
            .registry(sqlite_registry())
            .build();
        assert_ok!(assert_ok!(assert_ok!(factory.open()).create_command())
            .execute("CREATE TABLE counter (id INTEGER PRIMARY KEY, value INTEGER)"));
        assert_ok!(assert_ok!(assert_ok!(factory.open()).create_command())
            .execute("INSERT INTO counter (id, value) VALUES (1, 0)"));

        // read-modify-write cycles would lose updates without the write lock
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let factory = factory.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        let conn = factory.open_write_locked(None).unwrap();
                        let command = conn.create_command().unwrap();
                        let value = command.query_scalar("SELECT value FROM counter WHERE id = 1").unwrap().unwrap();
                        std::thread::sleep(Duration::from_millis(1));
                        command.execute(format!("UPDATE counter SET value = {} WHERE id = 1", value + 1)).unwrap();
                        drop(command);
                        conn.close().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let conn = assert_ok!(factory.open());
        let command = assert_ok!(conn.create_command());
        assert_eq!(assert_ok!(command.query_scalar("SELECT value FROM counter WHERE id = 1")), Some(40));
    }

    #[test]
    fn test_capability_interface() {
        let command = MockDriverCommand::shared();
        let registry = sqlite_registry();
        let factory: Arc<dyn DbConnectionFactory> = Arc::new(
            ConnectionFactory::builder()
                .connection_string(":memory:")
                .dialect_provider(SqliteDialect::provider())
                .registry(registry)
                .always_return_command(command.clone())
                .build(),
        );
        assert_ok!(factory.register_dialect_provider("mock", MockDialectProvider::with_default("mock")));
        assert_ok!(factory.register_connection("audit", "mock://audit", MockDialectProvider::with_default("mock")));
        assert_eq!(factory.named_connections(), vec!["audit".to_string()]);

        let conn = assert_ok!(factory.open_with(&|conn| conn.set_option("pragma.foreign_keys", "ON")));
        assert!(Arc::ptr_eq(assert_ok!(conn.create_command()).as_driver(), &command));
        let info = ConnectionInfo::named("audit");
        assert_eq!(assert_ok!(factory.dialect_provider_for(Some(&info))).name(), "mock");
        assert_eq!(assert_ok!(factory.open_info(Some(&info))).driver_name(), "mock");
    }

    #[tokio::test]
    async fn test_open_async_sqlite() {
        let factory = ConnectionFactory::builder()
            .connection_string(":memory:")
            .dialect_provider(SqliteDialect::provider())
            .registry(sqlite_registry())
            .build();
        let conn = assert_ok!(factory.open_async(CancellationToken::new()).await);
        assert!(conn.is_open());
        assert!(conn.same_connection(&assert_ok!(factory.open())));

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(factory.open_async(token).await, Err(Error::Cancelled)));

        // the shared connection is owned by the factory, a cancelled open doesn't close it
        let command = assert_ok!(conn.create_command());
        assert_eq!(assert_ok!(command.query_scalar("SELECT 1")), Some(1));
    }
}
