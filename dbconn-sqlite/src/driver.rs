use crate::connection_string::{Location, OpenMode, SqliteConnectionString};
use crate::DRIVER_NAME;
use dbconn_core::driver::{DriverCommand, DriverConnection, DriverTransaction, Result};
use dbconn_core::Error;
use rusqlite::{OpenFlags, OptionalExtension};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// The option to set the busy timeout (in milliseconds) before opening the connection.
pub const OPTION_BUSY_TIMEOUT: &str = "busy_timeout";

/// The prefix of the options setting a pragma right after the connection is opened (`pragma.foreign_keys=ON`).
pub const OPTION_PRAGMA_PREFIX: &str = "pragma.";

type SharedSqlite = Arc<Mutex<rusqlite::Connection>>;

fn lock(conn: &SharedSqlite) -> MutexGuard<'_, rusqlite::Connection> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct SqliteConnection {
    target: SqliteConnectionString,
    pragmas: Vec<(String, String)>,
    conn: Option<SharedSqlite>,
}

impl SqliteConnection {
    pub(crate) fn new(target: SqliteConnectionString) -> Self {
        Self { target, pragmas: Vec::new(), conn: None }
    }

    fn connection(&self) -> Result<&SharedSqlite> {
        self.conn.as_ref().ok_or_else(|| "The connection is not opened".into())
    }

    fn open_flags(&self) -> OpenFlags {
        let flags = OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        match self.target.mode {
            OpenMode::ReadOnly => flags | OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => flags | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadWriteCreate => flags | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        }
    }
}

impl DriverConnection for SqliteConnection {
    fn driver_name(&self) -> &str {
        DRIVER_NAME
    }

    fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        if self.conn.is_some() {
            return Err(Box::new(Error::InvalidArgument {
                name: "option",
                reason: format!("'{}' must be set before opening the connection", name),
            }));
        }
        if name == OPTION_BUSY_TIMEOUT {
            let millis = value.parse::<u64>().map_err(|_| {
                Box::new(Error::InvalidArgument { name: "option", reason: format!("Invalid busy_timeout '{}'", value) })
            })?;
            self.target.busy_timeout = Some(Duration::from_millis(millis));
            Ok(())
        } else if let Some(pragma) = name.strip_prefix(OPTION_PRAGMA_PREFIX).filter(|pragma| !pragma.is_empty()) {
            self.pragmas.push((pragma.to_string(), value.to_string()));
            Ok(())
        } else {
            Err(Box::new(Error::InvalidArgument { name: "option", reason: format!("Unknown option '{}'", name) }))
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = match &self.target.location {
            Location::Memory => rusqlite::Connection::open_in_memory()?,
            Location::File(path) => rusqlite::Connection::open_with_flags(path, self.open_flags())?,
        };
        if let Some(busy_timeout) = self.target.busy_timeout {
            conn.busy_timeout(busy_timeout)?;
        }
        for (pragma, value) in &self.pragmas {
            conn.pragma_update(None, pragma, value)?;
        }
        debug!("SQLite database opened (location: {:?}, mode: {:?})", self.target.location, self.target.mode);
        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn create_command(&self) -> Result<Box<dyn DriverCommand>> {
        Ok(Box::new(SqliteCommand { conn: self.connection()?.clone() }))
    }

    fn begin_transaction(&mut self) -> Result<Box<dyn DriverTransaction>> {
        let conn = self.connection()?.clone();
        lock(&conn).execute_batch("BEGIN")?;
        Ok(Box::new(SqliteTransaction { conn, completed: AtomicBool::new(false) }))
    }

    /// Close the database.
    ///
    /// If commands or transactions created by this connection are still alive, the database is closed when the last
    /// of them is dropped.
    fn close(self: Box<Self>) -> Result<()> {
        match self.conn.map(Arc::try_unwrap) {
            Some(Ok(conn)) => {
                let conn = conn.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
                conn.close().map_err(|(_, e)| e)?;
                debug!("SQLite database closed");
                Ok(())
            }
            Some(Err(_)) => {
                debug!("SQLite database still in use, it will be closed by its last user");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

struct SqliteCommand {
    conn: SharedSqlite,
}

impl DriverCommand for SqliteCommand {
    fn execute(&self, statement: &str) -> Result<u64> {
        Ok(lock(&self.conn).execute(statement, [])? as u64)
    }

    fn query_scalar(&self, statement: &str) -> Result<Option<i64>> {
        let value = lock(&self.conn).query_row(statement, [], |row| row.get::<_, Option<i64>>(0)).optional()?;
        Ok(value.flatten())
    }
}

/// A transaction started with `BEGIN`, rolled back when dropped unless committed or rolled back explicitly.
struct SqliteTransaction {
    conn: SharedSqlite,
    completed: AtomicBool,
}

impl SqliteTransaction {
    fn complete(&self, statement: &str) -> Result<()> {
        if self.completed.swap(true, Ordering::SeqCst) {
            return Err("The transaction is already completed".into());
        }
        lock(&self.conn).execute_batch(statement)?;
        Ok(())
    }
}

impl DriverTransaction for SqliteTransaction {
    fn commit(&self) -> Result<()> {
        self.complete("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.complete("ROLLBACK")
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.completed.load(Ordering::SeqCst) {
            if let Err(e) = lock(&self.conn).execute_batch("ROLLBACK") {
                warn!("Failed to rollback the transaction: {}", e);
            }
        }
    }
}
