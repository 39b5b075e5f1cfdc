use crate::connection::DbConnection;
use crate::locks::{WriteLock, WriteLockGuard};
use crate::Result;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A connection serialized by a [WriteLock].
///
/// The lock is acquired by [WriteLockedConnection::open] and released once the connection is closed, whether the
/// close succeeded or not.
pub struct WriteLockedConnection {
    connection: DbConnection,
    lock: Arc<WriteLock>,
    // Must stay the last field: the lock is released only after the connection has been dropped.
    guard: Option<WriteLockGuard>,
}

impl WriteLockedConnection {
    pub(crate) fn new(connection: DbConnection, lock: Arc<WriteLock>) -> Self {
        Self { connection, lock, guard: None }
    }

    /// Acquire the write lock, blocking the current thread until it's available, then open the connection.
    ///
    /// If the connection cannot be opened the lock is released before returning the error.
    pub fn open(&mut self) -> Result<()> {
        if self.guard.is_none() {
            self.guard = Some(self.lock.acquire()?);
        }
        match self.connection.open() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.guard = None;
                Err(e)
            }
        }
    }

    /// Wait for the write lock without blocking the current thread.
    ///
    /// [WriteLockedConnection::open] then only has to open the connection.
    pub async fn acquire_write_lock(&mut self) -> Result<()> {
        if self.guard.is_none() {
            self.guard = Some(self.lock.acquire_async().await?);
        }
        Ok(())
    }

    /// `true` if this connection currently holds the write lock.
    pub fn holds_lock(&self) -> bool {
        self.guard.is_some()
    }

    pub fn write_lock(&self) -> &Arc<WriteLock> {
        &self.lock
    }

    /// Close the connection then release the lock.
    pub fn close(self) -> Result<()> {
        let WriteLockedConnection { connection, guard, .. } = self;
        let result = connection.close();
        drop(guard);
        result
    }
}

impl Deref for WriteLockedConnection {
    type Target = DbConnection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl DerefMut for WriteLockedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl std::fmt::Debug for WriteLockedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLockedConnection")
            .field("connection", &self.connection)
            .field("lock", &self.lock.name())
            .field("holds_lock", &self.holds_lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::{DriverConnection, MockDialectProvider, MockDriverConnection};
    use crate::factory::ConnectionFactory;
    use crate::mock::ConnectionTracker;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn failing_close_connection() -> Box<dyn DriverConnection> {
        let is_open = Arc::new(AtomicBool::new(false));
        let mut mock_connection = MockDriverConnection::new();
        mock_connection.expect_driver_name().return_const("mock".to_string());
        let open_state = is_open.clone();
        mock_connection.expect_open().returning(move || {
            open_state.store(true, Ordering::SeqCst);
            Ok(())
        });
        mock_connection.expect_is_open().returning(move || is_open.load(Ordering::SeqCst));
        mock_connection.expect_close().returning(|| Err("disk I/O error".into()));
        Box::new(mock_connection)
    }

    #[test]
    fn test_write_lock_mutual_exclusion() {
        let tracker = ConnectionTracker::new();
        let factory = ConnectionFactory::new("mock://", MockDialectProvider::tracked("mock", &tracker));
        assert_ok!(factory.register_connection("main", "mock://main", MockDialectProvider::tracked("mock", &tracker)));

        let first = assert_ok!(factory.open_write_locked(Some("main")));
        assert!(first.holds_lock());
        assert!(first.write_lock().is_locked());
        assert_eq!(first.named_connection(), Some("main"));

        let (tx, rx) = mpsc::channel();
        let waiting_factory = factory.clone();
        let handle = std::thread::spawn(move || {
            let second = waiting_factory.open_write_locked(Some("main")).unwrap();
            tx.send(()).unwrap();
            second.close().unwrap();
        });

        // the default connection is guarded by another lock
        let default = assert_ok!(factory.open_write_locked(None));
        assert_ok!(default.close());

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_ok!(first.close());
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        handle.join().unwrap();

        assert!(!factory.registry().unwrap().locks().get(Some("main")).is_locked());
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_lock_released_when_close_fails() {
        let mut provider = MockDialectProvider::new();
        provider.expect_name().return_const("mock".to_string());
        provider.expect_create_connection().returning(|_| Ok(failing_close_connection()));
        let factory = ConnectionFactory::new("mock://", Arc::new(provider));

        let conn = assert_ok!(factory.open_write_locked(None));
        let lock = conn.write_lock().clone();
        assert!(lock.is_locked());
        assert_err!(conn.close());
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_lock_released_when_open_fails() {
        let factory = ConnectionFactory::new("mock://?open_error", MockDialectProvider::with_default("mock"));
        let mut conn = assert_ok!(factory.create_write_locked_connection(None));
        assert_err!(conn.open());
        assert!(!conn.holds_lock());
        assert!(!conn.write_lock().is_locked());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let factory = ConnectionFactory::new("mock://", MockDialectProvider::with_default("mock"));
        let conn = assert_ok!(factory.open_write_locked(None));
        let lock = conn.write_lock().clone();
        drop(conn);
        assert!(!lock.is_locked());
        assert!(lock.try_acquire().is_some());
    }
}
