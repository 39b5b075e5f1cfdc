use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// A mutual exclusion lock that is not tied to the lifetime of a borrow.
///
/// The lock is a single-permit semaphore: the guard owns its permit so it can be stored alongside the connection it
/// protects, and waiting for it can happen either on a blocked thread or in a task.
#[derive(Debug)]
pub struct WriteLock {
    name: Option<String>,
    permits: Arc<Semaphore>,
}

impl Default for WriteLock {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WriteLock {
    pub fn new(name: Option<String>) -> Self {
        Self { name, permits: Arc::new(Semaphore::new(1)) }
    }

    /// The name of the connection this lock is serializing, `None` for the default connection.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Block the current thread until the lock is available.
    ///
    /// There is no timeout, the lock is released when the returned guard is dropped. Must not be called from an
    /// asynchronous context, use [WriteLock::acquire_async] there.
    pub fn acquire(self: &Arc<Self>) -> Result<WriteLockGuard> {
        futures::executor::block_on(self.acquire_async())
    }

    /// Wait for the lock without blocking the current thread.
    ///
    /// Dropping the future before it completes gives up the wait without taking the lock.
    pub async fn acquire_async(self: &Arc<Self>) -> Result<WriteLockGuard> {
        let permit = self.permits.clone().acquire_owned().await.map_err(|e| Error::InternalError { error: e.into() })?;
        debug!("Write lock acquired (name: {:?})", self.name);
        Ok(WriteLockGuard { lock: self.clone(), _permit: permit })
    }

    /// Acquire the lock only if it is available.
    pub fn try_acquire(self: &Arc<Self>) -> Option<WriteLockGuard> {
        let permit = self.permits.clone().try_acquire_owned().ok()?;
        Some(WriteLockGuard { lock: self.clone(), _permit: permit })
    }

    pub fn is_locked(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

/// The proof that a [WriteLock] is held. The lock is released when the guard is dropped.
#[derive(Debug)]
pub struct WriteLockGuard {
    lock: Arc<WriteLock>,
    _permit: OwnedSemaphorePermit,
}

impl WriteLockGuard {
    pub fn lock(&self) -> &Arc<WriteLock> {
        &self.lock
    }
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        debug!("Write lock released (name: {:?})", self.lock.name);
    }
}

/// The write locks of a registry, one per named connection plus one for the default connection.
#[derive(Debug, Default)]
pub struct LockRegistry {
    default_lock: Arc<WriteLock>,
    named_locks: Mutex<HashMap<String, Arc<WriteLock>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the lock for the given name unless it already exists.
    pub fn add_lock(&self, name: &str) -> Arc<WriteLock> {
        self.locks()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(WriteLock::new(Some(name.to_string()))))
            .clone()
    }

    /// Get the lock for the given name, `None` is the default connection.
    ///
    /// Locks are created on demand and never recreated.
    pub fn get(&self, name: Option<&str>) -> Arc<WriteLock> {
        match name {
            Some(name) => self.add_lock(name),
            None => self.default_lock.clone(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.locks().contains_key(name)
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<String, Arc<WriteLock>>> {
        self.named_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tokio_test::assert_ok;

    #[test]
    fn test_add_lock_is_idempotent() {
        let locks = LockRegistry::new();
        assert!(!locks.contains("main"));
        let first = locks.add_lock("main");
        let second = locks.add_lock("main");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &locks.get(Some("main"))));
        assert!(!Arc::ptr_eq(&first, &locks.get(None)));
        assert!(Arc::ptr_eq(&locks.get(None), &locks.get(None)));
        assert_eq!(first.name(), Some("main"));
    }

    #[test]
    fn test_try_acquire() {
        let lock = Arc::new(WriteLock::new(None));
        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_locked());
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_acquire_blocks_until_released() {
        let lock = Arc::new(WriteLock::new(Some("main".to_string())));
        let guard = assert_ok!(lock.acquire());

        let (tx, rx) = mpsc::channel();
        let waiting_lock = lock.clone();
        let handle = std::thread::spawn(move || {
            let _guard = waiting_lock.acquire().unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(guard);
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        handle.join().unwrap();
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_acquire_async_waits_without_blocking() {
        let lock = Arc::new(WriteLock::new(None));
        let guard = assert_ok!(lock.acquire_async().await);

        let waiting_lock = lock.clone();
        let waiting = tokio::spawn(async move { waiting_lock.acquire_async().await.map(|guard| guard.lock().clone()) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        // giving up the wait doesn't take the lock
        let abandoned = tokio::time::timeout(Duration::from_millis(10), lock.acquire_async()).await;
        assert!(abandoned.is_err());

        drop(guard);
        let acquired_by = assert_ok!(assert_ok!(waiting.await));
        assert!(Arc::ptr_eq(&acquired_by, &lock));
        assert!(!lock.is_locked());
    }
}
