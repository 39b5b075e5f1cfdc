use dbconn_core::connection::DbConnection;
use dbconn_core::connection_info::ConnectionInfo;
use dbconn_core::factory::ConnectionFactory;
use dbconn_core::write_locked::WriteLockedConnection;
use dbconn_core::{Error, Result};
use futures::future::{err, BoxFuture};
use std::thread;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// The asynchronous open paths of a [ConnectionFactory].
///
/// The connections are resolved exactly as the synchronous paths do, only the driver-level open is moved to a
/// dedicated thread and awaited. Every call takes a [CancellationToken]: once cancelled, the future resolves to
/// [Error::Cancelled] and the connection, if it ends up being opened anyway, is closed by the opening thread.
///
/// ```rust,ignore
/// use dbconn_async::AsyncConnectionFactory;
/// use tokio_util::sync::CancellationToken;
///
/// let conn = factory.open_async(CancellationToken::new()).await?;
/// ```
pub trait AsyncConnectionFactory {
    fn open_async(&self, token: CancellationToken) -> BoxFuture<'static, Result<DbConnection>>;

    /// Create a connection, configure it on the opening thread then open it.
    fn open_async_with<F>(&self, configure: F, token: CancellationToken) -> BoxFuture<'static, Result<DbConnection>>
    where
        F: FnOnce(&mut DbConnection) -> Result<()> + Send + 'static;

    fn open_named_async(&self, named_connection: &str, token: CancellationToken)
        -> BoxFuture<'static, Result<DbConnection>>;

    fn open_named_async_with<F>(
        &self,
        named_connection: &str,
        configure: F,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>>
    where
        F: FnOnce(&mut DbConnection) -> Result<()> + Send + 'static;

    fn open_connection_string_async(
        &self,
        connection_string: &str,
        provider_name: Option<&str>,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>>;

    fn open_connection_string_async_with<F>(
        &self,
        connection_string: &str,
        provider_name: Option<&str>,
        configure: F,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>>
    where
        F: FnOnce(&mut DbConnection) -> Result<()> + Send + 'static;

    fn open_info_async(
        &self,
        info: Option<&ConnectionInfo>,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>>;

    fn open_info_async_with<F>(
        &self,
        info: Option<&ConnectionInfo>,
        configure: F,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>>
    where
        F: FnOnce(&mut DbConnection) -> Result<()> + Send + 'static;

    /// Wait for the write lock of the named connection (the default lock if `None`) then open the connection.
    ///
    /// The lock is awaited without blocking the runtime and the wait is given up as soon as the token is cancelled.
    fn open_write_locked_async(
        &self,
        named_connection: Option<&str>,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<WriteLockedConnection>>;
}

impl AsyncConnectionFactory for ConnectionFactory {
    fn open_async(&self, token: CancellationToken) -> BoxFuture<'static, Result<DbConnection>> {
        self.open_async_with(|_| Ok(()), token)
    }

    fn open_async_with<F>(&self, configure: F, token: CancellationToken) -> BoxFuture<'static, Result<DbConnection>>
    where
        F: FnOnce(&mut DbConnection) -> Result<()> + Send + 'static,
    {
        open_on_thread(self.create_connection(), configure_and_open(configure), token)
    }

    fn open_named_async(
        &self,
        named_connection: &str,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>> {
        self.open_named_async_with(named_connection, |_| Ok(()), token)
    }

    fn open_named_async_with<F>(
        &self,
        named_connection: &str,
        configure: F,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>>
    where
        F: FnOnce(&mut DbConnection) -> Result<()> + Send + 'static,
    {
        open_on_thread(self.create_named_connection(named_connection), configure_and_open(configure), token)
    }

    fn open_connection_string_async(
        &self,
        connection_string: &str,
        provider_name: Option<&str>,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>> {
        self.open_connection_string_async_with(connection_string, provider_name, |_| Ok(()), token)
    }

    fn open_connection_string_async_with<F>(
        &self,
        connection_string: &str,
        provider_name: Option<&str>,
        configure: F,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>>
    where
        F: FnOnce(&mut DbConnection) -> Result<()> + Send + 'static,
    {
        let info = ConnectionInfo::for_connection_string(connection_string);
        let info = match provider_name {
            Some(provider_name) => info.with_provider_name(provider_name),
            None => info,
        };
        self.open_info_async_with(Some(&info), configure, token)
    }

    fn open_info_async(
        &self,
        info: Option<&ConnectionInfo>,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>> {
        self.open_info_async_with(info, |_| Ok(()), token)
    }

    fn open_info_async_with<F>(
        &self,
        info: Option<&ConnectionInfo>,
        configure: F,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<DbConnection>>
    where
        F: FnOnce(&mut DbConnection) -> Result<()> + Send + 'static,
    {
        open_on_thread(self.create_connection_for(info), configure_and_open(configure), token)
    }

    fn open_write_locked_async(
        &self,
        named_connection: Option<&str>,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<WriteLockedConnection>> {
        let mut connection = match self.create_write_locked_connection(named_connection) {
            Ok(connection) => connection,
            Err(e) => return Box::pin(err::<WriteLockedConnection, Error>(e)),
        };
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Gave up waiting for the write lock");
                    return Err(Error::Cancelled);
                }
                acquired = connection.acquire_write_lock() => acquired?,
            }
            open_on_thread(Ok(connection), |conn| conn.open(), token).await
        })
    }
}

fn configure_and_open<F>(configure: F) -> impl FnOnce(&mut DbConnection) -> Result<()> + Send + 'static
where
    F: FnOnce(&mut DbConnection) -> Result<()> + Send + 'static,
{
    move |conn| {
        configure(conn)?;
        conn.open()
    }
}

/// Run `open` against the resource on a new thread and await the result.
///
/// The resource is owned by the thread until it's handed back through the channel: if the caller has given up in the
/// meantime the channel is closed and the resource is dropped (closed) on the thread.
fn open_on_thread<T, F>(resource: Result<T>, open: F, token: CancellationToken) -> BoxFuture<'static, Result<T>>
where
    T: Send + 'static,
    F: FnOnce(&mut T) -> Result<()> + Send + 'static,
{
    let mut resource = match resource {
        Ok(resource) => resource,
        Err(e) => return Box::pin(err::<T, Error>(e)),
    };
    if token.is_cancelled() {
        debug!("Open cancelled before being dispatched");
        drop(resource);
        return Box::pin(err::<T, Error>(Error::Cancelled));
    }

    let (open_tx, open_rx) = oneshot::channel();
    let thread_spawn_result = thread::Builder::new().name("dbconn-open".to_string()).spawn(move || {
        let result = open(&mut resource).map(|()| resource);
        match open_tx.send(result) {
            Ok(()) => {}
            Err(Ok(resource)) => {
                warn!("The connection was opened after the caller gave up, closing it.");
                drop(resource);
            }
            Err(Err(e)) => debug!("Open failed after the caller gave up: {}", e),
        }
    });

    if let Err(e) = thread_spawn_result {
        error!("Failed to spawn the opening thread: {}", e);
        return Box::pin(err::<T, Error>(Error::InternalError { error: e.into() }));
    }

    Box::pin(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = open_rx => match result {
                Ok(result) => result,
                Err(e) => Err(Error::InternalError { error: e.into() }),
            },
        }
    })
}
