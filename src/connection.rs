//! Connection builder, lifecycle, reader loop and request dispatch.
//!
//! The [`ConnectionBuilder`] provides a fluent API for configuring the
//! connection. The [`Connection`] manages the lifecycle:
//! 1. Open the TCP stream
//! 2. Spawn the writer task and the reader task
//! 3. Reader reads the greeting and reports the salt back
//! 4. Authenticate if credentials were configured
//! 5. Reader demultiplexes response frames by sync until the stream faults
//!
//! # Example
//!
//! ```ignore
//! use iproto_client::{Connection, SelectOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = Connection::builder("127.0.0.1", 3301)
//!         .credentials("admin", "secret")
//!         .connect()
//!         .await?;
//!
//!     conn.insert("users", &(1u32, "alice")).await?;
//!     let response = conn.select("users", &(1u32,), SelectOptions::default()).await?;
//!     let rows: Vec<(u32, String)> = response.rows()?;
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{IprotoError, Result};
use crate::protocol::{
    FrameBuffer, Greeting, IteratorType, Request, Response, DEFAULT_MAX_FRAME_SIZE, GREETING_SIZE,
};
use crate::schema::{Identifier, SchemaCache};
use crate::transport::connect_tcp;
use crate::waiters::{Outcome, SlotGuard, WaiterTable};
use crate::writer::{spawn_writer_task, WriterHandle, DEFAULT_OUTBOUND_CAPACITY};

/// Default receive buffer size (socket buffer and per-read chunk).
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Default number of non-final responses tolerated per request.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: usize = 10;

/// Connection settings.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Receive buffer size and read chunk size.
    pub buffer_size: usize,
    /// Non-final responses tolerated before a request fails.
    pub max_retry_attempts: usize,
    /// Largest frame accepted from the server.
    pub max_frame_size: u32,
}

impl ConnectionConfig {
    /// Settings for `host:port` with defaults everywhere else.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: None,
            password: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("buffer_size", &self.buffer_size)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

/// Builder for configuring and creating a [`Connection`].
pub struct ConnectionBuilder {
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    /// Create a new builder for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            config: ConnectionConfig::new(host, port),
        }
    }

    /// Authenticate with these credentials on every connect.
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.user = Some(user.into());
        self.config.password = Some(password.into());
        self
    }

    /// Set the receive buffer size.
    ///
    /// Default: 32KB
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size.max(1);
        self
    }

    /// Set how many non-final responses a request may receive.
    ///
    /// Default: 10
    pub fn max_retry_attempts(mut self, attempts: usize) -> Self {
        self.config.max_retry_attempts = attempts.max(1);
        self
    }

    /// Set the largest frame accepted from the server.
    ///
    /// Default: 1GB
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Create the connection without connecting.
    ///
    /// The first request connects lazily.
    pub fn build(self) -> Connection {
        Connection::new(self.config)
    }

    /// Create the connection and connect right away.
    pub async fn connect(self) -> Result<Connection> {
        let conn = self.build();
        conn.connect().await?;
        Ok(conn)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Closing = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Options for [`Connection::select`].
#[derive(Debug, Clone)]
pub struct SelectOptions {
    pub offset: u32,
    pub limit: u32,
    pub index: Identifier,
    pub iterator: IteratorType,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: u32::MAX,
            index: Identifier::Id(0),
            iterator: IteratorType::Eq,
        }
    }
}

impl SelectOptions {
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn index(mut self, index: impl Into<Identifier>) -> Self {
        self.index = index.into();
        self
    }

    pub fn iterator(mut self, iterator: IteratorType) -> Self {
        self.iterator = iterator;
        self
    }
}

#[derive(Clone)]
struct Credentials {
    user: String,
    password: String,
}

/// Background tasks of one connected session.
///
/// Dropping a session aborts both tasks, which closes the socket.
pub(crate) struct Session {
    epoch: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<Result<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

pub(crate) struct Inner {
    config: ConnectionConfig,
    state: AtomicU8,
    epoch: AtomicU64,
    /// Exclusion lock: serializes connect, close and schema misses.
    pub(crate) session: tokio::sync::Mutex<Option<Session>>,
    writer: Mutex<Option<WriterHandle>>,
    waiters: Arc<WaiterTable>,
    greeting: Mutex<Option<Greeting>>,
    credentials: Mutex<Option<Credentials>>,
    pub(crate) schema: SchemaCache,
}

/// A multiplexed connection to one server.
///
/// Cheaply cloneable; all clones share the same socket, waiter table and
/// schema cache. Dropping the last clone stops the background tasks.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Inner>,
}

impl Connection {
    /// Create a new connection builder.
    pub fn builder(host: impl Into<String>, port: u16) -> ConnectionBuilder {
        ConnectionBuilder::new(host, port)
    }

    /// Create a disconnected connection from settings.
    pub fn new(config: ConnectionConfig) -> Self {
        let credentials = match (&config.user, &config.password) {
            (Some(user), Some(password)) => Some(Credentials {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Self {
            inner: Arc::new(Inner {
                config,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                epoch: AtomicU64::new(0),
                session: tokio::sync::Mutex::new(None),
                writer: Mutex::new(None),
                waiters: Arc::new(WaiterTable::new()),
                greeting: Mutex::new(None),
                credentials: Mutex::new(credentials),
                schema: SchemaCache::new(),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnectionState::Connected
    }

    /// Greeting of the current session.
    pub fn greeting(&self) -> Option<Greeting> {
        self.inner.greeting.lock().clone()
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Connect if not connected yet. Concurrent calls share one attempt.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Close the connection.
    ///
    /// Pending requests fail with [`IprotoError::Cancelled`]. Idempotent.
    pub async fn close(&self) {
        self.inner.teardown(None, None).await
    }

    /// Send a `PING`.
    pub async fn ping(&self) -> Result<Response> {
        self.inner.dispatch(Request::ping()?).await
    }

    /// Authenticate the current session and remember the credentials for
    /// later reconnects.
    pub async fn authenticate(&self, user: &str, password: &str) -> Result<Response> {
        self.inner.connect().await?;
        let response = self.inner.authenticate(user, password).await?;
        *self.inner.credentials.lock() = Some(Credentials {
            user: user.to_string(),
            password: password.to_string(),
        });
        Ok(response)
    }

    /// Insert a tuple.
    pub async fn insert<T>(&self, space: impl Into<Identifier>, tuple: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let space_id = self.space_id(space.into()).await?;
        self.inner.dispatch(Request::insert(space_id, tuple)?).await
    }

    /// Insert or replace a tuple.
    pub async fn replace<T>(&self, space: impl Into<Identifier>, tuple: &T) -> Result<Response>
    where
        T: Serialize + ?Sized,
    {
        let space_id = self.space_id(space.into()).await?;
        self.inner.dispatch(Request::replace(space_id, tuple)?).await
    }

    /// Select tuples by key. An empty key with `IteratorType::All` scans.
    pub async fn select<K>(
        &self,
        space: impl Into<Identifier>,
        key: &K,
        options: SelectOptions,
    ) -> Result<Response>
    where
        K: Serialize + ?Sized,
    {
        let space_id = self.space_id(space.into()).await?;
        let index_id = self.index_id(space_id, options.index).await?;
        let request = Request::select(
            space_id,
            index_id,
            key,
            options.offset,
            options.limit,
            options.iterator,
        )?;
        self.inner.dispatch(request).await
    }

    /// Update the tuple matching `key`.
    pub async fn update<K, O>(
        &self,
        space: impl Into<Identifier>,
        key: &K,
        ops: &O,
        index: impl Into<Identifier>,
    ) -> Result<Response>
    where
        K: Serialize + ?Sized,
        O: Serialize + ?Sized,
    {
        let space_id = self.space_id(space.into()).await?;
        let index_id = self.index_id(space_id, index.into()).await?;
        self.inner
            .dispatch(Request::update(space_id, index_id, key, ops)?)
            .await
    }

    /// Delete the tuple matching `key`.
    pub async fn delete<K>(
        &self,
        space: impl Into<Identifier>,
        key: &K,
        index: impl Into<Identifier>,
    ) -> Result<Response>
    where
        K: Serialize + ?Sized,
    {
        let space_id = self.space_id(space.into()).await?;
        let index_id = self.index_id(space_id, index.into()).await?;
        self.inner
            .dispatch(Request::delete(space_id, index_id, key)?)
            .await
    }

    /// Call a stored function.
    pub async fn call<A: Serialize + ?Sized>(&self, function: &str, args: &A) -> Result<Response> {
        self.inner.dispatch(Request::call(function, args)?).await
    }

    /// Evaluate a Lua expression.
    pub async fn eval<A: Serialize + ?Sized>(&self, expr: &str, args: &A) -> Result<Response> {
        self.inner.dispatch(Request::eval(expr, args)?).await
    }

    async fn space_id(&self, space: Identifier) -> Result<u32> {
        match space {
            Identifier::Id(id) => Ok(id),
            name => Ok(self.resolve_space(name).await?.id()),
        }
    }

    async fn index_id(&self, space_id: u32, index: Identifier) -> Result<u32> {
        match index {
            Identifier::Id(id) => Ok(id),
            name => Ok(self.resolve_index(space_id, name).await?.id()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        let mut session = self.session.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.open_locked(&mut session).await
    }

    async fn open_locked(self: &Arc<Self>, session: &mut Option<Session>) -> Result<()> {
        let config = &self.config;
        self.set_state(ConnectionState::Connecting);
        tracing::debug!("Connecting to {}:{}", config.host, config.port);

        let (read_half, write_half) =
            match connect_tcp(&config.host, config.port, config.buffer_size).await {
                Ok(halves) => halves,
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
            };

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.waiters.reopen();
        let (writer, writer_task) = spawn_writer_task(write_half, DEFAULT_OUTBOUND_CAPACITY);
        let (handshake_tx, handshake_rx) = oneshot::channel();

        let reader_task = tokio::spawn(run_reader(
            read_half,
            Arc::downgrade(self),
            Arc::clone(&self.waiters),
            handshake_tx,
            epoch,
            config.buffer_size,
            config.max_frame_size,
        ));

        *session = Some(Session {
            epoch,
            reader: reader_task,
            writer: writer_task,
        });

        let greeting = match handshake_rx.await {
            Ok(Ok(greeting)) => greeting,
            Ok(Err(e)) => {
                self.teardown_locked(session, Some(e.clone()));
                return Err(e);
            }
            Err(_) => {
                let e = IprotoError::network(
                    std::io::ErrorKind::UnexpectedEof,
                    "Connection closed during handshake",
                );
                self.teardown_locked(session, Some(e.clone()));
                return Err(e);
            }
        };

        tracing::debug!("Handshake with {}:{} done: {}", config.host, config.port, greeting.version);
        *self.greeting.lock() = Some(greeting);
        *self.writer.lock() = Some(writer);

        // Stays Connecting until authenticated; other callers wait on the lock.
        let credentials = self.credentials.lock().clone();
        if let Some(credentials) = credentials {
            if let Err(e) = self
                .authenticate(&credentials.user, &credentials.password)
                .await
            {
                tracing::error!("Authentication as '{}' failed: {}", credentials.user, e);
                self.teardown_locked(session, Some(e.clone()));
                return Err(e);
            }
        }

        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn authenticate(&self, user: &str, password: &str) -> Result<Response> {
        let salt = self
            .greeting
            .lock()
            .as_ref()
            .map(|greeting| greeting.salt)
            .ok_or(IprotoError::NotConnected)?;

        self.dispatch_connected(&Request::authenticate(&salt, user, password)?)
            .await
    }

    /// Tear the session down.
    ///
    /// `cause == None` is a voluntary close. When `epoch` is given the
    /// teardown only applies to that session.
    pub(crate) async fn teardown(&self, cause: Option<IprotoError>, epoch: Option<u64>) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }

        let mut session = self.session.lock().await;
        if let (Some(epoch), Some(current)) = (epoch, session.as_ref()) {
            if current.epoch != epoch {
                return;
            }
        }

        self.teardown_locked(&mut session, cause);
    }

    fn teardown_locked(&self, session: &mut Option<Session>, cause: Option<IprotoError>) {
        let current = match session.take() {
            Some(current) => current,
            None => return,
        };

        self.set_state(ConnectionState::Closing);
        match &cause {
            Some(e) => tracing::debug!("Tearing down session {} after fault: {}", current.epoch, e),
            None => tracing::debug!("Closing session {}", current.epoch),
        }

        self.writer.lock().take();
        drop(current);

        let error = cause.unwrap_or(IprotoError::Cancelled);
        let failed = self.waiters.fail_all(&error);
        if failed > 0 {
            tracing::debug!("Resolved {} pending requests with: {}", failed, error);
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Connect if needed, then send and await.
    pub(crate) async fn dispatch(self: &Arc<Self>, request: Request) -> Result<Response> {
        self.connect().await?;
        self.dispatch_connected(&request).await
    }

    /// Send and await on the current session without connecting.
    pub(crate) async fn dispatch_connected(&self, request: &Request) -> Result<Response> {
        let (sync, rx) = self.waiters.register()?;
        let _guard = SlotGuard::new(&self.waiters, sync);

        let writer = self.writer.lock().clone().ok_or(IprotoError::NotConnected)?;
        let bytes = request.encode(sync)?;
        writer.enqueue(&bytes);

        self.await_response(sync, rx).await
    }

    async fn await_response(
        &self,
        sync: u64,
        mut rx: oneshot::Receiver<Outcome>,
    ) -> Result<Response> {
        let attempts = self.config.max_retry_attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            let resolution = rx.await.map_err(|_| IprotoError::Cancelled)??;
            if resolution.response.is_final() {
                return Ok(resolution.response);
            }

            tracing::warn!(
                "Request {} not complete (attempt {} of {}): {}",
                sync,
                attempt,
                attempts,
                resolution.response.message()
            );

            last = Some(resolution.response);
            match resolution.next {
                Some(next) => rx = next,
                None => break,
            }
        }

        let last = last.ok_or_else(|| IprotoError::Protocol("No response received".into()))?;
        Err(IprotoError::Database {
            code: last.return_code(),
            message: last.message().to_string(),
        })
    }
}

/// Reader task: runs the read loop, then fails pending requests and
/// schedules the fault teardown.
async fn run_reader(
    mut reader: OwnedReadHalf,
    inner: Weak<Inner>,
    waiters: Arc<WaiterTable>,
    handshake: oneshot::Sender<Result<Greeting>>,
    epoch: u64,
    buffer_size: usize,
    max_frame_size: u32,
) {
    let cause = read_loop(&mut reader, &waiters, handshake, buffer_size, max_frame_size).await;
    tracing::error!("Read loop of session {} stopped: {}", epoch, cause);

    waiters.fail_all(&cause);

    if let Some(inner) = inner.upgrade() {
        tokio::spawn(async move {
            inner.teardown(Some(cause), Some(epoch)).await;
        });
    }
}

/// Read the greeting, then frames until the stream faults.
///
/// Returns the fault.
async fn read_loop(
    reader: &mut OwnedReadHalf,
    waiters: &WaiterTable,
    handshake: oneshot::Sender<Result<Greeting>>,
    buffer_size: usize,
    max_frame_size: u32,
) -> IprotoError {
    let mut block = [0u8; GREETING_SIZE];
    let greeting = match reader.read_exact(&mut block).await {
        Ok(_) => Greeting::parse(&block).map_err(|e| {
            IprotoError::network(
                std::io::ErrorKind::InvalidData,
                &format!("Handshake failed: {}", e),
            )
        }),
        Err(e) => Err(IprotoError::from(e)),
    };

    match greeting {
        Ok(greeting) => {
            let _ = handshake.send(Ok(greeting));
        }
        Err(e) => {
            let _ = handshake.send(Err(e.clone()));
            return e;
        }
    }

    let mut frames = FrameBuffer::with_capacity_and_max_frame(buffer_size, max_frame_size);
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                return IprotoError::network(
                    std::io::ErrorKind::ConnectionReset,
                    "Lost connection to server during query",
                )
            }
            Ok(n) => n,
            Err(e) => return IprotoError::from(e),
        };

        let batch = match frames.push(&buf[..n]) {
            Ok(batch) => batch,
            Err(e) => {
                return IprotoError::network(
                    std::io::ErrorKind::InvalidData,
                    &format!("Framing error: {}", e),
                )
            }
        };

        for frame in batch {
            let response = match Response::decode(&frame.payload) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("Dropping undecodable frame of {} bytes: {}", frame.length(), e);
                    continue;
                }
            };

            let sync = response.sync();
            if !waiters.resolve(response) {
                tracing::warn!("No pending request for sync {}, discarding response", sync);
            }
        }
    }
}
