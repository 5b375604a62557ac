//! Per-server connection pools.
//!
//! # Module Structure
//! - `factory`: Opening, upgrading and binding single connections
//! - `manager`: Registry of one pool per server name
//!
//! A [`ConnectionPool`] keeps idle connections in a queue and bounds the
//! number checked out at once with a semaphore. Every pooled call runs
//! under the server's operation timeout and goes through the pool's
//! health-check policy:
//!
//! - new connections are validated before first use
//! - a connection that surfaced an error is validated before it is reused
//! - idle connections are validated at checkout
//! - successful connections are validated at release
//!
//! A background sweep retires idle connections that are too old or fail
//! validation, then tops the pool back up to its minimum size.

mod factory;
mod manager;

pub use factory::ConnectionFactory;
pub use manager::{PoolManager, PoolOrigin};

use crate::client::DirectoryConnection;
use crate::config::{PoolOptions, ServerConfig};
use crate::error::DirectoryError;
use crate::models::{Entry, Modification, RootDse, SearchRequest, SearchResult};
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Pool statistics for monitoring connection pool health and usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of idle connections ready to be used
    pub idle_connections: u32,
    /// Number of connections currently checked out
    pub active_connections: u32,
    /// Total number of open connections
    pub total_connections: u32,
    /// Maximum allowed connections (from configuration)
    pub max_connections: u32,
}

struct Member {
    connection: Box<dyn DirectoryConnection>,
    created_at: Instant,
}

/// Runs one directory call on a checked-out connection, then hands the
/// connection back through the health-check policy.
macro_rules! pooled_call {
    ($pool:expr, $operation:literal, |$conn:ident| $call:expr) => {{
        let pooled = $pool.checkout().await?;
        let outcome = {
            let $conn = pooled.connection();
            $pool.timed($operation, $call).await
        };
        $pool.finish(pooled, &outcome).await;
        outcome
    }};
}

/// A bounded pool of connections to one directory server.
pub struct ConnectionPool {
    id: Uuid,
    server: Arc<ServerConfig>,
    options: PoolOptions,
    factory: ConnectionFactory,
    idle: Mutex<VecDeque<Member>>,
    permits: Arc<Semaphore>,
    size: AtomicUsize,
    closed: AtomicBool,
    created_at: DateTime<Utc>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Opens the first connection and starts the background sweep.
    ///
    /// The pool is only returned once a connection has been established,
    /// upgraded, bound and validated.
    ///
    /// # Errors
    /// Returns the error from opening or validating the first connection
    pub async fn open(
        server: Arc<ServerConfig>,
        options: PoolOptions,
        factory: ConnectionFactory,
    ) -> Result<Arc<Self>> {
        options.validate()?;

        let pool = Arc::new(Self {
            id: Uuid::new_v4(),
            permits: Arc::new(Semaphore::new(options.max_size)),
            server,
            options,
            factory,
            idle: Mutex::new(VecDeque::new()),
            size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            created_at: Utc::now(),
            sweeper: Mutex::new(None),
        });

        let first = pool.create_member().await?;
        pool.size.fetch_add(1, Ordering::SeqCst);
        pool.idle.lock().push_back(first);

        Self::spawn_sweeper(&pool);

        tracing::info!(
            server = %pool.server.name,
            pool_id = %pool.id,
            max_size = pool.options.max_size,
            "Connection pool opened"
        );
        Ok(pool)
    }

    /// Unique id of this pool; a rebuilt pool gets a new one.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Config the pool was built from.
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Options the pool was built with.
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// When the pool was built.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the pool was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Gets detailed connection pool statistics for monitoring
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().len();
        let total = self.size.load(Ordering::SeqCst);
        let to_u32 = |value: usize| value.min(u32::MAX as usize) as u32;
        PoolStats {
            idle_connections: to_u32(idle),
            active_connections: to_u32(total.saturating_sub(idle)),
            total_connections: to_u32(total),
            max_connections: to_u32(self.options.max_size),
        }
    }

    /// Checks out a connection, reusing an idle one when it is young
    /// enough and passes validation, else opening a new one.
    ///
    /// # Errors
    /// Returns [`DirectoryError::PoolClosed`] if the pool was closed, a
    /// timeout if no connection freed up in time, or the error from opening
    /// a new connection
    pub async fn checkout(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let permit = match tokio::time::timeout(
            self.options.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.closed_error()),
            Err(_) => {
                return Err(DirectoryError::timeout(format!(
                    "Timed out waiting for a connection to server '{}'",
                    self.server.name
                )));
            }
        };

        loop {
            let candidate = self.idle.lock().pop_front();
            let Some(member) = candidate else { break };

            if self.is_expired(&member) {
                self.retire(member, "exceeded maximum age").await;
                continue;
            }

            if self.options.health_checks.on_checkout
                && let Err(error) = self.validate(member.connection.as_ref()).await
            {
                tracing::warn!(server = %self.server.name, error = %error, "Idle connection failed checkout validation");
                self.retire(member, "failed checkout validation").await;
                continue;
            }

            return Ok(PooledConnection::new(self, member, permit));
        }

        let member = self.create_member().await?;
        self.size.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(server = %self.server.name, size = self.size.load(Ordering::SeqCst), "Opened pooled connection");
        Ok(PooledConnection::new(self, member, permit))
    }

    /// Returns a connection after a successful call.
    pub async fn release(&self, pooled: PooledConnection) {
        self.finish(pooled, &Ok(())).await;
    }

    /// Returns a connection, validating it according to the outcome of the
    /// call it served.
    async fn finish<T>(&self, pooled: PooledConnection, outcome: &Result<T>) {
        let PooledConnection {
            member,
            mut guard,
            permit,
        } = pooled;
        guard.disarm();

        let policy = self.options.health_checks;
        let needs_validation = match outcome {
            Ok(_) => policy.on_release,
            Err(_) => policy.after_exception,
        };

        if self.is_closed() {
            self.retire(member, "pool closed").await;
        } else if self.is_expired(&member) {
            self.retire(member, "exceeded maximum age").await;
        } else if needs_validation
            && let Err(error) = self.validate(member.connection.as_ref()).await
        {
            tracing::warn!(server = %self.server.name, error = %error, "Connection failed release validation");
            self.retire(member, "failed release validation").await;
        } else {
            self.idle.lock().push_back(member);
        }

        drop(permit);
    }

    /// Inline liveness probe: checkout, cheap read, release.
    ///
    /// # Errors
    /// Returns the error that made the probe fail
    pub async fn probe(self: &Arc<Self>) -> Result<()> {
        self.root_info().await.map(|_| ())
    }

    /// Runs a search on a pooled connection.
    pub async fn search(self: &Arc<Self>, request: &SearchRequest) -> Result<SearchResult> {
        pooled_call!(self, "search", |conn| conn.search(request))
    }

    /// Applies modifications to an entry.
    pub async fn modify(self: &Arc<Self>, dn: &str, modifications: &[Modification]) -> Result<()> {
        pooled_call!(self, "modify", |conn| conn.modify(dn, modifications))
    }

    /// Adds an entry.
    pub async fn add(self: &Arc<Self>, entry: &Entry) -> Result<()> {
        pooled_call!(self, "add", |conn| conn.add(entry))
    }

    /// Deletes an entry.
    pub async fn delete(self: &Arc<Self>, dn: &str) -> Result<()> {
        pooled_call!(self, "delete", |conn| conn.delete(dn))
    }

    /// Reads the root metadata.
    pub async fn root_info(self: &Arc<Self>) -> Result<RootDse> {
        pooled_call!(self, "root metadata read", |conn| conn.root_info())
    }

    /// Standard whole-schema fetch.
    pub async fn schema(self: &Arc<Self>) -> Result<Entry> {
        pooled_call!(self, "schema fetch", |conn| conn.schema())
    }

    /// Whether the server advertises a control OID.
    pub async fn is_control_supported(self: &Arc<Self>, oid: &str) -> Result<bool> {
        pooled_call!(self, "control support check", |conn| conn.is_control_supported(oid))
    }

    /// Closes every idle connection and refuses further checkouts.
    ///
    /// Connections that are checked out are closed when they come back.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();

        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }

        let drained: Vec<Member> = self.idle.lock().drain(..).collect();
        for member in drained {
            self.retire(member, "pool closed").await;
        }

        tracing::info!(server = %self.server.name, pool_id = %self.id, "Connection pool closed");
    }

    /// One pass of the background health sweep.
    ///
    /// Each idle connection is examined under a checkout permit, so the
    /// sweep never pushes the pool past its bounds and never holds a lock
    /// the request path needs.
    pub async fn sweep(&self) {
        let pending = self.idle.lock().len();

        for _ in 0..pending {
            if self.is_closed() {
                return;
            }
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let candidate = self.idle.lock().pop_front();
            let Some(member) = candidate else { break };

            if self.is_expired(&member) {
                self.retire(member, "exceeded maximum age").await;
            } else if let Err(error) = self.validate(member.connection.as_ref()).await {
                tracing::warn!(server = %self.server.name, error = %error, "Idle connection failed background validation");
                self.retire(member, "failed background validation").await;
            } else {
                self.idle.lock().push_back(member);
            }
            drop(permit);
        }

        while !self.is_closed() && self.size.load(Ordering::SeqCst) < self.options.min_size {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            match self.create_member().await {
                Ok(member) => {
                    self.size.fetch_add(1, Ordering::SeqCst);
                    self.idle.lock().push_back(member);
                }
                Err(error) => {
                    tracing::warn!(server = %self.server.name, error = %error, "Failed to replenish connection pool");
                    break;
                }
            }
            drop(permit);
        }
    }

    fn spawn_sweeper(pool: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(pool);
        let interval = pool.options.health_check_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                if pool.is_closed() {
                    break;
                }
                pool.sweep().await;
            }
        });

        *pool.sweeper.lock() = Some(handle);
    }

    async fn create_member(&self) -> Result<Member> {
        let connection = self.factory.open(&self.server).await?;

        if self.options.health_checks.on_create
            && let Err(error) = self.validate(connection.as_ref()).await
        {
            if let Err(close_error) = connection.close().await {
                tracing::debug!(server = %self.server.name, error = %close_error, "Ignoring close failure");
            }
            return Err(error);
        }

        Ok(Member {
            connection,
            created_at: Instant::now(),
        })
    }

    async fn validate(&self, connection: &dyn DirectoryConnection) -> Result<()> {
        match tokio::time::timeout(self.options.health_check_timeout, connection.root_info()).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(DirectoryError::timeout(format!(
                "Health check on server '{}' exceeded {:?}",
                self.server.name, self.options.health_check_timeout
            ))),
        }
    }

    fn is_expired(&self, member: &Member) -> bool {
        member.created_at.elapsed() >= self.options.max_connection_age
    }

    async fn retire(&self, member: Member, reason: &str) {
        self.size.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(server = %self.server.name, reason, "Retiring pooled connection");
        if let Err(error) = member.connection.close().await {
            tracing::debug!(server = %self.server.name, error = %error, "Ignoring close failure");
        }
    }

    async fn timed<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.server.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::timeout(format!(
                "{} on server '{}' exceeded {:?}",
                operation, self.server.name, self.server.operation_timeout
            ))),
        }
    }

    fn closed_error(&self) -> DirectoryError {
        DirectoryError::PoolClosed {
            server: self.server.name.clone(),
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("server", &self.server.name)
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Keeps the pool's size count honest when a checked-out connection is
/// dropped instead of released.
struct SizeGuard {
    pool: Weak<ConnectionPool>,
    armed: bool,
}

impl SizeGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SizeGuard {
    fn drop(&mut self) {
        if self.armed
            && let Some(pool) = self.pool.upgrade()
        {
            pool.size.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Hand it back with [`ConnectionPool::release`]. Dropping it instead
/// discards the connection.
pub struct PooledConnection {
    member: Member,
    guard: SizeGuard,
    permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(pool: &Arc<ConnectionPool>, member: Member, permit: OwnedSemaphorePermit) -> Self {
        Self {
            member,
            guard: SizeGuard {
                pool: Arc::downgrade(pool),
                armed: true,
            },
            permit,
        }
    }

    /// The underlying client connection.
    pub fn connection(&self) -> &dyn DirectoryConnection {
        self.member.connection.as_ref()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("age", &self.member.created_at.elapsed())
            .finish()
    }
}
