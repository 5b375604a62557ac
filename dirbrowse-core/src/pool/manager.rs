//! Registry of connection pools, one per logical server name.

use super::{ConnectionFactory, ConnectionPool, PoolStats};
use crate::config::{PoolOptions, ServerConfig};
use crate::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

/// How [`PoolManager::get_pool`] obtained the pool it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOrigin {
    /// An existing pool passed its liveness probe
    Existing,
    /// No pool existed; a new one was built
    Created,
    /// The existing pool failed its probe and was replaced
    Rebuilt,
}

impl PoolOrigin {
    /// Whether a pool was built by this call.
    pub fn is_new(self) -> bool {
        !matches!(self, Self::Existing)
    }
}

/// Owns one [`ConnectionPool`] per server name.
///
/// Building a pool is serialized per server name: concurrent callers for the
/// same name wait for the first builder and then reuse its pool. A pool is
/// only inserted into the registry after it opened successfully.
pub struct PoolManager {
    factory: ConnectionFactory,
    options: PoolOptions,
    pools: DashMap<String, Arc<ConnectionPool>>,
    build_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    known_configs: DashMap<String, Arc<ServerConfig>>,
}

impl PoolManager {
    /// Creates an empty registry.
    pub fn new(factory: ConnectionFactory, options: PoolOptions) -> Self {
        Self {
            factory,
            options,
            pools: DashMap::new(),
            build_locks: DashMap::new(),
            known_configs: DashMap::new(),
        }
    }

    /// Factory used to open connections.
    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    /// Returns a live pool for the server, building or rebuilding it as
    /// needed.
    ///
    /// An existing pool is probed once before it is handed out; if the probe
    /// fails the pool is closed, removed and replaced.
    ///
    /// # Errors
    /// Returns a configuration error for an invalid config, or the error
    /// from opening the first connection of a new pool
    pub async fn get_pool(&self, config: &ServerConfig) -> Result<(Arc<ConnectionPool>, PoolOrigin)> {
        config.validate()?;
        let name = config.name.as_str();

        let mut failed_probe = None;
        if let Some(pool) = self.existing(name) {
            match pool.probe().await {
                Ok(()) => return Ok((pool, PoolOrigin::Existing)),
                Err(error) => {
                    tracing::warn!(server = %name, error = %error, "Pooled connection failed liveness probe");
                    failed_probe = Some(pool);
                }
            }
        }

        let lock = self.build_lock(name);
        let _guard = lock.lock().await;

        let mut origin = PoolOrigin::Created;
        if let Some(pool) = self.existing(name) {
            let known_bad = failed_probe
                .as_ref()
                .is_some_and(|failed| Arc::ptr_eq(failed, &pool));
            if !known_bad && pool.probe().await.is_ok() {
                // Another caller rebuilt the pool while we waited
                return Ok((pool, PoolOrigin::Existing));
            }
            self.pools.remove_if(name, |_, current| Arc::ptr_eq(current, &pool));
            pool.close().await;
            origin = PoolOrigin::Rebuilt;
        }

        let server = Arc::new(config.clone());
        let pool = ConnectionPool::open(Arc::clone(&server), self.options.clone(), self.factory.clone()).await?;
        self.pools.insert(name.to_string(), Arc::clone(&pool));
        self.known_configs.insert(name.to_string(), server);

        tracing::info!(server = %name, origin = ?origin, "Connection pool published");
        Ok((pool, origin))
    }

    /// Closes and removes a server's pool. Returns whether one existed.
    pub async fn close_pool(&self, name: &str) -> bool {
        let removed = self.pools.remove(name);
        match removed {
            Some((_, pool)) => {
                pool.close().await;
                true
            }
            None => false,
        }
    }

    /// Closes and removes `failed` if it is still the server's registered
    /// pool. Returns whether it was removed; `false` means another caller
    /// already replaced it.
    pub async fn discard_pool(&self, name: &str, failed: &Arc<ConnectionPool>) -> bool {
        let removed = self
            .pools
            .remove_if(name, |_, current| Arc::ptr_eq(current, failed))
            .is_some();
        if removed {
            failed.close().await;
        } else {
            tracing::debug!(server = %name, pool = %failed.id(), "Failed pool already replaced; keeping the current one");
        }
        removed
    }

    /// Closes every pool. Returns the names of the servers whose pools
    /// were closed.
    pub async fn close_all(&self) -> Vec<String> {
        let names: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        let mut closed = Vec::with_capacity(names.len());
        for name in names {
            if self.close_pool(&name).await {
                closed.push(name);
            }
        }
        closed
    }

    /// The pool currently registered for a server, without probing it.
    pub fn existing(&self, name: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.get(name).map(|pool| Arc::clone(pool.value()))
    }

    /// The config a server's pool was last built from.
    pub fn known_config(&self, name: &str) -> Option<Arc<ServerConfig>> {
        self.known_configs.get(name).map(|config| Arc::clone(config.value()))
    }

    /// Connection counts for a server's pool.
    pub fn stats(&self, name: &str) -> Option<PoolStats> {
        self.existing(name).map(|pool| pool.stats())
    }

    /// Names of servers with a registered pool.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    fn build_lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.build_locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .value(),
        )
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("servers", &self.server_names())
            .field("options", &self.options)
            .finish()
    }
}
