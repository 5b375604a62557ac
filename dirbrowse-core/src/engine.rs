//! The directory engine facade.
//!
//! [`DirectoryEngine`] owns the pool registry, the schema cache and the
//! paging cursors for any number of servers. It is cheap to clone and safe
//! to share between tasks.
//!
//! # Retry Policy
//! Reads (search, entry reads, browsing, root metadata, naming contexts,
//! control checks and schema fetches) run through [`with_retry`]: a
//! transient connection fault rebuilds the pool and retries once.
//! Mutations are never replayed; they fail on the first fault, after the
//! usual liveness probe when the pool is obtained.
//!
//! # Example
//! ```rust,no_run
//! # async fn example(connector: std::sync::Arc<dyn dirbrowse_core::client::DirectoryConnector>) -> dirbrowse_core::Result<()> {
//! use dirbrowse_core::DirectoryEngine;
//! use dirbrowse_core::config::{ServerConfig, TlsMode};
//!
//! let engine = DirectoryEngine::builder(connector).build()?;
//! let server = ServerConfig::new("corp", "ldap.example.com").with_tls(TlsMode::Ldaps);
//!
//! let page = engine.browse_page(&server, "dc=example,dc=com", 0, None).await?;
//! for entry in &page.entries {
//!     println!("{} ({})", entry.display_name, entry.dn);
//! }
//! # Ok(())
//! # }
//! ```

use crate::activity::{ActivityLog, ActivityRecord, TracingActivityLog};
use crate::browse::{PagedBrowser, PoolPageSource};
use crate::client::{DirectoryConnector, EXTENDED_SCHEMA_INFO_CONTROL};
use crate::config::{EngineConfig, ServerConfig};
use crate::error::{DirectoryError, ResultCode};
use crate::models::{
    BrowsePage, Entry, Modification, ModifyOperation, RootDse, SearchRequest, SearchResult,
    SearchScope,
};
use crate::pool::{ConnectionFactory, ConnectionPool, PoolManager, PoolOrigin, PoolStats};
use crate::retry::{PoolProvider, with_retry};
use crate::schema::{
    SchemaCache, SchemaSnapshot, fetch_schema, fetch_standard, negotiate_extended,
    probe_extended_support,
};
use crate::security::{
    CapturedCertificateFailure, CertificateChain, InMemoryTrustStore, TrustStore,
};
use crate::Result;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::future::Future;
use std::sync::Arc;

/// Builder for [`DirectoryEngine`].
pub struct DirectoryEngineBuilder {
    connector: Arc<dyn DirectoryConnector>,
    trust_store: Option<Arc<dyn TrustStore>>,
    activity_log: Option<Arc<dyn ActivityLog>>,
    config: EngineConfig,
}

impl DirectoryEngineBuilder {
    /// Trust collaborator for validating connections. Defaults to an
    /// [`InMemoryTrustStore`] without trust material.
    pub fn trust_store(mut self, trust_store: Arc<dyn TrustStore>) -> Self {
        self.trust_store = Some(trust_store);
        self
    }

    /// Receiver for records of completed mutations. Defaults to
    /// [`TracingActivityLog`].
    pub fn activity_log(mut self, activity_log: Arc<dyn ActivityLog>) -> Self {
        self.activity_log = Some(activity_log);
        self
    }

    /// Engine configuration. Defaults to [`EngineConfig::new`].
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    /// Returns a configuration error if the engine config is invalid
    pub fn build(self) -> Result<DirectoryEngine> {
        self.config.validate()?;

        let trust = self
            .trust_store
            .unwrap_or_else(|| Arc::new(InMemoryTrustStore::new()));
        let factory = ConnectionFactory::new(self.connector, trust);

        Ok(DirectoryEngine {
            inner: Arc::new(EngineInner {
                pools: PoolManager::new(factory, self.config.pool.clone()),
                schemas: Arc::new(SchemaCache::new()),
                browser: PagedBrowser::new(self.config.browse.clone()),
                activity: self
                    .activity_log
                    .unwrap_or_else(|| Arc::new(TracingActivityLog)),
                config: self.config,
            }),
        })
    }
}

/// Connection and query engine for directory servers.
#[derive(Clone)]
pub struct DirectoryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    pools: PoolManager,
    schemas: Arc<SchemaCache>,
    browser: PagedBrowser,
    activity: Arc<dyn ActivityLog>,
}

impl EngineInner {
    /// Drops state that belonged to a server's previous connections.
    fn forget_server_state(&self, server: &str) {
        self.schemas.invalidate(server);
        self.browser.clear_cursor(server);
    }

    fn spawn_prefetch(&self, pool: &Arc<ConnectionPool>) {
        let pool = Arc::clone(pool);
        let schemas = Arc::clone(&self.schemas);

        tokio::spawn(async move {
            let server = pool.server().name.clone();
            match fetch_standard(&pool).await {
                Ok(snapshot) => {
                    if !pool.is_closed() && schemas.insert_if_absent(snapshot) {
                        tracing::debug!(server = %server, "Schema pre-fetched");
                    }
                }
                Err(error) => {
                    tracing::warn!(server = %server, error = %error, "Schema pre-fetch failed; schema will be fetched on demand");
                }
            }
        });
    }
}

#[async_trait]
impl PoolProvider for EngineInner {
    type Handle = Arc<ConnectionPool>;

    async fn pool(&self, config: &ServerConfig) -> Result<Arc<ConnectionPool>> {
        let (pool, origin) = self.pools.get_pool(config).await?;
        if origin.is_new() {
            if origin == PoolOrigin::Rebuilt {
                tracing::info!(server = %config.name, "Connection pool rebuilt; dropping cached schema and cursors");
            }
            self.forget_server_state(&config.name);
            if self.config.prefetch_schema {
                self.spawn_prefetch(&pool);
            }
        }
        Ok(pool)
    }

    async fn discard(&self, server: &str, failed: &Arc<ConnectionPool>) {
        if self.pools.discard_pool(server, failed).await {
            self.forget_server_state(server);
        }
    }
}

impl DirectoryEngine {
    /// Starts building an engine around a directory client connector.
    pub fn builder(connector: Arc<dyn DirectoryConnector>) -> DirectoryEngineBuilder {
        DirectoryEngineBuilder {
            connector,
            trust_store: None,
            activity_log: None,
            config: EngineConfig::new(),
        }
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    async fn read<F, Fut, T>(&self, server: &ServerConfig, operation: F) -> Result<T>
    where
        F: Fn(Arc<ConnectionPool>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        with_retry(self.inner.as_ref(), server, operation).await
    }

    /// Establishes (or revalidates) the server's connection pool.
    ///
    /// # Errors
    /// Returns [`DirectoryError::CertificateValidation`] if the server's
    /// certificate was rejected, or the protocol error from connecting or
    /// binding
    pub async fn connect(&self, server: &ServerConfig) -> Result<()> {
        self.inner.pool(server).await.map(|_| ())
    }

    /// Runs a search, retrying once on a transient connection fault.
    pub async fn search(&self, server: &ServerConfig, request: &SearchRequest) -> Result<SearchResult> {
        self.read(server, move |pool| async move { pool.search(request).await })
            .await
    }

    /// Reads one entry with all user and operational attributes.
    ///
    /// # Errors
    /// Returns a `NoSuchObject` protocol error if the entry does not exist
    pub async fn read_entry(&self, server: &ServerConfig, dn: &str) -> Result<Entry> {
        let request = SearchRequest::new(dn, SearchScope::Base, "(objectClass=*)")
            .with_attributes(["*", "+"]);
        let result = self.search(server, &request).await?;
        result.entries.into_iter().next().ok_or_else(|| {
            DirectoryError::protocol(ResultCode::NoSuchObject, format!("Entry '{}' not found", dn))
        })
    }

    /// Replaces all values of an attribute.
    pub async fn modify_attribute(
        &self,
        server: &ServerConfig,
        dn: &str,
        attribute: &str,
        values: Vec<String>,
    ) -> Result<()> {
        self.apply_modification(server, dn, Modification::new(ModifyOperation::Replace, attribute, values))
            .await
    }

    /// Adds values to an attribute.
    pub async fn add_attribute(
        &self,
        server: &ServerConfig,
        dn: &str,
        attribute: &str,
        values: Vec<String>,
    ) -> Result<()> {
        self.apply_modification(server, dn, Modification::new(ModifyOperation::Add, attribute, values))
            .await
    }

    /// Deletes values from an attribute; no values removes the attribute.
    pub async fn delete_attribute(
        &self,
        server: &ServerConfig,
        dn: &str,
        attribute: &str,
        values: Vec<String>,
    ) -> Result<()> {
        self.apply_modification(server, dn, Modification::new(ModifyOperation::Delete, attribute, values))
            .await
    }

    async fn apply_modification(
        &self,
        server: &ServerConfig,
        dn: &str,
        modification: Modification,
    ) -> Result<()> {
        let pool = self.inner.pool(server).await?;
        pool.modify(dn, std::slice::from_ref(&modification)).await?;
        self.log_activity(ActivityRecord::attribute_change(&server.name, dn, &modification));
        Ok(())
    }

    /// Creates an entry. Not retried.
    pub async fn add_entry(&self, server: &ServerConfig, entry: &Entry) -> Result<()> {
        let pool = self.inner.pool(server).await?;
        pool.add(entry).await?;
        self.log_activity(ActivityRecord::entry_added(&server.name, entry));
        Ok(())
    }

    /// Deletes an entry. Not retried.
    pub async fn delete_entry(&self, server: &ServerConfig, dn: &str) -> Result<()> {
        let pool = self.inner.pool(server).await?;
        pool.delete(dn).await?;
        self.log_activity(ActivityRecord::entry_deleted(&server.name, dn));
        Ok(())
    }

    fn log_activity(&self, record: ActivityRecord) {
        if let Err(error) = self.inner.activity.record(record) {
            tracing::warn!(error = %error, "Failed to record directory activity");
        }
    }

    /// Returns one page of the immediate children of `base_dn`.
    ///
    /// `filter` defaults to the configured browse filter.
    ///
    /// # Errors
    /// Returns the protocol error from the search; a server size limit is
    /// reported as a truncated page instead
    pub async fn browse_page(
        &self,
        server: &ServerConfig,
        base_dn: &str,
        page_index: usize,
        filter: Option<&str>,
    ) -> Result<BrowsePage> {
        let inner = self.inner.as_ref();
        let filter = filter
            .map(str::trim)
            .filter(|filter| !filter.is_empty())
            .unwrap_or(inner.config.browse.default_filter.as_str());

        self.read(server, move |pool| async move {
            let source = PoolPageSource::new(pool, base_dn, filter, inner.browser.options());
            inner
                .browser
                .page(&server.name, base_dn, filter, page_index, &source)
                .await
        })
        .await
    }

    /// Drops every paging cursor for a server.
    pub fn clear_cursor(&self, server: &str) {
        self.inner.browser.clear_cursor(server);
    }

    /// Drops the paging cursor for one server and base DN.
    pub fn clear_cursor_for(&self, server: &str, base_dn: &str) {
        self.inner.browser.clear_cursor_for(server, base_dn);
    }

    /// Reads the server's root metadata.
    pub async fn root_info(&self, server: &ServerConfig) -> Result<RootDse> {
        self.read(server, |pool| async move { pool.root_info().await }).await
    }

    /// Naming contexts published in the root metadata.
    pub async fn naming_contexts(&self, server: &ServerConfig) -> Result<Vec<String>> {
        self.root_info(server).await.map(|root| root.naming_contexts)
    }

    /// Whether the server advertises a control OID.
    pub async fn is_control_supported(&self, server: &ServerConfig, oid: &str) -> Result<bool> {
        self.read(server, move |pool| async move { pool.is_control_supported(oid).await })
            .await
    }

    /// Cached schema for a server, fetched on first use.
    pub async fn get_schema(&self, server: &ServerConfig) -> Result<Arc<SchemaSnapshot>> {
        if let Some(snapshot) = self.inner.schemas.get(&server.name) {
            return Ok(snapshot);
        }
        let snapshot = self
            .read(server, |pool| async move { fetch_schema(&pool, false).await })
            .await?;
        Ok(self.inner.schemas.insert(snapshot))
    }

    /// Cached schema for a server, without fetching.
    pub fn cached_schema(&self, server: &str) -> Option<Arc<SchemaSnapshot>> {
        self.inner.schemas.get(server)
    }

    /// Fetches the schema again, bypassing the cache, keeping the variant
    /// of the snapshot it replaces.
    pub async fn refresh_schema(&self, server: &ServerConfig) -> Result<Arc<SchemaSnapshot>> {
        let extended = self
            .inner
            .schemas
            .get(&server.name)
            .is_some_and(|snapshot| snapshot.extended);
        self.fetch_and_cache(server, extended).await
    }

    /// Schema variant for a server the engine has connected to before.
    ///
    /// # Errors
    /// Returns a configuration error for a server with no known config
    pub async fn get_schema_variant(&self, server: &str, use_extended: bool) -> Result<Arc<SchemaSnapshot>> {
        let config = self.inner.pools.known_config(server).ok_or_else(|| {
            DirectoryError::configuration(format!("Unknown server '{}'; connect to it first", server))
        })?;
        self.schema_variant(&config, use_extended).await
    }

    async fn schema_variant(&self, server: &ServerConfig, use_extended: bool) -> Result<Arc<SchemaSnapshot>> {
        if let Some(snapshot) = self.inner.schemas.get(&server.name)
            && snapshot.extended == use_extended
        {
            return Ok(snapshot);
        }
        self.fetch_and_cache(server, use_extended).await
    }

    async fn fetch_and_cache(&self, server: &ServerConfig, use_extended: bool) -> Result<Arc<SchemaSnapshot>> {
        let snapshot = self
            .read(server, move |pool| async move { fetch_schema(&pool, use_extended).await })
            .await?;
        Ok(self.inner.schemas.insert(snapshot))
    }

    /// Whether a group of servers should be compared using the extended
    /// schema variant: only if every one is reachable and supports it.
    pub async fn negotiate_extended_schema(&self, servers: &[ServerConfig]) -> bool {
        let engine = self.clone();
        let support = probe_extended_support(servers, move |server| {
            let engine = engine.clone();
            async move {
                engine
                    .is_control_supported(&server, EXTENDED_SCHEMA_INFO_CONTROL)
                    .await
            }
        })
        .await;
        negotiate_extended(&support)
    }

    /// Schemas for side-by-side comparison, all of the same variant.
    ///
    /// If the group negotiated the extended variant but a member fell back
    /// to the standard fetch, the whole group is fetched again as standard.
    ///
    /// # Errors
    /// Returns the first error from fetching a member's schema
    pub async fn schemas_for_comparison(&self, servers: &[ServerConfig]) -> Result<Vec<Arc<SchemaSnapshot>>> {
        let extended = self.negotiate_extended_schema(servers).await;
        let snapshots = try_join_all(servers.iter().map(|server| self.schema_variant(server, extended))).await?;

        if extended && snapshots.iter().any(|snapshot| !snapshot.extended) {
            tracing::info!("Extended schema unavailable for part of the group; using standard schemas");
            return try_join_all(servers.iter().map(|server| self.schema_variant(server, false))).await;
        }
        Ok(snapshots)
    }

    /// Drops the cached schema for one server.
    pub fn clear_schema_cache(&self, server: &str) {
        self.inner.schemas.invalidate(server);
    }

    /// Drops every cached schema.
    pub fn clear_all_schemas(&self) {
        self.inner.schemas.clear();
    }

    /// Connects with an always-trusting verifier and returns the chain the
    /// server presents, for display in a trust decision.
    ///
    /// # Errors
    /// Returns a configuration error for cleartext servers, or the protocol
    /// error from connecting
    pub async fn retrieve_server_certificate(&self, server: &ServerConfig) -> Result<CertificateChain> {
        server.validate()?;
        self.inner.pools.factory().capture_presented_chain(server).await
    }

    /// The last rejected certificate chain for a server, if any.
    pub fn captured_certificate_failure(&self, server: &str) -> Option<CapturedCertificateFailure> {
        self.inner.pools.factory().captured_failure(server)
    }

    /// Forgets a captured failure once a trust decision has been made.
    pub fn clear_certificate_failure(&self, server: &str) {
        self.inner.pools.factory().clear_captured_failure(server);
    }

    /// Closes a server's pool and drops its schema and cursors. Returns
    /// whether a pool existed.
    pub async fn close_connection_pool(&self, server: &str) -> bool {
        let closed = self.inner.pools.close_pool(server).await;
        self.inner.forget_server_state(server);
        closed
    }

    /// Closes every pool and drops all schemas and cursors.
    pub async fn close_all_connection_pools(&self) -> Vec<String> {
        let closed = self.inner.pools.close_all().await;
        self.inner.schemas.clear();
        self.inner.browser.cursors().clear();
        tracing::info!(pools = closed.len(), "Closed all connection pools");
        closed
    }

    /// Connection counts for a server's pool, if one is open.
    pub fn pool_stats(&self, server: &str) -> Option<PoolStats> {
        self.inner.pools.stats(server)
    }

    /// Id of the server's current pool; changes whenever it is rebuilt.
    pub fn pool_id(&self, server: &str) -> Option<uuid::Uuid> {
        self.inner.pools.existing(server).map(|pool| pool.id())
    }

    /// Names of servers with an open pool.
    pub fn connected_servers(&self) -> Vec<String> {
        self.inner.pools.server_names()
    }

    /// Number of paging cursors currently held.
    pub fn cursor_count(&self) -> usize {
        self.inner.browser.cursors().len()
    }
}

impl std::fmt::Debug for DirectoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryEngine")
            .field("pools", &self.inner.pools)
            .field("schemas", &self.inner.schemas.len())
            .field("cursors", &self.inner.browser.cursors().len())
            .field("activity", &self.inner.activity)
            .finish()
    }
}
