//! In-memory fake directory shared by the engine integration tests.
//!
//! The fake speaks the `DirectoryConnector` / `DirectoryConnection` traits
//! and supports the handful of behaviors the engine depends on:
//! - one-level and base searches with a simple equality or presence filter
//! - paged results with an 8-byte big-endian offset cookie
//! - a server-side size limit reported with partial entries
//! - root metadata with supported controls and a subschema subentry
//! - a standard and an optional extended schema entry
//! - injected faults: refused connects, failing operations, dropped
//!   connections, rejected certificates and stale cookies

#![allow(dead_code)]
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use dirbrowse_core::client::{
    DirectoryConnection, DirectoryConnector, EXTENDED_SCHEMA_INFO_CONTROL, PAGED_RESULTS_CONTROL,
};
use dirbrowse_core::config::{EngineConfig, PoolOptions, ServerConfig};
use dirbrowse_core::error::TlsHandshakeError;
use dirbrowse_core::security::{Certificate, CertificateChain, CertificateVerification};
use dirbrowse_core::{
    Control, DirectoryEngine, DirectoryError, Entry, Modification, ModifyOperation, ResultCode,
    Result, RootDse, SearchRequest, SearchResult, SearchScope,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const SUBENTRY_DN: &str = "cn=schema";

/// Operation counters observed by tests.
#[derive(Debug, Default)]
pub struct Counters {
    pub connects: AtomicUsize,
    pub start_tls: AtomicUsize,
    pub binds: AtomicUsize,
    pub searches: AtomicUsize,
    pub root_reads: AtomicUsize,
    pub schema_reads: AtomicUsize,
    pub mutations: AtomicUsize,
    pub closes: AtomicUsize,
}

#[derive(Default)]
struct State {
    entries: Mutex<BTreeMap<String, Entry>>,
    naming_contexts: Mutex<Vec<String>>,
    supported_controls: Mutex<Vec<String>>,
    schema: Mutex<Entry>,
    extended_schema: Mutex<Option<Entry>>,
    size_limit: Mutex<Option<usize>>,
    generation: AtomicUsize,
    refused_connects: AtomicUsize,
    failing_operations: Mutex<Vec<ResultCode>>,
    rejected_chain: Mutex<Option<CertificateChain>>,
    presented_chain: Mutex<Option<CertificateChain>>,
    chain_via_store_only: AtomicBool,
    search_gate: Mutex<Option<(Arc<tokio::sync::Barrier>, usize)>>,
    reject_next_cookie: AtomicBool,
    counters: Counters,
}

/// Cheaply cloneable handle to one fake server.
#[derive(Clone, Default)]
pub struct FakeDirectory {
    state: Arc<State>,
}

impl FakeDirectory {
    /// A server publishing `dc=example,dc=com` with a small standard schema.
    pub fn new() -> Self {
        let directory = Self::default();
        directory.state.naming_contexts.lock().push("dc=example,dc=com".to_string());
        directory.state.supported_controls.lock().push(PAGED_RESULTS_CONTROL.to_string());
        *directory.state.schema.lock() = standard_schema();
        directory.insert(
            Entry::new("dc=example,dc=com").with_values("objectClass", ["top", "domain"]),
        );
        directory
    }

    pub fn counters(&self) -> &Counters {
        &self.state.counters
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        Self::count(&self.state.counters.connects)
    }

    pub fn searches(&self) -> usize {
        Self::count(&self.state.counters.searches)
    }

    pub fn schema_reads(&self) -> usize {
        Self::count(&self.state.counters.schema_reads)
    }

    pub fn insert(&self, entry: Entry) {
        self.state.entries.lock().insert(entry.dn.to_ascii_lowercase(), entry);
    }

    pub fn entry(&self, dn: &str) -> Option<Entry> {
        self.state.entries.lock().get(&dn.to_ascii_lowercase()).cloned()
    }

    /// Adds `count` organizational units under `base`, named `ou-NNN`.
    pub fn populate(&self, base: &str, count: usize) {
        for index in 0..count {
            self.insert(
                Entry::new(format!("ou=ou-{:03},{}", index, base))
                    .with_values("objectClass", ["top", "organizationalUnit"]),
            );
        }
    }

    /// Replaces the subschema entry served by the standard fetch.
    pub fn set_schema(&self, schema: Entry) {
        *self.state.schema.lock() = schema;
    }

    pub fn set_size_limit(&self, limit: usize) {
        *self.state.size_limit.lock() = Some(limit);
    }

    /// Advertises the extended schema-info control and serves a schema
    /// carrying origin metadata for it.
    pub fn enable_extended_schema(&self) {
        self.state
            .supported_controls
            .lock()
            .push(EXTENDED_SCHEMA_INFO_CONTROL.to_string());
        *self.state.extended_schema.lock() = Some(extended_schema());
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse_connects(&self, count: usize) {
        self.state.refused_connects.store(count, Ordering::SeqCst);
    }

    /// Fails the next data operations (search, modify, add, delete) with the
    /// given codes, in order.
    pub fn fail_next_operations(&self, codes: &[ResultCode]) {
        self.state.failing_operations.lock().extend_from_slice(codes);
    }

    /// Fails the next `codes.len()` searches with the given codes, holding
    /// each one until all of them are in flight.
    pub fn fail_searches_together(&self, codes: &[ResultCode]) {
        self.fail_next_operations(codes);
        *self.state.search_gate.lock() = Some((Arc::new(tokio::sync::Barrier::new(codes.len())), codes.len()));
    }

    /// Kills every open connection; new connections work normally.
    pub fn drop_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Presents `chain` on every handshake and rejects it when validating.
    pub fn reject_certificate(&self, chain: CertificateChain) {
        *self.state.presented_chain.lock() = Some(chain.clone());
        *self.state.rejected_chain.lock() = Some(chain);
    }

    /// Rejects `chain` like a validating client that reports the chain to
    /// the trust store but attaches none to the handshake error.
    pub fn reject_certificate_via_store(&self, chain: CertificateChain) {
        self.reject_certificate(chain);
        self.state.chain_via_store_only.store(true, Ordering::SeqCst);
    }

    /// Presents `chain` on every handshake and accepts it.
    pub fn present_certificate(&self, chain: CertificateChain) {
        *self.state.presented_chain.lock() = Some(chain);
        *self.state.rejected_chain.lock() = None;
    }

    /// The next request carrying a paging cookie is rejected as stale.
    pub fn reject_next_cookie(&self) {
        self.state.reject_next_cookie.store(true, Ordering::SeqCst);
    }

    fn handshake(&self, server: &str, verification: &CertificateVerification) -> Result<()> {
        let rejected = self.state.rejected_chain.lock().clone();
        match (rejected, verification) {
            (Some(chain), CertificateVerification::Validate(store)) => {
                let attached = if self.state.chain_via_store_only.load(Ordering::SeqCst) {
                    store.record_failure(server, chain);
                    None
                } else {
                    Some(chain)
                };
                Err(DirectoryError::protocol_caused_by(
                    ResultCode::ConnectError,
                    "TLS negotiation failed",
                    TlsHandshakeError::certificate("unable to find valid certification path", attached),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DirectoryConnector for FakeDirectory {
    async fn connect(
        &self,
        config: &ServerConfig,
        verification: &CertificateVerification,
    ) -> Result<Box<dyn DirectoryConnection>> {
        self.open(config, verification)
    }
}

/// Several fake servers behind one connector, routed by host.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    hosts: Arc<Mutex<BTreeMap<String, FakeDirectory>>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a server reachable at `<name>.example.com`.
    pub fn add(&self, name: &str, directory: FakeDirectory) {
        self.hosts.lock().insert(format!("{}.example.com", name), directory);
    }
}

#[async_trait]
impl DirectoryConnector for FakeNetwork {
    async fn connect(
        &self,
        config: &ServerConfig,
        verification: &CertificateVerification,
    ) -> Result<Box<dyn DirectoryConnection>> {
        let directory = self.hosts.lock().get(&config.host).cloned();
        match directory {
            Some(directory) => directory.open(config, verification),
            None => Err(DirectoryError::protocol(
                ResultCode::ServerDown,
                format!("no route to host {}", config.host),
            )),
        }
    }
}

impl FakeDirectory {
    fn open(
        &self,
        config: &ServerConfig,
        verification: &CertificateVerification,
    ) -> Result<Box<dyn DirectoryConnection>> {
        self.state.counters.connects.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .state
            .refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DirectoryError::protocol(ResultCode::ServerDown, "connection refused"));
        }

        if config.tls == dirbrowse_core::TlsMode::Ldaps {
            self.handshake(&config.name, verification)?;
        }

        Ok(Box::new(FakeConnection {
            server: config.name.clone(),
            directory: self.clone(),
            generation: self.state.generation.load(Ordering::SeqCst),
            secure: AtomicBool::new(config.tls == dirbrowse_core::TlsMode::Ldaps),
        }))
    }
}

struct FakeConnection {
    server: String,
    directory: FakeDirectory,
    generation: usize,
    secure: AtomicBool,
}

impl FakeConnection {
    fn state(&self) -> &State {
        &self.directory.state
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.state().generation.load(Ordering::SeqCst) == self.generation {
            Ok(())
        } else {
            Err(DirectoryError::protocol(ResultCode::ServerDown, "connection reset by peer"))
        }
    }

    /// Barrier for a gated search, if any gated searches remain.
    fn take_search_gate(&self) -> Option<Arc<tokio::sync::Barrier>> {
        let mut gate = self.state().search_gate.lock();
        let (barrier, remaining) = gate.as_mut()?;
        let barrier = Arc::clone(barrier);
        *remaining -= 1;
        if *remaining == 0 {
            *gate = None;
        }
        Some(barrier)
    }

    fn injected_failure(&self) -> Result<()> {
        let mut failing = self.state().failing_operations.lock();
        if failing.is_empty() {
            return Ok(());
        }
        let code = failing.remove(0);
        Err(DirectoryError::protocol(code, "injected failure"))
    }

    fn search_subtree(&self, request: &SearchRequest) -> Result<SearchResult> {
        if request.scope == SearchScope::Base {
            return self.search_base(request);
        }

        let entries = self.state().entries.lock();
        let base = request.base.to_ascii_lowercase();
        let matching: Vec<Entry> = entries
            .iter()
            .filter(|(dn, _)| parent_of(dn) == Some(base.as_str()))
            .map(|(_, entry)| entry)
            .filter(|entry| matches_filter(entry, &request.filter))
            .cloned()
            .collect();
        drop(entries);

        let (size, cookie) = match &request.paging {
            Some(paging) => (paging.size as usize, paging.cookie.clone()),
            None => (matching.len(), Vec::new()),
        };

        if !cookie.is_empty() && self.state().reject_next_cookie.swap(false, Ordering::SeqCst) {
            return Err(DirectoryError::protocol(
                ResultCode::UnwillingToPerform,
                "paged results cookie is invalid",
            ));
        }

        let offset = decode_cookie(&cookie);
        let end = matching.len().min(offset + size);

        if let Some(limit) = *self.state().size_limit.lock()
            && end > limit
        {
            let partial = matching[offset.min(limit)..limit].to_vec();
            return Err(DirectoryError::size_limit_exceeded(partial));
        }

        let page = matching[offset.min(end)..end].to_vec();
        let next = (request.paging.is_some() && end < matching.len()).then(|| encode_cookie(end));
        Ok(SearchResult {
            entries: page,
            cookie: next,
            controls: Vec::new(),
            referrals: Vec::new(),
        })
    }

    fn search_base(&self, request: &SearchRequest) -> Result<SearchResult> {
        if request.base.eq_ignore_ascii_case(SUBENTRY_DN) {
            let wants_extended = request
                .controls
                .iter()
                .any(|control| control.oid == EXTENDED_SCHEMA_INFO_CONTROL);
            let extended = self.state().extended_schema.lock().clone();
            return Ok(match (wants_extended, extended) {
                (true, Some(schema)) => SearchResult {
                    entries: vec![schema],
                    controls: vec![Control::new(EXTENDED_SCHEMA_INFO_CONTROL, false)],
                    ..Default::default()
                },
                _ => SearchResult {
                    entries: vec![self.state().schema.lock().clone()],
                    ..Default::default()
                },
            });
        }

        match self.directory.entry(&request.base) {
            Some(entry) => Ok(SearchResult {
                entries: vec![entry],
                ..Default::default()
            }),
            None => Err(DirectoryError::protocol(
                ResultCode::NoSuchObject,
                format!("no such object: {}", request.base),
            )),
        }
    }
}

#[async_trait]
impl DirectoryConnection for FakeConnection {
    async fn start_tls(&self, verification: &CertificateVerification) -> Result<()> {
        self.state().counters.start_tls.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;
        self.directory.handshake(&self.server, verification)?;
        self.secure.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn bind(&self, dn: &str, password: &str) -> Result<()> {
        self.state().counters.binds.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;
        if password == "secret" {
            Ok(())
        } else {
            Err(DirectoryError::protocol(
                ResultCode::InvalidCredentials,
                format!("invalid credentials for {}", dn),
            ))
        }
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        self.state().counters.searches.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;
        if let Some(barrier) = self.take_search_gate() {
            let failure = self.injected_failure();
            barrier.wait().await;
            failure?;
        }
        self.injected_failure()?;
        self.search_subtree(request)
    }

    async fn modify(&self, dn: &str, modifications: &[Modification]) -> Result<()> {
        self.state().counters.mutations.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;
        self.injected_failure()?;

        let mut entries = self.state().entries.lock();
        let entry = entries.get_mut(&dn.to_ascii_lowercase()).ok_or_else(|| {
            DirectoryError::protocol(ResultCode::NoSuchObject, format!("no such object: {}", dn))
        })?;
        for modification in modifications {
            let values = entry
                .attributes
                .entry(modification.attribute.clone())
                .or_default();
            match modification.operation {
                ModifyOperation::Replace => *values = modification.values.clone(),
                ModifyOperation::Add => values.extend(modification.values.iter().cloned()),
                ModifyOperation::Delete if modification.values.is_empty() => values.clear(),
                ModifyOperation::Delete => values.retain(|v| !modification.values.contains(v)),
            }
            if values.is_empty() {
                entry.attributes.remove(&modification.attribute);
            }
        }
        Ok(())
    }

    async fn add(&self, entry: &Entry) -> Result<()> {
        self.state().counters.mutations.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;
        self.injected_failure()?;

        let mut entries = self.state().entries.lock();
        let key = entry.dn.to_ascii_lowercase();
        if entries.contains_key(&key) {
            return Err(DirectoryError::protocol(ResultCode::EntryAlreadyExists, entry.dn.clone()));
        }
        entries.insert(key, entry.clone());
        Ok(())
    }

    async fn delete(&self, dn: &str) -> Result<()> {
        self.state().counters.mutations.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;
        self.injected_failure()?;

        match self.state().entries.lock().remove(&dn.to_ascii_lowercase()) {
            Some(_) => Ok(()),
            None => Err(DirectoryError::protocol(ResultCode::NoSuchObject, dn.to_string())),
        }
    }

    async fn root_info(&self) -> Result<RootDse> {
        self.state().counters.root_reads.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;

        let naming_contexts = self.state().naming_contexts.lock().clone();
        let supported_controls = self.state().supported_controls.lock().clone();
        let mut attributes = BTreeMap::new();
        attributes.insert("namingContexts".to_string(), naming_contexts.clone());
        attributes.insert("supportedControl".to_string(), supported_controls.clone());
        attributes.insert("subschemaSubentry".to_string(), vec![SUBENTRY_DN.to_string()]);

        Ok(RootDse {
            naming_contexts,
            supported_controls,
            supported_ldap_versions: vec!["3".to_string()],
            vendor_name: Some("Fake Directory".to_string()),
            attributes,
            ..Default::default()
        })
    }

    async fn schema(&self) -> Result<Entry> {
        self.state().counters.schema_reads.fetch_add(1, Ordering::SeqCst);
        self.ensure_alive()?;
        Ok(self.state().schema.lock().clone())
    }

    async fn is_control_supported(&self, oid: &str) -> Result<bool> {
        self.ensure_alive()?;
        Ok(self.state().supported_controls.lock().iter().any(|c| c == oid))
    }

    fn peer_certificates(&self) -> Option<CertificateChain> {
        if self.secure.load(Ordering::SeqCst) {
            self.state().presented_chain.lock().clone()
        } else {
            None
        }
    }

    async fn close(&self) -> Result<()> {
        self.state().counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Everything after the first unescaped comma.
fn parent_of(dn: &str) -> Option<&str> {
    let mut escaped = false;
    for (index, c) in dn.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => return Some(&dn[index + 1..]),
            _ => {}
        }
    }
    None
}

/// Supports `(attr=*)` and `(attr=value)`; anything else matches all.
fn matches_filter(entry: &Entry, filter: &str) -> bool {
    let Some((attribute, value)) = filter
        .trim()
        .strip_prefix('(')
        .and_then(|f| f.strip_suffix(')'))
        .and_then(|f| f.split_once('='))
    else {
        return true;
    };
    let values = entry.values(attribute);
    if value == "*" {
        !values.is_empty()
    } else {
        values.iter().any(|v| v.eq_ignore_ascii_case(value))
    }
}

fn encode_cookie(offset: usize) -> Vec<u8> {
    (offset as u64).to_be_bytes().to_vec()
}

fn decode_cookie(cookie: &[u8]) -> usize {
    cookie
        .try_into()
        .map(|bytes: [u8; 8]| u64::from_be_bytes(bytes) as usize)
        .unwrap_or(0)
}

fn standard_schema() -> Entry {
    Entry::new(SUBENTRY_DN)
        .with_values(
            "attributeTypes",
            [
                "( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name )",
                "( 2.5.4.4 NAME ( 'sn' 'surname' ) SUP name )",
                "( 2.5.4.41 NAME 'name' EQUALITY caseIgnoreMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
            ],
        )
        .with_values(
            "objectClasses",
            [
                "( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )",
                "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) )",
            ],
        )
        .with_values(
            "ldapSyntaxes",
            ["( 1.3.6.1.4.1.1466.115.121.1.15 DESC 'Directory String' )"],
        )
}

fn extended_schema() -> Entry {
    Entry::new(SUBENTRY_DN)
        .with_values(
            "attributeTypes",
            [
                "( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name X-SCHEMA-FILE '00-core.ldif' )",
                "( 2.5.4.4 NAME ( 'sn' 'surname' ) SUP name X-SCHEMA-FILE '00-core.ldif' )",
                "( 2.5.4.41 NAME 'name' EQUALITY caseIgnoreMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 X-SCHEMA-FILE '00-core.ldif' )",
            ],
        )
        .with_values(
            "objectClasses",
            [
                "( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass X-SCHEMA-FILE '00-core.ldif' )",
                "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) X-SCHEMA-FILE '00-core.ldif' )",
            ],
        )
}

/// A leaf entry that browses as a person.
pub fn person(dn: &str) -> Entry {
    Entry::new(dn).with_values("objectClass", ["top", "person"])
}

/// Two-certificate chain with display names.
pub fn sample_chain() -> CertificateChain {
    CertificateChain::new(vec![
        Certificate::from_der(vec![0x30, 0x82, 0x01, 0x0a])
            .with_names("CN=ldap.example.com", "CN=Example Issuing CA"),
        Certificate::from_der(vec![0x30, 0x82, 0x02, 0x0b])
            .with_names("CN=Example Issuing CA", "CN=Example Root CA"),
    ])
}

/// Single-certificate chain whose DER differs per `serial`, for telling
/// rotated certificates apart.
pub fn chain_with_serial(serial: u8) -> CertificateChain {
    CertificateChain::new(vec![
        Certificate::from_der(vec![0x30, serial])
            .with_names(format!("CN=ldap.example.com #{}", serial), "CN=Example Issuing CA"),
    ])
}

pub fn server(name: &str) -> ServerConfig {
    ServerConfig::new(name, format!("{}.example.com", name))
}

/// Engine config without background schema pre-fetch, so counters only
/// reflect what the test itself triggers.
pub fn test_config() -> EngineConfig {
    EngineConfig::new().with_prefetch_schema(false)
}

pub fn engine_with(directory: &FakeDirectory, config: EngineConfig) -> DirectoryEngine {
    DirectoryEngine::builder(Arc::new(directory.clone()))
        .config(config)
        .build()
        .expect("test engine config is valid")
}

pub fn engine_for(directory: &FakeDirectory) -> DirectoryEngine {
    engine_with(directory, test_config())
}

/// Single-connection pool options, which make connect counts exact.
pub fn single_connection() -> PoolOptions {
    PoolOptions::default().with_bounds(1, 1)
}

pub fn network_engine(network: &FakeNetwork) -> DirectoryEngine {
    DirectoryEngine::builder(Arc::new(network.clone()))
        .config(test_config())
        .build()
        .expect("test engine config is valid")
}
