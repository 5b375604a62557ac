//! Forward-only paging cursors keyed by server and base DN.

use dashmap::DashMap;

/// Builds the key identifying one pagination context.
pub fn search_key(server: &str, base_dn: &str) -> String {
    format!("{}:{}", server, base_dn)
}

/// Paging state left behind by the last page served for a search key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingCursor {
    /// `server:baseDN` key the cursor is stored under
    pub search_key: String,
    /// Server name
    pub server: String,
    /// Base DN being listed
    pub base_dn: String,
    /// Filter the cookie was issued for
    pub filter: String,
    /// Opaque server cookie for the page after `last_page_index`
    pub cookie: Vec<u8>,
    /// Index of the last page served from this cursor
    pub last_page_index: usize,
}

impl PagingCursor {
    /// Whether this cursor can serve `page_index` without replaying.
    pub fn continues_to(&self, page_index: usize, filter: &str) -> bool {
        self.filter == filter && self.last_page_index.checked_add(1) == Some(page_index)
    }
}

/// Concurrent map of active cursors, one per search key.
#[derive(Debug, Default)]
pub struct CursorStore {
    cursors: DashMap<String, PagingCursor>,
}

impl CursorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor stored under a search key.
    pub fn get(&self, key: &str) -> Option<PagingCursor> {
        self.cursors.get(key).map(|cursor| cursor.value().clone())
    }

    /// Stores a cursor, replacing whatever the key held.
    pub fn store(&self, cursor: PagingCursor) {
        self.cursors.insert(cursor.search_key.clone(), cursor);
    }

    /// Removes and returns the cursor under a search key.
    pub fn remove(&self, key: &str) -> Option<PagingCursor> {
        self.cursors.remove(key).map(|(_, cursor)| cursor)
    }

    /// Drops every cursor belonging to a server.
    pub fn clear_server(&self, server: &str) {
        self.cursors.retain(|_, cursor| cursor.server != server);
    }

    /// Drops every cursor.
    pub fn clear(&self) {
        self.cursors.clear();
    }

    /// Number of cursors held.
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Whether no cursors are held.
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}
