//! Cursor-based paged browsing over forward-only paging cookies.
//!
//! Directory servers hand out an opaque cookie for "the next page" and
//! nothing else, so random access is built on top:
//!
//! - page 0 always starts a fresh search
//! - page `n + 1` reuses the cookie cached after page `n`
//! - any other request replays the search from page 0 up to the target
//!
//! A server size limit ends the listing early; the partial page is still
//! returned, flagged `truncated`, with `has_next` set.

mod cursor;
mod heuristics;

pub use cursor::{CursorStore, PagingCursor, search_key};
pub use heuristics::{LeafClassPatterns, display_name, has_children};

use crate::config::BrowseOptions;
use crate::error::{DirectoryError, FaultCategory, ResultCode};
use crate::models::{BrowseEntry, BrowsePage, Entry, SearchRequest, SearchScope};
use crate::pool::ConnectionPool;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// One page of raw search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPage {
    /// Entries in server order
    pub entries: Vec<Entry>,
    /// Cookie for the next page; `None` or empty when the listing is done
    pub cookie: Option<Vec<u8>>,
}

/// Fetches single pages of a one-level listing.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches the page that `cookie` points at (empty for the first page).
    ///
    /// A server size limit is reported as a protocol error with
    /// [`ResultCode::SizeLimitExceeded`] carrying the partial entries.
    async fn fetch(&self, cookie: Vec<u8>) -> Result<RawPage>;
}

/// [`PageSource`] issuing paged one-level searches through a pool.
pub struct PoolPageSource {
    pool: Arc<ConnectionPool>,
    base_dn: String,
    filter: String,
    attributes: Vec<String>,
    page_size: u32,
}

impl PoolPageSource {
    /// Page source listing the children of `base_dn` that match `filter`.
    pub fn new(pool: Arc<ConnectionPool>, base_dn: &str, filter: &str, options: &BrowseOptions) -> Self {
        Self {
            pool,
            base_dn: base_dn.to_string(),
            filter: filter.to_string(),
            attributes: options.attributes.clone(),
            page_size: options.page_size,
        }
    }
}

#[async_trait]
impl PageSource for PoolPageSource {
    async fn fetch(&self, cookie: Vec<u8>) -> Result<RawPage> {
        let request = SearchRequest::new(&self.base_dn, SearchScope::OneLevel, &self.filter)
            .with_attributes(self.attributes.iter().cloned())
            .with_paging(self.page_size, cookie);
        let result = self.pool.search(&request).await?;
        Ok(RawPage {
            entries: result.entries,
            cookie: result.cookie,
        })
    }
}

/// What one page fetch produced.
struct Step {
    entries: Vec<Entry>,
    next_cookie: Option<Vec<u8>>,
    truncated: bool,
}

impl Step {
    fn has_next(&self) -> bool {
        self.truncated || self.next_cookie.is_some()
    }
}

/// Serves arbitrary pages of one-level listings and owns the cursor map.
#[derive(Debug)]
pub struct PagedBrowser {
    cursors: CursorStore,
    options: BrowseOptions,
}

impl PagedBrowser {
    /// Creates a browser with no cursors.
    pub fn new(options: BrowseOptions) -> Self {
        Self {
            cursors: CursorStore::new(),
            options,
        }
    }

    /// Options every page is fetched with.
    pub fn options(&self) -> &BrowseOptions {
        &self.options
    }

    /// The cursors left behind by served pages.
    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// Drops every cursor for a server.
    pub fn clear_cursor(&self, server: &str) {
        self.cursors.clear_server(server);
    }

    /// Drops the cursor for one server and base DN.
    pub fn clear_cursor_for(&self, server: &str, base_dn: &str) {
        self.cursors.remove(&search_key(server, base_dn));
    }

    /// Returns page `page_index` of the children of `base_dn`.
    ///
    /// Requests past the end of the listing yield an empty page with
    /// `has_next` unset.
    ///
    /// # Errors
    /// Returns the protocol error from the search, other than a size limit
    pub async fn page(
        &self,
        server: &str,
        base_dn: &str,
        filter: &str,
        page_index: usize,
        source: &dyn PageSource,
    ) -> Result<BrowsePage> {
        let key = search_key(server, base_dn);
        let context = PageContext {
            key: &key,
            server,
            base_dn,
            filter,
        };

        if page_index == 0 {
            self.cursors.remove(&key);
        } else if let Some(cursor) = self
            .cursors
            .get(&key)
            .filter(|cursor| cursor.continues_to(page_index, filter))
        {
            tracing::debug!(search_key = %key, page_index, "Continuing from cached cursor");
            match self.step(&context, page_index, cursor.cookie, source).await {
                Ok(step) => return Ok(self.build_page(step, page_index)),
                Err(error) if error.category() == FaultCategory::Semantic => {
                    tracing::warn!(
                        search_key = %key,
                        error = %error,
                        "Server rejected cached paging cookie; replaying from the first page"
                    );
                    self.cursors.remove(&key);
                }
                Err(error) => return Err(error),
            }
        }

        self.replay(&context, page_index, source).await
    }

    /// Walks the listing from page 0 up to `page_index`, discarding the
    /// intermediate pages.
    async fn replay(
        &self,
        context: &PageContext<'_>,
        page_index: usize,
        source: &dyn PageSource,
    ) -> Result<BrowsePage> {
        if page_index > 0 {
            tracing::debug!(search_key = %context.key, page_index, "Replaying paged search");
        }

        let mut step = self.step(context, 0, Vec::new(), source).await?;
        for index in 1..=page_index {
            let Some(cookie) = step.next_cookie.take() else {
                return Ok(self.empty_page(page_index));
            };
            step = self.step(context, index, cookie, source).await?;
        }

        Ok(self.build_page(step, page_index))
    }

    /// Fetches one page and records the cursor it leaves behind.
    async fn step(
        &self,
        context: &PageContext<'_>,
        page_index: usize,
        cookie: Vec<u8>,
        source: &dyn PageSource,
    ) -> Result<Step> {
        match source.fetch(cookie).await {
            Ok(raw) => {
                let next_cookie = raw.cookie.filter(|cookie| !cookie.is_empty());
                match &next_cookie {
                    Some(cookie) => self.cursors.store(PagingCursor {
                        search_key: context.key.to_string(),
                        server: context.server.to_string(),
                        base_dn: context.base_dn.to_string(),
                        filter: context.filter.to_string(),
                        cookie: cookie.clone(),
                        last_page_index: page_index,
                    }),
                    None => {
                        self.cursors.remove(context.key);
                    }
                }
                Ok(Step {
                    entries: raw.entries,
                    next_cookie,
                    truncated: false,
                })
            }
            Err(DirectoryError::Protocol {
                code: ResultCode::SizeLimitExceeded,
                partial_entries,
                ..
            }) => {
                tracing::info!(
                    search_key = %context.key,
                    returned = partial_entries.len(),
                    "Server size limit reached; returning partial page"
                );
                self.cursors.remove(context.key);
                Ok(Step {
                    entries: partial_entries,
                    next_cookie: None,
                    truncated: true,
                })
            }
            Err(error) => Err(error),
        }
    }

    fn build_page(&self, step: Step, page_index: usize) -> BrowsePage {
        let has_next = step.has_next();
        let mut entries: Vec<BrowseEntry> = step
            .entries
            .into_iter()
            .map(|entry| {
                let object_classes = entry.object_classes().to_vec();
                BrowseEntry {
                    display_name: display_name(&entry.dn),
                    has_children: has_children(&object_classes),
                    dn: entry.dn,
                    object_classes,
                }
            })
            .collect();
        entries.sort_by_cached_key(|entry| entry.display_name.to_lowercase());

        BrowsePage {
            entries,
            page_index,
            page_size: self.options.page_size,
            has_next,
            has_prev: page_index > 0,
            truncated: step.truncated,
        }
    }

    fn empty_page(&self, page_index: usize) -> BrowsePage {
        BrowsePage {
            entries: Vec::new(),
            page_index,
            page_size: self.options.page_size,
            has_next: false,
            has_prev: page_index > 0,
            truncated: false,
        }
    }
}

struct PageContext<'a> {
    key: &'a str,
    server: &'a str,
    base_dn: &'a str,
    filter: &'a str,
}
