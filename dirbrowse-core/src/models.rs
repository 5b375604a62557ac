//! Core data models exchanged between the engine and directory clients.
//!
//! These types are the engine's view of the directory protocol. Encoding
//! them on the wire is the client's job; everything here is plain data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Search scope relative to the base DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchScope {
    /// Only the base entry itself
    Base,
    /// Immediate children of the base entry
    OneLevel,
    /// The base entry and everything below it
    Subtree,
}

/// A request or response control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Control OID
    pub oid: String,
    /// Whether the server must honor the control
    pub critical: bool,
    /// BER-encoded control value
    pub value: Option<Vec<u8>>,
}

impl Control {
    /// Creates a control without a value.
    pub fn new(oid: impl Into<String>, critical: bool) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value: None,
        }
    }
}

/// Simple paged results request: page size plus the server's opaque cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Entries per page
    pub size: u32,
    /// Empty on the first page
    pub cookie: Vec<u8>,
}

/// A directory search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Search base DN
    pub base: String,
    /// Search scope
    pub scope: SearchScope,
    /// Filter string
    pub filter: String,
    /// Attributes to return; empty means all user attributes
    pub attributes: Vec<String>,
    /// Request controls
    pub controls: Vec<Control>,
    /// Client-requested entry limit (0 means no client limit)
    pub size_limit: u32,
    /// Server-side time limit propagated with the request
    pub time_limit: Option<Duration>,
    /// Simple paged results request
    pub paging: Option<PageRequest>,
}

impl SearchRequest {
    /// Creates a request with no attribute projection, controls, or limits.
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            controls: Vec::new(),
            size_limit: 0,
            time_limit: None,
            paging: None,
        }
    }

    /// Builder method to set the attribute projection.
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to attach a control.
    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    /// Builder method to set the client size limit.
    pub fn with_size_limit(mut self, size_limit: u32) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Builder method to request one page of results.
    pub fn with_paging(mut self, size: u32, cookie: Vec<u8>) -> Self {
        self.paging = Some(PageRequest { size, cookie });
        self
    }
}

/// A directory entry with its textual and binary attribute values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Distinguished name
    pub dn: String,
    /// String-valued attributes
    pub attributes: BTreeMap<String, Vec<String>>,
    /// Binary-valued attributes
    pub binary_attributes: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    /// Creates an entry with no attributes.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    /// Builder method to add textual values for an attribute.
    pub fn with_values<I, S>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .entry(attribute.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Returns the values of an attribute, matching its name case-insensitively.
    pub fn values(&self, attribute: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map_or(&[], |(_, values)| values.as_slice())
    }

    /// Returns the first value of an attribute.
    pub fn first_value(&self, attribute: &str) -> Option<&str> {
        self.values(attribute).first().map(String::as_str)
    }

    /// Returns the entry's object classes.
    pub fn object_classes(&self) -> &[String] {
        self.values("objectClass")
    }
}

/// Outcome of a search call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Returned entries
    pub entries: Vec<Entry>,
    /// Continuation cookie from the paged results response, empty when done
    pub cookie: Option<Vec<u8>>,
    /// Response controls
    pub controls: Vec<Control>,
    /// Referral URLs
    pub referrals: Vec<String>,
}

impl SearchResult {
    /// Whether the server echoed a response control with the given OID.
    pub fn has_control(&self, oid: &str) -> bool {
        self.controls.iter().any(|c| c.oid == oid)
    }
}

/// Kind of change applied to one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifyOperation {
    /// Add values
    Add,
    /// Delete values, or the whole attribute when none are given
    Delete,
    /// Replace all values
    Replace,
}

impl std::fmt::Display for ModifyOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Delete => write!(f, "delete"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

/// One attribute modification. An empty value list on delete removes the
/// whole attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// What to do
    pub operation: ModifyOperation,
    /// Attribute to change
    pub attribute: String,
    /// Values the operation applies to
    pub values: Vec<String>,
}

impl Modification {
    /// Creates a modification.
    pub fn new(operation: ModifyOperation, attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            operation,
            attribute: attribute.into(),
            values,
        }
    }
}

/// Server root metadata (the root DSE).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDse {
    /// Published naming contexts
    pub naming_contexts: Vec<String>,
    /// Supported control OIDs
    pub supported_controls: Vec<String>,
    /// Supported extended operation OIDs
    pub supported_extensions: Vec<String>,
    /// Supported protocol versions
    pub supported_ldap_versions: Vec<String>,
    /// Vendor name, if published
    pub vendor_name: Option<String>,
    /// Vendor version, if published
    pub vendor_version: Option<String>,
    /// Every attribute as published, including the ones above
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl RootDse {
    /// Returns the first value of a published attribute, case-insensitively.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

/// One row in a browse listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseEntry {
    /// Distinguished name
    pub dn: String,
    /// First RDN value with escapes resolved
    pub display_name: String,
    /// Object classes of the entry
    pub object_classes: Vec<String>,
    /// Display hint only; not verified against the directory
    pub has_children: bool,
}

/// One page of a browse listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowsePage {
    /// Entries sorted by display name
    pub entries: Vec<BrowseEntry>,
    /// Zero-based page index
    pub page_index: usize,
    /// Page size the page was requested with
    pub page_size: u32,
    /// Whether a later page may exist
    pub has_next: bool,
    /// Whether an earlier page exists
    pub has_prev: bool,
    /// The server cut the page short with a size limit
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_values_are_case_insensitive() {
        let entry = Entry::new("cn=alice,dc=example,dc=com")
            .with_values("objectClass", ["top", "person"])
            .with_values("cn", ["alice"]);

        assert_eq!(entry.values("OBJECTCLASS"), ["top", "person"]);
        assert_eq!(entry.first_value("CN"), Some("alice"));
        assert!(entry.values("mail").is_empty());
    }

    #[test]
    fn test_search_request_builder() {
        let request = SearchRequest::new("dc=example", SearchScope::OneLevel, "(objectClass=*)")
            .with_attributes(["objectClass"])
            .with_paging(100, Vec::new())
            .with_size_limit(10);

        assert_eq!(request.attributes, vec!["objectClass".to_string()]);
        assert_eq!(request.paging.as_ref().map(|p| p.size), Some(100));
        assert_eq!(request.size_limit, 10);
    }

    #[test]
    fn test_root_dse_attribute_lookup() {
        let mut root = RootDse::default();
        root.attributes
            .insert("subschemaSubentry".to_string(), vec!["cn=schema".to_string()]);
        assert_eq!(root.attribute("subSchemaSubEntry"), Some("cn=schema"));
        assert_eq!(root.attribute("schemaNamingContext"), None);
    }
}
