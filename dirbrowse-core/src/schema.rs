//! Per-server schema snapshots and extended schema-info negotiation.
//!
//! # Module Structure
//! - `definition`: RFC 4512 definition parsing and formatting
//! - `fetch`: Standard and extended schema retrieval through a pool
//! - `negotiation`: Deciding the schema variant for a group of servers

mod definition;
mod fetch;
mod negotiation;

pub use definition::{
    AttributeTypeDefinition, AttributeUsage, MatchingRuleDefinition, ObjectClassDefinition,
    ObjectClassKind, SyntaxDefinition, X_ORIGIN, X_SCHEMA_FILE,
};
pub use fetch::{
    DEFAULT_SUBENTRY_DN, SUBENTRY_ATTRIBUTES, fetch_extended, fetch_schema, fetch_standard,
    subentry_dn,
};
pub use negotiation::{negotiate_extended, probe_extended_support};

use crate::models::Entry;
use crate::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Subschema attribute publishing attribute types.
pub const ATTRIBUTE_TYPES: &str = "attributeTypes";
/// Subschema attribute publishing object classes.
pub const OBJECT_CLASSES: &str = "objectClasses";
/// Subschema attribute publishing matching rules.
pub const MATCHING_RULES: &str = "matchingRules";
/// Subschema attribute publishing syntaxes.
pub const LDAP_SYNTAXES: &str = "ldapSyntaxes";

/// How strictly definitions are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Skip malformed definitions with a warning
    Lenient,
    /// Fail on the first malformed definition
    Strict,
}

/// A directory schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Attribute type definitions
    pub attribute_types: Vec<AttributeTypeDefinition>,
    /// Object class definitions
    pub object_classes: Vec<ObjectClassDefinition>,
    /// Matching rule definitions
    pub matching_rules: Vec<MatchingRuleDefinition>,
    /// Syntax definitions
    pub syntaxes: Vec<SyntaxDefinition>,
}

impl Schema {
    /// Builds a schema from a subschema entry.
    ///
    /// Returns the schema and the number of definitions skipped in
    /// lenient mode.
    ///
    /// # Errors
    /// Returns a schema error on the first malformed definition in strict
    /// mode
    pub fn from_entry(entry: &Entry, mode: ParseMode) -> Result<(Self, usize)> {
        let mut skipped = 0;
        let schema = Self {
            attribute_types: parse_all(entry, ATTRIBUTE_TYPES, mode, &mut skipped, AttributeTypeDefinition::parse)?,
            object_classes: parse_all(entry, OBJECT_CLASSES, mode, &mut skipped, ObjectClassDefinition::parse)?,
            matching_rules: parse_all(entry, MATCHING_RULES, mode, &mut skipped, MatchingRuleDefinition::parse)?,
            syntaxes: parse_all(entry, LDAP_SYNTAXES, mode, &mut skipped, SyntaxDefinition::parse)?,
        };
        Ok((schema, skipped))
    }

    /// Looks up an attribute type by name or OID.
    pub fn attribute_type(&self, name: &str) -> Option<&AttributeTypeDefinition> {
        self.attribute_types.iter().find(|a| a.has_name(name))
    }

    /// Looks up an object class by name or OID.
    pub fn object_class(&self, name: &str) -> Option<&ObjectClassDefinition> {
        self.object_classes.iter().find(|o| o.has_name(name))
    }

    /// Whether the schema holds no definitions.
    pub fn is_empty(&self) -> bool {
        self.attribute_types.is_empty()
            && self.object_classes.is_empty()
            && self.matching_rules.is_empty()
            && self.syntaxes.is_empty()
    }

    /// Whether any definition carries origin metadata.
    pub fn has_origin_metadata(&self) -> bool {
        self.attribute_types.iter().any(|a| a.origin().is_some())
            || self.object_classes.iter().any(|o| o.origin().is_some())
            || self.matching_rules.iter().any(|m| m.origin().is_some())
            || self.syntaxes.iter().any(|s| s.origin().is_some())
    }
}

fn parse_all<T>(
    entry: &Entry,
    attribute: &str,
    mode: ParseMode,
    skipped: &mut usize,
    parse: fn(&str) -> Result<T>,
) -> Result<Vec<T>> {
    let mut parsed = Vec::new();
    for value in entry.values(attribute) {
        match parse(value) {
            Ok(definition) => parsed.push(definition),
            Err(error) if mode == ParseMode::Lenient => {
                tracing::warn!(attribute, error = %error, "Skipping malformed schema definition");
                *skipped += 1;
            }
            Err(error) => return Err(error),
        }
    }
    Ok(parsed)
}

/// A schema fetched from one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Server the schema was read from
    pub server: String,
    /// Parsed definitions
    pub schema: Schema,
    /// Fetched with the extended schema-info control honored
    pub extended: bool,
    /// Subschema subentry the schema was read from
    pub subentry_dn: Option<String>,
    /// When the schema was fetched
    pub fetched_at: DateTime<Utc>,
    /// Malformed definitions dropped during a lenient parse
    pub skipped_definitions: usize,
}

/// Concurrent map of schema snapshots, one per server.
#[derive(Debug, Default)]
pub struct SchemaCache {
    snapshots: DashMap<String, Arc<SchemaSnapshot>>,
}

impl SchemaCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached snapshot for a server.
    pub fn get(&self, server: &str) -> Option<Arc<SchemaSnapshot>> {
        self.snapshots.get(server).map(|snapshot| Arc::clone(snapshot.value()))
    }

    /// Stores a snapshot, replacing any cached one.
    pub fn insert(&self, snapshot: SchemaSnapshot) -> Arc<SchemaSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshots.insert(snapshot.server.clone(), Arc::clone(&snapshot));
        snapshot
    }

    /// Stores a snapshot only if the server has none. Returns whether it
    /// was stored.
    pub fn insert_if_absent(&self, snapshot: SchemaSnapshot) -> bool {
        match self.snapshots.entry(snapshot.server.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(snapshot));
                true
            }
        }
    }

    /// Drops a server's snapshot. Returns whether one was cached.
    pub fn invalidate(&self, server: &str) -> bool {
        self.snapshots.remove(server).is_some()
    }

    /// Drops every snapshot.
    pub fn clear(&self) {
        self.snapshots.clear();
    }

    /// Number of cached snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshots are cached.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
