//! Activity records for completed directory mutations.
//!
//! The engine reports every successful add, modify and delete to an
//! optional [`ActivityLog`] collaborator. Each record carries a
//! best-effort LDIF change record. A failing log is reported through
//! `tracing` and never fails the directory operation that produced it.

use crate::models::{Entry, Modification};
use crate::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Kind of mutation an activity record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    /// An attribute's values were replaced
    AttributeModified,
    /// Values were added to an attribute
    AttributeAdded,
    /// Values or a whole attribute were removed
    AttributeDeleted,
    /// A new entry was created
    EntryAdded,
    /// An entry was removed
    EntryDeleted,
}

/// One completed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// When the mutation completed
    pub timestamp: DateTime<Utc>,
    /// Server the mutation ran against
    pub server: String,
    /// What kind of mutation it was
    pub kind: ActivityKind,
    /// DN of the entry that changed
    pub dn: String,
    /// Human-readable one-line description
    pub summary: String,
    /// LDIF rendering of the change
    pub change_record: Option<String>,
}

impl ActivityRecord {
    /// Record for a single attribute modification.
    pub fn attribute_change(server: &str, dn: &str, modification: &Modification) -> Self {
        let (kind, verb) = match modification.operation {
            crate::models::ModifyOperation::Replace => (ActivityKind::AttributeModified, "Modified"),
            crate::models::ModifyOperation::Add => (ActivityKind::AttributeAdded, "Added values to"),
            crate::models::ModifyOperation::Delete => (ActivityKind::AttributeDeleted, "Deleted"),
        };
        Self {
            timestamp: Utc::now(),
            server: server.to_string(),
            kind,
            dn: dn.to_string(),
            summary: format!("{} attribute '{}' on {}", verb, modification.attribute, dn),
            change_record: Some(ldif_modify(dn, std::slice::from_ref(modification))),
        }
    }

    /// Record for an added entry.
    pub fn entry_added(server: &str, entry: &Entry) -> Self {
        Self {
            timestamp: Utc::now(),
            server: server.to_string(),
            kind: ActivityKind::EntryAdded,
            dn: entry.dn.clone(),
            summary: format!("Added entry {}", entry.dn),
            change_record: Some(ldif_add(entry)),
        }
    }

    /// Record for a deleted entry.
    pub fn entry_deleted(server: &str, dn: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            server: server.to_string(),
            kind: ActivityKind::EntryDeleted,
            dn: dn.to_string(),
            summary: format!("Deleted entry {}", dn),
            change_record: Some(ldif_delete(dn)),
        }
    }

    /// JSON rendering for log shipping.
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Write-only sink for activity records.
pub trait ActivityLog: std::fmt::Debug + Send + Sync {
    /// Records a completed mutation.
    ///
    /// # Errors
    /// Returns error if the record could not be stored; the engine logs and
    /// ignores it
    fn record(&self, record: ActivityRecord) -> Result<()>;
}

/// [`ActivityLog`] that emits records as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingActivityLog;

impl ActivityLog for TracingActivityLog {
    fn record(&self, record: ActivityRecord) -> Result<()> {
        tracing::info!(
            server = %record.server,
            kind = ?record.kind,
            dn = %record.dn,
            "{}",
            record.summary
        );
        Ok(())
    }
}

/// [`ActivityLog`] that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryActivityLog {
    records: Mutex<Vec<ActivityRecord>>,
}

impl MemoryActivityLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records so far.
    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records.lock().clone()
    }
}

impl ActivityLog for MemoryActivityLog {
    fn record(&self, record: ActivityRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// LDIF change record for attribute modifications.
pub fn ldif_modify(dn: &str, modifications: &[Modification]) -> String {
    let mut ldif = ldif_line("dn", dn);
    ldif.push_str("changetype: modify\n");
    for modification in modifications {
        ldif.push_str(&format!(
            "{}: {}\n",
            modification.operation, modification.attribute
        ));
        for value in &modification.values {
            ldif.push_str(&ldif_line(&modification.attribute, value));
        }
        ldif.push_str("-\n");
    }
    ldif
}

/// LDIF change record for an added entry.
pub fn ldif_add(entry: &Entry) -> String {
    let mut ldif = ldif_line("dn", &entry.dn);
    ldif.push_str("changetype: add\n");
    for (attribute, values) in &entry.attributes {
        for value in values {
            ldif.push_str(&ldif_line(attribute, value));
        }
    }
    for (attribute, values) in &entry.binary_attributes {
        for value in values {
            ldif.push_str(&format!("{}:: {}\n", attribute, STANDARD.encode(value)));
        }
    }
    ldif
}

/// LDIF change record for a deleted entry.
pub fn ldif_delete(dn: &str) -> String {
    let mut ldif = ldif_line("dn", dn);
    ldif.push_str("changetype: delete\n");
    ldif
}

/// One `attr: value` line, base64-encoded when the value is not a safe
/// LDIF string.
fn ldif_line(attribute: &str, value: &str) -> String {
    if is_safe_string(value) {
        format!("{}: {}\n", attribute, value)
    } else {
        format!("{}:: {}\n", attribute, STANDARD.encode(value.as_bytes()))
    }
}

fn is_safe_string(value: &str) -> bool {
    let starts_safe = !matches!(value.as_bytes().first(), Some(b' ' | b':' | b'<'));
    starts_safe
        && !value.ends_with(' ')
        && value
            .bytes()
            .all(|b| b.is_ascii() && !matches!(b, b'\0' | b'\n' | b'\r'))
}
