//! Schema retrieval through a connection pool.
//!
//! # Variants
//! - **Standard**: the client's whole-schema fetch, parsed leniently
//! - **Extended**: a base-scope read of the subschema subentry with the
//!   extended schema-info control attached, parsed strictly
//!
//! Any failure of the extended variant falls back to the standard one.

use super::{
    ATTRIBUTE_TYPES, LDAP_SYNTAXES, MATCHING_RULES, OBJECT_CLASSES, ParseMode, Schema,
    SchemaSnapshot,
};
use crate::client::EXTENDED_SCHEMA_INFO_CONTROL;
use crate::error::DirectoryError;
use crate::models::{Control, RootDse, SearchRequest, SearchScope};
use crate::pool::ConnectionPool;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;

/// Root metadata attributes naming the schema subentry, in preference order.
pub const SUBENTRY_ATTRIBUTES: [&str; 3] =
    ["subschemaSubentry", "schemaNamingContext", "ds-cfg-schema-entry-dn"];

/// Subentry DN used when the server publishes none.
pub const DEFAULT_SUBENTRY_DN: &str = "cn=schema";

/// Locates the schema subentry from root metadata.
pub fn subentry_dn(root: &RootDse) -> String {
    SUBENTRY_ATTRIBUTES
        .iter()
        .find_map(|attribute| root.attribute(attribute).filter(|dn| !dn.trim().is_empty()))
        .unwrap_or(DEFAULT_SUBENTRY_DN)
        .to_string()
}

/// Fetches the schema with the client's standard fetch.
///
/// # Errors
/// Returns the protocol error from the fetch
pub async fn fetch_standard(pool: &Arc<ConnectionPool>) -> Result<SchemaSnapshot> {
    let server = pool.server().name.clone();
    let entry = pool.schema().await?;
    let (schema, skipped) = Schema::from_entry(&entry, ParseMode::Lenient)?;

    if skipped > 0 {
        tracing::warn!(server = %server, skipped, "Schema contained malformed definitions");
    }
    tracing::debug!(
        server = %server,
        attribute_types = schema.attribute_types.len(),
        object_classes = schema.object_classes.len(),
        "Fetched standard schema"
    );

    Ok(SchemaSnapshot {
        server,
        schema,
        extended: false,
        subentry_dn: (!entry.dn.is_empty()).then_some(entry.dn),
        fetched_at: Utc::now(),
        skipped_definitions: skipped,
    })
}

/// Fetches the schema with the extended schema-info control.
///
/// The control counts as honored when the server echoes it or the returned
/// definitions carry origin metadata.
///
/// # Errors
/// Returns an error if the subentry cannot be read, the control was not
/// honored, or any definition is malformed
pub async fn fetch_extended(pool: &Arc<ConnectionPool>) -> Result<SchemaSnapshot> {
    let server = pool.server().name.clone();
    let root = pool.root_info().await?;
    let dn = subentry_dn(&root);

    let request = SearchRequest::new(&dn, SearchScope::Base, "(objectClass=*)")
        .with_attributes([ATTRIBUTE_TYPES, OBJECT_CLASSES, MATCHING_RULES, LDAP_SYNTAXES])
        .with_control(Control::new(EXTENDED_SCHEMA_INFO_CONTROL, false));
    let result = pool.search(&request).await?;

    let echoed = result.has_control(EXTENDED_SCHEMA_INFO_CONTROL);
    let entry = result.entries.into_iter().next().ok_or_else(|| {
        DirectoryError::schema(format!("schema subentry '{}' returned no entry", dn))
    })?;
    let (schema, _) = Schema::from_entry(&entry, ParseMode::Strict)?;

    if !echoed && !schema.has_origin_metadata() {
        return Err(DirectoryError::schema(format!(
            "server '{}' ignored the extended schema-info control",
            server
        )));
    }

    tracing::debug!(server = %server, subentry = %dn, "Fetched extended schema");
    Ok(SchemaSnapshot {
        server,
        schema,
        extended: true,
        subentry_dn: Some(dn),
        fetched_at: Utc::now(),
        skipped_definitions: 0,
    })
}

/// Fetches the requested variant, falling back to the standard fetch when
/// the extended one fails.
///
/// # Errors
/// Returns the error from the standard fetch
pub async fn fetch_schema(pool: &Arc<ConnectionPool>, use_extended: bool) -> Result<SchemaSnapshot> {
    if use_extended {
        match fetch_extended(pool).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(error) => {
                tracing::info!(
                    server = %pool.server().name,
                    error = %error,
                    "Extended schema fetch failed; falling back to standard fetch"
                );
            }
        }
    }
    fetch_standard(pool).await
}
