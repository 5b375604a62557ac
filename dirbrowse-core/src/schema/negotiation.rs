//! Choosing the schema variant for a group of servers.
//!
//! Schemas fetched for side-by-side comparison must all be the same
//! variant. The extended variant is only used when every server in the
//! group is reachable and advertises the extended schema-info control.

use crate::config::ServerConfig;
use crate::Result;
use futures::future::join_all;
use std::future::Future;

/// Probes every server concurrently for extended schema-info support.
///
/// A server that cannot be reached counts as not supporting it.
pub async fn probe_extended_support<F, Fut>(servers: &[ServerConfig], probe: F) -> Vec<bool>
where
    F: Fn(ServerConfig) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let probes = servers.iter().map(|server| {
        let name = server.name.clone();
        let check = probe(server.clone());
        async move {
            match check.await {
                Ok(supported) => {
                    tracing::debug!(server = %name, supported, "Probed extended schema-info support");
                    supported
                }
                Err(error) => {
                    tracing::info!(server = %name, error = %error, "Server unreachable during schema negotiation");
                    false
                }
            }
        }
    });
    join_all(probes).await
}

/// The group uses the extended variant only if every member qualifies.
pub fn negotiate_extended(support: &[bool]) -> bool {
    !support.is_empty() && support.iter().all(|supported| *supported)
}
