//! Traits over the node-local name resolution and reverse proxy
//!
//! The concrete `AvahiRegistrar` and `NginxProxy` implement these traits;
//! tests use the mocks from the `test-util` feature.

use crate::error::IngressError;
use crate::routes::RouteTable;
use std::collections::BTreeSet;

/// Publishes CNAME records for this node.
#[async_trait::async_trait]
pub trait NameRegistrar: Send {
    /// Replace every previously registered CNAME with `cnames`, all
    /// pointing at this node's fully qualified host name.
    async fn register(&mut self, cnames: &BTreeSet<String>) -> Result<(), IngressError>;
}

/// Reads and rewrites the local reverse proxy configuration.
#[async_trait::async_trait]
pub trait ReverseProxy: Send + Sync {
    /// Routes currently configured.
    async fn routes(&self) -> Result<RouteTable, IngressError>;

    /// Rewrite the configuration wholesale to `routes` and reload the proxy.
    async fn publish(&self, routes: &RouteTable) -> Result<(), IngressError>;
}
