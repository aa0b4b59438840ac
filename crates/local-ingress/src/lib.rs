//! Local Ingress
//!
//! Node-local plumbing that makes cluster services reachable from the home
//! network: avahi CNAME records for name resolution and nginx server blocks
//! that proxy to the backing pods.

pub mod avahi;
pub mod error;
pub mod nginx;
pub mod routes;
#[path = "trait.rs"]
pub mod ingress_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use avahi::AvahiRegistrar;
pub use error::IngressError;
pub use ingress_trait::{NameRegistrar, ReverseProxy};
pub use nginx::NginxProxy;
pub use routes::{ProxyServer, Route, RouteTable};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockProxy, MockRegistrar};
