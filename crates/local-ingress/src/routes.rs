//! Route table shared by the ingress publisher and the proxy clients.

use std::collections::BTreeMap;

/// One proxied port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProxyServer {
    /// `http` or `https`
    pub protocol: String,
    /// Port the proxy listens on
    pub external: i32,
    /// Port on the backend
    pub internal: i32,
}

/// Everything published for one host name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    /// Backend address
    pub ip: String,
    /// Proxied ports, in service port order
    pub servers: Vec<ProxyServer>,
}

/// Host name → route. Compared by full value when diffing.
pub type RouteTable = BTreeMap<String, Route>;
