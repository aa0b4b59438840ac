//! Mock registrar and proxy for unit testing

use crate::error::IngressError;
use crate::ingress_trait::{NameRegistrar, ReverseProxy};
use crate::routes::RouteTable;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Records every CNAME set it is asked to register.
#[derive(Debug, Clone, Default)]
pub struct MockRegistrar {
    registrations: Arc<Mutex<Vec<BTreeSet<String>>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockRegistrar {
    /// Create a mock registrar
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `register` calls fail (for test setup)
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    /// Every successful registration, in order
    pub fn registrations(&self) -> Vec<BTreeSet<String>> {
        self.registrations.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl NameRegistrar for MockRegistrar {
    async fn register(&mut self, cnames: &BTreeSet<String>) -> Result<(), IngressError> {
        if *self.fail.lock().unwrap() {
            return Err(IngressError::Command {
                command: "avahi".to_string(),
                detail: "mock failure".to_string(),
            });
        }

        self.registrations.lock().unwrap().push(cnames.clone());
        Ok(())
    }
}

/// In-memory proxy configuration.
#[derive(Debug, Clone, Default)]
pub struct MockProxy {
    routes: Arc<Mutex<RouteTable>>,
    published: Arc<Mutex<Vec<RouteTable>>>,
}

impl MockProxy {
    /// Create an empty mock proxy
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `routes` are already configured (for test setup)
    pub fn set_routes(&self, routes: RouteTable) {
        *self.routes.lock().unwrap() = routes;
    }

    /// Every table passed to `publish`, in order
    pub fn published(&self) -> Vec<RouteTable> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ReverseProxy for MockProxy {
    async fn routes(&self) -> Result<RouteTable, IngressError> {
        Ok(self.routes.lock().unwrap().clone())
    }

    async fn publish(&self, routes: &RouteTable) -> Result<(), IngressError> {
        *self.routes.lock().unwrap() = routes.clone();
        self.published.lock().unwrap().push(routes.clone());
        Ok(())
    }
}
