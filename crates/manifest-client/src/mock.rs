//! Mock ManifestFetcher for unit testing
//!
//! Serves canned bodies from memory and records every requested URL, so
//! controller tests run without network access.

use crate::error::ManifestError;
use crate::fetcher_trait::ManifestFetcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock fetcher for testing
///
/// URLs that were never registered answer with a 404 `ManifestError::Fetch`.
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, (u16, String)>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    /// Create an empty mock fetcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200 for `url` (for test setup)
    pub fn add_document(&self, url: impl Into<String>, body: impl Into<String>) {
        self.add_response(url, 200, body);
    }

    /// Serve `body` with an arbitrary status for `url` (for test setup)
    pub fn add_response(&self, url: impl Into<String>, status: u16, body: impl Into<String>) {
        self.responses.lock().unwrap().insert(url.into(), (status, body.into()));
    }

    /// Every URL fetched so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ManifestFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ManifestError> {
        self.requests.lock().unwrap().push(url.to_string());

        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some((200, body)) => Ok(body),
            Some((status, body)) => Err(ManifestError::Fetch { url: url.to_string(), status, body }),
            None => Err(ManifestError::Fetch {
                url: url.to_string(),
                status: 404,
                body: "404: Not Found".to_string(),
            }),
        }
    }
}
