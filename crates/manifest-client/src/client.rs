//! HTTP manifest client

use crate::error::ManifestError;
use crate::fetcher_trait::ManifestFetcher;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Plain HTTP(S) GET client for descriptors and manifests
#[derive(Debug, Clone)]
pub struct ManifestClient {
    client: Client,
}

impl ManifestClient {
    /// Create a new client with a 30 second request timeout
    pub fn new() -> Result<Self, ManifestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ManifestError::Http)?;

        Ok(Self { client })
    }

    /// Fetch `url` and return its body as text.
    ///
    /// No retries: a failure surfaces to the caller, which records it on the App.
    pub async fn get_text(&self, url: &str) -> Result<String, ManifestError> {
        debug!("Fetching {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ManifestError::Fetch {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }
}

#[async_trait::async_trait]
impl ManifestFetcher for ManifestClient {
    async fn fetch(&self, url: &str) -> Result<String, ManifestError> {
        self.get_text(url).await
    }
}
