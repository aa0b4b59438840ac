//! ManifestFetcher trait for mocking
//!
//! The concrete `ManifestClient` implements this trait, and tests use
//! `MockFetcher` instead of the network.

use crate::error::ManifestError;

/// Fetches remote descriptor and manifest text.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ManifestFetcher: Send + Sync {
    /// GET `url` and return the body; anything but 200 is a `ManifestError::Fetch`.
    async fn fetch(&self, url: &str) -> Result<String, ManifestError>;
}
