//! Manifest Client
//!
//! Resolves klot-io App sources to URLs and fetches App descriptors and
//! manifests over plain HTTP(S).
//!
//! # Example
//!
//! ```no_run
//! use manifest_client::{ManifestClient, ManifestFetcher, parse_documents, resolve_url};
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ManifestClient::new()?;
//!
//! let mut source = BTreeMap::new();
//! source.insert("site".to_string(), "github.com".to_string());
//! source.insert("repo".to_string(), "klot-io/redis".to_string());
//!
//! let url = resolve_url(&source)?;
//! let documents = parse_documents(&client.fetch(&url).await?)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod documents;
pub mod error;
pub mod source;
#[path = "trait.rs"]
pub mod fetcher_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::ManifestClient;
pub use documents::{parse_document, parse_documents};
pub use error::ManifestError;
pub use fetcher_trait::ManifestFetcher;
pub use source::{describe, merge_source, resolve_url};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockFetcher;
