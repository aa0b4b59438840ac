//! YAML document parsing
//!
//! Manifests are `---` separated YAML streams. Documents are converted to
//! `serde_json::Value` so they can be handed to the cluster API unchanged.

use crate::error::ManifestError;
use serde::Deserialize;
use serde_json::Value;

/// Parse every document of a YAML stream, skipping empty ones.
pub fn parse_documents(text: &str) -> Result<Vec<Value>, ManifestError> {
    let mut documents = Vec::new();

    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }

    Ok(documents)
}

/// Parse a stream that must hold exactly one document.
pub fn parse_document(text: &str) -> Result<Value, ManifestError> {
    let mut documents = parse_documents(text)?;
    if documents.len() != 1 {
        return Err(ManifestError::DocumentCount(documents.len()));
    }
    Ok(documents.remove(0))
}
