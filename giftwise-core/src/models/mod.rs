//! Model identifiers shared by the embedder, the extractor and the fingerprint.

use serde::{Deserialize, Serialize};

/// An embedding model together with the output dimensionality requested
/// from it.
///
/// Both values take part in the content fingerprint: switching model or
/// dimension invalidates every stored vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub name: String,
    pub dimensions: usize,
}

impl EmbeddingModel {
    pub fn new(name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            name: name.into(),
            dimensions,
        }
    }
}

impl Default for EmbeddingModel {
    fn default() -> Self {
        Self::new("text-embedding-3-large", 1024)
    }
}

/// Resolves short chat model aliases to the snapshot that supports strict
/// JSON schema responses.
pub fn resolve_chat_model(model: &str) -> &str {
    match model {
        "gpt-4o-mini" => "gpt-4o-mini-2024-07-18",
        other => other,
    }
}
