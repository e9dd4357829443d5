//! Stage 2: LLM keyword extraction and embedding re-scoring.
//!
//! Every product goes through the same steps:
//!
//! 1. [`canonical::build_product_text`] renders the labelled product text
//! 2. [`Extractor`] asks the model for keyphrases, topics, attributes and a summary
//! 3. [`rescore`] keeps the keyphrases closest to the product text
//! 4. [`canonical::canonical_text`] builds the text embedded at load time
//!
//! [`Enricher`] runs products concurrently and records per-product failures
//! on the record instead of aborting the run.

pub mod canonical;
mod extractor;
mod pipeline;
mod rescore;

pub use extractor::{product_keywords_schema, ExtractedFields, Extractor, SCHEMA_NAME};
pub use pipeline::{EnrichOptions, EnrichSummary, Enricher};
pub use rescore::rescore;

use crate::catalog::CatalogError;
use crate::provider::ProviderError;
use crate::rag::EmbedderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Embedder(#[from] EmbedderError),

    #[error("Invalid extraction response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Extraction response had no content")]
    EmptyResponse,

    #[error("Output error: {0}")]
    Output(#[from] CatalogError),
}

impl EnrichError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Embedder(e) => e.kind(),
            Self::Json(_) => "JSONDecodeError",
            Self::EmptyResponse => "EmptyResponseError",
            Self::Output(_) => "OutputError",
        }
    }

    /// `"Kind: message"`, recorded as `_error` on a failed product.
    pub fn annotation(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

pub type Result<T> = std::result::Result<T, EnrichError>;
