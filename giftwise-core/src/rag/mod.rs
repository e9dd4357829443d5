//! Vector loading and semantic search over the product catalog.
//!
//! # Architecture
//!
//! - [`RagEngine`]: the high-level API used by the CLI and the agent tools
//! - [`embedder`]: batched embeddings with retry and per-item fallback
//! - [`fingerprint`]: content hashes that let a reload skip unchanged products
//! - [`sync`]: the incremental upsert synchronizer
//! - [`store`]: the [`ProductStore`] trait with Redis, Qdrant and local backends
//! - [`filter`]: RediSearch filter and KNN query construction
//!
//! # How It Works
//!
//! 1. **Loading**: each product is fingerprinted and compared with the stored
//!    fingerprint; only changed products are embedded and written, as a JSON
//!    document plus a vector record under the same code.
//! 2. **Search**: the query text is embedded and sent as one filtered KNN
//!    query; hits can be hydrated with (a projection of) their documents.

pub mod embedder;
pub mod filter;
pub mod fingerprint;
mod local_store;
mod qdrant_store;
mod redis_store;
mod store;
pub mod sync;
mod types;

pub use embedder::{cosine_similarity, EmbeddedBatch, Embedder, EmbedderError};
pub use local_store::LocalStore;
pub use qdrant_store::QdrantStore;
pub use redis_store::RedisStore;
pub use store::{create_product_store, ProductStore};
pub use sync::{LoadOptions, Synchronizer};
pub use types::{
    project_fields, LoadReport, SearchFilters, SearchHit, SearchRequest, SearchResults,
    StoredRecord, VectorQuery, VectorRecord, DEFAULT_DETAIL_FIELDS,
};

use crate::catalog::Product;
use crate::config::Config;
use crate::provider::Provider;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Embedder error: {0}")]
    Embedder(#[from] EmbedderError),

    #[error("Failed to serialize product: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RagError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Embedder(e) => e.kind(),
            Self::Payload(_) => "SerializationError",
            Self::Store(_) => "StoreError",
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Catalog loading and search over one product store.
///
/// The engine is `Clone`; clones share the embedder's provider and the store.
#[derive(Clone)]
pub struct RagEngine {
    embedder: Embedder,
    store: Arc<dyn ProductStore>,
}

impl RagEngine {
    /// Creates an engine over the configured store backend.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use giftwise_core::{Config, RagEngine, provider::OpenAiProvider};
    /// # use std::sync::Arc;
    /// # async fn example() {
    /// let config = Config::default();
    /// let provider = Arc::new(OpenAiProvider::new(&config.llm).unwrap());
    /// let engine = RagEngine::new(&config, provider).await.unwrap();
    /// # }
    /// ```
    pub async fn new(config: &Config, provider: Arc<dyn Provider>) -> Result<Self> {
        let embedder = Embedder::from_config(provider, config);
        let store = create_product_store(&config.storage, embedder.dimensions()).await?;
        Ok(Self::with_store(embedder, store))
    }

    pub fn with_store(embedder: Embedder, store: Arc<dyn ProductStore>) -> Self {
        Self { embedder, store }
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        &self.store
    }

    /// Incrementally loads products; see [`Synchronizer::load`].
    pub async fn load(&self, products: Vec<Product>, options: &LoadOptions) -> Result<LoadReport> {
        Synchronizer::new(self.embedder.clone(), self.store.clone())
            .load(products, options)
            .await
    }

    /// Embeds the query text and runs one filtered KNN search.
    ///
    /// Hits come back closest first with cosine distances as scores. In
    /// detail mode each hit carries its stored document, limited to
    /// `detail_fields` (or [`DEFAULT_DETAIL_FIELDS`]).
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let k = request.k.max(1);
        let embedding = self.embedder.embed(&request.query_text).await?;
        debug!("Searching {} nearest products for {:?}", k, request.query_text);

        let query = VectorQuery {
            embedding,
            k,
            filters: request.filters.clone(),
        };
        let mut items = self.store.search(&query).await?;

        if request.include_details {
            for hit in items.iter_mut() {
                if let Some(doc) = self.store.get(&hit.code).await? {
                    hit.product = Some(match &request.detail_fields {
                        Some(fields) if !fields.is_empty() => project_fields(&doc, fields),
                        _ => project_fields(&doc, DEFAULT_DETAIL_FIELDS),
                    });
                }
            }
        }

        info!("Search returned {} products", items.len());
        Ok(SearchResults {
            count: items.len(),
            k,
            filters: request.filters.clone(),
            items,
        })
    }

    /// The stored document for `code`.
    pub async fn get_product(&self, code: &str) -> Result<Option<Value>> {
        Ok(self.store.get(code.trim()).await?)
    }

    /// Looks a product up by title phrase; returns its code and document.
    pub async fn find_product_by_title(&self, title: &str) -> Result<Option<(String, Value)>> {
        let Some(code) = self.store.find_by_title(title).await? else {
            return Ok(None);
        };
        Ok(self.store.get(&code).await?.map(|doc| (code, doc)))
    }

    /// Removes products by code; returns how many existed.
    pub async fn delete(&self, codes: &[String]) -> Result<usize> {
        let removed = self.store.delete(codes).await?;
        info!("Deleted {} of {} requested products", removed, codes.len());
        Ok(removed)
    }
}
