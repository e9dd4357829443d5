//! Product store abstraction and factory.
//!
//! Every backend keeps two things per product code: the JSON document and a
//! compact vector record carrying the searchable fields, the embedding and
//! the content fingerprint.

use super::local_store::LocalStore;
use super::qdrant_store::QdrantStore;
use super::redis_store::RedisStore;
use super::types::{SearchHit, StoredRecord, VectorQuery};
use crate::config::{StorageConfig, StorageMode};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Keyed product storage with KNN search.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Creates the vector index if it does not exist yet.
    async fn ensure_index(&self) -> Result<()>;

    /// Stored fingerprints for `codes`, in the same order; `None` when absent.
    async fn fingerprints(&self, codes: &[String]) -> Result<Vec<Option<String>>>;

    /// Writes documents and vector records, replacing whatever each code held.
    async fn upsert(&self, records: Vec<StoredRecord>) -> Result<()>;

    /// KNN search, closest first. Scores are cosine distances.
    async fn search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>>;

    /// The JSON document stored under `code`.
    async fn get(&self, code: &str) -> Result<Option<Value>>;

    /// Code of the first product whose title contains `title` as a phrase.
    async fn find_by_title(&self, title: &str) -> Result<Option<String>>;

    /// Removes both entries of every code; returns how many codes existed.
    async fn delete(&self, codes: &[String]) -> Result<usize>;
}

/// Creates a store for the configured backend.
///
/// - `Redis` uses RedisJSON documents plus a RediSearch HNSW index
/// - `Qdrant` uses a cosine collection over gRPC
/// - `Embedded` keeps everything in process, persisted to a JSON file
pub async fn create_product_store(
    storage_config: &StorageConfig,
    vector_size: usize,
) -> Result<Arc<dyn ProductStore>> {
    match &storage_config.storage_mode {
        StorageMode::Redis { url } => {
            let store = RedisStore::connect(url, storage_config, vector_size).await?;
            Ok(Arc::new(store))
        }
        StorageMode::Qdrant { url } => {
            let store = QdrantStore::new(url, storage_config, vector_size as u64).await?;
            Ok(Arc::new(store))
        }
        StorageMode::Embedded { path } => {
            let store = LocalStore::open(path)?;
            Ok(Arc::new(store))
        }
    }
}
