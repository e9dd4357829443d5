//! Qdrant vector database storage implementation.
//!
//! One point per product code. The point payload carries the searchable
//! fields, lowercased copies of the tag fields used for filtering, the
//! fingerprint and the full product document as a JSON string.

use super::filter::{join_tags, split_tags};
use super::store::ProductStore;
use super::types::{SearchFilters, SearchHit, StoredRecord, VectorQuery};
use crate::config::StorageConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        vectors_config::Config, Condition, CreateCollectionBuilder,
        DeletePointsBuilder, Distance, Filter, GetPointsBuilder, PointId, PointStruct, Range,
        RetrievedPoint, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
        VectorParamsBuilder, VectorsConfig,
    },
    Qdrant,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Qdrant-backed product store.
///
/// Upserting a code that already exists replaces its point, so reloading a
/// product never duplicates it.
#[derive(Clone)]
pub struct QdrantStore {
    client: Arc<Qdrant>,
    collection_name: String,
    vector_size: u64,
}

/// Stable numeric point id for a product code.
pub fn point_id(code: &str) -> u64 {
    let digest = Sha256::digest(code.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Qdrant collection names may not contain the `:` used by RediSearch index names.
pub fn collection_name(index_name: &str) -> String {
    index_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn payload_for(record: &StoredRecord) -> Result<HashMap<String, Value>> {
    let v = &record.vector;
    let mut payload: HashMap<String, Value> = HashMap::from([
        ("code".to_string(), json!(v.code)),
        ("title".to_string(), json!(v.title)),
        ("desc".to_string(), json!(v.desc)),
        ("brand".to_string(), json!(v.brand)),
        ("category".to_string(), json!(v.category)),
        ("keywords".to_string(), json!(join_tags(&v.keywords))),
        ("brand_tag".to_string(), json!(v.brand.to_lowercase())),
        ("category_tag".to_string(), json!(v.category.to_lowercase())),
        (
            "keyword_tags".to_string(),
            json!(v.keywords.iter().map(|k| k.to_lowercase()).collect::<Vec<_>>()),
        ),
        ("content_hash".to_string(), json!(v.content_hash)),
        (
            "product_json".to_string(),
            json!(serde_json::to_string(&record.payload)?),
        ),
    ]);
    if let Some(price) = v.price {
        payload.insert("price".to_string(), json!(price));
    }
    Ok(payload)
}

/// Translates search filters into a Qdrant filter; `None` when nothing applies.
pub fn build_qdrant_filter(filters: &SearchFilters) -> Option<Filter> {
    let mut conditions = Vec::new();
    if let Some(category) = filters.category.as_deref().filter(|c| !c.is_empty()) {
        conditions.push(Condition::matches("category_tag", category.to_lowercase()));
    }
    if let Some(brand) = filters.brand.as_deref().filter(|b| !b.is_empty()) {
        conditions.push(Condition::matches("brand_tag", brand.to_lowercase()));
    }
    let keywords: Vec<String> = filters
        .must_keywords
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| k.to_lowercase())
        .collect();
    if !keywords.is_empty() {
        conditions.push(Condition::matches("keyword_tags", keywords));
    }
    if filters.has_price_range() {
        conditions.push(Condition::range(
            "price",
            Range {
                gte: filters.min_price,
                lte: filters.max_price,
                ..Default::default()
            },
        ));
    }
    (!conditions.is_empty()).then(|| Filter::must(conditions))
}

fn payload_str(payload: &HashMap<String, qdrant_client::qdrant::Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

#[async_trait]
impl ProductStore for QdrantStore {
    async fn ensure_index(&self) -> Result<()> {
        self.ensure_collection().await
    }

    async fn fingerprints(&self, codes: &[String]) -> Result<Vec<Option<String>>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let found = self.retrieve(codes).await?;
        let by_code: HashMap<String, String> = found
            .iter()
            .map(|p| (payload_str(&p.payload, "code"), payload_str(&p.payload, "content_hash")))
            .collect();
        Ok(codes.iter().map(|c| by_code.get(c).cloned()).collect())
    }

    async fn upsert(&self, records: Vec<StoredRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let points = records
            .iter()
            .map(|record| {
                let payload = payload_for(record)?;
                Ok(PointStruct::new(
                    point_id(&record.code),
                    record.vector.embedding.clone(),
                    payload,
                ))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, points))
            .await
            .context("Failed to upsert points")?;

        debug!("Upserted {} points into {}", records.len(), self.collection_name);
        Ok(())
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>> {
        let mut builder = SearchPointsBuilder::new(
            &self.collection_name,
            query.embedding.clone(),
            query.k as u64,
        )
        .with_payload(true);
        if let Some(filter) = build_qdrant_filter(&query.filters) {
            builder = builder.filter(filter);
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .context("Failed to search points")?;

        let hits = response
            .result
            .into_iter()
            .map(|point| {
                let payload = point.payload;
                SearchHit {
                    code: payload_str(&payload, "code"),
                    title: payload_str(&payload, "title"),
                    brand: payload_str(&payload, "brand"),
                    category: payload_str(&payload, "category"),
                    keywords: split_tags(&payload_str(&payload, "keywords")),
                    // Qdrant reports cosine similarity; hits carry distances.
                    score: 1.0 - point.score,
                    product: None,
                }
            })
            .collect();

        Ok(hits)
    }

    async fn get(&self, code: &str) -> Result<Option<Value>> {
        let found = self.retrieve(&[code.to_string()]).await?;
        let Some(point) = found.into_iter().next() else {
            return Ok(None);
        };
        let raw = payload_str(&point.payload, "product_json");
        let product = serde_json::from_str(&raw)
            .with_context(|| format!("Stored document for {} is not valid JSON", code))?;
        Ok(Some(product))
    }

    /// Scrolls the collection for the first title containing `title`, ignoring case.
    async fn find_by_title(&self, title: &str) -> Result<Option<String>> {
        let phrase = title.trim().to_lowercase();
        if phrase.is_empty() {
            return Ok(None);
        }

        let mut offset: Option<PointId> = None;
        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection_name)
                .limit(100)
                .with_payload(true);
            if let Some(off) = offset {
                builder = builder.offset(off);
            }

            let scroll_result = self
                .client
                .scroll(builder)
                .await
                .context("Failed to scroll points")?;

            for point in &scroll_result.result {
                if payload_str(&point.payload, "title")
                    .to_lowercase()
                    .contains(&phrase)
                {
                    return Ok(Some(payload_str(&point.payload, "code")));
                }
            }

            match scroll_result.next_page_offset {
                Some(next) => offset = Some(next),
                None => return Ok(None),
            }
        }
    }

    async fn delete(&self, codes: &[String]) -> Result<usize> {
        if codes.is_empty() {
            return Ok(0);
        }
        let existing: Vec<PointId> = self
            .retrieve(codes)
            .await?
            .into_iter()
            .filter_map(|p| p.id)
            .collect();
        let count = existing.len();

        if !existing.is_empty() {
            self.client
                .delete_points(DeletePointsBuilder::new(&self.collection_name).points(existing))
                .await
                .context("Failed to delete points")?;
        }
        Ok(count)
    }
}

impl QdrantStore {
    /// Connects to Qdrant at `url` and ensures the collection exists.
    ///
    /// # Arguments
    ///
    /// * `url` - gRPC endpoint, e.g. `http://localhost:6334`
    /// * `storage_config` - Storage configuration; `index_name` names the collection
    /// * `vector_size` - Dimension of the embedding vectors
    pub async fn new(url: &str, storage_config: &StorageConfig, vector_size: u64) -> Result<Self> {
        let client = Arc::new(
            Qdrant::from_url(url)
                .build()
                .context("Failed to connect to Qdrant server")?,
        );

        let store = Self {
            client,
            collection_name: collection_name(&storage_config.index_name),
            vector_size,
        };

        store.ensure_collection().await?;

        Ok(store)
    }

    async fn retrieve(&self, codes: &[String]) -> Result<Vec<RetrievedPoint>> {
        let ids: Vec<PointId> = codes.iter().map(|c| PointId::from(point_id(c))).collect();
        let response = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection_name, ids).with_payload(true))
            .await
            .context("Failed to retrieve points")?;
        Ok(response.result)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .context("Failed to check collection")?;

        if !exists {
            info!(
                "Creating collection {} ({} dims, cosine)",
                self.collection_name, self.vector_size
            );
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                        VectorsConfig {
                            config: Some(Config::Params(
                                VectorParamsBuilder::new(self.vector_size, Distance::Cosine)
                                    .build(),
                            )),
                        },
                    ),
                )
                .await
                .context("Failed to create collection")?;
        }

        Ok(())
    }
}
