//! In-process product store.
//!
//! Keeps every record in memory behind a `RwLock` and searches with a linear
//! cosine scan. With a path, the records are written to a JSON file after each
//! mutation (atomic replace) and read back on open.

use super::embedder::cosine_similarity;
use super::store::ProductStore;
use super::types::{SearchHit, StoredRecord, VectorQuery};
use crate::fs_util::write_atomic;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Default)]
pub struct LocalStore {
    records: RwLock<BTreeMap<String, StoredRecord>>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens (or starts) a store persisted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records: BTreeMap<String, StoredRecord> = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid store file {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        info!("Opened local store at {} ({} products)", path.display(), records.len());
        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Vector record stored for `code`, mainly for inspection in tests.
    pub async fn record(&self, code: &str) -> Option<StoredRecord> {
        self.records.read().await.get(code).cloned()
    }

    fn persist(&self, records: &BTreeMap<String, StoredRecord>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(records)?;
        write_atomic(path, &bytes)
            .with_context(|| format!("Failed to write store file {}", path.display()))?;
        debug!("Persisted {} products to {}", records.len(), path.display());
        Ok(())
    }
}

#[async_trait]
impl ProductStore for LocalStore {
    async fn ensure_index(&self) -> Result<()> {
        Ok(())
    }

    async fn fingerprints(&self, codes: &[String]) -> Result<Vec<Option<String>>> {
        let records = self.records.read().await;
        Ok(codes
            .iter()
            .map(|code| records.get(code).map(|r| r.vector.content_hash.clone()))
            .collect())
    }

    async fn upsert(&self, new_records: Vec<StoredRecord>) -> Result<()> {
        if new_records.is_empty() {
            return Ok(());
        }
        let mut records = self.records.write().await;
        for record in new_records {
            records.insert(record.code.clone(), record);
        }
        self.persist(&records)
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>> {
        let records = self.records.read().await;

        let mut hits: Vec<SearchHit> = records
            .values()
            .filter(|r| query.filters.matches(&r.vector))
            .map(|r| SearchHit {
                code: r.code.clone(),
                title: r.vector.title.clone(),
                brand: r.vector.brand.clone(),
                category: r.vector.category.clone(),
                keywords: r.vector.keywords.clone(),
                score: 1.0 - cosine_similarity(&query.embedding, &r.vector.embedding),
                product: None,
            })
            .collect();

        hits.sort_by(|a, b| a.score.total_cmp(&b.score));
        hits.truncate(query.k);
        Ok(hits)
    }

    async fn get(&self, code: &str) -> Result<Option<Value>> {
        Ok(self.records.read().await.get(code).map(|r| r.payload.clone()))
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<String>> {
        let phrase = title.trim().to_lowercase();
        if phrase.is_empty() {
            return Ok(None);
        }
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| r.vector.title.to_lowercase().contains(&phrase))
            .map(|r| r.code.clone()))
    }

    async fn delete(&self, codes: &[String]) -> Result<usize> {
        let mut records = self.records.write().await;
        let removed = codes.iter().filter(|c| records.remove(*c).is_some()).count();
        if removed > 0 {
            self.persist(&records)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::{SearchFilters, VectorRecord};
    use serde_json::json;
    use tempfile::tempdir;

    fn stored(code: &str, category: &str, embedding: Vec<f32>) -> StoredRecord {
        StoredRecord {
            code: code.to_string(),
            payload: json!({"id": code, "title": format!("Title {}", code)}),
            vector: VectorRecord {
                code: code.to_string(),
                title: format!("Title {}", code),
                desc: String::new(),
                brand: "Legami".to_string(),
                category: category.to_string(),
                keywords: vec![],
                price: None,
                content_hash: format!("hash-{}", code),
                embedding,
            },
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_distance_and_filters() {
        let store = LocalStore::in_memory();
        store
            .upsert(vec![
                stored("A", "Mugs", vec![1.0, 0.0]),
                stored("B", "Calendars", vec![0.6, 0.8]),
                stored("C", "Calendars", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let query = VectorQuery {
            embedding: vec![1.0, 0.0],
            k: 2,
            filters: SearchFilters::default(),
        };
        let hits = store.search(&query).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.code.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);
        assert!(hits[0].score.abs() < 1e-6);

        let filtered = VectorQuery {
            filters: SearchFilters {
                category: Some("Calendars".to_string()),
                ..SearchFilters::default()
            },
            ..query
        };
        let hits = store.search(&filtered).await.unwrap();
        assert_eq!(hits[0].code, "B");
        assert!(hits.iter().all(|h| h.category == "Calendars"));
    }

    #[tokio::test]
    async fn test_fingerprints_and_delete() {
        let store = LocalStore::in_memory();
        store.upsert(vec![stored("A", "Mugs", vec![1.0])]).await.unwrap();

        let codes = vec!["A".to_string(), "Z".to_string()];
        let fps = store.fingerprints(&codes).await.unwrap();
        assert_eq!(fps, vec![Some("hash-A".to_string()), None]);

        assert_eq!(store.delete(&codes).await.unwrap(), 1);
        assert!(store.is_empty().await);
        assert!(store.get("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_title_phrase() {
        let store = LocalStore::in_memory();
        store.upsert(vec![stored("A", "Mugs", vec![1.0])]).await.unwrap();
        assert_eq!(store.find_by_title("title a").await.unwrap(), Some("A".to_string()));
        assert_eq!(store.find_by_title("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store/catalog.json");

        let store = LocalStore::open(&path).unwrap();
        store.upsert(vec![stored("A", "Mugs", vec![1.0, 0.0])]).await.unwrap();
        drop(store);

        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.get("A").await.unwrap().unwrap()["id"], "A");
    }
}
