//! Redis Stack storage: RedisJSON documents plus a RediSearch HNSW index.
//!
//! Each product lives under two keys sharing its code:
//! `{json_prefix}{code}` holds the JSON document and `{vec_prefix}{code}` is a
//! HASH with the searchable fields, the fingerprint and the raw embedding.
//! Only the HASH keys are indexed.

use super::filter::{build_filter, join_tags, knn_query, split_tags, tag_value, title_phrase_query};
use super::store::ProductStore;
use super::types::{SearchHit, StoredRecord, VectorQuery};
use crate::config::StorageConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{from_redis_value, Value as RedisValue};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Fields returned by a KNN search.
const RETURN_FIELDS: &[&str] = &["code", "title", "brand", "category", "keywords", "score"];

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    index_name: String,
    json_prefix: String,
    vec_prefix: String,
    dim: usize,
}

impl RedisStore {
    /// Opens a multiplexed connection to `url`.
    pub async fn connect(url: &str, storage_config: &StorageConfig, dim: usize) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("Invalid Redis URL {}", url))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;
        info!("Connected to Redis at {}", url);

        Ok(Self {
            conn,
            index_name: storage_config.index_name.clone(),
            json_prefix: storage_config.json_prefix.clone(),
            vec_prefix: storage_config.vec_prefix.clone(),
            dim,
        })
    }

    fn json_key(&self, code: &str) -> String {
        format!("{}{}", self.json_prefix, code)
    }

    fn vec_key(&self, code: &str) -> String {
        format!("{}{}", self.vec_prefix, code)
    }

    /// Arguments of `FT.CREATE` for this store's index.
    pub fn create_index_args(&self) -> Vec<String> {
        let mut args = vec![
            self.index_name.clone(),
            "ON".into(),
            "HASH".into(),
            "PREFIX".into(),
            "1".into(),
            self.vec_prefix.clone(),
            "SCHEMA".into(),
        ];
        for (field, kind) in [
            ("code", "TEXT"),
            ("title", "TEXT"),
            ("desc", "TEXT"),
            ("brand", "TAG"),
            ("category", "TAG"),
            ("keywords", "TAG"),
            ("price", "NUMERIC"),
            ("content_hash", "TEXT"),
        ] {
            args.push(field.into());
            args.push(kind.into());
        }
        args.extend(
            [
                "embedding",
                "VECTOR",
                "HNSW",
                "10",
                "TYPE",
                "FLOAT32",
                "DIM",
                &self.dim.to_string(),
                "DISTANCE_METRIC",
                "COSINE",
                "M",
                "16",
                "EF_CONSTRUCTION",
                "200",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args
    }
}

/// Parses an `FT.SEARCH` reply: `[total, key, [field, value, ...], key, ...]`.
pub fn parse_search_reply(reply: &RedisValue) -> Result<Vec<SearchHit>> {
    let RedisValue::Array(items) = reply else {
        bail!("Unexpected FT.SEARCH reply: {:?}", reply);
    };

    let mut hits = Vec::new();
    let entries = items.get(1..).unwrap_or_default();
    for pair in entries.chunks(2) {
        let [key, fields] = pair else {
            continue;
        };
        let key: String = from_redis_value(key)?;
        let RedisValue::Array(fields) = fields else {
            continue;
        };

        let mut map: HashMap<String, String> = HashMap::new();
        for kv in fields.chunks(2) {
            if let [k, v] = kv {
                map.insert(from_redis_value(k)?, from_redis_value(v)?);
            }
        }
        let mut take = |name: &str| map.remove(name).unwrap_or_default();

        let code = match take("code") {
            c if c.is_empty() => key,
            c => c,
        };
        let score = take("score").parse::<f32>().unwrap_or(f32::MAX);
        hits.push(SearchHit {
            code,
            title: take("title"),
            brand: take("brand"),
            category: take("category"),
            keywords: split_tags(&take("keywords")),
            score,
            product: None,
        });
    }
    Ok(hits)
}

#[async_trait]
impl ProductStore for RedisStore {
    async fn ensure_index(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let info: redis::RedisResult<RedisValue> = redis::cmd("FT.INFO")
            .arg(&self.index_name)
            .query_async(&mut conn)
            .await;
        if info.is_ok() {
            debug!("Index {} already exists", self.index_name);
            return Ok(());
        }

        let _: () = redis::cmd("FT.CREATE")
            .arg(self.create_index_args())
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Failed to create index {}", self.index_name))?;
        info!("Created index {} ({} dims, HNSW cosine)", self.index_name, self.dim);
        Ok(())
    }

    async fn fingerprints(&self, codes: &[String]) -> Result<Vec<Option<String>>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for code in codes {
            pipe.cmd("HGET").arg(self.vec_key(code)).arg("content_hash");
        }
        let mut conn = self.conn.clone();
        let hashes: Vec<Option<String>> = pipe
            .query_async(&mut conn)
            .await
            .context("Failed to read fingerprints")?;
        Ok(hashes)
    }

    async fn upsert(&self, records: Vec<StoredRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for record in &records {
            let v = &record.vector;
            pipe.cmd("JSON.SET")
                .arg(self.json_key(&record.code))
                .arg("$")
                .arg(serde_json::to_string(&record.payload)?)
                .ignore();

            let hset = pipe
                .cmd("HSET")
                .arg(self.vec_key(&record.code))
                .arg("code")
                .arg(&v.code)
                .arg("title")
                .arg(&v.title)
                .arg("desc")
                .arg(&v.desc)
                .arg("brand")
                .arg(tag_value(&v.brand))
                .arg("category")
                .arg(tag_value(&v.category))
                .arg("keywords")
                .arg(join_tags(&v.keywords))
                .arg("content_hash")
                .arg(&v.content_hash)
                .arg("embedding")
                .arg(v.embedding_bytes());
            if let Some(price) = v.price {
                hset.arg("price").arg(price);
            }
            hset.ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .context("Failed to write products")?;
        debug!("Wrote {} products to Redis", records.len());
        Ok(())
    }

    async fn search(&self, query: &VectorQuery) -> Result<Vec<SearchHit>> {
        let filter = build_filter(&query.filters);
        let q = knn_query(&filter, query.k);
        debug!("FT.SEARCH {} {}", self.index_name, q);

        let mut conn = self.conn.clone();
        let reply: RedisValue = redis::cmd("FT.SEARCH")
            .arg(&self.index_name)
            .arg(&q)
            .arg("SORTBY")
            .arg("score")
            .arg("LIMIT")
            .arg(0)
            .arg(query.k)
            .arg("RETURN")
            .arg(RETURN_FIELDS.len())
            .arg(RETURN_FIELDS)
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(super::types::vector_to_bytes(&query.embedding))
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await
            .context("Vector search failed")?;

        parse_search_reply(&reply)
    }

    async fn get(&self, code: &str) -> Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(self.json_key(code))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Failed to read product {}", code))?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).with_context(|| {
                format!("Stored document for {} is not valid JSON", code)
            })?)),
            None => Ok(None),
        }
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<String>> {
        if title.trim().is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn.clone();
        let reply: RedisValue = redis::cmd("FT.SEARCH")
            .arg(&self.index_name)
            .arg(title_phrase_query(title.trim()))
            .arg("LIMIT")
            .arg(0)
            .arg(5)
            .arg("RETURN")
            .arg(1)
            .arg("code")
            .arg("DIALECT")
            .arg(2)
            .query_async(&mut conn)
            .await
            .context("Title search failed")?;

        let hits = parse_search_reply(&reply)?;
        Ok(hits.into_iter().next().map(|h| {
            h.code
                .strip_prefix(&self.vec_prefix)
                .map(String::from)
                .unwrap_or(h.code)
        }))
    }

    async fn delete(&self, codes: &[String]) -> Result<usize> {
        if codes.is_empty() {
            return Ok(0);
        }
        let mut pipe = redis::pipe();
        for code in codes {
            pipe.cmd("DEL").arg(self.json_key(code)).arg(self.vec_key(code));
        }
        let mut conn = self.conn.clone();
        let removed: Vec<i64> = pipe
            .query_async(&mut conn)
            .await
            .context("Failed to delete products")?;
        Ok(removed.into_iter().filter(|n| *n > 0).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageMode;
    use crate::rag::types::{SearchFilters, VectorRecord};
    use serde_json::json;

    fn bulk(s: &str) -> RedisValue {
        RedisValue::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_search_reply() {
        let reply = RedisValue::Array(vec![
            RedisValue::Int(2),
            bulk("vec:A"),
            RedisValue::Array(vec![
                bulk("code"),
                bulk("A"),
                bulk("title"),
                bulk("Cat mug"),
                bulk("keywords"),
                bulk("cat lover,mug"),
                bulk("score"),
                bulk("0.125"),
            ]),
            bulk("vec:B"),
            RedisValue::Array(vec![bulk("title"), bulk("Calendar"), bulk("score"), bulk("0.5")]),
        ]);

        let hits = parse_search_reply(&reply).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].code, "A");
        assert_eq!(hits[0].keywords, vec!["cat lover", "mug"]);
        assert!((hits[0].score - 0.125).abs() < 1e-6);
        // Without a code field the key is used.
        assert_eq!(hits[1].code, "vec:B");
        assert_eq!(hits[1].brand, "");
    }

    #[test]
    fn test_empty_reply() {
        let hits = parse_search_reply(&RedisValue::Array(vec![RedisValue::Int(0)])).unwrap();
        assert!(hits.is_empty());
        assert!(parse_search_reply(&RedisValue::Nil).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis Stack running
    async fn test_redis_store_round_trip() {
        let url = "redis://localhost:6379/15".to_string();
        let storage_config = StorageConfig {
            storage_mode: StorageMode::Redis { url: url.clone() },
            index_name: "idx:test_products".to_string(),
            json_prefix: "test:prod:".to_string(),
            vec_prefix: "test:vec:".to_string(),
            ..StorageConfig::default()
        };
        let store = RedisStore::connect(&url, &storage_config, 3).await.unwrap();
        store.ensure_index().await.unwrap();

        let args = store.create_index_args();
        assert_eq!(&args[..3], &["idx:test_products", "ON", "HASH"]);

        let record = StoredRecord {
            code: "A".to_string(),
            payload: json!({"id": "A", "title": "Cat mug"}),
            vector: VectorRecord {
                code: "A".to_string(),
                title: "Cat mug".to_string(),
                desc: String::new(),
                brand: "Legami".to_string(),
                category: "Mugs".to_string(),
                keywords: vec!["cat lover".to_string()],
                price: Some(9.9),
                content_hash: "h".to_string(),
                embedding: vec![1.0, 0.0, 0.0],
            },
        };
        store.upsert(vec![record]).await.unwrap();

        let query = VectorQuery {
            embedding: vec![1.0, 0.0, 0.0],
            k: 1,
            filters: SearchFilters {
                must_keywords: vec!["cat lover".to_string()],
                ..SearchFilters::default()
            },
        };
        let hits = store.search(&query).await.unwrap();
        assert_eq!(hits[0].code, "A");
        assert_eq!(store.get("A").await.unwrap().unwrap()["title"], "Cat mug");
        assert_eq!(store.delete(&["A".to_string()]).await.unwrap(), 1);
    }
}
