use crate::catalog::Product;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Product fields returned with search hits when no explicit subset is asked for.
pub const DEFAULT_DETAIL_FIELDS: &[&str] = &[
    "id",
    "title",
    "description",
    "category",
    "brand",
    "ean",
    "upc",
    "themes",
    "material",
    "material_secondary",
    "made_in",
    "format",
    "binding",
    "dimensions",
    "canonical_text",
    "keywords",
    "topics",
    "attributes_extracted",
];

/// The compact, searchable side of a stored product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub code: String,
    pub title: String,
    pub desc: String,
    pub brand: String,
    pub category: String,
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub content_hash: String,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    pub fn from_product(
        code: impl Into<String>,
        product: &Product,
        content_hash: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            code: code.into(),
            title: product.title.clone(),
            desc: product.description.clone(),
            brand: product.brand.clone(),
            category: product.category.clone(),
            keywords: product.keywords.clone(),
            price: product.price,
            content_hash: content_hash.into(),
            embedding,
        }
    }

    /// Little-endian `f32` bytes, the layout vector indexes expect.
    pub fn embedding_bytes(&self) -> Vec<u8> {
        vector_to_bytes(&self.embedding)
    }
}

pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// One product as written to the store: the JSON document and its vector record,
/// both under the same code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub code: String,
    pub payload: Value,
    pub vector: VectorRecord,
}

/// Optional restrictions applied to a KNN search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub brand: Option<String>,
    #[serde(default)]
    pub must_keywords: Vec<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.category.as_deref().map_or(true, str::is_empty)
            && self.brand.as_deref().map_or(true, str::is_empty)
            && self.must_keywords.iter().all(|k| k.is_empty())
            && self.min_price.is_none()
            && self.max_price.is_none()
    }

    pub fn has_price_range(&self) -> bool {
        self.min_price.is_some() || self.max_price.is_some()
    }

    /// Evaluates the filters against a record, matching tags case-insensitively.
    pub fn matches(&self, record: &VectorRecord) -> bool {
        let tag_ok = |wanted: &Option<String>, actual: &str| match wanted.as_deref() {
            Some(w) if !w.is_empty() => w.eq_ignore_ascii_case(actual),
            _ => true,
        };
        if !tag_ok(&self.category, &record.category) || !tag_ok(&self.brand, &record.brand) {
            return false;
        }

        let wanted: Vec<&String> = self.must_keywords.iter().filter(|k| !k.is_empty()).collect();
        if !wanted.is_empty()
            && !wanted
                .iter()
                .any(|w| record.keywords.iter().any(|k| k.eq_ignore_ascii_case(w)))
        {
            return false;
        }

        if self.has_price_range() {
            let Some(price) = record.price else {
                return false;
            };
            let lo = self.min_price.unwrap_or(f64::NEG_INFINITY);
            let hi = self.max_price.unwrap_or(f64::INFINITY);
            if price < lo || price > hi {
                return false;
            }
        }
        true
    }
}

/// A KNN query as handed to a store.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub embedding: Vec<f32>,
    pub k: usize,
    pub filters: SearchFilters,
}

/// One search result. `score` is a cosine distance: lower is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub code: String,
    pub title: String,
    pub brand: String,
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<Value>,
}

/// A semantic search as issued by the CLI or the agent.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query_text: String,
    pub k: usize,
    pub filters: SearchFilters,
    pub include_details: bool,
    pub detail_fields: Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(query_text: impl Into<String>, k: usize) -> Self {
        Self {
            query_text: query_text.into(),
            k,
            filters: SearchFilters::default(),
            include_details: false,
            detail_fields: None,
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_details(mut self, detail_fields: Option<Vec<String>>) -> Self {
        self.include_details = true;
        self.detail_fields = detail_fields;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub count: usize,
    pub k: usize,
    pub filters: SearchFilters,
    pub items: Vec<SearchHit>,
}

/// Counters describing one load run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    /// Products in the input.
    pub read: usize,
    /// Products left after the key filter.
    pub selected: usize,
    /// Products with no usable code.
    pub skipped_no_code: usize,
    /// Products whose stored fingerprint matched.
    pub unchanged: usize,
    pub upserted: usize,
    /// Vectors computed by the embedding service.
    pub embedded: usize,
    /// Vectors taken from the input records.
    pub reused_embeddings: usize,
    /// Items that fell back to a zero vector.
    pub degraded: usize,
}

/// Keeps only `fields` of a product document. Keys come back in the
/// map's own sorted order, not in the order of `fields`.
pub fn project_fields<S: AsRef<str>>(product: &Value, fields: &[S]) -> Value {
    let Some(map) = product.as_object() else {
        return Value::Object(Default::default());
    };
    let projected = fields
        .iter()
        .filter_map(|f| {
            let key = f.as_ref();
            map.get(key).map(|v| (key.to_string(), v.clone()))
        })
        .collect();
    Value::Object(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> VectorRecord {
        VectorRecord {
            code: "A1".to_string(),
            title: "Cat calendar".to_string(),
            desc: String::new(),
            brand: "Legami".to_string(),
            category: "Calendars".to_string(),
            keywords: vec!["cat lover".to_string(), "wall calendar".to_string()],
            price: Some(12.9),
            content_hash: "h".to_string(),
            embedding: vec![1.0, 0.0],
        }
    }

    #[test]
    fn test_filters_match() {
        let rec = record();
        assert!(SearchFilters::default().matches(&rec));

        let filters = SearchFilters {
            category: Some("calendars".to_string()),
            must_keywords: vec!["mug".to_string(), "Cat Lover".to_string()],
            max_price: Some(15.0),
            ..SearchFilters::default()
        };
        assert!(filters.matches(&rec));

        let too_cheap = SearchFilters {
            max_price: Some(10.0),
            ..SearchFilters::default()
        };
        assert!(!too_cheap.matches(&rec));

        let no_price = VectorRecord { price: None, ..rec.clone() };
        let any_price = SearchFilters {
            min_price: Some(0.0),
            ..SearchFilters::default()
        };
        assert!(!any_price.matches(&no_price));
    }

    #[test]
    fn test_embedding_bytes_little_endian() {
        let bytes = vector_to_bytes(&[1.0]);
        assert_eq!(bytes, 1.0f32.to_le_bytes().to_vec());
        assert_eq!(record().embedding_bytes().len(), 8);
    }

    #[test]
    fn test_project_fields() {
        let product = json!({"id": "A1", "title": "Mug", "embedding_model": "m"});
        let projected = project_fields(&product, &["title", "missing", "id"]);
        assert_eq!(projected, json!({"title": "Mug", "id": "A1"}));

        let reversed = project_fields(&product, &["id", "title"]);
        let keys: Vec<&String> = reversed.as_object().unwrap().keys().collect();
        let other: Vec<&String> = projected.as_object().unwrap().keys().collect();
        assert_eq!(keys, other);
    }
}
