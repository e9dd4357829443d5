use async_trait::async_trait;
use giftwise_core::rag::{RagEngine, SearchFilters, SearchRequest};
use giftwise_plugin::{Plugin, PluginError, PluginOutput, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const MAX_K: usize = 50;

/// Semantic KNN search over the loaded catalog.
pub struct SearchProductsPlugin {
    engine: Arc<RagEngine>,
    default_k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query_text: String,
    k: Option<usize>,
    category: Option<String>,
    brand: Option<String>,
    #[serde(default)]
    must_keywords: Vec<String>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    #[serde(default = "default_include_details")]
    include_details: bool,
    detail_fields: Option<Vec<String>>,
}

fn default_include_details() -> bool {
    true
}

impl SearchProductsPlugin {
    pub fn new(engine: Arc<RagEngine>, default_k: usize) -> Self {
        Self { engine, default_k }
    }
}

#[async_trait]
impl Plugin for SearchProductsPlugin {
    fn name(&self) -> &str {
        "search_products"
    }

    fn description(&self) -> &str {
        "Semantic KNN search on the product catalog with optional filters. Returns top products WITH details."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["query_text"],
            "properties": {
                "query_text": {"type": "string"},
                "k": {"type": "integer", "minimum": 1, "maximum": MAX_K, "default": self.default_k},
                "category": {"type": "string"},
                "brand": {"type": "string"},
                "must_keywords": {"type": "array", "items": {"type": "string"}},
                "min_price": {"type": "number"},
                "max_price": {"type": "number"},
                "include_details": {
                    "type": "boolean",
                    "description": "If true, attach product JSON details.",
                    "default": true
                },
                "detail_fields": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Subset of product fields to return; omit for default useful set."
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> Result<PluginOutput> {
        let params: SearchParams = serde_json::from_value(input)
            .map_err(|e| PluginError::InvalidInput(format!("Invalid parameters: {}", e)))?;

        let k = params.k.unwrap_or(self.default_k).clamp(1, MAX_K);
        let filters = SearchFilters {
            category: params.category,
            brand: params.brand,
            must_keywords: params.must_keywords,
            min_price: params.min_price,
            max_price: params.max_price,
        };
        let mut request = SearchRequest::new(params.query_text, k).with_filters(filters);
        if params.include_details {
            request = request.with_details(params.detail_fields);
        }

        let results = self
            .engine
            .search(&request)
            .await
            .map_err(|e| PluginError::ExecutionFailed(e.to_string()))?;
        debug!("search_products returned {} items", results.count);

        let value = serde_json::to_value(&results)
            .map_err(|e| PluginError::ExecutionFailed(e.to_string()))?;
        let mut metadata = json!({ "last_search": value });
        if let Some(first) = results.items.first() {
            metadata["active_code"] = json!(first.code);
        }
        Ok(PluginOutput::json(&value).with_metadata(metadata))
    }
}

/// Fetches one product document by code or by exact title.
pub struct GetProductPlugin {
    engine: Arc<RagEngine>,
}

#[derive(Debug, Default, Deserialize)]
struct GetProductParams {
    code: Option<String>,
    title: Option<String>,
}

impl GetProductPlugin {
    pub fn new(engine: Arc<RagEngine>) -> Self {
        Self { engine }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[async_trait]
impl Plugin for GetProductPlugin {
    fn name(&self) -> &str {
        "get_product"
    }

    fn description(&self) -> &str {
        "Fetch a product full JSON payload by product code or by exact title."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string"},
                "title": {"type": "string"}
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> Result<PluginOutput> {
        let params: GetProductParams = serde_json::from_value(input)
            .map_err(|e| PluginError::InvalidInput(format!("Invalid parameters: {}", e)))?;
        let failed = |e: giftwise_core::rag::RagError| PluginError::ExecutionFailed(e.to_string());

        let (by, found) = match (non_empty(params.code), non_empty(params.title)) {
            (Some(code), _) => {
                let doc = self.engine.get_product(&code).await.map_err(failed)?;
                ("code", Some((code, doc)))
            }
            (None, Some(title)) => {
                let hit = self.engine.find_product_by_title(&title).await.map_err(failed)?;
                ("title", hit.map(|(code, doc)| (code, Some(doc))))
            }
            (None, None) => {
                return Ok(PluginOutput::json(
                    &json!({"found": false, "error": "missing code or title"}),
                ));
            }
        };

        let output = match found {
            Some((code, Some(product))) => PluginOutput::json(&json!({
                "found": true,
                "by": by,
                "code": code,
                "product": product,
            }))
            .with_metadata(json!({ "active_code": code })),
            Some((code, None)) => PluginOutput::json(&json!({
                "found": false,
                "by": by,
                "code": code,
                "product": {},
            })),
            None => PluginOutput::json(&json!({
                "found": false,
                "by": by,
                "error": "product not found",
            })),
        };
        Ok(output)
    }
}
