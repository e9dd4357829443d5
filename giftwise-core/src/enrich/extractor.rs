//! Structured keyword extraction through chat completions.

use super::{EnrichError, Result};
use crate::catalog::text::clean_list;
use crate::models::resolve_chat_model;
use crate::provider::{ChatRequest, Message, Provider, ResponseFormat, RetryPolicy};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Name of the response schema sent with every extraction request.
pub const SCHEMA_NAME: &str = "ProductKeywords";

/// Cleaned fields returned by the extractor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub keyphrases: Vec<String>,
    pub topics: Vec<String>,
    pub attributes: Vec<String>,
    pub occasions: Vec<String>,
    pub audience: Vec<String>,
    pub negatives: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
struct RawFields {
    #[serde(default)]
    keyphrases: Vec<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    attributes: Vec<String>,
    #[serde(default)]
    occasions: Vec<String>,
    #[serde(default)]
    audience: Vec<String>,
    #[serde(default)]
    negatives: Vec<String>,
    #[serde(default)]
    canonical_summary_en: Option<String>,
}

impl From<RawFields> for ExtractedFields {
    fn from(raw: RawFields) -> Self {
        Self {
            keyphrases: clean_list(raw.keyphrases),
            topics: clean_list(raw.topics),
            attributes: clean_list(raw.attributes),
            occasions: clean_list(raw.occasions),
            audience: clean_list(raw.audience),
            negatives: clean_list(raw.negatives),
            summary: raw.canonical_summary_en.unwrap_or_default().trim().to_string(),
        }
    }
}

/// The strict JSON schema the model must answer with.
pub fn product_keywords_schema() -> Value {
    let list = json!({"type": "array", "items": {"type": "string"}});
    json!({
        "type": "object",
        "properties": {
            "keyphrases": list,
            "topics": list,
            "attributes": list,
            "occasions": list,
            "audience": list,
            "negatives": list,
            "canonical_summary_en": {"type": "string"}
        },
        "required": [
            "keyphrases", "topics", "attributes", "occasions",
            "audience", "negatives", "canonical_summary_en"
        ],
        "additionalProperties": false
    })
}

fn system_prompt(target_lang: &str) -> String {
    format!(
        "You are a product keyword extractor and normalizer. \
         Always respond in ENGLISH ({}), even if the input is in another language. \
         Return ONLY valid JSON following the provided schema. \
         Rules: keep keyphrases short (1-4 words), specific, non-redundant; no SKUs/IDs; \
         no invented attributes; avoid brand names unless clearly part of the product name; \
         use neutral consumer terminology.",
        target_lang
    )
}

/// Extracts keywords and a summary from a product description.
#[derive(Clone)]
pub struct Extractor {
    provider: Arc<dyn Provider>,
    model: String,
    target_lang: String,
    retry: RetryPolicy,
}

impl Extractor {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: &str,
        target_lang: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            model: resolve_chat_model(model).to_string(),
            target_lang: target_lang.into(),
            retry,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, text: &str) -> ChatRequest {
        ChatRequest::new(
            &self.model,
            vec![
                Message::system(system_prompt(&self.target_lang)),
                Message::user(format!(
                    "Product text:\n{}\n\nExtract the required fields in English.",
                    text
                )),
            ],
        )
        .with_temperature(0.0)
        .with_response_format(ResponseFormat::strict_schema(
            SCHEMA_NAME,
            product_keywords_schema(),
        ))
    }

    /// Runs one extraction under the retry policy.
    pub async fn extract(&self, text: &str) -> Result<ExtractedFields> {
        let request = self.request(text);
        let response = self
            .retry
            .run("extraction", || self.provider.chat(request.clone()))
            .await?;

        let content = response.message.text();
        if content.trim().is_empty() {
            return Err(EnrichError::EmptyResponse);
        }
        let raw: RawFields = serde_json::from_str(content)?;
        let fields = ExtractedFields::from(raw);
        debug!(
            "Extracted {} keyphrases, {} topics",
            fields.keyphrases.len(),
            fields.topics.len()
        );
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, EmbedRequest, ProviderError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers every chat with a fixed content and records the requests.
    struct ScriptedProvider {
        content: String,
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(&self, request: ChatRequest) -> crate::provider::Result<ChatResponse> {
            let model = request.model.clone();
            self.seen.lock().unwrap().push(request);
            Ok(ChatResponse {
                model,
                message: Message::assistant(self.content.clone()),
                finish_reason: Some("stop".to_string()),
            })
        }

        async fn embed(&self, _request: EmbedRequest) -> crate::provider::Result<Vec<Vec<f32>>> {
            Err(ProviderError::Other("not used".to_string()))
        }
    }

    fn scripted(content: &str) -> (Arc<ScriptedProvider>, Extractor) {
        let provider = Arc::new(ScriptedProvider {
            content: content.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let extractor = Extractor::new(provider.clone(), "gpt-4o-mini", "en", RetryPolicy::none());
        (provider, extractor)
    }

    #[tokio::test]
    async fn test_extract_cleans_lists() {
        let (provider, extractor) = scripted(
            r#"{"keyphrases": ["Cat  Lover!", "cat lover", "x", "wall calendar"],
                "topics": ["Cats"], "attributes": [], "occasions": ["Birthday."],
                "audience": [], "negatives": [], "canonical_summary_en": " A cat calendar. "}"#,
        );
        let fields = extractor.extract("Calendario gatti").await.unwrap();
        assert_eq!(fields.keyphrases, vec!["cat lover", "wall calendar"]);
        assert_eq!(fields.topics, vec!["cats"]);
        assert_eq!(fields.occasions, vec!["birthday"]);
        assert_eq!(fields.summary, "A cat calendar.");

        let seen = provider.seen.lock().unwrap();
        let request = &seen[0];
        assert_eq!(request.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(request.temperature, 0.0);
        assert!(request.messages[0].text().contains("ENGLISH (en)"));
        assert!(request.messages[1].text().starts_with("Product text:\nCalendario gatti"));
        match &request.response_format {
            Some(ResponseFormat::JsonSchema { json_schema }) => {
                assert_eq!(json_schema.name, SCHEMA_NAME);
                assert!(json_schema.strict);
            }
            other => panic!("unexpected response format: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_error() {
        let (_, extractor) = scripted("not json");
        let err = extractor.extract("text").await.unwrap_err();
        assert!(matches!(err, EnrichError::Json(_)));
        assert!(err.annotation().starts_with("JSONDecodeError: "));

        let (_, extractor) = scripted("");
        assert!(matches!(
            extractor.extract("text").await,
            Err(EnrichError::EmptyResponse)
        ));
    }

    #[test]
    fn test_schema_requires_every_field() {
        let schema = product_keywords_schema();
        assert_eq!(schema["required"].as_array().unwrap().len(), 7);
        assert_eq!(schema["additionalProperties"], false);
    }
}
