//! OpenAI-compatible HTTP provider.
//!
//! Talks to `/chat/completions` and `/embeddings` on any endpoint that
//! speaks the OpenAI wire format.

use super::types::*;
use crate::config::LlmConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    base_url: String,
    http_client: reqwest::Client,
}

impl OpenAiProvider {
    /// Builds a client with the configured base URL, key and timeout.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            let auth = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ProviderError::Other(format!("invalid API key header: {}", e)))?;
            headers.insert(AUTHORIZATION, auth);
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.http_client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let completion: CompletionResponse = self.post_json("chat/completions", &request).await?;
        completion.into_chat_response(&request.model)
    }

    async fn embed(&self, request: EmbedRequest) -> Result<Vec<Vec<f32>>> {
        if request.input.is_empty() {
            return Ok(Vec::new());
        }
        let response: EmbeddingResponse = self.post_json("embeddings", &request).await?;
        response.into_vectors(request.input.len())
    }
}

// Wire types for the OpenAI response bodies (internal)

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Message,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl CompletionResponse {
    fn into_chat_response(self, requested_model: &str) -> Result<ChatResponse> {
        let model = self.model.unwrap_or_else(|| requested_model.to_string());
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Other("completion returned no choices".to_string()))?;
        Ok(ChatResponse {
            model,
            message: choice.message,
            finish_reason: choice.finish_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl EmbeddingResponse {
    fn into_vectors(mut self, expected: usize) -> Result<Vec<Vec<f32>>> {
        self.data.sort_by_key(|entry| entry.index);
        if self.data.len() != expected {
            return Err(ProviderError::Other(format!(
                "embedding service returned {} vectors for {} inputs",
                self.data.len(),
                expected
            )));
        }
        Ok(self.data.into_iter().map(|entry| entry.embedding).collect())
    }
}
