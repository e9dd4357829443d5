//! Concurrent enrichment of a product list.

use super::canonical::{build_product_text, canonical_text, rescore_base_text};
use super::extractor::Extractor;
use super::rescore::rescore;
use super::Result;
use crate::catalog::{JsonlWriter, Product};
use crate::config::Config;
use crate::provider::{Provider, RetryPolicy};
use crate::rag::Embedder;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub top_k: usize,
    pub min_similarity: f32,
    pub include_embedding: bool,
    /// Products in flight at once.
    pub concurrency: usize,
}

impl From<&Config> for EnrichOptions {
    fn from(config: &Config) -> Self {
        Self {
            top_k: config.enrich.top_k,
            min_similarity: config.enrich.min_similarity,
            include_embedding: config.enrich.include_embedding,
            concurrency: config.enrich.concurrency,
        }
    }
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Outcome counters of an enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub total: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Enricher {
    extractor: Extractor,
    embedder: Embedder,
    options: EnrichOptions,
}

impl Enricher {
    pub fn new(extractor: Extractor, embedder: Embedder, options: EnrichOptions) -> Self {
        Self {
            extractor,
            embedder,
            options,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &Config) -> Self {
        let extractor = Extractor::new(
            provider.clone(),
            &config.llm.model,
            config.enrich.target_lang.clone(),
            RetryPolicy::from_config(&config.retry),
        );
        let embedder = Embedder::from_config(provider, config);
        Self::new(extractor, embedder, EnrichOptions::from(config))
    }

    pub fn options(&self) -> &EnrichOptions {
        &self.options
    }

    /// Enriches one product, returning the input plus the extracted fields.
    pub async fn enrich_product(&self, product: &Product) -> Result<Product> {
        let text = build_product_text(product);
        let fields = self.extractor.extract(&text).await?;

        let base = rescore_base_text(product);
        let keywords = rescore(
            &self.embedder,
            &base,
            &fields.keyphrases,
            self.options.top_k,
            self.options.min_similarity,
        )
        .await?;
        let canonical = canonical_text(&fields.summary, &keywords, &fields.topics, &fields.attributes);

        let mut enriched = product.clone();
        enriched.keywords = keywords;
        enriched.topics = fields.topics;
        enriched.attributes_extracted = fields.attributes;
        enriched.occasions = fields.occasions;
        enriched.audience = fields.audience;
        enriched.negatives = fields.negatives;
        enriched.embedding_model = Some(self.embedder.model().name.clone());
        enriched.embedding_dimensions = Some(self.embedder.dimensions());
        enriched.error = None;

        if self.options.include_embedding {
            enriched.embedding = Some(self.embedder.embed(&canonical).await?);
        }
        enriched.canonical_text = canonical;
        Ok(enriched)
    }

    /// Like [`enrich_product`](Self::enrich_product), but a failure is
    /// recorded on the returned record as `_error`.
    pub async fn enrich_or_annotate(&self, product: Product) -> Product {
        match self.enrich_product(&product).await {
            Ok(enriched) => enriched,
            Err(e) => {
                warn!(code = %product.id, "Enrichment failed: {}", e);
                Product {
                    error: Some(e.annotation()),
                    ..product
                }
            }
        }
    }

    /// Enriches concurrently, appending each record to `writer` as it completes.
    pub async fn enrich_to_jsonl(
        &self,
        products: Vec<Product>,
        writer: &mut JsonlWriter,
    ) -> Result<EnrichSummary> {
        let total = products.len();
        let mut summary = EnrichSummary {
            total,
            ..EnrichSummary::default()
        };

        let mut results = stream::iter(products)
            .map(|p| self.enrich_or_annotate(p))
            .buffer_unordered(self.options.concurrency.max(1));

        let mut completed = 0;
        while let Some(product) = results.next().await {
            if product.error.is_some() {
                summary.failed += 1;
            }
            writer.write(&product).await?;
            completed += 1;
            if completed % PROGRESS_EVERY == 0 {
                info!("Enriched {}/{}", completed, total);
            }
        }
        Ok(summary)
    }

    /// Enriches concurrently and returns the records in input order.
    pub async fn enrich_ordered(&self, products: Vec<Product>) -> (Vec<Product>, EnrichSummary) {
        let total = products.len();
        let mut slots: Vec<Option<Product>> = vec![None; total];

        let mut results = stream::iter(products.into_iter().enumerate())
            .map(|(i, p)| async move { (i, self.enrich_or_annotate(p).await) })
            .buffer_unordered(self.options.concurrency.max(1));

        let mut completed = 0;
        while let Some((i, product)) = results.next().await {
            slots[i] = Some(product);
            completed += 1;
            if completed % PROGRESS_EVERY == 0 {
                info!("Enriched {}/{}", completed, total);
            }
        }

        let products: Vec<Product> = slots.into_iter().flatten().collect();
        let summary = EnrichSummary {
            total,
            failed: products.iter().filter(|p| p.error.is_some()).count(),
        };
        (products, summary)
    }
}
