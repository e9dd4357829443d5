//! Incremental upsert of enriched products.
//!
//! A product is written only when its fingerprint differs from the one
//! stored under its code (or when forced). Changed products reuse an
//! embedding they already carry; the rest are embedded in batches.

use super::embedder::Embedder;
use super::fingerprint::fingerprint;
use super::store::ProductStore;
use super::types::{LoadReport, StoredRecord, VectorRecord};
use super::Result;
use crate::catalog::text::join_non_empty;
use crate::catalog::{KeyField, Product};
use crate::config::Config;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Knobs of a single load run.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub key_field: KeyField,
    /// Restricts the run to these codes.
    pub keys: Option<Vec<String>>,
    /// Rewrite products even when their fingerprint is unchanged.
    pub force: bool,
    pub skip_unchanged: bool,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Products per store write.
    pub write_batch: usize,
}

impl LoadOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            key_field: config.sync.key_field,
            keys: None,
            force: false,
            skip_unchanged: config.sync.skip_unchanged,
            batch_size: config.embedding.batch_size,
            write_batch: config.storage.write_batch,
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Text embedded for a product: its canonical text, else the basic fields.
pub fn embedding_text(product: &Product) -> String {
    let canonical = product.canonical_text.trim();
    if !canonical.is_empty() {
        return canonical.to_string();
    }
    join_non_empty([
        product.title.trim(),
        product.brand.trim(),
        product.category.trim(),
        product.description.trim(),
    ])
}

struct Pending {
    code: String,
    product: Product,
    content_hash: String,
    embedding: Option<Vec<f32>>,
}

pub struct Synchronizer {
    embedder: Embedder,
    store: Arc<dyn ProductStore>,
}

impl Synchronizer {
    pub fn new(embedder: Embedder, store: Arc<dyn ProductStore>) -> Self {
        Self { embedder, store }
    }

    /// Loads `products` into the store and reports what happened.
    pub async fn load(&self, products: Vec<Product>, options: &LoadOptions) -> Result<LoadReport> {
        let mut report = LoadReport {
            read: products.len(),
            ..LoadReport::default()
        };

        let selected: Vec<Product> = match &options.keys {
            Some(keys) => {
                let wanted: HashSet<&str> = keys.iter().map(|k| k.trim()).collect();
                products
                    .into_iter()
                    .filter(|p| {
                        p.code(options.key_field)
                            .is_some_and(|code| wanted.contains(code))
                    })
                    .collect()
            }
            None => products,
        };
        report.selected = selected.len();
        if selected.is_empty() {
            info!("No products selected, nothing to load");
            return Ok(report);
        }

        self.store.ensure_index().await?;

        let model = self.embedder.model().clone();
        let mut keyed = Vec::with_capacity(selected.len());
        for product in selected {
            match product.code(options.key_field).map(str::to_string) {
                Some(code) => {
                    let hash = fingerprint(&product, &model.name, model.dimensions);
                    keyed.push((code, product, hash));
                }
                None => {
                    warn!(title = %product.title, "Skipping product without {}", options.key_field);
                    report.skipped_no_code += 1;
                }
            }
        }

        let codes: Vec<String> = keyed.iter().map(|(code, _, _)| code.clone()).collect();
        let stored = if options.skip_unchanged && !options.force {
            self.store.fingerprints(&codes).await?
        } else {
            vec![None; codes.len()]
        };

        let mut pending = Vec::new();
        for ((code, product, content_hash), previous) in keyed.into_iter().zip(stored) {
            if previous.as_deref() == Some(content_hash.as_str()) {
                debug!(code = %code, "Unchanged, skipping");
                report.unchanged += 1;
                continue;
            }
            let embedding = product
                .embedding_with_dim(model.dimensions)
                .map(<[f32]>::to_vec);
            if embedding.is_some() {
                report.reused_embeddings += 1;
            }
            pending.push(Pending {
                code,
                product,
                content_hash,
                embedding,
            });
        }

        info!(
            "{} to write, {} unchanged, {} without code",
            pending.len(),
            report.unchanged,
            report.skipped_no_code
        );
        if pending.is_empty() {
            return Ok(report);
        }

        self.embed_missing(&mut pending, options.batch_size.max(1), &mut report)
            .await?;
        self.write(pending, options.write_batch.max(1), &mut report)
            .await?;

        info!(
            "Load complete: {} upserted, {} embedded, {} reused, {} degraded",
            report.upserted, report.embedded, report.reused_embeddings, report.degraded
        );
        Ok(report)
    }

    async fn embed_missing(
        &self,
        pending: &mut [Pending],
        batch_size: usize,
        report: &mut LoadReport,
    ) -> Result<()> {
        let queue: Vec<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        let total = queue.len();

        for (batch_no, chunk) in queue.chunks(batch_size).enumerate() {
            let texts: Vec<String> = chunk.iter().map(|&i| embedding_text(&pending[i].product)).collect();
            let labels: Vec<String> = chunk.iter().map(|&i| pending[i].code.clone()).collect();

            let batch = self
                .embedder
                .embed_batch_with_fallback(&texts, &labels)
                .await?;
            report.embedded += batch.vectors.len() - batch.degraded;
            report.degraded += batch.degraded;
            for (&i, vector) in chunk.iter().zip(batch.vectors) {
                pending[i].embedding = Some(vector);
            }
            info!(
                batch = batch_no + 1,
                "Embedded {}/{}",
                (batch_no * batch_size + chunk.len()).min(total),
                total
            );
        }
        Ok(())
    }

    async fn write(
        &self,
        pending: Vec<Pending>,
        write_batch: usize,
        report: &mut LoadReport,
    ) -> Result<()> {
        let total = pending.len();
        let mut records = Vec::with_capacity(write_batch);

        for item in pending {
            let payload = item.product.to_payload()?;
            let embedding = item.embedding.unwrap_or_default();
            let vector = VectorRecord::from_product(&item.code, &item.product, item.content_hash, embedding);
            records.push(StoredRecord {
                code: item.code,
                payload,
                vector,
            });

            if records.len() >= write_batch {
                report.upserted += records.len();
                self.store.upsert(std::mem::take(&mut records)).await?;
                info!("Upserted {}/{}", report.upserted, total);
            }
        }
        if !records.is_empty() {
            report.upserted += records.len();
            self.store.upsert(records).await?;
            info!("Upserted {}/{}", report.upserted, total);
        }
        Ok(())
    }
}
