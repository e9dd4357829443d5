//! Catalog tools for the gift-finder agent
//!
//! Provides the plugins the chat model can call:
//! - `search_products`: filtered semantic search, with product details by default
//! - `get_product`: one product document by code or exact title

mod catalog;

pub use catalog::{GetProductPlugin, SearchProductsPlugin};

use giftwise_core::RagEngine;
use giftwise_plugin::PluginRegistry;
use std::sync::Arc;

/// A registry holding every catalog tool over `engine`.
pub fn catalog_registry(engine: Arc<RagEngine>, default_k: usize) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(SearchProductsPlugin::new(engine.clone(), default_k)));
    registry.register(Arc::new(GetProductPlugin::new(engine)));
    registry
}
