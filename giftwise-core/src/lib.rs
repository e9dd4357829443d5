//! giftwise-core - catalog pipeline and retrieval engine of the gift finder
//!
//! Provides the building blocks behind the `giftwise` CLI:
//! - Catalog conversion (SFCC XML to JSON)
//! - LLM keyword extraction and embedding re-scoring
//! - Incremental vector loading and filtered KNN search (Redis, Qdrant, local file)
//! - A tool-calling conversational agent with a persisted session
//!
//! ## Primary API
//!
//! Most callers only need [`Config`], a [`Provider`] such as
//! [`OpenAiProvider`], and then [`Enricher`], [`RagEngine`] or [`ChatManager`].

// Public modules
pub mod catalog;
pub mod chat;
pub mod config;
pub mod enrich;
pub mod fs_util;
pub mod models;
pub mod provider;
pub mod rag;

// Public exports
pub use catalog::{KeyField, Product};
pub use chat::{ChatManager, Session};
pub use config::{Config, StorageMode};
pub use enrich::{EnrichOptions, EnrichSummary, Enricher};
pub use rag::{LoadOptions, LoadReport, RagEngine, SearchFilters, SearchRequest, SearchResults};

// Provider exports
pub use provider::{
    ChatRequest, ChatResponse, Message, OpenAiProvider, Provider, ProviderError, RetryPolicy,
    Tool, ToolCall, ToolCallFunction, ToolFunction,
};
