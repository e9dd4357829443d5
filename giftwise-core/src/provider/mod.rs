//! LLM provider abstraction layer.
//!
//! A common interface for chat completions and embeddings, with an
//! OpenAI-compatible HTTP implementation and a shared retry policy.

mod types;
pub mod openai;
pub mod retry;

// Re-export common types
pub use types::{
    ChatRequest,
    ChatResponse,
    EmbedRequest,
    JsonSchemaFormat,
    Message,
    Provider,
    ProviderError,
    ResponseFormat,
    Result,
    Tool,
    ToolCall,
    ToolCallFunction,
    ToolFunction,
};

pub use openai::OpenAiProvider;
pub use retry::RetryPolicy;
