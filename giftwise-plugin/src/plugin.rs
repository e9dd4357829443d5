use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;

/// Output from plugin execution.
///
/// `content` is what the model sees. `metadata` carries structured data the
/// caller may use to update its own state (for example the code of the
/// product the conversation is now about); it is never sent to the model.
#[derive(Debug, Clone)]
pub struct PluginOutput {
    pub content: String,
    pub metadata: Option<Value>,
}

impl PluginOutput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: None,
        }
    }

    /// Serializes `value` as the model-facing content.
    pub fn json(value: &Value) -> Self {
        Self::new(value.to_string())
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Reads a string field out of the metadata, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

impl fmt::Display for PluginOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.content)
    }
}

/// Core trait that all tools implement.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique identifier; this is the function name the LLM calls.
    fn name(&self) -> &str;

    /// Included in the tool definition to help the LLM decide when to call it.
    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameter_schema(&self) -> Value;

    /// Execute with arguments that should match the parameter schema.
    async fn execute(&self, input: Value) -> Result<PluginOutput>;
}
