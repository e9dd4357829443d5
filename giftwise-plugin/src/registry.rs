use crate::{Plugin, PluginError, PluginOutput};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tool definition handed to the chat model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Registry for managing plugins.
///
/// Plugins are kept sorted by name so tool definitions are sent to the model
/// in a stable order.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin, replacing any plugin with the same name.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Execute a plugin by name.
    pub async fn execute(&self, name: &str, input: Value) -> Result<PluginOutput, PluginError> {
        let plugin = self
            .get(name)
            .ok_or_else(|| PluginError::UnknownTool(name.to_string()))?;

        plugin.execute(input).await
    }

    /// Executes a plugin and folds any failure into a JSON error payload.
    ///
    /// The model always gets an answer for each tool call it made, so one
    /// failing tool never aborts the conversation turn.
    pub async fn execute_or_report(&self, name: &str, input: Value) -> PluginOutput {
        match self.execute(name, input).await {
            Ok(output) => output,
            Err(e) => PluginOutput::json(&json!({ "error": e.to_string() })),
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.plugins
            .values()
            .map(|plugin| ToolSpec {
                name: plugin.name().to_string(),
                description: plugin.description().to_string(),
                parameters: plugin.parameter_schema(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoPlugin;

    #[async_trait]
    impl Plugin for EchoPlugin {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its input"
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, input: Value) -> crate::Result<PluginOutput> {
            let text = input
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| PluginError::InvalidInput("missing text".to_string()))?;
            Ok(PluginOutput::new(text).with_metadata(json!({"seen": text})))
        }
    }

    #[test]
    fn test_register_and_specs() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(EchoPlugin));

        assert!(registry.get("echo").is_some());
        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[0].parameters["type"], "object");
    }

    #[tokio::test]
    async fn test_execute_returns_metadata() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(EchoPlugin));

        let output = registry.execute("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(output.content, "hi");
        assert_eq!(output.metadata_str("seen"), Some("hi"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_as_json() {
        let registry = PluginRegistry::new();
        let output = registry.execute_or_report("missing", json!({})).await;
        let value: Value = serde_json::from_str(&output.content).unwrap();
        assert_eq!(value["error"], "Unknown tool: missing");
    }

    #[tokio::test]
    async fn test_invalid_input_is_reported_as_json() {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(EchoPlugin));
        let output = registry.execute_or_report("echo", json!({})).await;
        assert!(output.content.contains("Invalid input"));
    }
}
