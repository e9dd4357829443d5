//! Tool-augmented conversation loop of the gift-finder agent.
//!
//! # Tool Calling Flow
//!
//! ```text
//! User turn → LLM → Tool calls?
//!               ↓         ↓
//!           Answer    Execute each tool
//!                         ↓
//!                  LLM with results → ...
//! ```
//!
//! Every request carries the system prompt followed by the whole session
//! history. A turn is bounded by `max_tool_rounds` model requests that ask
//! for tools; past that the turn fails and the history is rolled back.

use super::session::Session;
use crate::config::{AgentConfig, Config};
use crate::models::resolve_chat_model;
use crate::provider::{ChatRequest, Message, Provider, RetryPolicy, Tool, ToolCall};
use anyhow::{bail, Context, Result};
use giftwise_plugin::PluginRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ChatManager {
    config: AgentConfig,
    provider: Arc<dyn Provider>,
    registry: Arc<PluginRegistry>,
    retry: RetryPolicy,
    session: Session,
}

impl ChatManager {
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn Provider>,
        registry: Arc<PluginRegistry>,
        session: Session,
    ) -> Self {
        Self {
            config,
            provider,
            registry,
            retry: RetryPolicy::none(),
            session,
        }
    }

    /// Builds a manager from the full configuration, restoring the session
    /// from `agent.session_path` when one is set.
    pub fn from_config(config: &Config, provider: Arc<dyn Provider>, registry: Arc<PluginRegistry>) -> Self {
        let session = match &config.agent.session_path {
            Some(path) => Session::load(path),
            None => Session::in_memory(),
        };
        Self::new(config.agent.clone(), provider, registry, session)
            .with_retry(RetryPolicy::from_config(&config.retry))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Clears the conversation and its persisted copy.
    pub fn reset(&mut self) -> Result<()> {
        self.session.reset().context("Failed to reset session")
    }

    /// Runs one user turn and returns the assistant's final answer.
    ///
    /// On failure the session is left as it was before the turn.
    pub async fn ask(&mut self, user_message: &str) -> Result<String> {
        let checkpoint = self.session.messages.len();
        let focus = (self.session.active_code.clone(), self.session.last_search.clone());
        match self.run_turn(user_message).await {
            Ok(answer) => {
                if let Err(e) = self.session.save() {
                    warn!("Failed to save session: {}", e);
                }
                Ok(answer)
            }
            Err(e) => {
                self.session.messages.truncate(checkpoint);
                (self.session.active_code, self.session.last_search) = focus;
                Err(e)
            }
        }
    }

    async fn run_turn(&mut self, user_message: &str) -> Result<String> {
        self.session.messages.push(Message::user(user_message));
        let tools = self.build_tools();
        let model = resolve_chat_model(&self.config.model).to_string();

        for round in 0..=self.config.max_tool_rounds {
            let mut messages = Vec::with_capacity(self.session.messages.len() + 1);
            messages.push(Message::system(&self.config.system_prompt));
            messages.extend(self.session.messages.iter().cloned());

            let mut request =
                ChatRequest::new(&model, messages).with_temperature(self.config.temperature);
            if !tools.is_empty() {
                request = request.with_tools(tools.clone());
            }
            debug!(round, message_count = request.messages.len(), "Sending chat request");

            let response = self
                .retry
                .run("chat", || self.provider.chat(request.clone()))
                .await
                .context("Failed to get LLM response")?;

            let tool_calls = response.message.tool_calls.clone().unwrap_or_default();
            if tool_calls.is_empty() {
                let answer = response.message.text().trim().to_string();
                self.session.messages.push(Message::assistant(&answer));
                return Ok(answer);
            }

            if round == self.config.max_tool_rounds {
                break;
            }
            info!(tool_call_count = tool_calls.len(), "Processing tool calls");
            self.session
                .messages
                .push(Message::assistant_tool_calls(tool_calls.clone()));
            for call in &tool_calls {
                self.dispatch(call).await;
            }
        }

        bail!(
            "Model kept requesting tools after {} rounds",
            self.config.max_tool_rounds
        )
    }

    /// Runs one tool call and appends its result. Tool failures become a
    /// JSON error the model can read.
    async fn dispatch(&mut self, call: &ToolCall) {
        let name = &call.function.name;
        info!(tool_name = %name, "Executing tool");
        let output = self
            .registry
            .execute_or_report(name, call.function.parsed_arguments())
            .await;

        if let Some(metadata) = &output.metadata {
            self.session.apply_tool_metadata(metadata);
        }
        self.session
            .messages
            .push(Message::tool(&call.id, name, output.content));
    }

    fn build_tools(&self) -> Vec<Tool> {
        self.registry
            .specs()
            .into_iter()
            .map(|spec| Tool::function(spec.name, spec.description, spec.parameters))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, EmbedRequest, ProviderError, ToolCallFunction};
    use async_trait::async_trait;
    use giftwise_plugin::{Plugin, PluginOutput};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Replays queued assistant messages and records each request.
    #[derive(Default)]
    struct ScriptedChat {
        replies: Mutex<VecDeque<Message>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChat {
        fn new(replies: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedChat {
        async fn chat(&self, request: ChatRequest) -> crate::provider::Result<ChatResponse> {
            let model = request.model.clone();
            self.seen.lock().unwrap().push(request);
            let message = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::Other("script exhausted".to_string()))?;
            Ok(ChatResponse {
                model,
                message,
                finish_reason: None,
            })
        }

        async fn embed(&self, _request: EmbedRequest) -> crate::provider::Result<Vec<Vec<f32>>> {
            Err(ProviderError::Other("not used".to_string()))
        }
    }

    struct FakeSearch;

    #[async_trait]
    impl Plugin for FakeSearch {
        fn name(&self) -> &str {
            "search_products"
        }

        fn description(&self) -> &str {
            "Search the catalog"
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object", "properties": {"query_text": {"type": "string"}}})
        }

        async fn execute(&self, input: Value) -> giftwise_plugin::Result<PluginOutput> {
            let result = json!({"count": 1, "items": [{"code": "A1", "query": input["query_text"]}]});
            Ok(PluginOutput::json(&result)
                .with_metadata(json!({"active_code": "A1", "last_search": result})))
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn manager(provider: Arc<ScriptedChat>, session: Session) -> ChatManager {
        let mut registry = PluginRegistry::new();
        registry.register(Arc::new(FakeSearch));
        ChatManager::new(AgentConfig::default(), provider, Arc::new(registry), session)
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let provider = ScriptedChat::new(vec![
            Message::assistant_tool_calls(vec![call("c1", "search_products", r#"{"query_text":"mug"}"#)]),
            Message::assistant("Try the A1 mug."),
        ]);
        let mut chat = manager(provider.clone(), Session::load(&path));

        let answer = chat.ask("a mug for a cat lover").await.unwrap();
        assert_eq!(answer, "Try the A1 mug.");

        let session = chat.session();
        let roles: Vec<&str> = session.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
        assert_eq!(session.messages[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(session.messages[2].name.as_deref(), Some("search_products"));
        assert_eq!(session.active_code.as_deref(), Some("A1"));
        assert_eq!(session.last_search.as_ref().unwrap()["count"], 1);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].messages[0].is_system());
        assert_eq!(seen[0].tools.as_ref().unwrap()[0].function.name, "search_products");
        assert_eq!(seen[0].temperature, 0.3);
        assert_eq!(seen[1].messages.len(), 4);

        assert_eq!(Session::load(&path).messages.len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_answered_with_error() {
        let provider = ScriptedChat::new(vec![
            Message::assistant_tool_calls(vec![call("c1", "order_pizza", "{}")]),
            Message::assistant("I can't do that."),
        ]);
        let mut chat = manager(provider, Session::in_memory());

        chat.ask("order a pizza").await.unwrap();
        let tool_msg = &chat.session().messages[2];
        let payload: Value = serde_json::from_str(tool_msg.text()).unwrap();
        assert_eq!(payload["error"], "Unknown tool: order_pizza");
    }

    #[tokio::test]
    async fn test_round_limit_rolls_back() {
        let looping: Vec<Message> = (0..4)
            .map(|i| {
                Message::assistant_tool_calls(vec![call(&format!("c{}", i), "search_products", "{}")])
            })
            .collect();
        let provider = ScriptedChat::new(looping);
        let mut chat = manager(provider.clone(), Session::in_memory());
        chat.config.max_tool_rounds = 2;

        let err = chat.ask("loop forever").await.unwrap_err();
        assert!(err.to_string().contains("2 rounds"));
        assert!(chat.session().messages.is_empty());
        assert_eq!(provider.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_turn_restores_focus() {
        let provider = ScriptedChat::new(vec![Message::assistant_tool_calls(vec![call(
            "c1",
            "search_products",
            r#"{"query_text":"mug"}"#,
        )])]);
        let mut chat = manager(provider, Session::in_memory());
        chat.session.active_code = Some("OLD".to_string());

        // the tool runs, then the script runs dry on the follow-up request
        assert!(chat.ask("a mug").await.is_err());
        assert_eq!(chat.session().active_code.as_deref(), Some("OLD"));
        assert!(chat.session().last_search.is_none());
        assert!(chat.session().messages.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_previous_history() {
        let provider = ScriptedChat::new(vec![Message::assistant("Hello!")]);
        let mut chat = manager(provider, Session::in_memory());

        chat.ask("hi").await.unwrap();
        assert!(chat.ask("again").await.is_err());
        assert_eq!(chat.session().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_reset() {
        let provider = ScriptedChat::new(vec![Message::assistant("Hello!")]);
        let mut chat = manager(provider, Session::in_memory());
        chat.ask("hi").await.unwrap();

        chat.reset().unwrap();
        assert!(chat.session().messages.is_empty());
        assert!(chat.session().active_code.is_none());
    }
}
