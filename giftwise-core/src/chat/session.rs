//! Conversation state of the gift-finder agent.

use crate::fs_util::write_atomic;
use crate::provider::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// On-disk form: the history without the system prompt.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    messages: Vec<Message>,
}

/// Message history plus what the agent is currently focused on.
///
/// With a path, the history is written back atomically by [`save`](Self::save).
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub messages: Vec<Message>,
    /// Result of the most recent product search.
    pub last_search: Option<Value>,
    /// Code of the product the conversation is about.
    pub active_code: Option<String>,
    path: Option<PathBuf>,
}

impl Session {
    /// A session that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Restores the history stored at `path`.
    ///
    /// A missing file starts an empty session. A file that cannot be read
    /// or parsed is ignored with a warning.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut session = Self {
            path: Some(path.clone()),
            ..Self::default()
        };
        if !path.exists() {
            return session;
        }

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<SessionFile>(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(file) => {
                session.messages = file.messages.into_iter().filter(|m| !m.is_system()).collect();
                debug!("Restored {} messages from {}", session.messages.len(), path.display());
            }
            Err(e) => warn!("Ignoring unreadable session file {}: {}", path.display(), e),
        }
        session
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes the history (system messages excluded) if the session has a path.
    pub fn save(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = SessionFile {
            messages: self.messages.iter().filter(|m| !m.is_system()).cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(path, &bytes)
    }

    /// Forgets the conversation and persists the empty history.
    pub fn reset(&mut self) -> io::Result<()> {
        self.messages.clear();
        self.last_search = None;
        self.active_code = None;
        self.save()
    }

    /// Updates focus from a tool's metadata (`active_code`, `last_search`).
    pub fn apply_tool_metadata(&mut self, metadata: &Value) {
        if let Some(search) = metadata.get("last_search") {
            self.last_search = Some(search.clone());
        }
        if let Some(code) = metadata.get("active_code").and_then(Value::as_str) {
            self.active_code = Some(code.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_skip_system() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut session = Session::load(&path);
        assert!(session.messages.is_empty());
        session.messages = vec![
            Message::system("prompt"),
            Message::user("a gift for my sister"),
            Message::assistant("How about a notebook?"),
        ];
        session.save().unwrap();
        assert!(!dir.path().join("session.json.tmp").exists());

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["messages"].as_array().unwrap().len(), 2);

        let restored = Session::load(&path);
        assert_eq!(restored.messages.len(), 2);
        assert_eq!(restored.messages[0].text(), "a gift for my sister");
    }

    #[test]
    fn test_malformed_file_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();

        let session = Session::load(&path);
        assert!(session.messages.is_empty());
        assert_eq!(session.path(), Some(path.as_path()));
    }

    #[test]
    fn test_reset_persists_empty_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = Session::load(&path);
        session.messages.push(Message::user("hi"));
        session.active_code = Some("A".to_string());
        session.save().unwrap();

        session.reset().unwrap();
        assert!(session.active_code.is_none());
        assert!(Session::load(&path).messages.is_empty());
    }

    #[test]
    fn test_tool_metadata() {
        let mut session = Session::in_memory();
        session.apply_tool_metadata(&json!({"active_code": "A", "last_search": {"count": 1}}));
        assert_eq!(session.active_code.as_deref(), Some("A"));
        assert_eq!(session.last_search, Some(json!({"count": 1})));

        session.apply_tool_metadata(&json!({"active_code": "B"}));
        assert_eq!(session.active_code.as_deref(), Some("B"));
        assert!(session.last_search.is_some());
        // in-memory sessions save nowhere
        assert!(session.save().is_ok());
    }
}
