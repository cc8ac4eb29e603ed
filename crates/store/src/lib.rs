//! Key-addressed persistent conversation history.
//!
//! One JSON file per conversation key under the data directory.  Stored
//! history holds only user/assistant turns; the system prompt is synthesized
//! per invocation and never persisted.  Loading is best-effort: a missing or
//! corrupt file reads as an empty conversation rather than an error, so a
//! damaged history can never wedge an interface.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use parley_llm::ChatMessage;

/// Stored length above which the oldest turns are dropped...
pub const MAX_HISTORY_LENGTH: usize = 80;
/// ...leaving this many most-recent turns.  The trim is irrecoverable.
pub const TRIMMED_HISTORY_LENGTH: usize = 60;

#[derive(Debug, Clone)]
pub struct ConversationStore {
    root: PathBuf,
}

impl ConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the default `~/.parley/data/conversations/`.
    pub fn default_location() -> Self {
        Self::new(parley_config::paths::conversations_dir())
    }

    fn file_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{safe}.json"))
    }

    pub fn load(&self, key: &str) -> Vec<ChatMessage> {
        let path = self.file_for(key);
        if !path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(key, ?err, "corrupt conversation file; starting fresh");
                    Vec::new()
                }
            },
            Err(err) => {
                warn!(key, ?err, "failed to read conversation file");
                Vec::new()
            }
        }
    }

    pub fn save(&self, key: &str, messages: &[ChatMessage]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("create store root {}", self.root.display()))?;
        let path = self.file_for(key);
        let raw = serde_json::to_string_pretty(messages).context("serialize conversation")?;
        fs::write(&path, raw)
            .with_context(|| format!("write conversation {}", path.display()))?;
        Ok(())
    }

    pub fn clear(&self, key: &str) -> Result<()> {
        let path = self.file_for(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("remove conversation {}", path.display()))?;
        }
        Ok(())
    }
}

/// Apply the retention rule in place: past [`MAX_HISTORY_LENGTH`] entries,
/// drop the oldest so only the last [`TRIMMED_HISTORY_LENGTH`] remain.
pub fn trim_history(messages: &mut Vec<ChatMessage>) {
    if messages.len() > MAX_HISTORY_LENGTH {
        let drop = messages.len() - TRIMMED_HISTORY_LENGTH;
        messages.drain(..drop);
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ConversationStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn load_missing_key_is_empty() {
        let (_dir, store) = store();
        assert!(store.load("nope").is_empty());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let (_dir, store) = store();
        let messages = vec![
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi there"),
        ];
        store.save("daemon-cli", &messages).unwrap();
        assert_eq!(store.load("daemon-cli"), messages);
    }

    #[test]
    fn clear_removes_history() {
        let (_dir, store) = store();
        store.save("gone", &[ChatMessage::user("x")]).unwrap();
        store.clear("gone").unwrap();
        assert!(store.load("gone").is_empty());
    }

    #[test]
    fn clear_missing_key_is_ok() {
        let (_dir, store) = store();
        store.clear("never-existed").unwrap();
    }

    #[test]
    fn keys_are_sanitized_to_safe_filenames() {
        let (dir, store) = store();
        store
            .save("discord-123/../../etc", &[ChatMessage::user("x")])
            .unwrap();
        // Everything lands directly under the root with hostile chars replaced.
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["discord-123_.._.._etc.json".to_string()]);
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let (dir, store) = store();
        fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        assert!(store.load("bad").is_empty());
    }

    #[test]
    fn trim_is_noop_at_or_below_max() {
        let mut messages: Vec<_> = (0..MAX_HISTORY_LENGTH)
            .map(|i| ChatMessage::user(format!("m{i}")))
            .collect();
        trim_history(&mut messages);
        assert_eq!(messages.len(), MAX_HISTORY_LENGTH);
    }

    #[test]
    fn trim_keeps_most_recent_entries() {
        let mut messages: Vec<_> = (0..MAX_HISTORY_LENGTH + 1)
            .map(|i| ChatMessage::user(format!("m{i}")))
            .collect();
        trim_history(&mut messages);
        assert_eq!(messages.len(), TRIMMED_HISTORY_LENGTH);
        assert_eq!(messages[0].content, format!("m{}", MAX_HISTORY_LENGTH + 1 - TRIMMED_HISTORY_LENGTH));
        assert_eq!(
            messages.last().unwrap().content,
            format!("m{}", MAX_HISTORY_LENGTH)
        );
    }
}
