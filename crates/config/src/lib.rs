use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Display name the assistant answers to; rendered into the system prompt.
    pub name: String,
    pub user_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Parley".to_string(),
            user_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Active model in `provider:model` form, e.g. `ollama:llama3.1:8b` or
    /// `openai:gpt-4o-mini`.  Everything before the first `:` is the provider.
    pub model: String,
    /// Base URL for the Ollama API.  Overridden at runtime by the
    /// `OLLAMA_BASE_URL` environment variable when set.
    pub ollama_base_url: String,
    pub openai_base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "ollama:llama3.1:8b".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path of the listening unix socket.  Empty means the well-known
    /// per-host default under the OS temp directory.
    pub socket_path: String,
    /// Interfaces the daemon hosts alongside the IPC server.  Only flags are
    /// tracked here; the front-ends themselves live outside the core.
    pub discord_token: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: String::new(),
            discord_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub daemon: DaemonConfig,
}

impl AppConfig {
    /// Load from the default location (`~/.parley/config.toml`), falling back
    /// to defaults when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(paths::config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(paths::config_path())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self).context("serialize config")?;
        fs::write(path, raw).with_context(|| format!("write config {}", path.display()))?;
        Ok(())
    }

    /// `(provider, model)` split of `llm.model` on the first `:`.  A bare
    /// model name with no provider prefix defaults to `ollama`.
    pub fn active_model(&self) -> (&str, &str) {
        match self.llm.model.split_once(':') {
            Some((provider, model)) if !model.is_empty() => (provider, model),
            _ => ("ollama", self.llm.model.as_str()),
        }
    }

    /// Resolved socket path: explicit config value, or the per-host default.
    pub fn socket_path(&self) -> PathBuf {
        if self.daemon.socket_path.is_empty() {
            env::temp_dir().join("parley-daemon.sock")
        } else {
            PathBuf::from(&self.daemon.socket_path)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
