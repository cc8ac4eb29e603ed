use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use parley_events::EventBus;
use parley_llm::ChatProvider;

// ── Argument schema ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    #[default]
    String,
    Number,
    Boolean,
}

impl ArgType {
    pub fn label(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
        }
    }
}

/// Describes one positional argument a tool accepts.  Arguments are passed by
/// position in the model's `args` array, in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub arg_type: ArgType,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl ArgSpec {
    pub fn required(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self { name: name.into(), arg_type, required: true }
    }

    pub fn optional(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self { name: name.into(), arg_type, required: false }
    }
}

// ── Tools and plugins ────────────────────────────────────────────────────────

/// The callable behind a tool.  Receives the model-supplied positional args
/// and the host context; any error it returns is folded into the conversation
/// as an `{id, error}` result rather than aborting the round.
pub type ToolHandler =
    Arc<dyn Fn(Vec<serde_json::Value>, ToolContext) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

#[derive(Clone)]
pub struct ToolDef {
    pub description: String,
    pub arguments: Vec<ArgSpec>,
    pub handler: ToolHandler,
}

impl ToolDef {
    pub fn new(
        description: impl Into<String>,
        arguments: Vec<ArgSpec>,
        handler: ToolHandler,
    ) -> Self {
        Self { description: description.into(), arguments, handler }
    }
}

/// One-time setup hook, run exactly once when the plugin is loaded.
pub type InitFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// A bundle of related tools plus metadata.  `tools` is ordered so prompt
/// rendering and registry iteration are deterministic.
#[derive(Clone)]
pub struct Plugin {
    pub name: String,
    pub description: String,
    pub tools: BTreeMap<String, ToolDef>,
    pub init: Option<InitFn>,
}

impl Plugin {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tools: BTreeMap::new(),
            init: None,
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, tool: ToolDef) -> Self {
        self.tools.insert(name.into(), tool);
        self
    }

    pub fn with_init(mut self, init: InitFn) -> Self {
        self.init = Some(init);
        self
    }
}

// ── Invoke bridge handle ─────────────────────────────────────────────────────

/// A task synthesized by a non-human actor (fired timer, plugin), to be
/// driven through the orchestrator as a single system-originated turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub task: String,
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Cloneable sender half of the invoke bridge.  Tools never call the
/// orchestrator directly; they enqueue here and the host's invoke worker
/// performs exactly one bounded orchestrator run per request.
#[derive(Debug, Clone)]
pub struct Invoker {
    tx: mpsc::UnboundedSender<InvokeRequest>,
}

impl Invoker {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InvokeRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn invoke(&self, task: impl Into<String>, context: serde_json::Value) -> Result<()> {
        self.tx
            .send(InvokeRequest { task: task.into(), context })
            .context("invoke worker is gone")
    }
}

// ── Execution context ────────────────────────────────────────────────────────

/// Handles a tool may need while running.  Cheap to clone; handed to every
/// handler invocation by the orchestrator.
#[derive(Clone)]
pub struct ToolContext {
    pub bus: Arc<EventBus>,
    pub provider: Arc<dyn ChatProvider>,
    pub plugins: Arc<crate::PluginHost>,
    pub invoker: Invoker,
}

// ── Tests ────────────────────────────────────────────────────────────────────
