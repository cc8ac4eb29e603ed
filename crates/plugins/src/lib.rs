//! Plugin manager and tool registry.
//!
//! A plugin is a named bundle of tools.  Built-in plugins are native Rust,
//! loaded once at process start; user-authored plugins are declarative TOML
//! manifests in a writable directory, loaded per file and hot-reloadable as
//! one atomic swap.  The registry flattens the active plugin set into an
//! `id → descriptor` map keyed `<plugin>.<tool>`, rebuilt from scratch for
//! every orchestrator invocation so edits are visible without a restart.

pub mod builtins;
mod host;
mod manifest;
mod registry;
mod tool;

pub use host::PluginHost;
pub use manifest::{CustomPluginManifest, load_custom_dir};
pub use registry::{ToolDescriptor, build_registry};
pub use tool::{
    ArgSpec, ArgType, InitFn, InvokeRequest, Invoker, Plugin, ToolContext, ToolDef, ToolHandler,
};
