use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::tool::{ArgSpec, ArgType, Plugin, ToolDef, ToolHandler};

/// A user-authored plugin: a TOML manifest whose tools are backed by
/// subprocess commands with `{placeholder}` argument substitution.
///
/// ```toml
/// name = "weather"
/// description = "Current weather lookups"
///
/// [tools.lookup]
/// description = "Fetch the current weather for a city"
/// command = "curl"
/// args = ["-s", "https://wttr.in/{city}?format=3"]
///
/// [[tools.lookup.arguments]]
/// name = "city"
/// type = "string"
/// ```
///
/// Tools are trusted: the command runs with the daemon's privileges.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomPluginManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tools: BTreeMap<String, CommandToolDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandToolDef {
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<ArgSpec>,
}

impl CustomPluginManifest {
    pub fn from_toml(raw: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(raw).context("parse plugin manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("plugin name must not be empty");
        }
        if self.tools.is_empty() {
            bail!("plugin \"{}\" declares no tools", self.name);
        }
        for (tool_name, tool) in &self.tools {
            if tool.command.trim().is_empty() {
                bail!("tool \"{}.{}\" has an empty command", self.name, tool_name);
            }
        }
        Ok(())
    }

    /// Materialize the manifest into a live plugin with command-backed
    /// handlers.
    pub fn into_plugin(self) -> Plugin {
        let mut plugin = Plugin::new(self.name, self.description);
        for (tool_name, def) in self.tools {
            let handler = command_handler(def.command.clone(), def.args.clone(), def.arguments.clone());
            plugin = plugin.with_tool(
                tool_name,
                ToolDef::new(def.description, def.arguments, handler),
            );
        }
        plugin
    }
}

fn command_handler(command: String, template: Vec<String>, specs: Vec<ArgSpec>) -> ToolHandler {
    Arc::new(move |call_args, _ctx| {
        let command = command.clone();
        let template = template.clone();
        let specs = specs.clone();
        Box::pin(async move {
            let rendered = render_args(&template, &specs, &call_args)?;
            let output = tokio::process::Command::new(&command)
                .args(&rendered)
                .output()
                .await
                .with_context(|| format!("spawn `{command}`"))?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!("`{command}` exited with {}: {}", output.status, stderr.trim());
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(serde_json::Value::String(stdout.trim_end().to_string()))
        })
    })
}

/// Substitute `{name}` placeholders in the arg template with the positional
/// call values, matched to the declared argument order.
fn render_args(
    template: &[String],
    specs: &[ArgSpec],
    call_args: &[serde_json::Value],
) -> Result<Vec<String>> {
    let mut values = Vec::with_capacity(specs.len());
    for (index, spec) in specs.iter().enumerate() {
        match call_args.get(index) {
            Some(value) => values.push((spec.name.as_str(), value_to_string(value))),
            None if spec.required => bail!("missing required argument \"{}\"", spec.name),
            None => values.push((spec.name.as_str(), String::new())),
        }
    }

    Ok(template
        .iter()
        .map(|part| {
            let mut rendered = part.clone();
            for (name, value) in &values {
                rendered = rendered.replace(&format!("{{{name}}}"), value);
            }
            rendered
        })
        .collect())
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Load every `*.toml` manifest in `dir`.  Each file is independent: a parse
/// or validation error is logged and that file skipped; it never aborts the
/// load of the remaining files.
pub fn load_custom_dir(dir: &Path) -> Vec<Plugin> {
    let mut files = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect::<Vec<_>>(),
        Err(err) => {
            warn!(dir = %dir.display(), ?err, "custom plugin directory unreadable");
            return Vec::new();
        }
    };
    files.sort();

    let mut plugins = Vec::new();
    for path in files {
        let loaded = std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| CustomPluginManifest::from_toml(&raw));
        match loaded {
            Ok(manifest) => {
                info!(plugin = %manifest.name, file = %path.display(), "loaded custom plugin");
                plugins.push(manifest.into_plugin());
            }
            Err(err) => {
                warn!(file = %path.display(), %err, "skipping broken custom plugin");
            }
        }
    }
    plugins
}

// ── Tests ────────────────────────────────────────────────────────────────────
