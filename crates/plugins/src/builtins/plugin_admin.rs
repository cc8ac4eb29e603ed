//! Create, list, and delete user-authored plugins at the model's request.
//!
//! `create` asks the model (via a direct provider call, outside the tool
//! loop) to author a declarative TOML manifest, validates it with the same
//! loader the startup scan uses, writes it to the custom directory, and
//! hot-reloads so the next registry build sees it.  Generation failures are
//! reported back as the tool result so the model can retry with a better
//! description.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::info;

use parley_llm::{ChatMessage, ChatOptions};

use crate::manifest::CustomPluginManifest;
use crate::tool::{ArgSpec, ArgType, Plugin, ToolContext, ToolDef};

const MANIFEST_PROMPT: &str = r#"You are a plugin manifest generator for a personal assistant.

Your job: produce a complete TOML plugin manifest from the user's description.

A manifest declares tools backed by commands available on the host. Exact shape:

name = "plugin_name"            # lowercase, underscores, unique
description = "What it does"

[tools.tool_name]
description = "What this tool does"
command = "curl"                # the executable to run
args = ["-s", "https://example.com/{query}"]   # {placeholders} are replaced by arguments

[[tools.tool_name.arguments]]
name = "query"
type = "string"                 # string, number, or boolean
# required = false              # arguments are required unless stated

RULES:
1. Output ONLY the TOML. No markdown fences, no explanations.
2. Every tool needs a description, a command, and argument declarations for each {placeholder}.
3. Use commonly available commands (curl, date, echo, ...). Keep it simple: one plugin, one domain.
4. Plugin and tool names are lowercase with underscores, no spaces."#;

fn sanitize_name(name: &str) -> String {
    let mut sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    while sanitized.contains("__") {
        sanitized = sanitized.replace("__", "_");
    }
    sanitized.trim_matches('_').to_string()
}

/// Strip markdown code fences the model may wrap the manifest in.
fn strip_fences(raw: &str) -> String {
    let mut text = raw.trim();
    for prefix in ["```toml", "```"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest;
            break;
        }
    }
    text = text.strip_suffix("```").unwrap_or(text);
    text.trim().to_string()
}

fn manifest_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.toml"))
}

async fn create(args: Vec<serde_json::Value>, ctx: ToolContext) -> Result<serde_json::Value> {
    let name = sanitize_name(args.first().and_then(|v| v.as_str()).unwrap_or_default());
    let description = args.get(1).and_then(|v| v.as_str()).unwrap_or_default();
    if name.is_empty() {
        anyhow::bail!("plugin name is required");
    }
    if description.trim().is_empty() {
        anyhow::bail!("a description of what the plugin should do is required");
    }

    let path = manifest_path(ctx.plugins.custom_dir(), &name);
    if path.exists() {
        return Ok(json!(format!(
            "Plugin \"{name}\" already exists at {}. Delete it first to regenerate.",
            path.display()
        )));
    }

    let messages = [
        ChatMessage::system(MANIFEST_PROMPT),
        ChatMessage::user(format!(
            "Create a plugin named \"{name}\" that does the following:\n\n{description}"
        )),
    ];
    let options = ChatOptions { temperature: Some(0.0), ..ChatOptions::default() };
    let reply = ctx.provider.chat(&messages, &options).await?;
    let manifest_toml = strip_fences(&reply.content);

    if let Err(err) = CustomPluginManifest::from_toml(&manifest_toml) {
        return Ok(json!(format!(
            "ERROR: the generated manifest is invalid ({err}). Try again with a clearer description."
        )));
    }

    std::fs::write(&path, &manifest_toml)?;
    ctx.plugins.reload();
    info!(plugin = %name, path = %path.display(), "custom plugin created");

    let preview: String = manifest_toml.chars().take(500).collect();
    let ellipsis = if manifest_toml.len() > 500 { "\n..." } else { "" };
    Ok(json!(format!(
        "Plugin \"{name}\" created at {} and loaded.\n\nManifest:\n{preview}{ellipsis}",
        path.display()
    )))
}

async fn list(_args: Vec<serde_json::Value>, ctx: ToolContext) -> Result<serde_json::Value> {
    let dir = ctx.plugins.custom_dir().to_path_buf();
    let mut files: Vec<PathBuf> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect(),
        Err(_) => return Ok(json!("No custom plugins directory found.")),
    };
    files.sort();

    if files.is_empty() {
        return Ok(json!("No custom plugins installed."));
    }

    let lines: Vec<String> = files
        .iter()
        .map(|path| {
            let fallback = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            match std::fs::read_to_string(path)
                .map_err(anyhow::Error::from)
                .and_then(|raw| CustomPluginManifest::from_toml(&raw))
            {
                Ok(manifest) => format!("• {} — {}", manifest.name, manifest.description),
                Err(_) => format!("• {fallback} — (could not read)"),
            }
        })
        .collect();

    Ok(json!(format!(
        "Custom plugins ({}):\n{}",
        files.len(),
        lines.join("\n")
    )))
}

async fn delete(args: Vec<serde_json::Value>, ctx: ToolContext) -> Result<serde_json::Value> {
    let name = sanitize_name(args.first().and_then(|v| v.as_str()).unwrap_or_default());
    let path = manifest_path(ctx.plugins.custom_dir(), &name);
    if !path.exists() {
        return Ok(json!(format!("Plugin \"{name}\" not found.")));
    }
    std::fs::remove_file(&path)?;
    ctx.plugins.reload();
    Ok(json!(format!("Plugin \"{name}\" deleted and unloaded.")))
}

async fn reload(_args: Vec<serde_json::Value>, ctx: ToolContext) -> Result<serde_json::Value> {
    let fresh = ctx.plugins.reload();
    let names: Vec<&str> = fresh.iter().map(|p| p.name.as_str()).collect();
    Ok(json!(format!(
        "Reloaded {} custom plugin(s){}{}",
        fresh.len(),
        if names.is_empty() { "" } else { ": " },
        names.join(", ")
    )))
}

pub fn plugin(custom_dir: &Path) -> Plugin {
    let dir = custom_dir.to_path_buf();
    Plugin::new(
        "plugin_admin",
        "Create, list, and delete custom plugins backed by host commands",
    )
    .with_init(Arc::new(move || {
        std::fs::create_dir_all(&dir)?;
        Ok(())
    }))
    .with_tool(
        "create",
        ToolDef::new(
            "Create a new custom plugin. The assistant generates a command-backed manifest from your description.",
            vec![
                ArgSpec::required("name", ArgType::String),
                ArgSpec::required("description", ArgType::String),
            ],
            Arc::new(|args, ctx| Box::pin(create(args, ctx))),
        ),
    )
    .with_tool(
        "list",
        ToolDef::new(
            "List all installed custom plugins",
            vec![],
            Arc::new(|args, ctx| Box::pin(list(args, ctx))),
        ),
    )
    .with_tool(
        "delete",
        ToolDef::new(
            "Delete a custom plugin",
            vec![ArgSpec::required("name", ArgType::String)],
            Arc::new(|args, ctx| Box::pin(delete(args, ctx))),
        ),
    )
    .with_tool(
        "reload",
        ToolDef::new(
            "Reload custom plugins from disk after manual edits",
            vec![],
            Arc::new(|args, ctx| Box::pin(reload(args, ctx))),
        ),
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────
