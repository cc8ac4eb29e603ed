use serde::{Deserialize, Serialize};

/// One tool call requested by the model: the registry id plus positional
/// arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ToolCallEnvelope {
    #[serde(default)]
    tool_calls: Vec<ToolCallRequest>,
}

/// Extract tool calls from raw model output.
///
/// Heuristic, not a parsing guarantee: takes the substring between the first
/// `{` and the last `}` and tries it as a JSON object with a non-empty
/// `tool_calls` array.  Anything else (no braces, malformed JSON, an empty
/// or absent array) means the text is a candidate final answer.  The system
/// prompt instructs the model to reply with *only* the JSON, which keeps the
/// scrape reliable in practice; the intent nudge covers the common miss.
pub fn parse_tool_calls(text: &str) -> Option<Vec<ToolCallRequest>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let envelope: ToolCallEnvelope = serde_json::from_str(&text[start..=end]).ok()?;
    if envelope.tool_calls.is_empty() {
        None
    } else {
        Some(envelope.tool_calls)
    }
}

/// Bound a serialized tool result before folding it into the next prompt.
/// Truncation appends an explicit marker naming how many characters were cut.
pub fn truncate_result(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n\n[...truncated, {} chars omitted]", total - max_chars)
}

// ── Tests ────────────────────────────────────────────────────────────────────
