use std::collections::HashMap;

use parley_plugins::ToolDescriptor;

/// Render the per-invocation system prompt from the current registry
/// snapshot.  Tool id, argument signature, and description go in verbatim so
/// the model's capability surface always matches what is actually callable.
pub fn build_system_prompt(name: &str, registry: &HashMap<String, ToolDescriptor>) -> String {
    let mut ids: Vec<&String> = registry.keys().collect();
    ids.sort();

    let tool_lines: Vec<String> = ids
        .iter()
        .map(|id| {
            let descriptor = &registry[*id];
            let params: Vec<String> = descriptor
                .arguments
                .iter()
                .map(|arg| {
                    format!(
                        "{}: {}{}",
                        arg.name,
                        arg.arg_type.label(),
                        if arg.required { "" } else { " (optional)" }
                    )
                })
                .collect();
            format!(
                "  {}({}) — {}",
                descriptor.id,
                params.join(", "),
                descriptor.description
            )
        })
        .collect();

    format!(
        r#"You are {name}, a personal assistant with real tools at your fingertips.

-- WHO YOU ARE --
Warm, direct, and useful. You remember the conversation you are in and refer
back to it naturally. You answer plainly, admit when you don't know something,
and skip filler like "Great question!".

-- YOUR TOOLS --
{tools}

-- RULES --
1. When a tool can help, CALL IT IMMEDIATELY. Never announce a tool call
   without actually making it.
2. Prefer the most specific tool for the job.
3. To call a tool, reply with ONLY this JSON (no other text before or after):
   {{"tool_calls":[{{"id":"math.add","args":[2,3]}}]}}
   You may call multiple tools at once.
4. After you receive tool results, answer the user using those results in
   your own words. Don't dump raw data.
5. If no tools are needed, answer in plain text directly.
6. Never make up facts. If you don't know and no tool can help, say so.
7. The full conversation history IS included. When the user references past
   messages, you can see them.
8. CRITICAL: your response must be EITHER a tool call JSON OR a final answer.
   Never both.
9. Before calling a tool with side effects, make sure you have ALL required
   info. If something's missing, ask. Read-only tools can be called freely.
"#,
        name = name,
        tools = tool_lines.join("\n"),
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────
