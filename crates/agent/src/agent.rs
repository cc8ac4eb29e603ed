use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_events::EventBus;
use parley_llm::{ChatMessage, ChatOptions, ChatProvider, ProviderError};
use parley_plugins::{
    InvokeRequest, Invoker, PluginHost, ToolContext, ToolDescriptor, build_registry,
};

use crate::parse::{ToolCallRequest, parse_tool_calls, truncate_result};
use crate::prompt::build_system_prompt;

/// Maximum tool-call → result → re-prompt iterations before the model is
/// forced to produce a final text answer.
const MAX_TOOL_ROUNDS: usize = 5;

/// Character budget per serialized tool result folded into the next prompt.
const TOOL_RESULT_BUDGET: usize = 3000;

/// Replies shorter than this are candidates for the intent nudge.
const NUDGE_MAX_CHARS: usize = 200;

const NUDGE_PROMPT: &str = "You said you would use a tool but you didn't call it. \
Output ONLY the tool call JSON now. \
Example: {\"tool_calls\":[{\"id\":\"search.search\",\"args\":[\"query\"]}]}";

const TRIM_PLACEHOLDER: &str = "[Earlier messages trimmed to fit context window]";

const OVERFLOW_APOLOGY: &str =
    "Sorry, the response was too long for me to process. Try asking something more specific?";

const EXHAUSTED_FALLBACK: &str = "Sorry, I couldn't complete this request.";

/// Best-effort detector for "I'll go look that up" replies that promise a
/// tool call without making one.  Keyword heuristic, nothing more.
static TOOL_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(let me|search|look(ing)? up|checking|one moment|hold on|i'll (check|look|search|find))\b")
        .expect("intent regex is valid")
});

// ── Outputs ──────────────────────────────────────────────────────────────────

/// Record of one tool execution: exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    fn ok(id: String, result: serde_json::Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    fn failed(id: String, error: String) -> Self {
        Self { id, result: None, error: Some(error) }
    }
}

/// What a chat invocation returns: the final text plus every tool execution,
/// in round order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOutcome {
    pub content: String,
    pub tool_results: Vec<ToolCallResult>,
}

// ── Agent ────────────────────────────────────────────────────────────────────

/// The orchestrator.  Owns no persistent state: each `chat` is a pure
/// function of (conversation, registry snapshot, provider) plus whatever
/// side effects the executed tools perform.
#[derive(Clone)]
pub struct Agent {
    name: String,
    provider: Arc<dyn ChatProvider>,
    plugins: Arc<PluginHost>,
    bus: Arc<EventBus>,
    invoker: Invoker,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn ChatProvider>,
        plugins: Arc<PluginHost>,
        bus: Arc<EventBus>,
        invoker: Invoker,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            plugins,
            bus,
            invoker,
        }
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            bus: self.bus.clone(),
            provider: self.provider.clone(),
            plugins: self.plugins.clone(),
            invoker: self.invoker.clone(),
        }
    }

    /// Run the bounded tool-calling loop over `messages`.
    ///
    /// The registry and system prompt are rebuilt here on every call, never
    /// cached, so hot-reloaded plugins are visible without a restart.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatOutcome> {
        let registry = build_registry(&self.plugins.snapshot());
        let system_prompt = build_system_prompt(&self.name, &registry);

        let mut conversation = Vec::with_capacity(messages.len() + 1);
        conversation.push(ChatMessage::system(system_prompt));
        conversation.extend_from_slice(messages);

        let mut options = options.clone();
        options.temperature.get_or_insert(0.0);

        let mut tool_results: Vec<ToolCallResult> = Vec::new();
        let mut nudged = false;

        for round in 0..MAX_TOOL_ROUNDS {
            debug!(round, len = conversation.len(), "tool loop iteration");
            let text = match self.provider.chat(&conversation, &options).await {
                Ok(reply) => reply.content,
                Err(ProviderError::PayloadTooLarge) if conversation.len() > 3 => {
                    warn!("context too long; trimming and retrying once");
                    collapse_conversation(&mut conversation);
                    match self.provider.chat(&conversation, &options).await {
                        Ok(reply) => reply.content,
                        Err(err) => {
                            warn!(?err, "retry after trim failed; giving up");
                            return Ok(ChatOutcome {
                                content: OVERFLOW_APOLOGY.to_string(),
                                tool_results,
                            });
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            };

            let Some(calls) = parse_tool_calls(&text) else {
                // The model sometimes narrates an upcoming tool call instead
                // of emitting it.  Push back once, then take its word.
                if round == 0 && !nudged && looks_like_tool_intent(&text) {
                    info!("reply promises a tool call but contains none; nudging");
                    nudged = true;
                    conversation.push(ChatMessage::assistant(text.clone()));
                    conversation.push(ChatMessage::user(NUDGE_PROMPT));
                    continue;
                }
                return Ok(ChatOutcome { content: text, tool_results });
            };

            info!(
                round,
                tools = %calls.iter().map(|c| c.id.as_str()).collect::<Vec<_>>().join(", "),
                "model requested tool calls"
            );
            let results = self.execute_tool_calls(calls, &registry).await;

            let formatted: Vec<String> = results.iter().map(format_tool_result).collect();
            conversation.push(ChatMessage::assistant(text.clone()));
            conversation.push(ChatMessage::user(format!(
                "Tool results:\n{}\n\nNow answer the user using these results. Reply in plain text only.",
                formatted.join("\n")
            )));
            tool_results.extend(results);
        }

        // Out of rounds: one last call with no further tool execution, its
        // text returned verbatim even if it looks like another tool call.
        warn!("tool loop exhausted after {MAX_TOOL_ROUNDS} rounds; forcing a final answer");
        let last = self.provider.chat(&conversation, &options).await?;
        let content = if last.content.is_empty() {
            EXHAUSTED_FALLBACK.to_string()
        } else {
            last.content
        };
        Ok(ChatOutcome { content, tool_results })
    }

    /// Execute every tool call from one assistant turn concurrently.  Each
    /// call is isolated: a handler error (or panic) becomes an `{id, error}`
    /// entry instead of aborting the batch.
    async fn execute_tool_calls(
        &self,
        calls: Vec<ToolCallRequest>,
        registry: &HashMap<String, ToolDescriptor>,
    ) -> Vec<ToolCallResult> {
        let tasks: Vec<_> = calls
            .into_iter()
            .map(|call| {
                let descriptor = registry.get(&call.id).cloned();
                let ctx = self.tool_context();
                async move {
                    let ToolCallRequest { id, args } = call;
                    let Some(descriptor) = descriptor else {
                        return ToolCallResult::failed(
                            id.clone(),
                            format!("Unknown tool \"{id}\""),
                        );
                    };
                    let handle = tokio::spawn((descriptor.handler)(args, ctx));
                    match handle.await {
                        Ok(Ok(value)) => ToolCallResult::ok(id, value),
                        Ok(Err(err)) => ToolCallResult::failed(id, err.to_string()),
                        Err(join_err) => {
                            ToolCallResult::failed(id, format!("tool crashed: {join_err}"))
                        }
                    }
                }
            })
            .collect();

        futures::future::join_all(tasks).await
    }

    /// Drive a system-originated task through the full tool loop.
    ///
    /// This is the only path by which non-human actors cause autonomous tool
    /// use; it performs exactly one bounded run.  Anything that should happen
    /// later must go through a new timer or event, never direct recursion.
    pub async fn invoke(&self, task: &str, context: serde_json::Value) -> Result<String> {
        let context_line = if context.is_null()
            || context.as_object().is_some_and(|map| map.is_empty())
        {
            String::new()
        } else {
            format!("\nContext: {context}")
        };
        let message = format!(
            "[SYSTEM TASK — triggered automatically, not a human message]\n\n{task}{context_line}\n\n\
             Do this now using your tools. Keep the outcome short and natural."
        );

        let outcome = self
            .chat(&[ChatMessage::user(message)], &ChatOptions::default())
            .await?;
        info!(
            preview = %outcome.content.chars().take(100).collect::<String>(),
            "invoke completed"
        );
        Ok(outcome.content)
    }
}

/// Drain the invoke bridge: one bounded orchestrator run per queued request.
/// The hosting process spawns this next to the agent it serves.
pub async fn run_invoke_worker(agent: Agent, mut rx: mpsc::UnboundedReceiver<InvokeRequest>) {
    while let Some(request) = rx.recv().await {
        if let Err(err) = agent.invoke(&request.task, request.context).await {
            warn!(task = %request.task, ?err, "invoke failed");
        }
    }
}

fn looks_like_tool_intent(text: &str) -> bool {
    text.chars().count() < NUDGE_MAX_CHARS && TOOL_INTENT.is_match(text)
}

/// Collapse to `[system prompt, placeholder note, last 4 messages]` after the
/// provider rejects the conversation as too large.
fn collapse_conversation(conversation: &mut Vec<ChatMessage>) {
    let tail_start = conversation.len().saturating_sub(4);
    let tail: Vec<ChatMessage> = conversation[tail_start..].to_vec();
    let system = conversation[0].clone();
    conversation.clear();
    conversation.push(system);
    conversation.push(ChatMessage::user(TRIM_PLACEHOLDER));
    conversation.extend(tail);
}

fn format_tool_result(result: &ToolCallResult) -> String {
    match (&result.error, &result.result) {
        (Some(error), _) => format!("{}: ERROR — {error}", result.id),
        (None, Some(value)) => format!(
            "{}: {}",
            result.id,
            truncate_result(&value.to_string(), TOOL_RESULT_BUDGET)
        ),
        (None, None) => format!("{}: (no output)", result.id),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parley_llm::{ChatReply, ModelInfo};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider scripted with a fixed sequence of replies; records every call.
    struct MockProvider {
        replies: Mutex<VecDeque<Result<String, ProviderError>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl MockProvider {
        fn scripted(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call(&self, index: usize) -> Vec<ChatMessage> {
            self.calls.lock().unwrap()[index].clone()
        }
    }

    #[async_trait::async_trait]
    impl ChatProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatReply, ProviderError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(content)) => Ok(ChatReply { content, role: "assistant".into() }),
                Some(Err(err)) => Err(err),
                None => Err(ProviderError::Api {
                    status: 500,
                    message: "mock script exhausted".into(),
                }),
            }
        }

        async fn models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        agent: Agent,
        provider: Arc<MockProvider>,
        _custom_dir: tempfile::TempDir,
        _invoke_rx: mpsc::UnboundedReceiver<InvokeRequest>,
    }

    fn fixture(replies: Vec<Result<String, ProviderError>>) -> Fixture {
        let custom_dir = tempfile::TempDir::new().unwrap();
        let provider = MockProvider::scripted(replies);
        let plugins = Arc::new(PluginHost::new(custom_dir.path()).unwrap());
        let (invoker, invoke_rx) = Invoker::channel();
        let agent = Agent::new(
            "Parley",
            provider.clone(),
            plugins,
            EventBus::new(),
            invoker,
        );
        Fixture {
            agent,
            provider,
            _custom_dir: custom_dir,
            _invoke_rx: invoke_rx,
        }
    }

    fn tool_call_reply(json: &str) -> Result<String, ProviderError> {
        Ok(json.to_string())
    }

    #[tokio::test]
    async fn plain_text_is_the_final_answer() {
        let f = fixture(vec![Ok("Hello! What can I do for you?".into())]);
        let outcome = f
            .agent
            .chat(&[ChatMessage::user("hi")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.content, "Hello! What can I do for you?");
        assert!(outcome.tool_results.is_empty());
        assert_eq!(f.provider.call_count(), 1);

        // Every invocation is prefixed with a fresh system prompt rendering
        // the registry.
        let first_call = f.provider.call(0);
        assert_eq!(first_call[0].role, parley_llm::Role::System);
        assert!(first_call[0].content.contains("math.add"));
    }

    #[tokio::test]
    async fn tool_round_then_answer() {
        let f = fixture(vec![
            tool_call_reply(r#"{"tool_calls":[{"id":"math.add","args":[2,3]}]}"#),
            Ok("5".into()),
        ]);
        let outcome = f
            .agent
            .chat(&[ChatMessage::user("what is 2+3?")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.content, "5");
        assert_eq!(outcome.tool_results.len(), 1);
        assert_eq!(outcome.tool_results[0].id, "math.add");
        assert_eq!(outcome.tool_results[0].result, Some(json!(5)));
        assert!(outcome.tool_results[0].error.is_none());

        // The second model call sees the tool results folded in.
        let second_call = f.provider.call(1);
        let last = second_call.last().unwrap();
        assert!(last.content.starts_with("Tool results:"));
        assert!(last.content.contains("math.add: 5"));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_an_error_result_and_loop_continues() {
        let f = fixture(vec![
            tool_call_reply(r#"{"tool_calls":[{"id":"foo.bar","args":[]}]}"#),
            Ok("that tool doesn't exist, sorry".into()),
        ]);
        let outcome = f
            .agent
            .chat(&[ChatMessage::user("use foo")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.content, "that tool doesn't exist, sorry");
        assert_eq!(outcome.tool_results.len(), 1);
        assert_eq!(
            outcome.tool_results[0].error.as_deref(),
            Some("Unknown tool \"foo.bar\"")
        );
    }

    #[tokio::test]
    async fn tool_results_concatenate_in_round_order() {
        let f = fixture(vec![
            tool_call_reply(
                r#"{"tool_calls":[{"id":"math.add","args":[1,1]},{"id":"math.multiply","args":[2,3]}]}"#,
            ),
            tool_call_reply(r#"{"tool_calls":[{"id":"math.subtract","args":[5,1]}]}"#),
            Ok("all done".into()),
        ]);
        let outcome = f
            .agent
            .chat(&[ChatMessage::user("do math")], &ChatOptions::default())
            .await
            .unwrap();

        let ids: Vec<&str> = outcome.tool_results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["math.add", "math.multiply", "math.subtract"]);
        assert_eq!(outcome.tool_results[0].result, Some(json!(2)));
        assert_eq!(outcome.tool_results[1].result, Some(json!(6)));
        assert_eq!(outcome.tool_results[2].result, Some(json!(4)));
    }

    #[tokio::test]
    async fn loop_is_bounded_and_final_call_is_verbatim() {
        let tool_json = r#"{"tool_calls":[{"id":"math.add","args":[1,1]}]}"#;
        let mut replies: Vec<Result<String, ProviderError>> =
            (0..MAX_TOOL_ROUNDS).map(|_| tool_call_reply(tool_json)).collect();
        // The forced final call also returns tool-call JSON; it must come
        // back verbatim, not be executed.
        replies.push(tool_call_reply(tool_json));

        let f = fixture(replies);
        let outcome = f
            .agent
            .chat(&[ChatMessage::user("loop forever")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(f.provider.call_count(), MAX_TOOL_ROUNDS + 1);
        assert_eq!(outcome.content, tool_json);
        assert_eq!(outcome.tool_results.len(), MAX_TOOL_ROUNDS);
    }

    #[tokio::test]
    async fn intent_nudge_fires_once_then_accepts_tools() {
        let f = fixture(vec![
            Ok("Let me search for that real quick.".into()),
            tool_call_reply(r#"{"tool_calls":[{"id":"math.add","args":[1,2]}]}"#),
            Ok("3".into()),
        ]);
        let outcome = f
            .agent
            .chat(&[ChatMessage::user("1+2?")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.content, "3");
        assert_eq!(outcome.tool_results.len(), 1);
        assert_eq!(f.provider.call_count(), 3);

        let second_call = f.provider.call(1);
        assert!(
            second_call
                .last()
                .unwrap()
                .content
                .contains("Output ONLY the tool call JSON")
        );
    }

    #[tokio::test]
    async fn long_intent_text_is_accepted_as_final() {
        let long_reply = format!("Let me explain this properly. {}", "word ".repeat(60));
        let f = fixture(vec![Ok(long_reply.clone())]);
        let outcome = f
            .agent
            .chat(&[ChatMessage::user("explain")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.content, long_reply);
        assert_eq!(f.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn nudge_fires_at_most_once() {
        // Nudge consumed round 0; a second intent-y reply is final.
        let f = fixture(vec![
            Ok("Let me look up that.".into()),
            Ok("Let me search again.".into()),
        ]);
        let outcome = f
            .agent
            .chat(&[ChatMessage::user("go")], &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.content, "Let me search again.");
        assert_eq!(f.provider.call_count(), 2);
    }

    fn long_conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("noted"),
            ChatMessage::user("second"),
            ChatMessage::assistant("still noted"),
            ChatMessage::user("third"),
        ]
    }

    #[tokio::test]
    async fn payload_overflow_trims_and_retries_once() {
        let f = fixture(vec![
            Err(ProviderError::PayloadTooLarge),
            Ok("recovered".into()),
        ]);
        let outcome = f
            .agent
            .chat(&long_conversation(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.content, "recovered");

        let retry = f.provider.call(1);
        assert_eq!(retry[0].role, parley_llm::Role::System);
        assert_eq!(retry[1].content, TRIM_PLACEHOLDER);
        // system + placeholder + last 4 of the original conversation.
        assert_eq!(retry.len(), 6);
        assert_eq!(retry.last().unwrap().content, "third");
    }

    #[tokio::test]
    async fn payload_overflow_twice_returns_the_apology() {
        let f = fixture(vec![
            Err(ProviderError::PayloadTooLarge),
            Err(ProviderError::PayloadTooLarge),
        ]);
        let outcome = f
            .agent
            .chat(&long_conversation(), &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.content, OVERFLOW_APOLOGY);
    }

    #[tokio::test]
    async fn payload_overflow_on_a_short_conversation_propagates() {
        let f = fixture(vec![Err(ProviderError::PayloadTooLarge)]);
        let result = f
            .agent
            .chat(&[ChatMessage::user("hi")], &ChatOptions::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn other_provider_errors_propagate() {
        let f = fixture(vec![Err(ProviderError::Auth("bad key".into()))]);
        let result = f
            .agent
            .chat(&[ChatMessage::user("hi")], &ChatOptions::default())
            .await;
        assert!(result.unwrap_err().to_string().contains("authentication"));
    }

    #[tokio::test]
    async fn tool_error_feeds_back_without_aborting_the_batch() {
        let f = fixture(vec![
            tool_call_reply(
                r#"{"tool_calls":[{"id":"math.divide","args":[1,0]},{"id":"math.add","args":[2,2]}]}"#,
            ),
            Ok("half worked".into()),
        ]);
        let outcome = f
            .agent
            .chat(&[ChatMessage::user("divide!")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.tool_results.len(), 2);
        assert!(
            outcome.tool_results[0]
                .error
                .as_deref()
                .unwrap()
                .contains("division by zero")
        );
        assert_eq!(outcome.tool_results[1].result, Some(json!(4)));

        let folded = f.provider.call(1);
        assert!(folded.last().unwrap().content.contains("ERROR — division by zero"));
    }

    #[tokio::test]
    async fn invoke_tags_the_turn_as_system_originated() {
        let f = fixture(vec![Ok("done, boss".into())]);
        let content = f
            .agent
            .invoke("say hi to the user", json!({"source": "timer"}))
            .await
            .unwrap();
        assert_eq!(content, "done, boss");

        let call = f.provider.call(0);
        let user_turn = &call[1];
        assert!(user_turn.content.starts_with("[SYSTEM TASK"));
        assert!(user_turn.content.contains("say hi to the user"));
        assert!(user_turn.content.contains("\"source\":\"timer\""));
    }

    #[tokio::test]
    async fn invoke_worker_drains_requests() {
        let f = fixture(vec![Ok("worker reply".into())]);
        let (invoker, rx) = Invoker::channel();
        let worker = tokio::spawn(run_invoke_worker(f.agent.clone(), rx));

        invoker.invoke("do the thing", json!({})).unwrap();
        drop(invoker);
        worker.await.unwrap();
        assert_eq!(f.provider.call_count(), 1);
    }

    #[test]
    fn oversized_tool_results_are_truncated_when_folded() {
        let result = ToolCallResult::ok("big.tool".into(), json!("y".repeat(4000)));
        let folded = format_tool_result(&result);
        assert!(folded.contains("[...truncated,"));
        assert!(folded.len() < 3200);
    }
}
