//! One-shot chat with the daemon-first, in-process-fallback policy.
//!
//! The daemon is probed by simply attempting the request; a connect-level
//! failure (vs. a request that reached it and failed) selects the fallback.
//! Both paths run the identical orchestrator contract and share the same
//! stored history keys, so a conversation started against the daemon
//! continues seamlessly in-process and vice versa.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use parley_agent::{Agent, ChatOutcome, run_invoke_worker};
use parley_config::AppConfig;
use parley_daemon::DaemonClient;
use parley_events::EventBus;
use parley_llm::{ChatMessage, ChatOptions, provider_for};
use parley_plugins::{Invoker, PluginHost};
use parley_store::{ConversationStore, trim_history};

pub async fn run_chat(config: &AppConfig, message: &str, conversation: &str) -> Result<()> {
    let client = DaemonClient::for_config(config);
    let outcome = match client.chat(message, conversation).await {
        Ok(outcome) => outcome,
        Err(err) if err.is_connect_failure() => {
            info!("no daemon reachable; running the agent in-process");
            chat_in_process(config, message, conversation).await?
        }
        Err(err) => return Err(err.into()),
    };

    for result in &outcome.tool_results {
        match (&result.result, &result.error) {
            (_, Some(error)) => println!("[tool] {}: ERROR — {error}", result.id),
            (Some(value), _) => println!("[tool] {}: {value}", result.id),
            _ => {}
        }
    }
    println!("{}", outcome.content);
    Ok(())
}

/// Same load → chat → trim → save sequence the daemon performs, against the
/// same store keys.
async fn chat_in_process(
    config: &AppConfig,
    message: &str,
    conversation: &str,
) -> Result<ChatOutcome> {
    parley_config::paths::ensure_dirs()?;
    let provider = provider_for(config)?;
    let bus = EventBus::new();
    let plugins = Arc::new(PluginHost::new(parley_config::paths::custom_plugins_dir())?);
    let (invoker, invoke_rx) = Invoker::channel();
    let agent = Agent::new(
        config.agent.name.clone(),
        provider,
        plugins,
        bus,
        invoker,
    );
    tokio::spawn(run_invoke_worker(agent.clone(), invoke_rx));

    let store = ConversationStore::default_location();
    let key = format!("daemon-{conversation}");
    let mut history = store.load(&key);
    history.push(ChatMessage::user(message));

    let outcome = agent.chat(&history, &ChatOptions::default()).await?;

    history.push(ChatMessage::assistant(outcome.content.clone()));
    trim_history(&mut history);
    store.save(&key, &history)?;
    Ok(outcome)
}

pub async fn clear(config: &AppConfig, conversation: &str) -> Result<()> {
    let client = DaemonClient::for_config(config);
    match client.clear(conversation).await {
        Ok(()) => {
            println!("cleared conversation: {conversation}");
            Ok(())
        }
        Err(err) if err.is_connect_failure() => {
            ConversationStore::default_location().clear(&format!("daemon-{conversation}"))?;
            println!("cleared conversation: {conversation} (no daemon running)");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
