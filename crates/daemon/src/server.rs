use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use parley_agent::{Agent, run_invoke_worker};
use parley_config::AppConfig;
use parley_events::EventBus;
use parley_llm::{ChatMessage, ChatOptions, provider_for};
use parley_plugins::{InvokeRequest, Invoker, PluginHost};
use parley_store::{ConversationStore, trim_history};

use crate::protocol::{ChatParams, ClearParams, Frame, Response, StatusData};

struct DaemonContext {
    agent: Agent,
    bus: Arc<EventBus>,
    store: ConversationStore,
    config: AppConfig,
    started_at: Instant,
    connected_clients: AtomicUsize,
}

pub struct DaemonServer {
    ctx: Arc<DaemonContext>,
    socket_path: PathBuf,
    invoke_rx: mpsc::UnboundedReceiver<InvokeRequest>,
}

impl DaemonServer {
    /// Wire up the full runtime from config: provider, plugin host (fatal if
    /// a built-in fails to initialize), event bus, agent, store.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        parley_config::paths::ensure_dirs()?;
        let provider = provider_for(&config)?;
        let bus = EventBus::new();
        let plugins = Arc::new(PluginHost::new(parley_config::paths::custom_plugins_dir())?);
        let store = ConversationStore::default_location();
        Ok(Self::new(config, provider, plugins, bus, store))
    }

    /// Assemble a server from explicit parts.  `from_config` is the normal
    /// path; this one exists so tests can inject a scripted provider and a
    /// temp store.
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn parley_llm::ChatProvider>,
        plugins: Arc<PluginHost>,
        bus: Arc<EventBus>,
        store: ConversationStore,
    ) -> Self {
        let (invoker, invoke_rx) = Invoker::channel();
        let agent = Agent::new(
            config.agent.name.clone(),
            provider,
            plugins,
            bus.clone(),
            invoker,
        );
        let socket_path = config.socket_path();
        let ctx = Arc::new(DaemonContext {
            agent,
            bus,
            store,
            config,
            started_at: Instant::now(),
            connected_clients: AtomicUsize::new(0),
        });
        Self { ctx, socket_path, invoke_rx }
    }

    /// Bind the socket and serve until a `shutdown` request arrives.  The
    /// bind is the one fatal failure; everything after is per-connection.
    pub async fn run(self) -> Result<()> {
        let DaemonServer { ctx, socket_path, invoke_rx } = self;

        if socket_path.exists() {
            // Stale socket from an unclean exit.
            let _ = fs::remove_file(&socket_path);
        }
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("bind daemon socket {}", socket_path.display()))?;
        info!(path = %socket_path.display(), "daemon listening");

        // Fired timers and plugin events re-enter the agent through here,
        // one bounded run per request.
        tokio::spawn(run_invoke_worker(ctx.agent.clone(), invoke_rx));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_ok() && *shutdown_rx.borrow() {
                        break;
                    }
                }
                accept = listener.accept() => {
                    let stream = match accept {
                        Ok((stream, _)) => stream,
                        Err(err) => {
                            warn!(?err, "accept failed");
                            continue;
                        }
                    };
                    let ctx = ctx.clone();
                    let shutdown_tx = shutdown_tx.clone();
                    ctx.connected_clients.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, &ctx, shutdown_tx).await {
                            error!(?err, "connection handler failed");
                        }
                        ctx.connected_clients.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            }
        }

        // Closing the listener and returning drops every connection task's
        // accept source; per-connection loops observe the shutdown signal.
        info!("daemon shutting down");
        drop(listener);
        let _ = fs::remove_file(&socket_path);
        Ok(())
    }
}

/// Read newline-delimited requests in arrival order and answer each with one
/// response line.  A malformed frame gets `success:false` and the connection
/// stays open for further requests.
async fn handle_connection(
    stream: UnixStream,
    ctx: &DaemonContext,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            read = reader.read_line(&mut line) => {
                if read? == 0 {
                    break;
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let (response, shutdown) = dispatch(trimmed, ctx).await;
                let encoded = serde_json::to_string(&response)?;
                write_half.write_all(encoded.as_bytes()).await?;
                write_half.write_all(b"\n").await?;
                write_half.flush().await?;

                // Ack first, then stop the world.
                if shutdown {
                    let _ = shutdown_tx.send(true);
                    break;
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Decode and serve one request.  Returns the response plus whether this
/// request asked the daemon to shut down.
async fn dispatch(line: &str, ctx: &DaemonContext) -> (Response, bool) {
    let frame: Frame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(err) => return (Response::failure(format!("malformed request: {err}")), false),
    };

    let response = match frame.kind.as_str() {
        "ping" => Response::ok(json!({
            "pong": true,
            "timestamp": Utc::now().timestamp_millis(),
        })),
        "chat" => handle_chat(frame.payload, ctx).await,
        "status" => handle_status(ctx),
        "clear" => handle_clear(frame.payload, ctx),
        "timers" => Response::ok(json!({ "timers": ctx.bus.list_scheduled() })),
        "shutdown" => {
            return (Response::ok(json!({ "message": "Shutting down..." })), true);
        }
        other => Response::failure(format!("Unknown message type: {other}")),
    };
    (response, false)
}

/// Decode a payload, treating an absent/null payload as an empty object so
/// defaulted fields apply.
fn params<T: serde::de::DeserializeOwned>(payload: serde_json::Value) -> Result<T, String> {
    let payload = if payload.is_null() { json!({}) } else { payload };
    serde_json::from_value(payload).map_err(|err| err.to_string())
}

/// Load → append user turn → run the orchestrator → append reply → trim →
/// save.  No lock is held across the provider round-trips, so chats against
/// different conversation ids never contend; two chats against the SAME id
/// race on this read-modify-write and the slower writer wins (known hazard).
async fn handle_chat(payload: serde_json::Value, ctx: &DaemonContext) -> Response {
    let params: ChatParams = match params(payload) {
        Ok(params) => params,
        Err(err) => return Response::failure(format!("bad chat payload: {err}")),
    };
    let key = format!("daemon-{}", params.conversation_id);

    let mut history = ctx.store.load(&key);
    history.push(ChatMessage::user(params.message));

    match ctx.agent.chat(&history, &ChatOptions::default()).await {
        Ok(outcome) => {
            let reply = if outcome.content.is_empty() {
                "...".to_string()
            } else {
                outcome.content
            };
            history.push(ChatMessage::assistant(reply.clone()));
            trim_history(&mut history);
            if let Err(err) = ctx.store.save(&key, &history) {
                warn!(key = %key, ?err, "failed to persist conversation");
            }

            match serde_json::to_value(parley_agent::ChatOutcome {
                content: reply,
                tool_results: outcome.tool_results,
            }) {
                Ok(data) => Response::ok(data),
                Err(err) => Response::failure(format!("encode chat response: {err}")),
            }
        }
        Err(err) => Response::failure(err.to_string()),
    }
}

fn handle_status(ctx: &DaemonContext) -> Response {
    let flag = |configured: bool| if configured { "configured" } else { "not set" };
    let status = StatusData {
        model: ctx.config.llm.model.clone(),
        discord: flag(!ctx.config.daemon.discord_token.is_empty()).to_string(),
        active_timers: ctx.bus.active_timers(),
        connected_clients: ctx.connected_clients.load(Ordering::SeqCst),
        uptime_secs: ctx.started_at.elapsed().as_secs(),
    };
    match serde_json::to_value(status) {
        Ok(data) => Response::ok(data),
        Err(err) => Response::failure(format!("encode status: {err}")),
    }
}

fn handle_clear(payload: serde_json::Value, ctx: &DaemonContext) -> Response {
    let params: ClearParams = match params(payload) {
        Ok(params) => params,
        Err(err) => return Response::failure(format!("bad clear payload: {err}")),
    };
    let key = format!("daemon-{}", params.conversation_id);
    match ctx.store.clear(&key) {
        Ok(()) => Response::ok(json!({
            "message": format!("Cleared conversation: {}", params.conversation_id),
        })),
        Err(err) => Response::failure(err.to_string()),
    }
}
