use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

use parley_agent::ChatOutcome;
use parley_config::AppConfig;
use parley_events::ScheduledTask;

use crate::protocol::{Frame, Response, StatusData};

/// Failing to reach the daemon at all must be distinguishable from a request
/// that reached it and failed; callers fall back to an in-process agent on
/// the former, surface the error on the latter.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the single response line.  Generous because a chat
/// request spans model round-trips; finite to survive a wedged server.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to daemon: {0}")]
    Connect(std::io::Error),
    #[error("timed out connecting to daemon")]
    ConnectTimeout,
    #[error("timed out waiting for the daemon response")]
    ResponseTimeout,
    #[error("daemon request failed: {0}")]
    Request(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("i/o error talking to daemon: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// True when the daemon could not be reached at all (vs. a request that
    /// reached it and failed).
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, ClientError::Connect(_) | ClientError::ConnectTimeout)
    }
}

/// Thin request/response client.  One connection per request, one request in
/// flight per connection, so no response correlation is needed.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self { socket_path: socket_path.as_ref().to_path_buf() }
    }

    pub fn for_config(config: &AppConfig) -> Self {
        Self::new(config.socket_path())
    }

    /// Send one `{type, payload}` line and await exactly one response line.
    pub async fn request(
        &self,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        let stream = timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| ClientError::ConnectTimeout)?
            .map_err(ClientError::Connect)?;
        let (read_half, mut write_half) = stream.into_split();

        let frame = serde_json::to_string(&Frame::new(kind, payload))
            .map_err(|err| ClientError::Protocol(err.to_string()))?;
        write_half.write_all(frame.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let read = timeout(RESPONSE_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| ClientError::ResponseTimeout)??;
        if read == 0 {
            return Err(ClientError::Protocol(
                "connection closed before a response arrived".to_string(),
            ));
        }

        let response: Response = serde_json::from_str(line.trim())
            .map_err(|err| ClientError::Protocol(err.to_string()))?;
        if response.success {
            Ok(response.data.unwrap_or(serde_json::Value::Null))
        } else {
            Err(ClientError::Request(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    /// Cheap liveness probe used by the in-process fallback policy.
    pub async fn is_alive(&self) -> bool {
        self.ping().await.is_ok()
    }

    pub async fn ping(&self) -> Result<serde_json::Value, ClientError> {
        self.request("ping", json!({})).await
    }

    pub async fn chat(
        &self,
        message: &str,
        conversation_id: &str,
    ) -> Result<ChatOutcome, ClientError> {
        let data = self
            .request(
                "chat",
                json!({ "message": message, "conversationId": conversation_id }),
            )
            .await?;
        serde_json::from_value(data).map_err(|err| ClientError::Protocol(err.to_string()))
    }

    pub async fn status(&self) -> Result<StatusData, ClientError> {
        let data = self.request("status", json!({})).await?;
        serde_json::from_value(data).map_err(|err| ClientError::Protocol(err.to_string()))
    }

    pub async fn clear(&self, conversation_id: &str) -> Result<(), ClientError> {
        self.request("clear", json!({ "conversationId": conversation_id }))
            .await?;
        Ok(())
    }

    pub async fn timers(&self) -> Result<Vec<ScheduledTask>, ClientError> {
        let data = self.request("timers", json!({})).await?;
        serde_json::from_value(data["timers"].clone())
            .map_err(|err| ClientError::Protocol(err.to_string()))
    }

    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.request("shutdown", json!({})).await?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_failure_is_distinguishable() {
        let client = DaemonClient::new("/tmp/parley-test-no-such-socket.sock");
        let err = client.ping().await.unwrap_err();
        assert!(err.is_connect_failure());
    }

    #[test]
    fn request_failure_is_not_a_connect_failure() {
        assert!(!ClientError::Request("boom".into()).is_connect_failure());
        assert!(!ClientError::ResponseTimeout.is_connect_failure());
    }
}
