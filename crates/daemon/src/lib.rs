//! The daemon: one long-lived process hosting the agent, event bus, and
//! conversation store behind a local socket, so every front-end (terminal,
//! one-shot CLI, chat bots) shares one live runtime.
//!
//! Wire format: newline-delimited JSON, one `{type, payload}` request per
//! line, answered by one `{type:"response", success, data|error}` line.  No
//! request ids; a connection carries one outstanding request at a time by
//! convention.

mod client;
mod protocol;
mod server;

pub use client::{CONNECT_TIMEOUT, ClientError, DaemonClient, RESPONSE_TIMEOUT};
pub use protocol::{ChatParams, ClearParams, Frame, Response, StatusData};
pub use server::DaemonServer;
