//! Daemon lifecycle subcommands.

use std::fs;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use parley_config::AppConfig;
use parley_daemon::{DaemonClient, DaemonServer};

/// Rolling daily log file for the foreground daemon.  Returns the guard that
/// flushes the non-blocking writer on drop.
pub fn init_daemon_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let logs_dir = parley_config::paths::logs_dir();
    fs::create_dir_all(&logs_dir)?;
    let appender = tracing_appender::rolling::daily(&logs_dir, "parley-daemon.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

pub async fn run_foreground(config: AppConfig) -> Result<()> {
    let server = DaemonServer::from_config(config)?;
    server.run().await
}

/// Spawn `parley daemon run` as a detached child.  Liveness is probed over
/// the socket, not via pid files.
pub async fn start_detached(config: &AppConfig) -> Result<()> {
    let client = DaemonClient::for_config(config);
    if client.is_alive().await {
        bail!(
            "daemon already running on {}; use `parley daemon stop` first",
            config.socket_path().display()
        );
    }

    let exe = std::env::current_exe().context("resolve current executable")?;
    let child = Command::new(exe)
        .args(["daemon", "run"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("spawn daemon process")?;
    println!("daemon starting (pid {})", child.id());

    // Give it a moment to bind, then confirm.
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if client.is_alive().await {
            println!("daemon ready on {}", config.socket_path().display());
            return Ok(());
        }
    }
    bail!(
        "daemon did not come up; check {}",
        parley_config::paths::logs_dir().display()
    )
}

pub async fn stop(config: &AppConfig) -> Result<()> {
    let client = DaemonClient::for_config(config);
    match client.shutdown().await {
        Ok(()) => {
            println!("daemon stopping");
            Ok(())
        }
        Err(err) if err.is_connect_failure() => {
            println!("daemon is not running");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn status(config: &AppConfig) -> Result<()> {
    let client = DaemonClient::for_config(config);
    match client.status().await {
        Ok(status) => {
            println!("model:             {}", status.model);
            println!("discord:           {}", status.discord);
            println!("active timers:     {}", status.active_timers);
            println!("connected clients: {}", status.connected_clients);
            println!("uptime:            {}s", status.uptime_secs);
            Ok(())
        }
        Err(err) if err.is_connect_failure() => {
            println!("daemon is not running");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn timers(config: &AppConfig) -> Result<()> {
    let client = DaemonClient::for_config(config);
    match client.timers().await {
        Ok(timers) if timers.is_empty() => {
            println!("no active timers");
            Ok(())
        }
        Ok(timers) => {
            for timer in timers {
                let secs = timer.remaining_ms.div_ceil(1000);
                let task = timer
                    .meta
                    .get("task")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                println!("{} — {secs}s left — \"{task}\"", timer.id);
            }
            Ok(())
        }
        Err(err) if err.is_connect_failure() => {
            println!("daemon is not running; timers live in the daemon process");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
