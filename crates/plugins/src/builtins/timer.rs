//! Timers that trigger the assistant to carry out a task after a delay.
//!
//! `set` schedules a callback on the event bus; when it fires, the stored
//! natural-language task goes through the invoke bridge, and the assistant
//! decides which tools to use.  The timer only records WHAT, never HOW.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::tool::{ArgSpec, ArgType, Plugin, ToolContext, ToolDef};

fn next_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("timer-{}", &suffix[..8])
}

fn human_delay(seconds: f64) -> String {
    if seconds >= 60.0 {
        format!("{:.1} min", seconds / 60.0)
    } else {
        format!("{seconds}s")
    }
}

async fn set_timer(args: Vec<serde_json::Value>, ctx: ToolContext) -> Result<serde_json::Value> {
    let seconds = args
        .first()
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or_default();
    if seconds <= 0.0 {
        bail!("duration must be > 0 seconds");
    }
    let task = args
        .get(1)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if task.is_empty() {
        bail!("task description is required — describe what should happen when the timer fires");
    }

    let id = next_id();
    let invoker = ctx.invoker.clone();
    let fire_task = task.clone();
    let fire_id = id.clone();
    ctx.bus.schedule_timeout(
        id.clone(),
        Duration::from_secs_f64(seconds),
        json!({ "task": task.clone(), "seconds": seconds }),
        Box::new(move || {
            Box::pin(async move {
                info!(id = %fire_id, task = %fire_task, "timer fired; invoking assistant");
                invoker.invoke(fire_task, json!({ "source": "timer", "timer_id": fire_id }))
            })
        }),
    );

    Ok(json!(format!(
        "Timer set for {}. ID: {id}. When it fires, the assistant will carry out: \"{task}\"",
        human_delay(seconds)
    )))
}

async fn cancel_timer(args: Vec<serde_json::Value>, ctx: ToolContext) -> Result<serde_json::Value> {
    let timer_id = args
        .first()
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let cancelled = ctx.bus.cancel_timeout(&timer_id);
    Ok(json!(if cancelled {
        format!("Timer {timer_id} cancelled.")
    } else {
        format!("Timer {timer_id} not found.")
    }))
}

async fn list_timers(_args: Vec<serde_json::Value>, ctx: ToolContext) -> Result<serde_json::Value> {
    let scheduled = ctx.bus.list_scheduled();
    if scheduled.is_empty() {
        return Ok(json!("No active timers."));
    }
    let lines: Vec<String> = scheduled
        .iter()
        .map(|t| {
            let secs = t.remaining_ms.div_ceil(1000);
            let task = t.meta.get("task").and_then(|v| v.as_str()).unwrap_or("?");
            format!("• {} — {secs}s left — \"{task}\"", t.id)
        })
        .collect();
    Ok(json!(lines.join("\n")))
}

pub fn plugin() -> Plugin {
    Plugin::new(
        "timer",
        "Set timers that trigger the assistant to perform any task after a delay",
    )
    .with_tool(
        "set",
        ToolDef::new(
            "Set a timer. After the delay, the assistant will carry out the given task using its tools.",
            vec![
                ArgSpec::required("seconds", ArgType::Number),
                ArgSpec::required("task", ArgType::String),
            ],
            Arc::new(|args, ctx| Box::pin(set_timer(args, ctx))),
        ),
    )
    .with_tool(
        "cancel",
        ToolDef::new(
            "Cancel a running timer by its ID",
            vec![ArgSpec::required("timer_id", ArgType::String)],
            Arc::new(|args, ctx| Box::pin(cancel_timer(args, ctx))),
        ),
    )
    .with_tool(
        "list",
        ToolDef::new(
            "List all active timers",
            vec![],
            Arc::new(|args, ctx| Box::pin(list_timers(args, ctx))),
        ),
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Invoker, PluginHost};
    use tokio::sync::mpsc;

    fn ctx() -> (ToolContext, mpsc::UnboundedReceiver<crate::InvokeRequest>) {
        let (invoker, rx) = Invoker::channel();
        (
            ToolContext {
                bus: parley_events::EventBus::new(),
                provider: crate::host::tests::null_provider(),
                plugins: Arc::new(PluginHost::for_tests()),
                invoker,
            },
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn set_schedules_and_fire_invokes_the_task() {
        let (ctx, mut rx) = ctx();
        let reply = set_timer(vec![json!(1), json!("say hi to the user")], ctx.clone())
            .await
            .unwrap();
        assert!(reply.as_str().unwrap().contains("Timer set for 1s"));
        assert_eq!(ctx.bus.active_timers(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let request = rx.try_recv().expect("timer should have invoked the task");
        assert_eq!(request.task, "say hi to the user");
        assert_eq!(request.context["source"], "timer");
        assert_eq!(ctx.bus.active_timers(), 0);
    }

    #[tokio::test]
    async fn set_rejects_non_positive_duration() {
        let (ctx, _rx) = ctx();
        assert!(set_timer(vec![json!(0), json!("x")], ctx.clone()).await.is_err());
        assert!(set_timer(vec![json!(-5), json!("x")], ctx).await.is_err());
    }

    #[tokio::test]
    async fn set_requires_a_task() {
        let (ctx, _rx) = ctx();
        assert!(set_timer(vec![json!(5)], ctx.clone()).await.is_err());
        assert!(set_timer(vec![json!(5), json!("   ")], ctx).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_reports_found_and_not_found() {
        let (ctx, _rx) = ctx();
        let reply = set_timer(vec![json!(60), json!("later")], ctx.clone())
            .await
            .unwrap();
        let id = reply
            .as_str()
            .unwrap()
            .split("ID: ")
            .nth(1)
            .unwrap()
            .split('.')
            .next()
            .unwrap()
            .to_string();

        let cancelled = cancel_timer(vec![json!(id.clone())], ctx.clone()).await.unwrap();
        assert!(cancelled.as_str().unwrap().contains("cancelled"));

        let again = cancel_timer(vec![json!(id)], ctx).await.unwrap();
        assert!(again.as_str().unwrap().contains("not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn list_shows_pending_tasks() {
        let (ctx, _rx) = ctx();
        set_timer(vec![json!(60), json!("water the plants")], ctx.clone())
            .await
            .unwrap();

        let listed = list_timers(vec![], ctx).await.unwrap();
        let text = listed.as_str().unwrap();
        assert!(text.contains("water the plants"));
        assert!(text.contains("s left"));
    }

    #[tokio::test]
    async fn list_empty_says_so() {
        let (ctx, _rx) = ctx();
        let listed = list_timers(vec![], ctx).await.unwrap();
        assert_eq!(listed, json!("No active timers."));
    }
}
