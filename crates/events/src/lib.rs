//! Process-wide event bus: broadcast publish/subscribe plus a cancelable
//! delayed-callback table.
//!
//! The bus is constructed once by the hosting process (daemon or standalone
//! front-end) and handed to components as an `Arc<EventBus>`; there is no
//! global singleton.  Timers drive deferred agent invocations: a tool
//! schedules a callback, and when it fires the callback re-enters the agent
//! through the invoke bridge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Broadcast channel capacity.  Old events are dropped when subscribers lag.
const BROADCAST_CAP: usize = 256;

/// Deferred work attached to a timer.  Errors are caught and logged by the
/// fire path; they never escape to crash the host process.
pub type TimerCallback = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusEvent {
    /// A scheduled timer fired.  Carries the timer id and its metadata.
    TimerFired { id: String, meta: serde_json::Value },
    /// Free-form event for plugins and interfaces.
    Custom { topic: String, payload: serde_json::Value },
}

/// Point-in-time view of one pending timer, for status/introspection only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub remaining_ms: u64,
    pub meta: serde_json::Value,
}

struct TimerEntry {
    handle: JoinHandle<()>,
    fire_at: DateTime<Utc>,
    meta: serde_json::Value,
}

/// Shared between the bus handle and every spawned timer task.  Holding only
/// a `Weak` from the task side means dropping the bus cancels nothing
/// explicitly but orphaned timers become no-ops.
struct BusInner {
    // Guards the timer table.  Never held across an await: the fire path
    // removes its entry under the lock, then acts.
    timers: Mutex<HashMap<String, TimerEntry>>,
    tx: broadcast::Sender<BusEvent>,
}

pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            inner: Arc::new(BusInner {
                timers: Mutex::new(HashMap::new()),
                tx,
            }),
        }
    }
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.inner.tx.subscribe()
    }

    pub fn publish(&self, event: BusEvent) {
        let _ = self.inner.tx.send(event);
    }

    /// Schedule `callback` to run after `delay`.  An existing timer with the
    /// same id is cancelled first: replace semantics, never duplicate.
    ///
    /// On fire the table entry is removed *before* anything else happens, so
    /// a cancel racing a fire resolves to exactly one of the two: whichever
    /// removes the entry proceeds, the other observes it gone and is a no-op.
    pub fn schedule_timeout(
        &self,
        id: impl Into<String>,
        delay: Duration,
        meta: serde_json::Value,
        callback: TimerCallback,
    ) -> String {
        let id = id.into();
        let bus: Weak<BusInner> = Arc::downgrade(&self.inner);
        let task_id = id.clone();
        let task_meta = meta.clone();

        // Hold the table lock across abort-old + spawn + insert so the new
        // task cannot observe the table before its own entry exists.
        let mut timers = self.inner.timers.lock().expect("timer table poisoned");
        if let Some(old) = timers.remove(&id) {
            old.handle.abort();
            debug!(id = %id, "replaced pending timer");
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(bus) = bus.upgrade() else { return };

            let entry = bus.timers.lock().expect("timer table poisoned").remove(&task_id);
            if entry.is_none() {
                // Cancelled (or replaced) between wake-up and here.
                return;
            }

            let _ = bus.tx.send(BusEvent::TimerFired {
                id: task_id.clone(),
                meta: task_meta,
            });
            if let Err(err) = callback().await {
                warn!(id = %task_id, ?err, "timer callback failed");
            }
        });

        timers.insert(
            id.clone(),
            TimerEntry {
                handle,
                fire_at: Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
                meta,
            },
        );
        id
    }

    /// Cancel a pending timer.  Idempotent: returns whether an entry existed
    /// and was removed.
    pub fn cancel_timeout(&self, id: &str) -> bool {
        let entry = self.inner.timers.lock().expect("timer table poisoned").remove(id);
        match entry {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Snapshot of all pending timers with their remaining delay.
    pub fn list_scheduled(&self) -> Vec<ScheduledTask> {
        let now = Utc::now();
        self.inner
            .timers
            .lock()
            .expect("timer table poisoned")
            .iter()
            .map(|(id, entry)| ScheduledTask {
                id: id.clone(),
                remaining_ms: (entry.fire_at - now).num_milliseconds().max(0) as u64,
                meta: entry.meta.clone(),
            })
            .collect()
    }

    pub fn active_timers(&self) -> usize {
        self.inner.timers.lock().expect("timer table poisoned").len()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> TimerCallback {
        Box::new(move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once_and_is_removed() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.schedule_timeout(
            "t1",
            Duration::from_millis(50),
            json!({}),
            counting_callback(counter.clone()),
        );
        assert_eq!(bus.active_timers(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_same_id_fires_exactly_once() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.schedule_timeout(
            "dup",
            Duration::from_millis(50),
            json!({}),
            counting_callback(counter.clone()),
        );
        bus.schedule_timeout(
            "dup",
            Duration::from_millis(80),
            json!({}),
            counting_callback(counter.clone()),
        );
        assert_eq!(bus.active_timers(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.schedule_timeout(
            "c1",
            Duration::from_millis(50),
            json!({}),
            counting_callback(counter.clone()),
        );
        assert!(bus.cancel_timeout("c1"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(bus.active_timers(), 0);
    }

    #[tokio::test]
    async fn cancel_unknown_id_returns_false() {
        let bus = EventBus::new();
        assert!(!bus.cancel_timeout("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let bus = EventBus::new();
        bus.schedule_timeout(
            "c2",
            Duration::from_secs(10),
            json!({}),
            counting_callback(Arc::new(AtomicUsize::new(0))),
        );
        assert!(bus.cancel_timeout("c2"));
        assert!(!bus.cancel_timeout("c2"));
    }

    #[tokio::test(start_paused = true)]
    async fn fire_publishes_timer_fired_with_meta() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.schedule_timeout(
            "m1",
            Duration::from_millis(10),
            json!({"task": "water the plants"}),
            Box::new(|| Box::pin(async { Ok(()) })),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        match rx.try_recv().expect("expected a timer event") {
            BusEvent::TimerFired { id, meta } => {
                assert_eq!(id, "m1");
                assert_eq!(meta["task"], "water the plants");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn list_scheduled_reports_remaining_time() {
        let bus = EventBus::new();
        bus.schedule_timeout(
            "l1",
            Duration::from_secs(30),
            json!({"task": "ping"}),
            Box::new(|| Box::pin(async { Ok(()) })),
        );

        let scheduled = bus.list_scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, "l1");
        assert!(scheduled[0].remaining_ms <= 30_000);
        assert_eq!(scheduled[0].meta["task"], "ping");
    }

    #[tokio::test(start_paused = true)]
    async fn callback_error_does_not_poison_the_bus() {
        let bus = EventBus::new();
        bus.schedule_timeout(
            "err",
            Duration::from_millis(10),
            json!({}),
            Box::new(|| Box::pin(async { anyhow::bail!("tool blew up") })),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The bus keeps working after a failed callback.
        let counter = Arc::new(AtomicUsize::new(0));
        bus.schedule_timeout(
            "ok",
            Duration::from_millis(10),
            json!({}),
            counting_callback(counter.clone()),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
