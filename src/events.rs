// SPDX-License-Identifier: MIT
//! Domain events the supervisor emits, and the bus that carries them.
//!
//! The bus is the only channel the supervisor reports through: output
//! chunks, exits, and watchdog firings all arrive here. Callers that need
//! a synchronous answer get it from `start`/`abort` return values; every
//! process outcome is asynchronous and observed on the bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::identity::TaskIdentity;

/// Which child stream a [`TaskEvent::TaskOutput`] chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Why a task's lifetime ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExitReason {
    /// The process exited on its own with a status code.
    Exited { code: i32 },
    /// The process was terminated by a signal — abort, watchdog, or an
    /// external kill. No status code is available.
    Killed,
    /// The OS refused to spawn the process (bad command, missing working
    /// directory). Exit-like by contract: no process ever existed.
    SpawnFailed { error: String },
}

/// All event kinds the supervisor emits.
///
/// Per task lifetime: zero or more `TaskOutput`, at most one
/// `WatchdogFired`, and exactly one `TaskExited` — always the last event
/// observed for that lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// One chunk of child output, in intra-stream arrival order. Chunk
    /// boundaries carry no meaning — consumers must not rely on them.
    TaskOutput {
        identity: TaskIdentity,
        chunk: String,
        stream: OutputStream,
    },
    /// Terminal event for one task lifetime. The registry slot is already
    /// vacated when this is observed.
    TaskExited {
        identity: TaskIdentity,
        reason: ExitReason,
    },
    /// The watchdog expired for a still-running task. Informational — the
    /// termination itself goes through the normal abort path and still
    /// produces a `TaskExited`.
    WatchdogFired { identity: TaskIdentity },
}

impl TaskEvent {
    pub fn identity(&self) -> &TaskIdentity {
        match self {
            Self::TaskOutput { identity, .. }
            | Self::TaskExited { identity, .. }
            | Self::WatchdogFired { identity } => identity,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskOutput { .. } => "task_output",
            Self::TaskExited { .. } => "task_exited",
            Self::WatchdogFired { .. } => "watchdog_fired",
        }
    }

    /// Serialize for sinks that forward events as JSON notifications.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Broadcasts typed task events to every subscriber.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. No subscribers is fine.
    pub fn emit(&self, event: TaskEvent) {
        trace!(kind = event.kind(), identity = %event.identity(), "task event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(TaskEvent::WatchdogFired {
            identity: TaskIdentity::new("p1", "start"),
        });
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind(), "watchdog_fired");
        assert_eq!(ev.identity(), &TaskIdentity::new("p1", "start"));
    }

    #[test]
    fn test_event_json_shape() {
        let ev = TaskEvent::TaskExited {
            identity: TaskIdentity::new("p1", "start"),
            reason: ExitReason::Exited { code: 0 },
        };
        let json = ev.to_json();
        assert_eq!(json["event_type"], "task_exited");
        assert_eq!(json["reason"]["reason"], "exited");
        assert_eq!(json["reason"]["code"], 0);
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.emit(TaskEvent::WatchdogFired {
            identity: TaskIdentity::new("p", "t"),
        });
    }
}
