// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! gitgov-bus
//!
//! The governance event surface: the pull scheduler and sync engine
//! announce state changes and conflicts here, the agent runner announces
//! run lifecycle, and consumers (TUIs, daemons) watch without coupling to
//! either.
//!
//! Conflicts get one extra guarantee beyond plain broadcast: the bus
//! latches the most recent unresolved conflict, so a consumer that
//! attaches *after* the conflict was detected still finds it via
//! [`EventBus::pending_conflict`]. The latch clears when a
//! `state.updated` event shows the state moved past it.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Events kept per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An observable event on the governance plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum GovEvent {
    /// A pull brought in remote changes (or confirmed there were none).
    #[serde(rename = "state.updated")]
    StateUpdated {
        /// Whether the pull changed local state.
        has_changes: bool,
    },

    /// A rebase conflict was detected during push or pull.
    #[serde(rename = "conflict.detected")]
    ConflictDetected {
        /// Structured conflict description from the sync engine.
        conflict: serde_json::Value,
    },

    /// An agent run started.
    #[serde(rename = "agent:started")]
    AgentStarted {
        /// The agent being invoked.
        agent_id: String,
        /// Unique run identifier.
        run_id: String,
    },

    /// An agent run finished successfully.
    #[serde(rename = "agent:completed")]
    AgentCompleted {
        /// The agent that ran.
        agent_id: String,
        /// Unique run identifier.
        run_id: String,
        /// The execution record written for the run.
        execution_record_id: String,
    },

    /// An agent run failed.
    #[serde(rename = "agent:error")]
    AgentError {
        /// The agent that ran.
        agent_id: String,
        /// Unique run identifier.
        run_id: String,
        /// Short failure description.
        error: String,
    },
}

impl GovEvent {
    /// The wire name of this event kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            GovEvent::StateUpdated { .. } => "state.updated",
            GovEvent::ConflictDetected { .. } => "conflict.detected",
            GovEvent::AgentStarted { .. } => "agent:started",
            GovEvent::AgentCompleted { .. } => "agent:completed",
            GovEvent::AgentError { .. } => "agent:error",
        }
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// The governance event bus.
///
/// Cheap to clone; all clones publish into the same channel and share the
/// same conflict latch. Publishing with no watchers is fine — events are
/// advisory, and the one event whose loss would matter (an unresolved
/// conflict) survives in the latch.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GovEvent>,
    pending_conflict: Arc<Mutex<Option<serde_json::Value>>>,
}

impl EventBus {
    /// A bus with the default per-subscriber capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::bounded(CHANNEL_CAPACITY)
    }

    /// A bus keeping at most `capacity` events per subscriber.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            pending_conflict: Arc::new(Mutex::new(None)),
        }
    }

    /// Publish an event to every current watcher.
    ///
    /// A `conflict.detected` arms the conflict latch; a `state.updated`
    /// clears it (the state moved past whatever was conflicted).
    pub fn publish(&self, event: GovEvent) {
        match &event {
            GovEvent::ConflictDetected { conflict } => {
                *self.pending_conflict.lock().expect("conflict latch") = Some(conflict.clone());
            }
            GovEvent::StateUpdated { .. } => {
                *self.pending_conflict.lock().expect("conflict latch") = None;
            }
            _ => {}
        }
        let _ = self.tx.send(event);
    }

    /// Watch future events.
    #[must_use]
    pub fn subscribe(&self) -> EventWatch {
        EventWatch {
            rx: self.tx.subscribe(),
            missed: 0,
        }
    }

    /// The most recent conflict no `state.updated` has superseded, if
    /// any. Lets a consumer that attached late decide whether resolution
    /// is still owed.
    #[must_use]
    pub fn pending_conflict(&self) -> Option<serde_json::Value> {
        self.pending_conflict.lock().expect("conflict latch").clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Watch
// ---------------------------------------------------------------------------

/// A watcher over the bus.
///
/// A slow watcher loses the oldest buffered events rather than stalling
/// publishers; how many were lost is tracked per watcher in
/// [`EventWatch::missed`].
pub struct EventWatch {
    rx: broadcast::Receiver<GovEvent>,
    missed: u64,
}

impl EventWatch {
    /// Wait for the next event. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<GovEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.missed += n,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting, if one is ready.
    pub fn try_recv(&mut self) -> Option<GovEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.missed += n,
                Err(_) => return None,
            }
        }
    }

    /// Events this watcher lost to lag.
    #[must_use]
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict_event(file: &str) -> GovEvent {
        GovEvent::ConflictDetected {
            conflict: serde_json::json!({
                "type": "rebase_conflict",
                "affectedFiles": [file],
            }),
        }
    }

    #[tokio::test]
    async fn publish_reaches_watcher() {
        let bus = EventBus::new();
        let mut watch = bus.subscribe();
        bus.publish(GovEvent::StateUpdated { has_changes: true });
        let event = watch.next().await.unwrap();
        assert_eq!(event, GovEvent::StateUpdated { has_changes: true });
        assert_eq!(watch.missed(), 0);
    }

    #[tokio::test]
    async fn all_watchers_see_every_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(GovEvent::AgentStarted {
            agent_id: "1700000000-agent-review".into(),
            run_id: "r1".into(),
        });
        assert!(a.next().await.is_some());
        assert!(b.next().await.is_some());
    }

    #[test]
    fn conflict_latch_arms_for_late_watchers() {
        let bus = EventBus::new();
        // Nobody is watching when the conflict lands.
        bus.publish(conflict_event(".gitgov/tasks/1700000000-task-x.json"));

        let pending = bus.pending_conflict().unwrap();
        assert_eq!(pending["type"], "rebase_conflict");

        // Clones share the latch.
        assert!(bus.clone().pending_conflict().is_some());
    }

    #[test]
    fn state_update_clears_the_latch() {
        let bus = EventBus::new();
        bus.publish(conflict_event(".gitgov/tasks/1700000000-task-x.json"));
        assert!(bus.pending_conflict().is_some());

        bus.publish(GovEvent::StateUpdated { has_changes: true });
        assert!(bus.pending_conflict().is_none());
    }

    #[test]
    fn newer_conflict_replaces_older() {
        let bus = EventBus::new();
        bus.publish(conflict_event(".gitgov/tasks/1700000000-task-old.json"));
        bus.publish(conflict_event(".gitgov/tasks/1700000000-task-new.json"));
        let pending = bus.pending_conflict().unwrap();
        assert_eq!(
            pending["affectedFiles"][0],
            ".gitgov/tasks/1700000000-task-new.json"
        );
    }

    #[test]
    fn agent_events_do_not_touch_the_latch() {
        let bus = EventBus::new();
        bus.publish(conflict_event(".gitgov/tasks/1700000000-task-x.json"));
        bus.publish(GovEvent::AgentError {
            agent_id: "1700000000-agent-review".into(),
            run_id: "r1".into(),
            error: "boom".into(),
        });
        assert!(bus.pending_conflict().is_some());
    }

    #[tokio::test]
    async fn slow_watcher_counts_missed_events() {
        let bus = EventBus::bounded(1);
        let mut watch = bus.subscribe();
        // Two publishes into a one-slot buffer: the first is evicted.
        bus.publish(GovEvent::StateUpdated { has_changes: false });
        bus.publish(GovEvent::StateUpdated { has_changes: true });

        let event = watch.try_recv().unwrap();
        assert_eq!(event, GovEvent::StateUpdated { has_changes: true });
        assert_eq!(watch.missed(), 1);
    }

    #[test]
    fn event_kinds_use_dotted_and_prefixed_names() {
        let event = GovEvent::ConflictDetected {
            conflict: serde_json::json!({"type": "rebase_conflict"}),
        };
        assert_eq!(event.kind(), "conflict.detected");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "conflict.detected");

        let event = GovEvent::AgentError {
            agent_id: "1700000000-agent-review".into(),
            run_id: "r1".into(),
            error: "boom".into(),
        };
        assert_eq!(serde_json::to_value(&event).unwrap()["kind"], "agent:error");
    }
}
