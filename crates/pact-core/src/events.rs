//! Instance lifecycle events.
//!
//! Every dispatch emits `act-in` on entry into the handler and either
//! `act-out` or `act-err` on completion; the instance itself emits
//! `ready`, `close` and `error`. Consumers subscribe through a
//! broadcast channel; emission never blocks and a lagging consumer
//! misses events rather than stalling dispatch.

use crate::error::ActError;
use serde_json::Value;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// One instance lifecycle event.
#[derive(Debug, Clone)]
pub enum InstanceEvent {
    /// A dispatch is entering its handler; carries the call message
    /// including `meta$`.
    ActIn {
        /// The call message.
        msg: Value,
    },
    /// A dispatch completed successfully.
    ActOut {
        /// The call message.
        msg: Value,
        /// The handler result.
        result: Value,
    },
    /// A dispatch failed.
    ActErr {
        /// The call message, when resolution got that far.
        msg: Option<Value>,
        /// The failure.
        err: ActError,
    },
    /// The root gate became quiescent for a `ready()` caller.
    Ready,
    /// The instance closed.
    Close,
    /// A fatal error terminated the instance.
    Error {
        /// The fatal failure.
        err: ActError,
    },
}

/// Broadcast hub for [`InstanceEvent`]s.
pub(crate) struct EventHub {
    tx: broadcast::Sender<InstanceEvent>,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.tx.subscribe()
    }

    /// Emits an event; with no subscribers this is a no-op.
    pub(crate) fn emit(&self, event: InstanceEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();

        hub.emit(InstanceEvent::ActIn {
            msg: json!({"role": "x"}),
        });
        hub.emit(InstanceEvent::Ready);

        match rx.recv().await.expect("first event") {
            InstanceEvent::ActIn { msg } => assert_eq!(msg["role"], "x"),
            other => panic!("expected ActIn, got {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.expect("second event"),
            InstanceEvent::Ready
        ));
    }

    #[test]
    fn emit_without_subscribers_is_noop() {
        let hub = EventHub::new();
        hub.emit(InstanceEvent::Close);
    }

    #[tokio::test]
    async fn multiple_subscribers_see_the_same_events() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.emit(InstanceEvent::Close);

        assert!(matches!(
            a.recv().await.expect("event for a"),
            InstanceEvent::Close
        ));
        assert!(matches!(
            b.recv().await.expect("event for b"),
            InstanceEvent::Close
        ));
    }
}
