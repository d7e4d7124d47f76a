//! # Event Bus
//!
//! A single ordered channel carrying lifecycle events from the graph to the
//! control loop. Workers post from blocking context; the loop consumes
//! asynchronously. Exactly one terminal event (`StreamEnd` or `Error`) ends
//! a run; everything else is informational.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

/// An ephemeral lifecycle event, consumed once by the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// The graph has fully drained: every sink saw the end marker.
    StreamEnd,
    /// A stage failed. The stream cannot complete normally.
    Error { node: String, message: String },
    /// Something non-fatal worth surfacing (e.g. an incompatible discovered
    /// port left unlinked).
    Warning { node: String, message: String },
    /// Periodic delivery counter from a sink.
    Progress { node: String, buffers: u64 },
}

/// Posting half of the bus, cloned into every worker.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<BusEvent>,
}

impl EventBus {
    /// Bounded bus; the receiver half goes to the control loop.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BusEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Post from a blocking worker. A closed bus means the loop is gone and
    /// the run is already over; the event is dropped silently.
    pub fn post(&self, event: BusEvent) {
        if self.tx.blocking_send(event).is_err() {
            debug!("event bus closed, event dropped");
        }
    }

    /// Post from async context.
    pub async fn post_async(&self, event: BusEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("event bus closed, event dropped");
        }
    }

    pub fn error(&self, node: &str, message: impl Into<String>) {
        self.post(BusEvent::Error {
            node: node.to_string(),
            message: message.into(),
        });
    }

    pub fn warning(&self, node: &str, message: impl Into<String>) {
        self.post(BusEvent::Warning {
            node: node.to_string(),
            message: message.into(),
        });
    }
}

/// Aggregates per-sink drain signals into the single `StreamEnd` event.
///
/// The graph self-reports drained only once every terminal sink has consumed
/// the end marker, so in-flight data ahead of the marker is never cut off.
pub struct DrainLatch {
    remaining: AtomicUsize,
    bus: EventBus,
}

impl DrainLatch {
    pub fn new(sinks: usize, bus: EventBus) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(sinks),
            bus,
        })
    }

    /// Called by a sink worker after it consumed the end marker.
    pub fn sink_drained(&self, node: &str) {
        let before = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug!(node, remaining = before.saturating_sub(1), "sink drained");
        if before == 1 {
            self.bus.post(BusEvent::StreamEnd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_sink_posts_stream_end() {
        let (bus, mut rx) = EventBus::channel(8);
        let latch = DrainLatch::new(3, bus);

        let l = latch.clone();
        tokio::task::spawn_blocking(move || {
            l.sink_drained("display0");
            l.sink_drained("net0");
            l.sink_drained("file0");
        })
        .await
        .unwrap();

        assert_eq!(rx.recv().await, Some(BusEvent::StreamEnd));
        // One StreamEnd total, not one per sink.
        assert!(rx.try_recv().is_err());
    }
}
