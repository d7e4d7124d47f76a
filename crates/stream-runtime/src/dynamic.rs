//! Runtime side of deferred linking.
//!
//! At activation the input channel of a deferred edge's target is created
//! like any other, but its sender is parked in a [`PendingLink`] instead of
//! being handed to an upstream worker. When the demultiplexer discovers its
//! ports, the [`DiscoveryHook`] runs the graph-level resolver under the
//! graph lock and releases the sender exactly once, so it is safe against a first
//! buffer racing the discovery of a second stream.

use std::sync::Arc;

use parking_lot::Mutex;
use stream_graph::{DiscoveredPort, DynamicPortResolver, Graph, ResolveOutcome};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::buffer::Item;
use crate::bus::EventBus;

/// Parked sender for an input waiting on discovery.
pub struct PendingLink {
    sender: Mutex<Option<mpsc::Sender<Item>>>,
}

impl PendingLink {
    pub fn new(sender: mpsc::Sender<Item>) -> Arc<Self> {
        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
        })
    }

    /// Hand out the sender. Yields `Some` exactly once.
    pub fn take(&self) -> Option<mpsc::Sender<Item>> {
        self.sender.lock().take()
    }

    /// Drop a never-claimed sender so the waiting worker can observe
    /// upstream closure at teardown.
    pub fn release(&self) {
        *self.sender.lock() = None;
    }
}

/// Observer handed to a demultiplexing stage; one per deferred link.
///
/// Captures the resolver and the parked sender, not the whole graph
/// structure; the shared handle is only used to record the completed edge.
pub struct DiscoveryHook {
    graph: Arc<Mutex<Graph>>,
    resolver: DynamicPortResolver,
    pending: Arc<PendingLink>,
    bus: EventBus,
    node: String,
}

impl DiscoveryHook {
    pub fn new(
        graph: Arc<Mutex<Graph>>,
        resolver: DynamicPortResolver,
        pending: Arc<PendingLink>,
        bus: EventBus,
        node: String,
    ) -> Self {
        Self {
            graph,
            resolver,
            pending,
            bus,
            node,
        }
    }

    /// Offer one discovered port. Returns the downstream sender when this
    /// discovery completed the deferred link.
    pub fn offer(&self, discovered: DiscoveredPort) -> Option<mpsc::Sender<Item>> {
        let mut graph = self.graph.lock();
        match self.resolver.resolve(&mut graph, discovered) {
            ResolveOutcome::Linked { port, .. } => {
                info!(
                    node = self.node,
                    port = graph.port_label(port),
                    "discovered port linked"
                );
                self.pending.take()
            }
            ResolveOutcome::AlreadyLinked => {
                debug!(
                    node = self.node,
                    stream = discovered.stream_id,
                    "discovery ignored, input already linked"
                );
                None
            }
            ResolveOutcome::Incompatible => {
                self.bus.warning(
                    &self.node,
                    format!(
                        "discovered {} stream {} is incompatible and stays unlinked",
                        discovered.kind, discovered.stream_id
                    ),
                );
                None
            }
        }
    }
}
