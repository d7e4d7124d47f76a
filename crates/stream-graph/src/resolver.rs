//! # Dynamic Port Resolver
//!
//! Completes deferred links when a demultiplexing node discovers its actual
//! output ports at runtime. The resolver is registered by the assembler
//! before assembly completes and captures only the one downstream input it
//! must satisfy, never the whole graph.
//!
//! A container may expose several elementary streams; only the first
//! discovered port whose media kind matches the consumed input is bound.
//! Re-notification for an already-satisfied input is ignored, and an
//! incompatible port is a non-fatal warning: the pipeline proceeds, but that
//! path permanently receives no data.

use tracing::{debug, warn};

use crate::graph::{EdgeId, Graph};
use crate::node::{MediaKind, NodeId, PortRef};
use crate::{LinkError, PortRequestError};

/// Notification payload: a source node has determined the identity of a
/// previously-unknown output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredPort {
    /// Elementary stream index inside the container.
    pub stream_id: u8,
    pub kind: MediaKind,
}

/// Result of offering one discovered port to the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The discovered port was linked to the waiting input.
    Linked { edge: EdgeId, port: PortRef },
    /// The waiting input is already satisfied; notification ignored.
    AlreadyLinked,
    /// The discovered port cannot feed the waiting input. The port stays
    /// unlinked and the pipeline carries on without it.
    Incompatible,
}

/// Observer completing one deferred source-side link.
#[derive(Debug, Clone, Copy)]
pub struct DynamicPortResolver {
    source: NodeId,
    target: PortRef,
}

impl DynamicPortResolver {
    /// Register a resolver for `source`'s future output ports, to satisfy
    /// `target`. Records the deferred link on the graph so the execution
    /// substrate knows the input must wait.
    pub fn register(
        graph: &mut Graph,
        source: NodeId,
        target: PortRef,
    ) -> Result<Self, PortRequestError> {
        if !graph.has_dynamic_outputs(source) {
            return Err(PortRequestError::NotRequestable {
                node: graph.node(source).name().to_string(),
                direction: crate::node::Direction::Output,
            });
        }
        graph.defer_link(source, target);
        Ok(Self { source, target })
    }

    /// Rebuild a resolver from a recorded deferred link.
    pub fn from_deferred(link: &crate::graph::DeferredLink) -> Self {
        Self {
            source: link.source,
            target: link.target,
        }
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn target(&self) -> PortRef {
        self.target
    }

    /// Handle one discovery notification.
    ///
    /// Idempotent: once the waiting input is linked, every further
    /// notification is ignored, including duplicates for the same elementary
    /// stream.
    pub fn resolve(&self, graph: &mut Graph, discovered: DiscoveredPort) -> ResolveOutcome {
        if graph.is_linked(self.target) {
            debug!(
                target = graph.port_label(self.target),
                stream = discovered.stream_id,
                "input already linked, ignoring discovery"
            );
            return ResolveOutcome::AlreadyLinked;
        }

        let name = format!("{}_{}", discovered.kind.prefix(), discovered.stream_id);
        let port = match graph.add_discovered_output(self.source, discovered.kind, name) {
            Ok(port) => port,
            Err(e) => {
                // Registration validated the policy; reaching this means the
                // node was swapped out from under us.
                warn!(source = %self.source, error = %e, "discovery on non-dynamic node");
                return ResolveOutcome::Incompatible;
            }
        };

        match graph.link(port, self.target) {
            Ok(edge) => {
                debug!(
                    from = graph.port_label(port),
                    to = graph.port_label(self.target),
                    "deferred link completed"
                );
                ResolveOutcome::Linked { edge, port }
            }
            Err(LinkError::Incompatible {
                from_kind, to_kind, ..
            }) => {
                warn!(
                    from = graph.port_label(port),
                    to = graph.port_label(self.target),
                    %from_kind,
                    %to_kind,
                    "discovered port is incompatible, leaving unlinked"
                );
                ResolveOutcome::Incompatible
            }
            Err(e) => {
                warn!(error = %e, "deferred link failed, leaving unlinked");
                ResolveOutcome::Incompatible
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{NodeFactory, Registry};
    use crate::graph::SourceMode;

    fn demux_graph() -> (Graph, NodeId, PortRef) {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut graph = Graph::new(SourceMode::FileSource);
        let demux = graph.add(factory.create("container-demux", "demux0").unwrap());
        let parser = graph.add(factory.create("stream-parser", "parse0").unwrap());
        let target = graph.input(parser, 0);
        (graph, demux, target)
    }

    #[test]
    fn first_matching_port_is_linked() {
        let (mut graph, demux, target) = demux_graph();
        let resolver = DynamicPortResolver::register(&mut graph, demux, target).unwrap();

        let outcome = resolver.resolve(
            &mut graph,
            DiscoveredPort {
                stream_id: 0,
                kind: MediaKind::Video,
            },
        );
        assert!(matches!(outcome, ResolveOutcome::Linked { .. }));
        assert!(graph.is_linked(target));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn duplicate_discovery_is_idempotent() {
        let (mut graph, demux, target) = demux_graph();
        let resolver = DynamicPortResolver::register(&mut graph, demux, target).unwrap();
        let video = DiscoveredPort {
            stream_id: 0,
            kind: MediaKind::Video,
        };

        assert!(matches!(
            resolver.resolve(&mut graph, video),
            ResolveOutcome::Linked { .. }
        ));
        assert_eq!(
            resolver.resolve(&mut graph, video),
            ResolveOutcome::AlreadyLinked
        );
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn second_matching_stream_is_left_unlinked() {
        let (mut graph, demux, target) = demux_graph();
        let resolver = DynamicPortResolver::register(&mut graph, demux, target).unwrap();

        for id in 0..2 {
            resolver.resolve(
                &mut graph,
                DiscoveredPort {
                    stream_id: id,
                    kind: MediaKind::Video,
                },
            );
        }
        // One edge; the second video stream is silently dropped.
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.node(demux).outputs().len(), 1);
    }

    #[test]
    fn incompatible_port_warns_and_stays_dark() {
        let (mut graph, demux, target) = demux_graph();
        let resolver = DynamicPortResolver::register(&mut graph, demux, target).unwrap();

        let outcome = resolver.resolve(
            &mut graph,
            DiscoveredPort {
                stream_id: 0,
                kind: MediaKind::Audio,
            },
        );
        assert_eq!(outcome, ResolveOutcome::Incompatible);
        assert!(!graph.is_linked(target));

        // A later compatible stream still binds.
        let outcome = resolver.resolve(
            &mut graph,
            DiscoveredPort {
                stream_id: 1,
                kind: MediaKind::Video,
            },
        );
        assert!(matches!(outcome, ResolveOutcome::Linked { .. }));
    }

    #[test]
    fn register_rejects_static_nodes() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut graph = Graph::new(SourceMode::FileSource);
        let convert = graph.add(factory.create("video-convert", "c0").unwrap());
        let parser = graph.add(factory.create("stream-parser", "p0").unwrap());
        let target = graph.input(parser, 0);
        let err = DynamicPortResolver::register(&mut graph, convert, target).unwrap_err();
        assert!(matches!(err, PortRequestError::NotRequestable { .. }));
    }
}
