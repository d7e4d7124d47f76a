//! # Graph
//!
//! Owns every node and edge of one assembled topology. Linking is monotonic:
//! an edge, once created, stays until the whole graph is released. Edges are
//! created eagerly during assembly, or lazily when a source discovers its
//! output ports at runtime and when fan-out branches are attached.

use std::fmt;

use tracing::trace;

use crate::node::{Direction, MediaKind, Node, NodeId, Port, PortRef};
use crate::factory::PortPolicy;
use crate::{LinkError, ModeError, PortRequestError};

/// Handle to an edge inside a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeId(pub(crate) usize);

/// A completed link between an output port and an input port.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub from: PortRef,
    pub to: PortRef,
}

/// Which of the two disjoint source topologies a graph was built for.
///
/// Chosen once at assembly, immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Demultiplexed container file.
    FileSource,
    /// Live sensor feed.
    SensorSource,
}

impl SourceMode {
    pub fn selector(self) -> u32 {
        match self {
            SourceMode::FileSource => 1,
            SourceMode::SensorSource => 2,
        }
    }
}

impl TryFrom<u32> for SourceMode {
    type Error = ModeError;

    fn try_from(selector: u32) -> Result<Self, ModeError> {
        match selector {
            1 => Ok(SourceMode::FileSource),
            2 => Ok(SourceMode::SensorSource),
            other => Err(ModeError { selector: other }),
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::FileSource => write!(f, "file-source"),
            SourceMode::SensorSource => write!(f, "sensor-source"),
        }
    }
}

/// A link whose upstream half cannot be created until the source node has
/// inspected the stream. The downstream input waits unlinked; the resolver
/// completes the edge on discovery.
#[derive(Debug, Clone, Copy)]
pub struct DeferredLink {
    pub source: NodeId,
    pub target: PortRef,
}

/// The directed graph of processing stages.
#[derive(Debug)]
pub struct Graph {
    mode: SourceMode,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    deferred: Vec<DeferredLink>,
}

impl Graph {
    pub fn new(mode: SourceMode) -> Self {
        Self {
            mode,
            nodes: Vec::new(),
            edges: Vec::new(),
            deferred: Vec::new(),
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    /// Move a node into the graph, taking ownership. Returns its handle.
    pub fn add(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        trace!(node = node.name(), ty = node.type_name(), %id, "node added");
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Reference to a static input port.
    pub fn input(&self, node: NodeId, index: usize) -> PortRef {
        PortRef {
            node,
            direction: Direction::Input,
            index,
        }
    }

    /// Reference to a static output port.
    pub fn output(&self, node: NodeId, index: usize) -> PortRef {
        PortRef {
            node,
            direction: Direction::Output,
            index,
        }
    }

    pub fn port(&self, r: PortRef) -> Option<&Port> {
        let node = self.nodes.get(r.node.0)?;
        match r.direction {
            Direction::Input => node.inputs.get(r.index),
            Direction::Output => node.outputs.get(r.index),
        }
    }

    fn port_mut(&mut self, r: PortRef) -> Option<&mut Port> {
        let node = self.nodes.get_mut(r.node.0)?;
        match r.direction {
            Direction::Input => node.inputs.get_mut(r.index),
            Direction::Output => node.outputs.get_mut(r.index),
        }
    }

    pub fn is_linked(&self, r: PortRef) -> bool {
        self.port(r).is_some_and(Port::is_linked)
    }

    /// Human-readable `node.port` label for diagnostics.
    pub fn port_label(&self, r: PortRef) -> String {
        match self.port(r) {
            Some(port) => format!("{}.{}", self.node(r.node).name(), port.name),
            None => format!("{}.<missing {}>", r.node, r),
        }
    }

    /// Create an edge from an output port to an input port.
    ///
    /// Both ports must exist, be free and carry compatible media kinds.
    pub fn link(&mut self, from: PortRef, to: PortRef) -> Result<EdgeId, LinkError> {
        let src = self.port(from).ok_or(LinkError::NoSuchPort { port: from })?;
        let dst = self.port(to).ok_or(LinkError::NoSuchPort { port: to })?;

        if from.direction != Direction::Output || to.direction != Direction::Input {
            return Err(LinkError::Direction {
                from: self.port_label(from),
                to: self.port_label(to),
            });
        }
        if src.is_linked() {
            return Err(LinkError::Occupied {
                port: self.port_label(from),
            });
        }
        if dst.is_linked() {
            return Err(LinkError::Occupied {
                port: self.port_label(to),
            });
        }
        if !src.kind.compatible_with(dst.kind) {
            return Err(LinkError::Incompatible {
                from: self.port_label(from),
                from_kind: src.kind,
                to: self.port_label(to),
                to_kind: dst.kind,
            });
        }

        let id = EdgeId(self.edges.len());
        self.edges.push(Edge { from, to });
        // Both lookups were verified above.
        if let Some(p) = self.port_mut(from) {
            p.link = Some(id);
        }
        if let Some(p) = self.port_mut(to) {
            p.link = Some(id);
        }
        trace!(
            from = self.port_label(from),
            to = self.port_label(to),
            "ports linked"
        );
        Ok(id)
    }

    /// Link a chain of nodes output-to-input, first static port each.
    pub fn link_chain(&mut self, nodes: &[NodeId]) -> Result<(), LinkError> {
        for pair in nodes.windows(2) {
            self.link(self.output(pair[0], 0), self.input(pair[1], 0))?;
        }
        Ok(())
    }

    /// Request a new output port on a node with an on-request output policy.
    pub fn request_output(&mut self, node: NodeId) -> Result<PortRef, PortRequestError> {
        self.request_port(node, Direction::Output)
    }

    /// Request a new input port on a node with an on-request input policy.
    pub fn request_input(&mut self, node: NodeId) -> Result<PortRef, PortRequestError> {
        self.request_port(node, Direction::Input)
    }

    fn request_port(
        &mut self,
        id: NodeId,
        direction: Direction,
    ) -> Result<PortRef, PortRequestError> {
        let node = &self.nodes[id.0];
        let (policy, kind, ports_len, base) = match direction {
            Direction::Input => (node.input_policy, node.input_kind, node.inputs.len(), "sink"),
            Direction::Output => (
                node.output_policy,
                node.output_kind,
                node.outputs.len(),
                "src",
            ),
        };

        let max = match policy {
            PortPolicy::OnRequest { max } => max,
            _ => {
                return Err(PortRequestError::NotRequestable {
                    node: node.name().to_string(),
                    direction,
                });
            }
        };
        if let Some(limit) = max
            && ports_len >= limit
        {
            return Err(PortRequestError::Exhausted {
                node: node.name().to_string(),
                limit,
            });
        }

        let name = format!("{base}_{ports_len}");
        let port = Port::new(name, direction, kind);
        let node = &mut self.nodes[id.0];
        let index = match direction {
            Direction::Input => {
                node.inputs.push(port);
                node.inputs.len() - 1
            }
            Direction::Output => {
                node.outputs.push(port);
                node.outputs.len() - 1
            }
        };
        Ok(PortRef {
            node: id,
            direction,
            index,
        })
    }

    /// Add an output port whose identity was discovered at runtime.
    ///
    /// Only valid for nodes with a dynamic output policy.
    pub fn add_discovered_output(
        &mut self,
        id: NodeId,
        kind: MediaKind,
        name: impl Into<String>,
    ) -> Result<PortRef, PortRequestError> {
        let node = &self.nodes[id.0];
        if node.output_policy != PortPolicy::Dynamic {
            return Err(PortRequestError::NotRequestable {
                node: node.name().to_string(),
                direction: Direction::Output,
            });
        }
        let node = &mut self.nodes[id.0];
        node.outputs.push(Port::new(name, Direction::Output, kind));
        Ok(PortRef {
            node: id,
            direction: Direction::Output,
            index: self.nodes[id.0].outputs.len() - 1,
        })
    }

    /// Whether a node's output ports appear only through runtime discovery.
    pub fn has_dynamic_outputs(&self, id: NodeId) -> bool {
        self.nodes[id.0].output_policy == PortPolicy::Dynamic
    }

    /// Record a link that can only be completed after runtime discovery.
    pub fn defer_link(&mut self, source: NodeId, target: PortRef) {
        self.deferred.push(DeferredLink { source, target });
    }

    pub fn deferred(&self) -> &[DeferredLink] {
        &self.deferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{NodeFactory, Registry};

    fn graph_with(names: &[(&str, &str)]) -> (Graph, Vec<NodeId>) {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut graph = Graph::new(SourceMode::SensorSource);
        let ids = names
            .iter()
            .map(|(ty, name)| graph.add(factory.create(ty, *name).unwrap()))
            .collect();
        (graph, ids)
    }

    #[test]
    fn link_chain_creates_edges() {
        let (mut graph, ids) = graph_with(&[
            ("video-convert", "c0"),
            ("inference", "infer0"),
            ("overlay", "osd0"),
        ]);
        graph.link_chain(&ids).unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.is_linked(graph.output(ids[0], 0)));
        assert!(graph.is_linked(graph.input(ids[2], 0)));
    }

    #[test]
    fn double_link_is_rejected() {
        let (mut graph, ids) = graph_with(&[
            ("video-convert", "c0"),
            ("video-convert", "c1"),
            ("video-convert", "c2"),
        ]);
        graph
            .link(graph.output(ids[0], 0), graph.input(ids[1], 0))
            .unwrap();
        let err = graph
            .link(graph.output(ids[2], 0), graph.input(ids[1], 0))
            .unwrap_err();
        assert!(matches!(err, LinkError::Occupied { .. }));
    }

    #[test]
    fn incompatible_kinds_are_rejected() {
        let (mut graph, ids) = graph_with(&[("file-reader", "src0"), ("stream-parser", "parse0")]);
        // file-reader emits container data, the parser wants video.
        let err = graph
            .link(graph.output(ids[0], 0), graph.input(ids[1], 0))
            .unwrap_err();
        assert!(matches!(err, LinkError::Incompatible { .. }));
    }

    #[test]
    fn splitter_requests_are_capped_at_three() {
        let (mut graph, ids) = graph_with(&[("stream-splitter", "tee0")]);
        for i in 0..3 {
            let port = graph.request_output(ids[0]).unwrap();
            assert_eq!(port.index, i);
        }
        let err = graph.request_output(ids[0]).unwrap_err();
        assert!(matches!(err, PortRequestError::Exhausted { limit: 3, .. }));
    }

    #[test]
    fn aggregator_accepts_exactly_one_requested_input() {
        let (mut graph, ids) = graph_with(&[("stream-aggregator", "mux0")]);
        let port = graph.request_input(ids[0]).unwrap();
        assert_eq!(graph.port(port).unwrap().name, "sink_0");
        let err = graph.request_input(ids[0]).unwrap_err();
        assert!(matches!(err, PortRequestError::Exhausted { limit: 1, .. }));
    }

    #[test]
    fn static_node_is_not_requestable() {
        let (mut graph, ids) = graph_with(&[("video-convert", "c0")]);
        let err = graph.request_output(ids[0]).unwrap_err();
        assert!(matches!(err, PortRequestError::NotRequestable { .. }));
    }

    #[test]
    fn invalid_selector_is_a_mode_error() {
        let err = SourceMode::try_from(3).unwrap_err();
        assert_eq!(err.selector, 3);
        assert!(SourceMode::try_from(1).is_ok());
        assert!(SourceMode::try_from(2).is_ok());
    }
}
