//! # Fan-out branches
//!
//! Builds the three output branches and attaches each to the shared
//! splitter, in the fixed display → network → file order. Order only
//! affects the splitter's internal port naming; once running, every branch
//! receives an identical stream replica concurrently.

use std::fmt;

use stream_graph::{EdgeId, Graph, NodeFactory, NodeId, PortRequestError};
use tracing::debug;

use crate::assemble::add_node;
use crate::config::PipelineConfig;
use crate::BuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Display,
    Network,
    File,
}

impl BranchKind {
    pub fn label(self) -> &'static str {
        match self {
            BranchKind::Display => "display",
            BranchKind::Network => "network",
            BranchKind::File => "file",
        }
    }
}

impl fmt::Display for BranchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Which branches an assembly attaches.
///
/// The full program runs all three; the minimal streaming variant is the
/// same topology with only the network branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSelection {
    All,
    NetworkOnly,
}

impl BranchSelection {
    pub fn kinds(self) -> &'static [BranchKind] {
        match self {
            BranchSelection::All => {
                &[BranchKind::Display, BranchKind::Network, BranchKind::File]
            }
            BranchSelection::NetworkOnly => &[BranchKind::Network],
        }
    }
}

/// One attached branch: entry node, terminal sink, and the splitter edge.
#[derive(Debug, Clone, Copy)]
pub struct AttachedBranch {
    pub kind: BranchKind,
    pub entry: NodeId,
    pub sink: NodeId,
    pub edge: EdgeId,
}

/// Request a new splitter output and link it to the branch entry.
///
/// Fails when the entry's input is already linked or the splitter has no
/// request ports left.
pub fn attach_branch(
    graph: &mut Graph,
    splitter: NodeId,
    entry: NodeId,
) -> Result<EdgeId, PortRequestError> {
    let entry_in = graph.input(entry, 0);
    if graph.is_linked(entry_in) {
        return Err(PortRequestError::AlreadyLinked {
            port: graph.port_label(entry_in),
        });
    }
    let out = graph.request_output(splitter)?;
    let edge = graph
        .link(out, entry_in)
        .map_err(|e| PortRequestError::Rejected {
            reason: e.to_string(),
        })?;
    debug!(
        splitter = graph.port_label(out),
        entry = graph.port_label(entry_in),
        "branch attached"
    );
    Ok(edge)
}

/// Build the selected branch chains and attach them in fixed order.
pub(crate) fn attach_selected(
    graph: &mut Graph,
    factory: &NodeFactory<'_>,
    splitter: NodeId,
    selection: BranchSelection,
    config: &PipelineConfig,
) -> Result<Vec<AttachedBranch>, BuildError> {
    let mut attached = Vec::new();
    for kind in selection.kinds() {
        let (entry, sink) = build_branch(graph, factory, *kind, config)?;
        let edge = attach_branch(graph, splitter, entry)?;
        attached.push(AttachedBranch {
            kind: *kind,
            entry,
            sink,
            edge,
        });
    }
    Ok(attached)
}

fn build_branch(
    graph: &mut Graph,
    factory: &NodeFactory<'_>,
    kind: BranchKind,
    config: &PipelineConfig,
) -> Result<(NodeId, NodeId), BuildError> {
    match kind {
        BranchKind::Display => {
            let queue = add_node(graph, factory, "queue", "queue-display", [])?;
            let sink = add_node(graph, factory, "display-sink", "display0", [])?;
            graph.link_chain(&[queue, sink])?;
            Ok((queue, sink))
        }
        BranchKind::Network => {
            let queue = add_node(graph, factory, "queue", "queue-net", [])?;
            let convert = add_node(graph, factory, "video-convert", "convert-net", [])?;
            let encoder = add_node(
                graph,
                factory,
                "video-encoder",
                "encoder-net",
                [("insert-parameter-sets", true.into())],
            )?;
            let packetizer = add_node(
                graph,
                factory,
                "rtp-packetizer",
                "pay0",
                [("payload-type", config.network.payload_type.into())],
            )?;
            let sink = add_node(
                graph,
                factory,
                "udp-sink",
                "udpsink0",
                [
                    ("host", config.network.host.as_str().into()),
                    ("port", config.network.port.into()),
                    ("sync", false.into()),
                ],
            )?;
            graph.link_chain(&[queue, convert, encoder, packetizer, sink])?;
            Ok((queue, sink))
        }
        BranchKind::File => {
            let queue = add_node(graph, factory, "queue", "queue-file", [])?;
            let convert = add_node(graph, factory, "video-convert", "convert-file", [])?;
            let encoder = add_node(
                graph,
                factory,
                "video-encoder",
                "encoder-file",
                [("insert-parameter-sets", true.into())],
            )?;
            let parser = add_node(graph, factory, "stream-parser", "parser-file", [])?;
            let muxer = add_node(graph, factory, "container-mux", "mux0", [])?;
            let sink = add_node(
                graph,
                factory,
                "file-sink",
                "filesink0",
                [(
                    "location",
                    config
                        .storage
                        .location
                        .to_string_lossy()
                        .into_owned()
                        .into(),
                )],
            )?;
            graph.link_chain(&[queue, convert, encoder, parser, muxer, sink])?;
            Ok((queue, sink))
        }
    }
}
