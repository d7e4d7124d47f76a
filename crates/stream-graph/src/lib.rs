//! # Stream Graph
//!
//! Data model for directed graphs of streaming processing stages: nodes,
//! typed directional ports, edges, and the operations that connect them.
//! The model is deliberately free of any execution concern: scheduling and
//! buffer flow live in `stream-runtime`; this crate only answers "what is
//! connected to what, and is that connection legal".
//!
//! ## Features
//!
//! - `Node` / `Port` / `Edge` / `Graph` ownership model (a graph exclusively
//!   owns its nodes; at most one edge per port; linking is monotonic)
//! - A [`factory::Registry`] of node classes and a [`NodeFactory`] that
//!   instantiates them with a configuration map
//! - On-request and runtime-discovered ports, with per-class caps
//! - A [`DynamicPortResolver`] that completes deferred links when a source
//!   discovers its output ports mid-stream

use thiserror::Error;

pub mod factory;
pub mod graph;
pub mod node;
pub mod resolver;

pub use factory::{NodeClass, NodeFactory, PortPolicy, PropValue, Registry};
pub use graph::{DeferredLink, Edge, EdgeId, Graph, SourceMode};
pub use node::{Direction, MediaKind, Node, NodeId, Port, PortRef};
pub use resolver::{DiscoveredPort, DynamicPortResolver, ResolveOutcome};

/// A node type could not be instantiated.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("node type `{type_name}` is not available in this runtime")]
    UnknownType { type_name: String },
}

/// A configuration property was rejected at apply time.
///
/// Value-level validation may also surface later, at graph start, per
/// node-type contract; this error covers what the graph layer can check
/// immediately.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("node `{node}` has no property `{key}`")]
    UnknownProperty { node: String, key: String },

    #[error("invalid value for `{node}.{key}`: {reason}")]
    InvalidValue {
        node: String,
        key: String,
        reason: String,
    },
}

/// A static link could not be created.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("port {port} does not exist")]
    NoSuchPort { port: node::PortRef },

    #[error("cannot link {from} to {to}: links go output to input")]
    Direction { from: String, to: String },

    #[error("port {port} is already linked")]
    Occupied { port: String },

    #[error("{from} ({from_kind}) cannot feed {to} ({to_kind})")]
    Incompatible {
        from: String,
        from_kind: node::MediaKind,
        to: String,
        to_kind: node::MediaKind,
    },
}

/// A request for a new port was refused.
#[derive(Debug, Error)]
pub enum PortRequestError {
    #[error("no more request ports available on `{node}` (limit {limit})")]
    Exhausted { node: String, limit: usize },

    #[error("input `{port}` is already linked")]
    AlreadyLinked { port: String },

    #[error("node `{node}` has no requestable {direction} ports")]
    NotRequestable {
        node: String,
        direction: node::Direction,
    },

    #[error("port request rejected: {reason}")]
    Rejected { reason: String },
}

/// The runtime mode selector named neither of the two source topologies.
#[derive(Debug, Error)]
#[error("unrecognized mode selector {selector} (1 = file source, 2 = sensor source)")]
pub struct ModeError {
    pub selector: u32,
}
