//! Nodes and ports
//!
//! A [`Node`] is an independently configured processing stage; a [`Port`] is a
//! typed, directional attachment point on it. Nodes are owned exclusively by
//! the [`Graph`](crate::Graph) they are added to and are referred to by
//! [`NodeId`] afterwards.

use std::collections::BTreeMap;
use std::fmt;

use crate::factory::{PortPolicy, PropValue};

/// Handle to a node inside a graph.
///
/// Only valid for the graph that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction of a port, seen from its owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Coarse media classification used for link compatibility checks.
///
/// `Any` matches everything; it is used by structural stages (queues, sinks
/// that accept whatever upstream produces). Two concrete kinds are only
/// compatible when equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    /// Opaque byte stream (container data, packetized payloads).
    Data,
    Any,
}

impl MediaKind {
    pub fn compatible_with(self, other: MediaKind) -> bool {
        self == MediaKind::Any || other == MediaKind::Any || self == other
    }

    /// Short name used when naming discovered ports.
    pub fn prefix(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Data => "data",
            MediaKind::Any => "any",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// A single attachment point on a node.
///
/// At most one edge may ever target a port; linking is monotonic and ports
/// are never unlinked during normal operation.
#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub direction: Direction,
    pub kind: MediaKind,
    pub(crate) link: Option<crate::graph::EdgeId>,
}

impl Port {
    pub(crate) fn new(name: impl Into<String>, direction: Direction, kind: MediaKind) -> Self {
        Self {
            name: name.into(),
            direction,
            kind,
            link: None,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.link.is_some()
    }

    pub fn edge(&self) -> Option<crate::graph::EdgeId> {
        self.link
    }
}

/// Reference to one port of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRef {
    pub node: NodeId,
    pub direction: Direction,
    pub index: usize,
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}[{}]", self.node, self.direction, self.index)
    }
}

/// A processing stage instance.
///
/// Created by the [`NodeFactory`](crate::NodeFactory) and moved into a graph
/// with [`Graph::add`](crate::Graph::add). Its internals (what the stage does
/// with buffers) live in the execution substrate; the graph layer only deals
/// in identity, configuration and connectivity.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    type_name: &'static str,
    name: String,
    props: BTreeMap<String, PropValue>,
    known_props: &'static [&'static str],
    pub(crate) inputs: Vec<Port>,
    pub(crate) outputs: Vec<Port>,
    pub(crate) input_policy: PortPolicy,
    pub(crate) output_policy: PortPolicy,
    pub(crate) input_kind: MediaKind,
    pub(crate) output_kind: MediaKind,
}

impl Node {
    pub(crate) fn from_class(
        type_name: &'static str,
        name: String,
        known_props: &'static [&'static str],
        inputs: Vec<Port>,
        outputs: Vec<Port>,
        input_policy: PortPolicy,
        output_policy: PortPolicy,
        input_kind: MediaKind,
        output_kind: MediaKind,
    ) -> Self {
        Self {
            id: NodeId(usize::MAX),
            type_name,
            name,
            props: BTreeMap::new(),
            known_props,
            inputs,
            outputs,
            input_policy,
            output_policy,
            input_kind,
            output_kind,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    /// Set one configuration property.
    ///
    /// Keys are checked against the node class; values are opaque here and
    /// validated by the stage itself at graph start.
    pub fn set_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropValue>,
    ) -> Result<(), crate::ConfigError> {
        let key = key.into();
        if !self.known_props.contains(&key.as_str()) {
            return Err(crate::ConfigError::UnknownProperty {
                node: self.name.clone(),
                key,
            });
        }
        self.props.insert(key, value.into());
        Ok(())
    }

    /// Apply a whole property map, failing on the first unknown key.
    pub fn apply_props<I, K, V>(&mut self, props: I) -> Result<(), crate::ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropValue>,
    {
        for (key, value) in props {
            self.set_property(key, value)?;
        }
        Ok(())
    }

    pub fn property(&self, key: &str) -> Option<&PropValue> {
        self.props.get(key)
    }

    pub fn props(&self) -> &BTreeMap<String, PropValue> {
        &self.props
    }
}
