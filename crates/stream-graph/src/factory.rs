//! # Node Factory
//!
//! Instantiates named processing-node objects from a registry of node
//! classes. A [`NodeClass`] describes the ports a node type exposes (fixed,
//! on-request with an optional cap, or discovered at runtime) and the
//! configuration keys it accepts. The factory itself knows nothing about
//! what a stage does with buffers; that contract lives in the execution
//! substrate.

use crate::node::{Direction, MediaKind, Node, Port};
use crate::FactoryError;

/// How a node exposes ports on one of its sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPolicy {
    /// No ports on this side (sources have no inputs, sinks no outputs).
    None,
    /// A fixed set of ports, present from construction.
    Static(usize),
    /// Ports are created on explicit request, up to an optional cap.
    OnRequest { max: Option<usize> },
    /// Ports appear only once the stream has been inspected at runtime.
    Dynamic,
}

/// A configuration value attached to a node instance.
///
/// Values are kept loosely typed at the graph layer; each stage interprets
/// and validates its own properties when the graph starts.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl PropValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        PropValue::Bool(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        PropValue::Int(v)
    }
}

impl From<u32> for PropValue {
    fn from(v: u32) -> Self {
        PropValue::Int(v as i64)
    }
}

impl From<u16> for PropValue {
    fn from(v: u16) -> Self {
        PropValue::Int(v as i64)
    }
}

impl From<u8> for PropValue {
    fn from(v: u8) -> Self {
        PropValue::Int(v as i64)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        PropValue::Str(v.to_string())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        PropValue::Str(v)
    }
}

/// Static description of a node type.
#[derive(Debug, Clone, Copy)]
pub struct NodeClass {
    pub type_name: &'static str,
    pub inputs: PortPolicy,
    pub input_kind: MediaKind,
    pub outputs: PortPolicy,
    pub output_kind: MediaKind,
    pub known_props: &'static [&'static str],
}

/// The built-in node classes this runtime ships.
const BUILTIN_CLASSES: &[NodeClass] = &[
    NodeClass {
        type_name: "file-reader",
        inputs: PortPolicy::None,
        input_kind: MediaKind::Any,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Data,
        known_props: &["location", "chunk-size"],
    },
    NodeClass {
        type_name: "container-demux",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Data,
        outputs: PortPolicy::Dynamic,
        output_kind: MediaKind::Any,
        known_props: &[],
    },
    NodeClass {
        type_name: "stream-parser",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &[],
    },
    NodeClass {
        type_name: "video-decoder",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &[],
    },
    NodeClass {
        type_name: "sensor-capture",
        inputs: PortPolicy::None,
        input_kind: MediaKind::Any,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &["width", "height", "framerate", "sensor-id"],
    },
    NodeClass {
        type_name: "format-filter",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &["width", "height", "framerate"],
    },
    NodeClass {
        type_name: "video-convert",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &[],
    },
    NodeClass {
        type_name: "queue",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Any,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Any,
        known_props: &["max-size-buffers"],
    },
    NodeClass {
        type_name: "stream-aggregator",
        inputs: PortPolicy::OnRequest { max: Some(1) },
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &["width", "height", "batch-size", "live-source"],
    },
    NodeClass {
        type_name: "inference",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &[
            "config-path",
            "model-path",
            "unique-id",
            "process-mode",
            "infer-on-id",
            "infer-on-class-ids",
            "batch-size",
        ],
    },
    NodeClass {
        type_name: "object-tracker",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &["tracker-width", "tracker-height", "library", "config-path"],
    },
    NodeClass {
        type_name: "overlay",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &["process-mode"],
    },
    NodeClass {
        type_name: "stream-splitter",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::OnRequest { max: Some(3) },
        output_kind: MediaKind::Video,
        known_props: &[],
    },
    NodeClass {
        type_name: "video-encoder",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Video,
        known_props: &["insert-parameter-sets", "keyframe-interval"],
    },
    NodeClass {
        type_name: "rtp-packetizer",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Data,
        known_props: &["payload-type", "mtu"],
    },
    NodeClass {
        type_name: "container-mux",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::Static(1),
        output_kind: MediaKind::Data,
        known_props: &[],
    },
    NodeClass {
        type_name: "display-sink",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Video,
        outputs: PortPolicy::None,
        output_kind: MediaKind::Any,
        known_props: &["sync"],
    },
    NodeClass {
        type_name: "udp-sink",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Data,
        outputs: PortPolicy::None,
        output_kind: MediaKind::Any,
        known_props: &["host", "port", "sync"],
    },
    NodeClass {
        type_name: "file-sink",
        inputs: PortPolicy::Static(1),
        input_kind: MediaKind::Data,
        outputs: PortPolicy::None,
        output_kind: MediaKind::Any,
        known_props: &["location", "append"],
    },
];

/// Lookup table of node classes available in this runtime environment.
pub struct Registry {
    classes: Vec<NodeClass>,
}

impl Registry {
    /// Registry with every built-in class.
    pub fn builtin() -> Self {
        Self {
            classes: BUILTIN_CLASSES.to_vec(),
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&NodeClass> {
        self.classes.iter().find(|c| c.type_name == type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.classes.iter().map(|c| c.type_name)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Creates node instances from a [`Registry`].
pub struct NodeFactory<'a> {
    registry: &'a Registry,
}

impl<'a> NodeFactory<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Instantiate `type_name` under the given instance name.
    ///
    /// Fails when the type is not available in this runtime environment.
    pub fn create(
        &self,
        type_name: &str,
        instance_name: impl Into<String>,
    ) -> Result<Node, FactoryError> {
        let class = self
            .registry
            .get(type_name)
            .ok_or_else(|| FactoryError::UnknownType {
                type_name: type_name.to_string(),
            })?;

        let inputs = match class.inputs {
            PortPolicy::Static(n) => static_ports(n, Direction::Input, class.input_kind),
            _ => Vec::new(),
        };
        let outputs = match class.outputs {
            PortPolicy::Static(n) => static_ports(n, Direction::Output, class.output_kind),
            _ => Vec::new(),
        };

        Ok(Node::from_class(
            class.type_name,
            instance_name.into(),
            class.known_props,
            inputs,
            outputs,
            class.inputs,
            class.outputs,
            class.input_kind,
            class.output_kind,
        ))
    }
}

fn static_ports(count: usize, direction: Direction, kind: MediaKind) -> Vec<Port> {
    let base = match direction {
        Direction::Input => "sink",
        Direction::Output => "src",
    };
    (0..count)
        .map(|i| {
            let name = if count == 1 {
                base.to_string()
            } else {
                format!("{base}_{i}")
            };
            Port::new(name, direction, kind)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_known_type() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let node = factory.create("video-convert", "convert0").unwrap();
        assert_eq!(node.type_name(), "video-convert");
        assert_eq!(node.name(), "convert0");
        assert_eq!(node.inputs().len(), 1);
        assert_eq!(node.outputs().len(), 1);
        assert_eq!(node.inputs()[0].name, "sink");
    }

    #[test]
    fn create_unknown_type_fails() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let err = factory.create("hologram-sink", "h0").unwrap_err();
        assert!(matches!(err, FactoryError::UnknownType { .. }));
    }

    #[test]
    fn unknown_property_rejected() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut node = factory.create("udp-sink", "net0").unwrap();
        node.set_property("host", "127.0.0.1").unwrap();
        let err = node.set_property("bitrate", 4000i64).unwrap_err();
        assert!(matches!(
            err,
            crate::ConfigError::UnknownProperty { ref key, .. } if key == "bitrate"
        ));
    }

    #[test]
    fn splitter_outputs_are_request_capped() {
        let registry = Registry::builtin();
        let class = registry.get("stream-splitter").unwrap();
        assert_eq!(class.outputs, PortPolicy::OnRequest { max: Some(3) });
    }
}
