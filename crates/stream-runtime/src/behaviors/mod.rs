//! # Built-in stage behaviors
//!
//! The runtime implementations behind the node classes the factory knows.
//! Each behavior interprets its node's property map when the graph starts;
//! invalid values surface here as activation failures, environment problems
//! (missing files, unbindable sockets) surface later through `start()` as
//! runtime error events.

mod analytics;
mod demux;
mod encode;
mod sink;
mod source;
mod video;

pub use analytics::{Inference, ObjectTracker, Overlay};
pub use demux::ContainerDemux;
pub use encode::{ContainerMux, RtpPacketizer, VideoEncoder};
pub use sink::{DisplaySink, FileSink, UdpSink};
pub use source::{FileReader, SensorCapture};
pub use video::{FormatFilter, PassQueue, StreamAggregator, StreamParser, VideoConvert, VideoDecoder};

use std::sync::Arc;

use stream_graph::Node;

use crate::dynamic::DiscoveryHook;
use crate::element::{Consume, Produce, Transform};
use crate::stats::RunStats;
use crate::ActivateError;

/// What the activation layer spawns for one node.
pub enum NodeBehavior {
    Source(Box<dyn Produce>),
    Filter(Box<dyn Transform>),
    Sink(Box<dyn Consume>),
    /// The container demultiplexer, special-cased for dynamic linking.
    Demux(ContainerDemux),
    /// The fan-out splitter; replication is structural, handled by the
    /// worker itself.
    Fanout,
}

impl std::fmt::Debug for NodeBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            NodeBehavior::Source(_) => "Source",
            NodeBehavior::Filter(_) => "Filter",
            NodeBehavior::Sink(_) => "Sink",
            NodeBehavior::Demux(_) => "Demux",
            NodeBehavior::Fanout => "Fanout",
        };
        f.debug_tuple(variant).finish()
    }
}

/// Build the behavior for a node. `hook` is only passed for the
/// demultiplexing node carrying a registered resolver.
pub fn instantiate(
    node: &Node,
    stats: &Arc<RunStats>,
    hook: Option<DiscoveryHook>,
) -> Result<NodeBehavior, ActivateError> {
    let behavior = match node.type_name() {
        "file-reader" => NodeBehavior::Source(Box::new(FileReader::from_node(node)?)),
        "sensor-capture" => NodeBehavior::Source(Box::new(SensorCapture::from_node(node)?)),
        "container-demux" => {
            let hook = hook.ok_or_else(|| ActivateError::MissingResolver {
                node: node.name().to_string(),
            })?;
            NodeBehavior::Demux(ContainerDemux::new(hook))
        }
        "stream-parser" => NodeBehavior::Filter(Box::new(StreamParser::new())),
        "video-decoder" => NodeBehavior::Filter(Box::new(VideoDecoder::new())),
        "format-filter" => NodeBehavior::Filter(Box::new(FormatFilter::from_node(node)?)),
        "video-convert" => NodeBehavior::Filter(Box::new(VideoConvert::new())),
        "queue" => NodeBehavior::Filter(Box::new(PassQueue::new())),
        "stream-aggregator" => NodeBehavior::Filter(Box::new(StreamAggregator::from_node(node)?)),
        "inference" => NodeBehavior::Filter(Box::new(Inference::from_node(node)?)),
        "object-tracker" => NodeBehavior::Filter(Box::new(ObjectTracker::from_node(node)?)),
        "overlay" => NodeBehavior::Filter(Box::new(Overlay::from_node(node)?)),
        "stream-splitter" => NodeBehavior::Fanout,
        "video-encoder" => NodeBehavior::Filter(Box::new(VideoEncoder::from_node(node)?)),
        "rtp-packetizer" => NodeBehavior::Filter(Box::new(RtpPacketizer::from_node(node)?)),
        "container-mux" => NodeBehavior::Filter(Box::new(ContainerMux::new())),
        "display-sink" => NodeBehavior::Sink(Box::new(DisplaySink::new(stats.clone()))),
        "udp-sink" => NodeBehavior::Sink(Box::new(UdpSink::from_node(node, stats.clone())?)),
        "file-sink" => NodeBehavior::Sink(Box::new(FileSink::from_node(node, stats.clone())?)),
        other => {
            return Err(ActivateError::UnknownType {
                node: node.name().to_string(),
                type_name: other.to_string(),
            });
        }
    };
    Ok(behavior)
}

fn config_err(node: &Node, reason: impl Into<String>) -> ActivateError {
    ActivateError::Config {
        node: node.name().to_string(),
        reason: reason.into(),
    }
}

/// Required string property.
fn require_str(node: &Node, key: &str) -> Result<String, ActivateError> {
    match node.property(key).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        Some(_) => Err(config_err(node, format!("property `{key}` is empty"))),
        None => Err(config_err(node, format!("property `{key}` is required"))),
    }
}

/// Integer property with a default, range-checked.
fn int_prop(
    node: &Node,
    key: &str,
    default: i64,
    min: i64,
    max: i64,
) -> Result<i64, ActivateError> {
    let value = match node.property(key) {
        None => default,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| config_err(node, format!("property `{key}` must be an integer")))?,
    };
    if value < min || value > max {
        return Err(config_err(
            node,
            format!("property `{key}` = {value} is outside {min}..={max}"),
        ));
    }
    Ok(value)
}

fn bool_prop(node: &Node, key: &str, default: bool) -> Result<bool, ActivateError> {
    match node.property(key) {
        None => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| config_err(node, format!("property `{key}` must be a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_graph::{NodeFactory, Registry};

    #[test]
    fn invalid_property_value_fails_at_graph_start() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let stats = Arc::new(RunStats::default());

        let mut node = factory.create("sensor-capture", "cam0").unwrap();
        node.set_property("width", 0i64).unwrap();
        let err = instantiate(&node, &stats, None).unwrap_err();
        assert!(matches!(err, ActivateError::Config { .. }));
    }

    #[test]
    fn udp_sink_requires_a_valid_host() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let stats = Arc::new(RunStats::default());

        let mut node = factory.create("udp-sink", "net0").unwrap();
        node.set_property("host", "not-an-address").unwrap();
        node.set_property("port", 8001i64).unwrap();
        let err = instantiate(&node, &stats, None).unwrap_err();
        assert!(matches!(err, ActivateError::Config { .. }));
    }

    #[test]
    fn demux_without_resolver_is_rejected() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let stats = Arc::new(RunStats::default());

        let node = factory.create("container-demux", "demux0").unwrap();
        let err = instantiate(&node, &stats, None).unwrap_err();
        assert!(matches!(err, ActivateError::MissingResolver { .. }));
    }
}
