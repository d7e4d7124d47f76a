//! Buffers and the in-band end-of-stream marker.

use std::time::Duration;

use bytes::Bytes;
use stream_graph::MediaKind;

/// One unit of media flowing through the graph.
///
/// Payloads are `Bytes`, so replicating a buffer across fan-out branches is
/// a refcount bump, not a copy. Stages that rewrite payloads build a new
/// `Bytes`; the metadata travels with the buffer.
#[derive(Debug, Clone)]
pub struct Buffer {
    /// Monotonic sequence number, stamped by the producing source and
    /// re-stamped by the stream aggregator.
    pub seq: u64,
    /// Presentation timestamp relative to stream start.
    pub pts: Duration,
    pub kind: MediaKind,
    pub data: Bytes,
    pub meta: FrameMeta,
}

impl Buffer {
    pub fn new(seq: u64, pts: Duration, kind: MediaKind, data: Bytes) -> Self {
        Self {
            seq,
            pts,
            kind,
            data,
            meta: FrameMeta::default(),
        }
    }
}

/// Per-frame analytics metadata accumulated along the chain.
#[derive(Debug, Clone, Default)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    /// Set by the encoder on access units that start a group of pictures.
    pub keyframe: bool,
    pub objects: Vec<DetectedObject>,
    /// Rendered annotation lines, filled in by the overlay stage.
    pub annotations: Vec<String>,
}

/// One detection, enriched by the tracker and the secondary classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub class_id: u32,
    /// Normalized left/top/right/bottom.
    pub bbox: [f32; 4],
    pub track_id: Option<u64>,
    pub secondary_label: Option<&'static str>,
}

/// What travels over an edge: data, or the marker that no more data will.
///
/// `End` is injected at the source boundary and drains through every stage,
/// so in-flight buffers ahead of it are fully processed before the graph
/// reports itself drained.
#[derive(Debug, Clone)]
pub enum Item {
    Buffer(Buffer),
    End,
}
