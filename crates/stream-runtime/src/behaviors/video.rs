//! Raw-video plumbing stages: parser, decoder, format filter, converters,
//! queue passthrough and the stream aggregator.

use stream_graph::Node;
use tracing::{debug, trace};

use crate::behaviors::int_prop;
use crate::behaviors::encode::{classify, decode_access_unit, parse_access_unit, AU_MAGIC};
use crate::buffer::Buffer;
use crate::element::{ElementError, EmitFn, Transform};
use crate::ActivateError;

/// Validates the elementary-stream framing ahead of the decoder or muxer.
pub struct StreamParser {
    units: u64,
}

impl StreamParser {
    pub fn new() -> Self {
        Self { units: 0 }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for StreamParser {
    fn name(&self) -> &'static str {
        "stream-parser"
    }

    fn process(&mut self, mut buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        let Some(magic) = classify(&buffer.data) else {
            return Err(ElementError::failed(format!(
                "unit {} is not valid elementary-stream data",
                buffer.seq
            )));
        };
        if magic == AU_MAGIC {
            let (unit, _) = parse_access_unit(&buffer.data)?;
            buffer.meta.keyframe = unit.keyframe;
            buffer.meta.width = unit.width;
            buffer.meta.height = unit.height;
        }
        self.units += 1;
        out(buffer)
    }

    fn finish(&mut self, _out: EmitFn<'_>) -> Result<(), ElementError> {
        debug!(units = self.units, "parser drained");
        Ok(())
    }
}

/// Expands access units back into raw frames. Parameter-set units configure
/// nothing here and are swallowed.
pub struct VideoDecoder {
    frames: u64,
}

impl VideoDecoder {
    pub fn new() -> Self {
        Self { frames: 0 }
    }
}

impl Default for VideoDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for VideoDecoder {
    fn name(&self) -> &'static str {
        "video-decoder"
    }

    fn process(&mut self, mut buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        match classify(&buffer.data) {
            Some(AU_MAGIC) => {}
            Some(_) => {
                trace!(seq = buffer.seq, "parameter set swallowed");
                return Ok(());
            }
            None => {
                return Err(ElementError::failed(format!(
                    "unit {} cannot be decoded",
                    buffer.seq
                )));
            }
        }
        let (unit, payload) = parse_access_unit(&buffer.data)?;
        buffer.data = decode_access_unit(&unit, &payload);
        buffer.meta.width = unit.width;
        buffer.meta.height = unit.height;
        buffer.meta.keyframe = unit.keyframe;
        self.frames += 1;
        out(buffer)
    }

    fn finish(&mut self, _out: EmitFn<'_>) -> Result<(), ElementError> {
        debug!(frames = self.frames, "decoder drained");
        Ok(())
    }
}

/// Pins the raw-video geometry; a mismatch is a negotiation failure.
pub struct FormatFilter {
    width: u32,
    height: u32,
}

impl FormatFilter {
    pub fn from_node(node: &Node) -> Result<Self, ActivateError> {
        Ok(Self {
            width: int_prop(node, "width", 1280, 16, 8192)? as u32,
            height: int_prop(node, "height", 720, 16, 8192)? as u32,
        })
    }
}

impl Transform for FormatFilter {
    fn name(&self) -> &'static str {
        "format-filter"
    }

    fn process(&mut self, mut buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        let (w, h) = (buffer.meta.width, buffer.meta.height);
        if (w, h) == (0, 0) {
            buffer.meta.width = self.width;
            buffer.meta.height = self.height;
        } else if (w, h) != (self.width, self.height) {
            return Err(ElementError::failed(format!(
                "negotiation failed: upstream {}x{} against filter {}x{}",
                w, h, self.width, self.height
            )));
        }
        out(buffer)
    }
}

/// Colorspace/memory conversion stage. The synthetic frames are already in
/// the target layout, so this is identity plus accounting.
pub struct VideoConvert {
    converted: u64,
}

impl VideoConvert {
    pub fn new() -> Self {
        Self { converted: 0 }
    }
}

impl Default for VideoConvert {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for VideoConvert {
    fn name(&self) -> &'static str {
        "video-convert"
    }

    fn process(&mut self, buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        self.converted += 1;
        out(buffer)
    }
}

/// Decoupling stage; the buffering itself lives in the worker's channel.
pub struct PassQueue;

impl PassQueue {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PassQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for PassQueue {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn process(&mut self, buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        out(buffer)
    }
}

/// Entry point of the shared chain: renumbers whatever the single
/// contributing source chain delivers into one consistent sequence.
pub struct StreamAggregator {
    width: u32,
    height: u32,
    next_seq: u64,
}

impl StreamAggregator {
    pub fn from_node(node: &Node) -> Result<Self, ActivateError> {
        Ok(Self {
            width: int_prop(node, "width", 0, 0, 8192)? as u32,
            height: int_prop(node, "height", 0, 0, 8192)? as u32,
            next_seq: 0,
        })
    }
}

impl Transform for StreamAggregator {
    fn name(&self) -> &'static str {
        "stream-aggregator"
    }

    fn process(&mut self, mut buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        buffer.seq = self.next_seq;
        self.next_seq += 1;
        if buffer.meta.width == 0 && self.width != 0 {
            buffer.meta.width = self.width;
            buffer.meta.height = self.height;
        }
        out(buffer)
    }

    fn finish(&mut self, _out: EmitFn<'_>) -> Result<(), ElementError> {
        debug!(frames = self.next_seq, "aggregator drained");
        Ok(())
    }
}
