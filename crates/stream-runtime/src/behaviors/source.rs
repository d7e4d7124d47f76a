//! Source stages: container file reader and live sensor capture.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use stream_graph::{MediaKind, Node};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::behaviors::{int_prop, require_str};
use crate::buffer::Buffer;
use crate::element::{ElementError, EmitFn, Produce};
use crate::ActivateError;

const DEFAULT_CHUNK_SIZE: i64 = 64 * 1024;

/// Reads a container file and emits raw byte chunks for the demultiplexer.
pub struct FileReader {
    location: PathBuf,
    chunk_size: usize,
}

impl FileReader {
    pub fn from_node(node: &Node) -> Result<Self, ActivateError> {
        let location = PathBuf::from(require_str(node, "location")?);
        let chunk_size = int_prop(node, "chunk-size", DEFAULT_CHUNK_SIZE, 512, 8 * 1024 * 1024)?;
        Ok(Self {
            location,
            chunk_size: chunk_size as usize,
        })
    }
}

impl Produce for FileReader {
    fn name(&self) -> &'static str {
        "file-reader"
    }

    fn run(&mut self, stop: &CancellationToken, out: EmitFn<'_>) -> Result<(), ElementError> {
        let mut file = File::open(&self.location)?;
        info!(location = %self.location.display(), "reading container");

        let mut seq = 0u64;
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            if stop.is_cancelled() {
                debug!("file reader stopping on end-of-stream injection");
                return Ok(());
            }
            let n = file.read(&mut chunk)?;
            if n == 0 {
                debug!(chunks = seq, "container exhausted");
                return Ok(());
            }
            let buffer = Buffer::new(
                seq,
                Duration::ZERO,
                MediaKind::Data,
                Bytes::copy_from_slice(&chunk[..n]),
            );
            seq += 1;
            out(buffer)?;
        }
    }
}

/// Synthetic live sensor: paced test-pattern frames in planar 4:2:0 layout.
pub struct SensorCapture {
    width: u32,
    height: u32,
    framerate: u32,
    sensor_id: u32,
}

impl SensorCapture {
    pub fn from_node(node: &Node) -> Result<Self, ActivateError> {
        Ok(Self {
            width: int_prop(node, "width", 1280, 16, 8192)? as u32,
            height: int_prop(node, "height", 720, 16, 8192)? as u32,
            framerate: int_prop(node, "framerate", 60, 1, 240)? as u32,
            sensor_id: int_prop(node, "sensor-id", 0, 0, 15)? as u32,
        })
    }

    fn frame(&self, seq: u64) -> Bytes {
        let luma = (self.width * self.height) as usize;
        let mut data = BytesMut::zeroed(luma + luma / 2);
        // Stamp a moving band so frames differ and downstream signatures
        // have something to chew on.
        let band = (seq as usize * 7) % luma.max(1);
        let end = (band + self.width as usize).min(luma);
        for b in &mut data[band..end] {
            *b = (seq & 0xff) as u8;
        }
        data.freeze()
    }
}

impl Produce for SensorCapture {
    fn name(&self) -> &'static str {
        "sensor-capture"
    }

    fn run(&mut self, stop: &CancellationToken, out: EmitFn<'_>) -> Result<(), ElementError> {
        let interval = Duration::from_secs(1) / self.framerate;
        info!(
            sensor = self.sensor_id,
            width = self.width,
            height = self.height,
            fps = self.framerate,
            "sensor capture started"
        );

        let mut seq = 0u64;
        while !stop.is_cancelled() {
            let mut buffer = Buffer::new(
                seq,
                interval * seq as u32,
                MediaKind::Video,
                self.frame(seq),
            );
            buffer.meta.width = self.width;
            buffer.meta.height = self.height;
            out(buffer)?;
            seq += 1;
            std::thread::sleep(interval);
        }
        debug!(frames = seq, "sensor capture stopping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_graph::{NodeFactory, Registry};

    #[test]
    fn sensor_emits_until_cancelled() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut node = factory.create("sensor-capture", "cam0").unwrap();
        node.apply_props([("width", 64i64), ("height", 32), ("framerate", 240)])
            .unwrap();
        let mut capture = SensorCapture::from_node(&node).unwrap();

        let stop = CancellationToken::new();
        let mut frames = Vec::new();
        let mut emit = |b: Buffer| {
            frames.push(b);
            Ok(())
        };
        let stopper = stop.clone();
        // Cancel after the third frame via the emit side.
        let mut count = 0;
        let mut emit_counting = |b: Buffer| {
            count += 1;
            if count == 3 {
                stopper.cancel();
            }
            emit(b)
        };
        capture.run(&stop, &mut emit_counting).unwrap();
        assert_eq!(count, 3);
    }
}
