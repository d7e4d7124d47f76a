//! Analytics stages: primary/secondary inference, tracking, overlay.
//!
//! Model execution is an external capability; these behaviors honor the
//! stage contract (configuration surface, metadata shape, per-frame flow)
//! with deterministic synthetic outputs.

use std::collections::HashMap;

use stream_graph::Node;
use tracing::debug;

use crate::behaviors::{int_prop, require_str};
use crate::buffer::{Buffer, DetectedObject};
use crate::element::{ElementError, EmitFn, Transform};
use crate::ActivateError;

/// Labels assigned by the secondary classifier.
const VEHICLE_TYPES: &[&str] = &["sedan", "coupe", "suv", "pickup", "van"];

const MODE_PRIMARY: i64 = 1;
const MODE_SECONDARY: i64 = 2;

/// Detector / classifier stage.
///
/// Primary mode populates detections on every frame; secondary mode
/// classifies already-tracked objects of the configured classes.
pub struct Inference {
    config_path: String,
    unique_id: u32,
    mode: i64,
    infer_on_classes: Vec<u32>,
    frames: u64,
}

impl Inference {
    pub fn from_node(node: &Node) -> Result<Self, ActivateError> {
        let config_path = require_str(node, "config-path")?;
        let mode = int_prop(node, "process-mode", MODE_PRIMARY, 1, 2)?;
        let infer_on_classes = match node.property("infer-on-class-ids").and_then(|v| v.as_str()) {
            None => vec![0],
            Some(raw) => raw
                .split(|c| c == ':' || c == ',')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u32>().map_err(|_| ActivateError::Config {
                        node: node.name().to_string(),
                        reason: format!("`infer-on-class-ids` entry `{s}` is not a class id"),
                    })
                })
                .collect::<Result<_, _>>()?,
        };
        Ok(Self {
            config_path,
            unique_id: int_prop(node, "unique-id", 1, 1, 64)? as u32,
            mode,
            infer_on_classes,
            frames: 0,
        })
    }

    fn detect(&self, buffer: &mut Buffer) {
        // Deterministic synthetic detections: between one and three boxes
        // sweeping the frame as the sequence advances.
        let count = 1 + (buffer.seq % 3) as usize;
        for i in 0..count {
            let offset = ((buffer.seq as f32 * 0.01) + i as f32 * 0.25) % 0.75;
            buffer.meta.objects.push(DetectedObject {
                class_id: (i % 2) as u32,
                bbox: [offset, offset, offset + 0.2, offset + 0.2],
                track_id: None,
                secondary_label: None,
            });
        }
    }

    fn classify(&self, buffer: &mut Buffer) {
        for object in &mut buffer.meta.objects {
            if !self.infer_on_classes.contains(&object.class_id) {
                continue;
            }
            let Some(track) = object.track_id else {
                continue;
            };
            object.secondary_label =
                Some(VEHICLE_TYPES[(track as usize) % VEHICLE_TYPES.len()]);
        }
    }
}

impl Transform for Inference {
    fn name(&self) -> &'static str {
        "inference"
    }

    fn start(&mut self) -> Result<(), ElementError> {
        debug!(
            id = self.unique_id,
            config = self.config_path,
            mode = self.mode,
            "inference engine ready"
        );
        Ok(())
    }

    fn process(&mut self, mut buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        match self.mode {
            MODE_SECONDARY => self.classify(&mut buffer),
            _ => self.detect(&mut buffer),
        }
        self.frames += 1;
        out(buffer)
    }

    fn finish(&mut self, _out: EmitFn<'_>) -> Result<(), ElementError> {
        debug!(id = self.unique_id, frames = self.frames, "inference drained");
        Ok(())
    }
}

/// Assigns stable track identities to detections across frames.
pub struct ObjectTracker {
    tracker_width: u32,
    tracker_height: u32,
    tracks: HashMap<(u32, usize), u64>,
    next_track: u64,
}

impl ObjectTracker {
    pub fn from_node(node: &Node) -> Result<Self, ActivateError> {
        Ok(Self {
            tracker_width: int_prop(node, "tracker-width", 640, 16, 4096)? as u32,
            tracker_height: int_prop(node, "tracker-height", 368, 16, 4096)? as u32,
            tracks: HashMap::new(),
            next_track: 1,
        })
    }
}

impl Transform for ObjectTracker {
    fn name(&self) -> &'static str {
        "object-tracker"
    }

    fn start(&mut self) -> Result<(), ElementError> {
        debug!(
            width = self.tracker_width,
            height = self.tracker_height,
            "tracker ready"
        );
        Ok(())
    }

    fn process(&mut self, mut buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        for (slot, object) in buffer.meta.objects.iter_mut().enumerate() {
            let key = (object.class_id, slot);
            let id = match self.tracks.get(&key) {
                Some(id) => *id,
                None => {
                    let id = self.next_track;
                    self.next_track += 1;
                    self.tracks.insert(key, id);
                    id
                }
            };
            object.track_id = Some(id);
        }
        out(buffer)
    }

    fn finish(&mut self, _out: EmitFn<'_>) -> Result<(), ElementError> {
        debug!(tracks = self.tracks.len(), "tracker drained");
        Ok(())
    }
}

/// Renders detection metadata into per-frame annotation lines.
pub struct Overlay {
    process_mode: i64,
    rendered: u64,
}

impl Overlay {
    pub fn from_node(node: &Node) -> Result<Self, ActivateError> {
        Ok(Self {
            process_mode: int_prop(node, "process-mode", 0, 0, 2)?,
            rendered: 0,
        })
    }
}

impl Transform for Overlay {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn start(&mut self) -> Result<(), ElementError> {
        debug!(mode = self.process_mode, "overlay ready");
        Ok(())
    }

    fn process(&mut self, mut buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        for object in &buffer.meta.objects {
            let class = match object.class_id {
                0 => "vehicle",
                _ => "person",
            };
            let mut line = match object.track_id {
                Some(id) => format!("{class} #{id}"),
                None => class.to_string(),
            };
            if let Some(label) = object.secondary_label {
                line.push_str(" [");
                line.push_str(label);
                line.push(']');
            }
            buffer.meta.annotations.push(line);
        }
        self.rendered += 1;
        out(buffer)
    }

    fn finish(&mut self, _out: EmitFn<'_>) -> Result<(), ElementError> {
        debug!(frames = self.rendered, "overlay drained");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use stream_graph::{MediaKind, NodeFactory, Registry};

    fn chain() -> (Inference, ObjectTracker, Inference, Overlay) {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);

        let mut primary = factory.create("inference", "infer-primary").unwrap();
        primary
            .set_property("config-path", "models/detector.toml")
            .unwrap();
        primary.set_property("unique-id", 1i64).unwrap();
        primary.set_property("process-mode", 1i64).unwrap();

        let mut secondary = factory.create("inference", "infer-secondary").unwrap();
        secondary
            .set_property("config-path", "models/vehicle-type.toml")
            .unwrap();
        secondary.set_property("process-mode", 2i64).unwrap();
        secondary.set_property("unique-id", 2i64).unwrap();
        secondary.set_property("infer-on-class-ids", "0:").unwrap();

        let tracker = factory.create("object-tracker", "tracker0").unwrap();
        let overlay = factory.create("overlay", "osd0").unwrap();

        (
            Inference::from_node(&primary).unwrap(),
            ObjectTracker::from_node(&tracker).unwrap(),
            Inference::from_node(&secondary).unwrap(),
            Overlay::from_node(&overlay).unwrap(),
        )
    }

    fn frame(seq: u64) -> Buffer {
        Buffer::new(seq, Duration::ZERO, MediaKind::Video, Bytes::from_static(&[0u8; 16]))
    }

    #[test]
    fn analytics_chain_builds_labeled_tracks() {
        let (mut primary, mut tracker, mut secondary, mut overlay) = chain();

        let mut staged = Vec::new();
        for seq in 0..4u64 {
            let mut passed = Vec::new();
            primary
                .process(frame(seq), &mut |b| {
                    passed.push(b);
                    Ok(())
                })
                .unwrap();
            let mut b = passed.pop().unwrap();
            tracker
                .process(b, &mut |x| {
                    passed.push(x);
                    Ok(())
                })
                .unwrap();
            b = passed.pop().unwrap();
            secondary
                .process(b, &mut |x| {
                    passed.push(x);
                    Ok(())
                })
                .unwrap();
            b = passed.pop().unwrap();
            overlay
                .process(b, &mut |x| {
                    passed.push(x);
                    Ok(())
                })
                .unwrap();
            staged.push(passed.pop().unwrap());
        }

        for buffer in &staged {
            assert!(!buffer.meta.objects.is_empty());
            assert!(buffer.meta.objects.iter().all(|o| o.track_id.is_some()));
            assert_eq!(buffer.meta.annotations.len(), buffer.meta.objects.len());
        }
        // Class-0 objects carry a secondary label after classification.
        let labeled = staged
            .iter()
            .flat_map(|b| &b.meta.objects)
            .filter(|o| o.class_id == 0)
            .all(|o| o.secondary_label.is_some());
        assert!(labeled);
    }

    #[test]
    fn missing_model_config_is_a_config_error() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let node = factory.create("inference", "infer0").unwrap();
        assert!(matches!(
            Inference::from_node(&node),
            Err(ActivateError::Config { .. })
        ));
    }
}
