//! Encoding-side stages: the toy access-unit codec, the RTP-style
//! packetizer and the container muxer.
//!
//! The "codec" keeps every `SAMPLE_RATIO`-th byte of the raw frame behind a
//! small access-unit header; the decoder spreads the samples back over a
//! zeroed frame. The transform is trivial (stage internals are opaque to
//! the graph) but real: size-reducing and invertible, so the
//! file branch's recordings demultiplex and decode again in file-source
//! mode.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use stream_graph::{MediaKind, Node};
use tracing::debug;

use crate::behaviors::{bool_prop, int_prop};
use crate::buffer::Buffer;
use crate::element::{ElementError, EmitFn, Transform};
use crate::framing::{self, ContainerHeader, StreamEntry};
use crate::ActivateError;

/// Access unit magic: `b"AU"` for frames, `b"PS"` for parameter sets.
pub const AU_MAGIC: [u8; 2] = *b"AU";
pub const PS_MAGIC: [u8; 2] = *b"PS";

const AU_HEADER_LEN: usize = 7;
const SAMPLE_RATIO: usize = 64;

const FLAG_KEYFRAME: u8 = 0b0000_0001;

/// Parsed access-unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessUnit {
    pub keyframe: bool,
    pub width: u32,
    pub height: u32,
}

/// Classify a payload: frame unit, parameter set, or neither.
pub fn classify(data: &[u8]) -> Option<[u8; 2]> {
    if data.len() < 2 {
        return None;
    }
    let magic = [data[0], data[1]];
    (magic == AU_MAGIC || magic == PS_MAGIC).then_some(magic)
}

pub fn parse_access_unit(data: &[u8]) -> Result<(AccessUnit, Bytes), ElementError> {
    if data.len() < AU_HEADER_LEN || data[..2] != AU_MAGIC {
        return Err(ElementError::failed("payload is not an access unit"));
    }
    let flags = data[2];
    let width = BigEndian::read_u16(&data[3..5]) as u32;
    let height = BigEndian::read_u16(&data[5..7]) as u32;
    Ok((
        AccessUnit {
            keyframe: flags & FLAG_KEYFRAME != 0,
            width,
            height,
        },
        Bytes::copy_from_slice(&data[AU_HEADER_LEN..]),
    ))
}

fn encode_access_unit(raw: &[u8], width: u32, height: u32, keyframe: bool) -> Bytes {
    let samples = raw.len().div_ceil(SAMPLE_RATIO);
    let mut out = BytesMut::with_capacity(AU_HEADER_LEN + samples);
    out.put_slice(&AU_MAGIC);
    out.put_u8(if keyframe { FLAG_KEYFRAME } else { 0 });
    out.put_u16(width as u16);
    out.put_u16(height as u16);
    for i in (0..raw.len()).step_by(SAMPLE_RATIO) {
        out.put_u8(raw[i]);
    }
    out.freeze()
}

/// Spread sampled bytes back over a zeroed raw frame.
pub fn decode_access_unit(unit: &AccessUnit, payload: &[u8]) -> Bytes {
    let luma = (unit.width * unit.height) as usize;
    let mut raw = BytesMut::zeroed(luma + luma / 2);
    for (i, byte) in payload.iter().enumerate() {
        let at = i * SAMPLE_RATIO;
        if at >= raw.len() {
            break;
        }
        raw[at] = *byte;
    }
    raw.freeze()
}

fn parameter_set(width: u32, height: u32) -> Bytes {
    let mut out = BytesMut::with_capacity(6);
    out.put_slice(&PS_MAGIC);
    out.put_u16(width as u16);
    out.put_u16(height as u16);
    out.freeze()
}

/// Compresses raw frames into access units, opening each group of pictures
/// with a keyframe and, when configured, a parameter-set unit.
pub struct VideoEncoder {
    insert_parameter_sets: bool,
    keyframe_interval: u64,
    frames: u64,
}

impl VideoEncoder {
    pub fn from_node(node: &Node) -> Result<Self, ActivateError> {
        Ok(Self {
            insert_parameter_sets: bool_prop(node, "insert-parameter-sets", false)?,
            keyframe_interval: int_prop(node, "keyframe-interval", 30, 1, 600)? as u64,
            frames: 0,
        })
    }
}

impl Transform for VideoEncoder {
    fn name(&self) -> &'static str {
        "video-encoder"
    }

    fn process(&mut self, buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        let keyframe = self.frames % self.keyframe_interval == 0;
        self.frames += 1;

        if keyframe && self.insert_parameter_sets {
            let mut ps = buffer.clone();
            ps.data = parameter_set(buffer.meta.width, buffer.meta.height);
            ps.meta.keyframe = true;
            out(ps)?;
        }

        let mut encoded = buffer;
        encoded.data = encode_access_unit(
            &encoded.data,
            encoded.meta.width,
            encoded.meta.height,
            keyframe,
        );
        encoded.meta.keyframe = keyframe;
        out(encoded)
    }

    fn finish(&mut self, _out: EmitFn<'_>) -> Result<(), ElementError> {
        debug!(frames = self.frames, "encoder flushed");
        Ok(())
    }
}

const RTP_HEADER_LEN: usize = 12;
const FLAG_LAST_FRAGMENT: u8 = 0b1000_0000;

/// Fragments access units into datagram-sized payloads with a fixed-layout
/// 12-byte header: version, marker|payload-type, sequence, timestamp, ssrc.
pub struct RtpPacketizer {
    payload_type: u8,
    mtu: usize,
    rtp_seq: u16,
}

impl RtpPacketizer {
    pub fn from_node(node: &Node) -> Result<Self, ActivateError> {
        Ok(Self {
            payload_type: int_prop(node, "payload-type", 96, 0, 127)? as u8,
            mtu: int_prop(node, "mtu", 1200, 128, 65_000)? as usize,
            rtp_seq: 0,
        })
    }
}

impl Transform for RtpPacketizer {
    fn name(&self) -> &'static str {
        "rtp-packetizer"
    }

    fn process(&mut self, buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        let chunk = self.mtu - RTP_HEADER_LEN;
        let ts = buffer.pts.as_millis() as u32;
        let fragments = buffer.data.chunks(chunk.max(1));
        let last = fragments.len().saturating_sub(1);

        for (i, fragment) in buffer.data.chunks(chunk.max(1)).enumerate() {
            let mut packet = BytesMut::with_capacity(RTP_HEADER_LEN + fragment.len());
            packet.put_u8(0x80);
            let marker = if i == last { FLAG_LAST_FRAGMENT } else { 0 };
            packet.put_u8(marker | self.payload_type);
            packet.put_u16(self.rtp_seq);
            packet.put_u32(ts);
            packet.put_u32(0x5654_4e47); // fixed ssrc
            packet.put_slice(fragment);
            self.rtp_seq = self.rtp_seq.wrapping_add(1);

            let mut datagram = Buffer::new(buffer.seq, buffer.pts, MediaKind::Data, packet.freeze());
            datagram.meta = buffer.meta.clone();
            out(datagram)?;
        }
        Ok(())
    }
}

/// Writes the container framing: one header, then one record per unit.
pub struct ContainerMux {
    header_written: bool,
    records: u64,
}

impl ContainerMux {
    pub fn new() -> Self {
        Self {
            header_written: false,
            records: 0,
        }
    }
}

impl Default for ContainerMux {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for ContainerMux {
    fn name(&self) -> &'static str {
        "container-mux"
    }

    fn process(&mut self, buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError> {
        if !self.header_written {
            self.header_written = true;
            let header = ContainerHeader {
                streams: vec![StreamEntry {
                    id: 0,
                    kind: MediaKind::Video,
                }],
            };
            let mut head = Buffer::new(0, buffer.pts, MediaKind::Data, framing::encode_header(&header));
            head.meta.keyframe = true;
            out(head)?;
        }

        let mut record = Buffer::new(
            self.records,
            buffer.pts,
            MediaKind::Data,
            framing::encode_record(0, &buffer.data),
        );
        record.meta = buffer.meta.clone();
        self.records += 1;
        out(record)
    }

    fn finish(&mut self, _out: EmitFn<'_>) -> Result<(), ElementError> {
        debug!(records = self.records, "muxer finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn raw_frame(width: u32, height: u32, fill: u8) -> Buffer {
        let luma = (width * height) as usize;
        let mut buffer = Buffer::new(
            0,
            Duration::ZERO,
            MediaKind::Video,
            Bytes::from(vec![fill; luma + luma / 2]),
        );
        buffer.meta.width = width;
        buffer.meta.height = height;
        buffer
    }

    #[test]
    fn encode_then_decode_restores_dimensions_and_samples() {
        let frame = raw_frame(64, 32, 9);
        let encoded = encode_access_unit(&frame.data, 64, 32, true);
        assert!(encoded.len() < frame.data.len());

        let (unit, payload) = parse_access_unit(&encoded).unwrap();
        assert!(unit.keyframe);
        assert_eq!((unit.width, unit.height), (64, 32));

        let raw = decode_access_unit(&unit, &payload);
        assert_eq!(raw.len(), frame.data.len());
        assert_eq!(raw[0], 9);
        assert_eq!(raw[SAMPLE_RATIO], 9);
        assert_eq!(raw[1], 0);
    }

    #[test]
    fn packetizer_respects_the_mtu() {
        use stream_graph::{NodeFactory, Registry};
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut node = factory.create("rtp-packetizer", "pay0").unwrap();
        node.apply_props([("mtu", 256i64), ("payload-type", 96)])
            .unwrap();
        let mut pay = RtpPacketizer::from_node(&node).unwrap();

        let mut frame = raw_frame(256, 128, 1);
        frame.data = encode_access_unit(&frame.data, 256, 128, true);

        let mut packets = Vec::new();
        pay.process(frame, &mut |b| {
            packets.push(b);
            Ok(())
        })
        .unwrap();

        assert!(packets.len() > 1);
        for p in &packets {
            assert!(p.data.len() <= 256);
            assert_eq!(p.data[1] & 0x7f, 96);
        }
        // Marker bit set only on the final fragment.
        assert_eq!(packets.last().unwrap().data[1] & 0x80, 0x80);
        assert_eq!(packets[0].data[1] & 0x80, 0);
    }

    #[test]
    fn muxer_emits_header_exactly_once() {
        let mut mux = ContainerMux::new();
        let mut outputs = Vec::new();
        let mut frame = raw_frame(32, 32, 2);
        frame.data = encode_access_unit(&frame.data, 32, 32, true);

        mux.process(frame.clone(), &mut |b| {
            outputs.push(b);
            Ok(())
        })
        .unwrap();
        mux.process(frame, &mut |b| {
            outputs.push(b);
            Ok(())
        })
        .unwrap();

        assert_eq!(outputs.len(), 3);
        assert_eq!(&outputs[0].data[..4], framing::MAGIC);
        assert_ne!(&outputs[1].data[..4], framing::MAGIC);
    }
}
