//! # Container framing
//!
//! The length-prefixed container layout used on the file path: the
//! demultiplexer reads it, the file-branch muxer writes it, so recordings
//! produced by the file branch feed straight back into file-source mode.
//!
//! Layout:
//!
//! ```text
//! header:  "VCF1" | version u8 | stream count u8 | (id u8, kind u8) ...
//! record:  stream id u8 | payload length u32 BE | payload
//! ```
//!
//! The stream table is the part the demultiplexer cannot know before the
//! header is read; it is what drives the runtime port discovery.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use stream_graph::MediaKind;

pub const MAGIC: &[u8; 4] = b"VCF1";
pub const VERSION: u8 = 1;

/// Records larger than this are treated as corruption, not data.
pub const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("bad container magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown stream kind tag {0}")]
    UnknownStreamKind(u8),

    #[error("record of {0} bytes exceeds the {MAX_RECORD_LEN} byte limit")]
    OversizedRecord(u32),
}

/// One elementary stream declared by the container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: u8,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub streams: Vec<StreamEntry>,
}

fn kind_tag(kind: MediaKind) -> u8 {
    match kind {
        MediaKind::Video => 0,
        MediaKind::Audio => 1,
        _ => 2,
    }
}

fn kind_from_tag(tag: u8) -> Result<MediaKind, FramingError> {
    match tag {
        0 => Ok(MediaKind::Video),
        1 => Ok(MediaKind::Audio),
        2 => Ok(MediaKind::Data),
        other => Err(FramingError::UnknownStreamKind(other)),
    }
}

pub fn encode_header(header: &ContainerHeader) -> Bytes {
    let mut buf = BytesMut::with_capacity(6 + header.streams.len() * 2);
    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(header.streams.len() as u8);
    for entry in &header.streams {
        buf.put_u8(entry.id);
        buf.put_u8(kind_tag(entry.kind));
    }
    buf.freeze()
}

pub fn encode_record(stream_id: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(stream_id);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// A parsed piece of the container.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    Header(ContainerHeader),
    Record { stream_id: u8, payload: Bytes },
}

/// Incremental container parser.
///
/// Push arbitrarily sized byte chunks, then drain events. The header event
/// fires exactly once, before any record.
#[derive(Debug, Default)]
pub struct ContainerReader {
    buf: BytesMut,
    header_done: bool,
}

impl ContainerReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete event, or `None` when more bytes are needed.
    pub fn next_event(&mut self) -> Result<Option<ContainerEvent>, FramingError> {
        if !self.header_done {
            return self.parse_header();
        }
        self.parse_record()
    }

    fn parse_header(&mut self) -> Result<Option<ContainerEvent>, FramingError> {
        if self.buf.len() < 6 {
            return Ok(None);
        }
        if &self.buf[..4] != MAGIC {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&self.buf[..4]);
            return Err(FramingError::BadMagic(magic));
        }
        let version = self.buf[4];
        if version != VERSION {
            return Err(FramingError::UnsupportedVersion(version));
        }
        let count = self.buf[5] as usize;
        let table_len = 6 + count * 2;
        if self.buf.len() < table_len {
            return Ok(None);
        }

        let mut streams = Vec::with_capacity(count);
        for i in 0..count {
            let id = self.buf[6 + i * 2];
            let kind = kind_from_tag(self.buf[6 + i * 2 + 1])?;
            streams.push(StreamEntry { id, kind });
        }
        let _ = self.buf.split_to(table_len);
        self.header_done = true;
        Ok(Some(ContainerEvent::Header(ContainerHeader { streams })))
    }

    fn parse_record(&mut self) -> Result<Option<ContainerEvent>, FramingError> {
        if self.buf.len() < 5 {
            return Ok(None);
        }
        let stream_id = self.buf[0];
        let len = BigEndian::read_u32(&self.buf[1..5]);
        if len > MAX_RECORD_LEN {
            return Err(FramingError::OversizedRecord(len));
        }
        let total = 5 + len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let mut record = self.buf.split_to(total);
        let payload = record.split_off(5).freeze();
        Ok(Some(ContainerEvent::Record { stream_id, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_records_round_trip() {
        let header = ContainerHeader {
            streams: vec![
                StreamEntry {
                    id: 0,
                    kind: MediaKind::Video,
                },
                StreamEntry {
                    id: 1,
                    kind: MediaKind::Audio,
                },
            ],
        };

        let mut reader = ContainerReader::new();
        reader.push(&encode_header(&header));
        reader.push(&encode_record(0, b"frame-0"));
        reader.push(&encode_record(1, b"tone"));

        match reader.next_event().unwrap().unwrap() {
            ContainerEvent::Header(parsed) => assert_eq!(parsed, header),
            other => panic!("expected header, got {other:?}"),
        }
        match reader.next_event().unwrap().unwrap() {
            ContainerEvent::Record { stream_id, payload } => {
                assert_eq!(stream_id, 0);
                assert_eq!(&payload[..], b"frame-0");
            }
            other => panic!("expected record, got {other:?}"),
        }
        match reader.next_event().unwrap().unwrap() {
            ContainerEvent::Record { stream_id, payload } => {
                assert_eq!(stream_id, 1);
                assert_eq!(&payload[..], b"tone");
            }
            other => panic!("expected record, got {other:?}"),
        }
        assert!(reader.next_event().unwrap().is_none());
    }

    #[test]
    fn partial_chunks_resume() {
        let header = ContainerHeader {
            streams: vec![StreamEntry {
                id: 0,
                kind: MediaKind::Video,
            }],
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_header(&header));
        bytes.extend_from_slice(&encode_record(0, &[7u8; 100]));

        let mut reader = ContainerReader::new();
        let mut events = Vec::new();
        for chunk in bytes.chunks(3) {
            reader.push(chunk);
            while let Some(ev) = reader.next_event().unwrap() {
                events.push(ev);
            }
        }
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn bad_magic_is_an_error() {
        let mut reader = ContainerReader::new();
        reader.push(b"MOOV\x01\x00");
        assert!(matches!(
            reader.next_event(),
            Err(FramingError::BadMagic(_))
        ));
    }
}
