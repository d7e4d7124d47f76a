//! Container demultiplexer.
//!
//! Consumes raw container chunks, discovers the declared elementary streams
//! from the header, and forwards records of the one stream the graph bound
//! through the discovery hook. Records of unbound streams are dropped, as
//! are streams beyond the first compatible one.

use std::time::Duration;

use stream_graph::DiscoveredPort;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::buffer::{Buffer, Item};
use crate::dynamic::DiscoveryHook;
use crate::element::ElementError;
use crate::framing::{ContainerEvent, ContainerReader};

/// Nominal pacing used to synthesize timestamps for container records; the
/// container itself carries none.
const NOMINAL_FPS: u32 = 30;

pub struct ContainerDemux {
    reader: ContainerReader,
    hook: DiscoveryHook,
    selected: Option<SelectedStream>,
    header_seen: bool,
}

struct SelectedStream {
    id: u8,
    kind: stream_graph::MediaKind,
    sender: mpsc::Sender<Item>,
    seq: u64,
}

impl ContainerDemux {
    pub fn new(hook: DiscoveryHook) -> Self {
        Self {
            reader: ContainerReader::new(),
            hook,
            selected: None,
            header_seen: false,
        }
    }

    /// Feed one chunk of container bytes and forward any completed records.
    pub fn push_chunk(&mut self, buffer: Buffer) -> Result<(), ElementError> {
        self.reader.push(&buffer.data);
        loop {
            let event = self
                .reader
                .next_event()
                .map_err(|e| ElementError::failed(e.to_string()))?;
            let Some(event) = event else {
                return Ok(());
            };
            match event {
                ContainerEvent::Header(header) => {
                    self.header_seen = true;
                    debug!(streams = header.streams.len(), "container header read");
                    for entry in header.streams {
                        let discovered = DiscoveredPort {
                            stream_id: entry.id,
                            kind: entry.kind,
                        };
                        if let Some(sender) = self.hook.offer(discovered) {
                            self.selected = Some(SelectedStream {
                                id: entry.id,
                                kind: entry.kind,
                                sender,
                                seq: 0,
                            });
                        }
                    }
                }
                ContainerEvent::Record { stream_id, payload } => {
                    let Some(selected) = self.selected.as_mut() else {
                        trace!(stream_id, "record before any bound stream, dropped");
                        continue;
                    };
                    if selected.id != stream_id {
                        trace!(stream_id, "record of unbound stream dropped");
                        continue;
                    }
                    let pts = Duration::from_secs(1) / NOMINAL_FPS * selected.seq as u32;
                    let out = Buffer::new(selected.seq, pts, selected.kind, payload);
                    selected.seq += 1;
                    if selected.sender.blocking_send(Item::Buffer(out)).is_err() {
                        return Err(ElementError::Downstream);
                    }
                }
            }
        }
    }

    /// Forward the end marker through the bound stream, if any.
    pub fn end(&mut self) {
        if let Some(selected) = &self.selected {
            debug!(records = selected.seq, "demultiplexer draining");
            let _ = selected.sender.blocking_send(Item::End);
        } else {
            debug!(header_seen = self.header_seen, "demultiplexer ending with no bound stream");
        }
    }
}
