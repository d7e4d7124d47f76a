//! Terminal stages: headless display, UDP transmitter, container file
//! writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use stream_graph::Node;
use tracing::{debug, info, trace};

use crate::behaviors::{bool_prop, config_err, int_prop, require_str};
use crate::buffer::Buffer;
use crate::element::{Consume, ElementError};
use crate::stats::RunStats;
use crate::ActivateError;

/// Headless renderer: accounts frames and surfaces the overlay's
/// annotations in the debug log. Real compositor output is a stage
/// internal this runtime does not carry.
pub struct DisplaySink {
    stats: Arc<RunStats>,
}

impl DisplaySink {
    pub fn new(stats: Arc<RunStats>) -> Self {
        Self { stats }
    }
}

impl Consume for DisplaySink {
    fn name(&self) -> &'static str {
        "display-sink"
    }

    fn consume(&mut self, buffer: Buffer) -> Result<(), ElementError> {
        trace!(
            seq = buffer.seq,
            pts_ms = buffer.pts.as_millis() as u64,
            annotations = ?buffer.meta.annotations,
            "frame presented"
        );
        self.stats.frames_displayed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ElementError> {
        debug!(
            frames = self.stats.frames_displayed(),
            "display sink finished"
        );
        Ok(())
    }
}

/// Fire-and-forget datagram transmitter to one fixed destination.
pub struct UdpSink {
    target: SocketAddr,
    socket: Option<UdpSocket>,
    stats: Arc<RunStats>,
}

impl UdpSink {
    pub fn from_node(node: &Node, stats: Arc<RunStats>) -> Result<Self, ActivateError> {
        let host = require_str(node, "host")?;
        let host: IpAddr = host
            .parse()
            .map_err(|_| config_err(node, format!("`host` value `{host}` is not an address")))?;
        if node.property("port").is_none() {
            return Err(config_err(node, "property `port` is required"));
        }
        let port = int_prop(node, "port", 0, 1, 65535)?;
        Ok(Self {
            target: SocketAddr::new(host, port as u16),
            socket: None,
            stats,
        })
    }
}

impl Consume for UdpSink {
    fn name(&self) -> &'static str {
        "udp-sink"
    }

    fn start(&mut self) -> Result<(), ElementError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        info!(target = %self.target, "udp sink bound");
        self.socket = Some(socket);
        Ok(())
    }

    fn consume(&mut self, buffer: Buffer) -> Result<(), ElementError> {
        let Some(socket) = &self.socket else {
            return Err(ElementError::failed("udp sink used before start"));
        };
        match socket.send_to(&buffer.data, self.target) {
            Ok(_) => {
                self.stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            // Nobody listening on the fixed destination is normal for a
            // live transmitter; the datagram is simply gone.
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                trace!(seq = buffer.seq, "datagram refused");
                self.stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => Err(ElementError::Io(e)),
        }
    }

    fn finish(&mut self) -> Result<(), ElementError> {
        debug!(datagrams = self.stats.datagrams_sent(), "udp sink finished");
        Ok(())
    }
}

/// Writes the muxed container to a fixed path.
pub struct FileSink {
    location: PathBuf,
    append: bool,
    writer: Option<BufWriter<File>>,
    stats: Arc<RunStats>,
}

impl FileSink {
    pub fn from_node(node: &Node, stats: Arc<RunStats>) -> Result<Self, ActivateError> {
        Ok(Self {
            location: PathBuf::from(require_str(node, "location")?),
            append: bool_prop(node, "append", false)?,
            writer: None,
            stats,
        })
    }
}

impl Consume for FileSink {
    fn name(&self) -> &'static str {
        "file-sink"
    }

    fn start(&mut self) -> Result<(), ElementError> {
        let file = if self.append {
            File::options().create(true).append(true).open(&self.location)?
        } else {
            File::create(&self.location)?
        };
        info!(location = %self.location.display(), "file sink opened");
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn consume(&mut self, buffer: Buffer) -> Result<(), ElementError> {
        let Some(writer) = &mut self.writer else {
            return Err(ElementError::failed("file sink used before start"));
        };
        writer.write_all(&buffer.data)?;
        self.stats.records_stored.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_stored
            .fetch_add(buffer.data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ElementError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        debug!(
            records = self.stats.records_stored(),
            bytes = self.stats.bytes_stored(),
            location = %self.location.display(),
            "file sink finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use stream_graph::{MediaKind, NodeFactory, Registry};

    #[test]
    fn file_sink_writes_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.vcf");

        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut node = factory.create("file-sink", "file0").unwrap();
        node.set_property("location", path.to_str().unwrap()).unwrap();

        let stats = Arc::new(RunStats::default());
        let mut sink = FileSink::from_node(&node, stats.clone()).unwrap();
        sink.start().unwrap();
        sink.consume(Buffer::new(
            0,
            Duration::ZERO,
            MediaKind::Data,
            Bytes::from_static(b"record"),
        ))
        .unwrap();
        sink.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"record");
        assert_eq!(stats.records_stored(), 1);
        assert_eq!(stats.bytes_stored(), 6);
    }

    #[test]
    fn udp_sink_delivers_to_a_local_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut node = factory.create("udp-sink", "net0").unwrap();
        node.set_property("host", "127.0.0.1").unwrap();
        node.set_property("port", port as i64).unwrap();

        let stats = Arc::new(RunStats::default());
        let mut sink = UdpSink::from_node(&node, stats.clone()).unwrap();
        sink.start().unwrap();
        sink.consume(Buffer::new(
            0,
            Duration::ZERO,
            MediaKind::Data,
            Bytes::from_static(b"datagram"),
        ))
        .unwrap();

        let mut recv = [0u8; 64];
        let (n, _) = listener.recv_from(&mut recv).unwrap();
        assert_eq!(&recv[..n], b"datagram");
        assert_eq!(stats.datagrams_sent(), 1);
    }
}
