//! # Element contract
//!
//! The declared interface between the graph layer and the opaque processing
//! stages. A stage is one of three shapes: it produces buffers
//! ([`Produce`]), transforms them ([`Transform`]), or consumes them
//! ([`Consume`]). Stages are synchronous; each runs on its own blocking
//! worker, connected to its neighbours by channels (see
//! [`activate`](crate::activate)).
//!
//! Output is emitted through a callback rather than returned, so one input
//! buffer may yield zero, one or many outputs (parsers split, muxers prepend
//! headers, packetizers fragment).

use tokio_util::sync::CancellationToken;

use crate::buffer::Buffer;

/// Failure inside a stage. Surfaces on the event bus as an `Error` event and
/// stops the run without waiting for a drain.
#[derive(Debug, thiserror::Error)]
pub enum ElementError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Downstream channel closed while emitting; the run is already tearing
    /// down, the worker just exits.
    #[error("downstream closed")]
    Downstream,

    #[error("{0}")]
    Failed(String),
}

impl ElementError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ElementError::Failed(msg.into())
    }
}

/// Emission callback handed to stages.
pub type EmitFn<'a> = &'a mut dyn FnMut(Buffer) -> Result<(), ElementError>;

/// A stage that originates data.
///
/// `run` loops until the source is naturally exhausted or the token is
/// cancelled (the graceful end-of-stream injection); the worker emits the
/// end marker downstream after `run` returns `Ok`.
pub trait Produce: Send {
    fn name(&self) -> &'static str;

    fn run(&mut self, stop: &CancellationToken, out: EmitFn<'_>) -> Result<(), ElementError>;
}

/// A stage that maps input buffers to output buffers.
pub trait Transform: Send {
    fn name(&self) -> &'static str;

    /// Runtime initialization (open devices, allocate pools). Property
    /// values that only fail in a live environment surface here.
    fn start(&mut self) -> Result<(), ElementError> {
        Ok(())
    }

    fn process(&mut self, buffer: Buffer, out: EmitFn<'_>) -> Result<(), ElementError>;

    /// Flush any held state when the end marker arrives.
    fn finish(&mut self, out: EmitFn<'_>) -> Result<(), ElementError> {
        let _ = out;
        Ok(())
    }
}

/// A terminal stage.
pub trait Consume: Send {
    fn name(&self) -> &'static str;

    fn start(&mut self) -> Result<(), ElementError> {
        Ok(())
    }

    fn consume(&mut self, buffer: Buffer) -> Result<(), ElementError>;

    /// Called when the end marker arrives, before the sink reports drained.
    fn finish(&mut self) -> Result<(), ElementError> {
        Ok(())
    }
}
