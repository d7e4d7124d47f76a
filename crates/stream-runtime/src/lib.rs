//! # Stream Runtime
//!
//! Execution substrate for `stream-graph` topologies: each node runs as an
//! independent blocking worker consuming buffers pushed over bounded
//! channels, lifecycle events flow over a single ordered bus, and a
//! cooperative control loop turns those events (plus external termination
//! requests) into graceful start/stop/teardown transitions.
//!
//! ## Runtime model
//!
//! - Stages are synchronous ([`Produce`] / [`Transform`] / [`Consume`]);
//!   each runs in `tokio::task::spawn_blocking`, connected by MPSC channels.
//! - The end-of-stream marker travels in-band so in-flight data drains
//!   before the graph reports itself finished.
//! - Deferred links are completed at runtime by a discovery hook, safe
//!   against concurrent first-buffer delivery.

use thiserror::Error;

pub mod activate;
pub mod behaviors;
pub mod buffer;
pub mod bus;
pub mod control;
pub mod dynamic;
pub mod element;
pub mod framing;
pub mod lifecycle;
pub mod stats;

pub use activate::{activate, RunningGraph};
pub use buffer::{Buffer, DetectedObject, FrameMeta, Item};
pub use bus::{BusEvent, DrainLatch, EventBus};
pub use control::{ControlLoop, RequestOrigin, RunOutcome, RunState, TerminationHandle};
pub use element::{Consume, ElementError, Produce, Transform};
pub use lifecycle::teardown;
pub use stats::RunStats;

pub use tokio_util::sync::CancellationToken;

/// Activation failure: the graph could not be brought up.
///
/// Covers property values a stage rejects at graph start and internal
/// wiring that cannot be satisfied. All variants are fatal; the partially
/// activated graph is dropped before the error is returned.
#[derive(Debug, Error)]
pub enum ActivateError {
    #[error("node `{node}`: {reason}")]
    Config { node: String, reason: String },

    #[error("node `{node}` has type `{type_name}` with no runtime behavior")]
    UnknownType { node: String, type_name: String },

    #[error("demultiplexer `{node}` has no registered port resolver")]
    MissingResolver { node: String },

    #[error("node `{node}` cannot be wired to its channels")]
    Wiring { node: String },
}
