//! # Vantage Pipeline
//!
//! Topology assembly for the vantage analytics runner: the parameterized
//! graph assembler for the two source modes, the fan-out branch set, the
//! static configuration surface, and the glue that drives one pipeline from
//! assembly through drain to teardown.

use thiserror::Error;

pub mod assemble;
pub mod branches;
pub mod config;
pub mod run;

pub use assemble::{build, build_for_selector, AssembledPipeline};
pub use branches::{attach_branch, AttachedBranch, BranchKind, BranchSelection};
pub use config::{ConfigFileError, PipelineConfig};
pub use run::{run_pipeline, PipelineRunError, RunReport};

pub use stream_graph::{ModeError, SourceMode};
pub use stream_runtime::{RequestOrigin, RunOutcome, RunState, TerminationHandle};

/// Assembly failure. Every variant is fatal: the process reports a
/// diagnostic and exits, there is no retry.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Mode(#[from] stream_graph::ModeError),

    #[error("node construction failed: {0}")]
    Construction(#[from] stream_graph::FactoryError),

    #[error("configuration rejected: {0}")]
    Config(#[from] stream_graph::ConfigError),

    #[error("static link failed: {0}")]
    Link(#[from] stream_graph::LinkError),

    #[error("port request failed: {0}")]
    Port(#[from] stream_graph::PortRequestError),
}
