//! Run orchestration: build → activate → drain → tear down.

use std::sync::Arc;

use stream_graph::SourceMode;
use stream_runtime::{
    activate, teardown, CancellationToken, ControlLoop, EventBus, RunOutcome, RunStats,
    TerminationHandle,
};
use tracing::info;

use crate::assemble::build;
use crate::branches::BranchSelection;
use crate::config::PipelineConfig;
use crate::BuildError;

/// Capacity of the lifecycle event bus.
const BUS_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum PipelineRunError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("activation failed: {0}")]
    Activate(#[from] stream_runtime::ActivateError),
}

/// Outcome and delivery counters of one completed run.
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stats: Arc<RunStats>,
}

/// Assemble and run one pipeline to its terminal state.
///
/// The graph is exclusively owned by the assembly here until it is handed
/// to the control loop, which owns it until `Stopped`; teardown is
/// unconditional once the loop exits.
pub async fn run_pipeline(
    mode: SourceMode,
    selection: BranchSelection,
    config: &PipelineConfig,
    termination: TerminationHandle,
) -> Result<RunReport, PipelineRunError> {
    let assembled = build(mode, selection, config)?;

    let (bus, bus_rx) = EventBus::channel(BUS_CAPACITY);
    let source_stop = CancellationToken::new();
    let stats = Arc::new(RunStats::default());
    let running = activate(assembled.graph, bus, source_stop.clone(), stats.clone())?;

    let (control, _state) = ControlLoop::new(bus_rx, termination, source_stop);
    info!(%mode, "pipeline running");
    let outcome = control.run().await;

    teardown(running).await;
    Ok(RunReport { outcome, stats })
}
