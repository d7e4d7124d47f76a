//! # Lifecycle teardown
//!
//! Once the control loop has reached `Stopped`, the graph is dismantled
//! unconditionally: sources are cancelled, parked senders released, every
//! worker joined, and the whole node/port/edge structure dropped together.
//! There is no retry and no partial teardown.

use tracing::{debug, info, warn};

use crate::activate::RunningGraph;

/// Deactivate every node and release the graph.
pub async fn teardown(mut running: RunningGraph) {
    running.source_stop.cancel();
    for parked in running.pending.drain(..) {
        parked.release();
    }

    for (name, task) in running.tasks.drain(..) {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(node = name, error = %e, "worker ended with error"),
            Err(join) if join.is_cancelled() => debug!(node = name, "worker cancelled"),
            Err(join) => warn!(node = name, error = %join, "worker panicked"),
        }
    }

    let stats = running.stats();
    info!(
        frames_displayed = stats.frames_displayed(),
        datagrams_sent = stats.datagrams_sent(),
        records_stored = stats.records_stored(),
        bytes_stored = stats.bytes_stored(),
        "graph released"
    );
    // `running` drops here, releasing nodes, ports and edges together.
}
