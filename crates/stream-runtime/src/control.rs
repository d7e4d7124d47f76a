//! # Control Loop
//!
//! Single-threaded, cooperative state machine over
//! {Idle, Running, Stopping, Stopped}. The loop blocks on the event bus
//! (plus one cancellation arm for the termination request) and resumes only
//! on arrival; it never busy-polls. Exactly one terminal event ends the
//! loop; if an `Error` is ordered before a `StreamEnd`, the error wins and
//! the `StreamEnd` is never consumed.
//!
//! There is deliberately no timeout-based forced shutdown: a graph that
//! never drains leaves the loop blocked. Cancellation is exclusively the
//! graceful termination request.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::BusEvent;

/// Lifecycle state of a run, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Where a termination request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// An OS interrupt, relayed from the signal handler.
    Signal,
    /// Raised programmatically.
    Internal,
}

const ORIGIN_NONE: u8 = 0;
const ORIGIN_SIGNAL: u8 = 1;
const ORIGIN_INTERNAL: u8 = 2;

/// Shared handle used to request a graceful stop.
///
/// Safe to trigger from restricted contexts: [`request`](Self::request) only
/// stores an atomic and cancels a token: no allocation, no blocking, no
/// graph access. Duplicate requests cause no further transitions.
#[derive(Clone)]
pub struct TerminationHandle {
    origin: Arc<AtomicU8>,
    token: CancellationToken,
}

impl TerminationHandle {
    pub fn new() -> Self {
        Self {
            origin: Arc::new(AtomicU8::new(ORIGIN_NONE)),
            token: CancellationToken::new(),
        }
    }

    /// Raise the termination request. First caller wins; later calls are
    /// no-ops.
    pub fn request(&self, origin: RequestOrigin) {
        let tag = match origin {
            RequestOrigin::Signal => ORIGIN_SIGNAL,
            RequestOrigin::Internal => ORIGIN_INTERNAL,
        };
        let _ = self
            .origin
            .compare_exchange(ORIGIN_NONE, tag, Ordering::AcqRel, Ordering::Acquire);
        self.token.cancel();
    }

    pub fn origin(&self) -> Option<RequestOrigin> {
        match self.origin.load(Ordering::Acquire) {
            ORIGIN_SIGNAL => Some(RequestOrigin::Signal),
            ORIGIN_INTERNAL => Some(RequestOrigin::Internal),
            _ => None,
        }
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for TerminationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The graph drained to completion.
    Completed,
    /// A stage reported a runtime error; the run stopped without draining.
    Failed { node: String, message: String },
}

/// Drives a running graph from the event bus to its terminal state.
pub struct ControlLoop {
    bus_rx: mpsc::Receiver<BusEvent>,
    termination: TerminationHandle,
    /// Cancelling this injects the end-of-stream marker at the source
    /// boundary; it never aborts in-flight data.
    end_marker: CancellationToken,
    state: RunState,
    state_tx: watch::Sender<RunState>,
}

impl ControlLoop {
    pub fn new(
        bus_rx: mpsc::Receiver<BusEvent>,
        termination: TerminationHandle,
        end_marker: CancellationToken,
    ) -> (Self, watch::Receiver<RunState>) {
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        (
            Self {
                bus_rx,
                termination,
                end_marker,
                state: RunState::Idle,
                state_tx,
            },
            state_rx,
        )
    }

    fn set_state(&mut self, next: RunState) {
        if self.state == next {
            return;
        }
        info!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
        self.state_tx.send_replace(next);
    }

    /// Run to the terminal `Stopped` state.
    ///
    /// Entering here is the start request: every node is already activated,
    /// the graph goes Running immediately.
    pub async fn run(mut self) -> RunOutcome {
        self.set_state(RunState::Running);

        loop {
            tokio::select! {
                _ = self.termination.token().cancelled(), if self.state == RunState::Running => {
                    let origin = self.termination.origin();
                    info!(?origin, "termination requested, injecting end-of-stream at source");
                    self.set_state(RunState::Stopping);
                    self.end_marker.cancel();
                }
                event = self.bus_rx.recv() => match event {
                    Some(BusEvent::StreamEnd) => {
                        debug!("stream end reached every sink");
                        if self.state == RunState::Running {
                            // Source exhausted on its own; same drain path.
                            self.set_state(RunState::Stopping);
                        }
                        self.set_state(RunState::Stopped);
                        return RunOutcome::Completed;
                    }
                    Some(BusEvent::Error { node, message }) => {
                        error!(node, message, "runtime error, stopping without drain");
                        if self.state == RunState::Running {
                            self.set_state(RunState::Stopping);
                        }
                        self.set_state(RunState::Stopped);
                        return RunOutcome::Failed { node, message };
                    }
                    Some(BusEvent::Warning { node, message }) => {
                        warn!(node, message, "graph warning");
                    }
                    Some(BusEvent::Progress { node, buffers }) => {
                        debug!(node, buffers, "sink progress");
                    }
                    None => {
                        // Every posting half dropped without a terminal
                        // event; nothing more can arrive.
                        error!("event bus closed without a terminal event");
                        self.set_state(RunState::Stopped);
                        return RunOutcome::Failed {
                            node: "bus".to_string(),
                            message: "event bus closed unexpectedly".to_string(),
                        };
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_loop() -> (
        ControlLoop,
        mpsc::Sender<BusEvent>,
        TerminationHandle,
        CancellationToken,
        watch::Receiver<RunState>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let termination = TerminationHandle::new();
        let end_marker = CancellationToken::new();
        let (control, state_rx) = ControlLoop::new(rx, termination.clone(), end_marker.clone());
        (control, tx, termination, end_marker, state_rx)
    }

    #[tokio::test]
    async fn error_wins_over_later_stream_end() {
        let (control, tx, _term, _end, _state) = make_loop();
        tx.send(BusEvent::Error {
            node: "encoder0".into(),
            message: "encode failed".into(),
        })
        .await
        .unwrap();
        tx.send(BusEvent::StreamEnd).await.unwrap();

        let outcome = control.run().await;
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                node: "encoder0".into(),
                message: "encode failed".into(),
            }
        );
    }

    #[tokio::test]
    async fn stream_end_completes_the_run() {
        let (control, tx, _term, _end, mut state) = make_loop();
        tx.send(BusEvent::StreamEnd).await.unwrap();

        let outcome = control.run().await;
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(*state.borrow_and_update(), RunState::Stopped);
    }

    #[tokio::test]
    async fn graceful_stop_waits_for_drain() {
        let (control, tx, termination, end_marker, mut state) = make_loop();
        let run = tokio::spawn(control.run());

        // Wait for Running.
        while *state.borrow_and_update() != RunState::Running {
            state.changed().await.unwrap();
        }

        termination.request(RequestOrigin::Internal);

        // Stopping must be observed, and the end marker injected, before
        // any StreamEnd exists.
        while *state.borrow_and_update() != RunState::Stopping {
            state.changed().await.unwrap();
        }
        assert!(end_marker.is_cancelled());
        assert!(!run.is_finished());

        // The graph drains and self-reports; only now does the loop stop.
        tx.send(BusEvent::StreamEnd).await.unwrap();
        let outcome = run.await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(*state.borrow_and_update(), RunState::Stopped);
    }

    #[tokio::test]
    async fn duplicate_termination_requests_are_ignored() {
        let (control, tx, termination, _end, mut state) = make_loop();
        let run = tokio::spawn(control.run());

        termination.request(RequestOrigin::Signal);
        termination.request(RequestOrigin::Internal);
        assert_eq!(termination.origin(), Some(RequestOrigin::Signal));

        while *state.borrow_and_update() != RunState::Stopping {
            state.changed().await.unwrap();
        }
        tx.send(BusEvent::StreamEnd).await.unwrap();
        assert_eq!(run.await.unwrap(), RunOutcome::Completed);
    }

    #[tokio::test]
    async fn informational_events_are_logged_and_ignored() {
        let (control, tx, _term, _end, _state) = make_loop();
        tx.send(BusEvent::Warning {
            node: "demux0".into(),
            message: "incompatible discovered port".into(),
        })
        .await
        .unwrap();
        tx.send(BusEvent::Progress {
            node: "display0".into(),
            buffers: 42,
        })
        .await
        .unwrap();
        tx.send(BusEvent::StreamEnd).await.unwrap();

        assert_eq!(control.run().await, RunOutcome::Completed);
    }
}
