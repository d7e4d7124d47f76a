//! # Activation
//!
//! Turns a completed graph into running workers: one bounded channel per
//! edge, one blocking worker per node. Static linking must be finished
//! before activation; the only linking that happens afterwards is the
//! deferred demultiplexer edge, whose parked sender is released by the
//! discovery hook while data may already be flowing elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use stream_graph::{DynamicPortResolver, Graph, Node, NodeId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::behaviors::{self, ContainerDemux, NodeBehavior};
use crate::buffer::Item;
use crate::bus::{BusEvent, DrainLatch, EventBus};
use crate::dynamic::{DiscoveryHook, PendingLink};
use crate::element::{Consume, ElementError, Produce, Transform};
use crate::stats::RunStats;
use crate::ActivateError;

/// Buffering between ordinary stages.
const DEFAULT_CHANNEL_CAPACITY: usize = 8;
/// Buffering behind an explicit queue node, unless configured.
const QUEUE_CHANNEL_CAPACITY: usize = 32;
/// Sink delivery counters are posted on the bus every this many buffers.
const PROGRESS_STEP: u64 = 256;

/// An activated graph: the workers, their stop token, and the shared
/// structure the discovery hook updates.
///
/// Exclusively owned by the control path from here on; released as a whole
/// by [`lifecycle::teardown`](crate::lifecycle::teardown).
pub struct RunningGraph {
    pub(crate) graph: Arc<Mutex<Graph>>,
    pub(crate) tasks: Vec<(String, JoinHandle<Result<(), ElementError>>)>,
    pub(crate) source_stop: CancellationToken,
    pub(crate) pending: Vec<Arc<PendingLink>>,
    stats: Arc<RunStats>,
}

impl RunningGraph {
    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    pub fn graph(&self) -> Arc<Mutex<Graph>> {
        self.graph.clone()
    }

    /// Token whose cancellation injects the end marker at the source
    /// boundary.
    pub fn source_stop(&self) -> CancellationToken {
        self.source_stop.clone()
    }
}

fn channel_capacity(node: &Node) -> usize {
    if node.type_name() != "queue" {
        return DEFAULT_CHANNEL_CAPACITY;
    }
    node.property("max-size-buffers")
        .and_then(|v| v.as_i64())
        .map(|v| v.clamp(1, 4096) as usize)
        .unwrap_or(QUEUE_CHANNEL_CAPACITY)
}

/// Activate every node of the graph.
///
/// Property values each stage interprets are validated here; failures are
/// fatal before anything runs. Environment failures (unopenable files,
/// unbindable sockets) surface later as error events.
pub fn activate(
    graph: Graph,
    bus: EventBus,
    source_stop: CancellationToken,
    stats: Arc<RunStats>,
) -> Result<RunningGraph, ActivateError> {
    let shared = Arc::new(Mutex::new(graph));
    let guard = shared.lock();

    // One input channel per node that has inputs, including those whose
    // upstream edge is still deferred.
    let mut input_tx: HashMap<NodeId, mpsc::Sender<Item>> = HashMap::new();
    let mut input_rx: HashMap<NodeId, mpsc::Receiver<Item>> = HashMap::new();
    for node in guard.nodes() {
        if node.inputs().is_empty() {
            continue;
        }
        let (tx, rx) = mpsc::channel(channel_capacity(node));
        input_tx.insert(node.id(), tx);
        input_rx.insert(node.id(), rx);
    }

    // Output senders per node, ordered by port index so fan-out branch
    // order follows the request order.
    let mut output_tx: HashMap<NodeId, Vec<(usize, mpsc::Sender<Item>)>> = HashMap::new();
    for edge in guard.edges() {
        let tx = input_tx
            .get(&edge.to.node)
            .cloned()
            .ok_or_else(|| ActivateError::Wiring {
                node: guard.node(edge.to.node).name().to_string(),
            })?;
        output_tx
            .entry(edge.from.node)
            .or_default()
            .push((edge.from.index, tx));
    }
    for senders in output_tx.values_mut() {
        senders.sort_by_key(|(index, _)| *index);
    }

    // Deferred edges: park the target's sender, arm a discovery hook.
    let mut hooks: HashMap<NodeId, DiscoveryHook> = HashMap::new();
    let mut pending = Vec::new();
    for link in guard.deferred() {
        let tx = input_tx
            .get(&link.target.node)
            .cloned()
            .ok_or_else(|| ActivateError::Wiring {
                node: guard.node(link.target.node).name().to_string(),
            })?;
        let parked = PendingLink::new(tx);
        pending.push(parked.clone());
        hooks.insert(
            link.source,
            DiscoveryHook::new(
                shared.clone(),
                DynamicPortResolver::from_deferred(link),
                parked,
                bus.clone(),
                guard.node(link.source).name().to_string(),
            ),
        );
    }
    drop(input_tx);

    let mut plans = Vec::with_capacity(guard.node_count());
    for node in guard.nodes() {
        let hook = hooks.remove(&node.id());
        let behavior = behaviors::instantiate(node, &stats, hook)?;
        plans.push((node.id(), node.name().to_string(), behavior));
    }
    drop(guard);

    let sinks = plans
        .iter()
        .filter(|(_, _, b)| matches!(b, NodeBehavior::Sink(_)))
        .count();
    let latch = DrainLatch::new(sinks, bus.clone());

    let mut tasks = Vec::with_capacity(plans.len());
    for (id, name, behavior) in plans {
        let outs: Vec<mpsc::Sender<Item>> = output_tx
            .remove(&id)
            .map(|v| v.into_iter().map(|(_, tx)| tx).collect())
            .unwrap_or_default();
        let rx = input_rx.remove(&id);

        let task = match behavior {
            NodeBehavior::Source(produce) => {
                spawn_source(name.clone(), produce, outs, source_stop.clone(), bus.clone())
            }
            NodeBehavior::Filter(transform) => {
                let rx = take_input(rx, &name)?;
                spawn_filter(name.clone(), transform, rx, outs, bus.clone())
            }
            NodeBehavior::Demux(demux) => {
                let rx = take_input(rx, &name)?;
                spawn_demux(name.clone(), demux, rx, bus.clone())
            }
            NodeBehavior::Fanout => {
                let rx = take_input(rx, &name)?;
                spawn_fanout(name.clone(), rx, outs)
            }
            NodeBehavior::Sink(consume) => {
                let rx = take_input(rx, &name)?;
                spawn_sink(name.clone(), consume, rx, bus.clone(), latch.clone())
            }
        };
        tasks.push((name, task));
    }

    debug!(workers = tasks.len(), "graph activated");
    Ok(RunningGraph {
        graph: shared,
        tasks,
        source_stop,
        pending,
        stats,
    })
}

fn take_input(
    rx: Option<mpsc::Receiver<Item>>,
    name: &str,
) -> Result<mpsc::Receiver<Item>, ActivateError> {
    rx.ok_or_else(|| ActivateError::Wiring {
        node: name.to_string(),
    })
}

type WorkerHandle = JoinHandle<Result<(), ElementError>>;

fn spawn_source(
    name: String,
    mut produce: Box<dyn Produce>,
    outs: Vec<mpsc::Sender<Item>>,
    stop: CancellationToken,
    bus: EventBus,
) -> WorkerHandle {
    tokio::task::spawn_blocking(move || {
        let Some(tx) = outs.into_iter().next() else {
            debug!(node = name, "source has no downstream, idling out");
            return Ok(());
        };
        let mut emit = |buffer| {
            tx.blocking_send(Item::Buffer(buffer))
                .map_err(|_| ElementError::Downstream)
        };
        match produce.run(&stop, &mut emit) {
            Ok(()) => {
                let _ = tx.blocking_send(Item::End);
                debug!(node = name, "source finished, end marker sent");
                Ok(())
            }
            Err(ElementError::Downstream) => {
                debug!(node = name, "downstream closed, source exiting");
                Ok(())
            }
            Err(e) => {
                error!(node = name, error = %e, "source failed");
                bus.error(&name, e.to_string());
                Err(e)
            }
        }
    })
}

fn spawn_filter(
    name: String,
    mut transform: Box<dyn Transform>,
    mut rx: mpsc::Receiver<Item>,
    outs: Vec<mpsc::Sender<Item>>,
    bus: EventBus,
) -> WorkerHandle {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = transform.start() {
            error!(node = name, error = %e, "stage start failed");
            bus.error(&name, e.to_string());
            return Err(e);
        }

        let tx = outs.into_iter().next();
        let mut emit = |buffer| match &tx {
            Some(tx) => tx
                .blocking_send(Item::Buffer(buffer))
                .map_err(|_| ElementError::Downstream),
            None => Ok(()),
        };

        loop {
            let Some(item) = rx.blocking_recv() else {
                debug!(node = name, "input closed, worker exiting");
                return Ok(());
            };
            let result = match item {
                Item::Buffer(buffer) => transform.process(buffer, &mut emit),
                Item::End => {
                    let finished = transform.finish(&mut emit);
                    if finished.is_ok() {
                        if let Some(tx) = &tx {
                            let _ = tx.blocking_send(Item::End);
                        }
                        debug!(node = name, "drained");
                        return Ok(());
                    }
                    finished
                }
            };
            match result {
                Ok(()) => {}
                Err(ElementError::Downstream) => {
                    debug!(node = name, "downstream closed, worker exiting");
                    return Ok(());
                }
                Err(e) => {
                    error!(node = name, error = %e, "stage failed");
                    bus.error(&name, e.to_string());
                    return Err(e);
                }
            }
        }
    })
}

fn spawn_demux(
    name: String,
    mut demux: ContainerDemux,
    mut rx: mpsc::Receiver<Item>,
    bus: EventBus,
) -> WorkerHandle {
    tokio::task::spawn_blocking(move || {
        loop {
            let Some(item) = rx.blocking_recv() else {
                debug!(node = name, "input closed, worker exiting");
                return Ok(());
            };
            match item {
                Item::Buffer(buffer) => match demux.push_chunk(buffer) {
                    Ok(()) => {}
                    Err(ElementError::Downstream) => {
                        debug!(node = name, "bound stream closed, worker exiting");
                        return Ok(());
                    }
                    Err(e) => {
                        error!(node = name, error = %e, "demultiplexing failed");
                        bus.error(&name, e.to_string());
                        return Err(e);
                    }
                },
                Item::End => {
                    demux.end();
                    return Ok(());
                }
            }
        }
    })
}

fn spawn_fanout(
    name: String,
    mut rx: mpsc::Receiver<Item>,
    outs: Vec<mpsc::Sender<Item>>,
) -> WorkerHandle {
    tokio::task::spawn_blocking(move || {
        let mut branches = outs;
        loop {
            match rx.blocking_recv() {
                Some(Item::Buffer(buffer)) => {
                    // Every branch gets an identical replica; a branch that
                    // went away stops receiving, the others carry on.
                    branches.retain(|tx| tx.blocking_send(Item::Buffer(buffer.clone())).is_ok());
                    if branches.is_empty() {
                        debug!(node = name, "all branches closed, worker exiting");
                        return Ok(());
                    }
                }
                Some(Item::End) => {
                    for tx in &branches {
                        let _ = tx.blocking_send(Item::End);
                    }
                    debug!(node = name, branches = branches.len(), "drained");
                    return Ok(());
                }
                None => {
                    debug!(node = name, "input closed, worker exiting");
                    return Ok(());
                }
            }
        }
    })
}

fn spawn_sink(
    name: String,
    mut consume: Box<dyn Consume>,
    mut rx: mpsc::Receiver<Item>,
    bus: EventBus,
    latch: Arc<DrainLatch>,
) -> WorkerHandle {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = consume.start() {
            error!(node = name, error = %e, "sink start failed");
            bus.error(&name, e.to_string());
            return Err(e);
        }

        let mut delivered = 0u64;
        let mut next_progress = PROGRESS_STEP;
        loop {
            match rx.blocking_recv() {
                Some(Item::Buffer(buffer)) => {
                    if let Err(e) = consume.consume(buffer) {
                        error!(node = name, error = %e, "sink failed");
                        bus.error(&name, e.to_string());
                        return Err(e);
                    }
                    delivered += 1;
                    if delivered >= next_progress {
                        bus.post(BusEvent::Progress {
                            node: name.clone(),
                            buffers: delivered,
                        });
                        next_progress += PROGRESS_STEP;
                    }
                }
                Some(Item::End) => {
                    if let Err(e) = consume.finish() {
                        error!(node = name, error = %e, "sink finish failed");
                        bus.error(&name, e.to_string());
                        return Err(e);
                    }
                    debug!(node = name, delivered, "sink drained");
                    latch.sink_drained(&name);
                    return Ok(());
                }
                None => {
                    debug!(node = name, "input closed before end marker");
                    return Ok(());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlLoop, RequestOrigin, RunOutcome, TerminationHandle};
    use crate::lifecycle;
    use stream_graph::{NodeFactory, Registry, SourceMode};

    fn tiny_display_graph() -> Graph {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut graph = Graph::new(SourceMode::SensorSource);

        let mut cam = factory.create("sensor-capture", "cam0").unwrap();
        cam.apply_props([("width", 64i64), ("height", 32), ("framerate", 200)])
            .unwrap();
        let cam = graph.add(cam);
        let queue = graph.add(factory.create("queue", "queue0").unwrap());
        let sink = graph.add(factory.create("display-sink", "display0").unwrap());
        graph.link_chain(&[cam, queue, sink]).unwrap();
        graph
    }

    #[tokio::test]
    async fn graceful_run_drains_and_counts() {
        let (bus, bus_rx) = EventBus::channel(64);
        let stop = CancellationToken::new();
        let stats = Arc::new(RunStats::default());

        let running = activate(tiny_display_graph(), bus, stop.clone(), stats.clone()).unwrap();

        let termination = TerminationHandle::new();
        let (control, _state) = ControlLoop::new(bus_rx, termination.clone(), stop);
        let run = tokio::spawn(control.run());

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        termination.request(RequestOrigin::Internal);

        let outcome = run.await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        lifecycle::teardown(running).await;
        assert!(stats.frames_displayed() >= 1);
    }

    #[tokio::test]
    async fn sink_start_failure_stops_without_drain() {
        let registry = Registry::builtin();
        let factory = NodeFactory::new(&registry);
        let mut graph = Graph::new(SourceMode::SensorSource);

        let mut cam = factory.create("sensor-capture", "cam0").unwrap();
        cam.apply_props([("width", 64i64), ("height", 32), ("framerate", 200)])
            .unwrap();
        let cam = graph.add(cam);
        let encoder = graph.add(factory.create("video-encoder", "enc0").unwrap());
        let mux = graph.add(factory.create("container-mux", "mux0").unwrap());
        let mut sink = factory.create("file-sink", "file0").unwrap();
        sink.set_property("location", "/nonexistent-dir/depths/capture.vcf")
            .unwrap();
        let sink = graph.add(sink);
        graph.link_chain(&[cam, encoder, mux, sink]).unwrap();

        let (bus, bus_rx) = EventBus::channel(64);
        let stop = CancellationToken::new();
        let stats = Arc::new(RunStats::default());
        let running = activate(graph, bus, stop.clone(), stats).unwrap();

        let termination = TerminationHandle::new();
        let (control, _state) = ControlLoop::new(bus_rx, termination, stop);
        let outcome = control.run().await;
        assert!(matches!(outcome, RunOutcome::Failed { ref node, .. } if node == "file0"));
        lifecycle::teardown(running).await;
    }
}
