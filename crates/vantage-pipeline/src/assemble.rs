//! # Graph Assembler
//!
//! Builds the complete directed graph for one source mode, statically
//! linking everything that is knowable up front and deferring the one link
//! that depends on runtime stream inspection.
//!
//! Both topologies converge on the stream aggregator and share the
//! analytics chain behind it:
//!
//! ```text
//! file:    reader → demux ⇢ parser → decoder → queue ┐
//! sensor:  capture → filter → convert ×2 → queue ────┤
//!                                                    ▼
//!   aggregator → queue → convert → queue → infer₁ → queue → tracker
//!     → queue → infer₂ → queue → overlay → splitter ⇒ branches
//! ```
//!
//! (`⇢` is the deferred demultiplexer link, `⇒` the fan-out.)

use stream_graph::{
    DynamicPortResolver, Graph, NodeFactory, NodeId, PropValue, Registry, SourceMode,
};
use tracing::{debug, info};

use crate::branches::{attach_selected, AttachedBranch, BranchSelection};
use crate::config::PipelineConfig;
use crate::BuildError;

/// A fully assembled, not-yet-activated pipeline.
#[derive(Debug)]
pub struct AssembledPipeline {
    pub graph: Graph,
    pub branches: Vec<AttachedBranch>,
    pub aggregator: NodeId,
    pub splitter: NodeId,
}

/// Map the external mode selector, then build.
///
/// An unrecognized selector is fatal and reported before any node is
/// allocated.
pub fn build_for_selector(
    selector: u32,
    selection: BranchSelection,
    config: &PipelineConfig,
) -> Result<AssembledPipeline, BuildError> {
    let mode = SourceMode::try_from(selector)?;
    build(mode, selection, config)
}

/// Build the graph for `mode` with the selected branches attached.
///
/// Any static link failure is fatal; the partially built graph is dropped
/// before the error returns.
pub fn build(
    mode: SourceMode,
    selection: BranchSelection,
    config: &PipelineConfig,
) -> Result<AssembledPipeline, BuildError> {
    let registry = Registry::builtin();
    let factory = NodeFactory::new(&registry);
    let mut graph = Graph::new(mode);

    // Mode-independent chain, instantiated for both topologies.
    let (agg_width, agg_height) = match mode {
        SourceMode::FileSource => (config.source.file.width, config.source.file.height),
        SourceMode::SensorSource => (config.source.sensor.width, config.source.sensor.height),
    };
    let aggregator = add_node(
        &mut graph,
        &factory,
        "stream-aggregator",
        "aggregator0",
        [
            ("width", agg_width.into()),
            ("height", agg_height.into()),
            ("batch-size", 1u32.into()),
        ],
    )?;
    let queue_main = add_node(&mut graph, &factory, "queue", "queue-main", [])?;
    let convert_main = add_node(&mut graph, &factory, "video-convert", "convert-main", [])?;
    let queue_infer = add_node(&mut graph, &factory, "queue", "queue-infer", [])?;
    let infer_primary = add_node(
        &mut graph,
        &factory,
        "inference",
        "infer-primary",
        [
            ("config-path", config.inference.primary.config_path.as_str().into()),
            ("unique-id", config.inference.primary.unique_id.into()),
            ("process-mode", 1i64.into()),
        ],
    )?;
    let queue_track = add_node(&mut graph, &factory, "queue", "queue-track", [])?;
    let tracker = add_node(
        &mut graph,
        &factory,
        "object-tracker",
        "tracker0",
        [
            ("tracker-width", config.tracker.width.into()),
            ("tracker-height", config.tracker.height.into()),
        ],
    )?;
    let queue_secondary = add_node(&mut graph, &factory, "queue", "queue-secondary", [])?;
    let infer_secondary = add_node(
        &mut graph,
        &factory,
        "inference",
        "infer-secondary",
        [
            (
                "config-path",
                config.inference.secondary.config_path.as_str().into(),
            ),
            ("unique-id", config.inference.secondary.unique_id.into()),
            ("process-mode", 2i64.into()),
            ("infer-on-id", config.inference.secondary.infer_on_id.into()),
            (
                "infer-on-class-ids",
                config.inference.secondary.infer_on_class_ids.as_str().into(),
            ),
            ("batch-size", config.inference.secondary.batch_size.into()),
        ],
    )?;
    let queue_osd = add_node(&mut graph, &factory, "queue", "queue-osd", [])?;
    let osd = add_node(
        &mut graph,
        &factory,
        "overlay",
        "osd0",
        [("process-mode", 0i64.into())],
    )?;
    let splitter = add_node(&mut graph, &factory, "stream-splitter", "tee0", [])?;

    // Mode-specific sub-graph; both variants end by requesting the
    // aggregator's single input explicitly.
    match mode {
        SourceMode::FileSource => {
            let reader = add_node(
                &mut graph,
                &factory,
                "file-reader",
                "reader0",
                [(
                    "location",
                    config
                        .source
                        .file
                        .location
                        .to_string_lossy()
                        .into_owned()
                        .into(),
                )],
            )?;
            let demux = add_node(&mut graph, &factory, "container-demux", "demux0", [])?;
            let parser = add_node(&mut graph, &factory, "stream-parser", "parser0", [])?;
            let decoder = add_node(&mut graph, &factory, "video-decoder", "decoder0", [])?;
            let queue_source = add_node(&mut graph, &factory, "queue", "queue-source", [])?;

            // Only reader → demux links eagerly; the demultiplexer's output
            // identities are unknown before the container header is read.
            graph.link(graph.output(reader, 0), graph.input(demux, 0))?;
            graph.link_chain(&[parser, decoder, queue_source])?;
            let parser_in = graph.input(parser, 0);
            DynamicPortResolver::register(&mut graph, demux, parser_in)?;
            debug!("demultiplexer link deferred to stream discovery");

            let agg_in = graph.request_input(aggregator)?;
            graph.link(graph.output(queue_source, 0), agg_in)?;
        }
        SourceMode::SensorSource => {
            let capture = add_node(
                &mut graph,
                &factory,
                "sensor-capture",
                "cam0",
                [
                    ("width", config.source.sensor.width.into()),
                    ("height", config.source.sensor.height.into()),
                    ("framerate", config.source.sensor.framerate.into()),
                    ("sensor-id", config.source.sensor.sensor_id.into()),
                ],
            )?;
            let filter = add_node(
                &mut graph,
                &factory,
                "format-filter",
                "caps0",
                [
                    ("width", config.source.sensor.width.into()),
                    ("height", config.source.sensor.height.into()),
                    ("framerate", config.source.sensor.framerate.into()),
                ],
            )?;
            let convert_a = add_node(&mut graph, &factory, "video-convert", "convert-sensor-a", [])?;
            let convert_b = add_node(&mut graph, &factory, "video-convert", "convert-sensor-b", [])?;
            let queue_source = add_node(&mut graph, &factory, "queue", "queue-source", [])?;

            graph.link_chain(&[capture, filter, convert_a, convert_b, queue_source])?;
            let agg_in = graph.request_input(aggregator)?;
            graph.link(graph.output(queue_source, 0), agg_in)?;
        }
    }

    // Shared chain, linked statically after the mode-specific sub-graph.
    graph.link_chain(&[
        aggregator,
        queue_main,
        convert_main,
        queue_infer,
        infer_primary,
        queue_track,
        tracker,
        queue_secondary,
        infer_secondary,
        queue_osd,
        osd,
        splitter,
    ])?;

    let branches = attach_selected(&mut graph, &factory, splitter, selection, config)?;

    info!(
        %mode,
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        branches = branches.len(),
        "graph assembled"
    );
    Ok(AssembledPipeline {
        graph,
        branches,
        aggregator,
        splitter,
    })
}

/// Create a node, apply its property map, move it into the graph.
pub(crate) fn add_node(
    graph: &mut Graph,
    factory: &NodeFactory<'_>,
    type_name: &str,
    instance_name: &str,
    props: impl IntoIterator<Item = (&'static str, PropValue)>,
) -> Result<NodeId, BuildError> {
    let mut node = factory.create(type_name, instance_name)?;
    node.apply_props(props)?;
    Ok(graph.add(node))
}
