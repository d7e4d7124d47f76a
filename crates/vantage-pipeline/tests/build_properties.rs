//! Assembly-level properties of the parameterized graph builder.

use stream_graph::{Node, PortRequestError, SourceMode};
use vantage_pipeline::{
    attach_branch, build, build_for_selector, BranchKind, BranchSelection, BuildError,
    PipelineConfig,
};

fn node_by_name<'g>(graph: &'g stream_graph::Graph, name: &str) -> &'g Node {
    graph
        .nodes()
        .find(|n| n.name() == name)
        .unwrap_or_else(|| panic!("no node named {name}"))
}

#[test]
fn both_modes_bind_one_aggregator_input_and_three_branches() {
    let config = PipelineConfig::default();
    for mode in [SourceMode::FileSource, SourceMode::SensorSource] {
        let assembled = build(mode, BranchSelection::All, &config).unwrap();
        let graph = &assembled.graph;

        let aggregator = graph.node(assembled.aggregator);
        assert_eq!(aggregator.inputs().len(), 1, "{mode}: one requested input");
        assert!(
            aggregator.inputs()[0].is_linked(),
            "{mode}: aggregator input bound"
        );

        let splitter = graph.node(assembled.splitter);
        assert_eq!(splitter.outputs().len(), 3, "{mode}: three splitter ports");
        assert!(
            splitter.outputs().iter().all(|p| p.is_linked()),
            "{mode}: every branch linked exactly once"
        );

        assert_eq!(
            assembled
                .branches
                .iter()
                .map(|b| b.kind)
                .collect::<Vec<_>>(),
            vec![BranchKind::Display, BranchKind::Network, BranchKind::File],
        );
        for branch in &assembled.branches {
            assert!(graph.is_linked(graph.input(branch.entry, 0)));
        }
    }
}

#[test]
fn file_mode_defers_the_demultiplexer_link() {
    let config = PipelineConfig::default();
    let assembled = build(SourceMode::FileSource, BranchSelection::All, &config).unwrap();
    let graph = &assembled.graph;

    assert_eq!(graph.deferred().len(), 1);
    let parser = node_by_name(graph, "parser0");
    assert!(
        !parser.inputs()[0].is_linked(),
        "parser waits for discovery"
    );
    // The demultiplexer has no output ports until the header is read.
    let demux = node_by_name(graph, "demux0");
    assert!(demux.outputs().is_empty());
    // parser → decoder → queue are pre-linked to each other.
    assert!(node_by_name(graph, "decoder0").inputs()[0].is_linked());
    assert!(node_by_name(graph, "queue-source").inputs()[0].is_linked());
}

#[test]
fn sensor_mode_is_fully_static() {
    let config = PipelineConfig::default();
    let assembled = build(SourceMode::SensorSource, BranchSelection::All, &config).unwrap();
    assert!(assembled.graph.deferred().is_empty());
}

#[test]
fn unrecognized_selector_is_fatal_before_allocation() {
    let config = PipelineConfig::default();
    let err = build_for_selector(3, BranchSelection::All, &config).unwrap_err();
    match err {
        BuildError::Mode(mode) => assert_eq!(mode.selector, 3),
        other => panic!("expected mode error, got {other}"),
    }
}

#[test]
fn fourth_branch_attachment_exhausts_the_splitter() {
    let config = PipelineConfig::default();
    let mut assembled = build(SourceMode::SensorSource, BranchSelection::All, &config).unwrap();

    let registry = stream_graph::Registry::builtin();
    let factory = stream_graph::NodeFactory::new(&registry);
    let extra = assembled
        .graph
        .add(factory.create("queue", "queue-extra").unwrap());

    let err = attach_branch(&mut assembled.graph, assembled.splitter, extra).unwrap_err();
    assert!(matches!(err, PortRequestError::Exhausted { limit: 3, .. }));
}

#[test]
fn reattaching_a_branch_entry_is_rejected() {
    let config = PipelineConfig::default();
    let mut assembled = build(SourceMode::SensorSource, BranchSelection::All, &config).unwrap();

    let display_entry = assembled.branches[0].entry;
    let err = attach_branch(&mut assembled.graph, assembled.splitter, display_entry).unwrap_err();
    assert!(matches!(err, PortRequestError::AlreadyLinked { .. }));
}

#[test]
fn minimal_variant_attaches_only_the_network_branch() {
    let config = PipelineConfig::default();
    let assembled = build(
        SourceMode::SensorSource,
        BranchSelection::NetworkOnly,
        &config,
    )
    .unwrap();

    assert_eq!(assembled.branches.len(), 1);
    assert_eq!(assembled.branches[0].kind, BranchKind::Network);
    let splitter = assembled.graph.node(assembled.splitter);
    assert_eq!(splitter.outputs().len(), 1);
}
