use std::collections::HashSet;

use kgraph_rs::device::{DeviceError, EventHandle, StreamId};
use kgraph_rs::graph::topology::validate_execution_order;
use kgraph_rs::graph::{keys, KernelGraph, NodeId, ValueType};
use kgraph_rs::kernel::{ops, KernelInfoError, KernelType, OpRegistry, RegistryKernelInfoSetter};
use kgraph_rs::kgraph;
use kgraph_rs::optimizer::StreamAssignConfig;
use kgraph_rs::passes::{
    run_stream_assignment, StreamAssignError, StreamAssignReport, SwitchKind, SyncNodeError,
};
use kgraph_rs_backend_sim::{replay_graph, SimDevice};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const TWO_ALLREDUCE: &str = r#"
graph @two_allreduce {
  %x = param
  %a = MatMul(%x)
  %r1 = AllReduce(%a)
  %m = Mul(%r1)
  %r2 = AllReduce(%m)
  %c = Add(%r2)
}
"#;

fn assign(graph: &mut KernelGraph, device: &SimDevice) -> StreamAssignReport {
    run_stream_assignment(
        graph,
        device,
        &RegistryKernelInfoSetter::default(),
        &StreamAssignConfig::default(),
    )
    .expect("stream assignment")
}

fn stream_of(graph: &KernelGraph, id: NodeId) -> StreamId {
    graph.node(id).unwrap().stream().unwrap()
}

fn position(order: &[NodeId], id: NodeId) -> usize {
    order
        .iter()
        .position(|&n| n == id)
        .unwrap_or_else(|| panic!("{id} is not scheduled"))
}

#[test]
fn fewer_than_two_collectives_keep_the_order() {
    for src in [
        "graph @none {\n  %x = param\n  %a = Neg(%x)\n  %b = Exp(%a)\n}",
        "graph @one {\n  %x = param\n  %a = Neg(%x)\n  %r = AllReduce(%a)\n  %b = Exp(%r)\n}",
    ] {
        let mut graph = kgraph!(src);
        let before = graph.execution_order().to_vec();
        let device = SimDevice::new();

        let report = assign(&mut graph, &device);

        assert_eq!(report.comm_stream, None);
        assert!(report.pairs.is_empty());
        assert_eq!(device.streams_created(), 0);
        assert_eq!(device.events_created(), 0);
        assert_eq!(graph.execution_order(), before.as_slice());
        for &id in graph.execution_order() {
            assert_eq!(stream_of(&graph, id), StreamId(0));
        }
    }
}

#[test]
fn collectives_share_one_communication_stream() {
    let mut graph = kgraph!(TWO_ALLREDUCE);
    let original_len = graph.execution_order().len();
    let device = SimDevice::new();

    let report = assign(&mut graph, &device);

    assert_eq!(report.comm_stream, Some(StreamId(1)));
    assert_eq!(report.collectives, 2);
    assert_eq!(device.streams_created(), 1);
    for name in ["r1", "r2"] {
        assert_eq!(stream_of(&graph, graph.find(name).unwrap()), StreamId(1));
    }
    for name in ["a", "m", "c"] {
        assert_eq!(stream_of(&graph, graph.find(name).unwrap()), StreamId(0));
    }

    assert_eq!(report.pairs.len(), 4);
    assert!(report.misses.is_empty());
    assert_eq!(graph.execution_order().len(), original_len + 8);
    assert_eq!(device.events_created(), 4);
}

#[test]
fn each_pair_records_and_waits_on_its_own_event() {
    let mut graph = kgraph!(TWO_ALLREDUCE);
    let device = SimDevice::new();
    let report = assign(&mut graph, &device);

    let mut events = HashSet::new();
    for (pair, &(send, recv)) in report.pairs.iter().zip(&report.inserted) {
        let send_node = graph.node(send).unwrap();
        let recv_node = graph.node(recv).unwrap();
        assert_eq!(send_node.op, ops::SEND);
        assert_eq!(recv_node.op, ops::RECV);

        let recorded = send_node.attrs.event(send, keys::RECORD_EVENT).unwrap();
        let waited = recv_node.attrs.event(recv, keys::WAIT_EVENT).unwrap();
        assert_eq!(recorded, waited);
        assert!(events.insert(recorded), "{recorded} used by two pairs");

        let send_stream = stream_of(&graph, pair.mock_send);
        let recv_stream = stream_of(&graph, pair.mock_recv);
        assert_ne!(send_stream, recv_stream);
        assert_eq!(stream_of(&graph, send), send_stream);
        assert_eq!(
            send_node.attrs.stream(send, keys::RECORD_EVENT_STREAM).unwrap(),
            send_stream
        );
        assert_eq!(stream_of(&graph, recv), recv_stream);
        assert_eq!(
            recv_node.attrs.stream(recv, keys::WAIT_EVENT_STREAM).unwrap(),
            recv_stream
        );

        let build_info = send_node.build_info.as_ref().expect("send kernel info");
        assert_eq!(build_info.kernel_type, KernelType::Runtime);
        assert!(recv_node.build_info.is_some());
    }
    assert_eq!(
        events,
        (0..4).map(EventHandle).collect::<HashSet<_>>()
    );
}

#[test]
fn placeholders_sit_next_to_their_mock_nodes() {
    let mut graph = kgraph!(TWO_ALLREDUCE);
    let device = SimDevice::new();
    let report = assign(&mut graph, &device);
    let order = graph.execution_order();

    let names: Vec<&str> = order
        .iter()
        .map(|&id| graph.node(id).unwrap().name.as_str())
        .collect();
    assert_eq!(
        names,
        [
            "a", "send0", "recv0", "r1", "send1", "recv1", "m", "send2", "recv2", "r2", "send3",
            "recv3", "c"
        ]
    );

    let kinds: Vec<SwitchKind> = report.pairs.iter().map(|pair| pair.kind).collect();
    assert_eq!(
        kinds,
        [
            SwitchKind::CollectiveInput,
            SwitchKind::CollectiveOutput,
            SwitchKind::CollectiveInput,
            SwitchKind::CollectiveOutput,
        ]
    );
    for (pair, &(send, recv)) in report.pairs.iter().zip(&report.inserted) {
        assert!(position(order, pair.mock_send) < position(order, send));
        assert!(position(order, send) < position(order, recv));
        assert!(position(order, recv) < position(order, pair.mock_recv));
    }
}

#[test]
fn collective_without_consumer_only_fences_its_input() {
    let mut graph = kgraph!(
        r#"
graph @dangling {
  %x = param
  %a = Neg(%x)
  %r1 = AllReduce(%a)
  %c = Add(%r1)
  %r2 = AllReduce(%c)
}
"#
    );
    let device = SimDevice::new();
    let report = assign(&mut graph, &device);

    let r2 = graph.find("r2").unwrap();
    assert_eq!(report.misses.len(), 1);
    assert_eq!(report.misses[0].kind, SwitchKind::CollectiveOutput);
    assert_eq!(report.misses[0].collective, r2);

    assert_eq!(report.pairs.len(), 3);
    let last = report.pairs.last().unwrap();
    assert_eq!(last.kind, SwitchKind::CollectiveInput);
    assert_eq!(last.mock_recv, r2);
    assert_eq!(graph.execution_order().len(), 4 + 6);
    assert!(replay_graph(&graph).unwrap().is_clean());
}

#[test]
fn event_failure_aborts_without_touching_the_order() {
    let mut graph = kgraph!(TWO_ALLREDUCE);
    let before = graph.execution_order().to_vec();
    let device = SimDevice::new().with_event_budget(1);

    let err = run_stream_assignment(
        &mut graph,
        &device,
        &RegistryKernelInfoSetter::default(),
        &StreamAssignConfig::default(),
    )
    .unwrap_err();

    match err {
        StreamAssignError::SyncNodeConstruction {
            kind,
            mock_send,
            mock_recv,
            source: SyncNodeError::Device(DeviceError::EventCreation { .. }),
        } => {
            assert_eq!(kind, SwitchKind::CollectiveOutput);
            assert_eq!(mock_send, graph.find("r1").unwrap());
            assert_eq!(mock_recv, graph.find("m").unwrap());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(graph.execution_order(), before.as_slice());
}

#[test]
fn unregistered_switch_op_is_fatal() {
    let mut graph = kgraph!(TWO_ALLREDUCE);
    let before = graph.execution_order().to_vec();
    let kernel_info = RegistryKernelInfoSetter::new(OpRegistry::new());

    let err = run_stream_assignment(
        &mut graph,
        &SimDevice::new(),
        &kernel_info,
        &StreamAssignConfig::default(),
    )
    .unwrap_err();

    match err {
        StreamAssignError::SyncNodeConstruction {
            source: SyncNodeError::KernelInfo(KernelInfoError::UnregisteredOp { op }),
            ..
        } => assert_eq!(op, ops::SEND),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(graph.execution_order(), before.as_slice());
}

#[test]
fn stream_creation_failure_is_reported() {
    let mut graph = kgraph!(TWO_ALLREDUCE);
    let device = SimDevice::new().with_stream_budget(0);

    let err = run_stream_assignment(
        &mut graph,
        &device,
        &RegistryKernelInfoSetter::default(),
        &StreamAssignConfig::default(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        StreamAssignError::StreamCreation(DeviceError::StreamCreation { .. })
    ));
    assert_eq!(graph.execution_order().len(), 5);
}

#[test]
fn disabled_overlap_keeps_collectives_on_the_default_stream() {
    let mut graph = kgraph!(TWO_ALLREDUCE);
    let device = SimDevice::new();
    let cfg = StreamAssignConfig {
        overlap_enabled: false,
        ..StreamAssignConfig::default()
    };

    let report = run_stream_assignment(
        &mut graph,
        &device,
        &RegistryKernelInfoSetter::default(),
        &cfg,
    )
    .expect("stream assignment");

    assert_eq!(report.comm_stream, None);
    assert_eq!(device.streams_created(), 0);
    assert_eq!(graph.execution_order().len(), 5);
    for &id in graph.execution_order() {
        assert_eq!(stream_of(&graph, id), StreamId(0));
    }
}

#[test]
fn raised_threshold_needs_more_collectives() {
    let cfg = StreamAssignConfig {
        min_collectives_for_overlap: 3,
        ..StreamAssignConfig::default()
    };
    assert_eq!(cfg.overlap_threshold(), 3);
    assert_eq!(
        StreamAssignConfig {
            min_collectives_for_overlap: 0,
            ..StreamAssignConfig::default()
        }
        .overlap_threshold(),
        2
    );

    let mut graph = kgraph!(TWO_ALLREDUCE);
    let report = run_stream_assignment(
        &mut graph,
        &SimDevice::new(),
        &RegistryKernelInfoSetter::default(),
        &cfg,
    )
    .expect("stream assignment");
    assert_eq!(report.comm_stream, None);
}

const COMPUTE_OPS: [&str; 4] = ["MatMul", "Add", "Mul", "Neg"];

/// Random straight-line graph; about a third of the kernels are collectives.
fn random_graph(rng: &mut StdRng, idx: usize) -> KernelGraph {
    let mut graph = KernelGraph::new(format!("random{idx}"));
    let mut values = Vec::new();
    for p in 0..rng.gen_range(1..=2) {
        values.push(graph.add_parameter(format!("p{p}"), ValueType::None).unwrap());
    }
    let kernels = rng.gen_range(1..=14);
    for k in 0..kernels {
        if rng.gen_bool(0.2) {
            let src = values[rng.gen_range(0..values.len())];
            let id = graph
                .add_pass_through(format!("g{k}"), "TupleGetItem", &[src], 0)
                .unwrap();
            values.push(id);
        }
        let op = if rng.gen_bool(0.35) {
            ops::ALL_REDUCE
        } else {
            COMPUTE_OPS[rng.gen_range(0..COMPUTE_OPS.len())]
        };
        let arity = rng.gen_range(1..=2);
        let inputs: Vec<NodeId> = (0..arity)
            .map(|_| values[rng.gen_range(0..values.len())])
            .collect();
        values.push(
            graph
                .add_kernel(format!("k{k}"), op, &inputs, ValueType::None)
                .unwrap(),
        );
    }
    graph
}

#[test]
fn random_graphs_are_scheduled_without_hazards() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for idx in 0..256 {
        let mut graph = random_graph(&mut rng, idx);
        let before = graph.execution_order().to_vec();
        let collectives = before
            .iter()
            .filter(|&&id| graph.node(id).unwrap().op == ops::ALL_REDUCE)
            .count();
        let device = SimDevice::new();

        let report = assign(&mut graph, &device);
        let order = graph.execution_order().to_vec();

        assert_eq!(report.collectives, collectives, "{}", graph.name());
        assert_eq!(order.len(), before.len() + 2 * report.pairs.len());
        assert_eq!(report.inserted.len(), report.pairs.len());
        if collectives < 2 {
            assert_eq!(order, before, "{}", graph.name());
            assert_eq!(device.streams_created(), 0);
        } else {
            assert_eq!(device.streams_created(), 1);
            assert_eq!(
                report.pairs.len() + report.misses.len(),
                2 * collectives,
                "{}",
                graph.name()
            );
        }

        let inserted: HashSet<NodeId> = report
            .inserted
            .iter()
            .flat_map(|&(send, recv)| [send, recv])
            .collect();
        let original: Vec<NodeId> = order
            .iter()
            .copied()
            .filter(|id| !inserted.contains(id))
            .collect();
        assert_eq!(original, before, "{}: relative order changed", graph.name());

        for (pair, &(send, recv)) in report.pairs.iter().zip(&report.inserted) {
            let (s, r) = (position(&order, send), position(&order, recv));
            let (ms, mr) = (position(&order, pair.mock_send), position(&order, pair.mock_recv));
            assert!(ms < s && s < r && r < mr, "{}: {pair:?}", graph.name());
            assert!(order[ms + 1..s].iter().all(|id| inserted.contains(id)));
            assert!(order[r + 1..mr].iter().all(|id| inserted.contains(id)));
        }

        validate_execution_order(&graph).expect("valid order");
        let replay = replay_graph(&graph).expect("launch plan");
        assert!(
            replay.is_clean(),
            "{}: {:?}\n{}",
            graph.name(),
            replay.hazards,
            graph.to_text()
        );
        assert_eq!(replay.events as u64, device.events_created());
    }
}
