//! Stream assignment for collective/compute overlap.
//!
//! Collective kernels are moved to a dedicated communication stream when there
//! are at least two of them. Every collective is then fenced with event
//! record/wait pairs: compute -> comm before it runs and comm -> compute before
//! its first consumer on the compute stream.
//!
//! The pass runs in five steps over an immutable snapshot of the execution order:
//! tag streams, locate boundaries, build pairs, materialize Send/Recv nodes, and
//! splice them into a new order that replaces the old one in a single write.

mod assign;
mod boundary;
mod pairs;
mod splice;
mod sync_nodes;

use thiserror::Error;
use tracing::{debug, warn};

use crate::device::{DeviceError, StreamDevice, StreamId};
use crate::graph::{GraphError, KernelGraph, NodeId};
use crate::kernel::KernelInfoSetter;
use crate::optimizer::{
    CompileContext, GraphPass, PassError, PassResult, PassWarning, StreamAssignConfig,
};

pub use boundary::{BoundaryMiss, SwitchKind};
pub use pairs::SyncPair;
pub use splice::{splice_order, SpliceSet};
pub use sync_nodes::SyncNodeError;

#[derive(Debug, Error)]
pub enum StreamAssignError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("creating the communication stream failed: {0}")]
    StreamCreation(#[source] DeviceError),
    #[error(
        "generating send/recv nodes for {kind} boundary {mock_send} -> {mock_recv} failed: {source}"
    )]
    SyncNodeConstruction {
        kind: SwitchKind,
        mock_send: NodeId,
        mock_recv: NodeId,
        #[source]
        source: SyncNodeError,
    },
}

/// What a stream assignment run did to the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAssignReport {
    pub compute_stream: StreamId,
    /// Communication stream, when one was created.
    pub comm_stream: Option<StreamId>,
    pub collectives: usize,
    /// Kernels whose `stream_id` was written or changed by this run.
    pub retagged: usize,
    pub pairs: Vec<SyncPair>,
    /// `(send, recv)` nodes spliced for each entry of `pairs`.
    pub inserted: Vec<(NodeId, NodeId)>,
    pub misses: Vec<BoundaryMiss>,
}

impl StreamAssignReport {
    pub fn inserted_nodes(&self) -> usize {
        self.inserted.len() * 2
    }

    /// Whether the run wrote any attribute or spliced any node.
    pub fn changed(&self) -> bool {
        self.retagged > 0 || !self.inserted.is_empty()
    }
}

/// Assigns streams to every scheduled kernel and inserts the event
/// synchronization needed to overlap collectives with computation.
///
/// Missing boundaries are reported in [`StreamAssignReport::misses`] and logged;
/// any failure to build synchronization nodes aborts without touching the
/// execution order.
pub fn run_stream_assignment<D: StreamDevice + ?Sized>(
    graph: &mut KernelGraph,
    device: &D,
    kernel_info: &dyn KernelInfoSetter,
    cfg: &StreamAssignConfig,
) -> Result<StreamAssignReport, StreamAssignError> {
    let plan = assign::tag_streams(graph, device, cfg)?;
    let mut report = StreamAssignReport {
        compute_stream: plan.compute,
        comm_stream: plan.comm,
        collectives: plan.collectives.len(),
        retagged: plan.retagged,
        pairs: Vec::new(),
        inserted: Vec::new(),
        misses: Vec::new(),
    };
    if plan.comm.is_none() {
        return Ok(report);
    }

    let order = graph.execution_order().to_vec();
    let scan = boundary::locate_boundaries(graph, &order, &plan.collectives)?;
    for miss in &scan.misses {
        warn!(
            graph = graph.name(),
            collective = %miss.collective,
            kind = %miss.kind,
            "{}",
            miss.message()
        );
    }
    let pairs = pairs::build_sync_pairs(&order, &scan.boundaries)?;

    let mut splices = SpliceSet::new();
    let mut inserted = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        let nodes = sync_nodes::materialize_pair(graph, device, kernel_info, pair).map_err(
            |source| StreamAssignError::SyncNodeConstruction {
                kind: pair.kind,
                mock_send: pair.mock_send,
                mock_recv: pair.mock_recv,
                source,
            },
        )?;
        debug!(
            kind = %pair.kind,
            event = %nodes.event,
            send_offset = pair.send_offset,
            recv_offset = pair.recv_offset,
            "materialized sync pair"
        );
        splices.push(pair.send_offset, nodes.send);
        splices.push(pair.recv_offset, nodes.recv);
        inserted.push((nodes.send, nodes.recv));
    }

    let spliced = splice_order(&order, &splices)?;
    graph.set_execution_order(spliced)?;

    report.pairs = pairs;
    report.inserted = inserted;
    report.misses = scan.misses;
    Ok(report)
}

/// Pipeline wrapper around [`run_stream_assignment`].
#[derive(Debug, Default)]
pub struct StreamAssignPass;

impl StreamAssignPass {
    const NAME: &'static str = "stream-assign";
}

impl<D: StreamDevice + 'static> GraphPass<D> for StreamAssignPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        graph: &mut KernelGraph,
        cx: &mut CompileContext<'_, D>,
    ) -> Result<PassResult, PassError> {
        let cfg = cx.config().stream_assign.clone();
        let report = run_stream_assignment(graph, cx.device(), cx.kernel_info(), &cfg)?;
        for miss in &report.misses {
            cx.warn(PassWarning {
                pass: Self::NAME,
                node: Some(miss.collective),
                message: miss.message().to_string(),
            });
        }
        Ok(PassResult {
            changed: report.changed(),
            streams_created: usize::from(report.comm_stream.is_some()),
            sync_pairs: report.pairs.len(),
            inserted_nodes: report.inserted_nodes(),
            skipped_boundaries: report.misses.len(),
        })
    }
}
