use tracing::debug;

use crate::device::{StreamDevice, StreamId};
use crate::graph::{keys, AttrValue, KernelGraph, NodeId};
use crate::optimizer::StreamAssignConfig;

use super::StreamAssignError;

/// Stream layout chosen for one execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamPlan {
    pub compute: StreamId,
    /// Present only when collectives were moved off the compute stream.
    pub comm: Option<StreamId>,
    /// Positions of collective kernels in the execution order.
    pub collectives: Vec<usize>,
    /// Kernels whose `stream_id` was written or changed.
    pub retagged: usize,
}

/// Sets `stream_id` unless the node already carries `stream`.
fn tag(
    graph: &mut KernelGraph,
    id: NodeId,
    stream: StreamId,
) -> Result<bool, StreamAssignError> {
    let attrs = &mut graph.node_mut(id)?.attrs;
    if attrs.get(keys::STREAM_ID) == Some(&AttrValue::Stream(stream)) {
        return Ok(false);
    }
    attrs.set(keys::STREAM_ID, stream);
    Ok(true)
}

/// Tags every scheduled kernel with `stream_id`.
///
/// Regular kernels get the default stream. Collectives share one freshly created
/// stream when there are enough of them to overlap, the default stream otherwise.
pub(crate) fn tag_streams<D: StreamDevice + ?Sized>(
    graph: &mut KernelGraph,
    device: &D,
    cfg: &StreamAssignConfig,
) -> Result<StreamPlan, StreamAssignError> {
    let compute = device.default_stream();
    let order = graph.execution_order().to_vec();

    let mut collectives = Vec::new();
    let mut retagged = 0;
    for (pos, &id) in order.iter().enumerate() {
        if graph.node(id)?.op == cfg.collective_op {
            collectives.push(pos);
        } else if tag(graph, id, compute)? {
            retagged += 1;
        }
    }

    let comm = if cfg.overlap_enabled && collectives.len() >= cfg.overlap_threshold() {
        Some(
            device
                .create_stream()
                .map_err(StreamAssignError::StreamCreation)?,
        )
    } else {
        None
    };

    let collective_stream = comm.unwrap_or(compute);
    for &pos in &collectives {
        if tag(graph, order[pos], collective_stream)? {
            retagged += 1;
        }
    }

    debug!(
        graph = graph.name(),
        kernels = order.len(),
        collectives = collectives.len(),
        retagged,
        comm_stream = ?comm,
        "assigned kernel streams"
    );

    Ok(StreamPlan {
        compute,
        comm,
        collectives,
        retagged,
    })
}
