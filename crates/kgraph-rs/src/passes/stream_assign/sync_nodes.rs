use thiserror::Error;

use crate::device::{DeviceError, EventHandle, StreamDevice};
use crate::graph::{keys, GraphError, KernelGraph, NodeId, ValueType};
use crate::kernel::{ops, KernelInfoError, KernelInfoSetter};

use super::pairs::SyncPair;

#[derive(Debug, Error)]
pub enum SyncNodeError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    KernelInfo(#[from] KernelInfoError),
}

/// Send/Recv kernels created for one pair, not yet scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyncNodes {
    pub send: NodeId,
    pub recv: NodeId,
    pub event: EventHandle,
}

/// Creates the event and both placeholder kernels for `pair`.
///
/// Each placeholder runs on the stream its mock node already occupies. Streams
/// are read before anything is allocated so a malformed pair leaves no trace.
pub(crate) fn materialize_pair<D: StreamDevice + ?Sized>(
    graph: &mut KernelGraph,
    device: &D,
    kernel_info: &dyn KernelInfoSetter,
    pair: &SyncPair,
) -> Result<SyncNodes, SyncNodeError> {
    let send_stream = graph.node(pair.mock_send)?.stream()?;
    let recv_stream = graph.node(pair.mock_recv)?.stream()?;

    let event = device.create_event()?;
    let send = create_stream_switch_node(graph, kernel_info, ops::SEND)?;
    let recv = create_stream_switch_node(graph, kernel_info, ops::RECV)?;

    let attrs = &mut graph.node_mut(send)?.attrs;
    attrs.set(keys::STREAM_ID, send_stream);
    attrs.set(keys::RECORD_EVENT, event);
    attrs.set(keys::RECORD_EVENT_STREAM, send_stream);

    let attrs = &mut graph.node_mut(recv)?.attrs;
    attrs.set(keys::STREAM_ID, recv_stream);
    attrs.set(keys::WAIT_EVENT, event);
    attrs.set(keys::WAIT_EVENT_STREAM, recv_stream);

    Ok(SyncNodes { send, recv, event })
}

fn create_stream_switch_node(
    graph: &mut KernelGraph,
    kernel_info: &dyn KernelInfoSetter,
    op: &str,
) -> Result<NodeId, SyncNodeError> {
    let id = graph.new_kernel_node(op, ValueType::None);
    kernel_info.set_kernel_info(graph.node_mut(id)?)?;
    Ok(id)
}
