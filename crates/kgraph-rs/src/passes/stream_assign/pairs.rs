use crate::graph::{GraphError, NodeId};

use super::boundary::{Boundary, SwitchKind};

/// Send/Recv pair anchored on two existing kernels of the original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPair {
    pub kind: SwitchKind,
    /// Kernel whose stream records the event.
    pub mock_send: NodeId,
    /// Kernel whose stream waits on the event.
    pub mock_recv: NodeId,
    pub send_offset: usize,
    pub recv_offset: usize,
}

pub(crate) fn build_sync_pairs(
    order: &[NodeId],
    boundaries: &[Boundary],
) -> Result<Vec<SyncPair>, GraphError> {
    let len = order.len();
    boundaries
        .iter()
        .map(|boundary| {
            let (send_offset, recv_offset) = (boundary.send_offset(), boundary.recv_offset());
            for offset in [send_offset, recv_offset] {
                if offset > len {
                    return Err(GraphError::OffsetOutOfRange { offset, len });
                }
            }
            let node_at = |idx: usize| {
                order
                    .get(idx)
                    .copied()
                    .ok_or(GraphError::OffsetOutOfRange { offset: idx, len })
            };
            Ok(SyncPair {
                kind: boundary.kind,
                mock_send: node_at(boundary.mock_send)?,
                mock_recv: node_at(boundary.mock_recv)?,
                send_offset,
                recv_offset,
            })
        })
        .collect()
}
