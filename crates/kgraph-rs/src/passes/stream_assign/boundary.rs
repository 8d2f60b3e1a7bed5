//! Locates where a collective's stream has to be synchronized with its neighbours.
//!
//! All positions are indices into the execution order as it was before any
//! placeholder is inserted.

use std::fmt;

use tracing::debug;

use crate::device::StreamId;
use crate::graph::{GraphError, KernelGraph, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchKind {
    /// Compute stream -> communication stream, before the collective runs.
    CollectiveInput,
    /// Communication stream -> compute stream, before the first consumer runs.
    CollectiveOutput,
}

impl fmt::Display for SwitchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchKind::CollectiveInput => write!(f, "collective-input"),
            SwitchKind::CollectiveOutput => write!(f, "collective-output"),
        }
    }
}

/// A located boundary: `mock_send` finishes work that `mock_recv` depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Boundary {
    pub kind: SwitchKind,
    pub mock_send: usize,
    pub mock_recv: usize,
}

impl Boundary {
    /// The record placeholder goes right after the sending node.
    pub fn send_offset(&self) -> usize {
        self.mock_send + 1
    }

    /// The wait placeholder goes right before the receiving node.
    pub fn recv_offset(&self) -> usize {
        self.mock_recv
    }
}

/// Boundary that could not be located for a collective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryMiss {
    pub kind: SwitchKind,
    pub collective: NodeId,
}

impl BoundaryMiss {
    pub fn message(&self) -> &'static str {
        match self.kind {
            SwitchKind::CollectiveInput => {
                "no kernel on another stream precedes the collective; skipping input synchronization"
            }
            SwitchKind::CollectiveOutput => {
                "no kernel on another stream consumes the collective; skipping output synchronization"
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct BoundaryScan {
    pub boundaries: Vec<Boundary>,
    pub misses: Vec<BoundaryMiss>,
}

/// Scans `order` once, left to right, locating both boundaries of every collective.
///
/// The two sides are searched independently: a collective without a consumer
/// still gets its input synchronized.
pub(crate) fn locate_boundaries(
    graph: &KernelGraph,
    order: &[NodeId],
    collectives: &[usize],
) -> Result<BoundaryScan, GraphError> {
    let mut scan = BoundaryScan::default();
    for &pos in collectives {
        let collective = order[pos];
        let stream = graph.node(collective)?.stream()?;

        match find_send_position(graph, order, pos, stream)? {
            Some(mock_send) => scan.boundaries.push(Boundary {
                kind: SwitchKind::CollectiveInput,
                mock_send,
                mock_recv: pos,
            }),
            None => scan.misses.push(BoundaryMiss {
                kind: SwitchKind::CollectiveInput,
                collective,
            }),
        }

        match find_recv_position(graph, order, pos, stream)? {
            Some(mock_recv) => scan.boundaries.push(Boundary {
                kind: SwitchKind::CollectiveOutput,
                mock_send: pos,
                mock_recv,
            }),
            None => scan.misses.push(BoundaryMiss {
                kind: SwitchKind::CollectiveOutput,
                collective,
            }),
        }
    }
    debug!(
        located = scan.boundaries.len(),
        missed = scan.misses.len(),
        "located collective boundaries"
    );
    Ok(scan)
}

/// Last kernel before `pos` running on a stream other than the collective's.
///
/// Streams execute in submission order, so recording there covers every
/// producer the collective may read from that stream.
fn find_send_position(
    graph: &KernelGraph,
    order: &[NodeId],
    pos: usize,
    stream: StreamId,
) -> Result<Option<usize>, GraphError> {
    for idx in (0..pos).rev() {
        if graph.node(order[idx])?.stream()? != stream {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

/// First kernel after `pos` on another stream that reads the collective's result,
/// looking through pass-through nodes.
fn find_recv_position(
    graph: &KernelGraph,
    order: &[NodeId],
    pos: usize,
    stream: StreamId,
) -> Result<Option<usize>, GraphError> {
    let collective = order[pos];
    for (idx, &id) in order.iter().enumerate().skip(pos + 1) {
        if graph.node(id)?.stream()? == stream {
            continue;
        }
        if graph.resolved_inputs(id)?.contains(&collective) {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}
