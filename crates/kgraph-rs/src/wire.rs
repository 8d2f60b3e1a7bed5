//! Launch plan handed to the runtime that dispatches streams and events.
//!
//! Handles are lowered to `u64` here; this is the only place the typed
//! attribute values are flattened.

use serde::{Deserialize, Serialize};

use crate::graph::{keys, GraphError, KernelGraph, NodeId, NodeKind};
use crate::kernel::ops;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOp {
    Record { event: u64 },
    Wait { event: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub node: NodeId,
    pub name: String,
    pub op: String,
    pub stream: u64,
    pub sync: Option<SyncOp>,
    /// Scheduled kernels whose results this launch reads.
    pub deps: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchPlan {
    pub graph: String,
    pub records: Vec<LaunchRecord>,
}

/// Flattens the execution order of a scheduled graph into launch records.
///
/// Every kernel must carry `stream_id`; Send and Recv kernels must also carry
/// their event and event stream.
pub fn export_launch_plan(graph: &KernelGraph) -> Result<LaunchPlan, GraphError> {
    let mut records = Vec::with_capacity(graph.execution_order().len());
    for &id in graph.execution_order() {
        let node = graph.node(id)?;
        let (stream, sync) = match node.op.as_str() {
            ops::SEND => (
                node.attrs.stream(id, keys::RECORD_EVENT_STREAM)?,
                Some(SyncOp::Record {
                    event: node.attrs.event(id, keys::RECORD_EVENT)?.raw(),
                }),
            ),
            ops::RECV => (
                node.attrs.stream(id, keys::WAIT_EVENT_STREAM)?,
                Some(SyncOp::Wait {
                    event: node.attrs.event(id, keys::WAIT_EVENT)?.raw(),
                }),
            ),
            _ => (node.stream()?, None),
        };

        let mut deps = Vec::new();
        for producer in graph.resolved_inputs(id)? {
            if matches!(graph.node(producer)?.kind, NodeKind::Kernel) && !deps.contains(&producer) {
                deps.push(producer);
            }
        }

        records.push(LaunchRecord {
            node: id,
            name: node.name.clone(),
            op: node.op.clone(),
            stream: stream.raw(),
            sync,
            deps,
        });
    }
    Ok(LaunchPlan {
        graph: graph.name().to_string(),
        records,
    })
}
