//! Pass infrastructure for kernel-graph compilation.
//!
//! A pass receives the whole graph plus a [`CompileContext`] carrying the
//! device, the kernel-info collaborator, configuration and collected warnings.

mod context;

use thiserror::Error;

use crate::device::StreamDevice;
use crate::graph::{GraphError, KernelGraph};
use crate::passes::StreamAssignError;

pub use context::{CompileContext, PassWarning, PipelineConfig, StreamAssignConfig};

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph (attributes or execution order).
    pub changed: bool,
    /// Streams allocated on the device.
    pub streams_created: usize,
    /// Synchronization pairs materialized as Send/Recv nodes.
    pub sync_pairs: usize,
    /// Nodes spliced into the execution order.
    pub inserted_nodes: usize,
    /// Boundaries that could not be located and were skipped with a warning.
    pub skipped_boundaries: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            streams_created: self.streams_created + other.streams_created,
            sync_pairs: self.sync_pairs + other.sync_pairs,
            inserted_nodes: self.inserted_nodes + other.inserted_nodes,
            skipped_boundaries: self.skipped_boundaries + other.skipped_boundaries,
        }
    }
}

#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    StreamAssign(#[from] StreamAssignError),
}

/// Canonical interface implemented by passes over a whole kernel graph.
pub trait GraphPass<D: StreamDevice + 'static>: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(
        &self,
        graph: &mut KernelGraph,
        cx: &mut CompileContext<'_, D>,
    ) -> Result<PassResult, PassError>;
}
