//! Graph passes run by the compilation pipeline.

mod stream_assign;
mod verify;

pub use stream_assign::{
    run_stream_assignment, splice_order, BoundaryMiss, SpliceSet, StreamAssignError,
    StreamAssignPass, StreamAssignReport, SwitchKind, SyncNodeError, SyncPair,
};
pub use verify::VerifyExecutionOrderPass;

pub use crate::optimizer::{GraphPass, PassResult};
