extern crate self as kgraph_rs;

pub mod device;
mod env;
pub mod graph;
pub mod kernel;
pub mod optimizer;
pub mod passes;
pub mod pipeline;
pub mod wire;

pub use device::{EventHandle, StreamDevice, StreamId};
pub use graph::{GraphError, KernelGraph, Node, NodeId, NodeKind, ValueType};
