//! Kernel build metadata and the registry used to select it.
//!
//! Kernel selection for regular compute kernels happens upstream; the passes in
//! this crate only need to make the nodes they create schedulable, which goes
//! through [`KernelInfoSetter`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{Node, ValueType};

/// Op names with a fixed meaning for the scheduling passes.
pub mod ops {
    /// Records an event on the stream it is launched on.
    pub const SEND: &str = "Send";
    /// Makes the stream it is launched on wait for an event.
    pub const RECV: &str = "Recv";
    pub const ALL_REDUCE: &str = "AllReduce";
}

pub const DEFAULT_FORMAT: &str = "DefaultFormat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelType {
    Compute,
    Collective,
    /// Handled by the runtime itself (event record/wait), no device code.
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelBuildInfo {
    pub kernel_type: KernelType,
    pub input_formats: Vec<String>,
    pub output_formats: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpDescriptor {
    pub name: String,
    pub kernel_type: KernelType,
    /// Whether the op's output value can be inferred by tracing the graph.
    /// Runtime ops produce no value and opt out.
    pub graph_value_inference: bool,
}

impl OpDescriptor {
    pub fn new(name: impl Into<String>, kernel_type: KernelType) -> Self {
        Self {
            name: name.into(),
            kernel_type,
            graph_value_inference: kernel_type != KernelType::Runtime,
        }
    }

    pub fn with_graph_value_inference(mut self, enabled: bool) -> Self {
        self.graph_value_inference = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelInfoError {
    #[error("no kernel registered for op `{op}`")]
    UnregisteredOp { op: String },
    #[error("kernel selection for op `{op}` failed: {reason}")]
    Selection { op: String, reason: String },
}

/// Attaches kernel build info to a freshly constructed node.
pub trait KernelInfoSetter: Send + Sync {
    fn set_kernel_info(&self, node: &mut Node) -> Result<(), KernelInfoError>;
}

#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    ops: HashMap<String, OpDescriptor>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the event ops and the default collective.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(OpDescriptor::new(ops::SEND, KernelType::Runtime));
        registry.register(OpDescriptor::new(ops::RECV, KernelType::Runtime));
        registry.register(OpDescriptor::new(ops::ALL_REDUCE, KernelType::Collective));
        registry
    }

    pub fn register(&mut self, descriptor: OpDescriptor) -> Option<OpDescriptor> {
        self.ops.insert(descriptor.name.clone(), descriptor)
    }

    pub fn get(&self, op: &str) -> Option<&OpDescriptor> {
        self.ops.get(op)
    }

    /// Unregistered ops are treated as not inferable.
    pub fn supports_graph_value_inference(&self, op: &str) -> bool {
        self.get(op).is_some_and(|desc| desc.graph_value_inference)
    }
}

/// [`KernelInfoSetter`] backed by an [`OpRegistry`]; unregistered ops are rejected.
#[derive(Debug, Clone)]
pub struct RegistryKernelInfoSetter {
    registry: OpRegistry,
}

impl RegistryKernelInfoSetter {
    pub fn new(registry: OpRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }
}

impl Default for RegistryKernelInfoSetter {
    fn default() -> Self {
        Self::new(OpRegistry::with_defaults())
    }
}

impl KernelInfoSetter for RegistryKernelInfoSetter {
    fn set_kernel_info(&self, node: &mut Node) -> Result<(), KernelInfoError> {
        let descriptor =
            self.registry
                .get(&node.op)
                .ok_or_else(|| KernelInfoError::UnregisteredOp {
                    op: node.op.clone(),
                })?;
        let output_formats = match node.ty {
            ValueType::None => Vec::new(),
            ValueType::Tensor(_) => vec![DEFAULT_FORMAT.to_string()],
        };
        node.build_info = Some(KernelBuildInfo {
            kernel_type: descriptor.kernel_type,
            input_formats: vec![DEFAULT_FORMAT.to_string(); node.inputs.len()],
            output_formats,
        });
        Ok(())
    }
}
