//! Kernel graph arena and its execution order.
//!
//! Nodes live in an append-only arena addressed by [`NodeId`]. The execution
//! order is a separate list of kernel ids and is only ever replaced as a whole
//! through [`KernelGraph::set_execution_order`].

pub mod attrs;
pub mod text;
pub mod topology;

use std::{collections::HashSet, fmt, fs, io, path::Path};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::device::StreamId;
use crate::kernel::KernelBuildInfo;

pub use attrs::{keys, AttrValue, Attrs};

/// Serialized graph format version enforced on load.
pub const GRAPH_FORMAT_VERSION: &str = "kgraph.v1";

fn default_format_version() -> String {
    GRAPH_FORMAT_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    F16,
    Bf16,
    F32,
    F64,
    Si32,
    Si64,
}

impl DType {
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Bool => "i1",
            DType::F16 => "f16",
            DType::Bf16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Si32 => "si32",
            DType::Si64 => "si64",
        }
    }

    pub fn parse(token: &str) -> Option<DType> {
        match token {
            "i1" => Some(DType::Bool),
            "f16" => Some(DType::F16),
            "bf16" => Some(DType::Bf16),
            "f32" => Some(DType::F32),
            "f64" => Some(DType::F64),
            "si32" => Some(DType::Si32),
            "si64" => Some(DType::Si64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Vec<usize>,
}

/// Result type of a node. Synchronization kernels produce [`ValueType::None`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    #[default]
    None,
    Tensor(TensorType),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::None => write!(f, "none"),
            ValueType::Tensor(tensor) => {
                let dims: Vec<String> = tensor.shape.iter().map(|d| d.to_string()).collect();
                write!(f, "{}[{}]", tensor.dtype.as_str(), dims.join("x"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Graph input with no producing kernel.
    Parameter,
    /// Schedulable kernel; only kernels may appear in the execution order.
    Kernel,
    /// Non-kernel node (tuple projection, depend, view) forwarding input `forward`.
    PassThrough { forward: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op: String,
    pub kind: NodeKind,
    pub inputs: SmallVec<[NodeId; 4]>,
    pub ty: ValueType,
    #[serde(default)]
    pub build_info: Option<KernelBuildInfo>,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Node {
    pub fn is_kernel(&self) -> bool {
        matches!(self.kind, NodeKind::Kernel)
    }

    /// Stream this node was assigned to.
    pub fn stream(&self) -> Result<StreamId, GraphError> {
        self.attrs.stream(self.id, keys::STREAM_ID)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {0} does not exist in the graph")]
    UnknownNode(NodeId),
    #[error("arena slot {slot} holds node {found}")]
    IdMismatch { slot: usize, found: NodeId },
    #[error("node {0} is not a kernel and cannot be scheduled")]
    NotAKernel(NodeId),
    #[error("node {0} appears more than once in the execution order")]
    DuplicateInOrder(NodeId),
    #[error("node name `{0}` is already taken")]
    DuplicateName(String),
    #[error("node {node} is missing required attribute `{key}`")]
    MissingAttr { node: NodeId, key: String },
    #[error("attribute `{key}` on node {node} holds a {found}, expected a {expected}")]
    AttrTypeMismatch {
        node: NodeId,
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("pass-through node {node} forwards input {forward} but has {inputs} inputs")]
    ForwardOutOfRange {
        node: NodeId,
        forward: usize,
        inputs: usize,
    },
    #[error("pass-through chain starting at node {0} never reaches a producer")]
    PassThroughCycle(NodeId),
    #[error("kernel {node} consumes {input} before it is scheduled")]
    UseBeforeSchedule { node: NodeId, input: NodeId },
    #[error("insertion offset {offset} lies outside an execution order of length {len}")]
    OffsetOutOfRange { offset: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum GraphSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("graph format version '{found}' does not match expected '{expected}'")]
    FormatVersionMismatch {
        found: String,
        expected: &'static str,
    },
    #[error("invalid graph: {0}")]
    Graph(#[from] GraphError),
}

#[derive(Debug, Error)]
pub enum GraphIoError {
    #[error(transparent)]
    Serialization(#[from] GraphSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelGraph {
    #[serde(default = "default_format_version")]
    pub format_version: String,
    name: String,
    nodes: Vec<Node>,
    execution_order: Vec<NodeId>,
}

impl KernelGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            format_version: GRAPH_FORMAT_VERSION.to_string(),
            name: name.into(),
            nodes: Vec::new(),
            execution_order: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(id.index()).ok_or(GraphError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|node| node.name == name).map(|node| node.id)
    }

    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        ty: ValueType,
    ) -> Result<NodeId, GraphError> {
        self.push_node(name.into(), "param".to_string(), NodeKind::Parameter, &[], ty)
    }

    /// Adds a kernel and appends it to the end of the execution order.
    pub fn add_kernel(
        &mut self,
        name: impl Into<String>,
        op: impl Into<String>,
        inputs: &[NodeId],
        ty: ValueType,
    ) -> Result<NodeId, GraphError> {
        let id = self.push_node(name.into(), op.into(), NodeKind::Kernel, inputs, ty)?;
        self.execution_order.push(id);
        Ok(id)
    }

    pub fn add_pass_through(
        &mut self,
        name: impl Into<String>,
        op: impl Into<String>,
        inputs: &[NodeId],
        forward: usize,
    ) -> Result<NodeId, GraphError> {
        let name = name.into();
        if forward >= inputs.len() {
            return Err(GraphError::ForwardOutOfRange {
                node: NodeId(self.nodes.len() as u32),
                forward,
                inputs: inputs.len(),
            });
        }
        self.push_node(
            name,
            op.into(),
            NodeKind::PassThrough { forward },
            inputs,
            ValueType::None,
        )
    }

    /// Creates an input-less kernel that is not yet part of the execution order.
    ///
    /// The node is named after its op (`Send` -> `%send0`, `%send1`, ...).
    pub fn new_kernel_node(&mut self, op: &str, ty: ValueType) -> NodeId {
        let name = self.fresh_name(op);
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            name,
            op: op.to_string(),
            kind: NodeKind::Kernel,
            inputs: SmallVec::new(),
            ty,
            build_info: None,
            attrs: Attrs::new(),
        });
        id
    }

    pub fn execution_order(&self) -> &[NodeId] {
        &self.execution_order
    }

    /// Replaces the execution order in one step after validating that every entry
    /// is a kernel and appears exactly once.
    pub fn set_execution_order(&mut self, order: Vec<NodeId>) -> Result<(), GraphError> {
        self.check_order(&order)?;
        self.execution_order = order;
        Ok(())
    }

    fn check_order(&self, order: &[NodeId]) -> Result<(), GraphError> {
        let mut seen = HashSet::with_capacity(order.len());
        for &id in order {
            if !self.node(id)?.is_kernel() {
                return Err(GraphError::NotAKernel(id));
            }
            if !seen.insert(id) {
                return Err(GraphError::DuplicateInOrder(id));
            }
        }
        Ok(())
    }

    /// Checks the invariants the builder methods maintain: every node sits in
    /// its own slot under a unique name, inputs and forwarded indices resolve,
    /// and the execution order holds each kernel at most once.
    ///
    /// Deserialized graphs go through this before they are handed out.
    pub fn validate_arena(&self) -> Result<(), GraphError> {
        let mut names = HashSet::with_capacity(self.nodes.len());
        for (slot, node) in self.nodes.iter().enumerate() {
            if node.id.index() != slot {
                return Err(GraphError::IdMismatch {
                    slot,
                    found: node.id,
                });
            }
            if !names.insert(node.name.as_str()) {
                return Err(GraphError::DuplicateName(node.name.clone()));
            }
            for &input in &node.inputs {
                self.node(input)?;
            }
            if let NodeKind::PassThrough { forward } = node.kind {
                if forward >= node.inputs.len() {
                    return Err(GraphError::ForwardOutOfRange {
                        node: node.id,
                        forward,
                        inputs: node.inputs.len(),
                    });
                }
            }
        }
        self.check_order(&self.execution_order)
    }

    /// Resolves `id` through pass-through nodes to the node that produces its value.
    pub fn visit_kernel(&self, id: NodeId) -> Result<NodeId, GraphError> {
        let mut current = id;
        for _ in 0..=self.nodes.len() {
            let node = self.node(current)?;
            match node.kind {
                NodeKind::PassThrough { forward } => {
                    current = *node.inputs.get(forward).ok_or(GraphError::ForwardOutOfRange {
                        node: node.id,
                        forward,
                        inputs: node.inputs.len(),
                    })?;
                }
                NodeKind::Kernel | NodeKind::Parameter => return Ok(current),
            }
        }
        Err(GraphError::PassThroughCycle(id))
    }

    /// Producers of every input of `id`, resolved through pass-through nodes.
    pub fn resolved_inputs(&self, id: NodeId) -> Result<SmallVec<[NodeId; 4]>, GraphError> {
        self.node(id)?
            .inputs
            .iter()
            .map(|&input| self.visit_kernel(input))
            .collect()
    }

    pub fn to_json_string(&self) -> Result<String, GraphSerdeError> {
        serde_json::to_string_pretty(self).map_err(GraphSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, GraphSerdeError> {
        let mut graph: KernelGraph = serde_json::from_str(src)?;
        graph.format_version = normalize_format_version(graph.format_version)?;
        graph.validate_arena()?;
        Ok(graph)
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, GraphSerdeError> {
        bincode::serialize(self).map_err(GraphSerdeError::from)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, GraphSerdeError> {
        let mut graph: KernelGraph = bincode::deserialize(bytes)?;
        graph.format_version = normalize_format_version(graph.format_version)?;
        graph.validate_arena()?;
        Ok(graph)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(GraphIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, GraphIoError> {
        let contents = fs::read_to_string(path)?;
        KernelGraph::from_json_str(&contents).map_err(GraphIoError::from)
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), GraphIoError> {
        let bytes = self.to_bincode_bytes()?;
        fs::write(path, bytes).map_err(GraphIoError::from)
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, GraphIoError> {
        let bytes = fs::read(path)?;
        KernelGraph::from_bincode_slice(&bytes).map_err(GraphIoError::from)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }

    fn push_node(
        &mut self,
        name: String,
        op: String,
        kind: NodeKind,
        inputs: &[NodeId],
        ty: ValueType,
    ) -> Result<NodeId, GraphError> {
        for &input in inputs {
            self.node(input)?;
        }
        if self.find(&name).is_some() {
            return Err(GraphError::DuplicateName(name));
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            name,
            op,
            kind,
            inputs: SmallVec::from_slice(inputs),
            ty,
            build_info: None,
            attrs: Attrs::new(),
        });
        Ok(id)
    }

    fn fresh_name(&self, op: &str) -> String {
        let prefix = op.to_ascii_lowercase();
        let mut counter = self.nodes.iter().filter(|node| node.op == op).count();
        loop {
            let candidate = format!("{prefix}{counter}");
            if self.find(&candidate).is_none() {
                return candidate;
            }
            counter += 1;
        }
    }
}

fn normalize_format_version(version: String) -> Result<String, GraphSerdeError> {
    if version.is_empty() {
        return Ok(GRAPH_FORMAT_VERSION.to_string());
    }
    if version == GRAPH_FORMAT_VERSION {
        Ok(version)
    } else {
        Err(GraphSerdeError::FormatVersionMismatch {
            found: version,
            expected: GRAPH_FORMAT_VERSION,
        })
    }
}
