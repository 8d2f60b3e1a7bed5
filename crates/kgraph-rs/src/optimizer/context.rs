use serde::{Deserialize, Serialize};

use crate::device::StreamDevice;
use crate::env;
use crate::graph::NodeId;
use crate::kernel::{ops, KernelInfoSetter};

/// Fewest collectives for which a dedicated communication stream pays off.
const MIN_OVERLAP_COLLECTIVES: usize = 2;

fn default_collective_op() -> String {
    ops::ALL_REDUCE.to_string()
}

fn default_min_collectives() -> usize {
    MIN_OVERLAP_COLLECTIVES
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAssignConfig {
    /// Op name identifying collective kernels.
    #[serde(default = "default_collective_op")]
    pub collective_op: String,
    /// Collectives move to their own stream only when at least this many exist.
    #[serde(default = "default_min_collectives")]
    pub min_collectives_for_overlap: usize,
    /// When false every kernel stays on the default stream.
    #[serde(default = "default_true")]
    pub overlap_enabled: bool,
}

impl StreamAssignConfig {
    pub fn overlap_threshold(&self) -> usize {
        self.min_collectives_for_overlap.max(MIN_OVERLAP_COLLECTIVES)
    }
}

impl Default for StreamAssignConfig {
    fn default() -> Self {
        Self {
            collective_op: default_collective_op(),
            min_collectives_for_overlap: MIN_OVERLAP_COLLECTIVES,
            overlap_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub stream_assign: StreamAssignConfig,
    /// Validate the execution order before and after scheduling.
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Log per-pass statistics at `info` level.
    #[serde(default)]
    pub log_stats: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream_assign: StreamAssignConfig::default(),
            verify: true,
            log_stats: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `KGRAPH_*` environment variables, read once per process.
    pub fn from_env() -> Self {
        Self::from_lookup(crate::env::lookup)
    }

    /// Defaults overridden by whatever `lookup` returns for each `KGRAPH_*` name.
    ///
    /// `KGRAPH_DISABLE_COMM_STREAM` clears `overlap_enabled`, `KGRAPH_COLLECTIVE_OP`
    /// replaces the collective op and `KGRAPH_PASS_STATS` sets `log_stats`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).is_some_and(|value| env::parse_bool(&value));
        let mut cfg = Self::default();
        if flag(env::DISABLE_COMM_STREAM) {
            cfg.stream_assign.overlap_enabled = false;
        }
        if let Some(op) = lookup(env::COLLECTIVE_OP)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            cfg.stream_assign.collective_op = op;
        }
        cfg.log_stats = flag(env::PASS_STATS);
        cfg
    }
}

/// Recoverable condition recorded by a pass; compilation still succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassWarning {
    pub pass: &'static str,
    pub node: Option<NodeId>,
    pub message: String,
}

pub struct CompileContext<'a, D: StreamDevice + 'static> {
    device: &'a D,
    kernel_info: &'a dyn KernelInfoSetter,
    cfg: PipelineConfig,
    warnings: Vec<PassWarning>,
}

impl<'a, D: StreamDevice + 'static> CompileContext<'a, D> {
    pub fn new(device: &'a D, kernel_info: &'a dyn KernelInfoSetter, cfg: PipelineConfig) -> Self {
        Self {
            device,
            kernel_info,
            cfg,
            warnings: Vec::new(),
        }
    }

    pub fn device(&self) -> &'a D {
        self.device
    }

    pub fn kernel_info(&self) -> &'a dyn KernelInfoSetter {
        self.kernel_info
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn warn(&mut self, warning: PassWarning) {
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[PassWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<PassWarning> {
        std::mem::take(&mut self.warnings)
    }
}
