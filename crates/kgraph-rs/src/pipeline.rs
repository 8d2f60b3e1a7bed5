use std::sync::Arc;

use anyhow::Context;
use tracing::{debug_span, info};

use crate::device::StreamDevice;
use crate::graph::KernelGraph;
use crate::kernel::KernelInfoSetter;
use crate::optimizer::{
    CompileContext, GraphPass, PassError, PassResult, PassWarning, PipelineConfig,
};
use crate::passes::{StreamAssignPass, VerifyExecutionOrderPass};

pub struct PipelineBuilder<D: StreamDevice + 'static> {
    passes: Vec<Arc<dyn GraphPass<D>>>,
}

impl<D: StreamDevice + 'static> PipelineBuilder<D> {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn GraphPass<D>>) {
        self.passes.push(pass);
    }

    pub fn finish(self) -> Pipeline<D> {
        Pipeline {
            passes: self.passes,
        }
    }
}

impl<D: StreamDevice + 'static> Default for PipelineBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered list of passes run once each over a kernel graph.
pub struct Pipeline<D: StreamDevice + 'static> {
    passes: Vec<Arc<dyn GraphPass<D>>>,
}

impl<D: StreamDevice + 'static> Pipeline<D> {
    /// Stream assignment, bracketed by order validation when `cfg.verify` is set.
    pub fn scheduling(cfg: &PipelineConfig) -> Self {
        let mut builder = PipelineBuilder::new();
        if cfg.verify {
            builder.pass(Arc::new(VerifyExecutionOrderPass));
        }
        builder.pass(Arc::new(StreamAssignPass));
        if cfg.verify {
            builder.pass(Arc::new(VerifyExecutionOrderPass));
        }
        builder.finish()
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Runs every pass in order, stopping at the first failure.
    pub fn run(
        &self,
        graph: &mut KernelGraph,
        cx: &mut CompileContext<'_, D>,
    ) -> Result<PassResult, PassError> {
        let log_stats = cx.config().log_stats;
        let mut totals = PassResult::default();
        for pass in &self.passes {
            let _span = debug_span!("pass", name = pass.name(), graph = graph.name()).entered();
            let stats = pass.run(graph, cx)?;
            if log_stats {
                info!(
                    pass = pass.name(),
                    graph = graph.name(),
                    changed = stats.changed,
                    streams_created = stats.streams_created,
                    sync_pairs = stats.sync_pairs,
                    inserted_nodes = stats.inserted_nodes,
                    skipped_boundaries = stats.skipped_boundaries,
                    order_len = graph.execution_order().len(),
                    "pass stats"
                );
            }
            totals = totals.merge(stats);
        }
        Ok(totals)
    }
}

/// Outcome of [`schedule_graph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub result: PassResult,
    pub warnings: Vec<PassWarning>,
}

/// Runs the scheduling pipeline over `graph` with the given collaborators.
pub fn schedule_graph<D: StreamDevice + 'static>(
    graph: &mut KernelGraph,
    device: &D,
    kernel_info: &dyn KernelInfoSetter,
    cfg: PipelineConfig,
) -> anyhow::Result<ScheduleOutcome> {
    let pipeline = Pipeline::scheduling(&cfg);
    let mut cx = CompileContext::new(device, kernel_info, cfg);
    let result = pipeline.run(graph, &mut cx).with_context(|| {
        format!(
            "scheduling graph @{} on device `{}` failed",
            graph.name(),
            device.device_name()
        )
    })?;
    Ok(ScheduleOutcome {
        result,
        warnings: cx.take_warnings(),
    })
}
