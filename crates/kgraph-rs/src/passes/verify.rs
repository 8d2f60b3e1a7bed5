use crate::device::StreamDevice;
use crate::graph::{topology::validate_execution_order, KernelGraph};
use crate::optimizer::{CompileContext, GraphPass, PassError, PassResult};

/// Fails compilation when the execution order is malformed.
#[derive(Debug, Default)]
pub struct VerifyExecutionOrderPass;

impl VerifyExecutionOrderPass {
    const NAME: &'static str = "verify-order";
}

impl<D: StreamDevice + 'static> GraphPass<D> for VerifyExecutionOrderPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        graph: &mut KernelGraph,
        _cx: &mut CompileContext<'_, D>,
    ) -> Result<PassResult, PassError> {
        validate_execution_order(graph)?;
        Ok(PassResult::default())
    }
}
