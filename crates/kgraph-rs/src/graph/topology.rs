use std::collections::HashSet;

use crate::graph::{GraphError, KernelGraph, NodeKind};

/// Checks that every scheduled node is a kernel, is scheduled once, and only
/// consumes parameters or kernels scheduled before it.
pub fn validate_execution_order(graph: &KernelGraph) -> Result<(), GraphError> {
    let mut scheduled = HashSet::with_capacity(graph.execution_order().len());
    for &id in graph.execution_order() {
        let node = graph.node(id)?;
        if !node.is_kernel() {
            return Err(GraphError::NotAKernel(id));
        }
        for &input in &node.inputs {
            let producer = graph.visit_kernel(input)?;
            let ready = match graph.node(producer)?.kind {
                NodeKind::Parameter => true,
                _ => scheduled.contains(&producer),
            };
            if !ready {
                return Err(GraphError::UseBeforeSchedule {
                    node: id,
                    input: producer,
                });
            }
        }
        if !scheduled.insert(id) {
            return Err(GraphError::DuplicateInOrder(id));
        }
    }
    Ok(())
}
