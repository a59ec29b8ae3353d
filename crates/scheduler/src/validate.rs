use std::collections::HashMap;

use graphsched_core::{GraphError, NodeId};
use graphsched_graph::{EdgeFilter, Graph};

use crate::deps::DependencyTable;
use crate::error::{Result, ScheduleError};

/// Every node exactly once, every data, control and barrier blocker first.
pub fn validate_schedule(graph: &Graph, order: &[NodeId]) -> Result<()> {
    let mut position: HashMap<NodeId, usize> = HashMap::with_capacity(order.len());
    for (i, &n) in order.iter().enumerate() {
        if !graph.contains(n) {
            return Err(GraphError::NodeNotFound(n).into());
        }
        if position.insert(n, i).is_some() {
            return Err(ScheduleError::DuplicateNode(n));
        }
    }
    if position.len() != graph.len() {
        return Err(ScheduleError::NotAllScheduled {
            scheduled: position.len(),
            total: graph.len(),
        });
    }

    let deps = DependencyTable::new(graph, EdgeFilter::Both);
    for (&node, &at) in &position {
        for &blocking in deps.blocking(node) {
            if position.get(&blocking).map_or(true, |&p| p >= at) {
                return Err(ScheduleError::OrderViolation { blocking, blocked: node });
            }
        }
    }
    Ok(())
}
