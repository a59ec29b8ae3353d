use std::collections::HashMap;

use graphsched_core::{NodeId, NodeList};
use graphsched_graph::{EdgeFilter, Graph};
use tracing::debug;

use crate::deps::DependencyTable;
use crate::error::{Result, ScheduleError};
use crate::free_nodes::{AuxiliaryBlocking, FreeNodes, NodeOrder};
use crate::order::DefaultOrder;
use crate::NodeScheduler;

/// Kahn traversal: repeatedly schedule the frontier minimum and free the
/// nodes it was the last blocker of.
pub fn run_bfs<O, B>(graph: &Graph, deps: &DependencyTable, mut free: FreeNodes<O, B>) -> Result<NodeList>
where
    O: NodeOrder,
    B: AuxiliaryBlocking<O::Key>,
{
    let mut in_degree = deps.in_degrees();
    for root in deps.roots() {
        free.insert(graph, root);
    }

    let mut order = Vec::with_capacity(deps.len());
    while let Some(node) = free.pop_next() {
        order.push(node);
        release_consumers(deps, &mut in_degree, node, |n| {
            free.insert(graph, n);
        })?;
    }

    if order.len() != deps.len() {
        return Err(ScheduleError::NotAllScheduled {
            scheduled: order.len(),
            total: deps.len(),
        });
    }
    Ok(order)
}

/// Decrement the in-degree of everything `node` blocks and hand the nodes
/// reaching zero to `on_free`, in id order.
pub(crate) fn release_consumers(
    deps: &DependencyTable,
    in_degree: &mut HashMap<NodeId, usize>,
    node: NodeId,
    mut on_free: impl FnMut(NodeId),
) -> Result<()> {
    for &c in deps.blocked(node) {
        let d = in_degree.get_mut(&c).ok_or(ScheduleError::NotVisited(c))?;
        *d = d.checked_sub(1).ok_or(ScheduleError::NegativeInDegree(c))?;
        if *d == 0 {
            on_free(c);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct BfsScheduler {
    order: DefaultOrder,
    filter: EdgeFilter,
}

impl BfsScheduler {
    pub fn new(order: DefaultOrder, filter: EdgeFilter) -> Self {
        Self { order, filter }
    }
}

impl NodeScheduler for BfsScheduler {
    fn name(&self) -> &'static str {
        "bfs"
    }

    fn schedule_nodes(&self, graph: &Graph) -> Result<NodeList> {
        let deps = DependencyTable::new(graph, self.filter);
        let order = run_bfs(graph, &deps, FreeNodes::new(self.order))?;
        debug!("BFS scheduled {} nodes", order.len());
        Ok(order)
    }
}
