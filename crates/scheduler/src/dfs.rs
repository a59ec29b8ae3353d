use std::collections::HashSet;

use graphsched_core::NodeList;
use graphsched_graph::{EdgeFilter, Graph};
use tracing::debug;

use crate::bfs::release_consumers;
use crate::deps::DependencyTable;
use crate::error::{Result, ScheduleError};
use crate::free_nodes::{FreeNodes, NodeOrder};
use crate::order::DefaultOrder;
use crate::NodeScheduler;

/// Depth-first drain: the most recently freed branch is followed to its end
/// before siblings are resumed. Roots are taken in frontier order and each
/// node is emitted when it is popped from the stack, once its last blocker
/// has been emitted.
///
/// A node is never emitted ahead of a blocker, so on a diamond `a -> {b, c}
/// -> d` the order is `[a, b, c, d]` rather than a raw post-order that would
/// put `d` before `c`.
pub fn run_dfs<O: NodeOrder>(graph: &Graph, deps: &DependencyTable, roots: FreeNodes<O>) -> Result<NodeList> {
    let mut in_degree = deps.in_degrees();
    let mut scheduled = HashSet::with_capacity(deps.len());
    let mut order = Vec::with_capacity(deps.len());
    let mut stack = Vec::new();

    for root in roots.iter() {
        if scheduled.contains(&root) {
            continue;
        }
        stack.push(root);
        while let Some(node) = stack.pop() {
            if !scheduled.insert(node) {
                continue;
            }
            order.push(node);

            let mut ready = Vec::new();
            release_consumers(deps, &mut in_degree, node, |c| ready.push(c))?;
            // most preferred child ends on top of the stack
            ready.sort_by_cached_key(|&c| (roots.order().key(graph, c), c));
            stack.extend(ready.into_iter().rev());
        }
    }

    if order.len() != deps.len() {
        return Err(ScheduleError::NotAllScheduled {
            scheduled: order.len(),
            total: deps.len(),
        });
    }
    Ok(order)
}

#[derive(Debug, Clone, Copy)]
pub struct DfsScheduler {
    order: DefaultOrder,
    filter: EdgeFilter,
}

impl DfsScheduler {
    pub fn new(order: DefaultOrder, filter: EdgeFilter) -> Self {
        Self { order, filter }
    }
}

impl NodeScheduler for DfsScheduler {
    fn name(&self) -> &'static str {
        "dfs"
    }

    fn schedule_nodes(&self, graph: &Graph) -> Result<NodeList> {
        let deps = DependencyTable::new(graph, self.filter);
        let mut roots = FreeNodes::new(self.order);
        for root in deps.roots() {
            roots.insert(graph, root);
        }
        let order = run_dfs(graph, &deps, roots)?;
        debug!("DFS scheduled {} nodes", order.len());
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use graphsched_core::{NodeBuilder, NodeId};

    use super::*;

    fn dfs() -> DfsScheduler {
        DfsScheduler::new(DefaultOrder::new(false), EdgeFilter::Both)
    }

    /// a -> b, a -> c, b -> d
    #[test]
    fn drains_branch_before_sibling() {
        let mut g = Graph::new();
        let ab = g.add_tensor("ab", 8);
        let ac = g.add_tensor("ac", 8);
        let bd = g.add_tensor("bd", 8);
        let a = g.add_node(NodeBuilder::new("a"), &[], &[ab, ac]).unwrap();
        let b = g.add_node(NodeBuilder::new("b"), &[ab], &[bd]).unwrap();
        let c = g.add_node(NodeBuilder::new("c"), &[ac], &[]).unwrap();
        let d = g.add_node(NodeBuilder::new("d"), &[bd], &[]).unwrap();

        assert_eq!(dfs().schedule_nodes(&g).unwrap(), vec![a, b, d, c]);
    }

    #[test]
    fn join_waits_for_all_blockers() {
        let mut g = Graph::new();
        let ab = g.add_tensor("ab", 8);
        let ac = g.add_tensor("ac", 8);
        let bd = g.add_tensor("bd", 8);
        let cd = g.add_tensor("cd", 8);
        let a = g.add_node(NodeBuilder::new("a"), &[], &[ab, ac]).unwrap();
        let b = g.add_node(NodeBuilder::new("b"), &[ab], &[bd]).unwrap();
        let c = g.add_node(NodeBuilder::new("c"), &[ac], &[cd]).unwrap();
        let d = g.add_node(NodeBuilder::new("d"), &[bd, cd], &[]).unwrap();

        assert_eq!(dfs().schedule_nodes(&g).unwrap(), vec![a, b, c, d]);
    }

    #[test]
    fn node_freed_by_later_root_is_scheduled() {
        let mut g = Graph::new();
        let t0 = g.add_tensor("t0", 8);
        let t1 = g.add_tensor("t1", 8);
        let r0 = g.add_node(NodeBuilder::new("r0"), &[], &[t0]).unwrap();
        let r1 = g.add_node(NodeBuilder::new("r1"), &[], &[t1]).unwrap();
        let join = g.add_node(NodeBuilder::new("join"), &[t0, t1], &[]).unwrap();

        let order: Vec<NodeId> = dfs().schedule_nodes(&g).unwrap();
        assert_eq!(order, vec![r0, r1, join]);
    }
}
