//! Blocking relations the schedulers run on: graph edges under a filter,
//! plus annotation barriers whenever control ordering is in play.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use graphsched_core::NodeId;
use graphsched_graph::{EdgeFilter, Graph};

#[derive(Debug, Clone, Default)]
pub struct DependencyTable {
    blocking: BTreeMap<NodeId, Vec<NodeId>>,
    blocked: BTreeMap<NodeId, Vec<NodeId>>,
}

impl DependencyTable {
    pub fn new(graph: &Graph, filter: EdgeFilter) -> Self {
        let mut blocking = BTreeMap::new();
        let mut blocked: BTreeMap<NodeId, BTreeSet<NodeId>> =
            graph.node_ids().map(|n| (n, BTreeSet::new())).collect();

        for node in graph.nodes() {
            let mut blockers: BTreeSet<NodeId> = graph.producers(node.id, filter).into_iter().collect();
            if filter != EdgeFilter::Data {
                blockers.extend(
                    node.annotation
                        .barriers
                        .iter()
                        .copied()
                        .filter(|&b| b != node.id && graph.contains(b)),
                );
            }
            for &b in &blockers {
                if let Some(set) = blocked.get_mut(&b) {
                    set.insert(node.id);
                }
            }
            blocking.insert(node.id, blockers.into_iter().collect());
        }

        Self {
            blocking,
            blocked: blocked
                .into_iter()
                .map(|(n, set)| (n, set.into_iter().collect()))
                .collect(),
        }
    }

    /// Nodes that must run before `node`, sorted by id.
    pub fn blocking(&self, node: NodeId) -> &[NodeId] {
        self.blocking.get(&node).map_or(&[], Vec::as_slice)
    }

    /// Nodes waiting on `node`, sorted by id.
    pub fn blocked(&self, node: NodeId) -> &[NodeId] {
        self.blocked.get(&node).map_or(&[], Vec::as_slice)
    }

    pub fn in_degree(&self, node: NodeId) -> usize {
        self.blocking(node).len()
    }

    pub fn in_degrees(&self) -> HashMap<NodeId, usize> {
        self.blocking.iter().map(|(&n, b)| (n, b.len())).collect()
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.blocking
            .iter()
            .filter(|(_, b)| b.is_empty())
            .map(|(&n, _)| n)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.blocking.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocking.is_empty()
    }

    /// Kahn order with id tie-break, `None` on a cycle.
    pub fn topological_order(&self) -> Option<Vec<NodeId>> {
        let mut in_degree = self.in_degrees();
        let mut ready: BTreeSet<NodeId> = self.roots().into_iter().collect();
        let mut order = Vec::with_capacity(self.len());
        while let Some(n) = ready.pop_first() {
            order.push(n);
            for &c in self.blocked(n) {
                if let Some(d) = in_degree.get_mut(&c) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(c);
                    }
                }
            }
        }
        (order.len() == self.len()).then_some(order)
    }
}
