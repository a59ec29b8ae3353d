//! Whole-graph ordering and reachability queries.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use graphsched_core::NodeId;

use crate::store::{EdgeFilter, Graph};

/// Kahn's algorithm with creation-id tie-break. `None` if the graph has a cycle.
pub fn topological_order(graph: &Graph, filter: EdgeFilter) -> Option<Vec<NodeId>> {
    let mut in_degree: HashMap<NodeId, usize> = graph
        .node_ids()
        .map(|n| (n, graph.in_degree(n, filter)))
        .collect();
    let mut ready: BTreeSet<NodeId> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(n) = ready.pop_first() {
        order.push(n);
        for c in graph.consumers(n, filter) {
            if let Some(d) = in_degree.get_mut(&c) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(c);
                }
            }
        }
    }

    (order.len() == graph.len()).then_some(order)
}

pub fn is_acyclic(graph: &Graph) -> bool {
    topological_order(graph, EdgeFilter::Both).is_some()
}

/// Nodes that name each node as an annotation barrier.
fn barrier_consumers(graph: &Graph) -> HashMap<NodeId, Vec<NodeId>> {
    let mut consumers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for node in graph.nodes() {
        for &b in &node.annotation.barriers {
            consumers.entry(b).or_default().push(node.id);
        }
    }
    consumers
}

/// True if `to` can be reached from `from` over data edges, control edges
/// and annotation barriers, the same relation schedulers order by.
/// A node reaches itself.
pub fn is_reachable(graph: &Graph, from: NodeId, to: NodeId) -> bool {
    if from == to {
        return true;
    }
    let barriers = barrier_consumers(graph);
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([from]);
    while let Some(n) = queue.pop_front() {
        let behind_barrier = barriers.get(&n).into_iter().flatten().copied();
        for c in graph.consumers(n, EdgeFilter::Both).into_iter().chain(behind_barrier) {
            if c == to {
                return true;
            }
            if visited.insert(c) {
                queue.push_back(c);
            }
        }
    }
    false
}

/// Number of distinct paths from `from` to `to`, saturating at `u64::MAX`.
pub fn number_of_paths(graph: &Graph, from: NodeId, to: NodeId) -> u64 {
    if from == to {
        return 1;
    }
    let Some(order) = topological_order(graph, EdgeFilter::Both) else {
        return 0;
    };
    let mut paths: HashMap<NodeId, u64> = HashMap::new();
    paths.insert(from, 1);
    for n in order {
        if n == to {
            break;
        }
        let Some(&count) = paths.get(&n) else {
            continue;
        };
        for c in graph.consumers(n, EdgeFilter::Both) {
            let entry = paths.entry(c).or_default();
            *entry = entry.saturating_add(count);
        }
    }
    paths.get(&to).copied().unwrap_or(0)
}
