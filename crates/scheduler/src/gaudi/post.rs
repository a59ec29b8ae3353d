//! Local improvements applied to a finished Gaudi order.

use graphsched_core::{Node, NodeId};
use graphsched_graph::Graph;
use tracing::debug;

use crate::deps::DependencyTable;
use crate::reorder::{earliest, latest, move_after, move_before};

/// Move every NaN/Inf probe right behind the producer of the tensor it
/// checks, when nothing else it waits on comes later. A bundled producer
/// keeps its bundle whole: the probe goes behind the bundle's last member.
/// Returns the number of probes moved.
pub fn reorder_nan_inf_probes(graph: &Graph, deps: &DependencyTable, order: &mut Vec<NodeId>) -> usize {
    let probes: Vec<NodeId> = order
        .iter()
        .copied()
        .filter(|&n| graph.node(n).is_some_and(Node::is_nan_inf_probe))
        .collect();

    let mut moved = 0;
    for probe in probes {
        let Some(target) = graph
            .node(probe)
            .and_then(|n| n.inputs.first())
            .and_then(|&t| graph.tensor_producer(t))
        else {
            continue;
        };
        if latest(order, deps.blocking(probe)) != Some(target) {
            debug!("Probe {} also waits on nodes after {}, leaving it in place", probe, target);
            continue;
        }
        // a bundled producer is followed by the rest of its bundle
        let bundle = graph.node(target).and_then(Node::bundle_index);
        let anchor = match bundle {
            Some(b) if graph.node(probe).and_then(Node::bundle_index) != Some(b) => order
                .iter()
                .rev()
                .copied()
                .find(|&n| graph.node(n).and_then(Node::bundle_index) == Some(b))
                .unwrap_or(target),
            _ => target,
        };
        if move_after(order, probe, anchor) {
            debug!("Moved probe {} next to {}", probe, anchor);
            moved += 1;
        }
    }
    moved
}

/// Push each unbundled memset down to just before its earliest dependent,
/// or before the first scheduled member of that dependent's bundle.
///
/// Memsets are collected in one forward scan and moved in reverse
/// discovery order, so a memset feeding another memset lands in front of
/// its already moved dependent. Returns the number of memsets moved.
pub fn optimize_memsets_location(graph: &Graph, deps: &DependencyTable, order: &mut Vec<NodeId>) -> usize {
    let mut candidates = Vec::new();
    for &n in order.iter() {
        let Some(node) = graph.node(n).filter(|n| n.is_memset()) else {
            continue;
        };
        if let Some(bundle) = node.bundle_index() {
            debug!("Memset {} belongs to bundle {}, not optimizing its location", n, bundle);
            continue;
        }
        if !deps.blocked(n).is_empty() {
            candidates.push(n);
        }
    }

    let mut moved = 0;
    for &memset in candidates.iter().rev() {
        let Some(first) = earliest(order, deps.blocked(memset)) else {
            continue;
        };
        let anchor = match graph.node(first).and_then(Node::bundle_index) {
            Some(bundle) => order
                .iter()
                .copied()
                .find(|&n| graph.node(n).and_then(Node::bundle_index) == Some(bundle))
                .unwrap_or(first),
            None => first,
        };
        if move_before(order, memset, anchor) {
            debug!("Moved memset {} before {}", memset, anchor);
            moved += 1;
        }
    }
    moved
}
