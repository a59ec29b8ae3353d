use graphsched_core::{NodeId, ScheduleConfig};
use graphsched_graph::Graph;

use crate::free_nodes::NodeOrder;
use crate::max_path::{PathMetrics, PathPriority};

/// Where a node sits relative to other work: non-scalar bundles, then
/// unbundled nodes, then scalar-pipe bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    Bundle,
    Unbundled,
    ScalarPipe,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GaudiKey {
    pub rank: Rank,
    pub bundle_index: u32,
    pub operation_index: u32,
    pub path: Option<PathPriority>,
    pub parent_id: Option<u64>,
}

/// Bundle and engine aware order.
#[derive(Debug, Clone, Default)]
pub struct GaudiOrder {
    parent_id_schedule: bool,
    metrics: Option<PathMetrics>,
}

impl GaudiOrder {
    pub fn new(parent_id_schedule: bool, metrics: Option<PathMetrics>) -> Self {
        Self {
            parent_id_schedule,
            metrics,
        }
    }

    pub fn from_config(config: &ScheduleConfig, metrics: Option<PathMetrics>) -> Self {
        Self::new(config.enable_parent_id_schedule, metrics)
    }
}

impl NodeOrder for GaudiOrder {
    type Key = GaudiKey;

    fn key(&self, graph: &Graph, node: NodeId) -> GaudiKey {
        let Some(n) = graph.node(node) else {
            return GaudiKey {
                rank: Rank::Unbundled,
                bundle_index: 0,
                operation_index: 0,
                path: None,
                parent_id: None,
            };
        };
        match n.bundle_info() {
            Some(info) => GaudiKey {
                rank: if info.is_scalar_pipe() { Rank::ScalarPipe } else { Rank::Bundle },
                bundle_index: info.bundle_index,
                operation_index: info.operation_index,
                path: None,
                parent_id: None,
            },
            None => GaudiKey {
                rank: Rank::Unbundled,
                bundle_index: 0,
                operation_index: 0,
                path: self.metrics.as_ref().map(|m| m.priority(graph, node)),
                parent_id: self.parent_id_schedule.then_some(n.parent_id),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use graphsched_core::{BundleInfo, BundleType, NodeBuilder};

    use super::*;

    #[test]
    fn ranks_and_indices() {
        let mut g = Graph::new();
        let plain = g.add_node(NodeBuilder::new("plain"), &[], &[]).unwrap();
        let scalar = g
            .add_node(NodeBuilder::new("scalar").bundle(BundleInfo::new(0, BundleType::ScalarPipe)), &[], &[])
            .unwrap();
        let late = g
            .add_node(
                NodeBuilder::new("late").bundle(BundleInfo::new(2, BundleType::Tpc).with_operation_index(0)),
                &[],
                &[],
            )
            .unwrap();
        let second = g
            .add_node(
                NodeBuilder::new("second").bundle(BundleInfo::new(1, BundleType::Mme).with_operation_index(1)),
                &[],
                &[],
            )
            .unwrap();
        let first = g
            .add_node(
                NodeBuilder::new("first").bundle(BundleInfo::new(1, BundleType::Mme).with_operation_index(0)),
                &[],
                &[],
            )
            .unwrap();

        let order = GaudiOrder::new(false, None);
        let mut nodes = vec![plain, scalar, late, second, first];
        nodes.sort_by_key(|&n| (order.key(&g, n), n));
        assert_eq!(nodes, vec![first, second, late, plain, scalar]);
    }

    #[test]
    fn parent_groups_unbundled_only() {
        let mut g = Graph::new();
        let a = g.add_node(NodeBuilder::new("a").parent(7), &[], &[]).unwrap();
        let b = g.add_node(NodeBuilder::new("b").parent(3), &[], &[]).unwrap();
        let order = GaudiOrder::new(true, None);
        assert!(order.key(&g, b) < order.key(&g, a));
        assert_eq!(GaudiOrder::new(false, None).key(&g, a), GaudiOrder::new(false, None).key(&g, b));
    }
}
