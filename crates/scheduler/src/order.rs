use graphsched_core::{NodeId, ScheduleConfig};
use graphsched_graph::Graph;

use crate::free_nodes::NodeOrder;

/// Creation order, optionally grouped by parent id first.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOrder {
    parent_id_schedule: bool,
}

impl DefaultOrder {
    pub fn new(parent_id_schedule: bool) -> Self {
        Self { parent_id_schedule }
    }

    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self::new(config.enable_parent_id_schedule)
    }
}

impl NodeOrder for DefaultOrder {
    type Key = Option<u64>;

    fn key(&self, graph: &Graph, node: NodeId) -> Self::Key {
        if !self.parent_id_schedule {
            return None;
        }
        graph.node(node).map(|n| n.parent_id)
    }
}
