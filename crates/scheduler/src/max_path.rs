//! Longest remaining dependency chain per node, used to drain the longest
//! branch first.

use std::cmp::Reverse;
use std::collections::HashMap;

use graphsched_core::{MaxPathWeight, NodeId, NodeList, ScheduleConfig};
use graphsched_graph::{EdgeFilter, Graph};
use tracing::debug;

use crate::bfs::run_bfs;
use crate::deps::DependencyTable;
use crate::error::{Result, ScheduleError};
use crate::free_nodes::{FreeNodes, NodeOrder};
use crate::order::DefaultOrder;
use crate::NodeScheduler;

/// Weight of the edge `from -> to` under `weight`.
pub fn edge_weight(graph: &Graph, from: NodeId, to: NodeId, weight: MaxPathWeight) -> u64 {
    let Some(producer) = graph.node(from) else {
        return 0;
    };
    match weight {
        MaxPathWeight::Hops => u64::from(!producer.is_logical_non_debug()),
        MaxPathWeight::TensorBytes => {
            let Some(consumer) = graph.node(to) else {
                return 0;
            };
            producer
                .outputs
                .iter()
                .filter(|t| consumer.inputs.contains(t))
                .filter_map(|&t| graph.tensor(graph.real_tensor(t)))
                .map(|t| t.size_bytes)
                .max()
                .unwrap_or(0)
        }
    }
}

/// `longest[n] = max over blocked c of longest[c] + weight(n, c)`, zero at sinks.
pub(crate) fn longest_to_sink(
    deps: &DependencyTable,
    weight: impl Fn(NodeId, NodeId) -> u64,
) -> Result<HashMap<NodeId, u64>> {
    let order = topological_order(deps)?;
    let mut longest: HashMap<NodeId, u64> = HashMap::with_capacity(order.len());
    for &n in order.iter().rev() {
        let value = deps
            .blocked(n)
            .iter()
            .map(|&c| longest.get(&c).copied().unwrap_or(0).saturating_add(weight(n, c)))
            .max()
            .unwrap_or(0);
        longest.insert(n, value);
    }
    Ok(longest)
}

/// `longest[n] = max over blockers p of longest[p] + weight(p, n)`, zero at roots.
fn longest_from_source(
    deps: &DependencyTable,
    weight: impl Fn(NodeId, NodeId) -> u64,
) -> Result<HashMap<NodeId, u64>> {
    let order = topological_order(deps)?;
    let mut longest: HashMap<NodeId, u64> = HashMap::with_capacity(order.len());
    for &n in &order {
        let value = deps
            .blocking(n)
            .iter()
            .map(|&p| longest.get(&p).copied().unwrap_or(0).saturating_add(weight(p, n)))
            .max()
            .unwrap_or(0);
        longest.insert(n, value);
    }
    Ok(longest)
}

fn topological_order(deps: &DependencyTable) -> Result<NodeList> {
    deps.topological_order().ok_or(ScheduleError::NotAllScheduled {
        scheduled: 0,
        total: deps.len(),
    })
}

/// Comparator prefix shared by every max-path aware order: logical
/// non-debug nodes first, then the longest chain through the node, then
/// the longest chain remaining after it.
pub type PathPriority = (bool, Reverse<u64>, Reverse<u64>);

#[derive(Debug, Clone, Default)]
pub struct PathMetrics {
    to_sink: HashMap<NodeId, u64>,
    from_source: HashMap<NodeId, u64>,
}

impl PathMetrics {
    pub fn compute(graph: &Graph, deps: &DependencyTable, weight: MaxPathWeight) -> Result<Self> {
        let w = |a, b| edge_weight(graph, a, b, weight);
        Ok(Self {
            to_sink: longest_to_sink(deps, w)?,
            from_source: longest_from_source(deps, w)?,
        })
    }

    pub fn max_path(&self, node: NodeId) -> u64 {
        self.to_sink.get(&node).copied().unwrap_or(0)
    }

    /// Length of the longest source-to-sink chain passing through `node`.
    pub fn chain_length(&self, node: NodeId) -> u64 {
        self.from_source
            .get(&node)
            .copied()
            .unwrap_or(0)
            .saturating_add(self.max_path(node))
    }

    /// Logical non-debug nodes first, then the longest chain through the
    /// node, then the longest remaining path. Ranking by the whole chain
    /// before the remaining path keeps a started chain draining ahead of a
    /// fresh root with a longer tail.
    pub fn priority(&self, graph: &Graph, node: NodeId) -> PathPriority {
        let logical = graph.node(node).is_some_and(|n| n.is_logical_non_debug());
        (!logical, Reverse(self.chain_length(node)), Reverse(self.max_path(node)))
    }
}

/// Max-path priority in front of an inner order.
#[derive(Debug, Clone)]
pub struct MaxPathOrder<O> {
    metrics: PathMetrics,
    inner: O,
}

impl<O: NodeOrder> MaxPathOrder<O> {
    pub fn new(metrics: PathMetrics, inner: O) -> Self {
        Self { metrics, inner }
    }

    pub fn metrics(&self) -> &PathMetrics {
        &self.metrics
    }
}

impl<O: NodeOrder> NodeOrder for MaxPathOrder<O> {
    type Key = (PathPriority, O::Key);

    fn key(&self, graph: &Graph, node: NodeId) -> Self::Key {
        (self.metrics.priority(graph, node), self.inner.key(graph, node))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxPathScheduler {
    weight: MaxPathWeight,
    tie_break: DefaultOrder,
}

impl MaxPathScheduler {
    pub fn new(weight: MaxPathWeight, tie_break: DefaultOrder) -> Self {
        Self { weight, tie_break }
    }

    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self::new(config.max_path_weight, DefaultOrder::from_config(config))
    }
}

impl NodeScheduler for MaxPathScheduler {
    fn name(&self) -> &'static str {
        "max_path"
    }

    fn schedule_nodes(&self, graph: &Graph) -> Result<NodeList> {
        let deps = DependencyTable::new(graph, EdgeFilter::Both);
        let metrics = PathMetrics::compute(graph, &deps, self.weight)?;
        let order = run_bfs(graph, &deps, FreeNodes::new(MaxPathOrder::new(metrics, self.tie_break)))?;
        debug!("Max-path scheduled {} nodes ({:?} weights)", order.len(), self.weight);
        Ok(order)
    }
}
