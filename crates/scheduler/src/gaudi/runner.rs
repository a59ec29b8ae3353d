use std::collections::{BTreeMap, HashMap};

use graphsched_core::{MaxPathWeight, NodeId, NodeList, ScheduleConfig};
use graphsched_graph::{EdgeFilter, Graph};
use tracing::{debug, info, warn};

use super::order::{GaudiKey, GaudiOrder};
use super::post::{optimize_memsets_location, reorder_nan_inf_probes};
use super::secondary::SecondaryDependencies;
use crate::bfs::release_consumers;
use crate::deps::DependencyTable;
use crate::error::{Result, ScheduleError};
use crate::free_nodes::FreeNodes;
use crate::max_path::PathMetrics;
use crate::NodeScheduler;

#[derive(Debug, Clone)]
pub struct GaudiScheduler {
    parent_id_schedule: bool,
    max_path: Option<MaxPathWeight>,
    reorder_probes: bool,
    optimize_memsets: bool,
}

impl GaudiScheduler {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            parent_id_schedule: config.enable_parent_id_schedule,
            max_path: config.enable_max_path_schedule.then_some(config.max_path_weight),
            reorder_probes: config.reorder_nan_inf_probes,
            optimize_memsets: config.optimize_memsets_location,
        }
    }
}

impl Default for GaudiScheduler {
    fn default() -> Self {
        Self::from_config(&ScheduleConfig::default())
    }
}

/// Scheduling state of one bundle.
struct BundleState<'o> {
    free: FreeNodes<&'o GaudiOrder>,
    /// Distinct (outside blocker, member) pairs not yet satisfied.
    external_in_degree: usize,
    remaining: usize,
    scalar_pipe: bool,
}

impl BundleState<'_> {
    fn is_eligible(&self) -> bool {
        self.external_in_degree == 0 && !self.free.is_empty()
    }

    fn head(&self) -> Option<&GaudiKey> {
        self.free.peek_key()
    }
}

struct Run<'g, 'o> {
    graph: &'g Graph,
    deps: DependencyTable,
    in_degree: HashMap<NodeId, usize>,
    bundle_of: HashMap<NodeId, u32>,
    bundles: BTreeMap<u32, BundleState<'o>>,
    default: FreeNodes<&'o GaudiOrder, SecondaryDependencies>,
    active: Option<u32>,
    order: NodeList,
}

impl<'g, 'o> Run<'g, 'o> {
    fn new(graph: &'g Graph, deps: DependencyTable, key_order: &'o GaudiOrder) -> Self {
        let bundle_of: HashMap<NodeId, u32> = graph
            .nodes()
            .filter_map(|n| n.bundle_index().map(|b| (n.id, b)))
            .collect();

        let mut bundles: BTreeMap<u32, BundleState<'o>> = BTreeMap::new();
        for node in graph.nodes() {
            let Some(info) = node.bundle_info() else {
                continue;
            };
            let external = deps
                .blocking(node.id)
                .iter()
                .filter(|p| bundle_of.get(p) != Some(&info.bundle_index))
                .count();
            let state = bundles.entry(info.bundle_index).or_insert_with(|| BundleState {
                free: FreeNodes::new(key_order),
                external_in_degree: 0,
                remaining: 0,
                scalar_pipe: info.is_scalar_pipe(),
            });
            state.external_in_degree += external;
            state.remaining += 1;
        }

        Self {
            graph,
            in_degree: deps.in_degrees(),
            deps,
            bundle_of,
            bundles,
            default: FreeNodes::with_blocking(key_order, SecondaryDependencies::new()),
            active: None,
            order: Vec::with_capacity(graph.len()),
        }
    }

    fn make_free(&mut self, node: NodeId) {
        match self.bundle_of.get(&node).and_then(|b| self.bundles.get_mut(b)) {
            Some(state) => {
                state.free.insert(self.graph, node);
            }
            None => {
                self.default.insert(self.graph, node);
            }
        }
    }

    fn emit(&mut self, node: NodeId) -> Result<()> {
        self.order.push(node);
        let own_bundle = self.bundle_of.get(&node).copied();
        if let Some(state) = own_bundle.and_then(|b| self.bundles.get_mut(&b)) {
            state.remaining -= 1;
        }

        for &c in self.deps.blocked(node) {
            let Some(&b) = self.bundle_of.get(&c) else {
                continue;
            };
            if own_bundle == Some(b) {
                continue;
            }
            if let Some(state) = self.bundles.get_mut(&b) {
                state.external_in_degree = state
                    .external_in_degree
                    .checked_sub(1)
                    .ok_or(ScheduleError::NegativeInDegree(c))?;
            }
        }

        let mut freed = Vec::new();
        release_consumers(&self.deps, &mut self.in_degree, node, |c| freed.push(c))?;
        for c in freed {
            self.make_free(c);
        }
        Ok(())
    }

    /// Lowest-keyed bundle passing `filter`.
    fn best_bundle(&self, filter: impl Fn(&BundleState<'_>) -> bool) -> Option<u32> {
        self.bundles
            .iter()
            .filter(|(_, s)| filter(*s))
            .filter_map(|(&b, s)| s.head().map(|k| (k, b)))
            .min()
            .map(|(_, b)| b)
    }

    fn step(&mut self) -> Result<bool> {
        if let Some(b) = self.active {
            let next = self.bundles.get_mut(&b).and_then(|s| s.free.pop_next());
            match next {
                Some(node) => {
                    self.emit(node)?;
                    return Ok(true);
                }
                None => {
                    let remaining = self.bundles.get(&b).map_or(0, |s| s.remaining);
                    if remaining > 0 {
                        warn!("Bundle {} stalled with {} unscheduled nodes, deactivating", b, remaining);
                    }
                    self.active = None;
                }
            }
        }

        if let Some(b) = self.best_bundle(|s| s.is_eligible() && !s.scalar_pipe) {
            debug!("Activating bundle {}", b);
            self.active = Some(b);
            return Ok(true);
        }
        if let Some(node) = self.default.pop_next() {
            self.emit(node)?;
            return Ok(true);
        }
        if let Some(b) = self.best_bundle(|s| s.is_eligible() && s.scalar_pipe) {
            debug!("Activating scalar pipe bundle {}", b);
            self.active = Some(b);
            return Ok(true);
        }
        if let Some(b) = self.best_bundle(|s| !s.free.is_empty()) {
            warn!("Cyclic dependency on bundle {}, forcing it through", b);
            self.active = Some(b);
            return Ok(true);
        }
        Ok(false)
    }
}

impl NodeScheduler for GaudiScheduler {
    fn name(&self) -> &'static str {
        "gaudi"
    }

    fn schedule_nodes(&self, graph: &Graph) -> Result<NodeList> {
        let deps = DependencyTable::new(graph, EdgeFilter::Both);
        let metrics = match self.max_path {
            Some(weight) => Some(PathMetrics::compute(graph, &deps, weight)?),
            None => None,
        };
        let key_order = GaudiOrder::new(self.parent_id_schedule, metrics);

        let mut run = Run::new(graph, deps.clone(), &key_order);
        for root in deps.roots() {
            run.make_free(root);
        }
        while run.step()? {}

        if run.order.len() != graph.len() {
            return Err(ScheduleError::NotAllScheduled {
                scheduled: run.order.len(),
                total: graph.len(),
            });
        }
        let secondary = run.default.auxiliary().added();
        let bundles = run.bundles.len();
        let mut order = run.order;

        let probes = if self.reorder_probes {
            reorder_nan_inf_probes(graph, &deps, &mut order)
        } else {
            0
        };
        let memsets = if self.optimize_memsets {
            optimize_memsets_location(graph, &deps, &mut order)
        } else {
            0
        };
        info!(
            "Gaudi scheduled {} nodes: {} bundles, {} secondary edges, {} probes and {} memsets moved",
            order.len(),
            bundles,
            secondary,
            probes,
            memsets
        );
        Ok(order)
    }
}
