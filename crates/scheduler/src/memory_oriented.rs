//! Multi-root depth-first scheduler that keeps few tensors alive at once.
//!
//! Roots are walked in descending longest-path order. Each walk emits the
//! reverse post-order of the nodes it reaches first, which is spliced in
//! front of the earliest already placed consumer.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use graphsched_core::{Node, NodeId, NodeList, ScheduleConfig, TensorId};
use graphsched_graph::{EdgeFilter, Graph};
use tracing::{debug, info};

use crate::deps::DependencyTable;
use crate::error::{Result, ScheduleError};
use crate::free_nodes::NodeOrder;
use crate::gaudi::GaudiScheduler;
use crate::max_path::longest_to_sink;
use crate::order::DefaultOrder;
use crate::reorder::{earliest, latest, move_after, move_before};
use crate::NodeScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    NotVisited,
    InProgress,
    Done,
}

struct Frame {
    node: NodeId,
    children: Vec<NodeId>,
    next: usize,
}

/// Hop count with spills, fills and non-debug logical nodes weighing nothing.
fn hop_weight(graph: &Graph, from: NodeId) -> u64 {
    graph.node(from).map_or(0, |n| {
        u64::from(!(n.is_dram_spill() || n.is_dram_fill() || n.is_logical_non_debug()))
    })
}

fn bytes(graph: &Graph, tensors: &[TensorId]) -> i64 {
    let total: u64 = tensors
        .iter()
        .filter_map(|&t| graph.tensor(t))
        .map(|t| t.size_bytes)
        .sum();
    i64::try_from(total).unwrap_or(i64::MAX)
}

/// Bytes `node` makes live minus the bytes of inputs it is the only reader of.
fn live_bytes_delta(graph: &Graph, node: &Node) -> i64 {
    let released: Vec<_> = node
        .inputs
        .iter()
        .copied()
        .filter(|&t| graph.tensor_consumers(t).len() == 1)
        .collect();
    bytes(graph, &node.outputs).saturating_sub(bytes(graph, &released))
}

struct Walk<'a> {
    graph: &'a Graph,
    deps: &'a DependencyTable,
    paths: &'a HashMap<NodeId, u64>,
    tie_break: DefaultOrder,
    state: HashMap<NodeId, Visit>,
}

impl Walk<'_> {
    fn visit(&self, node: NodeId) -> Visit {
        self.state.get(&node).copied().unwrap_or(Visit::NotVisited)
    }

    fn path(&self, node: NodeId) -> u64 {
        self.paths.get(&node).copied().unwrap_or(0)
    }

    /// Unvisited consumers of `node`, least desirable first. The walk visits
    /// them in this order, so the most desirable ends up right behind `node`
    /// in reverse post-order.
    fn children(&self, node: NodeId) -> Vec<NodeId> {
        let mut children: Vec<NodeId> = self
            .deps
            .blocked(node)
            .iter()
            .copied()
            .filter(|&c| self.visit(c) == Visit::NotVisited)
            .collect();
        children.sort_by_cached_key(|&c| {
            let consumer = self.graph.node(c);
            let barrier = consumer.is_some_and(|n| n.annotation.barriers.contains(&node));
            let delta = consumer.map_or(0, |n| live_bytes_delta(self.graph, n));
            (
                !barrier,
                Reverse(self.path(c)),
                delta,
                self.tie_break.key(self.graph, c),
                c,
            )
        });
        children.reverse();
        children
    }

    /// Reverse post-order of everything first reached from `root`.
    fn segment_from(&mut self, root: NodeId) -> Vec<NodeId> {
        let mut post = Vec::new();
        self.state.insert(root, Visit::InProgress);
        let mut stack = vec![Frame {
            node: root,
            children: self.children(root),
            next: 0,
        }];

        loop {
            let Some(top) = stack.last_mut() else {
                break;
            };
            let child = top.children.get(top.next).copied();
            top.next += 1;
            match child {
                Some(child) => {
                    if self.visit(child) != Visit::NotVisited {
                        continue;
                    }
                    self.state.insert(child, Visit::InProgress);
                    stack.push(Frame {
                        node: child,
                        children: self.children(child),
                        next: 0,
                    });
                }
                None => {
                    if let Some(done) = stack.pop() {
                        self.state.insert(done.node, Visit::Done);
                        post.push(done.node);
                    }
                }
            }
        }
        post.reverse();
        post
    }
}

/// Move each non-debug logical node of `segment` down to just before its
/// first consumer in the segment. Returns the number of nodes moved.
pub fn gather_logical_inputs(graph: &Graph, deps: &DependencyTable, segment: &mut Vec<NodeId>) -> usize {
    let logical: Vec<NodeId> = segment
        .iter()
        .copied()
        .filter(|&n| graph.node(n).is_some_and(Node::is_logical_non_debug))
        .collect();
    let mut moved = 0;
    for &node in logical.iter().rev() {
        let Some(first_use) = earliest(segment, deps.blocked(node)) else {
            continue;
        };
        if move_before(segment, node, first_use) {
            moved += 1;
        }
    }
    moved
}

/// Postpone every DRAM fill to just before its first consumer.
pub fn move_fills_to_consumers(graph: &Graph, deps: &DependencyTable, order: &mut Vec<NodeId>) -> usize {
    let fills: Vec<NodeId> = order
        .iter()
        .copied()
        .filter(|&n| graph.node(n).is_some_and(Node::is_dram_fill))
        .collect();
    let mut moved = 0;
    for &fill in fills.iter().rev() {
        if let Some(first_use) = earliest(order, deps.blocked(fill)) {
            if move_before(order, fill, first_use) {
                debug!("Fill {} postponed to {}", fill, first_use);
                moved += 1;
            }
        }
    }
    moved
}

/// Advance every DRAM spill to just after its last blocker.
pub fn move_spills_to_producers(graph: &Graph, deps: &DependencyTable, order: &mut Vec<NodeId>) -> usize {
    let spills: Vec<NodeId> = order
        .iter()
        .copied()
        .filter(|&n| graph.node(n).is_some_and(Node::is_dram_spill))
        .collect();
    let mut moved = 0;
    for &spill in &spills {
        if let Some(producer) = latest(order, deps.blocking(spill)) {
            if move_after(order, spill, producer) {
                debug!("Spill {} advanced to {}", spill, producer);
                moved += 1;
            }
        }
    }
    moved
}

#[derive(Debug, Clone)]
pub struct MemoryOrientedScheduler {
    io_in_dram: bool,
    tie_break: DefaultOrder,
    fallback: GaudiScheduler,
}

impl MemoryOrientedScheduler {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            io_in_dram: config.io_in_dram,
            tie_break: DefaultOrder::from_config(config),
            fallback: GaudiScheduler::from_config(config),
        }
    }
}

impl NodeScheduler for MemoryOrientedScheduler {
    fn name(&self) -> &'static str {
        "memory_oriented"
    }

    fn schedule_nodes(&self, graph: &Graph) -> Result<NodeList> {
        if let Some(node) = graph.nodes().find(|n| n.annotation.range_index.is_some()) {
            info!(
                "Node {} has a fixed range index, falling back to the {} scheduler",
                node.id,
                self.fallback.name()
            );
            return self.fallback.schedule_nodes(graph);
        }

        let deps = DependencyTable::new(graph, EdgeFilter::Both);
        let paths = longest_to_sink(&deps, |from, _| hop_weight(graph, from))?;
        let mut walk = Walk {
            graph,
            deps: &deps,
            paths: &paths,
            tie_break: self.tie_break,
            state: HashMap::with_capacity(graph.len()),
        };

        let mut prefix = Vec::new();
        let mut roots = deps.roots();
        if self.io_in_dram {
            let (dma, mut rest): (Vec<NodeId>, Vec<NodeId>) = roots
                .into_iter()
                .partition(|&r| graph.node(r).is_some_and(Node::is_dma));
            for &d in &dma {
                walk.state.insert(d, Visit::Done);
                prefix.push(d);
            }
            for &d in &dma {
                for &c in deps.blocked(d) {
                    if !rest.contains(&c) {
                        rest.push(c);
                    }
                }
            }
            debug!("IO in DRAM: {} DMA roots emitted first", dma.len());
            roots = rest;
        }
        roots.sort_by_key(|&r| (Reverse(walk.path(r)), r));

        let mut order: NodeList = Vec::with_capacity(graph.len());
        for root in roots {
            if walk.visit(root) != Visit::NotVisited {
                continue;
            }
            let mut segment = walk.segment_from(root);
            gather_logical_inputs(graph, &deps, &mut segment);

            let members: HashSet<NodeId> = segment.iter().copied().collect();
            let consumers: HashSet<NodeId> = segment
                .iter()
                .flat_map(|&n| deps.blocked(n).iter().copied())
                .filter(|c| !members.contains(c))
                .collect();
            match order.iter().position(|n| consumers.contains(n)) {
                Some(at) => {
                    debug!("Segment of root {} spliced before {}", root, order[at]);
                    let tail = order.split_off(at);
                    order.extend(segment);
                    order.extend(tail);
                }
                None => order.extend(segment),
            }
        }

        if let Some(missed) = graph.node_ids().find(|&n| walk.visit(n) != Visit::Done) {
            return Err(ScheduleError::NotVisited(missed));
        }
        prefix.extend(order);
        let mut order = prefix;
        if order.len() != graph.len() {
            return Err(ScheduleError::NotAllScheduled {
                scheduled: order.len(),
                total: graph.len(),
            });
        }

        let fills = move_fills_to_consumers(graph, &deps, &mut order);
        let spills = move_spills_to_producers(graph, &deps, &mut order);
        info!(
            "Memory oriented scheduled {} nodes ({} fills, {} spills moved)",
            order.len(),
            fills,
            spills
        );
        Ok(order)
    }
}
