//! Extra ordering among tied free logical nodes that share real memory.
//!
//! When a logical node becomes free it is compared with every other free
//! logical node holding the same key. If both write the same real memory at
//! different offsets, the lower-offset writer goes first; failing that, the
//! same holds for readers. These edges live only in this table and never
//! reach the graph.

use std::collections::{BTreeSet, HashMap};

use graphsched_core::{Node, NodeId, TensorId};
use graphsched_graph::Graph;
use tracing::debug;

use crate::free_nodes::AuxiliaryBlocking;

/// Which side of a node takes part in offset ordering. A node is ordered by
/// its reads or by its writes, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetRole {
    Reads,
    Writes,
}

#[derive(Debug, Default)]
pub struct SecondaryDependencies {
    blockers: HashMap<NodeId, BTreeSet<NodeId>>,
    blockees: HashMap<NodeId, BTreeSet<NodeId>>,
    roles: HashMap<NodeId, OffsetRole>,
    added: usize,
}

impl SecondaryDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total edges synthesized so far.
    pub fn added(&self) -> usize {
        self.added
    }

    pub fn blockers_of(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.blockers.get(&node).into_iter().flatten().copied()
    }

    pub fn role(&self, node: NodeId) -> Option<OffsetRole> {
        self.roles.get(&node).copied()
    }

    fn can_take(&self, node: NodeId, role: OffsetRole) -> bool {
        self.roles.get(&node).map_or(true, |&r| r == role)
    }

    /// Is `to` reachable from `from` over secondary edges?
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if !seen.insert(n) {
                continue;
            }
            stack.extend(self.blockees.get(&n).into_iter().flatten().copied());
        }
        false
    }

    fn add_edge(&mut self, blocking: NodeId, blocked: NodeId, role: OffsetRole) -> bool {
        if self.reaches(blocked, blocking) {
            debug!("Skipping secondary edge {} -> {}: would close a cycle", blocking, blocked);
            return false;
        }
        if !self.blockees.entry(blocking).or_default().insert(blocked) {
            return false;
        }
        self.blockers.entry(blocked).or_default().insert(blocking);
        self.roles.insert(blocking, role);
        self.roles.insert(blocked, role);
        self.added += 1;
        debug!("Secondary edge {} -> {} ({:?})", blocking, blocked, role);
        true
    }
}

/// Offsets of `a` and `b` into the first real memory both touch through
/// `side` at different offsets.
fn offsets_on_shared_memory(
    graph: &Graph,
    a: &Node,
    b: &Node,
    side: impl Fn(&Node) -> &[TensorId],
) -> Option<(u64, u64)> {
    for &ta in side(a) {
        let real = graph.real_tensor(ta);
        let offset_a = graph.real_offset(ta);
        for &tb in side(b) {
            if graph.real_tensor(tb) != real {
                continue;
            }
            let offset_b = graph.real_offset(tb);
            if offset_a != offset_b {
                return Some((offset_a, offset_b));
            }
        }
    }
    None
}

impl<K: Ord> AuxiliaryBlocking<K> for SecondaryDependencies {
    fn on_insert(&mut self, graph: &Graph, node: NodeId, key: &K, others: &BTreeSet<(K, NodeId)>) {
        let Some(new) = graph.node(node).filter(|n| n.is_logical()) else {
            return;
        };
        for (other_key, other) in others {
            if other_key != key || *other == node {
                continue;
            }
            let Some(existing) = graph.node(*other).filter(|n| n.is_logical()) else {
                continue;
            };

            let writes = offsets_on_shared_memory(graph, new, existing, |n| n.outputs.as_slice());
            let (role, offsets) = match writes {
                Some(offsets) => (OffsetRole::Writes, offsets),
                None => match offsets_on_shared_memory(graph, new, existing, |n| n.inputs.as_slice()) {
                    Some(offsets) => (OffsetRole::Reads, offsets),
                    None => continue,
                },
            };
            if !self.can_take(node, role) || !self.can_take(*other, role) {
                continue;
            }
            let (new_offset, other_offset) = offsets;
            if new_offset < other_offset {
                self.add_edge(node, *other, role);
            } else {
                self.add_edge(*other, node, role);
            }
        }
    }

    fn on_erase(&mut self, node: NodeId) {
        if let Some(blocked) = self.blockees.remove(&node) {
            for b in blocked {
                if let Some(set) = self.blockers.get_mut(&b) {
                    set.remove(&node);
                }
            }
        }
        if let Some(blocking) = self.blockers.remove(&node) {
            for b in blocking {
                if let Some(set) = self.blockees.get_mut(&b) {
                    set.remove(&node);
                }
            }
        }
        self.roles.remove(&node);
    }

    fn is_blocked(&self, node: NodeId) -> bool {
        self.blockers.get(&node).is_some_and(|s| !s.is_empty())
    }
}
