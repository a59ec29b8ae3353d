//! The frontier: nodes whose blockers have all been scheduled, kept sorted
//! by a pluggable order with the node id as final tie-break.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;

use graphsched_core::NodeId;
use graphsched_graph::Graph;

/// Sort key of a free node. Lower keys are scheduled first.
pub trait NodeOrder {
    type Key: Ord + Clone + Debug;

    fn key(&self, graph: &Graph, node: NodeId) -> Self::Key;
}

impl<O: NodeOrder> NodeOrder for &O {
    type Key = O::Key;

    fn key(&self, graph: &Graph, node: NodeId) -> Self::Key {
        (**self).key(graph, node)
    }
}

/// Blocking relations among free nodes that the graph does not record.
/// A free node the component still blocks is never returned by
/// [`FreeNodes::peek_next`].
pub trait AuxiliaryBlocking<K> {
    /// `node` just became free; `others` are the entries already free.
    fn on_insert(&mut self, graph: &Graph, node: NodeId, key: &K, others: &BTreeSet<(K, NodeId)>);

    /// `node` left the frontier, so whatever it blocked is released.
    fn on_erase(&mut self, node: NodeId);

    fn is_blocked(&self, node: NodeId) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoBlocking;

impl<K> AuxiliaryBlocking<K> for NoBlocking {
    fn on_insert(&mut self, _: &Graph, _: NodeId, _: &K, _: &BTreeSet<(K, NodeId)>) {}

    fn on_erase(&mut self, _: NodeId) {}

    fn is_blocked(&self, _: NodeId) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct FreeNodes<O: NodeOrder, B: AuxiliaryBlocking<O::Key> = NoBlocking> {
    order: O,
    auxiliary: B,
    entries: BTreeSet<(O::Key, NodeId)>,
    keys: HashMap<NodeId, O::Key>,
}

impl<O: NodeOrder> FreeNodes<O, NoBlocking> {
    pub fn new(order: O) -> Self {
        Self::with_blocking(order, NoBlocking)
    }
}

impl<O: NodeOrder, B: AuxiliaryBlocking<O::Key>> FreeNodes<O, B> {
    pub fn with_blocking(order: O, auxiliary: B) -> Self {
        Self {
            order,
            auxiliary,
            entries: BTreeSet::new(),
            keys: HashMap::new(),
        }
    }

    /// Returns false if the node was already free.
    pub fn insert(&mut self, graph: &Graph, node: NodeId) -> bool {
        if self.keys.contains_key(&node) {
            return false;
        }
        let key = self.order.key(graph, node);
        self.auxiliary.on_insert(graph, node, &key, &self.entries);
        self.entries.insert((key.clone(), node));
        self.keys.insert(node, key);
        true
    }

    pub fn erase(&mut self, node: NodeId) -> bool {
        let Some(key) = self.keys.remove(&node) else {
            return false;
        };
        self.entries.remove(&(key, node));
        self.auxiliary.on_erase(node);
        true
    }

    /// Lowest entry not held back by the auxiliary component. Never mutates.
    pub fn peek_next(&self) -> Option<NodeId> {
        self.entries
            .iter()
            .map(|(_, n)| *n)
            .find(|&n| !self.auxiliary.is_blocked(n))
    }

    pub fn peek_key(&self) -> Option<&O::Key> {
        self.peek_next().and_then(|n| self.keys.get(&n))
    }

    pub fn pop_next(&mut self) -> Option<NodeId> {
        let next = self.peek_next()?;
        self.erase(next);
        Some(next)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.keys.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Free nodes in order, including auxiliary-blocked ones.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|(_, n)| *n)
    }

    pub fn order(&self) -> &O {
        &self.order
    }

    pub fn auxiliary(&self) -> &B {
        &self.auxiliary
    }
}
