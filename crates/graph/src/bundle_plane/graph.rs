use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use graphsched_core::{BundleInfo, NodeId, TensorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BpNodeId(pub u64);

impl fmt::Display for BpNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bp{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BpTensorId(pub u64);

impl fmt::Display for BpTensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bpt{}", self.0)
    }
}

/// Clone of an original tensor living in the bundle plane.
#[derive(Debug, Clone, PartialEq)]
pub struct BpTensor {
    pub id: BpTensorId,
    pub origin: TensorId,
    pub name: String,
    pub size_bytes: u64,
}

/// A node of the quotient graph: one original node, or a whole bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct BpNode {
    pub id: BpNodeId,
    pub name: String,
    pub inputs: Vec<BpTensorId>,
    pub outputs: Vec<BpTensorId>,
    /// Original nodes represented by this node.
    pub bundled: Vec<NodeId>,
    pub bundle: Option<BundleInfo>,
}

impl BpNode {
    pub fn is_bundle(&self) -> bool {
        self.bundle.is_some()
    }

    pub fn bundle_index(&self) -> Option<u32> {
        self.bundle.map(|b| b.bundle_index)
    }
}

/// Node table plus producer/consumer indexes over bundle-plane tensors.
#[derive(Debug, Default)]
pub struct BpGraph {
    nodes: BTreeMap<BpNodeId, BpNode>,
    producers: HashMap<BpTensorId, BpNodeId>,
    consumers: HashMap<BpTensorId, BTreeSet<BpNodeId>>,
}

impl BpGraph {
    pub(crate) fn add_node(&mut self, node: BpNode) {
        for &t in &node.inputs {
            self.consumers.entry(t).or_default().insert(node.id);
        }
        for &t in &node.outputs {
            self.producers.insert(t, node.id);
        }
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn remove_node(&mut self, id: BpNodeId) -> Option<BpNode> {
        let node = self.nodes.remove(&id)?;
        for t in &node.inputs {
            if let Some(set) = self.consumers.get_mut(t) {
                set.remove(&id);
                if set.is_empty() {
                    self.consumers.remove(t);
                }
            }
        }
        for t in &node.outputs {
            if self.producers.get(t) == Some(&id) {
                self.producers.remove(t);
            }
        }
        Some(node)
    }

    pub(crate) fn add_input(&mut self, id: BpNodeId, t: BpTensorId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.inputs.contains(&t) {
                node.inputs.push(t);
                self.consumers.entry(t).or_default().insert(id);
            }
        }
    }

    pub(crate) fn add_output(&mut self, id: BpNodeId, t: BpTensorId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.outputs.contains(&t) {
                node.outputs.push(t);
                self.producers.insert(t, id);
            }
        }
    }

    pub(crate) fn remove_input(&mut self, id: BpNodeId, t: BpTensorId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.inputs.retain(|&x| x != t);
        }
        if let Some(set) = self.consumers.get_mut(&t) {
            set.remove(&id);
            if set.is_empty() {
                self.consumers.remove(&t);
            }
        }
    }

    pub(crate) fn remove_output(&mut self, id: BpNodeId, t: BpTensorId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.outputs.retain(|&x| x != t);
        }
        if self.producers.get(&t) == Some(&id) {
            self.producers.remove(&t);
        }
    }

    pub(crate) fn node_mut(&mut self, id: BpNodeId) -> Option<&mut BpNode> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.producers.clear();
        self.consumers.clear();
    }

    pub fn node(&self, id: BpNodeId) -> Option<&BpNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BpNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct tensors referenced by any node.
    pub fn tensor_count(&self) -> usize {
        self.nodes
            .values()
            .flat_map(|n| n.inputs.iter().chain(&n.outputs))
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn tensor_producer(&self, t: BpTensorId) -> Option<BpNodeId> {
        self.producers.get(&t).copied()
    }

    pub fn tensor_consumers(&self, t: BpTensorId) -> Vec<BpNodeId> {
        self.consumers
            .get(&t)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Nodes consuming any output of `id`, excluding `id` itself.
    pub fn consumers(&self, id: BpNodeId) -> Vec<BpNodeId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let set: BTreeSet<BpNodeId> = node
            .outputs
            .iter()
            .filter_map(|t| self.consumers.get(t))
            .flatten()
            .copied()
            .filter(|&c| c != id)
            .collect();
        set.into_iter().collect()
    }

    fn producers_of(&self, id: BpNodeId) -> BTreeSet<BpNodeId> {
        self.nodes
            .get(&id)
            .map(|n| {
                n.inputs
                    .iter()
                    .filter_map(|t| self.producers.get(t))
                    .copied()
                    .filter(|&p| p != id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn topological_order(&self) -> Option<Vec<BpNodeId>> {
        let mut in_degree: HashMap<BpNodeId, usize> = self
            .nodes
            .keys()
            .map(|&n| (n, self.producers_of(n).len()))
            .collect();
        let mut ready: BTreeSet<BpNodeId> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(n) = ready.pop_first() {
            order.push(n);
            for c in self.consumers(n) {
                if let Some(d) = in_degree.get_mut(&c) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(c);
                    }
                }
            }
        }
        (order.len() == self.nodes.len()).then_some(order)
    }

    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_some()
    }

    /// Distinct paths from `from` to `to`; a node has one path to itself.
    pub fn number_of_paths(&self, from: BpNodeId, to: BpNodeId) -> u64 {
        if from == to {
            return 1;
        }
        let Some(order) = self.topological_order() else {
            return 0;
        };
        let mut paths: HashMap<BpNodeId, u64> = HashMap::from([(from, 1)]);
        for n in order {
            if n == to {
                break;
            }
            let Some(&count) = paths.get(&n) else {
                continue;
            };
            for c in self.consumers(n) {
                let entry = paths.entry(c).or_default();
                *entry = entry.saturating_add(count);
            }
        }
        paths.get(&to).copied().unwrap_or(0)
    }
}
