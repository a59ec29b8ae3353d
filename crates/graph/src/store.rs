use std::collections::{BTreeMap, BTreeSet, HashMap};

use graphsched_core::{
    BundleInfo, ControlEdgeType, GraphError, Node, NodeBuilder, NodeId, Result, Tensor,
    TensorAlias, TensorId,
};
use serde::Serialize;

use crate::topology;

/// Which tensors count as dependencies when querying producers/consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeFilter {
    Data,
    Control,
    Both,
}

impl EdgeFilter {
    fn accepts(self, tensor: &Tensor) -> bool {
        match self {
            EdgeFilter::Data => !tensor.is_control(),
            EdgeFilter::Control => tensor.is_control(),
            EdgeFilter::Both => true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub tensor_count: usize,
    pub control_edge_count: usize,
    pub nodes_by_kind: HashMap<String, usize>,
    pub bundles: usize,
}

/// In-memory dataflow graph. Nodes and tensors live in id-keyed tables.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    tensors: BTreeMap<TensorId, Tensor>,
    next_node: u64,
    next_tensor: u64,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tensor(&mut self, name: impl Into<String>, size_bytes: u64) -> TensorId {
        let id = TensorId(self.next_tensor);
        self.next_tensor += 1;
        self.tensors.insert(id, Tensor::new(id, name, size_bytes));
        id
    }

    /// Add a view tensor living at `offset` bytes inside `real`.
    pub fn add_alias_tensor(
        &mut self,
        name: impl Into<String>,
        size_bytes: u64,
        real: TensorId,
        offset: u64,
    ) -> Result<TensorId> {
        if !self.tensors.contains_key(&real) {
            return Err(GraphError::TensorNotFound(real));
        }
        let id = self.add_tensor(name, size_bytes);
        if let Some(t) = self.tensors.get_mut(&id) {
            t.alias = Some(TensorAlias { real, offset });
        }
        Ok(id)
    }

    pub fn add_node(
        &mut self,
        builder: NodeBuilder,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> Result<NodeId> {
        for &t in inputs.iter().chain(outputs) {
            if !self.tensors.contains_key(&t) {
                return Err(GraphError::TensorNotFound(t));
            }
        }
        for &t in outputs {
            if let Some(producer) = self.tensors[&t].producer {
                return Err(GraphError::DuplicateProducer { tensor: t, producer });
            }
        }

        let id = NodeId(self.next_node);
        self.next_node += 1;
        let mut node = builder.build(id);
        node.inputs = inputs.to_vec();
        node.outputs = outputs.to_vec();
        self.attach(&node);
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Synthesize a control tensor expressing `blocking` happens-before `blocked`.
    pub fn add_control_edge(
        &mut self,
        blocking: NodeId,
        blocked: NodeId,
        edge_type: ControlEdgeType,
    ) -> Result<TensorId> {
        if blocking == blocked {
            return Err(GraphError::SelfEdge(blocking));
        }
        self.require_node(blocking)?;
        self.require_node(blocked)?;
        if topology::is_reachable(self, blocked, blocking) {
            return Err(GraphError::CycleDetected { from: blocking, to: blocked });
        }

        let id = self.add_tensor(format!("ctrl_{}_{}", blocking, blocked), 0);
        if let Some(t) = self.tensors.get_mut(&id) {
            t.control = Some(edge_type);
            t.producer = Some(blocking);
            t.consumers.push(blocked);
        }
        if let Some(n) = self.nodes.get_mut(&blocking) {
            n.control_outputs.push(id);
        }
        if let Some(n) = self.nodes.get_mut(&blocked) {
            n.control_inputs.push(id);
        }
        Ok(id)
    }

    /// Detach a node from all of its tensors and return its record.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self.nodes.remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        for t in node.all_inputs() {
            if let Some(tensor) = self.tensors.get_mut(&t) {
                tensor.consumers.retain(|&c| c != id);
            }
        }
        for t in node.all_outputs() {
            if let Some(tensor) = self.tensors.get_mut(&t) {
                if tensor.producer == Some(id) {
                    tensor.producer = None;
                }
            }
        }
        Ok(node)
    }

    /// Re-insert a node previously returned by [`Graph::remove_node`], keeping its id.
    pub fn restore_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        for t in node.all_outputs() {
            match self.tensors.get(&t) {
                None => return Err(GraphError::TensorNotFound(t)),
                Some(tensor) => {
                    if let Some(producer) = tensor.producer {
                        return Err(GraphError::DuplicateProducer { tensor: t, producer });
                    }
                }
            }
        }
        self.attach(&node);
        self.next_node = self.next_node.max(node.id.0 + 1);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Swap `old` for a new node wired to exactly the same tensors.
    pub fn replace_node(&mut self, old: NodeId, builder: NodeBuilder) -> Result<NodeId> {
        let removed = self.remove_node(old)?;
        let id = NodeId(self.next_node);
        self.next_node += 1;
        let mut node = builder.build(id);
        node.inputs = removed.inputs;
        node.outputs = removed.outputs;
        node.control_inputs = removed.control_inputs;
        node.control_outputs = removed.control_outputs;
        self.attach(&node);
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Drop a control tensor and unlink it from both endpoints.
    pub fn remove_control_edge(&mut self, t: TensorId) -> Result<()> {
        let tensor = self.tensors.get(&t).ok_or(GraphError::TensorNotFound(t))?;
        if !tensor.is_control() {
            return Err(GraphError::NotControlEdge(t));
        }
        let Some(tensor) = self.tensors.remove(&t) else {
            return Err(GraphError::TensorNotFound(t));
        };
        if let Some(p) = tensor.producer.and_then(|p| self.nodes.get_mut(&p)) {
            p.control_outputs.retain(|&x| x != t);
        }
        for c in &tensor.consumers {
            if let Some(c) = self.nodes.get_mut(c) {
                c.control_inputs.retain(|&x| x != t);
            }
        }
        Ok(())
    }

    fn attach(&mut self, node: &Node) {
        for t in node.all_inputs() {
            if let Some(tensor) = self.tensors.get_mut(&t) {
                if !tensor.consumers.contains(&node.id) {
                    tensor.consumers.push(node.id);
                    tensor.consumers.sort();
                }
            }
        }
        for t in node.all_outputs() {
            if let Some(tensor) = self.tensors.get_mut(&t) {
                tensor.producer = Some(node.id);
            }
        }
    }

    fn require_node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Like [`Graph::node`] but an absent node is an error.
    pub fn get(&self, id: NodeId) -> Result<&Node> {
        self.require_node(id)
    }

    pub fn tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn set_bundle_info(&mut self, id: NodeId, info: Option<BundleInfo>) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))?;
        node.annotation.bundle_info = info;
        Ok(())
    }

    pub fn set_barriers(&mut self, id: NodeId, barriers: Vec<NodeId>) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))?;
        node.annotation.barriers = barriers;
        Ok(())
    }

    pub fn tensor_producer(&self, t: TensorId) -> Option<NodeId> {
        self.tensors.get(&t).and_then(|t| t.producer)
    }

    pub fn tensor_consumers(&self, t: TensorId) -> &[NodeId] {
        self.tensors.get(&t).map_or(&[], |t| t.consumers.as_slice())
    }

    /// Nodes that must run before `id`, sorted and de-duplicated.
    pub fn producers(&self, id: NodeId, filter: EdgeFilter) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let set: BTreeSet<NodeId> = node
            .all_inputs()
            .filter_map(|t| self.tensors.get(&t))
            .filter(|t| filter.accepts(t))
            .filter_map(|t| t.producer)
            .filter(|&p| p != id)
            .collect();
        set.into_iter().collect()
    }

    /// Nodes that must run after `id`, sorted and de-duplicated.
    pub fn consumers(&self, id: NodeId, filter: EdgeFilter) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let set: BTreeSet<NodeId> = node
            .all_outputs()
            .filter_map(|t| self.tensors.get(&t))
            .filter(|t| filter.accepts(t))
            .flat_map(|t| t.consumers.iter().copied())
            .filter(|&c| c != id)
            .collect();
        set.into_iter().collect()
    }

    pub fn in_degree(&self, id: NodeId, filter: EdgeFilter) -> usize {
        self.producers(id, filter).len()
    }

    pub fn out_degree(&self, id: NodeId, filter: EdgeFilter) -> usize {
        self.consumers(id, filter).len()
    }

    /// Nodes without any producer under `filter`.
    pub fn roots(&self, filter: EdgeFilter) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&n| self.in_degree(n, filter) == 0)
            .collect()
    }

    /// Follow alias links to the tensor owning the memory.
    pub fn real_tensor(&self, t: TensorId) -> TensorId {
        let mut current = t;
        // alias chains are short; the bound only guards against malformed input
        for _ in 0..self.tensors.len() {
            match self.tensors.get(&current).and_then(|t| t.alias) {
                Some(alias) => current = alias.real,
                None => break,
            }
        }
        current
    }

    /// Byte offset of `t` inside its real tensor.
    pub fn real_offset(&self, t: TensorId) -> u64 {
        let mut offset = 0;
        let mut current = t;
        for _ in 0..self.tensors.len() {
            match self.tensors.get(&current).and_then(|t| t.alias) {
                Some(alias) => {
                    offset += alias.offset;
                    current = alias.real;
                }
                None => break,
            }
        }
        offset
    }

    pub fn stats(&self) -> GraphStats {
        let mut nodes_by_kind: HashMap<String, usize> = HashMap::new();
        let mut bundles = BTreeSet::new();
        for node in self.nodes.values() {
            *nodes_by_kind.entry(format!("{:?}", node.kind)).or_default() += 1;
            if let Some(idx) = node.bundle_index() {
                bundles.insert(idx);
            }
        }

        GraphStats {
            node_count: self.nodes.len(),
            tensor_count: self.tensors.len(),
            control_edge_count: self.tensors.values().filter(|t| t.is_control()).count(),
            nodes_by_kind,
            bundles: bundles.len(),
        }
    }
}
