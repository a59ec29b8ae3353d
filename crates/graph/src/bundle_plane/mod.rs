//! Quotient graph in which every bundle collapses to a single node.
//!
//! Original nodes and tensors are referenced by id only. Each original node
//! maps to exactly one bundle-plane node; each original tensor maps to one
//! memoized clone.

mod accumulator;
mod graph;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use graphsched_core::{BundleInfo, GraphError, Node, NodeId, Result, TensorId};
use tracing::{debug, error, trace};

pub use self::graph::{BpGraph, BpNode, BpNodeId, BpTensor, BpTensorId};
use self::accumulator::BundleAccumulator;
use crate::store::{EdgeFilter, Graph};
use crate::topology;

/// Selects which original nodes take part in an annotation-based build.
pub type NodePredicate = Box<dyn Fn(&Node) -> bool>;

/// Whether a relationship is on the input or output side of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Input,
    Output,
}

/// Two annotations are the same bundle when both are unset or share an index.
pub fn are_same_bundle_info(a: Option<&BundleInfo>, b: Option<&BundleInfo>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.bundle_index == b.bundle_index,
        _ => false,
    }
}

pub fn are_same_bundle(a: &Node, b: &Node) -> bool {
    are_same_bundle_info(a.bundle_info(), b.bundle_info())
}

pub struct BundlePlane {
    graph: BpGraph,
    tensors: BTreeMap<BpTensorId, BpTensor>,
    og_node_to_bp: HashMap<NodeId, BpNodeId>,
    og_tensor_to_bp: HashMap<TensorId, BpTensorId>,
    bundle_idx_to_bp: HashMap<u32, BpNodeId>,
    predicate: Option<NodePredicate>,
    frozen: bool,
    next_node: u64,
    next_tensor: u64,
}

impl fmt::Debug for BundlePlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundlePlane")
            .field("nodes", &self.graph.len())
            .field("tensors", &self.tensors.len())
            .field("bundles", &self.bundle_idx_to_bp.len())
            .field("frozen", &self.frozen)
            .finish_non_exhaustive()
    }
}

impl BundlePlane {
    fn empty(predicate: Option<NodePredicate>) -> Self {
        Self {
            graph: BpGraph::default(),
            tensors: BTreeMap::new(),
            og_node_to_bp: HashMap::new(),
            og_tensor_to_bp: HashMap::new(),
            bundle_idx_to_bp: HashMap::new(),
            predicate,
            frozen: false,
            next_node: 0,
            next_tensor: 0,
        }
    }

    // ── Construction ─────────────────────────────────────────────

    /// One bundle-plane node per original node, no bundles.
    pub fn new(graph: &Graph) -> Result<Self> {
        let mut bp = Self::empty(None);
        for node in graph.nodes() {
            bp.add_bp_node_from_og(graph, node)?;
        }
        debug!("Bundle plane built ({} nodes)", bp.graph.len());
        bp.trace_print();
        Ok(bp)
    }

    /// Group nodes by their existing bundle annotations.
    pub fn from_annotations(graph: &Graph) -> Result<Self> {
        let mut bp = Self::empty(None);
        bp.build_from_annotations(graph)?;
        Ok(bp)
    }

    /// Like [`BundlePlane::from_annotations`], restricted to nodes accepted by `predicate`.
    pub fn with_predicate(graph: &Graph, predicate: NodePredicate) -> Result<Self> {
        let mut bp = Self::empty(Some(predicate));
        bp.build_from_annotations(graph)?;
        Ok(bp)
    }

    fn accepts(&self, node: &Node) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(node))
    }

    fn build_from_annotations(&mut self, graph: &Graph) -> Result<()> {
        let order = topology::topological_order(graph, EdgeFilter::Both)
            .ok_or_else(|| GraphError::InvalidBundlePlane("original graph is cyclic".into()))?;

        // members may interleave with other work in `order`; gather each
        // bundle before streaming it
        let mut bundles: BTreeMap<u32, Vec<&Node>> = BTreeMap::new();
        for id in order {
            let node = graph.get(id)?;
            if !self.accepts(node) {
                continue;
            }
            match node.bundle_index() {
                Some(index) => bundles.entry(index).or_default().push(node),
                None => {
                    self.add_bp_node_from_og(graph, node)?;
                }
            }
        }

        let mut acc = BundleAccumulator::default();
        for members in bundles.values() {
            acc.reset();
            acc.set_bundle(members.first().and_then(|n| n.bundle_info().copied()));
            for node in members {
                acc.accumulate(self, graph, node)?;
            }
            acc.flush(self);
        }
        self.validate(graph)
    }

    pub(crate) fn next_bp_node_id(&mut self) -> BpNodeId {
        let id = BpNodeId(self.next_node);
        self.next_node += 1;
        id
    }

    fn add_bp_node_from_og(&mut self, graph: &Graph, og: &Node) -> Result<BpNodeId> {
        if self.og_node_to_bp.contains_key(&og.id) {
            return Err(GraphError::AlreadyInBundlePlane(og.id));
        }
        let mut inputs = Vec::new();
        for t in og.all_inputs() {
            let clone = self.insert_bp_tensor(graph, t)?;
            if !inputs.contains(&clone) {
                inputs.push(clone);
            }
        }
        let mut outputs = Vec::new();
        for t in og.all_outputs() {
            outputs.push(self.insert_bp_tensor(graph, t)?);
        }

        let id = self.next_bp_node_id();
        self.graph.add_node(BpNode {
            id,
            name: og.name.clone(),
            inputs,
            outputs,
            bundled: vec![og.id],
            bundle: None,
        });
        self.og_node_to_bp.insert(og.id, id);
        Ok(id)
    }

    /// Clone of an original tensor. Repeated calls return the same clone.
    pub fn insert_bp_tensor(&mut self, graph: &Graph, t: TensorId) -> Result<BpTensorId> {
        if let Some(&clone) = self.og_tensor_to_bp.get(&t) {
            return Ok(clone);
        }
        let tensor = graph.tensor(t).ok_or(GraphError::TensorNotFound(t))?;
        let id = BpTensorId(self.next_tensor);
        self.next_tensor += 1;
        self.tensors.insert(
            id,
            BpTensor {
                id,
                origin: t,
                name: tensor.name.clone(),
                size_bytes: tensor.size_bytes,
            },
        );
        self.og_tensor_to_bp.insert(t, id);
        Ok(id)
    }

    // ── Lookups ──────────────────────────────────────────────────

    pub fn bp_graph(&self) -> &BpGraph {
        &self.graph
    }

    pub fn has_representation(&self, og: NodeId) -> bool {
        self.og_node_to_bp.contains_key(&og)
    }

    pub fn representation(&self, og: NodeId) -> Result<BpNodeId> {
        self.og_node_to_bp
            .get(&og)
            .copied()
            .ok_or(GraphError::NotInBundlePlane(og))
    }

    /// The bundle-plane node standing for `og`.
    pub fn bp_node_of(&self, og: NodeId) -> Result<&BpNode> {
        let id = self.representation(og)?;
        self.graph.node(id).ok_or(GraphError::NotInBundlePlane(og))
    }

    pub fn tensor_representation(&self, t: TensorId) -> Result<BpTensorId> {
        self.og_tensor_to_bp
            .get(&t)
            .copied()
            .ok_or(GraphError::TensorNotFound(t))
    }

    pub fn bp_tensor(&self, id: BpTensorId) -> Option<&BpTensor> {
        self.tensors.get(&id)
    }

    pub fn bundle_node(&self, bundle_index: u32) -> Option<BpNodeId> {
        self.bundle_idx_to_bp.get(&bundle_index).copied()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    // ── Bundling ─────────────────────────────────────────────────

    /// Inputs and outputs a fused node made of `bp_nodes` would expose.
    pub fn external_tensors(&self, bp_nodes: &[BpNodeId]) -> (Vec<BpTensorId>, Vec<BpTensorId>) {
        let mut inputs = BTreeSet::new();
        let mut outputs = BTreeSet::new();
        for node in bp_nodes.iter().filter_map(|&id| self.graph.node(id)) {
            for &t in &node.inputs {
                let internal = self
                    .graph
                    .tensor_producer(t)
                    .is_some_and(|p| bp_nodes.contains(&p));
                if !internal {
                    inputs.insert(t);
                }
            }
            for &t in &node.outputs {
                let consumers = self.graph.tensor_consumers(t);
                if consumers.is_empty() || consumers.iter().any(|c| !bp_nodes.contains(c)) {
                    outputs.insert(t);
                }
            }
        }
        (inputs.into_iter().collect(), outputs.into_iter().collect())
    }

    /// Replace `bp_nodes` with one bundle node exposing only boundary tensors.
    pub fn fuse_bundles(&mut self, bp_nodes: &[BpNodeId], info: BundleInfo) -> Result<BpNodeId> {
        let mut unique: Vec<BpNodeId> = Vec::with_capacity(bp_nodes.len());
        for &n in bp_nodes {
            if !unique.contains(&n) {
                unique.push(n);
            }
        }

        let mut og_nodes = Vec::new();
        for &n in &unique {
            let node = self
                .graph
                .node(n)
                .ok_or_else(|| GraphError::InvalidBundlePlane(format!("unknown node {}", n)))?;
            og_nodes.extend(node.bundled.iter().copied());
        }
        let (inputs, outputs) = self.external_tensors(&unique);

        for &n in &unique {
            self.graph.remove_node(n);
        }
        let id = self.next_bp_node_id();
        for &og in &og_nodes {
            self.og_node_to_bp.insert(og, id);
        }
        self.bundle_idx_to_bp.insert(info.bundle_index, id);
        debug!("Fused {} nodes into bundle_{}", og_nodes.len(), info.bundle_index);
        self.graph.add_node(BpNode {
            id,
            name: format!("bundle_{}", info.bundle_index),
            inputs,
            outputs,
            bundled: og_nodes,
            bundle: Some(info),
        });
        debug_assert!(self.graph.is_acyclic());
        self.trace_print();
        Ok(id)
    }

    pub fn create_bundle_from_nodes(&mut self, og_nodes: &[NodeId], info: BundleInfo) -> Result<BpNodeId> {
        if og_nodes.is_empty() {
            return Err(GraphError::EmptyBundle);
        }
        if self.bundle_idx_to_bp.contains_key(&info.bundle_index) {
            return Err(GraphError::BundleExists(info.bundle_index));
        }
        let mut bp_nodes = Vec::with_capacity(og_nodes.len());
        for &og in og_nodes {
            if self.bp_node_of(og)?.is_bundle() {
                return Err(GraphError::AlreadyBundled(og));
            }
            bp_nodes.push(self.representation(og)?);
        }
        self.fuse_bundles(&bp_nodes, info)
    }

    /// Add `og` to the bundle `info` names, creating the bundle if needed.
    ///
    /// Returns `Ok(false)` if `og` already heads another bundle or is
    /// already a member of this one.
    pub fn add_node_to_bundle(&mut self, og: NodeId, info: BundleInfo) -> Result<bool> {
        let Some(&bundle) = self.bundle_idx_to_bp.get(&info.bundle_index) else {
            return self.add_new_bundle(og, info);
        };
        let candidate = self.representation(og)?;
        if candidate == bundle {
            return Ok(false);
        }
        if self.graph.node(candidate).is_some_and(BpNode::is_bundle) {
            error!("Fusing two bundles together is not supported ({} into bundle_{})", og, info.bundle_index);
            return Err(GraphError::UnsupportedFusion);
        }
        self.fuse_bundles(&[candidate, bundle], info)?;
        Ok(true)
    }

    /// Mark the single node representing `og` as a bundle.
    pub fn add_new_bundle(&mut self, og: NodeId, info: BundleInfo) -> Result<bool> {
        let id = self.representation(og)?;
        let node = self.graph.node_mut(id).ok_or(GraphError::NotInBundlePlane(og))?;
        if node.is_bundle() {
            return Ok(false);
        }
        node.bundle = Some(info);
        node.name = format!("bundle_{}", info.bundle_index);
        self.bundle_idx_to_bp.insert(info.bundle_index, id);
        debug!("Set {} as bundle_{}", og, info.bundle_index);
        Ok(true)
    }

    /// Dismantle the bundle containing `og` back into one node per member.
    pub fn remove_bundle(&mut self, graph: &Graph, og: NodeId) -> Result<()> {
        let id = self.representation(og)?;
        let node = self.graph.node(id).ok_or(GraphError::NotInBundlePlane(og))?;
        let Some(info) = node.bundle else {
            return Err(GraphError::NotBundled(og));
        };
        self.bundle_idx_to_bp.remove(&info.bundle_index);

        if node.bundled.len() == 1 {
            if let Some(node) = self.graph.node_mut(id) {
                node.bundle = None;
            }
            return Ok(());
        }

        let Some(removed) = self.graph.remove_node(id) else {
            return Err(GraphError::NotInBundlePlane(og));
        };
        debug!("Removing bundle_{}", info.bundle_index);
        for member in &removed.bundled {
            self.og_node_to_bp.remove(member);
        }
        for &member in &removed.bundled {
            self.add_bp_node_from_og(graph, graph.get(member)?)?;
        }
        Ok(())
    }

    /// Take `og` out of its bundle. Multi-member bundles are rebuilt from the
    /// remaining members in one fuse step so the result does not depend on
    /// the order members were originally added.
    pub fn unbundle_node(&mut self, graph: &Graph, og: NodeId) -> Result<()> {
        let node = self.bp_node_of(og)?;
        let Some(info) = node.bundle else {
            return Ok(());
        };

        if node.bundled.len() == 1 {
            let id = node.id;
            self.bundle_idx_to_bp.remove(&info.bundle_index);
            if let Some(node) = self.graph.node_mut(id) {
                node.bundle = None;
            }
            return Ok(());
        }

        let remaining: Vec<NodeId> = node.bundled.iter().copied().filter(|&n| n != og).collect();
        self.remove_bundle(graph, og)?;
        self.create_bundle_from_nodes(&remaining, info)?;
        Ok(())
    }

    // ── Incremental updates mirrored from the original graph ─────

    pub fn add_node(&mut self, graph: &Graph, og: NodeId) -> Result<()> {
        if self.frozen {
            return Ok(());
        }
        let node = graph.get(og)?;
        self.add_bp_node_from_og(graph, node)?;
        if let Some(&info) = node.bundle_info() {
            self.add_node_to_bundle(og, info)?;
        }
        Ok(())
    }

    /// Drop `node` from the plane. Its exposed outputs move to `new_producer`
    /// when one is given. `node` may already be gone from `graph`.
    pub fn remove_node(&mut self, graph: &Graph, node: &Node, new_producer: Option<NodeId>) -> Result<()> {
        if self.frozen {
            return Ok(());
        }
        let new_producer = new_producer.map(|p| self.representation(p)).transpose()?;
        let id = self.representation(node.id)?;
        let bp_node = self.graph.node(id).ok_or(GraphError::NotInBundlePlane(node.id))?;

        if bp_node.is_bundle() && bp_node.bundled.len() != 1 {
            let members: Vec<NodeId> = bp_node.bundled.iter().copied().filter(|&n| n != node.id).collect();
            self.remove_node_from_bundle(graph, id, node, &members, new_producer);
        } else {
            if let Some(idx) = bp_node.bundle_index() {
                self.bundle_idx_to_bp.remove(&idx);
            }
            if let Some(removed) = self.graph.remove_node(id) {
                if let Some(p) = new_producer {
                    for t in removed.outputs {
                        self.graph.add_output(p, t);
                    }
                }
            }
        }
        self.og_node_to_bp.remove(&node.id);
        Ok(())
    }

    fn remove_node_from_bundle(
        &mut self,
        graph: &Graph,
        bundle: BpNodeId,
        node: &Node,
        members: &[NodeId],
        new_producer: Option<BpNodeId>,
    ) {
        let still_consumed = |t: TensorId| {
            members
                .iter()
                .filter_map(|&m| graph.node(m))
                .any(|m| m.all_inputs().any(|x| x == t))
        };
        let still_produced = |t: TensorId| {
            members
                .iter()
                .filter_map(|&m| graph.node(m))
                .any(|m| m.all_outputs().any(|x| x == t))
        };

        for t in node.all_inputs() {
            if let Some(&clone) = self.og_tensor_to_bp.get(&t) {
                if !still_consumed(t) {
                    self.graph.remove_input(bundle, clone);
                }
            }
        }
        for t in node.all_outputs() {
            if let Some(&clone) = self.og_tensor_to_bp.get(&t) {
                let exposed = self
                    .graph
                    .node(bundle)
                    .is_some_and(|n| n.outputs.contains(&clone));
                if exposed && !still_produced(t) {
                    self.graph.remove_output(bundle, clone);
                    if let Some(p) = new_producer {
                        self.graph.add_output(p, clone);
                    }
                }
            }
        }
        if let Some(n) = self.graph.node_mut(bundle) {
            n.bundled.retain(|&m| m != node.id);
        }
    }

    /// `new` takes over the bundle-plane node of `old`.
    pub fn replace_semantic_nodes(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        if self.frozen {
            return Ok(());
        }
        let id = self.representation(old)?;
        if self.og_node_to_bp.contains_key(&new) {
            return Err(GraphError::AlreadyInBundlePlane(new));
        }
        if let Some(node) = self.graph.node_mut(id) {
            for member in node.bundled.iter_mut().filter(|m| **m == old) {
                *member = new;
            }
        }
        self.og_node_to_bp.remove(&old);
        self.og_node_to_bp.insert(new, id);
        Ok(())
    }

    /// Mirror a tensor linking `producer` to `consumer` in the original graph.
    pub fn add_relationship(
        &mut self,
        graph: &Graph,
        tensor: TensorId,
        producer: NodeId,
        consumer: NodeId,
    ) -> Result<()> {
        if self.frozen {
            return Ok(());
        }
        let blocking = self.representation(producer)?;
        let blocked = self.representation(consumer)?;
        // same bundle: the edge would be both input and output of one node
        if blocking == blocked {
            return Ok(());
        }
        let clone = self.insert_bp_tensor(graph, tensor)?;
        self.graph.add_output(blocking, clone);
        self.graph.add_input(blocked, clone);
        Ok(())
    }

    pub fn remove_relationship(&mut self, tensor: TensorId, og: NodeId, usage: Usage) -> Result<()> {
        if self.frozen {
            return Ok(());
        }
        let id = self.representation(og)?;
        let Some(&clone) = self.og_tensor_to_bp.get(&tensor) else {
            return Ok(());
        };
        match usage {
            Usage::Input => self.graph.remove_input(id, clone),
            Usage::Output => self.graph.remove_output(id, clone),
        }
        Ok(())
    }

    pub fn freeze(&mut self) -> Result<()> {
        if self.frozen {
            return Err(GraphError::BundlePlaneFrozen("frozen"));
        }
        self.frozen = true;
        Ok(())
    }

    pub fn unfreeze(&mut self) -> Result<()> {
        if !self.frozen {
            return Err(GraphError::BundlePlaneFrozen("unfrozen"));
        }
        self.frozen = false;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────

    /// The plane must be acyclic and hold one bundle node per bundle index
    /// found on the selected original nodes.
    pub fn validate(&self, graph: &Graph) -> Result<()> {
        if !self.graph.is_acyclic() {
            error!("Circularity found in bundle plane graph");
            return Err(GraphError::InvalidBundlePlane("bundle plane graph is cyclic".into()));
        }
        let bundle_ids: BTreeSet<u32> = graph
            .nodes()
            .filter(|n| self.accepts(n))
            .filter_map(Node::bundle_index)
            .collect();
        let bundles = self.graph.nodes().filter(|n| n.is_bundle()).count();
        if bundles != bundle_ids.len() {
            error!(
                "Bundle count mismatch: {} bundle nodes, {} bundle indices",
                bundles,
                bundle_ids.len()
            );
            return Err(GraphError::InvalidBundlePlane(format!(
                "{} bundle nodes for {} bundle indices",
                bundles,
                bundle_ids.len()
            )));
        }
        Ok(())
    }

    pub fn number_of_paths(&self, source: NodeId, target: NodeId) -> Result<u64> {
        let from = self.representation(source)?;
        let to = self.representation(target)?;
        Ok(self.graph.number_of_paths(from, to))
    }

    pub fn is_reachable(&self, source: NodeId, target: NodeId) -> Result<bool> {
        Ok(self.number_of_paths(source, target)? > 0)
    }

    /// Reject a candidate with more than one path into, or any path back
    /// from, an accepted node.
    pub fn validate_candidate(&self, candidate: NodeId, accepted: &[NodeId]) -> Result<bool> {
        let bp_candidate = self.representation(candidate)?;
        for &node in accepted {
            let bp_accepted = self.representation(node)?;
            if bp_accepted == bp_candidate {
                continue;
            }
            if self.graph.number_of_paths(bp_candidate, bp_accepted) > 1 {
                return Ok(false);
            }
            if self.graph.number_of_paths(bp_accepted, bp_candidate) > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn topological_order(&self) -> Option<Vec<BpNodeId>> {
        self.graph.topological_order()
    }

    /// Expand a bundle-plane schedule into original nodes. Bundle members
    /// follow their position in `exe_order`.
    pub fn orig_schedule_from_bp_schedule(
        &self,
        bp_schedule: &[BpNodeId],
        exe_order: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        let position: HashMap<NodeId, usize> =
            exe_order.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let mut schedule = Vec::new();
        for &id in bp_schedule {
            let node = self
                .graph
                .node(id)
                .ok_or_else(|| GraphError::InvalidBundlePlane(format!("unknown node {}", id)))?;
            if !node.is_bundle() && node.bundled.len() != 1 {
                return Err(GraphError::InvalidBundlePlane(format!(
                    "{} is not a bundle but holds {} nodes",
                    node.name,
                    node.bundled.len()
                )));
            }
            let mut members = node.bundled.clone();
            members.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));
            schedule.extend(members);
        }
        Ok(schedule)
    }

    pub fn trace_print(&self) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        let name = |t: &BpTensorId| self.tensors.get(t).map_or("?", |t| t.name.as_str());
        for node in self.graph.nodes() {
            trace!("Node: {} ({})", node.name, node.id);
            for (i, t) in node.inputs.iter().enumerate() {
                trace!("IN[{}]:  {}", i, name(t));
            }
            for (i, t) in node.outputs.iter().enumerate() {
                trace!("OUT[{}]: {}", i, name(t));
            }
        }
    }

    /// Tear the plane down to its empty state.
    pub fn discard(&mut self) {
        self.graph.clear();
        self.tensors.clear();
        self.og_node_to_bp.clear();
        self.og_tensor_to_bp.clear();
        self.bundle_idx_to_bp.clear();
        self.frozen = false;
    }
}

#[cfg(test)]
mod tests;
