//! Graph mutations that keep an attached bundle plane in sync.

use std::collections::BTreeSet;

use graphsched_core::{ControlEdgeType, Node, NodeBuilder, NodeId, Result, TensorId};
use tracing::{debug, error};

use crate::bundle_plane::{BundlePlane, Usage};
use crate::store::Graph;
use crate::topology;

pub struct GraphEditor<'a> {
    graph: &'a mut Graph,
    bundle_plane: Option<&'a mut BundlePlane>,
}

impl<'a> GraphEditor<'a> {
    pub fn new(graph: &'a mut Graph) -> Self {
        Self { graph, bundle_plane: None }
    }

    pub fn with_bundle_plane(graph: &'a mut Graph, bundle_plane: &'a mut BundlePlane) -> Self {
        Self {
            graph,
            bundle_plane: Some(bundle_plane),
        }
    }

    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    pub fn bundle_plane(&self) -> Option<&BundlePlane> {
        self.bundle_plane.as_deref()
    }

    pub fn add_node(&mut self, builder: NodeBuilder, inputs: &[TensorId], outputs: &[TensorId]) -> Result<NodeId> {
        let id = self.graph.add_node(builder, inputs, outputs)?;
        if let Some(bp) = self.bundle_plane.as_deref_mut() {
            bp.add_node(self.graph, id)?;
        }
        Ok(id)
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self.graph.remove_node(id)?;
        if let Some(bp) = self.bundle_plane.as_deref_mut() {
            bp.remove_node(self.graph, &node, None)?;
        }
        Ok(node)
    }

    /// Put back a node returned by [`GraphEditor::remove_node`].
    pub fn restore_node(&mut self, node: Node) -> Result<()> {
        let id = node.id;
        self.graph.restore_node(node)?;
        if let Some(bp) = self.bundle_plane.as_deref_mut() {
            bp.add_node(self.graph, id)?;
        }
        Ok(())
    }

    /// Swap `old` for a new node on the same tensors; the bundle plane keeps
    /// its mapping.
    pub fn replace_node(&mut self, old: NodeId, builder: NodeBuilder) -> Result<NodeId> {
        let new = self.graph.replace_node(old, builder)?;
        if let Some(bp) = self.bundle_plane.as_deref_mut() {
            bp.replace_semantic_nodes(old, new)?;
        }
        Ok(new)
    }

    pub fn add_control_edge(
        &mut self,
        blocking: NodeId,
        blocked: NodeId,
        edge_type: ControlEdgeType,
    ) -> Result<TensorId> {
        let t = self.graph.add_control_edge(blocking, blocked, edge_type)?;
        if let Some(bp) = self.bundle_plane.as_deref_mut() {
            bp.add_relationship(self.graph, t, blocking, blocked)?;
        }
        Ok(t)
    }

    /// Drop a control edge, mirroring the removal into the bundle plane.
    pub fn remove_control_edge(&mut self, t: TensorId) -> Result<()> {
        let producer = self.graph.tensor_producer(t);
        let consumers = self.graph.tensor_consumers(t).to_vec();
        self.graph.remove_control_edge(t)?;
        if let Some(bp) = self.bundle_plane.as_deref_mut() {
            if let Some(p) = producer {
                bp.remove_relationship(t, p, Usage::Output)?;
            }
            for c in consumers {
                bp.remove_relationship(t, c, Usage::Input)?;
            }
        }
        Ok(())
    }

    /// Start a transaction that rolls back on drop unless committed. Edits
    /// and their rollback are mirrored into the bundle plane.
    pub fn scoped(&mut self) -> ScopedEdit<'_, 'a> {
        ScopedEdit {
            editor: self,
            undo: Vec::new(),
            froze_plane: false,
            committed: false,
        }
    }

    /// Like [`GraphEditor::scoped`], but the bundle plane is frozen for the
    /// lifetime of the transaction and never observes its edits.
    pub fn speculative(&mut self) -> Result<ScopedEdit<'_, 'a>> {
        let froze_plane = match self.bundle_plane.as_deref_mut() {
            Some(bp) if !bp.is_frozen() => {
                bp.freeze()?;
                true
            }
            _ => false,
        };
        Ok(ScopedEdit {
            editor: self,
            undo: Vec::new(),
            froze_plane,
            committed: false,
        })
    }

    /// Would collapsing `nodes` into one node close a cycle?
    ///
    /// The set is replaced by a probe node carrying its external tensors,
    /// the graph is tested for acyclicity, and every edit is rolled back.
    pub fn fusion_creates_cycle(&mut self, nodes: &[NodeId]) -> Result<bool> {
        let members: BTreeSet<NodeId> = nodes.iter().copied().collect();
        let mut inputs = BTreeSet::new();
        let mut outputs = BTreeSet::new();
        for &id in &members {
            let node = self.graph.get(id)?;
            for t in node.all_inputs() {
                let internal = self.graph.tensor_producer(t).is_some_and(|p| members.contains(&p));
                if !internal {
                    inputs.insert(t);
                }
            }
            for t in node.all_outputs() {
                let consumers = self.graph.tensor_consumers(t);
                if consumers.is_empty() || consumers.iter().any(|c| !members.contains(c)) {
                    outputs.insert(t);
                }
            }
        }
        let inputs: Vec<TensorId> = inputs.into_iter().collect();
        let outputs: Vec<TensorId> = outputs.into_iter().collect();

        let mut scope = self.speculative()?;
        for &id in &members {
            scope.remove_node(id)?;
        }
        scope.add_node(NodeBuilder::new("fusion_probe"), &inputs, &outputs)?;
        let cyclic = !topology::is_acyclic(scope.graph());
        debug!("Fusion of {} nodes creates cycle: {}", members.len(), cyclic);
        Ok(cyclic)
    }
}

enum Undo {
    Remove(NodeId),
    Restore(Node),
    RemoveControlEdge(TensorId),
}

/// RAII transaction over a [`GraphEditor`]. Replays the inverse of every
/// edit on drop unless [`ScopedEdit::commit`] was called.
pub struct ScopedEdit<'e, 'a> {
    editor: &'e mut GraphEditor<'a>,
    undo: Vec<Undo>,
    froze_plane: bool,
    committed: bool,
}

impl ScopedEdit<'_, '_> {
    pub fn graph(&self) -> &Graph {
        &*self.editor.graph
    }

    pub fn add_node(&mut self, builder: NodeBuilder, inputs: &[TensorId], outputs: &[TensorId]) -> Result<NodeId> {
        let id = self.editor.add_node(builder, inputs, outputs)?;
        self.undo.push(Undo::Remove(id));
        Ok(id)
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.editor.remove_node(id)?;
        self.undo.push(Undo::Restore(node));
        Ok(())
    }

    pub fn add_control_edge(
        &mut self,
        blocking: NodeId,
        blocked: NodeId,
        edge_type: ControlEdgeType,
    ) -> Result<TensorId> {
        let t = self.editor.add_control_edge(blocking, blocked, edge_type)?;
        self.undo.push(Undo::RemoveControlEdge(t));
        Ok(t)
    }

    /// Keep every edit made in this scope.
    pub fn commit(mut self) {
        self.committed = true;
    }

    fn rollback(&mut self) -> Result<()> {
        while let Some(op) = self.undo.pop() {
            match op {
                Undo::Remove(id) => {
                    self.editor.remove_node(id)?;
                }
                Undo::Restore(node) => self.editor.restore_node(node)?,
                Undo::RemoveControlEdge(t) => self.editor.remove_control_edge(t)?,
            }
        }
        Ok(())
    }
}

impl Drop for ScopedEdit<'_, '_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.rollback() {
                error!("Scoped edit rollback failed: {}", e);
            }
        }
        if self.froze_plane {
            if let Some(bp) = self.editor.bundle_plane.as_deref_mut() {
                if let Err(e) = bp.unfreeze() {
                    error!("Failed to unfreeze bundle plane: {}", e);
                }
            }
        }
    }
}
