use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, TensorId};

/// Operation class of a node, as far as scheduling cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Compute,
    /// View-only operation (reshape, slice, concat into a shared buffer...).
    Logical,
    Dma,
    Memset,
    /// Evicts a value to DRAM.
    DramSpill,
    /// Materializes a value from DRAM.
    DramFill,
    /// Debug node checking its input for NaN/Inf values.
    NanInfProbe,
}

/// Engine a node was assigned to. An input annotation, never decided here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Mme,
    Tpc,
    Dma,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleType {
    #[default]
    Undefined,
    Mme,
    Tpc,
    ComplexGuid,
    /// Bundle executing on the scalar pipe; deprioritized against other work.
    ScalarPipe,
}

impl std::fmt::Display for BundleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleType::Undefined => write!(f, "Undefined"),
            BundleType::Mme => write!(f, "Mme"),
            BundleType::Tpc => write!(f, "Tpc"),
            BundleType::ComplexGuid => write!(f, "ComplexGuid"),
            BundleType::ScalarPipe => write!(f, "ScalarPipe"),
        }
    }
}

/// Membership of a node in a fused region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleInfo {
    pub bundle_index: u32,
    #[serde(default)]
    pub operation_index: u32,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub bundle_type: BundleType,
}

impl BundleInfo {
    pub fn new(bundle_index: u32, bundle_type: BundleType) -> Self {
        Self {
            bundle_index,
            operation_index: 0,
            engine: Engine::None,
            bundle_type,
        }
    }

    pub fn with_operation_index(mut self, operation_index: u32) -> Self {
        self.operation_index = operation_index;
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn is_scalar_pipe(&self) -> bool {
        self.bundle_type == BundleType::ScalarPipe
    }
}

/// Per-node annotations written by earlier compiler passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAnnotation {
    #[serde(default)]
    pub bundle_info: Option<BundleInfo>,
    /// Extra nodes that must complete before this one without a tensor between them.
    #[serde(default)]
    pub barriers: Vec<NodeId>,
    /// Hard-set range/slice index. Any such node disables the memory-oriented scheduler.
    #[serde(default)]
    pub range_index: Option<u32>,
    #[serde(default)]
    pub flash_attention: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// Grouping id of the originating high level op.
    pub parent_id: u64,
    pub kind: NodeKind,
    pub engine: Engine,
    pub debug: bool,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
    pub control_inputs: Vec<TensorId>,
    pub control_outputs: Vec<TensorId>,
    pub annotation: NodeAnnotation,
}

impl Node {
    pub fn is_logical(&self) -> bool {
        self.kind == NodeKind::Logical
    }

    pub fn is_debug(&self) -> bool {
        self.debug || self.kind == NodeKind::NanInfProbe
    }

    /// Logical nodes that are not debug nodes get special treatment in path metrics.
    pub fn is_logical_non_debug(&self) -> bool {
        self.is_logical() && !self.is_debug()
    }

    pub fn is_dma(&self) -> bool {
        self.engine == Engine::Dma
            || matches!(
                self.kind,
                NodeKind::Dma | NodeKind::Memset | NodeKind::DramSpill | NodeKind::DramFill
            )
    }

    pub fn is_memset(&self) -> bool {
        self.kind == NodeKind::Memset
    }

    pub fn is_dram_spill(&self) -> bool {
        self.kind == NodeKind::DramSpill
    }

    pub fn is_dram_fill(&self) -> bool {
        self.kind == NodeKind::DramFill
    }

    pub fn is_nan_inf_probe(&self) -> bool {
        self.kind == NodeKind::NanInfProbe
    }

    pub fn runs_on_mme(&self) -> bool {
        self.engine == Engine::Mme
    }

    pub fn runs_on_tpc(&self) -> bool {
        self.engine == Engine::Tpc
    }

    pub fn bundle_info(&self) -> Option<&BundleInfo> {
        self.annotation.bundle_info.as_ref()
    }

    pub fn bundle_index(&self) -> Option<u32> {
        self.annotation.bundle_info.map(|b| b.bundle_index)
    }

    /// Data and control inputs.
    pub fn all_inputs(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.inputs.iter().chain(self.control_inputs.iter()).copied()
    }

    /// Data and control outputs.
    pub fn all_outputs(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.outputs.iter().chain(self.control_outputs.iter()).copied()
    }
}

/// Description of a node to be added to a graph. The graph assigns the id.
#[derive(Debug, Clone, Default)]
pub struct NodeBuilder {
    pub name: String,
    pub parent_id: Option<u64>,
    pub kind: NodeKind,
    pub engine: Engine,
    pub debug: bool,
    pub annotation: NodeAnnotation,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn bundle(mut self, info: BundleInfo) -> Self {
        self.annotation.bundle_info = Some(info);
        self
    }

    pub fn barriers(mut self, barriers: Vec<NodeId>) -> Self {
        self.annotation.barriers = barriers;
        self
    }

    pub fn range_index(mut self, index: u32) -> Self {
        self.annotation.range_index = Some(index);
        self
    }

    pub fn flash_attention(mut self) -> Self {
        self.annotation.flash_attention = true;
        self
    }

    /// Materialize the node record. Parent id defaults to the node's own id.
    pub fn build(self, id: NodeId) -> Node {
        Node {
            id,
            name: self.name,
            parent_id: self.parent_id.unwrap_or(id.0),
            kind: self.kind,
            engine: self.engine,
            debug: self.debug,
            inputs: Vec::new(),
            outputs: Vec::new(),
            control_inputs: Vec::new(),
            control_outputs: Vec::new(),
            annotation: self.annotation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_predicates() {
        let spill = NodeBuilder::new("spill").kind(NodeKind::DramSpill).build(NodeId(0));
        assert!(spill.is_dma());
        assert!(spill.is_dram_spill());
        assert!(!spill.is_logical());

        let probe = NodeBuilder::new("probe").kind(NodeKind::NanInfProbe).build(NodeId(1));
        assert!(probe.is_debug());

        let reshape = NodeBuilder::new("reshape").kind(NodeKind::Logical).build(NodeId(2));
        assert!(reshape.is_logical_non_debug());
        let dbg = NodeBuilder::new("dbg").kind(NodeKind::Logical).debug(true).build(NodeId(3));
        assert!(!dbg.is_logical_non_debug());
    }

    #[test]
    fn parent_defaults_to_own_id() {
        let n = NodeBuilder::new("a").build(NodeId(7));
        assert_eq!(n.parent_id, 7);
        let m = NodeBuilder::new("b").parent(3).build(NodeId(8));
        assert_eq!(m.parent_id, 3);
    }

    #[test]
    fn scalar_pipe_bundle() {
        assert!(BundleInfo::new(1, BundleType::ScalarPipe).is_scalar_pipe());
        assert!(!BundleInfo::new(1, BundleType::Tpc).is_scalar_pipe());
    }
}
