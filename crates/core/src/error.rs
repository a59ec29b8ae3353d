use thiserror::Error;

use crate::ids::{NodeId, TensorId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Tensor not found: {0}")]
    TensorNotFound(TensorId),

    #[error("Node {0} already exists in the graph")]
    DuplicateNode(NodeId),

    #[error("Tensor {0} is not a control edge")]
    NotControlEdge(TensorId),

    #[error("Tensor {tensor} already produced by {producer}")]
    DuplicateProducer { tensor: TensorId, producer: NodeId },

    #[error("Edge {from} -> {to} would close a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    #[error("Node {0} cannot block itself")]
    SelfEdge(NodeId),

    #[error("Node {0} not found in the bundle plane")]
    NotInBundlePlane(NodeId),

    #[error("Node {0} already exists in the bundle plane")]
    AlreadyInBundlePlane(NodeId),

    #[error("Bundle {0} already exists in the bundle plane")]
    BundleExists(u32),

    #[error("Node {0} is already part of a bundle")]
    AlreadyBundled(NodeId),

    #[error("Node {0} is not part of a bundle")]
    NotBundled(NodeId),

    #[error("Fusing two bundles together is not supported")]
    UnsupportedFusion,

    #[error("Bundle plane is already {0}")]
    BundlePlaneFrozen(&'static str),

    #[error("Bundle plane validation failed: {0}")]
    InvalidBundlePlane(String),

    #[error("Did not get any nodes to bundle")]
    EmptyBundle,

    #[error("Invalid graph description: {0}")]
    InvalidDescription(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GraphError>;
