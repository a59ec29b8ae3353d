pub mod bundle_plane;
pub mod coherence;
pub mod description;
pub mod editor;
pub mod store;
pub mod topology;

pub use bundle_plane::{
    are_same_bundle, are_same_bundle_info, BpGraph, BpNode, BpNodeId, BpTensor, BpTensorId,
    BundlePlane, NodePredicate, Usage,
};
pub use coherence::register_memory_coherence;
pub use description::GraphDescription;
pub use editor::{GraphEditor, ScopedEdit};
pub use store::{EdgeFilter, Graph, GraphStats};
