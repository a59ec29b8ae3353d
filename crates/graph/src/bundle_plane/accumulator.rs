use std::collections::BTreeSet;

use graphsched_core::{BundleInfo, Node, NodeId, Result};
use tracing::debug;

use super::graph::{BpNode, BpTensorId};
use super::{are_same_bundle_info, BundlePlane};
use crate::store::Graph;

/// Streams the members of one bundle, in execution order, into a single
/// bundle-plane node.
#[derive(Debug, Default)]
pub(super) struct BundleAccumulator {
    current: Option<BundleInfo>,
    nodes: Vec<NodeId>,
    inputs: BTreeSet<BpTensorId>,
    outputs: BTreeSet<BpTensorId>,
}

impl BundleAccumulator {
    pub fn set_bundle(&mut self, info: Option<BundleInfo>) {
        self.current = info;
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
        self.inputs.clear();
        self.outputs.clear();
    }

    pub fn accumulate(&mut self, bp: &mut BundlePlane, graph: &Graph, node: &Node) -> Result<()> {
        self.nodes.push(node.id);

        // same rule as `BundlePlane::external_tensors`: graph inputs and
        // graph outputs stay exposed
        for t in node.all_inputs() {
            let internal = graph
                .tensor_producer(t)
                .and_then(|p| graph.node(p))
                .is_some_and(|p| are_same_bundle_info(node.bundle_info(), p.bundle_info()));
            if !internal {
                let clone = bp.insert_bp_tensor(graph, t)?;
                self.inputs.insert(clone);
            }
        }

        for t in node.all_outputs() {
            let consumers = graph.tensor_consumers(t);
            let leaves_bundle = consumers.is_empty()
                || consumers.iter().any(|&c| {
                    graph
                        .node(c)
                        .map_or(true, |c| !are_same_bundle_info(c.bundle_info(), node.bundle_info()))
                });
            if leaves_bundle {
                let clone = bp.insert_bp_tensor(graph, t)?;
                self.outputs.insert(clone);
            }
        }
        Ok(())
    }

    /// Emit the accumulated bundle, if any, into the bundle plane.
    pub fn flush(&mut self, bp: &mut BundlePlane) {
        let Some(info) = self.current else {
            return;
        };
        if self.nodes.is_empty() {
            return;
        }
        let id = bp.next_bp_node_id();
        let node = BpNode {
            id,
            name: format!("bundle_{}", info.bundle_index),
            inputs: self.inputs.iter().copied().collect(),
            outputs: self.outputs.iter().copied().collect(),
            bundled: self.nodes.clone(),
            bundle: Some(info),
        };
        for &n in &self.nodes {
            bp.og_node_to_bp.insert(n, id);
        }
        bp.bundle_idx_to_bp.insert(info.bundle_index, id);
        debug!("Accumulated {} nodes into bundle {}", self.nodes.len(), info.bundle_index);
        bp.graph.add_node(node);
    }
}
