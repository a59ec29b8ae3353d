//! Serializable graph descriptions, referencing nodes and tensors by name.

use std::collections::HashMap;

use graphsched_core::{
    BundleInfo, ControlEdgeType, Engine, GraphError, NodeBuilder, NodeId, NodeKind, Result, TensorId,
};
use serde::{Deserialize, Serialize};

use crate::store::Graph;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDescription {
    #[serde(default)]
    pub tensors: Vec<TensorDescription>,
    pub nodes: Vec<NodeDescription>,
    #[serde(default)]
    pub control_edges: Vec<ControlEdgeDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorDescription {
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    /// Name of an earlier tensor this one is a view into.
    #[serde(default)]
    pub alias_of: Option<String>,
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeDescription {
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub bundle: Option<BundleInfo>,
    /// Names of nodes that must finish first without a tensor between them.
    #[serde(default)]
    pub barriers: Vec<String>,
    #[serde(default)]
    pub range_index: Option<u32>,
    #[serde(default)]
    pub flash_attention: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEdgeDescription {
    pub from: String,
    pub to: String,
    #[serde(default = "default_edge_type")]
    pub edge_type: ControlEdgeType,
}

fn default_edge_type() -> ControlEdgeType {
    ControlEdgeType::Schedule
}

impl GraphDescription {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| GraphError::InvalidDescription(e.to_string()))
    }

    /// Materialize the graph. Nodes are created in listed order, so list
    /// position decides creation-id tie-breaks.
    pub fn build(&self) -> Result<Graph> {
        let mut graph = Graph::new();
        let mut tensors: HashMap<&str, TensorId> = HashMap::new();
        for t in &self.tensors {
            if tensors.contains_key(t.name.as_str()) {
                return Err(invalid(format!("tensor '{}' declared twice", t.name)));
            }
            let id = match &t.alias_of {
                Some(real) => {
                    let real = *tensors
                        .get(real.as_str())
                        .ok_or_else(|| invalid(format!("tensor '{}' aliases unknown '{}'", t.name, real)))?;
                    graph.add_alias_tensor(t.name.clone(), t.size_bytes, real, t.offset)?
                }
                None => graph.add_tensor(t.name.clone(), t.size_bytes),
            };
            tensors.insert(t.name.as_str(), id);
        }

        let lookup_tensor = |name: &str| {
            tensors
                .get(name)
                .copied()
                .ok_or_else(|| invalid(format!("unknown tensor '{}'", name)))
        };

        let mut nodes: HashMap<&str, NodeId> = HashMap::new();
        for n in &self.nodes {
            if nodes.contains_key(n.name.as_str()) {
                return Err(invalid(format!("node '{}' declared twice", n.name)));
            }
            let inputs = n.inputs.iter().map(|t| lookup_tensor(t)).collect::<Result<Vec<_>>>()?;
            let outputs = n.outputs.iter().map(|t| lookup_tensor(t)).collect::<Result<Vec<_>>>()?;

            let mut builder = NodeBuilder::new(n.name.clone()).kind(n.kind).engine(n.engine).debug(n.debug);
            if let Some(parent) = n.parent_id {
                builder = builder.parent(parent);
            }
            if let Some(info) = n.bundle {
                builder = builder.bundle(info);
            }
            if let Some(index) = n.range_index {
                builder = builder.range_index(index);
            }
            if n.flash_attention {
                builder = builder.flash_attention();
            }
            let id = graph.add_node(builder, &inputs, &outputs)?;
            nodes.insert(n.name.as_str(), id);
        }

        let lookup_node = |name: &str| {
            nodes
                .get(name)
                .copied()
                .ok_or_else(|| invalid(format!("unknown node '{}'", name)))
        };

        for n in self.nodes.iter().filter(|n| !n.barriers.is_empty()) {
            let id = lookup_node(&n.name)?;
            let barriers = n.barriers.iter().map(|b| lookup_node(b)).collect::<Result<Vec<_>>>()?;
            graph.set_barriers(id, barriers)?;
        }

        for edge in &self.control_edges {
            graph.add_control_edge(lookup_node(&edge.from)?, lookup_node(&edge.to)?, edge.edge_type)?;
        }
        Ok(graph)
    }
}

fn invalid(msg: String) -> GraphError {
    GraphError::InvalidDescription(msg)
}
