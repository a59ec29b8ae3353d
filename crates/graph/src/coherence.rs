//! Implicit ordering between nodes touching overlapping memory through
//! different alias tensors, made explicit as `Memory` control edges.

use std::collections::BTreeMap;

use graphsched_core::{ControlEdgeType, NodeId, Result, TensorId};
use tracing::{debug, info};

use crate::editor::GraphEditor;
use crate::topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
struct MemoryAccess {
    node: NodeId,
    tensor: TensorId,
    offset: u64,
    size: u64,
    access: Access,
}

impl MemoryAccess {
    fn overlaps(&self, other: &MemoryAccess) -> bool {
        self.size > 0
            && other.size > 0
            && self.offset < other.offset + other.size
            && other.offset < self.offset + self.size
    }
}

/// Order every write/write and read/write pair on overlapping bytes of the
/// same real memory. Pairs are ordered by node id; pairs already ordered
/// through existing edges are left alone. Returns the number of edges added.
pub fn register_memory_coherence(editor: &mut GraphEditor<'_>) -> Result<usize> {
    let mut by_memory: BTreeMap<TensorId, Vec<MemoryAccess>> = BTreeMap::new();
    {
        let graph = editor.graph();
        for node in graph.nodes() {
            let accesses = node
                .inputs
                .iter()
                .map(|&t| (t, Access::Read))
                .chain(node.outputs.iter().map(|&t| (t, Access::Write)));
            for (t, access) in accesses {
                let Some(tensor) = graph.tensor(t) else {
                    continue;
                };
                by_memory
                    .entry(graph.real_tensor(t))
                    .or_default()
                    .push(MemoryAccess {
                        node: node.id,
                        tensor: t,
                        offset: graph.real_offset(t),
                        size: tensor.size_bytes,
                        access,
                    });
            }
        }
    }

    let mut pairs = Vec::new();
    for accesses in by_memory.values() {
        for (i, first) in accesses.iter().enumerate() {
            for second in &accesses[i + 1..] {
                if first.node == second.node || first.tensor == second.tensor {
                    continue;
                }
                if first.access == Access::Read && second.access == Access::Read {
                    continue;
                }
                if !first.overlaps(second) {
                    continue;
                }
                let (blocking, blocked) = if first.node < second.node {
                    (first.node, second.node)
                } else {
                    (second.node, first.node)
                };
                pairs.push((blocking, blocked));
            }
        }
    }
    pairs.sort();
    pairs.dedup();

    let mut added = 0;
    for (blocking, blocked) in pairs {
        let graph = editor.graph();
        if topology::is_reachable(graph, blocking, blocked) || topology::is_reachable(graph, blocked, blocking) {
            continue;
        }
        editor.add_control_edge(blocking, blocked, ControlEdgeType::Memory)?;
        debug!("Memory coherence: {} before {}", blocking, blocked);
        added += 1;
    }
    info!("Registered {} memory coherence edges", added);
    Ok(added)
}
