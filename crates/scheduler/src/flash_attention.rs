//! Serialize flash-attention chains: every node of one chain runs before
//! the next chain starts.

use std::collections::BTreeMap;

use graphsched_core::{ControlEdgeType, NodeId};
use graphsched_graph::{topology, GraphEditor};
use tracing::{debug, info};

use crate::error::Result;

/// Flash-attention nodes grouped into chains by parent id. Chains and their
/// members are in ascending id order.
pub fn flash_attention_chains(editor: &GraphEditor<'_>) -> Vec<Vec<NodeId>> {
    let mut chains: BTreeMap<u64, Vec<NodeId>> = BTreeMap::new();
    for node in editor.graph().nodes().filter(|n| n.annotation.flash_attention) {
        chains.entry(node.parent_id).or_default().push(node.id);
    }
    chains.into_values().collect()
}

/// Add a `Schedule` edge from the last node of each chain to the first node
/// of the next one. A pair is skipped when the bundle plane already has a
/// path back from the later chain, or both ends share a bundle-plane node.
/// Returns the number of edges added.
pub fn order_flash_attention_chains(editor: &mut GraphEditor<'_>) -> Result<usize> {
    let chains = flash_attention_chains(editor);
    let mut added = 0;
    for pair in chains.windows(2) {
        let (Some(&last), Some(&first)) = (pair[0].last(), pair[1].first()) else {
            continue;
        };
        if blocks_ordering(editor, last, first)? {
            continue;
        }
        if topology::is_reachable(editor.graph(), last, first) {
            debug!("Chains already ordered: {} reaches {}", last, first);
            continue;
        }
        editor.add_control_edge(last, first, ControlEdgeType::Schedule)?;
        debug!("Flash attention chain edge {} -> {}", last, first);
        added += 1;
    }
    info!("Ordered {} flash attention chains with {} edges", chains.len(), added);
    Ok(added)
}

fn blocks_ordering(editor: &GraphEditor<'_>, last: NodeId, first: NodeId) -> Result<bool> {
    if let Some(bp) = editor.bundle_plane() {
        if bp.representation(last)? == bp.representation(first)? {
            debug!("{} and {} share a bundle plane node, not ordering", last, first);
            return Ok(true);
        }
        if bp.is_reachable(first, last)? {
            debug!("Bundle plane path {} -> {}, ordering would close a cycle", first, last);
            return Ok(true);
        }
    }
    // barriers never reach the bundle plane
    Ok(topology::is_reachable(editor.graph(), first, last))
}
