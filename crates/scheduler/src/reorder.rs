//! Moves inside a finished order. Callers pick anchors that keep the order
//! valid; these helpers only splice.

use graphsched_core::NodeId;

pub(crate) fn position(order: &[NodeId], node: NodeId) -> Option<usize> {
    order.iter().position(|&n| n == node)
}

/// The entry of `nodes` placed first in `order`.
pub(crate) fn earliest(order: &[NodeId], nodes: &[NodeId]) -> Option<NodeId> {
    nodes
        .iter()
        .filter_map(|&n| position(order, n).map(|p| (p, n)))
        .min()
        .map(|(_, n)| n)
}

/// The entry of `nodes` placed last in `order`.
pub(crate) fn latest(order: &[NodeId], nodes: &[NodeId]) -> Option<NodeId> {
    nodes
        .iter()
        .filter_map(|&n| position(order, n).map(|p| (p, n)))
        .max()
        .map(|(_, n)| n)
}

/// Pull `node` forward to sit right before a later `anchor`.
pub(crate) fn move_before(order: &mut Vec<NodeId>, node: NodeId, anchor: NodeId) -> bool {
    let (Some(from), Some(to)) = (position(order, node), position(order, anchor)) else {
        return false;
    };
    if from + 1 >= to {
        return false;
    }
    order.remove(from);
    order.insert(to - 1, node);
    true
}

/// Pull `node` back to sit right after an earlier `anchor`.
pub(crate) fn move_after(order: &mut Vec<NodeId>, node: NodeId, anchor: NodeId) -> bool {
    let (Some(from), Some(to)) = (position(order, node), position(order, anchor)) else {
        return false;
    };
    if to + 1 >= from {
        return false;
    }
    order.remove(from);
    order.insert(to + 1, node);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> Vec<NodeId> {
        raw.iter().map(|&i| NodeId(i)).collect()
    }

    #[test]
    fn moves() {
        let mut order = ids(&[0, 1, 2, 3, 4]);
        assert!(move_before(&mut order, NodeId(0), NodeId(3)));
        assert_eq!(order, ids(&[1, 2, 0, 3, 4]));
        assert!(!move_before(&mut order, NodeId(0), NodeId(3)));
        assert!(!move_before(&mut order, NodeId(4), NodeId(1)));

        assert!(move_after(&mut order, NodeId(4), NodeId(1)));
        assert_eq!(order, ids(&[1, 4, 2, 0, 3]));
        assert!(!move_after(&mut order, NodeId(4), NodeId(1)));
    }

    #[test]
    fn earliest_and_latest() {
        let order = ids(&[5, 3, 9]);
        assert_eq!(earliest(&order, &ids(&[9, 3])), Some(NodeId(3)));
        assert_eq!(latest(&order, &ids(&[5, 3])), Some(NodeId(3)));
        assert_eq!(earliest(&order, &ids(&[7])), None);
    }
}
