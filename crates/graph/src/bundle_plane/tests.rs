use graphsched_core::{BundleInfo, BundleType, ControlEdgeType, GraphError, NodeBuilder, NodeId, TensorId};

use super::*;

// ── Helpers ──────────────────────────────────────────────────────

fn tensor(g: &mut Graph) -> TensorId {
    let n = g.tensors().count();
    g.add_tensor(format!("t{}", n), 128 * 128 * 4)
}

fn tensors(g: &mut Graph, count: usize) -> Vec<TensorId> {
    (0..count).map(|_| tensor(g)).collect()
}

fn nop(g: &mut Graph, inputs: &[TensorId], outputs: &[TensorId]) -> NodeId {
    let name = format!("nop_{}", g.len());
    g.add_node(NodeBuilder::new(name), inputs, outputs).unwrap()
}

fn bundled_nop(g: &mut Graph, inputs: &[TensorId], outputs: &[TensorId], bundle: u32) -> NodeId {
    let name = format!("gemm_{}", g.len());
    let builder = NodeBuilder::new(name).bundle(BundleInfo::new(bundle, BundleType::Mme));
    g.add_node(builder, inputs, outputs).unwrap()
}

fn info(index: u32) -> BundleInfo {
    BundleInfo::new(index, BundleType::Tpc)
}

fn node<'a>(bp: &'a BundlePlane, og: NodeId) -> &'a BpNode {
    bp.bp_node_of(og).unwrap()
}

fn rep(bp: &BundlePlane, t: TensorId) -> BpTensorId {
    bp.tensor_representation(t).unwrap()
}

// ── Bundling ─────────────────────────────────────────────────────

#[test]
fn creates_a_bundle_for_a_node() {
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let n = nop(&mut g, &[], &[t]);

    let mut bp = BundlePlane::new(&g).unwrap();
    assert!(bp.add_node_to_bundle(n, info(0)).unwrap());
    assert!(node(&bp, n).is_bundle());
}

#[test]
fn refuses_to_bundle_a_bundled_node_again() {
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let n = nop(&mut g, &[], &[t]);

    let mut bp = BundlePlane::new(&g).unwrap();
    assert!(bp.add_node_to_bundle(n, info(0)).unwrap());
    assert!(!bp.add_node_to_bundle(n, info(1)).unwrap());
    assert!(!bp.add_node_to_bundle(n, info(0)).unwrap());
}

#[test]
fn fuses_multiple_nodes_into_a_bundle() {
    let mut g = Graph::new();
    let nops: Vec<NodeId> = (0..3).map(|_| nop(&mut g, &[], &[])).collect();

    let mut bp = BundlePlane::new(&g).unwrap();
    assert!(bp.add_node_to_bundle(nops[0], info(0)).unwrap());
    assert!(bp.add_node_to_bundle(nops[1], info(0)).unwrap());

    assert_eq!(bp.bp_graph().len(), 2);
    assert_eq!(bp.representation(nops[0]).unwrap(), bp.representation(nops[1]).unwrap());
    assert_ne!(bp.representation(nops[0]).unwrap(), bp.representation(nops[2]).unwrap());
    assert!(!node(&bp, nops[2]).is_bundle());

    let bundle = node(&bp, nops[0]);
    assert!(bundle.is_bundle());
    assert_eq!(bundle.bundled.len(), 2);
    assert!(bundle.bundled.contains(&nops[0]));
    assert!(bundle.bundled.contains(&nops[1]));
}

#[test]
fn builds_from_existing_annotations() {
    let mut g = Graph::new();
    let a = bundled_nop(&mut g, &[], &[], 0);
    let b = bundled_nop(&mut g, &[], &[], 0);
    let c = nop(&mut g, &[], &[]);

    let bp = BundlePlane::from_annotations(&g).unwrap();
    assert_eq!(bp.bp_graph().len(), 2);
    assert_eq!(bp.representation(a).unwrap(), bp.representation(b).unwrap());
    assert!(!node(&bp, c).is_bundle());
    assert_eq!(node(&bp, a).bundled, vec![a, b]);
}

#[test]
fn interleaved_bundle_members_share_one_node() {
    // ids x1 < z1 < x2, no edges, so execution order alternates bundles
    let mut g = Graph::new();
    let x1 = bundled_nop(&mut g, &[], &[], 1);
    let z1 = bundled_nop(&mut g, &[], &[], 2);
    let x2 = bundled_nop(&mut g, &[], &[], 1);

    let bp = BundlePlane::from_annotations(&g).unwrap();
    assert_eq!(bp.bp_graph().len(), 2);
    assert_eq!(bp.representation(x1).unwrap(), bp.representation(x2).unwrap());
    assert_ne!(bp.representation(x1).unwrap(), bp.representation(z1).unwrap());
    assert_eq!(node(&bp, x1).bundled, vec![x1, x2]);
    bp.validate(&g).unwrap();
}

#[test]
fn annotated_and_fused_bundles_expose_the_same_tensors() {
    // [in] -> x -> [mid] -> y -> [out], x and y in bundle 0, plus a side
    // consumer of [mid] outside the bundle
    let mut g = Graph::new();
    let t = tensors(&mut g, 3);
    let (input, mid, out) = (t[0], t[1], t[2]);
    let x = bundled_nop(&mut g, &[input], &[mid], 0);
    let y = bundled_nop(&mut g, &[mid], &[out], 0);
    let _side = nop(&mut g, &[mid], &[]);

    let annotated = BundlePlane::from_annotations(&g).unwrap();
    let mut fused = BundlePlane::new(&g).unwrap();
    fused.create_bundle_from_nodes(&[x, y], info(0)).unwrap();

    let origins = |bp: &BundlePlane, ids: &[BpTensorId]| -> Vec<TensorId> {
        let mut v: Vec<TensorId> = ids.iter().map(|&id| bp.bp_tensor(id).unwrap().origin).collect();
        v.sort();
        v
    };
    let a = node(&annotated, x);
    let f = node(&fused, x);
    assert_eq!(origins(&annotated, &a.inputs), vec![input]);
    assert_eq!(origins(&annotated, &a.inputs), origins(&fused, &f.inputs));
    assert_eq!(origins(&annotated, &a.outputs), vec![mid, out]);
    assert_eq!(origins(&annotated, &a.outputs), origins(&fused, &f.outputs));
}

#[test]
fn adding_producer_eliminates_the_produced_input() {
    // nop1 -> [t] -> nop2
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let nop1 = nop(&mut g, &[], &[t]);
    let nop2 = nop(&mut g, &[t], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(nop2, info(0)).unwrap();
    bp.add_node_to_bundle(nop1, info(0)).unwrap();

    let bundle = node(&bp, nop2);
    assert!(bundle.inputs.is_empty());
    assert!(bundle.outputs.is_empty());
}

#[test]
fn adding_producer_turns_input_to_output() {
    // nop1 -> [t] -> nop2
    //            \-> nop3
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let nop1 = nop(&mut g, &[], &[t]);
    let nop2 = nop(&mut g, &[t], &[]);
    let _nop3 = nop(&mut g, &[t], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(nop2, info(0)).unwrap();
    bp.add_node_to_bundle(nop1, info(0)).unwrap();

    let bundle = node(&bp, nop2);
    assert!(bundle.inputs.is_empty());
    assert_eq!(bundle.outputs, vec![rep(&bp, t)]);
}

#[test]
fn adding_producer_adds_new_inputs_and_outputs() {
    // [t1] -> nop0 -> [t2] -> nop1
    //             \-> [t3]
    let mut g = Graph::new();
    let t = tensors(&mut g, 3);
    let nop0 = nop(&mut g, &[t[0]], &[t[1], t[2]]);
    let nop1 = nop(&mut g, &[t[1]], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(nop1, info(0)).unwrap();
    bp.add_node_to_bundle(nop0, info(0)).unwrap();

    let bundle = node(&bp, nop0);
    assert_eq!(bp.representation(nop0).unwrap(), bp.representation(nop1).unwrap());
    assert_eq!(bundle.inputs, vec![rep(&bp, t[0])]);
    assert_eq!(bundle.outputs, vec![rep(&bp, t[2])]);
}

#[test]
fn adding_producer_eliminates_multiple_input_usages() {
    // nop0 -> [t] -+-> nop1
    //              +-> nop2
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let nop0 = nop(&mut g, &[], &[t]);
    let nop1 = nop(&mut g, &[t], &[]);
    let nop2 = nop(&mut g, &[t], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(nop1, info(0)).unwrap();
    bp.add_node_to_bundle(nop2, info(0)).unwrap();
    bp.add_node_to_bundle(nop0, info(0)).unwrap();

    assert!(bp.bp_graph().is_acyclic());
    let bundle = node(&bp, nop0);
    assert_eq!(bundle.bundled.len(), 3);
    assert!(bundle.inputs.is_empty());
    assert!(bundle.outputs.is_empty());
}

#[test]
fn adding_producer_turns_multiple_input_usages_to_output() {
    //              +-> nop1
    // nop0 -> [t] -+-> nop2
    //              +-> nop3
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let nop0 = nop(&mut g, &[], &[t]);
    let nop1 = nop(&mut g, &[t], &[]);
    let nop2 = nop(&mut g, &[t], &[]);
    let _nop3 = nop(&mut g, &[t], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(nop1, info(0)).unwrap();
    bp.add_node_to_bundle(nop2, info(0)).unwrap();
    bp.add_node_to_bundle(nop0, info(0)).unwrap();

    assert!(bp.bp_graph().is_acyclic());
    let bundle = node(&bp, nop0);
    assert!(bundle.inputs.is_empty());
    assert_eq!(bundle.outputs, vec![rep(&bp, t)]);
}

#[test]
fn adding_consumer_eliminates_the_consumed_output() {
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let nop0 = nop(&mut g, &[], &[t]);
    let nop1 = nop(&mut g, &[t], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(nop0, info(0)).unwrap();
    bp.add_node_to_bundle(nop1, info(0)).unwrap();

    let bundle = node(&bp, nop0);
    assert!(bundle.inputs.is_empty());
    assert!(bundle.outputs.is_empty());
}

#[test]
fn adding_consumer_keeps_externally_consumed_output() {
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let nop0 = nop(&mut g, &[], &[t]);
    let nop1 = nop(&mut g, &[t], &[]);
    let _nop2 = nop(&mut g, &[t], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(nop0, info(0)).unwrap();
    bp.add_node_to_bundle(nop1, info(0)).unwrap();

    let bundle = node(&bp, nop0);
    assert!(bundle.inputs.is_empty());
    assert_eq!(bundle.outputs, vec![rep(&bp, t)]);
}

#[test]
fn adding_consumer_adds_new_inputs_and_outputs() {
    // nop0 -> [t0] -> nop1 -> [t2]
    //         [t1] ----^
    let mut g = Graph::new();
    let t = tensors(&mut g, 3);
    let nop0 = nop(&mut g, &[], &[t[0]]);
    let nop1 = nop(&mut g, &[t[0], t[1]], &[t[2]]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(nop0, info(0)).unwrap();
    bp.add_node_to_bundle(nop1, info(0)).unwrap();

    let bundle = node(&bp, nop0);
    assert_eq!(bundle.inputs, vec![rep(&bp, t[1])]);
    assert_eq!(bundle.outputs, vec![rep(&bp, t[2])]);
}

#[test]
fn fusing_two_bundles_is_unsupported() {
    let mut g = Graph::new();
    let a = nop(&mut g, &[], &[]);
    let b = nop(&mut g, &[], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(a, info(0)).unwrap();
    bp.add_node_to_bundle(b, info(1)).unwrap();
    assert_eq!(bp.add_node_to_bundle(b, info(0)), Err(GraphError::UnsupportedFusion));
}

#[test]
fn create_bundle_rejects_bad_requests() {
    let mut g = Graph::new();
    let a = nop(&mut g, &[], &[]);
    let b = nop(&mut g, &[], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    assert_eq!(bp.create_bundle_from_nodes(&[], info(0)), Err(GraphError::EmptyBundle));
    bp.create_bundle_from_nodes(&[a], info(0)).unwrap();
    assert_eq!(bp.create_bundle_from_nodes(&[b], info(0)), Err(GraphError::BundleExists(0)));
    assert_eq!(bp.create_bundle_from_nodes(&[a, b], info(1)), Err(GraphError::AlreadyBundled(a)));
}

// ── Paths and candidates ─────────────────────────────────────────

#[test]
fn validates_single_path_producer() {
    // nop -> [a] -> mme
    let mut g = Graph::new();
    let t = tensors(&mut g, 3);
    let producer = nop(&mut g, &[], &[t[0]]);
    let mme = nop(&mut g, &[t[0], t[1]], &[t[2]]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(mme, info(0)).unwrap();
    assert!(bp.validate_candidate(producer, &[mme]).unwrap());
}

#[test]
fn invalidates_multiple_path_producer() {
    // nop1 ------->[a]---------> mme -> [c]
    //      \->[b0]-> nop2 ->[b1]--^
    let mut g = Graph::new();
    let t = tensors(&mut g, 4);
    let nop1 = nop(&mut g, &[], &[t[0], t[1]]);
    let nop2 = nop(&mut g, &[t[1]], &[t[2]]);
    let mme = nop(&mut g, &[t[0], t[2]], &[t[3]]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(mme, info(0)).unwrap();

    assert!(!bp.validate_candidate(nop1, &[mme]).unwrap());
    assert!(bp.validate_candidate(nop2, &[mme]).unwrap());
    assert!(!bp.validate_candidate(nop1, &[mme, nop2]).unwrap());
    assert!(!bp.validate_candidate(nop2, &[mme, nop1]).unwrap());
    assert_eq!(bp.number_of_paths(nop1, mme).unwrap(), 2);
}

#[test]
fn counts_a_bundle_as_one_node_on_paths() {
    // nop1 -------------------------> mme1 (bundle 1)
    //    +----> mme2 (bundle 2)        ^
    // nop2 -----+-> mme3 (bundle 2) ---+
    let mut g = Graph::new();
    let nop1_out = tensor(&mut g);
    let nop2_out = tensor(&mut g);
    let nop1 = nop(&mut g, &[], &[nop1_out]);
    let _nop2 = nop(&mut g, &[], &[nop2_out]);
    let t = tensors(&mut g, 4);
    let mme1 = bundled_nop(&mut g, &[nop1_out, t[3]], &[t[0]], 1);
    let _mme2 = bundled_nop(&mut g, &[nop1_out, nop2_out], &[t[1]], 2);
    let _mme3 = bundled_nop(&mut g, &[nop2_out, t[2]], &[t[3]], 2);

    let bp = BundlePlane::from_annotations(&g).unwrap();
    assert_eq!(bp.bp_graph().len(), 4);
    assert!(!bp.validate_candidate(nop1, &[mme1]).unwrap());
}

// ── Removal and unbundling ───────────────────────────────────────

#[test]
fn remove_bundle_restores_members() {
    // nop0 -> [t0] -> nop1 -> [t2]
    //         [t1] ----^
    let mut g = Graph::new();
    let t = tensors(&mut g, 3);
    let nop0 = nop(&mut g, &[], &[t[0]]);
    let nop1 = nop(&mut g, &[t[0], t[1]], &[t[2]]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(nop0, info(0)).unwrap();
    bp.add_node_to_bundle(nop1, info(0)).unwrap();
    bp.remove_bundle(&g, nop0).unwrap();

    let n0 = node(&bp, nop0);
    let n1 = node(&bp, nop1);
    assert_ne!(n0.id, n1.id);
    assert!(n0.inputs.is_empty());
    assert_eq!(n1.inputs.len(), 2);
    assert_eq!(n0.outputs[0], rep(&bp, t[0]));
    assert_eq!(n1.outputs[0], rep(&bp, t[2]));
    assert!(bp.bundle_node(0).is_none());
}

#[test]
fn create_bundle_from_many_nodes_and_remove_it() {
    // nop0 -> [t0] -> nop1 -> [t2] -> nop2 -> [t3] -> nop4 -> [t5] -> nop5 -> [t6]
    //         [t1] ----^         +--> nop3 -> [t4] ----^
    let mut g = Graph::new();
    let t = tensors(&mut g, 7);
    let nop0 = nop(&mut g, &[], &[t[0]]);
    let nop1 = nop(&mut g, &[t[0], t[1]], &[t[2]]);
    let nop2 = nop(&mut g, &[t[2]], &[t[3]]);
    let nop3 = nop(&mut g, &[t[2]], &[t[4]]);
    let nop4 = nop(&mut g, &[t[3], t[4]], &[t[5]]);
    let nop5 = nop(&mut g, &[t[5]], &[t[6]]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.create_bundle_from_nodes(&[nop1, nop2, nop3, nop4], BundleInfo::new(0, BundleType::ComplexGuid))
        .unwrap();

    let bundle = bp.representation(nop1).unwrap();
    for n in [nop2, nop3, nop4] {
        assert_eq!(bp.representation(n).unwrap(), bundle);
    }
    assert_ne!(bp.representation(nop0).unwrap(), bundle);
    assert_ne!(bp.representation(nop5).unwrap(), bundle);
    let bundle = node(&bp, nop1);
    assert_eq!(bundle.inputs.len(), 2);
    assert_eq!(bundle.outputs, vec![rep(&bp, t[5])]);

    bp.remove_bundle(&g, nop4).unwrap();
    assert_eq!(bp.bp_graph().len(), 6);
    assert_eq!(bp.bp_graph().tensor_count(), 7);
    bp.validate(&g).unwrap();
}

#[test]
fn unbundle_node_sanity() {
    // nop0 -> [t0] -> nop1 -> [t1] -> nop2 -> [t2] -> nop3 -> [t3] -> nop4 -> [t4]
    let mut g = Graph::new();
    let t = tensors(&mut g, 5);
    let mut nodes = vec![nop(&mut g, &[], &[t[0]])];
    for i in 0..4 {
        nodes.push(nop(&mut g, &[t[i]], &[t[i + 1]]));
    }

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.create_bundle_from_nodes(&nodes, info(0)).unwrap();
    assert_eq!(bp.bp_graph().len(), 1);

    bp.unbundle_node(&g, nodes[4]).unwrap();
    assert!(bp.bp_graph().is_acyclic());
    assert_eq!(bp.bp_graph().len(), 2);

    bp.unbundle_node(&g, nodes[3]).unwrap();
    assert!(bp.bp_graph().is_acyclic());
    assert_eq!(bp.bp_graph().len(), 3);
    assert_eq!(node(&bp, nodes[0]).outputs, vec![rep(&bp, t[2])]);
}

#[test]
fn unbundle_is_agnostic_to_bundling_order() {
    // [t0] -> nop0 -> [t1] -> nop1 -> [t3] -> nop2 -> [t4] -> nop3 -> [t5] -> nop4 -> [t6] -> nop5 -> [t7]
    //                 [t2] ----^
    let mut g = Graph::new();
    let t = tensors(&mut g, 8);
    let nodes = vec![
        nop(&mut g, &[t[0]], &[t[1]]),
        nop(&mut g, &[t[1], t[2]], &[t[3]]),
        nop(&mut g, &[t[3]], &[t[4]]),
        nop(&mut g, &[t[4]], &[t[5]]),
        nop(&mut g, &[t[5]], &[t[6]]),
        nop(&mut g, &[t[6]], &[t[7]]),
    ];

    let mut bp = BundlePlane::new(&g).unwrap();
    for i in [1, 2, 3, 0, 4, 5] {
        bp.add_node_to_bundle(nodes[i], info(0)).unwrap();
    }
    assert_eq!(bp.bp_graph().len(), 1);

    bp.unbundle_node(&g, nodes[5]).unwrap();
    assert!(bp.bp_graph().is_acyclic());
    assert_eq!(bp.bp_graph().len(), 2);

    bp.unbundle_node(&g, nodes[0]).unwrap();
    assert!(bp.bp_graph().is_acyclic());
    assert_eq!(bp.bp_graph().len(), 3);
    let bundle = node(&bp, nodes[1]);
    assert_eq!(bundle.inputs, vec![rep(&bp, t[1]), rep(&bp, t[2])]);
    assert_eq!(bundle.outputs, vec![rep(&bp, t[6])]);
}

#[test]
fn unbundling_a_singleton_unsets_it() {
    let mut g = Graph::new();
    let a = nop(&mut g, &[], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.add_node_to_bundle(a, info(3)).unwrap();
    let id = bp.representation(a).unwrap();
    bp.unbundle_node(&g, a).unwrap();

    assert_eq!(bp.representation(a).unwrap(), id);
    assert!(!node(&bp, a).is_bundle());
    assert!(bp.bundle_node(3).is_none());
}

#[test]
fn removing_a_member_shrinks_exposed_tensors() {
    // [t0] -> a -> [t1] -> b -> [t2]
    //         [t3] --------^
    let mut g = Graph::new();
    let t = tensors(&mut g, 4);
    let a = nop(&mut g, &[t[0]], &[t[1]]);
    let b = nop(&mut g, &[t[1], t[3]], &[t[2]]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.create_bundle_from_nodes(&[a, b], info(0)).unwrap();
    assert_eq!(node(&bp, a).inputs.len(), 2);

    let removed = g.remove_node(b).unwrap();
    bp.remove_node(&g, &removed, None).unwrap();

    let bundle = node(&bp, a);
    assert_eq!(bundle.bundled, vec![a]);
    assert_eq!(bundle.inputs, vec![rep(&bp, t[0])]);
    assert!(bundle.outputs.is_empty());
    assert!(!bp.has_representation(b));
}

#[test]
fn removing_a_node_hands_outputs_to_new_producer() {
    let mut g = Graph::new();
    let t = tensors(&mut g, 2);
    let a = nop(&mut g, &[], &[t[0]]);
    let b = nop(&mut g, &[t[0]], &[t[1]]);
    let c = nop(&mut g, &[t[1]], &[]);

    let mut bp = BundlePlane::new(&g).unwrap();
    let removed = g.get(b).unwrap().clone();
    bp.remove_node(&g, &removed, Some(a)).unwrap();

    assert_eq!(bp.bp_graph().len(), 2);
    assert_eq!(bp.number_of_paths(a, c).unwrap(), 1);
}

// ── Incremental updates ──────────────────────────────────────────

#[test]
fn frozen_plane_ignores_edits() {
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let a = nop(&mut g, &[], &[t]);

    let mut bp = BundlePlane::new(&g).unwrap();
    bp.freeze().unwrap();
    assert_eq!(bp.freeze(), Err(GraphError::BundlePlaneFrozen("frozen")));

    let b = nop(&mut g, &[t], &[]);
    bp.add_node(&g, b).unwrap();
    assert!(!bp.has_representation(b));

    bp.unfreeze().unwrap();
    assert_eq!(bp.unfreeze(), Err(GraphError::BundlePlaneFrozen("unfrozen")));
    bp.add_node(&g, b).unwrap();
    assert_eq!(bp.number_of_paths(a, b).unwrap(), 1);
}

#[test]
fn added_annotated_node_joins_its_bundle() {
    let mut g = Graph::new();
    let a = bundled_nop(&mut g, &[], &[], 5);
    let mut bp = BundlePlane::from_annotations(&g).unwrap();

    let b = bundled_nop(&mut g, &[], &[], 5);
    bp.add_node(&g, b).unwrap();
    assert_eq!(bp.representation(a).unwrap(), bp.representation(b).unwrap());
    assert_eq!(bp.add_node(&g, b), Err(GraphError::AlreadyInBundlePlane(b)));
}

#[test]
fn replace_semantic_nodes_moves_mapping() {
    let mut g = Graph::new();
    let a = nop(&mut g, &[], &[]);
    let b = nop(&mut g, &[], &[]);
    let mut bp = BundlePlane::new(&g).unwrap();
    bp.create_bundle_from_nodes(&[a, b], info(0)).unwrap();

    let replacement = nop(&mut g, &[], &[]);
    bp.replace_semantic_nodes(b, replacement).unwrap();
    assert!(!bp.has_representation(b));
    assert_eq!(node(&bp, replacement).bundled, vec![a, replacement]);
    assert_eq!(
        bp.replace_semantic_nodes(a, replacement),
        Err(GraphError::AlreadyInBundlePlane(replacement))
    );
}

#[test]
fn relationships_mirror_control_edges() {
    let mut g = Graph::new();
    let a = nop(&mut g, &[], &[]);
    let b = nop(&mut g, &[], &[]);
    let c = nop(&mut g, &[], &[]);
    let mut bp = BundlePlane::new(&g).unwrap();
    bp.create_bundle_from_nodes(&[a, b], info(0)).unwrap();

    let ctrl = g.add_control_edge(a, c, ControlEdgeType::Schedule).unwrap();
    bp.add_relationship(&g, ctrl, a, c).unwrap();
    assert_eq!(bp.number_of_paths(b, c).unwrap(), 1);

    // same bundle: nothing to mirror
    let inner = g.add_control_edge(a, b, ControlEdgeType::Schedule).unwrap();
    bp.add_relationship(&g, inner, a, b).unwrap();
    assert!(node(&bp, a).inputs.is_empty());

    bp.remove_relationship(ctrl, c, Usage::Input).unwrap();
    assert_eq!(bp.number_of_paths(a, c).unwrap(), 0);
}

// ── Queries ──────────────────────────────────────────────────────

#[test]
fn insert_bp_tensor_is_memoized() {
    let mut g = Graph::new();
    let t = tensor(&mut g);
    let _ = nop(&mut g, &[], &[t]);
    let mut bp = BundlePlane::new(&g).unwrap();

    let first = bp.insert_bp_tensor(&g, t).unwrap();
    let second = bp.insert_bp_tensor(&g, t).unwrap();
    assert_eq!(first, second);
    assert_eq!(bp.bp_tensor(first).unwrap().origin, t);

    let fresh = tensor(&mut g);
    let third = bp.insert_bp_tensor(&g, fresh).unwrap();
    assert_ne!(first, third);
    assert_eq!(bp.insert_bp_tensor(&g, fresh).unwrap(), third);
}

#[test]
fn schedule_expands_bundles_in_execution_order() {
    // a -> b -> c, with b and c in bundle 0
    let mut g = Graph::new();
    let t = tensors(&mut g, 2);
    let a = nop(&mut g, &[], &[t[0]]);
    let b = bundled_nop(&mut g, &[t[0]], &[t[1]], 0);
    let c = bundled_nop(&mut g, &[t[1]], &[], 0);

    let bp = BundlePlane::from_annotations(&g).unwrap();
    let bp_order = bp.topological_order().unwrap();
    assert_eq!(bp_order.len(), 2);

    let schedule = bp.orig_schedule_from_bp_schedule(&bp_order, &[a, b, c]).unwrap();
    assert_eq!(schedule, vec![a, b, c]);
}

#[test]
fn validate_counts_bundles_of_selected_nodes() {
    let mut g = Graph::new();
    let a = bundled_nop(&mut g, &[], &[], 0);
    let b = bundled_nop(&mut g, &[], &[], 1);

    let only_first: NodePredicate = Box::new(move |n| n.id == a);
    let bp = BundlePlane::with_predicate(&g, only_first).unwrap();
    assert_eq!(bp.bp_graph().len(), 1);

    let mut plain = BundlePlane::new(&g).unwrap();
    assert!(matches!(plain.validate(&g), Err(GraphError::InvalidBundlePlane(_))));
    plain.add_node_to_bundle(a, info(0)).unwrap();
    assert!(plain.validate(&g).is_err());
    plain.add_node_to_bundle(b, info(1)).unwrap();
    plain.validate(&g).unwrap();
}

#[test]
fn discard_empties_the_plane() {
    let mut g = Graph::new();
    let a = nop(&mut g, &[], &[]);
    let mut bp = BundlePlane::new(&g).unwrap();
    bp.discard();
    assert!(bp.bp_graph().is_empty());
    assert!(!bp.has_representation(a));
}
