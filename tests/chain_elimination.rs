//! Integration test for sequential elimination on a measured chain
//!
//! Covers the worked chain scenario (three scalar variables under
//! unit-noise difference factors), the round-trip property that the Bayes
//! net reproduces the original joint up to normalization, agreement with
//! the batch sparse solver, and ordering determinism.

// Allow expect() in test code
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use approx::assert_relative_eq;
use nalgebra::{dmatrix, dvector};

use arbor_infer::gaussian::{GaussianFactor, GaussianFactorGraph, VectorValues};
use arbor_infer::graph::VariableIndex;
use arbor_infer::ordering::OrderingError;
use arbor_infer::{Conditional, Key, Ordering, OrderingType};

fn prior(key: Key, value: f64) -> GaussianFactor {
    GaussianFactor::unary(key, dmatrix![1.0], dvector![value])
}

fn between(key1: Key, key2: Key, delta: f64) -> GaussianFactor {
    GaussianFactor::binary(key1, dmatrix![-1.0], key2, dmatrix![1.0], dvector![delta])
}

/// x0 = 0, x1 = x0, x2 = x1, all with unit noise
fn zero_chain() -> GaussianFactorGraph {
    let mut graph = GaussianFactorGraph::new();
    graph.add(prior(0, 0.0));
    graph.add(between(0, 1, 0.0));
    graph.add(between(1, 2, 0.0));
    graph
}

/// x0 = 1, x1 = x0 + 2, x2 = x1 + 0.5
fn measured_chain() -> GaussianFactorGraph {
    let mut graph = GaussianFactorGraph::new();
    graph.add(prior(0, 1.0));
    graph.add(between(0, 1, 2.0));
    graph.add(between(1, 2, 0.5));
    graph
}

#[test]
fn test_chain_sequential_elimination() {
    let graph = zero_chain();
    let index = VariableIndex::from_graph(&graph);
    let ordering = Ordering::custom(vec![0, 1, 2], &index).expect("valid ordering");

    let net = graph.eliminate_sequential(&ordering).expect("chain eliminates");
    assert_eq!(net.len(), 3);

    // The root conditional on x2 has zero mean.
    let root = net.conditional(2);
    assert_eq!(root.frontals(), &[2]);
    assert!(root.parents().is_empty());
    assert_relative_eq!(root.rhs()[0], 0.0, epsilon = 1e-12);

    // Back-substitution returns x0 = x1 = x2 = 0.
    let solution = net.optimize().expect("nondegenerate chain");
    for key in 0..3 {
        assert_relative_eq!(solution.get(key).unwrap()[0], 0.0, epsilon = 1e-12);
    }
}

#[test]
fn test_round_trip_reproduces_joint_up_to_normalization() {
    let graph = measured_chain();
    let index = VariableIndex::from_graph(&graph);
    let ordering = Ordering::compute(&index, &OrderingType::MinFill).unwrap();
    let net = graph.eliminate_sequential(&ordering).unwrap();

    // Log-probability differences between two assignments are free of the
    // normalization constant and must match the raw factor product.
    let mut a = VectorValues::new();
    a.insert(0, dvector![1.0]);
    a.insert(1, dvector![2.5]);
    a.insert(2, dvector![4.0]);
    let mut b = VectorValues::new();
    b.insert(0, dvector![0.0]);
    b.insert(1, dvector![0.0]);
    b.insert(2, dvector![0.0]);

    let net_diff = net.log_probability(&a) - net.log_probability(&b);
    let graph_diff = -graph.total_error(&a) + graph.total_error(&b);
    assert_relative_eq!(net_diff, graph_diff, epsilon = 1e-10);
}

#[test]
fn test_optimize_matches_batch_sparse_solve() {
    let graph = measured_chain();
    let index = VariableIndex::from_graph(&graph);
    let ordering = Ordering::compute(&index, &OrderingType::MinFill).unwrap();

    let net = graph.eliminate_sequential(&ordering).unwrap();
    let elimination_solution = net.optimize().unwrap();
    let batch_solution = graph.solve_normal_equations().unwrap();

    assert!(elimination_solution.max_diff(&batch_solution) < 1e-9);
    assert_relative_eq!(elimination_solution.get(0).unwrap()[0], 1.0, epsilon = 1e-9);
    assert_relative_eq!(elimination_solution.get(1).unwrap()[0], 3.0, epsilon = 1e-9);
    assert_relative_eq!(elimination_solution.get(2).unwrap()[0], 3.5, epsilon = 1e-9);
}

#[test]
fn test_every_strategy_is_deterministic() {
    let graph = measured_chain();
    let index = VariableIndex::from_graph(&graph);

    for strategy in [
        OrderingType::MinFill,
        OrderingType::NestedDissection,
        OrderingType::Natural,
    ] {
        let first = Ordering::compute(&index, &strategy).unwrap();
        let second = Ordering::compute(&index, &strategy).unwrap();
        assert_eq!(first, second, "strategy {strategy:?} is not deterministic");
    }
}

#[test]
fn test_natural_ordering_follows_insertion() {
    let mut graph = GaussianFactorGraph::new();
    graph.add(between(5, 3, 0.0));
    graph.add(prior(3, 0.0));
    graph.add(between(3, 8, 0.0));

    let index = VariableIndex::from_graph(&graph);
    let ordering = Ordering::compute(&index, &OrderingType::Natural).unwrap();
    assert_eq!(ordering.keys(), &[5, 3, 8]);
}

#[test]
fn test_invalid_custom_orderings_are_configuration_errors() {
    let graph = measured_chain();
    let index = VariableIndex::from_graph(&graph);

    assert_eq!(
        Ordering::custom(vec![0, 1], &index).unwrap_err(),
        OrderingError::MissingKey(2)
    );
    assert_eq!(
        Ordering::custom(vec![0, 1, 2, 2], &index).unwrap_err(),
        OrderingError::DuplicateKey(2)
    );
    assert_eq!(
        Ordering::custom(vec![0, 1, 2, 9], &index).unwrap_err(),
        OrderingError::UnknownKey(9)
    );
}

#[test]
fn test_elimination_does_not_mutate_the_graph() {
    let graph = measured_chain();
    let index = VariableIndex::from_graph(&graph);
    let ordering = Ordering::compute(&index, &OrderingType::MinFill).unwrap();

    let before = graph.num_factors();
    let _ = graph.eliminate_sequential(&ordering).unwrap();
    let _ = graph.eliminate_multifrontal(&ordering).unwrap();
    assert_eq!(graph.num_factors(), before);

    // Re-elimination produces identical results.
    let first = graph.eliminate_sequential(&ordering).unwrap();
    let second = graph.eliminate_sequential(&ordering).unwrap();
    let mut values = VectorValues::new();
    values.insert(0, dvector![0.4]);
    values.insert(1, dvector![2.2]);
    values.insert(2, dvector![3.1]);
    assert_relative_eq!(
        first.log_probability(&values),
        second.log_probability(&values),
        epsilon = 1e-12
    );
}
