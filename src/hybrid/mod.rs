//! Hybrid (conditional-linear-Gaussian) factor family
//!
//! Mixes continuous and discrete variables: a mixture factor holds one
//! Gaussian branch per assignment of its discrete modes, plus a per-branch
//! additive log-weight that carries normalization constants across the
//! continuous/discrete boundary. Elimination case-splits continuous
//! frontals over every mode assignment; discrete frontals may only be
//! eliminated once no continuous factors remain in the cluster.

use std::collections::BTreeMap;

use crate::discrete::{
    assign, eliminate_discrete, flat_index, DiscreteFactor, DiscreteFactorGraph, DiscreteKey,
    DiscreteValues,
};
use crate::gaussian::{
    eliminate_gaussian, GaussianConditional, GaussianFactor, GaussianFactorGraph, VectorValues,
};
use crate::graph::{Factor, FactorGraph, Key, SymbolicFactor};
use crate::inference::{BayesNet, BayesTree, Conditional, EliminationError};

pub type HybridFactorGraph = FactorGraph<HybridFactor>;
pub type HybridBayesNet = BayesNet<HybridConditional>;
pub type HybridBayesTree = BayesTree<HybridConditional>;

/// Joint assignment of continuous and discrete variables
#[derive(Debug, Clone, Default)]
pub struct HybridValues {
    pub continuous: VectorValues,
    pub discrete: DiscreteValues,
}

/// One Gaussian factor per assignment of a set of discrete modes.
///
/// Branches are indexed row-major over the discrete keys, last key
/// fastest, like discrete tables. `log_weights[i]` scales branch `i`
/// multiplicatively: the branch density is
/// `exp(log_weights[i]) · exp(−error_i(x))`.
#[derive(Debug, Clone)]
pub struct GaussianMixtureFactor {
    discrete_keys: Vec<DiscreteKey>,
    branches: Vec<GaussianFactor>,
    log_weights: Vec<f64>,
    keys: Vec<Key>,
    nr_continuous: usize,
}

impl GaussianMixtureFactor {
    /// Mixture with unit weights
    pub fn new(discrete_keys: Vec<DiscreteKey>, branches: Vec<GaussianFactor>) -> Self {
        let log_weights = vec![0.0; branches.len()];
        Self::with_log_weights(discrete_keys, branches, log_weights)
    }

    pub fn with_log_weights(
        discrete_keys: Vec<DiscreteKey>,
        branches: Vec<GaussianFactor>,
        log_weights: Vec<f64>,
    ) -> Self {
        let expected: usize = discrete_keys.iter().map(|dk| dk.cardinality).product();
        assert_eq!(branches.len(), expected, "one branch per mode assignment");
        assert_eq!(branches.len(), log_weights.len());

        let mut continuous: Vec<Key> = branches
            .iter()
            .flat_map(|b| b.keys().iter().copied())
            .collect();
        continuous.sort_unstable();
        continuous.dedup();

        let nr_continuous = continuous.len();
        let mut keys = continuous;
        keys.extend(discrete_keys.iter().map(|dk| dk.key));
        Self {
            discrete_keys,
            branches,
            log_weights,
            keys,
            nr_continuous,
        }
    }

    pub fn discrete_keys(&self) -> &[DiscreteKey] {
        &self.discrete_keys
    }

    pub fn continuous_keys(&self) -> &[Key] {
        &self.keys[..self.nr_continuous]
    }

    pub fn branches(&self) -> &[GaussianFactor] {
        &self.branches
    }

    pub fn log_weights(&self) -> &[f64] {
        &self.log_weights
    }

    /// Index of the branch selected by the assignment
    fn branch_index(&self, values: &DiscreteValues) -> Result<usize, EliminationError> {
        let mut assignment = Vec::with_capacity(self.discrete_keys.len());
        for dk in &self.discrete_keys {
            let value = values
                .get(&dk.key)
                .ok_or(EliminationError::MissingValue { key: dk.key })?;
            assignment.push(*value);
        }
        Ok(flat_index(&self.discrete_keys, &assignment))
    }

    /// `error_i(x) − log_weights[i]` for the selected branch, so that
    /// `exp(−error)` is the factor value
    pub fn error(&self, values: &HybridValues) -> f64 {
        let i = self
            .branch_index(&values.discrete)
            .unwrap_or_else(|e| panic!("{e}"));
        self.branches[i].error(&values.continuous) - self.log_weights[i]
    }
}

/// A factor of a hybrid graph: continuous, discrete, or mode-switched
#[derive(Debug, Clone)]
pub enum HybridFactor {
    Gaussian(GaussianFactor),
    Discrete(DiscreteFactor),
    Mixture(GaussianMixtureFactor),
    /// Scope-only placeholder used by incremental re-elimination
    Symbolic(Vec<Key>),
}

impl HybridFactor {
    /// `−log` of the factor value at the assignment (up to each family's
    /// constant)
    pub fn error(&self, values: &HybridValues) -> f64 {
        match self {
            HybridFactor::Gaussian(f) => f.error(&values.continuous),
            HybridFactor::Discrete(f) => -f.value(&values.discrete).ln(),
            HybridFactor::Mixture(f) => f.error(values),
            HybridFactor::Symbolic(_) => 0.0,
        }
    }
}

impl Factor for HybridFactor {
    fn keys(&self) -> &[Key] {
        match self {
            HybridFactor::Gaussian(f) => f.keys(),
            HybridFactor::Discrete(f) => f.keys(),
            HybridFactor::Mixture(f) => &f.keys,
            HybridFactor::Symbolic(keys) => keys,
        }
    }
}

impl SymbolicFactor for HybridFactor {
    fn symbolic(keys: Vec<Key>) -> Self {
        HybridFactor::Symbolic(keys)
    }
}

/// One Gaussian conditional per mode assignment:
/// `P(frontals | continuous parents, modes)`
#[derive(Debug, Clone)]
pub struct GaussianMixtureConditional {
    discrete_keys: Vec<DiscreteKey>,
    branches: Vec<GaussianConditional>,
    keys: Vec<Key>,
    nr_frontals: usize,
}

impl GaussianMixtureConditional {
    pub fn discrete_keys(&self) -> &[DiscreteKey] {
        &self.discrete_keys
    }

    pub fn branches(&self) -> &[GaussianConditional] {
        &self.branches
    }

    fn branch_index(&self, values: &DiscreteValues) -> Result<usize, EliminationError> {
        let mut assignment = Vec::with_capacity(self.discrete_keys.len());
        for dk in &self.discrete_keys {
            let value = values
                .get(&dk.key)
                .ok_or(EliminationError::MissingValue { key: dk.key })?;
            assignment.push(*value);
        }
        Ok(flat_index(&self.discrete_keys, &assignment))
    }
}

/// Conditional of a hybrid Bayes net or tree
#[derive(Debug, Clone)]
pub enum HybridConditional {
    Gaussian(GaussianConditional),
    Discrete(crate::discrete::DiscreteConditional),
    Mixture(GaussianMixtureConditional),
}

impl Conditional for HybridConditional {
    type Values = HybridValues;
    type Factor = HybridFactor;

    fn keys(&self) -> &[Key] {
        match self {
            HybridConditional::Gaussian(c) => c.keys(),
            HybridConditional::Discrete(c) => c.keys(),
            HybridConditional::Mixture(c) => &c.keys,
        }
    }

    fn nr_frontals(&self) -> usize {
        match self {
            HybridConditional::Gaussian(c) => c.nr_frontals(),
            HybridConditional::Discrete(c) => c.nr_frontals(),
            HybridConditional::Mixture(c) => c.nr_frontals,
        }
    }

    fn log_probability(&self, values: &HybridValues) -> f64 {
        match self {
            HybridConditional::Gaussian(c) => c.log_probability(&values.continuous),
            HybridConditional::Discrete(c) => c.log_probability(&values.discrete),
            HybridConditional::Mixture(c) => {
                let i = c
                    .branch_index(&values.discrete)
                    .unwrap_or_else(|e| panic!("{e}"));
                c.branches[i].log_probability(&values.continuous)
            }
        }
    }

    fn error(&self, values: &HybridValues) -> f64 {
        match self {
            HybridConditional::Gaussian(c) => c.error(&values.continuous),
            HybridConditional::Discrete(c) => c.error(&values.discrete),
            HybridConditional::Mixture(c) => {
                let i = c
                    .branch_index(&values.discrete)
                    .unwrap_or_else(|e| panic!("{e}"));
                c.branches[i].error(&values.continuous)
            }
        }
    }

    fn solve_into(&self, values: &mut HybridValues) -> Result<(), EliminationError> {
        match self {
            HybridConditional::Gaussian(c) => c.solve_into(&mut values.continuous),
            HybridConditional::Discrete(c) => c.solve_into(&mut values.discrete),
            HybridConditional::Mixture(c) => {
                let i = c.branch_index(&values.discrete)?;
                c.branches[i].solve_into(&mut values.continuous)
            }
        }
    }

    fn as_factor(&self) -> HybridFactor {
        match self {
            HybridConditional::Gaussian(c) => HybridFactor::Gaussian(c.as_factor()),
            HybridConditional::Discrete(c) => HybridFactor::Discrete(c.as_factor()),
            HybridConditional::Mixture(c) => {
                // P_i = exp(log_normalizer_i − error_i), so the branch
                // weight is exactly the branch's log-normalizer.
                let branches: Vec<GaussianFactor> =
                    c.branches.iter().map(|b| b.as_factor()).collect();
                let log_weights: Vec<f64> =
                    c.branches.iter().map(|b| b.log_normalizer()).collect();
                HybridFactor::Mixture(GaussianMixtureFactor::with_log_weights(
                    c.discrete_keys.clone(),
                    branches,
                    log_weights,
                ))
            }
        }
    }
}

/// Elimination step for hybrid clusters.
///
/// Continuous frontals are eliminated once per assignment of the involved
/// discrete modes, producing a Gaussian-mixture conditional; the branch
/// normalization constants move into the separator's log-weights so the
/// eventual discrete elimination sees the correct mode posterior.
/// Discrete frontals require a cluster free of continuous factors.
pub fn eliminate_hybrid(
    graph: &HybridFactorGraph,
    frontals: &[Key],
) -> Result<(HybridConditional, HybridFactor), EliminationError> {
    if graph.num_factors() == 0 {
        return Err(EliminationError::EmptyCluster {
            keys: frontals.to_vec(),
        });
    }

    // Mode variables, as declared by the factors that mention them; keys
    // never named discrete are treated as continuous.
    let mut discrete_kind: BTreeMap<Key, usize> = BTreeMap::new();
    for (_, factor) in graph.iter() {
        let dkeys = match &**factor {
            HybridFactor::Discrete(f) => f.discrete_keys(),
            HybridFactor::Mixture(f) => f.discrete_keys(),
            HybridFactor::Gaussian(_) | HybridFactor::Symbolic(_) => continue,
        };
        for dk in dkeys {
            let entry = discrete_kind.entry(dk.key).or_insert(0);
            *entry = (*entry).max(dk.cardinality);
        }
    }

    let discrete_frontals = frontals
        .iter()
        .filter(|&&k| discrete_kind.contains_key(&k))
        .count();
    if discrete_frontals == frontals.len() {
        eliminate_discrete_cluster(graph, frontals)
    } else if discrete_frontals == 0 {
        eliminate_continuous_cluster(graph, frontals, &discrete_kind)
    } else {
        Err(EliminationError::MixedFrontals)
    }
}

fn eliminate_discrete_cluster(
    graph: &HybridFactorGraph,
    frontals: &[Key],
) -> Result<(HybridConditional, HybridFactor), EliminationError> {
    let mut discrete = DiscreteFactorGraph::new();
    for (_, factor) in graph.iter() {
        match &**factor {
            HybridFactor::Discrete(f) => {
                discrete.add(f.clone());
            }
            HybridFactor::Symbolic(keys) => {
                discrete.add(DiscreteFactor::symbolic(keys.clone()));
            }
            HybridFactor::Gaussian(_) | HybridFactor::Mixture(_) => {
                return Err(EliminationError::HybridOrdering { key: frontals[0] });
            }
        }
    }
    let (conditional, separator) = eliminate_discrete(&discrete, frontals)?;
    Ok((
        HybridConditional::Discrete(conditional),
        HybridFactor::Discrete(separator),
    ))
}

fn eliminate_continuous_cluster(
    graph: &HybridFactorGraph,
    frontals: &[Key],
    modes: &BTreeMap<Key, usize>,
) -> Result<(HybridConditional, HybridFactor), EliminationError> {
    for (&key, &cardinality) in modes {
        if cardinality == 0 {
            return Err(EliminationError::UnknownCardinality { key });
        }
    }
    let mode_keys: Vec<DiscreteKey> = modes
        .iter()
        .map(|(&key, &cardinality)| DiscreteKey::new(key, cardinality))
        .collect();

    // Continuous scope union, so every branch sees identical columns and
    // all branch conditionals share one separator layout.
    let mut union_keys: Vec<Key> = Vec::new();
    for (_, factor) in graph.iter() {
        match &**factor {
            HybridFactor::Gaussian(f) => union_keys.extend(f.keys()),
            HybridFactor::Mixture(f) => union_keys.extend(f.continuous_keys()),
            HybridFactor::Symbolic(keys) => {
                union_keys.extend(keys.iter().filter(|k| !modes.contains_key(*k)))
            }
            HybridFactor::Discrete(_) => {}
        }
    }
    union_keys.sort_unstable();
    union_keys.dedup();

    if mode_keys.is_empty() {
        let mut gaussians = GaussianFactorGraph::new();
        for (_, factor) in graph.iter() {
            match &**factor {
                HybridFactor::Gaussian(f) => {
                    gaussians.add(f.clone());
                }
                HybridFactor::Symbolic(keys) => {
                    gaussians.add(GaussianFactor::symbolic(keys.clone()));
                }
                HybridFactor::Mixture(_) | HybridFactor::Discrete(_) => unreachable!(),
            }
        }
        let (conditional, separator) = eliminate_gaussian(&gaussians, frontals)?;
        return Ok((
            HybridConditional::Gaussian(conditional),
            HybridFactor::Gaussian(separator),
        ));
    }

    let branch_count: usize = mode_keys.iter().map(|dk| dk.cardinality).product();
    let mut conditionals = Vec::with_capacity(branch_count);
    let mut separators = Vec::with_capacity(branch_count);
    let mut log_weights = Vec::with_capacity(branch_count);
    let mut assignment = DiscreteValues::new();

    for flat in 0..branch_count {
        assign(&mode_keys, flat, &mut assignment);

        let mut gaussians = GaussianFactorGraph::new();
        gaussians.add(GaussianFactor::symbolic(union_keys.clone()));
        let mut log_weight = 0.0;
        for (_, factor) in graph.iter() {
            match &**factor {
                HybridFactor::Gaussian(f) => {
                    gaussians.add(f.clone());
                }
                HybridFactor::Mixture(f) => {
                    let i = f.branch_index(&assignment)?;
                    gaussians.add(f.branches[i].clone());
                    log_weight += f.log_weights[i];
                }
                HybridFactor::Discrete(f) => {
                    // A pure table in a continuous cluster only reweights
                    // the modes.
                    log_weight += f.value(&assignment).ln();
                }
                HybridFactor::Symbolic(_) => {}
            }
        }

        let (conditional, separator) = eliminate_gaussian(&gaussians, frontals)?;
        log_weights.push(log_weight - conditional.log_normalizer());
        conditionals.push(conditional);
        separators.push(separator);
    }

    let parents = conditionals[0].parents().to_vec();
    debug_assert!(conditionals
        .iter()
        .all(|c| c.parents() == parents.as_slice()));

    let mut keys: Vec<Key> = frontals.to_vec();
    keys.extend(&parents);
    keys.extend(mode_keys.iter().map(|dk| dk.key));
    let conditional = HybridConditional::Mixture(GaussianMixtureConditional {
        discrete_keys: mode_keys.clone(),
        branches: conditionals,
        keys,
        nr_frontals: frontals.len(),
    });

    // When no continuous separator remains, the per-branch constants
    // collapse into a plain table over the modes.
    let separator = if separators[0].keys().is_empty() {
        let table: Vec<f64> = separators
            .iter()
            .zip(&log_weights)
            .map(|(s, &w)| (w - 0.5 * s.rhs().norm_squared()).exp())
            .collect();
        HybridFactor::Discrete(DiscreteFactor::new(mode_keys, table))
    } else {
        HybridFactor::Mixture(GaussianMixtureFactor::with_log_weights(
            mode_keys, separators, log_weights,
        ))
    };

    Ok((conditional, separator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::VariableIndex;
    use crate::inference::eliminate_sequential;
    use crate::ordering::Ordering;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};

    /// Mixture prior on x0: mode 0 selects N(0, 1), mode 1 selects N(5, 1)
    fn switching_graph() -> HybridFactorGraph {
        let mode = DiscreteKey::new(100, 2);
        let mut graph = HybridFactorGraph::new();
        graph.add(HybridFactor::Mixture(GaussianMixtureFactor::new(
            vec![mode],
            vec![
                GaussianFactor::unary(0, dmatrix![1.0], dvector![0.0]),
                GaussianFactor::unary(0, dmatrix![1.0], dvector![5.0]),
            ],
        )));
        graph.add(HybridFactor::Gaussian(GaussianFactor::unary(
            0,
            dmatrix![1.0],
            dvector![4.5],
        )));
        graph.add(HybridFactor::Discrete(DiscreteFactor::new(
            vec![mode],
            vec![0.5, 0.5],
        )));
        graph
    }

    #[test]
    fn test_continuous_elimination_case_splits() {
        let graph = switching_graph();
        let (conditional, separator) = eliminate_hybrid(&graph, &[0]).unwrap();

        let HybridConditional::Mixture(mixture) = conditional else {
            panic!("expected a mixture conditional");
        };
        assert_eq!(mixture.branches().len(), 2);

        // All continuous variables are gone, so the separator is a table
        // over the mode.
        assert!(matches!(separator, HybridFactor::Discrete(_)));
    }

    #[test]
    fn test_measurement_reweights_modes() {
        // The measurement at 4.5 sits 4.5σ from mode 0's prior mean and
        // 0.5σ from mode 1's; the exact posterior odds are exp(5).
        let graph = switching_graph();
        let (_, separator) = eliminate_hybrid(&graph, &[0]).unwrap();
        let HybridFactor::Discrete(table) = separator else {
            panic!("expected a discrete separator");
        };

        let mode_0: DiscreteValues = [(100u64, 0usize)].into_iter().collect();
        let mode_1: DiscreteValues = [(100u64, 1usize)].into_iter().collect();
        let p0 = table.value(&mode_0);
        let p1 = table.value(&mode_1);
        assert_relative_eq!((p1 / p0).ln(), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sequential_hybrid_net_optimizes_to_dominant_mode() {
        let graph = switching_graph();
        let index = VariableIndex::from_graph(&graph);
        let ordering = Ordering::custom(vec![0, 100], &index).unwrap();
        let net = eliminate_sequential(&graph, &ordering, eliminate_hybrid).unwrap();
        assert_eq!(net.len(), 2);

        let solution = net.optimize().unwrap();
        assert_eq!(solution.discrete[&100], 1);
        // Posterior mean under mode 1: halfway between prior 5 and
        // measurement 4.5.
        assert_relative_eq!(
            solution.continuous.get(0).unwrap()[0],
            4.75,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_net_log_probability_matches_direct_evaluation() {
        // Up to one global normalization constant, the product of
        // conditionals must reproduce exp(−total error) of the graph.
        let graph = switching_graph();
        let index = VariableIndex::from_graph(&graph);
        let ordering = Ordering::custom(vec![0, 100], &index).unwrap();
        let net = eliminate_sequential(&graph, &ordering, eliminate_hybrid).unwrap();

        let mut a = HybridValues::default();
        a.continuous.insert(0, dvector![4.0]);
        a.discrete.insert(100, 1);
        let mut b = HybridValues::default();
        b.continuous.insert(0, dvector![1.0]);
        b.discrete.insert(100, 0);

        let total_error = |v: &HybridValues| -> f64 {
            graph.iter().map(|(_, f)| f.error(v)).sum()
        };
        let lhs = net.log_probability(&a) - net.log_probability(&b);
        let rhs = -total_error(&a) + total_error(&b);
        assert_relative_eq!(lhs, rhs, epsilon = 1e-9);
    }

    #[test]
    fn test_discrete_before_continuous_is_rejected() {
        let graph = switching_graph();
        let err = eliminate_hybrid(&graph, &[100]).unwrap_err();
        assert_eq!(err, EliminationError::HybridOrdering { key: 100 });
    }

    #[test]
    fn test_mixed_frontals_rejected() {
        let graph = switching_graph();
        let err = eliminate_hybrid(&graph, &[0, 100]).unwrap_err();
        assert_eq!(err, EliminationError::MixedFrontals);
    }
}
