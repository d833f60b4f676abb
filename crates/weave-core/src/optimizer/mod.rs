//! Equilibrium Optimizer
//!
//! Ranks nodes by iterating an importance vector to a fixed point. Each step
//! mixes a content-weighted utility prior with importance flowing along
//! weighted edges, penalizes content that repeats its neighbours, and blends
//! the result with the previous iterate.
//!
//! ```text
//! target_i = (1 - d) * u_i + d * Σ_j w_ij * x_j / s_j + d * dangling / N
//! target_i -= redundancy_penalty * redundancy_i * target_i
//! x_i'     = (1 - learning_rate) * target_i + learning_rate * x_i
//! x'       = x' / Σ x'
//! ```
//!
//! Edges are treated as undirected. Per-node work in an iteration runs on
//! rayon; renormalization and the convergence test are barriers between
//! iterations. The optimizer performs no I/O and holds no shared state.

mod config;
mod scoring;

pub use config::OptimizerConfig;
pub use scoring::{jaccard, tokenize, LexicalScoring, ScoringStrategy};

use crate::error::OptimizerError;
use crate::graph::{GraphEdge, KnowledgeNode};
use crate::manager::GraphManager;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

// ============================================================================
// Result Types
// ============================================================================

/// Per-node working data of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeParticipation {
    /// Final importance, all nodes summing to 1
    pub importance: f64,
    /// Distinct neighbours relative to the best-connected node
    pub connectivity: f64,
    pub content_value: f64,
    /// Mean content similarity with neighbours
    pub redundancy: f64,
    /// Query relevance; 0 when no query was given
    pub relevance: f64,
}

/// A node id with its importance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeScore {
    pub id: String,
    pub importance: f64,
}

/// Everything a run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub participation: BTreeMap<String, NodeParticipation>,
    /// Nodes at or above `min_importance`, most important first, ties by id
    pub ranked: Vec<NodeScore>,
    /// Nodes below `min_importance`, least important first, ties by id
    pub prune_candidates: Vec<NodeScore>,
    pub iterations: usize,
    pub converged: bool,
    /// L1 change of the last iteration
    pub final_delta: f64,
    /// Edges dropped for unknown endpoints, self loops or invalid weights
    pub ignored_edges: usize,
}

impl OptimizationResult {
    /// id -> importance for every node
    pub fn importance_map(&self) -> BTreeMap<String, f64> {
        self.participation
            .iter()
            .map(|(id, p)| (id.clone(), p.importance))
            .collect()
    }

    pub fn importance_of(&self, id: &str) -> Option<f64> {
        self.participation.get(id).map(|p| p.importance)
    }

    /// Turn a run that hit `max_iterations` into an error
    pub fn ensure_converged(self) -> Result<Self, OptimizerError> {
        if self.converged {
            Ok(self)
        } else {
            Err(OptimizerError::NonConvergence {
                iterations: self.iterations,
                delta: self.final_delta,
            })
        }
    }
}

/// Nodes grouped around a representative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCluster {
    /// Most important member
    pub representative: String,
    /// All members including the representative, by importance then id
    pub members: Vec<String>,
}

/// Estimated effect on one node of removing another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeImpact {
    pub id: String,
    pub before: f64,
    pub after: f64,
    pub delta: f64,
}

/// Estimated effect of removing a node, limited to its two-hop neighbourhood
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemovalImpact {
    pub node_id: String,
    /// Importance the node held before removal; 0 for unknown ids
    pub removed_importance: f64,
    /// Largest change first, ties by id
    pub affected: Vec<NodeImpact>,
    /// Neighbours left without any edge
    pub newly_isolated: Vec<String>,
}

// ============================================================================
// Problem Setup
// ============================================================================

/// A neighbour in the undirected adjacency
#[derive(Debug, Clone, Copy)]
struct Neighbor {
    index: usize,
    weight: f64,
    similarity: f64,
}

/// Nodes, adjacency and per-node scores for one run
struct Problem<'a> {
    nodes: Vec<&'a KnowledgeNode>,
    adjacency: Vec<Vec<Neighbor>>,
    /// Σ of incident weights per node
    strength: Vec<f64>,
    connectivity: Vec<f64>,
    content_value: Vec<f64>,
    /// Scoring features per node, for pairwise similarity
    features: Vec<HashSet<String>>,
    redundancy: Vec<f64>,
    relevance: Vec<f64>,
    /// Normalized utility prior
    utility: Vec<f64>,
    ignored_edges: usize,
}

impl<'a> Problem<'a> {
    fn build(
        mut nodes: Vec<&'a KnowledgeNode>,
        edges: &[GraphEdge],
        query: Option<&str>,
        config: &OptimizerConfig,
        scoring: &dyn ScoringStrategy,
    ) -> Self {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes.dedup_by(|a, b| a.id == b.id);
        let n = nodes.len();

        let position: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.as_str(), i))
            .collect();

        // Parallel and opposite edges between a pair merge into one weight
        let mut merged: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut ignored_edges = 0;
        for edge in edges {
            let (Some(&s), Some(&t)) = (
                position.get(edge.source.as_str()),
                position.get(edge.target.as_str()),
            ) else {
                ignored_edges += 1;
                continue;
            };
            if s == t || !edge.has_valid_weight() {
                ignored_edges += 1;
                continue;
            }
            if edge.weight > 0.0 {
                *merged.entry((s.min(t), s.max(t))).or_insert(0.0) += edge.weight;
            }
        }
        if ignored_edges > 0 {
            warn!("Optimizer ignored {} unusable edges", ignored_edges);
        }

        let features: Vec<HashSet<String>> =
            nodes.par_iter().map(|node| scoring.features(node)).collect();

        let mut adjacency: Vec<Vec<Neighbor>> = vec![Vec::new(); n];
        for (&(a, b), &weight) in &merged {
            let similarity = scoring
                .feature_similarity(&features[a], &features[b])
                .clamp(0.0, 1.0);
            adjacency[a].push(Neighbor { index: b, weight, similarity });
            adjacency[b].push(Neighbor { index: a, weight, similarity });
        }

        let strength: Vec<f64> = adjacency
            .iter()
            .map(|list| list.iter().map(|nb| nb.weight).sum())
            .collect();

        let max_degree = adjacency.iter().map(Vec::len).max().unwrap_or(0);
        let connectivity: Vec<f64> = adjacency
            .iter()
            .map(|list| {
                if max_degree == 0 {
                    0.0
                } else {
                    list.len() as f64 / max_degree as f64
                }
            })
            .collect();

        let content_value: Vec<f64> = nodes
            .par_iter()
            .map(|node| scoring.content_value(node).clamp(0.0, 1.0))
            .collect();

        let relevance: Vec<f64> = match query {
            Some(q) => nodes
                .par_iter()
                .map(|node| scoring.relevance(node, q).clamp(0.0, 1.0))
                .collect(),
            None => vec![0.0; n],
        };

        let redundancy: Vec<f64> = adjacency
            .iter()
            .map(|list| mean(list.iter().map(|nb| nb.similarity)))
            .collect();

        let utility = if merged.is_empty() {
            vec![1.0; n]
        } else {
            (0..n)
                .map(|i| {
                    config.connectivity_weight * connectivity[i]
                        + config.content_weight * content_value[i]
                })
                .collect()
        };
        let mut utility = normalized(utility);
        if query.is_some() && relevance.iter().sum::<f64>() > 0.0 {
            let relevance_prior = normalized(relevance.clone());
            utility = utility
                .iter()
                .zip(&relevance_prior)
                .map(|(u, r)| 0.5 * u + 0.5 * r)
                .collect();
        }

        Self {
            nodes,
            adjacency,
            strength,
            connectivity,
            content_value,
            features,
            redundancy,
            relevance,
            utility,
            ignored_edges,
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Importance arriving at `i` along its edges
    fn inflow(&self, i: usize, importance: &[f64]) -> f64 {
        self.adjacency[i]
            .iter()
            .filter(|nb| self.strength[nb.index] > 0.0)
            .map(|nb| nb.weight * importance[nb.index] / self.strength[nb.index])
            .sum()
    }

    /// Mass held by nodes with no usable edges
    fn dangling_mass(&self, importance: &[f64]) -> f64 {
        importance
            .iter()
            .zip(&self.strength)
            .filter(|(_, &s)| s <= 0.0)
            .map(|(x, _)| x)
            .sum()
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Scale to sum 1; uniform when the sum is not positive
fn normalized(mut values: Vec<f64>) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 && total.is_finite() {
        values.iter_mut().for_each(|v| *v /= total);
    } else if !values.is_empty() {
        let uniform = 1.0 / values.len() as f64;
        values.iter_mut().for_each(|v| *v = uniform);
    }
    values
}

pub(crate) fn by_importance_desc(a: &NodeScore, b: &NodeScore) -> std::cmp::Ordering {
    b.importance
        .total_cmp(&a.importance)
        .then_with(|| a.id.cmp(&b.id))
}

// ============================================================================
// Optimizer
// ============================================================================

/// Iterative importance ranking over a knowledge graph.
pub struct EquilibriumOptimizer {
    config: OptimizerConfig,
    scoring: Box<dyn ScoringStrategy>,
}

impl std::fmt::Debug for EquilibriumOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquilibriumOptimizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EquilibriumOptimizer {
    /// Create an optimizer with [`LexicalScoring`]
    pub fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        Self::with_scoring(config, LexicalScoring::new())
    }

    /// Create an optimizer with a custom scoring strategy
    pub fn with_scoring(
        config: OptimizerConfig,
        scoring: impl ScoringStrategy + 'static,
    ) -> Result<Self, OptimizerError> {
        config.validate()?;
        Ok(Self {
            config,
            scoring: Box::new(scoring),
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// id -> importance for every node
    pub fn optimize_graph(
        &self,
        nodes: &[KnowledgeNode],
        edges: &[GraphEdge],
    ) -> BTreeMap<String, f64> {
        self.optimize_with_details(nodes, edges, None).importance_map()
    }

    /// Full run, optionally biased toward a query
    pub fn optimize_with_details(
        &self,
        nodes: &[KnowledgeNode],
        edges: &[GraphEdge],
        query: Option<&str>,
    ) -> OptimizationResult {
        self.run(nodes.iter().collect(), edges, query)
    }

    /// Run over everything a manager holds
    pub fn optimize_manager(
        &self,
        manager: &GraphManager,
        query: Option<&str>,
    ) -> OptimizationResult {
        let edges = manager.edges();
        self.run(manager.nodes(), &edges, query)
    }

    /// Nodes below `min_importance`, least important first
    pub fn identify_prune_candidates(
        &self,
        nodes: &[KnowledgeNode],
        edges: &[GraphEdge],
    ) -> Vec<NodeScore> {
        self.optimize_with_details(nodes, edges, None).prune_candidates
    }

    /// The `limit` most important nodes, ties by id
    pub fn get_top_nodes(
        &self,
        nodes: &[KnowledgeNode],
        edges: &[GraphEdge],
        limit: usize,
    ) -> Vec<NodeScore> {
        let result = self.optimize_with_details(nodes, edges, None);
        let mut all: Vec<NodeScore> = result
            .ranked
            .into_iter()
            .chain(result.prune_candidates)
            .collect();
        all.sort_by(by_importance_desc);
        all.truncate(limit);
        all
    }

    fn run(
        &self,
        nodes: Vec<&KnowledgeNode>,
        edges: &[GraphEdge],
        query: Option<&str>,
    ) -> OptimizationResult {
        let problem = self.problem(nodes, edges, query);
        let n = problem.len();
        if n == 0 {
            return OptimizationResult {
                converged: true,
                ignored_edges: problem.ignored_edges,
                ..Default::default()
            };
        }

        let (importance, iterations, converged, final_delta) = self.iterate(&problem);
        if !converged {
            warn!(
                "Optimizer did not converge after {} iterations (last change {:.6})",
                iterations, final_delta
            );
        } else {
            debug!("Optimizer converged after {} iterations", iterations);
        }

        let mut participation = BTreeMap::new();
        let mut ranked = Vec::new();
        let mut prune_candidates = Vec::new();
        for (i, node) in problem.nodes.iter().enumerate() {
            participation.insert(
                node.id.clone(),
                NodeParticipation {
                    importance: importance[i],
                    connectivity: problem.connectivity[i],
                    content_value: problem.content_value[i],
                    redundancy: problem.redundancy[i],
                    relevance: problem.relevance[i],
                },
            );
            let score = NodeScore {
                id: node.id.clone(),
                importance: importance[i],
            };
            if importance[i] < self.config.min_importance {
                prune_candidates.push(score);
            } else {
                ranked.push(score);
            }
        }
        ranked.sort_by(by_importance_desc);
        prune_candidates.sort_by(|a, b| {
            a.importance
                .total_cmp(&b.importance)
                .then_with(|| a.id.cmp(&b.id))
        });

        OptimizationResult {
            participation,
            ranked,
            prune_candidates,
            iterations,
            converged,
            final_delta,
            ignored_edges: problem.ignored_edges,
        }
    }

    fn problem<'a>(
        &self,
        nodes: Vec<&'a KnowledgeNode>,
        edges: &[GraphEdge],
        query: Option<&str>,
    ) -> Problem<'a> {
        Problem::build(nodes, edges, query, &self.config, self.scoring.as_ref())
    }

    /// Returns `(importance, iterations, converged, final_delta)`
    fn iterate(&self, problem: &Problem<'_>) -> (Vec<f64>, usize, bool, f64) {
        let n = problem.len();
        let nf = n as f64;
        let d = self.config.damping_factor;
        let keep = self.config.learning_rate;
        let penalty = self.config.redundancy_penalty;

        let mut importance = vec![1.0 / nf; n];
        let mut iterations = 0;
        let mut delta = f64::INFINITY;

        while iterations < self.config.max_iterations {
            iterations += 1;
            let dangling_share = d * problem.dangling_mass(&importance) / nf;

            let next: Vec<f64> = (0..n)
                .into_par_iter()
                .map(|i| {
                    let mut target = (1.0 - d) * problem.utility[i]
                        + d * problem.inflow(i, &importance)
                        + dangling_share;
                    target -= penalty * problem.redundancy[i] * target;
                    (1.0 - keep) * target + keep * importance[i]
                })
                .collect();
            let next = normalized(next);

            delta = next
                .iter()
                .zip(&importance)
                .map(|(a, b)| (a - b).abs())
                .sum();
            importance = next;

            if delta < self.config.convergence_threshold {
                return (importance, iterations, true, delta);
            }
        }

        (importance, iterations, false, delta)
    }

    // ------------------------------------------------------------------------
    // Clustering
    // ------------------------------------------------------------------------

    /// Group nodes whose combined similarity to a representative reaches
    /// `threshold`.
    ///
    /// Greedy: the most important unassigned node opens a cluster and claims
    /// every unassigned node similar enough to it. Similarity is the mean of
    /// content similarity and neighbour-set Jaccard overlap. Only clusters with
    /// at least two members are returned.
    pub fn find_node_clusters(
        &self,
        nodes: &[KnowledgeNode],
        edges: &[GraphEdge],
        threshold: f64,
    ) -> Vec<NodeCluster> {
        let problem = self.problem(nodes.iter().collect(), edges, None);
        if problem.len() == 0 {
            return Vec::new();
        }
        let (importance, _, _, _) = self.iterate(&problem);

        let neighbor_sets: Vec<HashSet<usize>> = problem
            .adjacency
            .iter()
            .map(|list| list.iter().map(|nb| nb.index).collect())
            .collect();

        let mut order: Vec<usize> = (0..problem.len()).collect();
        order.sort_by(|&a, &b| {
            importance[b]
                .total_cmp(&importance[a])
                .then_with(|| problem.nodes[a].id.cmp(&problem.nodes[b].id))
        });

        let mut assigned = vec![false; problem.len()];
        let mut clusters = Vec::new();
        for (pos, &rep) in order.iter().enumerate() {
            if assigned[rep] {
                continue;
            }
            assigned[rep] = true;
            let mut members = vec![problem.nodes[rep].id.clone()];

            for &other in &order[pos + 1..] {
                if assigned[other] {
                    continue;
                }
                let content = self
                    .scoring
                    .feature_similarity(&problem.features[rep], &problem.features[other])
                    .clamp(0.0, 1.0);
                let structural = jaccard(&neighbor_sets[rep], &neighbor_sets[other]);
                if 0.5 * (content + structural) >= threshold {
                    assigned[other] = true;
                    members.push(problem.nodes[other].id.clone());
                }
            }

            if members.len() > 1 {
                clusters.push(NodeCluster {
                    representative: problem.nodes[rep].id.clone(),
                    members,
                });
            }
        }
        clusters
    }

    // ------------------------------------------------------------------------
    // Removal Impact
    // ------------------------------------------------------------------------

    /// Estimate how importance shifts if `node_id` were removed.
    ///
    /// Runs the full optimization once, then propagates the removal two hops
    /// out: first-hop neighbours are re-evaluated without the removed node,
    /// second-hop neighbours against the updated first hop. Nothing outside
    /// that neighbourhood is touched. Unknown ids yield an empty impact.
    pub fn calculate_removal_impact(
        &self,
        nodes: &[KnowledgeNode],
        edges: &[GraphEdge],
        node_id: &str,
    ) -> RemovalImpact {
        let problem = self.problem(nodes.iter().collect(), edges, None);
        let Some(removed) = problem.nodes.iter().position(|n| n.id == node_id) else {
            return RemovalImpact {
                node_id: node_id.to_string(),
                ..Default::default()
            };
        };

        let (before, _, _, _) = self.iterate(&problem);
        let nf = problem.len() as f64;
        let d = self.config.damping_factor;
        let dangling_share = d * problem.dangling_mass(&before) / nf;

        let first_hop: Vec<usize> = problem.adjacency[removed]
            .iter()
            .map(|nb| nb.index)
            .collect();
        let mut second_hop: Vec<usize> = first_hop
            .iter()
            .flat_map(|&i| problem.adjacency[i].iter().map(|nb| nb.index))
            .filter(|&j| j != removed && !first_hop.contains(&j))
            .collect();
        second_hop.sort_unstable();
        second_hop.dedup();

        // Weight each node loses toward the removed one
        let lost_weight = |j: usize| -> f64 {
            problem.adjacency[j]
                .iter()
                .find(|nb| nb.index == removed)
                .map(|nb| nb.weight)
                .unwrap_or(0.0)
        };

        let target = |i: usize, importance: &[f64], without_removed: bool| -> f64 {
            let neighbors = problem.adjacency[i]
                .iter()
                .filter(|nb| !without_removed || nb.index != removed);
            let mut inflow = 0.0;
            let mut similarities = Vec::new();
            for nb in neighbors {
                let strength = if without_removed {
                    problem.strength[nb.index] - lost_weight(nb.index)
                } else {
                    problem.strength[nb.index]
                };
                if strength > 0.0 {
                    inflow += nb.weight * importance[nb.index] / strength;
                }
                similarities.push(nb.similarity);
            }
            let redundancy = mean(similarities.into_iter());
            let raw = (1.0 - d) * problem.utility[i] + d * inflow + dangling_share;
            raw * (1.0 - self.config.redundancy_penalty * redundancy)
        };

        let mut after = before.clone();
        after[removed] = 0.0;
        let rescale = |i: usize, updated: &[f64]| -> f64 {
            let baseline = target(i, &before, false);
            if baseline > 0.0 {
                before[i] * target(i, updated, true) / baseline
            } else {
                before[i]
            }
        };
        let first_values: Vec<f64> = first_hop.iter().map(|&i| rescale(i, &after)).collect();
        for (&i, value) in first_hop.iter().zip(first_values) {
            after[i] = value;
        }
        let second_values: Vec<f64> = second_hop.iter().map(|&i| rescale(i, &after)).collect();
        for (&i, value) in second_hop.iter().zip(second_values) {
            after[i] = value;
        }

        let mut affected: Vec<NodeImpact> = first_hop
            .iter()
            .chain(&second_hop)
            .map(|&i| NodeImpact {
                id: problem.nodes[i].id.clone(),
                before: before[i],
                after: after[i],
                delta: after[i] - before[i],
            })
            .collect();
        affected.sort_by(|a, b| {
            b.delta
                .abs()
                .total_cmp(&a.delta.abs())
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut newly_isolated: Vec<String> = first_hop
            .iter()
            .filter(|&&i| problem.adjacency[i].len() == 1)
            .map(|&i| problem.nodes[i].id.clone())
            .collect();
        newly_isolated.sort();

        RemovalImpact {
            node_id: node_id.to_string(),
            removed_importance: before[removed],
            affected,
            newly_isolated,
        }
    }
}
