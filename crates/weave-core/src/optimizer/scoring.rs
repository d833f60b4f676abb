//! Pluggable content scoring for the optimizer.
//!
//! The optimizer only needs three numbers about content: how valuable a node
//! is on its own, how similar two nodes are, and how relevant a node is to a
//! query. [`LexicalScoring`] derives all three from token overlap and document
//! shape; other strategies (embeddings, editorial weights) can be swapped in.

use crate::graph::KnowledgeNode;
use std::collections::HashSet;

/// Content scores consumed by the optimizer. Every score lies in `[0, 1]`.
pub trait ScoringStrategy: Send + Sync {
    /// Intrinsic value of a node's content
    fn content_value(&self, node: &KnowledgeNode) -> f64;

    /// Comparable features of a node, extracted once per node when many
    /// pairs are compared
    fn features(&self, node: &KnowledgeNode) -> HashSet<String>;

    /// Similarity of two feature sets; 1 means interchangeable
    fn feature_similarity(&self, a: &HashSet<String>, b: &HashSet<String>) -> f64 {
        jaccard(a, b)
    }

    /// Content similarity of two nodes
    fn similarity(&self, a: &KnowledgeNode, b: &KnowledgeNode) -> f64 {
        self.feature_similarity(&self.features(a), &self.features(b))
    }

    /// How well a node answers a free-text query
    fn relevance(&self, node: &KnowledgeNode, query: &str) -> f64;
}

/// Word count at which the length component saturates
const SATURATION_WORDS: f64 = 2000.0;

/// Share of content value taken by document structure
const STRUCTURE_SHARE: f64 = 0.3;

/// Token-overlap scoring.
///
/// - content value: log-scaled word count plus a bonus for headings, lists,
///   code blocks, links and tags
/// - similarity: Jaccard overlap of title and body tokens
/// - relevance: fraction of query tokens found in the node
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScoring;

impl LexicalScoring {
    pub fn new() -> Self {
        Self
    }

    fn structure_score(node: &KnowledgeNode) -> f64 {
        let lines: Vec<&str> = node.content.lines().map(str::trim_start).collect();
        let features = [
            lines.iter().any(|l| l.starts_with('#')),
            lines
                .iter()
                .any(|l| l.starts_with("- ") || l.starts_with("* ") || l.starts_with("1. ")),
            lines.iter().any(|l| l.starts_with("```")),
            !node.outgoing_links.is_empty(),
            !node.tags.is_empty(),
        ];
        let present = features.iter().filter(|&&f| f).count();
        present as f64 / features.len() as f64
    }
}

impl ScoringStrategy for LexicalScoring {
    fn content_value(&self, node: &KnowledgeNode) -> f64 {
        let words = node.content.split_whitespace().count() as f64;
        let length = ((1.0 + words).ln() / (1.0 + SATURATION_WORDS).ln()).min(1.0);
        let structure = Self::structure_score(node);
        let value = (1.0 - STRUCTURE_SHARE) * length + STRUCTURE_SHARE * structure;
        value.clamp(0.0, 1.0)
    }

    /// Title and body tokens
    fn features(&self, node: &KnowledgeNode) -> HashSet<String> {
        let mut tokens = tokenize(&node.title);
        tokens.extend(tokenize(&node.content));
        tokens
    }

    fn relevance(&self, node: &KnowledgeNode, query: &str) -> f64 {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return 0.0;
        }
        let node_tokens = self.features(node);
        let hits = query_tokens.iter().filter(|t| node_tokens.contains(*t)).count();
        hits as f64 / query_tokens.len() as f64
    }
}

/// Lowercased word tokens of at least two characters
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// `|a ∩ b| / |a ∪ b|`, 0 when both are empty
pub fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
