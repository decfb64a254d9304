//! Document similarity graph.
//!
//! Nodes are documents; an undirected edge joins two documents whose cosine
//! similarity exceeds a configured threshold, weighted by that similarity.
//! The graph is stored as two maps (node id → payload, node id → neighbor
//! weights) so there are no back-references to manage.
//!
//! All access goes through one [`RwLock`]: insertions are serialized and
//! readers never observe a node whose edges are half-built.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::debug;

use kbchat_shared::{GraphConfig, KbChatError, Metadata, Result, cosine_similarity};

/// A node returned by [`SimilarityGraph::expand`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// An adjacent node returned by [`SimilarityGraph::neighbors_of`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: String,
    pub text: String,
    /// Cosine similarity between the two endpoints.
    pub weight: f64,
    pub metadata: Metadata,
}

struct Node {
    /// Insertion sequence number, used for deterministic ordering.
    seq: u64,
    text: String,
    embedding: Vec<f32>,
    metadata: Metadata,
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<String, Node>,
    adjacency: HashMap<String, HashMap<String, f64>>,
    next_seq: u64,
    /// Fixed by the first inserted embedding; reset when the graph empties.
    dimensions: Option<usize>,
}

impl GraphState {
    fn check_dimensions(&self, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(KbChatError::validation("embedding must not be empty"));
        }
        match self.dimensions {
            Some(expected) if expected != embedding.len() => {
                Err(KbChatError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Connect `id` to every other node above `threshold`. Returns edges created.
    fn link(&mut self, id: &str, embedding: &[f32], threshold: f64) -> usize {
        let edges: Vec<(String, f64)> = self
            .nodes
            .iter()
            .filter(|(other, _)| other.as_str() != id)
            .filter_map(|(other, node)| {
                let weight = cosine_similarity(embedding, &node.embedding);
                (weight > threshold).then(|| (other.clone(), weight))
            })
            .collect();

        for (other, weight) in &edges {
            self.adjacency
                .entry(id.to_string())
                .or_default()
                .insert(other.clone(), *weight);
            self.adjacency
                .entry(other.clone())
                .or_default()
                .insert(id.to_string(), *weight);
        }
        edges.len()
    }

    /// Drop every edge incident to `id`.
    fn detach(&mut self, id: &str) {
        if let Some(neighbors) = self.adjacency.remove(id) {
            for other in neighbors.keys() {
                if let Some(back) = self.adjacency.get_mut(other) {
                    back.remove(id);
                }
            }
        }
    }

    fn seq_of(&self, id: &str) -> u64 {
        self.nodes.get(id).map_or(u64::MAX, |n| n.seq)
    }
}

/// Undirected, weighted similarity graph over documents.
pub struct SimilarityGraph {
    threshold: f64,
    state: RwLock<GraphState>,
}

impl SimilarityGraph {
    /// Create an empty graph with the given edge threshold.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            state: RwLock::new(GraphState::default()),
        }
    }

    /// Create an empty graph from the `[graph]` config section.
    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(config.similarity_threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Embedding length every node must share, once the first node is in.
    pub fn dimensions(&self) -> Option<usize> {
        self.read().dimensions
    }

    /// Whether `embedding` would be accepted by
    /// [`add_document`](Self::add_document) right now.
    pub fn check_embedding(&self, embedding: &[f32]) -> Result<()> {
        self.read().check_dimensions(embedding)
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new document and connect it to every similar existing node.
    ///
    /// Fails with [`KbChatError::DuplicateDocument`] if `id` is already
    /// present; use [`update_document`](Self::update_document) to replace a
    /// node. Returns the number of edges created.
    ///
    /// Scalability: each insertion compares the new embedding against every
    /// node, so building a graph of `n` documents costs O(n²) comparisons.
    /// Large corpora need batching or index-assisted candidate pruning.
    pub fn add_document(
        &self,
        id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<usize> {
        let id = id.into();
        let mut state = self.write();

        if state.nodes.contains_key(&id) {
            return Err(KbChatError::DuplicateDocument { id });
        }
        state.check_dimensions(&embedding)?;

        let edges = state.link(&id, &embedding, self.threshold);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.dimensions = Some(embedding.len());
        state.nodes.insert(
            id.clone(),
            Node {
                seq,
                text: text.into(),
                embedding,
                metadata,
            },
        );

        debug!(%id, edges, nodes = state.nodes.len(), "added document to similarity graph");
        Ok(edges)
    }

    /// Replace an existing node's payload and recompute its edges.
    ///
    /// The node keeps its original insertion position. Returns the number of
    /// edges after recomputation.
    pub fn update_document(
        &self,
        id: &str,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<usize> {
        let mut state = self.write();

        let seq = match state.nodes.get(id) {
            Some(node) => node.seq,
            None => return Err(KbChatError::not_found(id)),
        };
        if state.nodes.len() > 1 {
            state.check_dimensions(&embedding)?;
        } else if embedding.is_empty() {
            return Err(KbChatError::validation("embedding must not be empty"));
        }

        state.detach(id);
        let edges = state.link(id, &embedding, self.threshold);
        state.dimensions = Some(embedding.len());
        state.nodes.insert(
            id.to_string(),
            Node {
                seq,
                text: text.into(),
                embedding,
                metadata,
            },
        );

        debug!(%id, edges, "updated document in similarity graph");
        Ok(edges)
    }

    /// Remove a node and every edge touching it.
    pub fn remove_document(&self, id: &str) -> Result<()> {
        let mut state = self.write();
        if state.nodes.remove(id).is_none() {
            return Err(KbChatError::not_found(id));
        }
        state.detach(id);
        if state.nodes.is_empty() {
            state.dimensions = None;
        }
        debug!(%id, "removed document from similarity graph");
        Ok(())
    }

    /// Breadth-first expansion from `seed_ids` up to `depth` hops.
    ///
    /// Seeds absent from the graph are skipped. `depth == 0` returns exactly
    /// the present seeds. The result is a set, returned in node insertion
    /// order so repeated calls on the same graph state are identical.
    pub fn expand<S: AsRef<str>>(&self, seed_ids: &[S], depth: usize) -> Vec<GraphNode> {
        let state = self.read();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();

        for seed in seed_ids {
            if let Some((id, _)) = state.nodes.get_key_value(seed.as_ref()) {
                if visited.insert(id.as_str()) {
                    queue.push_back((id.as_str(), 0));
                }
            }
        }

        while let Some((id, hop)) = queue.pop_front() {
            if hop >= depth {
                continue;
            }
            for neighbor in state.adjacency.get(id).into_iter().flat_map(|m| m.keys()) {
                if visited.insert(neighbor.as_str()) {
                    queue.push_back((neighbor.as_str(), hop + 1));
                }
            }
        }

        let mut ids: Vec<&str> = visited.into_iter().collect();
        ids.sort_by_key(|id| state.seq_of(id));

        ids.into_iter()
            .filter_map(|id| {
                state.nodes.get(id).map(|node| GraphNode {
                    id: id.to_string(),
                    text: node.text.clone(),
                    metadata: node.metadata.clone(),
                })
            })
            .collect()
    }

    /// Adjacent nodes sorted by descending weight, ties by insertion order.
    ///
    /// Fails with [`KbChatError::NotFound`] when `id` is absent, so callers can
    /// tell "unknown" apart from "known, no neighbors".
    pub fn neighbors_of(&self, id: &str) -> Result<Vec<Neighbor>> {
        let state = self.read();
        if !state.nodes.contains_key(id) {
            return Err(KbChatError::not_found(id));
        }

        let mut adjacent: Vec<(&String, f64, u64)> = state
            .adjacency
            .get(id)
            .into_iter()
            .flat_map(|m| m.iter())
            .map(|(other, weight)| (other, *weight, state.seq_of(other)))
            .collect();
        adjacent.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)));

        Ok(adjacent
            .into_iter()
            .filter_map(|(other, weight, _)| {
                state.nodes.get(other).map(|node| Neighbor {
                    id: other.clone(),
                    text: node.text.clone(),
                    weight,
                    metadata: node.metadata.clone(),
                })
            })
            .collect())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().nodes.contains_key(id)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().nodes.is_empty()
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.read().adjacency.values().map(HashMap::len).sum::<usize>() / 2
    }

    /// Weight of the edge between `a` and `b`, if one exists.
    pub fn edge_weight(&self, a: &str, b: &str) -> Option<f64> {
        self.read().adjacency.get(a).and_then(|m| m.get(b)).copied()
    }
}

impl std::fmt::Debug for SimilarityGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("SimilarityGraph")
            .field("threshold", &self.threshold)
            .field("nodes", &state.nodes.len())
            .finish()
    }
}
