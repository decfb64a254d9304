//! Property tests for the similarity graph's structural guarantees.

use std::collections::HashSet;

use kbchat_graph::SimilarityGraph;
use kbchat_shared::{Metadata, cosine_similarity};
use proptest::prelude::*;

const DIMS: usize = 4;

fn embeddings() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-1.0f32..1.0, DIMS), 1..24)
}

fn build(vectors: &[Vec<f32>], threshold: f64) -> SimilarityGraph {
    let graph = SimilarityGraph::new(threshold);
    for (i, v) in vectors.iter().enumerate() {
        graph
            .add_document(format!("doc-{i}"), format!("text {i}"), v.clone(), Metadata::new())
            .unwrap();
    }
    graph
}

proptest! {
    #[test]
    fn edges_match_threshold(vectors in embeddings(), threshold in -0.5f64..0.95) {
        let graph = build(&vectors, threshold);
        for i in 0..vectors.len() {
            for j in (i + 1)..vectors.len() {
                let sim = cosine_similarity(&vectors[i], &vectors[j]);
                let weight = graph.edge_weight(&format!("doc-{i}"), &format!("doc-{j}"));
                if sim > threshold {
                    let w = weight.expect("edge above threshold");
                    prop_assert!((w - sim).abs() < 1e-6);
                } else {
                    prop_assert!(weight.is_none());
                }
            }
        }
    }

    #[test]
    fn depth_zero_returns_present_seeds(vectors in embeddings(), extra in 0usize..5) {
        let graph = build(&vectors, 0.7);
        let mut seeds: Vec<String> = (0..vectors.len()).step_by(2).map(|i| format!("doc-{i}")).collect();
        seeds.extend((0..extra).map(|i| format!("absent-{i}")));

        let result: HashSet<String> = graph.expand(&seeds, 0).into_iter().map(|n| n.id).collect();
        let expected: HashSet<String> = seeds.into_iter().filter(|s| s.starts_with("doc-")).collect();
        prop_assert_eq!(result, expected);
    }

    #[test]
    fn expansion_is_idempotent_and_monotonic(vectors in embeddings(), depth in 0usize..4) {
        let graph = build(&vectors, 0.3);
        let seeds = vec!["doc-0".to_string()];

        let once = graph.expand(&seeds, depth);
        let twice = graph.expand(&seeds, depth);
        prop_assert_eq!(&once, &twice);

        let deeper: HashSet<String> = graph.expand(&seeds, depth + 1).into_iter().map(|n| n.id).collect();
        for node in &once {
            prop_assert!(deeper.contains(&node.id));
        }
    }

    #[test]
    fn neighbors_sorted_by_descending_weight(vectors in embeddings()) {
        let graph = build(&vectors, 0.0);
        for i in 0..vectors.len() {
            let neighbors = graph.neighbors_of(&format!("doc-{i}")).unwrap();
            for pair in neighbors.windows(2) {
                prop_assert!(pair[0].weight >= pair[1].weight);
            }
        }
    }
}
