//! Deterministic local embedding provider.

use std::collections::HashMap;

use async_trait::async_trait;
use kbchat_shared::{EmbeddingConfig, EmbeddingProvider, Result, l2_normalize};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Feature-hashing embedder.
///
/// Lowercased alphanumeric tokens of two or more characters are hashed with
/// FNV-1a into `dimensions` buckets. Each bucket accumulates the token's
/// relative frequency scaled by `1 + ln(len)`, so longer (rarer) words weigh
/// more than short function words. The result is L2-normalized; empty input
/// yields the zero vector.
///
/// Needs no model download and is fully deterministic, at the cost of only
/// capturing lexical overlap.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(config.dimensions)
    }

    fn bucket(&self, token: &str) -> usize {
        let hash = token
            .bytes()
            .fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME));
        (hash % self.dimensions as u64) as usize
    }

    /// Synchronous core of [`EmbeddingProvider::encode`].
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut counts: HashMap<&str, u32> = HashMap::new();
        let mut total = 0u32;
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() >= 2)
        {
            *counts.entry(token).or_default() += 1;
            total += 1;
        }

        let mut vector = vec![0.0f32; self.dimensions];
        if total == 0 {
            return vector;
        }

        for (token, count) in counts {
            let tf = count as f32 / total as f32;
            let weight = 1.0 + (token.chars().count() as f32).ln();
            vector[self.bucket(token)] += tf * weight;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbchat_shared::cosine_similarity;

    #[test]
    fn empty_and_punctuation_only_text_is_zero() {
        let embedder = HashingEmbedder::new(64);
        for text in ["", "  ", "a ! ? -"] {
            let v = embedder.embed(text);
            assert_eq!(v.len(), 64);
            assert!(v.iter().all(|x| *x == 0.0), "{text:?}");
        }
    }

    #[test]
    fn output_is_unit_length_and_deterministic() {
        let embedder = HashingEmbedder::new(384);
        let a = embedder.embed("Retrieval augmented generation grounds answers");
        let b = embedder.embed("Retrieval augmented generation grounds answers");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn case_is_ignored() {
        let embedder = HashingEmbedder::new(128);
        assert_eq!(embedder.embed("Vector DATABASE"), embedder.embed("vector database"));
    }

    #[test]
    fn lexical_overlap_raises_similarity() {
        let embedder = HashingEmbedder::new(384);
        let query = embedder.embed("how do vector databases index embeddings");
        let related = embedder.embed("vector databases store embeddings in an index");
        let unrelated = embedder.embed("telemedicine expands rural healthcare access");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn encode_matches_embed() {
        let embedder = HashingEmbedder::new(32);
        let encoded = embedder.encode("quantum computing").await.unwrap();
        assert_eq!(encoded, embedder.embed("quantum computing"));
        assert_eq!(embedder.dimensions(), 32);
    }
}
