//! Seams to the external collaborators the retrieval pipeline consumes.
//!
//! Each trait is object-safe so components can hold `Arc<dyn ...>` and tests
//! can inject fixtures.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatMessage, Completion, Document, GenerationConstraints, RetrievalCandidate};

/// Turns text into a fixed-length vector.
///
/// Implementations must be deterministic for identical input and model
/// version.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// The dimensionality of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Human-readable provider name.
    fn name(&self) -> &str;
}

/// Top-K similarity search over stored documents.
#[async_trait]
pub trait NearestNeighborIndex: Send + Sync {
    /// Up to `limit` documents ordered by descending score.
    /// An empty index yields an empty list, never an error.
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalCandidate>>;

    /// Insert or replace documents; idempotent per id.
    async fn upsert(&self, documents: &[Document]) -> Result<()>;

    /// Remove documents by id. Returns how many were present.
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Every stored document, in insertion order.
    async fn documents(&self) -> Result<Vec<Document>>;
}

/// Text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete a role-tagged conversation.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        constraints: &GenerationConstraints,
    ) -> Result<Completion>;
}
