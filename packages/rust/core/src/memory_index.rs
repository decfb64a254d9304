//! In-process nearest-neighbor index.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use kbchat_shared::{
    Document, NearestNeighborIndex, Result, RetrievalCandidate, cosine_similarity,
};

/// Brute-force cosine index held in memory.
///
/// Suited to tests and small corpora; the libSQL store is the persistent
/// counterpart.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    documents: RwLock<Vec<Document>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NearestNeighborIndex for InMemoryIndex {
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<RetrievalCandidate>> {
        let docs = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<RetrievalCandidate> = docs
            .iter()
            .map(|doc| RetrievalCandidate {
                document_id: doc.id.clone(),
                score: cosine_similarity(vector, &doc.embedding),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn upsert(&self, documents: &[Document]) -> Result<()> {
        let mut docs = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        for doc in documents {
            match docs.iter_mut().find(|d| d.id == doc.id) {
                Some(existing) => *existing = doc.clone(),
                None => docs.push(doc.clone()),
            }
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut docs = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let before = docs.len();
        docs.retain(|d| !ids.contains(&d.id));
        Ok(before - docs.len())
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        Ok(self
            .documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbchat_shared::Metadata;

    fn doc(id: &str, embedding: Vec<f32>) -> Document {
        Document {
            id: id.into(),
            text: id.to_uppercase(),
            embedding,
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let index = InMemoryIndex::new();
        assert!(index.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_is_ranked_and_limited() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                doc("orthogonal", vec![0.0, 1.0]),
                doc("close", vec![0.9, 0.1]),
                doc("exact", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document_id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close"]);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_id() {
        let index = InMemoryIndex::new();
        index.upsert(&[doc("a", vec![1.0]), doc("b", vec![1.0])]).await.unwrap();
        index.upsert(&[doc("a", vec![0.5])]).await.unwrap();

        let docs = index.documents().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "a");
        assert_eq!(docs[0].embedding, vec![0.5]);
    }

    #[tokio::test]
    async fn delete_counts_present_ids() {
        let index = InMemoryIndex::new();
        index.upsert(&[doc("a", vec![1.0]), doc("b", vec![1.0])]).await.unwrap();
        let removed = index.delete(&["b".into(), "zzz".into()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 1);
    }
}
