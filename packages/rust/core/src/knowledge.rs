//! Knowledge-base ingestion: text-file loading, built-in seed documents, and
//! keeping the index and the similarity graph in step.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kbchat_graph::SimilarityGraph;
use kbchat_shared::{
    Document, EmbeddingProvider, KbChatError, Metadata, NearestNeighborIndex, Result,
};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};

/// `source` metadata value for documents loaded from text files.
pub const KNOWLEDGE_BASE_SOURCE: &str = "knowledge_base";

/// A document before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// Result of [`KnowledgeBase::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSummary {
    /// Documents written to the index.
    pub documents: usize,
    /// Edges touching the ingested documents after insertion.
    pub edges: usize,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for ingestion.
pub trait IngestProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each document is embedded.
    fn document_embedded(&self, id: &str, current: usize, total: usize);
    /// Called once ingestion completes.
    fn done(&self, summary: &IngestSummary);
}

/// No-op progress for headless/test usage.
pub struct SilentProgress;

impl IngestProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_embedded(&self, _id: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &IngestSummary) {}
}

// ---------------------------------------------------------------------------
// KnowledgeBase
// ---------------------------------------------------------------------------

/// Write-side facade over the embedder, the index, and the graph.
pub struct KnowledgeBase {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn NearestNeighborIndex>,
    graph: Arc<SimilarityGraph>,
}

impl KnowledgeBase {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn NearestNeighborIndex>,
        graph: Arc<SimilarityGraph>,
    ) -> Self {
        Self {
            embedder,
            index,
            graph,
        }
    }

    /// Embed `sources`, upsert them into the index, then add or refresh their
    /// graph nodes. Documents whose id already exists are replaced.
    ///
    /// Every embedding is checked against the graph before the index is
    /// touched, so a rejected batch leaves both stores unchanged. If linking
    /// still fails, the batch documents the graph does not hold are deleted
    /// from the index again before the error is returned.
    #[instrument(skip_all, fields(count = sources.len()))]
    pub async fn ingest(
        &self,
        sources: Vec<SourceDocument>,
        progress: &dyn IngestProgress,
    ) -> Result<IngestSummary> {
        let start = Instant::now();
        let total = sources.len();

        progress.phase("Embedding");
        let mut documents = Vec::with_capacity(total);
        for (i, source) in sources.into_iter().enumerate() {
            if source.text.trim().is_empty() {
                return Err(KbChatError::validation(format!(
                    "document '{}' has no text",
                    source.id
                )));
            }
            let embedding = self.embedder.encode(&source.text).await?;
            progress.document_embedded(&source.id, i + 1, total);
            documents.push(Document {
                id: source.id,
                text: source.text,
                embedding,
                metadata: source.metadata,
            });
        }
        self.check_batch(&documents)?;

        progress.phase("Indexing");
        self.index.upsert(&documents).await?;

        progress.phase("Linking");
        let edges = match self.link(&documents) {
            Ok(edges) => edges,
            Err(e) => {
                self.unindex_unlinked(&documents).await;
                return Err(e);
            }
        };

        let summary = IngestSummary {
            documents: documents.len(),
            edges,
            elapsed: start.elapsed(),
        };
        info!(
            documents = summary.documents,
            edges = summary.edges,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "ingest complete"
        );
        progress.done(&summary);
        Ok(summary)
    }

    /// Reject the batch if any embedding would not fit the graph.
    fn check_batch(&self, documents: &[Document]) -> Result<()> {
        let expected = self
            .graph
            .dimensions()
            .or_else(|| documents.first().map(|d| d.embedding.len()));
        for doc in documents {
            self.graph.check_embedding(&doc.embedding)?;
            match expected {
                Some(expected) if doc.embedding.len() != expected => {
                    return Err(KbChatError::DimensionMismatch {
                        expected,
                        actual: doc.embedding.len(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Add or refresh a graph node per document. Returns the edge total.
    fn link(&self, documents: &[Document]) -> Result<usize> {
        let mut edges = 0;
        for doc in documents {
            edges += if self.graph.contains(&doc.id) {
                self.graph.update_document(
                    &doc.id,
                    doc.text.clone(),
                    doc.embedding.clone(),
                    doc.metadata.clone(),
                )?
            } else {
                self.graph.add_document(
                    doc.id.clone(),
                    doc.text.clone(),
                    doc.embedding.clone(),
                    doc.metadata.clone(),
                )?
            };
        }
        Ok(edges)
    }

    /// Delete from the index every batch document missing from the graph.
    async fn unindex_unlinked(&self, documents: &[Document]) {
        let orphans: Vec<String> = documents
            .iter()
            .filter(|d| !self.graph.contains(&d.id))
            .map(|d| d.id.clone())
            .collect();
        if orphans.is_empty() {
            return;
        }
        match self.index.delete(&orphans).await {
            Ok(deleted) => warn!(deleted, "linking failed, rolled back unlinked documents"),
            Err(e) => error!(error = %e, count = orphans.len(), "linking failed and rollback failed"),
        }
    }

    /// Remove `id` from the index and the graph.
    ///
    /// Fails with [`KbChatError::NotFound`] only when neither holds it.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        let deleted = self.index.delete(&[id.to_string()]).await?;
        let in_graph = match self.graph.remove_document(id) {
            Ok(()) => true,
            Err(KbChatError::NotFound { .. }) => false,
            Err(e) => return Err(e),
        };

        if deleted == 0 && !in_graph {
            return Err(KbChatError::not_found(id));
        }
        info!(%id, deleted, in_graph, "document removed");
        Ok(())
    }

    /// Load every indexed document that the graph does not hold yet.
    /// Returns how many nodes were added.
    ///
    /// A stored document the graph rejects (empty or stale embedding) is
    /// skipped with a warning. Only a failure to read the index is an error.
    #[instrument(skip_all)]
    pub async fn hydrate_graph(&self) -> Result<usize> {
        let documents = self.index.documents().await?;
        let mut added = 0;
        let mut skipped = 0;
        for doc in documents {
            if self.graph.contains(&doc.id) {
                continue;
            }
            let id = doc.id.clone();
            match self
                .graph
                .add_document(doc.id, doc.text, doc.embedding, doc.metadata)
            {
                Ok(_) => added += 1,
                Err(e) => {
                    skipped += 1;
                    warn!(%id, error = %e, "skipping stored document the graph cannot hold");
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, "some stored documents were left out of the graph");
        }
        info!(added, nodes = self.graph.len(), edges = self.graph.edge_count(), "graph hydrated");
        Ok(added)
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Stable id derived from a source key: `kb-` plus 16 hex digits of SHA-256.
pub fn document_id(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("kb-{}", &hash[..16])
}

/// Load every non-empty `.txt` file in `dir`, sorted by filename.
///
/// A missing directory is created and yields no documents. Unreadable files
/// are skipped with a warning.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn load_directory(dir: &Path) -> Result<Vec<SourceDocument>> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        info!("knowledge directory does not exist, creating it");
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| KbChatError::io(dir, e))?;
        return Ok(Vec::new());
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| KbChatError::io(dir, e))?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| KbChatError::io(dir, e))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "txt") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(file = %filename, error = %e, "failed to read knowledge file");
                continue;
            }
        };
        if text.is_empty() {
            debug!(file = %filename, "skipping empty file");
            continue;
        }

        let stem = filename.trim_end_matches(".txt");
        let metadata = Metadata::new()
            .with("source", KNOWLEDGE_BASE_SOURCE)
            .with("filename", filename.as_str())
            .with("topic", title_case(stem))
            .with("category", category_from_filename(&filename));
        debug!(file = %filename, chars = text.len(), "loaded knowledge file");
        documents.push(SourceDocument {
            id: document_id(&format!("file:{filename}")),
            text,
            metadata,
        });
    }

    info!(count = documents.len(), "knowledge files loaded");
    Ok(documents)
}

/// Category keywords, checked in order. A keyword matches when a word of the
/// filename stem starts with it.
const CATEGORY_RULES: &[(&str, &[&str])] = &[
    ("Technology", &["ai", "artificial", "machine", "data", "quantum", "blockchain"]),
    ("Science", &["biotech", "renewable", "space", "climate"]),
    ("Business", &["digital", "startup", "sustainable", "fintech", "remote"]),
    ("Health", &["telemedicine", "precision", "mental", "public", "healthcare"]),
];

/// Coarse category for a knowledge file, `General` when nothing matches.
pub fn category_from_filename(filename: &str) -> &'static str {
    let lowered = filename.to_lowercase();
    let stem = lowered.strip_suffix(".txt").unwrap_or(&lowered);
    let words: Vec<&str> = stem
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|k| words.iter().any(|w| w.starts_with(k)))
        })
        .map(|(category, _)| *category)
        .unwrap_or("General")
}

/// `quantum_computing` -> `Quantum Computing`.
fn title_case(stem: &str) -> String {
    stem.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Built-in starter documents covering RAG basics and a few neighbors.
pub fn seed_documents() -> Vec<SourceDocument> {
    const SEEDS: &[(&str, &str, &str)] = &[
        (
            "RAG",
            "AI",
            "RAG (Retrieval-Augmented Generation) is a technique that combines information retrieval with text generation. It enhances LLM responses by providing relevant context from a knowledge base, improving accuracy and reducing hallucinations.",
        ),
        (
            "vector_databases",
            "AI",
            "Vector databases are specialized databases designed to store and efficiently search through vector embeddings. They are crucial for implementing RAG systems as they enable semantic search capabilities.",
        ),
        (
            "graph_rag",
            "AI",
            "Graph-based RAG enhances traditional RAG systems by considering relationships between documents. This allows for better context retrieval by following semantic connections in the knowledge base.",
        ),
        (
            "python",
            "programming",
            "Python is a high-level programming language known for its simplicity and readability. It supports multiple programming paradigms, including procedural, object-oriented, and functional programming.",
        ),
        (
            "machine_learning",
            "technology",
            "Machine learning is a subset of artificial intelligence that enables systems to learn and improve from experience without being explicitly programmed. Common applications include image recognition and natural language processing.",
        ),
        (
            "containers",
            "technology",
            "Docker is a platform for developing, shipping, and running applications in containers. Containers package up code and all its dependencies, ensuring the application runs quickly and reliably across different computing environments.",
        ),
    ];

    SEEDS
        .iter()
        .map(|(topic, category, text)| SourceDocument {
            id: document_id(&format!("seed:{topic}")),
            text: (*text).to_string(),
            metadata: Metadata::new()
                .with("topic", *topic)
                .with("category", *category)
                .with("source", "original"),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::memory_index::InMemoryIndex;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn knowledge_base() -> (KnowledgeBase, Arc<InMemoryIndex>, Arc<SimilarityGraph>) {
        let index = Arc::new(InMemoryIndex::new());
        let graph = Arc::new(SimilarityGraph::new(0.3));
        let kb = KnowledgeBase::new(Arc::new(HashingEmbedder::new(256)), index.clone(), graph.clone());
        (kb, index, graph)
    }

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("kbchat_kb_test_{}", Uuid::now_v7()))
    }

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<String>>,
        embedded: Mutex<usize>,
    }

    impl IngestProgress for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn document_embedded(&self, _id: &str, _current: usize, _total: usize) {
            *self.embedded.lock().unwrap() += 1;
        }
        fn done(&self, _summary: &IngestSummary) {}
    }

    #[test]
    fn category_matches_word_prefixes() {
        assert_eq!(category_from_filename("quantum_computing.txt"), "Technology");
        assert_eq!(category_from_filename("ai_ethics.txt"), "Technology");
        assert_eq!(category_from_filename("renewable_energy.txt"), "Science");
        assert_eq!(category_from_filename("digital_marketing.txt"), "Business");
        assert_eq!(category_from_filename("mental_health.txt"), "Health");
        assert_eq!(category_from_filename("cooking.txt"), "General");
    }

    #[test]
    fn category_ignores_keywords_inside_words() {
        // "ai" inside "sustainable" or "maintenance" is not a match.
        assert_eq!(category_from_filename("sustainable_business.txt"), "Business");
        assert_eq!(category_from_filename("home_maintenance.txt"), "General");
    }

    #[test]
    fn title_case_matches_filename_words() {
        assert_eq!(title_case("quantum_computing"), "Quantum Computing");
        assert_eq!(title_case("AI_ethics"), "Ai Ethics");
    }

    #[test]
    fn document_ids_are_stable_and_prefixed() {
        let a = document_id("file:rag.txt");
        assert_eq!(a, document_id("file:rag.txt"));
        assert_ne!(a, document_id("file:python.txt"));
        assert!(a.starts_with("kb-"));
        assert_eq!(a.len(), 3 + 16);
    }

    #[test]
    fn seeds_are_marked_as_seed_sources() {
        let seeds = seed_documents();
        assert_eq!(seeds.len(), 6);
        assert!(seeds.iter().all(|s| s.metadata.is_seed()));
        assert!(seeds.iter().all(|s| !s.metadata.has_file()));
    }

    #[tokio::test]
    async fn load_directory_reads_sorted_non_empty_txt_files() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("renewable_energy.txt"), "Solar and wind power.\n").unwrap();
        std::fs::write(dir.join("blockchain.txt"), "Distributed ledgers.").unwrap();
        std::fs::write(dir.join("empty.txt"), "   \n").unwrap();
        std::fs::write(dir.join("notes.md"), "ignored").unwrap();

        let docs = load_directory(&dir).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].metadata.filename(), Some("blockchain.txt"));
        assert_eq!(docs[1].text, "Solar and wind power.");
        assert_eq!(docs[1].metadata.topic(), Some("Renewable Energy"));
        assert_eq!(docs[1].metadata.category(), Some("Science"));
        assert_eq!(docs[1].metadata.source(), Some(KNOWLEDGE_BASE_SOURCE));
        assert!(docs[1].metadata.has_file());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn load_directory_creates_missing_dir() {
        let dir = temp_dir();
        let docs = load_directory(&dir).await.unwrap();
        assert!(docs.is_empty());
        assert!(dir.is_dir());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn ingest_populates_index_and_graph() {
        let (kb, index, graph) = knowledge_base();
        let progress = RecordingProgress::default();

        let summary = kb.ingest(seed_documents(), &progress).await.unwrap();

        assert_eq!(summary.documents, 6);
        assert_eq!(index.len(), 6);
        assert_eq!(graph.len(), 6);
        assert_eq!(*progress.embedded.lock().unwrap(), 6);
        assert_eq!(
            *progress.phases.lock().unwrap(),
            vec!["Embedding", "Indexing", "Linking"]
        );
    }

    #[tokio::test]
    async fn reingest_replaces_in_place() {
        let (kb, index, graph) = knowledge_base();
        kb.ingest(seed_documents(), &SilentProgress).await.unwrap();

        let mut changed = seed_documents();
        changed.truncate(1);
        changed[0].text = "RAG pairs a retriever with a generator.".into();
        kb.ingest(changed.clone(), &SilentProgress).await.unwrap();

        assert_eq!(index.len(), 6);
        assert_eq!(graph.len(), 6);
        let expanded = graph.expand(&[changed[0].id.as_str()], 0);
        assert_eq!(expanded[0].text, "RAG pairs a retriever with a generator.");
    }

    #[tokio::test]
    async fn ingest_rejects_empty_text() {
        let (kb, index, _) = knowledge_base();
        let doc = SourceDocument {
            id: "blank".into(),
            text: "  ".into(),
            metadata: Metadata::new(),
        };
        let err = kb.ingest(vec![doc], &SilentProgress).await.unwrap_err();
        assert!(matches!(err, KbChatError::Validation { .. }));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn remove_deletes_from_both_stores() {
        let (kb, index, graph) = knowledge_base();
        let seeds = seed_documents();
        let id = seeds[0].id.clone();
        kb.ingest(seeds, &SilentProgress).await.unwrap();

        kb.remove(&id).await.unwrap();
        assert_eq!(index.len(), 5);
        assert!(!graph.contains(&id));

        let err = kb.remove(&id).await.unwrap_err();
        assert!(matches!(err, KbChatError::NotFound { .. }));
    }

    /// One dimension per whitespace-separated word.
    struct WordCountEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for WordCountEmbedder {
        async fn encode(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; text.split_whitespace().count()])
        }
        fn dimensions(&self) -> usize {
            0
        }
        fn name(&self) -> &str {
            "word-count"
        }
    }

    #[tokio::test]
    async fn graph_dimension_mismatch_leaves_index_untouched() {
        let (_, index, graph) = knowledge_base();
        graph
            .add_document("existing", "three dims", vec![1.0, 0.0, 0.0], Metadata::new())
            .unwrap();
        let kb = KnowledgeBase::new(Arc::new(HashingEmbedder::new(64)), index.clone(), graph.clone());

        let doc = seed_documents().remove(0);
        let id = doc.id.clone();
        let err = kb.ingest(vec![doc], &SilentProgress).await.unwrap_err();

        assert!(matches!(
            err,
            KbChatError::DimensionMismatch { expected: 3, actual: 64 }
        ));
        assert!(index.is_empty());
        assert!(!graph.contains(&id));
        assert_eq!(graph.len(), 1);
    }

    #[tokio::test]
    async fn mixed_dimensions_within_a_batch_are_rejected() {
        let index = Arc::new(InMemoryIndex::new());
        let graph = Arc::new(SimilarityGraph::new(0.3));
        let kb = KnowledgeBase::new(Arc::new(WordCountEmbedder), index.clone(), graph.clone());

        let batch = vec![
            SourceDocument {
                id: "two".into(),
                text: "two words".into(),
                metadata: Metadata::new(),
            },
            SourceDocument {
                id: "three".into(),
                text: "now three words".into(),
                metadata: Metadata::new(),
            },
        ];
        let err = kb.ingest(batch, &SilentProgress).await.unwrap_err();

        assert!(matches!(err, KbChatError::DimensionMismatch { expected: 2, actual: 3 }));
        assert!(index.is_empty());
        assert!(graph.is_empty());
    }

    #[tokio::test]
    async fn hydrate_skips_documents_the_graph_rejects() {
        let (kb, index, graph) = knowledge_base();
        let embedder = HashingEmbedder::new(256);
        let good = "vector databases store embeddings";
        index
            .upsert(&[
                Document {
                    id: "broken".into(),
                    text: "no embedding".into(),
                    embedding: Vec::new(),
                    metadata: Metadata::new(),
                },
                Document {
                    id: "good".into(),
                    text: good.into(),
                    embedding: embedder.embed(good),
                    metadata: Metadata::new(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(kb.hydrate_graph().await.unwrap(), 1);
        assert!(graph.contains("good"));
        assert!(!graph.contains("broken"));
    }

    #[tokio::test]
    async fn hydrate_loads_only_missing_nodes() {
        let (kb, index, _) = knowledge_base();
        kb.ingest(seed_documents(), &SilentProgress).await.unwrap();

        let fresh_graph = Arc::new(SimilarityGraph::new(0.3));
        let rehydrated = KnowledgeBase::new(
            Arc::new(HashingEmbedder::new(256)),
            index.clone(),
            fresh_graph.clone(),
        );
        assert_eq!(rehydrated.hydrate_graph().await.unwrap(), 6);
        assert_eq!(rehydrated.hydrate_graph().await.unwrap(), 0);
        assert_eq!(fresh_graph.len(), 6);
    }
}
