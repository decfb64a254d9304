//! Retrieval orchestration and knowledge-base management for kbchat.
//!
//! [`RetrievalOrchestrator`] turns a query into a grounded, attributed
//! [`ChatResponse`](kbchat_shared::ChatResponse): nearest-neighbor lookup,
//! context selection (optionally widened through the similarity graph),
//! live augmentation, and a single generator call. [`KnowledgeBase`] is the
//! write side that loads documents into the index and the graph.

pub mod attribution;
pub mod embedding;
pub mod generator;
pub mod knowledge;
pub mod memory_index;
pub mod orchestrator;
pub mod prompt;
pub mod trigger;

pub use embedding::HashingEmbedder;
pub use generator::OpenRouterGenerator;
pub use knowledge::{
    IngestProgress, IngestSummary, KnowledgeBase, SilentProgress, SourceDocument,
    category_from_filename, document_id, load_directory, seed_documents,
};
pub use memory_index::InMemoryIndex;
pub use orchestrator::{Collaborators, Retrieval, RetrievalOrchestrator};
pub use trigger::LiveTrigger;
