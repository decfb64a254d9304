//! Shared types, error model, configuration, and collaborator traits for kbchat.
//!
//! This crate is the foundation depended on by all other kbchat crates.
//! It provides:
//! - [`KbChatError`], the unified error type
//! - Domain types ([`Document`], [`RetrievalCandidate`], [`ContextSet`],
//!   [`SourceAttribution`], [`ChatResponse`])
//! - Configuration ([`AppConfig`], [`Credentials`], config loading)
//! - Collaborator traits ([`EmbeddingProvider`], [`NearestNeighborIndex`], [`Generator`])

pub mod config;
pub mod error;
pub mod traits;
pub mod types;
pub mod vector;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, Credentials, EmbeddingConfig, GeneratorConfig, GraphConfig,
    LiveAugmentationConfig, RetrievalConfig, StorageConfig, TimeoutsConfig, ToolsConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_generator_key,
};
pub use error::{KbChatError, Result};
pub use traits::{EmbeddingProvider, Generator, NearestNeighborIndex};
pub use types::{
    ChatExchange, ChatMessage, ChatResponse, Completion, ContextEntry, ContextSet, Document,
    GenerationConstraints, KnowledgeSource, LiveSource, MetaValue, Metadata, ResponseMetadata,
    RetrievalCandidate, Role, SEED_SOURCES, SelectionPolicy, SourceAttribution, TokenUsage,
    UNKNOWN,
};
pub use vector::{cosine_similarity, l2_normalize};
