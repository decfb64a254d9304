//! Core domain types for kbchat retrieval and responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder used when a metadata field is absent.
pub const UNKNOWN: &str = "Unknown";

/// `source` metadata values that mark built-in starter documents.
pub const SEED_SOURCES: &[&str] = &["original", "seed"];

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// A scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    /// The string payload, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Document metadata: string keys mapped to scalar values.
///
/// Well-known keys are `topic`, `category`, `filename`, and `source`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub BTreeMap<String, MetaValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.0.get(key)
    }

    /// Text value for `key`, if present and textual.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(MetaValue::as_str)
    }

    pub fn topic(&self) -> Option<&str> {
        self.get_str("topic")
    }

    pub fn category(&self) -> Option<&str> {
        self.get_str("category")
    }

    pub fn filename(&self) -> Option<&str> {
        self.get_str("filename")
    }

    pub fn source(&self) -> Option<&str> {
        self.get_str("source")
    }

    /// Whether the document was added from a built-in seed set.
    pub fn is_seed(&self) -> bool {
        self.source()
            .is_some_and(|s| SEED_SOURCES.iter().any(|seed| s.eq_ignore_ascii_case(seed)))
    }

    /// True only when a real filename is recorded and the document is not a seed.
    pub fn has_file(&self) -> bool {
        match self.filename() {
            Some(name) => {
                let name = name.trim();
                !name.is_empty() && !name.eq_ignore_ascii_case(UNKNOWN) && !self.is_seed()
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Documents and retrieval
// ---------------------------------------------------------------------------

/// An immutable unit of retrievable knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable unique identifier.
    pub id: String,
    /// Body text.
    pub text: String,
    /// Fixed-length embedding vector.
    pub embedding: Vec<f32>,
    /// Topic, category, filename, source, ...
    #[serde(default)]
    pub metadata: Metadata,
}

/// One nearest-neighbor hit for a query. Lives for a single request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub document_id: String,
    /// Raw similarity from the index, higher is better.
    pub score: f64,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One document selected to ground a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub document_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Index score for direct matches; `None` for graph-derived neighbors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Context entries, deduplicated by document id, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSet(Vec<ContextEntry>);

impl ContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` unless its document id is already present.
    /// Returns whether the entry was added.
    pub fn push(&mut self, entry: ContextEntry) -> bool {
        if self.contains(&entry.document_id) {
            return false;
        }
        self.0.push(entry);
        true
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.0.iter().any(|e| e.document_id == document_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContextEntry> {
        self.0.iter()
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.0
    }

    pub fn into_entries(self) -> Vec<ContextEntry> {
        self.0
    }
}

impl FromIterator<ContextEntry> for ContextSet {
    fn from_iter<I: IntoIterator<Item = ContextEntry>>(iter: I) -> Self {
        let mut set = Self::new();
        for entry in iter {
            set.push(entry);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ContextSet {
    type Item = &'a ContextEntry;
    type IntoIter = std::slice::Iter<'a, ContextEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// How much context the orchestrator builds for a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Direct matches plus their graph neighbors.
    #[default]
    BroadContext,
    /// Only the single highest-scoring match.
    TopMatchOnly,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BroadContext => "broad_context",
            Self::TopMatchOnly => "top_match_only",
        }
    }
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Attribution
// ---------------------------------------------------------------------------

/// A source surfaced to the end user alongside an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceAttribution {
    Knowledge(KnowledgeSource),
    Live(LiveSource),
}

/// Attribution for a stored knowledge document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub document_id: String,
    pub topic: String,
    pub category: String,
    pub filename: String,
    pub text_preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// `score` rendered with three decimals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<String>,
    pub has_file: bool,
}

/// Attribution for a supplementary live lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSource {
    /// Capability that produced the result (e.g. `web_search`).
    pub capability: String,
    pub query: String,
}

// ---------------------------------------------------------------------------
// Generator messages
// ---------------------------------------------------------------------------

/// Conversation role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged message sent to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A prior user turn and the reply it received, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant: Option<String>,
}

/// Sampling limits passed with a completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConstraints {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Token accounting reported by the generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A generator reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub model_id: String,
}

// ---------------------------------------------------------------------------
// Response payload
// ---------------------------------------------------------------------------

/// The attributed answer returned to callers, including on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Time-sortable response identifier.
    pub id: Uuid,
    /// Generated answer, or a human-readable failure message.
    pub response: String,
    pub context: Vec<ContextEntry>,
    pub sources: Vec<SourceAttribution>,
    pub metadata: ResponseMetadata,
}

/// Bookkeeping attached to a [`ChatResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    pub rag_documents_used: usize,
    pub web_search_used: bool,
    pub policy: SelectionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, score: Option<f64>) -> ContextEntry {
        ContextEntry {
            document_id: id.into(),
            text: format!("text of {id}"),
            metadata: Metadata::new(),
            score,
        }
    }

    #[test]
    fn has_file_rules() {
        let absent = Metadata::new().with("topic", "RAG");
        assert!(!absent.has_file());

        let sentinel = Metadata::new().with("filename", UNKNOWN);
        assert!(!sentinel.has_file());

        let seed = Metadata::new()
            .with("filename", "rag.txt")
            .with("source", "original");
        assert!(!seed.has_file());

        let real = Metadata::new()
            .with("filename", "quantum_computing.txt")
            .with("source", "knowledge_base");
        assert!(real.has_file());
    }

    #[test]
    fn context_set_deduplicates_by_id() {
        let mut set = ContextSet::new();
        assert!(set.push(entry("a", Some(0.9))));
        assert!(set.push(entry("b", None)));
        assert!(!set.push(entry("a", None)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.entries()[0].score, Some(0.9));
    }

    #[test]
    fn metadata_accepts_mixed_scalars() {
        let json = r#"{"topic":"Python","year":2024,"weight":0.5,"draft":false}"#;
        let meta: Metadata = serde_json::from_str(json).expect("deserialize");
        assert_eq!(meta.topic(), Some("Python"));
        assert_eq!(meta.get("year"), Some(&MetaValue::Integer(2024)));
        assert_eq!(meta.get("weight"), Some(&MetaValue::Float(0.5)));
        assert_eq!(meta.get("draft"), Some(&MetaValue::Bool(false)));
        assert_eq!(meta.get_str("year"), None);
    }

    #[test]
    fn attribution_is_tagged_by_type() {
        let live = SourceAttribution::Live(LiveSource {
            capability: "web_search".into(),
            query: "latest rust release".into(),
        });
        let json = serde_json::to_value(&live).expect("serialize");
        assert_eq!(json["type"], "live");
        assert_eq!(json["capability"], "web_search");

        let knowledge = SourceAttribution::Knowledge(KnowledgeSource {
            document_id: "kb-1".into(),
            topic: "RAG".into(),
            category: "AI".into(),
            filename: UNKNOWN.into(),
            text_preview: "RAG is...".into(),
            score: Some(0.9),
            relevance_score: Some("0.900".into()),
            has_file: false,
        });
        let json = serde_json::to_value(&knowledge).expect("serialize");
        assert_eq!(json["type"], "knowledge");
        assert_eq!(json["relevance_score"], "0.900");
    }

    #[test]
    fn unknown_filename_is_not_a_file_in_any_case() {
        for name in ["Unknown", "unknown", "UNKNOWN", " unknown "] {
            let meta = Metadata::new()
                .with("filename", name)
                .with("source", "knowledge_base");
            assert!(!meta.has_file(), "{name:?} counted as a file");
        }
        let real = Metadata::new()
            .with("filename", "rag.txt")
            .with("source", "knowledge_base");
        assert!(real.has_file());
    }

    #[test]
    fn policy_serializes_snake_case() {
        let json = serde_json::to_string(&SelectionPolicy::TopMatchOnly).unwrap();
        assert_eq!(json, r#""top_match_only""#);
        assert_eq!(SelectionPolicy::default(), SelectionPolicy::BroadContext);
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::system("be helpful");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be helpful"}"#);
    }
}
