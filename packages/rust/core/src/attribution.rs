//! Source attributions and text clipping helpers.

use kbchat_shared::{
    ContextEntry, KnowledgeSource, LiveSource, Metadata, SourceAttribution, UNKNOWN,
};

/// The longest prefix of `text` holding at most `max_chars` characters.
pub fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// `text` clipped to `max_chars`, with `...` appended when anything was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let clipped = clip(text, max_chars);
    if clipped.len() < text.len() {
        format!("{clipped}...")
    } else {
        clipped.to_string()
    }
}

/// "Topic (Category)" label used to cite a document.
pub fn citation_label(metadata: &Metadata) -> String {
    format!(
        "{} ({})",
        metadata.topic().unwrap_or(UNKNOWN),
        metadata.category().unwrap_or(UNKNOWN)
    )
}

/// Attribution for one knowledge-base context entry.
pub fn knowledge_attribution(entry: &ContextEntry, preview_chars: usize) -> SourceAttribution {
    let meta = &entry.metadata;
    SourceAttribution::Knowledge(KnowledgeSource {
        document_id: entry.document_id.clone(),
        topic: meta.topic().unwrap_or(UNKNOWN).to_string(),
        category: meta.category().unwrap_or(UNKNOWN).to_string(),
        filename: meta.filename().unwrap_or(UNKNOWN).to_string(),
        text_preview: preview(&entry.text, preview_chars),
        score: entry.score,
        relevance_score: entry.score.map(|s| format!("{s:.3}")),
        has_file: meta.has_file(),
    })
}

/// Attribution for a successful live lookup.
pub fn live_attribution(capability: &str, query: &str) -> SourceAttribution {
    SourceAttribution::Live(LiveSource {
        capability: capability.to_string(),
        query: query.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(metadata: Metadata, score: Option<f64>) -> ContextEntry {
        ContextEntry {
            document_id: "kb-1".into(),
            text: "Quantum computers use qubits.".into(),
            metadata,
            score,
        }
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo wörld", 4), "héll");
        assert_eq!(clip("short", 50), "short");
        assert_eq!(clip("", 3), "");
    }

    #[test]
    fn preview_marks_truncation() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }

    #[test]
    fn knowledge_attribution_formats_score_and_file() {
        let meta = Metadata::new()
            .with("topic", "Quantum Computing")
            .with("category", "Technology")
            .with("filename", "quantum_computing.txt")
            .with("source", "knowledge_base");
        let SourceAttribution::Knowledge(source) = knowledge_attribution(&entry(meta, Some(0.9)), 10)
        else {
            panic!("expected knowledge attribution");
        };
        assert_eq!(source.relevance_score.as_deref(), Some("0.900"));
        assert_eq!(source.text_preview, "Quantum co...");
        assert!(source.has_file);
    }

    #[test]
    fn missing_metadata_falls_back_to_unknown() {
        let SourceAttribution::Knowledge(source) =
            knowledge_attribution(&entry(Metadata::new(), None), 300)
        else {
            panic!("expected knowledge attribution");
        };
        assert_eq!(source.topic, UNKNOWN);
        assert_eq!(source.filename, UNKNOWN);
        assert!(source.relevance_score.is_none());
        assert!(!source.has_file);
    }

    #[test]
    fn citation_label_combines_topic_and_category() {
        let meta = Metadata::new().with("topic", "RAG").with("category", "AI");
        assert_eq!(citation_label(&meta), "RAG (AI)");
        assert_eq!(citation_label(&Metadata::new()), "Unknown (Unknown)");
    }
}
