//! Grounding instruction and generator message assembly.

use std::fmt::Write as _;

use kbchat_shared::{ChatExchange, ChatMessage, ContextSet};

use crate::attribution::{citation_label, clip};

/// Marker sentence present whenever no knowledge excerpt is available.
pub const NO_MATCH_NOTICE: &str = "No knowledge-base match was found for this question.";

/// Build the system instruction that grounds the generator.
///
/// Each excerpt is clipped to `excerpt_chars` and labelled with its topic and
/// category so the answer can cite it.
pub fn grounding_instruction(context: &ContextSet, live: Option<&str>, excerpt_chars: usize) -> String {
    let mut out = String::new();

    if context.is_empty() {
        out.push_str("You are a helpful assistant backed by a curated knowledge base.\n\n");
        out.push_str(NO_MATCH_NOTICE);
        out.push_str("\n\n");
        if let Some(live) = live {
            let _ = write!(out, "LIVE WEB RESULTS (supplementary):\n{}\n\n", live.trim());
        }
        out.push_str("INSTRUCTIONS:\n");
        out.push_str(
            "1. Tell the user plainly that the knowledge base has no specific information on this topic.\n",
        );
        out.push_str("2. Do not invent or imply knowledge-base content.\n");
        if live.is_some() {
            out.push_str(
                "3. You may answer from the live web results above; attribute them as web results.\n",
            );
        } else {
            out.push_str(
                "3. Offer a general answer only if you are confident, and mark it as general knowledge.\n",
            );
        }
        return out;
    }

    out.push_str("You are a helpful assistant answering from a curated knowledge base.\n\n");
    out.push_str("KNOWLEDGE BASE EXCERPTS (primary source):\n");
    for entry in context {
        let _ = write!(
            out,
            "[{}]\n{}\n\n",
            citation_label(&entry.metadata),
            clip(entry.text.trim(), excerpt_chars)
        );
    }

    if let Some(live) = live {
        let _ = write!(out, "LIVE WEB RESULTS (supplementary):\n{}\n\n", live.trim());
    }

    out.push_str("INSTRUCTIONS:\n");
    out.push_str("1. Base your answer primarily on the knowledge base excerpts.\n");
    out.push_str("2. Cite the excerpts you use by their topic and category, e.g. [Topic (Category)].\n");
    if live.is_some() {
        out.push_str(
            "3. Use the live web results only to fill gaps or update the excerpts, and say when you do.\n",
        );
    } else {
        out.push_str("3. If the excerpts do not cover the question, say so.\n");
    }
    out.push_str("4. Do not make up information that is not in the provided sources.\n");
    out
}

/// System instruction, then prior turns, then the new user query.
pub fn build_messages(instruction: &str, history: &[ChatExchange], query: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(instruction));
    for turn in history {
        messages.push(ChatMessage::user(&turn.user));
        if let Some(reply) = &turn.assistant {
            messages.push(ChatMessage::assistant(reply));
        }
    }
    messages.push(ChatMessage::user(query));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbchat_shared::{ContextEntry, Metadata, Role};

    fn context() -> ContextSet {
        [ContextEntry {
            document_id: "kb-rag".into(),
            text: "RAG combines retrieval with generation.".into(),
            metadata: Metadata::new().with("topic", "RAG").with("category", "AI"),
            score: Some(0.91),
        }]
        .into_iter()
        .collect()
    }

    #[test]
    fn empty_context_instructs_disclaimer() {
        let text = grounding_instruction(&ContextSet::new(), None, 2000);
        assert!(text.contains(NO_MATCH_NOTICE));
        assert!(text.contains("no specific information"));
        assert!(!text.contains("KNOWLEDGE BASE EXCERPTS"));

        let with_live = grounding_instruction(&ContextSet::new(), Some("hits"), 2000);
        assert!(with_live.contains(NO_MATCH_NOTICE));
        assert!(with_live.contains("LIVE WEB RESULTS"));
    }

    #[test]
    fn context_is_labelled_and_prioritized() {
        let text = grounding_instruction(&context(), None, 2000);
        assert!(text.contains("[RAG (AI)]\nRAG combines retrieval with generation."));
        assert!(text.contains("primarily on the knowledge base"));
        assert!(!text.contains("LIVE WEB RESULTS"));
        assert!(!text.contains(NO_MATCH_NOTICE));
    }

    #[test]
    fn live_results_are_marked_supplementary() {
        let text = grounding_instruction(&context(), Some("[1] **Rust** — https://rust-lang.org"), 2000);
        let kb_at = text.find("KNOWLEDGE BASE EXCERPTS").unwrap();
        let live_at = text.find("LIVE WEB RESULTS (supplementary)").unwrap();
        assert!(kb_at < live_at);
        assert!(text.contains("only to fill gaps"));
    }

    #[test]
    fn excerpts_are_clipped() {
        let text = grounding_instruction(&context(), None, 3);
        assert!(text.contains("[RAG (AI)]\nRAG\n"));
    }

    #[test]
    fn messages_expand_history_in_order() {
        let history = vec![
            ChatExchange {
                user: "What is RAG?".into(),
                assistant: Some("Retrieval-augmented generation.".into()),
            },
            ChatExchange {
                user: "And graphs?".into(),
                assistant: None,
            },
        ];
        let messages = build_messages("ground", &history, "Tell me more");
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::User]
        );
        assert_eq!(messages.last().unwrap().content, "Tell me more");
    }
}
