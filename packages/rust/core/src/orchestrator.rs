//! Query-time retrieval: candidates, context selection, live augmentation,
//! grounding, and the final attributed response.
//!
//! Secondary failures (index, graph, live search) are absorbed here and only
//! shrink the context. The generator call is the one step whose failure is
//! reported to the caller, as text inside the [`ChatResponse`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kbchat_graph::SimilarityGraph;
use kbchat_shared::{
    AppConfig, ChatExchange, ChatResponse, ContextEntry, ContextSet, EmbeddingProvider,
    GenerationConstraints, Generator, KbChatError, NearestNeighborIndex, ResponseMetadata, Result,
    RetrievalCandidate, SelectionPolicy, SourceAttribution,
};
use kbchat_tools::{Arguments, ToolRouter};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::attribution::{knowledge_attribution, live_attribution};
use crate::prompt::{build_messages, grounding_instruction};
use crate::trigger::LiveTrigger;

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn NearestNeighborIndex>,
    pub graph: Arc<SimilarityGraph>,
    pub tools: Arc<ToolRouter>,
    pub generator: Arc<dyn Generator>,
}

/// Output of [`RetrievalOrchestrator::retrieve`].
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub grounding_instruction: String,
    pub context_set: ContextSet,
    pub attributions: Vec<SourceAttribution>,
    /// Text returned by the live capability, when it ran and succeeded.
    pub live_result: Option<String>,
}

/// Builds grounded, attributed answers for single queries.
pub struct RetrievalOrchestrator {
    collaborators: Collaborators,
    config: AppConfig,
    trigger: LiveTrigger,
}

impl RetrievalOrchestrator {
    /// Takes a copy of the validated config; nothing is read from the
    /// environment afterwards.
    pub fn new(config: &AppConfig, collaborators: Collaborators) -> Result<Self> {
        Ok(Self {
            trigger: LiveTrigger::from_config(&config.live_augmentation)?,
            config: config.clone(),
            collaborators,
        })
    }

    pub fn graph(&self) -> &Arc<SimilarityGraph> {
        &self.collaborators.graph
    }

    /// Assemble context, attributions, and the grounding instruction for
    /// `query`. Never fails: every collaborator error degrades to less context.
    #[instrument(skip_all, fields(policy = %policy))]
    pub async fn retrieve(&self, query: &str, policy: SelectionPolicy) -> Retrieval {
        let candidates = self.candidates(query).await;

        let context_set = match policy {
            SelectionPolicy::TopMatchOnly => select_top_match(&candidates),
            SelectionPolicy::BroadContext => self.expand_context(&candidates).await,
        };

        let preview_chars = self.config.retrieval.preview_chars;
        let mut attributions: Vec<SourceAttribution> = context_set
            .iter()
            .map(|entry| knowledge_attribution(entry, preview_chars))
            .collect();

        let live_result = self.live_augmentation(query).await;
        if live_result.is_some() {
            attributions.push(live_attribution(&self.config.live_augmentation.capability, query));
        }

        let grounding_instruction = grounding_instruction(
            &context_set,
            live_result.as_deref(),
            self.config.retrieval.excerpt_chars,
        );

        info!(
            candidates = candidates.len(),
            context = context_set.len(),
            live = live_result.is_some(),
            "retrieval complete"
        );

        Retrieval {
            grounding_instruction,
            context_set,
            attributions,
            live_result,
        }
    }

    /// Retrieve, call the generator, and package the attributed response.
    ///
    /// Generator failures become a human-readable message in
    /// [`ChatResponse::response`]; the context and sources assembled before
    /// the failure are still returned.
    #[instrument(skip_all, fields(policy = %policy, history = history.len()))]
    pub async fn respond(
        &self,
        query: &str,
        history: &[ChatExchange],
        policy: SelectionPolicy,
    ) -> ChatResponse {
        let retrieval = self.retrieve(query, policy).await;
        let messages = build_messages(&retrieval.grounding_instruction, history, query);

        let generator = &self.config.generator;
        let constraints = GenerationConstraints {
            model: generator.model.clone(),
            temperature: generator.temperature,
            max_tokens: generator.max_tokens,
        };

        let outcome = bounded(
            "generator",
            self.config.timeouts.generator(),
            self.collaborators.generator.complete(&messages, &constraints),
        )
        .await;

        let (response, model, total_tokens, failure) = match outcome {
            Ok(completion) => (
                completion.text,
                completion.model_id,
                Some(completion.usage.total_tokens),
                None,
            ),
            Err(e) => {
                error!(error = %e, "generator call failed");
                (failure_text(&e), constraints.model.clone(), None, Some(e.to_string()))
            }
        };

        ChatResponse {
            id: Uuid::now_v7(),
            response,
            metadata: ResponseMetadata {
                model,
                total_tokens,
                rag_documents_used: retrieval.context_set.len(),
                web_search_used: retrieval.live_result.is_some(),
                policy,
                error: failure,
            },
            context: retrieval.context_set.into_entries(),
            sources: retrieval.attributions,
        }
    }

    /// Nearest-neighbor candidates for `query`; empty on any failure.
    async fn candidates(&self, query: &str) -> Vec<RetrievalCandidate> {
        let timeouts = &self.config.timeouts;
        let vector = match bounded(
            "embedding",
            timeouts.embedding(),
            self.collaborators.embedder.encode(query),
        )
        .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed, continuing without knowledge context");
                return Vec::new();
            }
        };

        match bounded(
            "index",
            timeouts.index(),
            self.collaborators
                .index
                .search(&vector, self.config.retrieval.candidate_limit),
        )
        .await
        {
            Ok(candidates) => {
                for c in &candidates {
                    debug!(id = %c.document_id, score = c.score, "candidate");
                }
                candidates
            }
            Err(e) => {
                warn!(error = %e, "index search failed, continuing without knowledge context");
                Vec::new()
            }
        }
    }

    /// Direct matches (with scores) followed by graph neighbors (without).
    async fn expand_context(&self, candidates: &[RetrievalCandidate]) -> ContextSet {
        let graph = &self.collaborators.graph;

        for candidate in candidates {
            if graph.contains(&candidate.document_id) {
                continue;
            }
            if let Err(e) = self.insert_candidate(candidate).await {
                match e {
                    KbChatError::DuplicateDocument { .. } => {
                        debug!(id = %candidate.document_id, "candidate inserted concurrently, skipping")
                    }
                    other => {
                        warn!(id = %candidate.document_id, error = %other, "could not add candidate to graph")
                    }
                }
            }
        }

        let seeds: Vec<&str> = candidates.iter().map(|c| c.document_id.as_str()).collect();
        let expanded = graph.expand(&seeds, self.config.retrieval.expansion_depth);
        debug!(seeds = seeds.len(), expanded = expanded.len(), "graph expansion");

        let direct = candidates.iter().map(|c| ContextEntry {
            document_id: c.document_id.clone(),
            text: c.text.clone(),
            metadata: c.metadata.clone(),
            score: Some(c.score),
        });
        let neighbors = expanded.into_iter().map(|node| ContextEntry {
            document_id: node.id,
            text: node.text,
            metadata: node.metadata,
            score: None,
        });
        direct.chain(neighbors).collect()
    }

    async fn insert_candidate(&self, candidate: &RetrievalCandidate) -> Result<()> {
        let embedding = bounded(
            "embedding",
            self.config.timeouts.embedding(),
            self.collaborators.embedder.encode(&candidate.text),
        )
        .await?;
        self.collaborators.graph.add_document(
            candidate.document_id.clone(),
            candidate.text.clone(),
            embedding,
            candidate.metadata.clone(),
        )?;
        Ok(())
    }

    /// Run the live capability when the trigger fires. Failures are logged
    /// and yield `None`.
    async fn live_augmentation(&self, query: &str) -> Option<String> {
        if !self.trigger.should_trigger(query) {
            debug!("live augmentation not triggered");
            return None;
        }

        let capability = &self.config.live_augmentation.capability;
        let mut args = Arguments::new();
        args.insert("query".into(), serde_json::Value::String(query.to_string()));

        match bounded(
            capability,
            self.config.timeouts.live_search(),
            self.collaborators.tools.execute(capability, &args),
        )
        .await
        {
            Ok(text) => {
                info!(%capability, "live augmentation succeeded");
                Some(text)
            }
            Err(e) if e.is_configuration() => {
                info!(%capability, reason = %e, "live augmentation unavailable");
                None
            }
            Err(e) => {
                warn!(%capability, error = %e, "live augmentation failed, continuing without it");
                None
            }
        }
    }
}

/// First candidate with the highest score, as a one-entry context.
fn select_top_match(candidates: &[RetrievalCandidate]) -> ContextSet {
    let best = candidates.iter().fold(None::<&RetrievalCandidate>, |best, c| match best {
        Some(b) if b.score >= c.score => Some(b),
        _ => Some(c),
    });

    best.into_iter()
        .map(|c| ContextEntry {
            document_id: c.document_id.clone(),
            text: c.text.clone(),
            metadata: c.metadata.clone(),
            score: Some(c.score),
        })
        .collect()
}

/// Await `fut` for at most `limit`; a timeout becomes `UpstreamUnavailable`.
async fn bounded<T>(
    service: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(KbChatError::upstream(
            service,
            format!("timed out after {} ms", limit.as_millis()),
        )),
    }
}

/// User-facing text for a failed generator call.
fn failure_text(error: &KbChatError) -> String {
    match error {
        KbChatError::Configuration { message } => format!("Configuration error: {message}"),
        other => format!("Sorry, I encountered an error: {other}"),
    }
}
