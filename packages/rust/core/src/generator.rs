//! OpenAI-compatible chat completion client (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use kbchat_shared::{
    ChatMessage, Completion, GenerationConstraints, Generator, GeneratorConfig, KbChatError,
    Result, TokenUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const SERVICE: &str = "generator";

/// User-Agent string for generator requests.
const USER_AGENT: &str = concat!("kbchat/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`Generator`] backed by `POST {base_url}/chat/completions`.
pub struct OpenRouterGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenRouterGenerator {
    /// `api_key` may be absent; every call then fails with a configuration
    /// error without touching the network.
    pub fn new(config: &GeneratorConfig, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| KbChatError::upstream(SERVICE, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Generator for OpenRouterGenerator {
    #[instrument(skip_all, fields(model = %constraints.model, messages = messages.len()))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        constraints: &GenerationConstraints,
    ) -> Result<Completion> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(KbChatError::config(
                "OpenRouter API key is not configured. Set OPENROUTER_API_KEY in your environment",
            ));
        };

        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &constraints.model,
            messages,
            temperature: constraints.temperature,
            max_tokens: constraints.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KbChatError::upstream(SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(KbChatError::upstream(SERVICE, format!("HTTP {status}: {detail}")));
        }

        let reply: CompletionReply = response
            .json()
            .await
            .map_err(|e| KbChatError::upstream(SERVICE, format!("invalid response body: {e}")))?;

        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| KbChatError::upstream(SERVICE, "response contained no choices"))?;

        let usage = reply.usage.unwrap_or_default();
        debug!(total_tokens = usage.total_tokens, "completion received");

        Ok(Completion {
            text,
            usage,
            model_id: reply.model.unwrap_or_else(|| constraints.model.clone()),
        })
    }
}
