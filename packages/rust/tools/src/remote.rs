//! Remote capability server reached over HTTP.
//!
//! Wire contract: `POST {base}/tools/{name}` with body
//! `{"arguments": {...}}`, answered by `{"result": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use kbchat_shared::{KbChatError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Arguments, Capability, CapabilityProvider, build_client};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ToolRequest<'a> {
    arguments: &'a Arguments,
}

#[derive(Deserialize)]
struct ToolReply {
    result: String,
}

/// Delegates capability calls to a remote server.
pub struct HttpDelegate {
    client: Client,
    base_url: String,
    capabilities: Vec<String>,
}

impl HttpDelegate {
    /// `capabilities` lists the names the server is expected to satisfy.
    pub fn new(base_url: &str, capabilities: Vec<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(REQUEST_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            capabilities,
        })
    }
}

#[async_trait]
impl CapabilityProvider for HttpDelegate {
    fn name(&self) -> &str {
        "remote"
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities
            .iter()
            .map(|name| Capability::new(name.clone(), format!("{name} (remote)")))
            .collect()
    }

    async fn execute(&self, capability: &str, args: &Arguments) -> Result<String> {
        let url = format!("{}/tools/{capability}", self.base_url);
        debug!(%url, "calling remote capability");

        let response = self
            .client
            .post(&url)
            .json(&ToolRequest { arguments: args })
            .send()
            .await
            .map_err(|e| KbChatError::upstream("remote tools", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KbChatError::upstream("remote tools", format!("{url}: HTTP {status}")));
        }

        let reply: ToolReply = response
            .json()
            .await
            .map_err(|e| KbChatError::upstream("remote tools", format!("invalid reply: {e}")))?;
        Ok(reply.result)
    }
}
