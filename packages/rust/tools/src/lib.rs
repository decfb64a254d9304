//! Capability providers and the router that dispatches to them.
//!
//! A capability is a named operation (`web_search`, `get_time`, ...) that
//! takes JSON arguments and returns text. Providers advertise the
//! capabilities they satisfy; [`ToolRouter`] picks one per call, trying a
//! remote delegate first when configured to and falling back to a local
//! provider on failure.

mod files;
mod remote;
mod router;
mod system;
mod web_search;

use std::time::Duration;

use async_trait::async_trait;
use kbchat_shared::{KbChatError, Result};
use reqwest::Client;
use serde::Serialize;

pub use files::FileProvider;
pub use remote::HttpDelegate;
pub use router::ToolRouter;
pub use system::SystemProvider;
pub use web_search::BraveSearch;

/// JSON object passed as capability arguments.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// User-Agent string for outbound capability requests.
const USER_AGENT: &str = concat!("kbchat/", env!("CARGO_PKG_VERSION"));

/// A named capability and what it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Something that can execute one or more named capabilities.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Provider name used in diagnostics.
    fn name(&self) -> &str;

    /// Capabilities this provider advertises.
    fn capabilities(&self) -> Vec<Capability>;

    fn provides(&self, capability: &str) -> bool {
        self.capabilities().iter().any(|c| c.name == capability)
    }

    /// Run `capability` with `args` and return its text result.
    async fn execute(&self, capability: &str, args: &Arguments) -> Result<String>;
}

/// Fetch a required string argument.
pub(crate) fn required_str<'a>(args: &'a Arguments, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| KbChatError::validation(format!("missing required argument `{key}`")))
}

/// Build a reqwest client for capability calls.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| KbChatError::upstream("http", format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_str_rejects_missing_and_blank() {
        let mut args = Arguments::new();
        assert!(required_str(&args, "query").is_err());

        args.insert("query".into(), json!("   "));
        assert!(required_str(&args, "query").is_err());

        args.insert("query".into(), json!(42));
        assert!(required_str(&args, "query").is_err());

        args.insert("query".into(), json!(" rust news "));
        assert_eq!(required_str(&args, "query").unwrap(), "rust news");
    }
}
