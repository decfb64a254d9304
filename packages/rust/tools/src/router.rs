//! Uniform "execute capability by name" dispatch.

use std::sync::Arc;

use kbchat_shared::{Credentials, KbChatError, Result, ToolsConfig};
use tracing::{debug, instrument, warn};

use crate::{
    Arguments, BraveSearch, Capability, CapabilityProvider, FileProvider, HttpDelegate,
    SystemProvider,
};

/// Dispatches capability calls to local providers or a remote delegate.
///
/// The only state is the provider registration and the `prefer_remote` flag;
/// one router is shared by every request.
pub struct ToolRouter {
    local: Vec<Arc<dyn CapabilityProvider>>,
    remote: Option<Arc<dyn CapabilityProvider>>,
    prefer_remote: bool,
}

impl ToolRouter {
    /// An empty router with no providers.
    pub fn new() -> Self {
        Self {
            local: Vec::new(),
            remote: None,
            prefer_remote: false,
        }
    }

    /// Register a local provider. Earlier registrations win on name clashes.
    pub fn with_local(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.local.push(provider);
        self
    }

    /// Register the remote delegate and whether to try it first.
    pub fn with_remote(mut self, provider: Arc<dyn CapabilityProvider>, prefer: bool) -> Self {
        self.remote = Some(provider);
        self.prefer_remote = prefer;
        self
    }

    /// Build the standard router: Brave web search, system, and file
    /// providers locally, plus an HTTP delegate when `remote_url` is set.
    pub fn from_config(config: &ToolsConfig, credentials: &Credentials) -> Result<Self> {
        let base_path = std::env::current_dir()
            .map_err(|e| KbChatError::io(".", e))?;

        let mut router = Self::new()
            .with_local(Arc::new(BraveSearch::new(
                &config.brave_base_url,
                credentials.brave_api_key.clone(),
            )?))
            .with_local(Arc::new(SystemProvider::new()))
            .with_local(Arc::new(FileProvider::new(base_path)));

        if let Some(url) = &config.remote_url {
            let delegate = HttpDelegate::new(url, config.remote_capabilities.clone())?;
            router = router.with_remote(Arc::new(delegate), config.prefer_remote);
        }
        Ok(router)
    }

    /// Every advertised capability, deduplicated by name in dispatch order.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut seen = Vec::<Capability>::new();
        for provider in self.dispatch_order() {
            for capability in provider.capabilities() {
                if !seen.iter().any(|c| c.name == capability.name) {
                    seen.push(capability);
                }
            }
        }
        seen
    }

    /// Whether any provider advertises `name`.
    pub fn has_capability(&self, name: &str) -> bool {
        self.dispatch_order().any(|p| p.provides(name))
    }

    /// Execute `name` with `args`.
    ///
    /// Fails with [`KbChatError::UnknownCapability`] when nobody advertises
    /// `name`. A remote failure falls back to the first local provider for the
    /// same name; only when none exists does the remote error surface, as
    /// `UpstreamUnavailable`. Local provider errors propagate unchanged.
    #[instrument(skip_all, fields(capability = %name))]
    pub async fn execute(&self, name: &str, args: &Arguments) -> Result<String> {
        let remote = self.remote.as_ref().filter(|r| r.provides(name));
        let local = self.local.iter().find(|p| p.provides(name));

        match (remote, local) {
            (None, None) => Err(KbChatError::unknown_capability(name)),
            (Some(remote), Some(local)) if self.prefer_remote => {
                match remote.execute(name, args).await {
                    Ok(result) => Ok(result),
                    Err(e) => {
                        warn!(error = %e, fallback = local.name(), "remote capability failed, falling back to local provider");
                        local.execute(name, args).await
                    }
                }
            }
            (_, Some(local)) => {
                debug!(provider = local.name(), "dispatching to local provider");
                local.execute(name, args).await
            }
            (Some(remote), None) => {
                debug!(provider = remote.name(), "dispatching to remote delegate");
                remote.execute(name, args).await.map_err(|e| match e {
                    e @ KbChatError::UpstreamUnavailable { .. } => e,
                    other => KbChatError::upstream(remote.name(), other.to_string()),
                })
            }
        }
    }

    fn dispatch_order(&self) -> impl Iterator<Item = &Arc<dyn CapabilityProvider>> {
        let remote_first = self.remote.iter().filter(|_| self.prefer_remote);
        let remote_last = self.remote.iter().filter(|_| !self.prefer_remote);
        remote_first.chain(self.local.iter()).chain(remote_last)
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let local: Vec<&str> = self.local.iter().map(|p| p.name()).collect();
        f.debug_struct("ToolRouter")
            .field("local", &local)
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .field("prefer_remote", &self.prefer_remote)
            .finish()
    }
}
