//! Local clock and host information.

use async_trait::async_trait;
use chrono::Local;
use kbchat_shared::{KbChatError, Result};

use crate::{Arguments, Capability, CapabilityProvider};

pub struct SystemProvider;

impl SystemProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn current_time() -> String {
    format!("Current time: {}", Local::now().format("%Y-%m-%d %H:%M:%S %Z"))
}

fn system_info() -> Result<String> {
    let cwd = std::env::current_dir().map_err(|e| KbChatError::io(".", e))?;
    Ok(format!(
        "System information:\nOS: {} ({})\nArchitecture: {}\nCurrent directory: {}",
        std::env::consts::OS,
        std::env::consts::FAMILY,
        std::env::consts::ARCH,
        cwd.display()
    ))
}

#[async_trait]
impl CapabilityProvider for SystemProvider {
    fn name(&self) -> &str {
        "system"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::new("get_time", "Get the current local date and time"),
            Capability::new("get_system_info", "Get operating system and host information"),
        ]
    }

    async fn execute(&self, capability: &str, _args: &Arguments) -> Result<String> {
        match capability {
            "get_time" => Ok(current_time()),
            "get_system_info" => system_info(),
            other => Err(KbChatError::unknown_capability(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_time_and_host() {
        let provider = SystemProvider::new();

        let time = provider.execute("get_time", &Arguments::new()).await.unwrap();
        assert!(time.starts_with("Current time: "));

        let info = provider.execute("get_system_info", &Arguments::new()).await.unwrap();
        assert!(info.contains(std::env::consts::ARCH));
        assert!(info.contains("Current directory:"));

        assert!(provider.execute("get_weather", &Arguments::new()).await.is_err());
    }
}
