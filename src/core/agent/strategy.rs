use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::core::page::{PageDriver, safe_click};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Unknown,
    Online,
    Offline,
    Pending,
    Error,
}

/// Target-specific business logic driven by the agent loop.
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn detect_state(&self, page: &dyn PageDriver) -> BotState;

    /// Primary action, taken when the page reports `Offline`.
    async fn go_online(&self, page: &dyn PageDriver) -> Result<()>;

    /// Operator command with no built-in handler.
    async fn on_command(&self, _page: &dyn PageDriver, command: &str) {
        info!("No handler for remote command '{}'", command);
    }
}

/// Placeholder strategy: state from marker text, optional button to click.
pub struct DemoStrategy {
    pub online_marker: String,
    pub offline_marker: String,
    pub action_selector: Option<String>,
}

impl Default for DemoStrategy {
    fn default() -> Self {
        Self {
            online_marker: "text=status: online".to_string(),
            offline_marker: "text=status: offline".to_string(),
            action_selector: None,
        }
    }
}

#[async_trait]
impl Strategy for DemoStrategy {
    async fn detect_state(&self, page: &dyn PageDriver) -> BotState {
        let probe = Duration::from_millis(1000);
        if page.url().await.is_empty() {
            return BotState::Unknown;
        }
        if page.is_visible(&self.online_marker, probe).await {
            BotState::Online
        } else if page.is_visible(&self.offline_marker, probe).await {
            BotState::Offline
        } else {
            BotState::Unknown
        }
    }

    async fn go_online(&self, page: &dyn PageDriver) -> Result<()> {
        let Some(selector) = &self.action_selector else {
            info!("Primary action not configured, nothing to do");
            return Ok(());
        };
        if safe_click(page, selector, "primary action", Duration::from_secs(5)).await {
            Ok(())
        } else {
            anyhow::bail!("primary action '{}' could not be clicked", selector)
        }
    }
}
