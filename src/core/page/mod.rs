mod http;

pub use http::HttpPage;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("page action timed out after {0:?}")]
    Timeout(Duration),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("element not found: {0}")]
    NotFound(String),
    #[error("unsupported page action: {0}")]
    Unsupported(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type PageResult<T> = Result<T, PageError>;

/// Browser-page capability consumed by the agent. Any automation engine can
/// sit behind it; every action carries its own timeout.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// URL of the currently loaded document.
    async fn url(&self) -> String;

    async fn navigate(&self, url: &str, timeout: Duration) -> PageResult<()>;

    async fn reload(&self, timeout: Duration) -> PageResult<()>;

    async fn is_visible(&self, selector: &str, timeout: Duration) -> bool;

    async fn click(&self, selector: &str, timeout: Duration) -> PageResult<()>;

    async fn screenshot(&self, path: &Path) -> PageResult<()>;
}

/// The two in-process recovery actions the escalation ladder needs.
#[async_trait]
pub trait PageRecovery: Send + Sync {
    /// Level A: cheap in-place refresh.
    async fn reload(&self, timeout: Duration) -> PageResult<()>;

    /// Level B: full re-navigation to the canonical target.
    async fn navigate_home(&self, timeout: Duration) -> PageResult<()>;
}

/// A page bound to the canonical target URL.
pub struct BoundPage<'a> {
    page: &'a dyn PageDriver,
    home_url: &'a str,
}

impl<'a> BoundPage<'a> {
    pub fn new(page: &'a dyn PageDriver, home_url: &'a str) -> Self {
        Self { page, home_url }
    }
}

#[async_trait]
impl PageRecovery for BoundPage<'_> {
    async fn reload(&self, timeout: Duration) -> PageResult<()> {
        self.page.reload(timeout).await
    }

    async fn navigate_home(&self, timeout: Duration) -> PageResult<()> {
        self.page.navigate(self.home_url, timeout).await
    }
}

/// Click `selector` once it is visible. Failures are logged, never raised.
pub async fn safe_click(
    page: &dyn PageDriver,
    selector: &str,
    description: &str,
    max_wait: Duration,
) -> bool {
    if !page.is_visible(selector, max_wait).await {
        tracing::warn!("Cannot click {}: not visible", description);
        return false;
    }
    match page.click(selector, max_wait).await {
        Ok(()) => {
            tracing::info!("Clicked: {}", description);
            true
        }
        Err(e) => {
            tracing::warn!("Cannot click {}: {}", description, e);
            false
        }
    }
}
