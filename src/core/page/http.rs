use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{PageDriver, PageError, PageResult};
use crate::core::fsutil::atomic_write;

#[derive(Default)]
struct Loaded {
    url: String,
    body: String,
}

/// Minimal `PageDriver` backed by plain HTTP requests. Navigation and reload
/// fetch the document. No script execution, no clicking.
///
/// Visibility is decided against the fetched markup: `text=` selectors and
/// plain strings are substring matches, and `tag[attr='value']` matches an
/// opening `<tag ...>` carrying that attribute. Nothing else of CSS is
/// understood, and hidden elements still count as visible.
///
/// `screenshot` writes the fetched HTML, not an image, to whatever path it is
/// given, including a `.png` one.
pub struct HttpPage {
    client: reqwest::Client,
    loaded: Mutex<Loaded>,
}

impl HttpPage {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            loaded: Mutex::new(Loaded::default()),
        })
    }

    async fn fetch(&self, url: &str, timeout: Duration) -> PageResult<()> {
        let res = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PageError::Timeout(timeout)
                } else {
                    PageError::Navigation(e.to_string())
                }
            })?;
        let status = res.status();
        if !status.is_success() {
            return Err(PageError::Navigation(format!("{} returned {}", url, status)));
        }
        let final_url = res.url().to_string();
        let body = res
            .text()
            .await
            .map_err(|e| PageError::Navigation(e.to_string()))?;
        debug!("Fetched {} ({} bytes)", final_url, body.len());
        let mut loaded = self.loaded.lock().await;
        loaded.url = final_url;
        loaded.body = body;
        Ok(())
    }
}

/// `tag[attr='value']` split into its parts. Quotes around the value are
/// optional.
fn attribute_selector(selector: &str) -> Option<(&str, &str, &str)> {
    let (tag, rest) = selector.split_once('[')?;
    let (attr, value) = rest.strip_suffix(']')?.split_once('=')?;
    let value = value.trim_matches(|c: char| c == '\'' || c == '"');
    let tag = tag.trim();
    let attr = attr.trim();
    if tag.is_empty() || attr.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((tag, attr, value))
}

fn selector_matches(selector: &str, body: &str) -> bool {
    if let Some(text) = selector.strip_prefix("text=") {
        return !text.is_empty() && body.contains(text);
    }
    let Some((tag, attr, value)) = attribute_selector(selector) else {
        return !selector.is_empty() && body.contains(selector);
    };

    let lower = body.to_ascii_lowercase();
    let open = format!("<{}", tag.to_ascii_lowercase());
    let attr = attr.to_ascii_lowercase();
    let value = value.to_ascii_lowercase();
    let wanted = [
        format!("{}=\"{}\"", attr, value),
        format!("{}='{}'", attr, value),
        format!("{}={}", attr, value),
    ];
    lower.match_indices(&open).any(|(start, _)| {
        let element = &lower[start..];
        let element = &element[..element.find('>').unwrap_or(element.len())];
        wanted.iter().any(|w| element.contains(w.as_str()))
    })
}

#[async_trait]
impl PageDriver for HttpPage {
    async fn url(&self) -> String {
        self.loaded.lock().await.url.clone()
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> PageResult<()> {
        self.fetch(url, timeout).await
    }

    async fn reload(&self, timeout: Duration) -> PageResult<()> {
        let url = self.loaded.lock().await.url.clone();
        if url.is_empty() {
            return Err(PageError::Navigation("nothing loaded yet".to_string()));
        }
        self.fetch(&url, timeout).await
    }

    async fn is_visible(&self, selector: &str, _timeout: Duration) -> bool {
        selector_matches(selector, &self.loaded.lock().await.body)
    }

    async fn click(&self, _selector: &str, _timeout: Duration) -> PageResult<()> {
        Err(PageError::Unsupported("click"))
    }

    async fn screenshot(&self, path: &Path) -> PageResult<()> {
        let body = self.loaded.lock().await.body.clone();
        atomic_write(path, body).map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(())
    }
}
