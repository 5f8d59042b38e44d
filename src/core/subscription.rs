use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::core::config::VigilConfig;
use crate::core::fsutil::{atomic_write_async, safe_read_json};
use crate::core::network::ControlPlane;

pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
/// Characters kept when a URL cannot be parsed for masking.
const MASK_VISIBLE_PREFIX_CHARS: usize = 25;
/// Any of these in the body marks a supported node-list document.
const PROFILE_MARKERS: [&[u8]; 2] = [b"proxies:", b"port:"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub last_update: String,
    pub success: bool,
    pub url_preview: String,
    pub error: Option<String>,
}

/// Hide query parameter values (and credentials) of a URL for display.
pub fn mask_url(url: &str) -> String {
    if url.is_empty() {
        return "(empty)".to_string();
    }
    let Ok(parsed) = url::Url::parse(url) else {
        return mask_unparsed(url);
    };

    let mut base = format!("{}://", parsed.scheme());
    if let Some(host) = parsed.host_str() {
        base.push_str(host);
    }
    if let Some(port) = parsed.port() {
        base.push_str(&format!(":{}", port));
    }
    base.push_str(parsed.path());

    let mut keys: Vec<String> = Vec::new();
    for (key, _) in parsed.query_pairs() {
        let key = key.into_owned();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    if keys.is_empty() {
        return base;
    }
    let masked: Vec<String> = keys
        .iter()
        .map(|k| format!("{}=***", url::form_urlencoded::byte_serialize(k.as_bytes()).collect::<String>()))
        .collect();
    format!("{}?{}", base, masked.join("&"))
}

/// Fallback for strings `url` rejects, e.g. a missing scheme. Same output
/// shape: fragment and credentials dropped, every query value replaced.
fn mask_unparsed(raw: &str) -> String {
    let raw = raw.split('#').next().unwrap_or_default();
    let (base, query) = match raw.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (raw, None),
    };
    let base = match base.split_once('@') {
        Some((userinfo, rest)) if !userinfo.contains('/') => rest,
        _ => base,
    };

    let mut masked = if base.chars().count() > MASK_VISIBLE_PREFIX_CHARS {
        let prefix: String = base.chars().take(MASK_VISIBLE_PREFIX_CHARS).collect();
        format!("{}...***", prefix)
    } else {
        base.to_string()
    };

    let mut keys: Vec<&str> = Vec::new();
    for pair in query.unwrap_or_default().split('&') {
        // A bare token with no `=` is a value, not a key.
        let key = match pair.split_once('=') {
            Some((key, _)) => key,
            None if pair.is_empty() => continue,
            None => "",
        };
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    if !keys.is_empty() {
        let pairs: Vec<String> = keys
            .iter()
            .map(|k| if k.is_empty() { "***".to_string() } else { format!("{}=***", k) })
            .collect();
        masked.push('?');
        masked.push_str(&pairs.join("&"));
    }
    masked
}

pub fn looks_like_profile(content: &[u8]) -> bool {
    PROFILE_MARKERS
        .iter()
        .any(|marker| content.windows(marker.len()).any(|w| w == *marker))
}

pub fn read_status(path: &Path) -> Option<SubscriptionStatus> {
    safe_read_json(path)
}

/// Fetches the remote node list and has the control plane reload it.
///
/// Calls within [`MIN_UPDATE_INTERVAL`] of the previous attempt, and calls
/// made while another update is in flight, return `true` without doing
/// anything.
pub struct SubscriptionUpdater {
    plane: Arc<dyn ControlPlane>,
    client: reqwest::Client,
    default_url: Option<String>,
    url_file: PathBuf,
    status_file: PathBuf,
    profile_file: PathBuf,
    min_interval: Duration,
    lock: Mutex<()>,
    epoch: Instant,
    /// Millis since `epoch` of the last attempt, plus one. Zero means never.
    last_attempt: AtomicU64,
}

impl SubscriptionUpdater {
    pub fn new(
        plane: Arc<dyn ControlPlane>,
        default_url: Option<String>,
        url_file: PathBuf,
        status_file: PathBuf,
        profile_file: PathBuf,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            plane,
            client,
            default_url: default_url.filter(|u| !u.trim().is_empty()),
            url_file,
            status_file,
            profile_file,
            min_interval: MIN_UPDATE_INTERVAL,
            lock: Mutex::new(()),
            epoch: Instant::now(),
            last_attempt: AtomicU64::new(0),
        }
    }

    pub fn from_config(plane: Arc<dyn ControlPlane>, config: &VigilConfig) -> Self {
        Self::new(
            plane,
            config.subscription.default_url.clone(),
            config.subscribe_url_file(),
            config.subscribe_status_file(),
            config.profile_file(),
        )
    }

    /// Override the debounce window.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn status_file(&self) -> &Path {
        &self.status_file
    }

    /// Subscription URL, re-read on every call. The override file wins over
    /// the configured default.
    pub async fn resolve_url(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.url_file).await {
            Ok(content) => {
                let url = content.trim();
                if !url.is_empty() {
                    return Some(url.to_string());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to read {}: {}", self.url_file.display(), e),
        }
        self.default_url.clone()
    }

    fn since_last_attempt(&self) -> Option<Duration> {
        let stamp = self.last_attempt.load(Ordering::SeqCst);
        if stamp == 0 {
            return None;
        }
        let now = self.epoch.elapsed().as_millis() as u64 + 1;
        Some(Duration::from_millis(now.saturating_sub(stamp)))
    }

    fn stamp_attempt(&self) {
        let now = self.epoch.elapsed().as_millis() as u64 + 1;
        self.last_attempt.store(now, Ordering::SeqCst);
    }

    pub async fn update(&self) -> bool {
        if let Some(elapsed) = self.since_last_attempt()
            && elapsed < self.min_interval
        {
            info!(
                "Subscription updated {}s ago, skipping",
                elapsed.as_secs()
            );
            return true;
        }

        let Ok(_guard) = self.lock.try_lock() else {
            info!("Subscription update already in progress, skipping");
            return true;
        };

        let Some(url) = self.resolve_url().await else {
            warn!("No subscription URL configured");
            self.write_status(false, "", Some("No subscription URL configured".to_string()))
                .await;
            return false;
        };

        self.stamp_attempt();
        info!("Downloading subscription: {}", mask_url(&url));

        match self.fetch_and_apply(&url).await {
            Ok(()) => {
                info!("Subscription updated");
                self.write_status(true, &url, None).await;
                true
            }
            Err(e) => {
                warn!("Subscription update failed: {}", e);
                self.write_status(false, &url, Some(e)).await;
                false
            }
        }
    }

    async fn fetch_and_apply(&self, url: &str) -> Result<(), String> {
        let content = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?
            .bytes()
            .await
            .map_err(fetch_error)?;

        if !looks_like_profile(&content) {
            return Err("Invalid content".to_string());
        }

        atomic_write_async(&self.profile_file, &content)
            .await
            .map_err(|e| e.to_string())?;
        if !self.plane.reload_config(&self.profile_file).await {
            return Err("Control plane rejected config reload".to_string());
        }
        Ok(())
    }

    async fn write_status(&self, success: bool, url: &str, error: Option<String>) {
        let status = SubscriptionStatus {
            last_update: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            success,
            url_preview: mask_url(url),
            error,
        };
        let json = match serde_json::to_string_pretty(&status) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode subscription status: {}", e);
                return;
            }
        };
        if let Err(e) = atomic_write_async(&self.status_file, json).await {
            warn!("Failed to write subscription status: {}", e);
        }
    }
}

/// reqwest errors quote the request URL, query string included.
fn fetch_error(e: reqwest::Error) -> String {
    e.without_url().to_string()
}
