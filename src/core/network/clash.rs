use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ControlPlane, ProxyGroup};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout the control plane applies to each delay probe, in ms.
const DELAY_TIMEOUT_MS: u64 = 4000;

#[derive(Debug, Deserialize)]
struct ProxiesResponse {
    #[serde(default)]
    proxies: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ProxyInfo {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    now: Option<String>,
    #[serde(default)]
    all: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct DelayResponse {
    #[serde(default)]
    delay: u32,
}

/// REST client for a Clash-compatible controller on the loopback interface.
pub struct ClashApi {
    base_url: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl ClashApi {
    pub fn new(base_url: impl Into<String>, secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.filter(|s| !s.is_empty()),
            client,
        }
    }

    fn proxy_url(&self, name: &str) -> String {
        format!("{}/proxies/{}", self.base_url, urlencoding::encode(name))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.secret {
            Some(secret) => builder.bearer_auth(secret),
            None => builder,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> anyhow::Result<T> {
        let res = builder.send().await?.error_for_status()?;
        Ok(res.json::<T>().await?)
    }
}

#[async_trait]
impl ControlPlane for ClashApi {
    async fn groups(&self) -> Option<Vec<ProxyGroup>> {
        let url = format!("{}/proxies", self.base_url);
        let body: ProxiesResponse = match self
            .get_json(self.request(reqwest::Method::GET, &url))
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to get proxy groups: {}", e);
                return None;
            }
        };
        let groups = body
            .proxies
            .into_iter()
            .filter_map(|(name, value)| {
                let info: ProxyInfo = serde_json::from_value(value).ok()?;
                Some(ProxyGroup {
                    name,
                    kind: info.kind,
                    now: info.now,
                    all: info.all.unwrap_or_default(),
                })
            })
            .collect();
        Some(groups)
    }

    async fn group_nodes(&self, group: &str) -> Vec<String> {
        let url = self.proxy_url(group);
        match self
            .get_json::<ProxyInfo>(self.request(reqwest::Method::GET, &url))
            .await
        {
            Ok(info) => info.all.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to get nodes of {}: {}", group, e);
                Vec::new()
            }
        }
    }

    async fn delay(&self, node: &str, url: &str) -> Option<u32> {
        let endpoint = format!("{}/delay", self.proxy_url(node));
        let timeout = DELAY_TIMEOUT_MS.to_string();
        let builder = self
            .request(reqwest::Method::GET, &endpoint)
            .query(&[("timeout", timeout.as_str()), ("url", url)]);
        match self.get_json::<DelayResponse>(builder).await {
            Ok(res) if res.delay > 0 => Some(res.delay),
            Ok(_) => None,
            Err(e) => {
                debug!("Delay probe {} via {} failed: {}", url, node, e);
                None
            }
        }
    }

    async fn select(&self, group: &str, node: &str) -> bool {
        let url = self.proxy_url(group);
        let res = self
            .request(reqwest::Method::PUT, &url)
            .json(&json!({ "name": node }))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match res {
            Ok(_) => {
                info!("Switched {} to: {}", group, node);
                true
            }
            Err(e) => {
                warn!("Failed to switch {} to {}: {}", group, node, e);
                false
            }
        }
    }

    async fn reload_config(&self, path: &Path) -> bool {
        let url = format!("{}/configs", self.base_url);
        let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let res = self
            .request(reqwest::Method::PUT, &url)
            .query(&[("force", "true")])
            .json(&json!({ "path": abs.to_string_lossy() }))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match res {
            Ok(_) => {
                info!("Control plane reloaded config from {}", abs.display());
                true
            }
            Err(e) => {
                warn!("Failed to reload control plane config: {}", e);
                false
            }
        }
    }
}
