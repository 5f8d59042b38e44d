use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Best-effort alert sink. Implementations swallow their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str, attachment: Option<&Path>);
}

/// Posts alerts as JSON to a webhook. Without a URL it only logs.
pub struct WebhookNotifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.filter(|u| !u.trim().is_empty()),
            client,
        }
    }

    async fn payload(subject: &str, body: &str, attachment: Option<&Path>) -> serde_json::Value {
        let mut payload = json!({ "subject": subject, "body": body });
        if let Some(path) = attachment
            && let Ok(bytes) = tokio::fs::read(path).await
        {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "attachment".to_string());
            payload["attachment"] = json!({
                "name": name,
                "base64": base64::engine::general_purpose::STANDARD.encode(bytes),
            });
        }
        payload
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str, attachment: Option<&Path>) {
        let Some(url) = &self.url else {
            info!("Notification skipped (not configured): {}", subject);
            return;
        };
        info!("Sending notification: {}", subject);
        let payload = Self::payload(subject, body, attachment).await;
        match self.client.post(url).json(&payload).send().await {
            Ok(res) if res.status().is_success() => info!("Notification sent"),
            Ok(res) => warn!("Notification rejected with status {}", res.status()),
            Err(e) => warn!("Notification failed: {}", e),
        }
    }
}
