use anyhow::Result;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::config::VigilConfig;
use crate::core::fsutil::atomic_write;
use crate::core::subscription::SubscriptionUpdater;

/// Structured commands older than this are dropped.
pub const COMMAND_EXPIRY: Duration = Duration::from_secs(60);
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const UPDATE_SUBSCRIBE: &str = "update_subscribe";

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCommand {
    pub name: String,
    /// Unix seconds, when the command carried a timestamp.
    pub issued_at: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePoll {
    /// Non-empty command with no built-in handler.
    pub custom_command: Option<String>,
    /// A pause just ended; the caller should run now rather than sleep.
    pub resume_immediately: bool,
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Parse command file content: `{"cmd": "...", "ts": 1700000000}` or a bare
/// token. Returns `None` for expired commands and non-object JSON.
pub fn parse_command(raw: &str, now_unix: f64) -> Option<RemoteCommand> {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return Some(RemoteCommand {
            name: raw.trim().to_string(),
            issued_at: None,
        });
    };
    let Value::Object(obj) = value else {
        warn!("Remote command is not a JSON object, ignoring");
        return None;
    };

    let name = obj
        .get("cmd")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let ts = obj.get("ts").and_then(Value::as_f64).unwrap_or(0.0);

    if ts != 0.0 && now_unix - ts > COMMAND_EXPIRY.as_secs_f64() {
        info!(
            "Remote command expired ({}s ago), ignoring",
            (now_unix - ts) as i64
        );
        return None;
    }

    Some(RemoteCommand {
        name,
        issued_at: (ts != 0.0).then_some(ts),
    })
}

/// File-based operator channel: a one-shot command file and a pause lock.
pub struct RemoteControl {
    command_file: PathBuf,
    pause_file: PathBuf,
    poll_interval: Duration,
    updater: Option<Arc<SubscriptionUpdater>>,
}

impl RemoteControl {
    pub fn new(command_file: PathBuf, pause_file: PathBuf) -> Self {
        Self {
            command_file,
            pause_file,
            poll_interval: PAUSE_POLL_INTERVAL,
            updater: None,
        }
    }

    pub fn from_config(config: &VigilConfig) -> Self {
        Self::new(config.command_file(), config.pause_lock_file())
    }

    pub fn with_updater(mut self, updater: Arc<SubscriptionUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Consume a pending command, then wait out any pause.
    pub async fn poll(&self) -> RemotePoll {
        let mut outcome = RemotePoll::default();

        if let Some(command) = self.take_command().await {
            outcome.custom_command = self.dispatch(command).await;
        }

        if tokio::fs::try_exists(&self.pause_file).await.unwrap_or(false) {
            info!("Detected {}, pausing...", self.pause_file.display());
            while tokio::fs::try_exists(&self.pause_file).await.unwrap_or(false) {
                tokio::time::sleep(self.poll_interval).await;
            }
            info!("Pause ended, resuming");
            outcome.resume_immediately = true;
        }

        outcome
    }

    /// Read and delete the command file. Each write is seen at most once.
    async fn take_command(&self) -> Option<RemoteCommand> {
        let raw = match tokio::fs::read_to_string(&self.command_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read {}: {}", self.command_file.display(), e);
                return None;
            }
        };
        if let Err(e) = tokio::fs::remove_file(&self.command_file).await {
            warn!("Failed to remove {}: {}", self.command_file.display(), e);
        }
        parse_command(raw.trim(), unix_now())
    }

    async fn dispatch(&self, command: RemoteCommand) -> Option<String> {
        match command.name.as_str() {
            "" => None,
            UPDATE_SUBSCRIBE => {
                info!("Remote command: {}", UPDATE_SUBSCRIBE);
                match &self.updater {
                    Some(updater) => {
                        let ok = updater.update().await;
                        info!(
                            "Subscription update: {}",
                            if ok { "success" } else { "failed" }
                        );
                    }
                    None => warn!("No subscription updater attached, ignoring"),
                }
                None
            }
            other => {
                info!("Received remote command: {}", other);
                Some(other.to_string())
            }
        }
    }

    /// Operator side: leave a timestamped command for the agent.
    pub fn send_command(&self, name: &str) -> Result<()> {
        let payload = json!({ "cmd": name, "ts": unix_now() as i64 });
        atomic_write(&self.command_file, payload.to_string())
    }

    pub fn pause(&self) -> Result<()> {
        atomic_write(&self.pause_file, "")
    }

    /// Returns false when no pause was in effect.
    pub fn resume(&self) -> Result<bool> {
        match std::fs::remove_file(&self.pause_file) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause_file.exists()
    }
}
