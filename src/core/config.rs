use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const CONFIG_FILE: &str = "vigil.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub work_dir: PathBuf,

    #[serde(default = "default_target_url")]
    pub target_url: String,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub subscription: SubscriptionConfig,

    #[serde(default)]
    pub files: FileNames,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub notify_webhook: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// Shared secret sent as a bearer token to the control plane.
    #[serde(default)]
    pub secret: Option<String>,

    /// Selector group treated as primary. First `Selector` group when unset.
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SubscriptionConfig {
    #[serde(default)]
    pub default_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileNames {
    #[serde(default = "default_command_file")]
    pub command: String,
    #[serde(default = "default_pause_file")]
    pub pause_lock: String,
    #[serde(default = "default_sub_url_file")]
    pub subscribe_url: String,
    #[serde(default = "default_sub_status_file")]
    pub subscribe_status: String,
    #[serde(default = "default_profile_file")]
    pub profile: String,
    #[serde(default = "default_monitor_file")]
    pub monitor_image: String,
    #[serde(default = "default_login_file")]
    pub login_image: String,
    #[serde(default = "default_log_file")]
    pub log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Minimum wait between strategy cycles, in minutes.
    #[serde(default = "default_min_wait")]
    pub min_wait_minutes: u64,
    /// Maximum wait between strategy cycles, in minutes.
    #[serde(default = "default_max_wait")]
    pub max_wait_minutes: u64,
    #[serde(default = "default_login_timeout")]
    pub login_timeout_minutes: u64,
}

fn default_target_url() -> String {
    "https://example.com".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_proxy_port() -> u16 {
    9090
}
fn default_command_file() -> String {
    "command.txt".to_string()
}
fn default_pause_file() -> String {
    "pause.lock".to_string()
}
fn default_sub_url_file() -> String {
    "subscribe_url.txt".to_string()
}
fn default_sub_status_file() -> String {
    "subscribe_status.json".to_string()
}
fn default_profile_file() -> String {
    "profile.yaml".to_string()
}
fn default_monitor_file() -> String {
    "monitor.png".to_string()
}
fn default_login_file() -> String {
    "login_qr.png".to_string()
}
fn default_log_file() -> String {
    "vigil.log".to_string()
}
fn default_min_wait() -> u64 {
    5
}
fn default_max_wait() -> u64 {
    45
}
fn default_login_timeout() -> u64 {
    30
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_proxy_port(),
            secret: None,
            group: None,
        }
    }
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            command: default_command_file(),
            pause_lock: default_pause_file(),
            subscribe_url: default_sub_url_file(),
            subscribe_status: default_sub_status_file(),
            profile: default_profile_file(),
            monitor_image: default_monitor_file(),
            login_image: default_login_file(),
            log: default_log_file(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_wait_minutes: default_min_wait(),
            max_wait_minutes: default_max_wait(),
            login_timeout_minutes: default_login_timeout(),
        }
    }
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::new(),
            target_url: default_target_url(),
            proxy: ProxyConfig::default(),
            subscription: SubscriptionConfig::default(),
            files: FileNames::default(),
            timing: TimingConfig::default(),
            notify_webhook: None,
            log_level: default_log_level(),
        }
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

impl VigilConfig {
    /// Load `vigil.toml` from `work_dir` (defaults when absent), then apply
    /// environment overrides from `env`.
    pub fn load<F>(work_dir: &Path, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = work_dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: config_path.clone(),
                source,
            })?
        } else {
            info!("No {} found, using defaults.", CONFIG_FILE);
            Self::default()
        };
        config.work_dir = work_dir.to_path_buf();
        config.apply_env(env)?;
        if config.timing.max_wait_minutes < config.timing.min_wait_minutes {
            config.timing.max_wait_minutes = config.timing.min_wait_minutes;
        }
        Ok(config)
    }

    /// Load from the process environment, reading `.env` first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let work_dir = std::env::var("VIGIL_WORK_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::load(&work_dir, |key| std::env::var(key).ok())
    }

    fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TARGET_URL") {
            self.target_url = v;
        }
        if let Some(v) = get("PROXY_PORT") {
            self.proxy.port = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PROXY_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("PROXY_SECRET") {
            self.proxy.secret = Some(v);
        }
        if let Some(v) = get("PROXY_GROUP") {
            self.proxy.group = Some(v);
        }
        if let Some(v) = get("SUB_URL") {
            self.subscription.default_url = Some(v);
        }
        if let Some(v) = get("MIN_WAIT") {
            self.timing.min_wait_minutes =
                v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: "MIN_WAIT",
                    value: v.clone(),
                })?;
        }
        if let Some(v) = get("MAX_WAIT") {
            self.timing.max_wait_minutes =
                v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    key: "MAX_WAIT",
                    value: v.clone(),
                })?;
        }
        if let Some(v) = get("NOTIFY_WEBHOOK") {
            self.notify_webhook = Some(v);
        }
        if let Some(v) = get("VIGIL_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    pub fn command_file(&self) -> PathBuf {
        self.path(&self.files.command)
    }
    pub fn pause_lock_file(&self) -> PathBuf {
        self.path(&self.files.pause_lock)
    }
    pub fn subscribe_url_file(&self) -> PathBuf {
        self.path(&self.files.subscribe_url)
    }
    pub fn subscribe_status_file(&self) -> PathBuf {
        self.path(&self.files.subscribe_status)
    }
    pub fn profile_file(&self) -> PathBuf {
        self.path(&self.files.profile)
    }
    pub fn monitor_image_file(&self) -> PathBuf {
        self.path(&self.files.monitor_image)
    }
    pub fn login_image_file(&self) -> PathBuf {
        self.path(&self.files.login_image)
    }
    pub fn log_file(&self) -> PathBuf {
        self.path(&self.files.log)
    }

    pub fn api_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.proxy.port)
    }

    pub fn min_wait(&self) -> Duration {
        minutes(self.timing.min_wait_minutes)
    }
    pub fn max_wait(&self) -> Duration {
        minutes(self.timing.max_wait_minutes)
    }
    pub fn login_timeout(&self) -> Duration {
        minutes(self.timing.login_timeout_minutes)
    }
}
