mod clash;
mod failover;

pub use clash::ClashApi;
pub use failover::{FailoverController, HealthProber, HealthReport};

use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::Path;

/// Reference endpoints probed through a node. Independent of the target site.
pub const REFERENCE_ENDPOINTS: [&str; 3] = [
    "https://www.google.com",
    "https://1.1.1.1",
    "https://www.cloudflare.com",
];

pub const EXCELLENT_BELOW_MS: u32 = 300;
pub const HEALTHY_BELOW_MS: u32 = 800;
pub const DEGRADED_BELOW_MS: u32 = 1500;

/// Latency reported for a node judged unreachable.
pub const UNREACHABLE_LATENCY_MS: i64 = 9999;
/// Latency reported when no active node could be resolved.
pub const UNKNOWN_LATENCY_MS: i64 = -1;

/// Pseudo-nodes that are never failover candidates.
pub const SYNTHETIC_NODES: [&str; 3] = ["DIRECT", "REJECT", "GLOBAL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Excellent,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn desirability(self) -> u8 {
        match self {
            HealthStatus::Excellent => 4,
            HealthStatus::Healthy => 3,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 1,
            HealthStatus::Unknown => 0,
        }
    }

    pub fn is_healthy(self) -> bool {
        matches!(self, HealthStatus::Excellent | HealthStatus::Healthy)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Excellent => "excellent",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    fn from_latency(ms: u32) -> Self {
        if ms < EXCELLENT_BELOW_MS {
            HealthStatus::Excellent
        } else if ms < HEALTHY_BELOW_MS {
            HealthStatus::Healthy
        } else if ms < DEGRADED_BELOW_MS {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

impl PartialOrd for HealthStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by desirability: `Excellent` is the greatest.
impl Ord for HealthStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.desirability().cmp(&other.desirability())
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One health-check cycle for one node: a latency per endpoint, `None` when
/// the probe failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSample {
    pub node: String,
    pub latencies: Vec<(String, Option<u32>)>,
}

/// Median of a non-empty sample. Even-sized samples average the two middle
/// values (integer division).
///
/// Neither the lower nor the upper middle value works for two survivors of
/// three probes: `[250, 900]` must rate Healthy, which is 575 ms here, while
/// 250 ms would read Excellent and 900 ms Degraded.
pub fn median(values: &[u32]) -> Option<u32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some(((sorted[mid - 1] as u64 + sorted[mid] as u64) / 2) as u32)
    }
}

/// Representative latency and status of a sample.
///
/// Two or more failed probes mean the node is unhealthy, whatever the
/// surviving probe measured.
pub fn classify(sample: &HealthSample) -> (i64, HealthStatus) {
    let ok: Vec<u32> = sample.latencies.iter().filter_map(|(_, ms)| *ms).collect();
    let failed = sample.latencies.len() - ok.len();

    if failed >= 2 {
        return (UNREACHABLE_LATENCY_MS, HealthStatus::Unhealthy);
    }

    match median(&ok) {
        Some(ms) => (ms as i64, HealthStatus::from_latency(ms)),
        None => (UNREACHABLE_LATENCY_MS, HealthStatus::Unhealthy),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyGroup {
    pub name: String,
    pub kind: String,
    pub now: Option<String>,
    pub all: Vec<String>,
}

impl ProxyGroup {
    pub fn is_selector(&self) -> bool {
        self.kind == "Selector"
    }
}

/// Local proxy control plane: node topology, latency probes, selection.
/// Implementations report transport and parse failures as "no data".
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Every proxy entry in API order. `None` when the API is unreachable.
    async fn groups(&self) -> Option<Vec<ProxyGroup>>;

    /// Members of `group`, unfiltered. Empty on error.
    async fn group_nodes(&self, group: &str) -> Vec<String>;

    /// Delay through `node` to `url`, in ms. `None` on failure or timeout.
    async fn delay(&self, node: &str, url: &str) -> Option<u32>;

    async fn select(&self, group: &str, node: &str) -> bool;

    /// Ask the control plane to reload its configuration from `path`.
    async fn reload_config(&self, path: &Path) -> bool;
}

/// The group whose active member is "the current node".
pub fn primary_group<'a>(groups: &'a [ProxyGroup], preferred: Option<&str>) -> Option<&'a ProxyGroup> {
    if let Some(name) = preferred
        && let Some(group) = groups.iter().find(|g| g.name == name)
    {
        return Some(group);
    }
    groups.iter().find(|g| g.is_selector())
}

pub fn is_synthetic(node: &str) -> bool {
    SYNTHETIC_NODES.contains(&node)
}
