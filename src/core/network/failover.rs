use std::sync::Arc;
use tracing::{info, warn};

use super::{
    ControlPlane, HEALTHY_BELOW_MS, HealthSample, HealthStatus, REFERENCE_ENDPOINTS,
    UNKNOWN_LATENCY_MS, classify, is_synthetic, primary_group,
};

/// Probes a node against every reference endpoint.
pub struct HealthProber {
    plane: Arc<dyn ControlPlane>,
    endpoints: Vec<String>,
}

impl HealthProber {
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self::with_endpoints(
            plane,
            REFERENCE_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_endpoints(plane: Arc<dyn ControlPlane>, endpoints: Vec<String>) -> Self {
        Self { plane, endpoints }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub async fn probe(&self, node: &str) -> HealthSample {
        let mut latencies = Vec::with_capacity(self.endpoints.len());
        for url in &self.endpoints {
            let latency = self.plane.delay(node, url).await;
            match latency {
                Some(ms) => info!("  {}: {}ms", url, ms),
                None => info!("  {}: failed", url),
            }
            latencies.push((url.clone(), latency));
        }
        HealthSample {
            node: node.to_string(),
            latencies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub node: String,
    pub latency_ms: i64,
    pub status: HealthStatus,
    pub healthy: bool,
}

impl HealthReport {
    fn unknown() -> Self {
        Self {
            node: "Unknown".to_string(),
            latency_ms: UNKNOWN_LATENCY_MS,
            status: HealthStatus::Unknown,
            healthy: false,
        }
    }
}

pub struct FailoverController {
    plane: Arc<dyn ControlPlane>,
    prober: HealthProber,
    preferred_group: Option<String>,
}

impl FailoverController {
    pub fn new(plane: Arc<dyn ControlPlane>, preferred_group: Option<String>) -> Self {
        let prober = HealthProber::new(plane.clone());
        Self::with_prober(plane, prober, preferred_group)
    }

    pub fn with_prober(
        plane: Arc<dyn ControlPlane>,
        prober: HealthProber,
        preferred_group: Option<String>,
    ) -> Self {
        Self {
            plane,
            prober,
            preferred_group,
        }
    }

    /// Active node of the primary selector group, if one can be resolved.
    pub async fn current_node(&self) -> Option<String> {
        let groups = self.plane.groups().await?;
        primary_group(&groups, self.preferred_group.as_deref())?
            .now
            .clone()
            .filter(|n| !n.is_empty())
    }

    pub async fn check_health(&self) -> HealthReport {
        let Some(node) = self.current_node().await else {
            warn!("Health check: no active node resolved");
            return HealthReport::unknown();
        };
        info!("Health check: current node {}", node);

        let sample = self.prober.probe(&node).await;
        let (latency_ms, status) = classify(&sample);
        info!("Health check result: {}ms, {}", latency_ms, status);

        HealthReport {
            node,
            latency_ms,
            status,
            healthy: status.is_healthy(),
        }
    }

    /// Switch the first selector group that has a responsive alternative.
    /// Each candidate gets one probe against the first reference endpoint.
    pub async fn try_fix(&self) -> bool {
        info!("Network fix: looking for a healthy node");
        let Some(groups) = self.plane.groups().await else {
            return false;
        };
        let Some(probe_url) = self.prober.endpoints().first() else {
            return false;
        };

        for group in groups.iter().filter(|g| g.is_selector()) {
            let nodes = self.plane.group_nodes(&group.name).await;
            let current = group.now.as_deref();

            for node in nodes
                .iter()
                .filter(|n| !is_synthetic(n) && Some(n.as_str()) != current)
            {
                info!("Network fix: trying {}", node);
                let Some(latency) = self.plane.delay(node, probe_url).await else {
                    continue;
                };
                if latency < HEALTHY_BELOW_MS && self.plane.select(&group.name, node).await {
                    info!("Network fix: switched {} to {} ({}ms)", group.name, node, latency);
                    return true;
                }
            }
        }

        warn!("Network fix: no healthy node found");
        false
    }

    /// Check health and fail over when unhealthy. True when the network is
    /// usable afterwards.
    pub async fn ensure_healthy(&self) -> bool {
        let report = self.check_health().await;
        info!(
            "Network: node {}, latency {}ms, healthy {}",
            report.node, report.latency_ms, report.healthy
        );
        if report.healthy {
            return true;
        }
        warn!("Network unhealthy, attempting to fix");
        if self.try_fix().await {
            info!("Network fixed");
            true
        } else {
            warn!("Network fix failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::network::ProxyGroup;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePlane {
        groups: Option<Vec<ProxyGroup>>,
        members: HashMap<String, Vec<String>>,
        delays: HashMap<(String, String), u32>,
        reject_select: Vec<String>,
        probes: Mutex<Vec<(String, String)>>,
        selected: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ControlPlane for FakePlane {
        async fn groups(&self) -> Option<Vec<ProxyGroup>> {
            self.groups.clone()
        }

        async fn group_nodes(&self, group: &str) -> Vec<String> {
            self.members.get(group).cloned().unwrap_or_default()
        }

        async fn delay(&self, node: &str, url: &str) -> Option<u32> {
            self.probes
                .lock()
                .unwrap()
                .push((node.to_string(), url.to_string()));
            self.delays.get(&(node.to_string(), url.to_string())).copied()
        }

        async fn select(&self, group: &str, node: &str) -> bool {
            if self.reject_select.iter().any(|n| n == node) {
                return false;
            }
            self.selected
                .lock()
                .unwrap()
                .push((group.to_string(), node.to_string()));
            true
        }

        async fn reload_config(&self, _path: &Path) -> bool {
            true
        }
    }

    fn selector(name: &str, now: &str, all: &[&str]) -> ProxyGroup {
        ProxyGroup {
            name: name.to_string(),
            kind: "Selector".to_string(),
            now: Some(now.to_string()),
            all: all.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn plane_with(groups: Vec<ProxyGroup>) -> FakePlane {
        let members = groups
            .iter()
            .map(|g| (g.name.clone(), g.all.clone()))
            .collect();
        FakePlane {
            groups: Some(groups),
            members,
            ..Default::default()
        }
    }

    fn delay(plane: &mut FakePlane, node: &str, url: &str, ms: u32) {
        plane.delays.insert((node.to_string(), url.to_string()), ms);
    }

    #[tokio::test]
    async fn check_health_reports_unknown_without_active_node() {
        let plane = Arc::new(FakePlane::default());
        let controller = FailoverController::new(plane, None);
        let report = controller.check_health().await;
        assert_eq!(report.node, "Unknown");
        assert_eq!(report.latency_ms, -1);
        assert!(!report.healthy);
    }

    #[tokio::test]
    async fn check_health_probes_every_endpoint_of_current_node() {
        let mut plane = plane_with(vec![selector("Proxy", "hk-01", &["hk-01", "jp-01"])]);
        delay(&mut plane, "hk-01", REFERENCE_ENDPOINTS[0], 120);
        delay(&mut plane, "hk-01", REFERENCE_ENDPOINTS[1], 180);
        delay(&mut plane, "hk-01", REFERENCE_ENDPOINTS[2], 900);
        let plane = Arc::new(plane);
        let controller = FailoverController::new(plane.clone(), None);

        let report = controller.check_health().await;
        assert_eq!(report.node, "hk-01");
        assert_eq!(report.latency_ms, 180);
        assert_eq!(report.status, HealthStatus::Excellent);
        assert!(report.healthy);
        assert_eq!(plane.probes.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn degraded_node_is_not_healthy() {
        let mut plane = plane_with(vec![selector("Proxy", "slow", &["slow"])]);
        for url in REFERENCE_ENDPOINTS {
            delay(&mut plane, "slow", url, 1000);
        }
        let controller = FailoverController::new(Arc::new(plane), None);
        let report = controller.check_health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(!report.healthy);
    }

    #[tokio::test]
    async fn try_fix_switches_to_first_fast_candidate() {
        let mut plane = plane_with(vec![selector(
            "Proxy",
            "hk-01",
            &["DIRECT", "hk-01", "jp-01", "sg-01", "us-01"],
        )]);
        delay(&mut plane, "hk-01", REFERENCE_ENDPOINTS[0], 50);
        delay(&mut plane, "jp-01", REFERENCE_ENDPOINTS[0], 950);
        delay(&mut plane, "sg-01", REFERENCE_ENDPOINTS[0], 400);
        delay(&mut plane, "us-01", REFERENCE_ENDPOINTS[0], 100);
        let plane = Arc::new(plane);
        let controller = FailoverController::new(plane.clone(), None);

        assert!(controller.try_fix().await);
        assert_eq!(
            *plane.selected.lock().unwrap(),
            vec![("Proxy".to_string(), "sg-01".to_string())]
        );
        let probed: Vec<String> = plane
            .probes
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect();
        assert_eq!(probed, vec!["jp-01", "sg-01"]);
        assert!(
            plane
                .probes
                .lock()
                .unwrap()
                .iter()
                .all(|(_, url)| url == REFERENCE_ENDPOINTS[0])
        );
    }

    #[tokio::test]
    async fn try_fix_fails_without_switch_when_every_probe_fails() {
        let plane = Arc::new(plane_with(vec![
            selector("GLOBAL", "Proxy", &["DIRECT", "REJECT", "Proxy"]),
            selector("Proxy", "hk-01", &["hk-01", "jp-01", "sg-01"]),
        ]));
        let controller = FailoverController::new(plane.clone(), None);

        assert!(!controller.try_fix().await);
        assert!(plane.selected.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn try_fix_moves_on_when_switch_is_rejected() {
        let mut plane = plane_with(vec![selector("Proxy", "a", &["a", "b", "c"])]);
        delay(&mut plane, "b", REFERENCE_ENDPOINTS[0], 100);
        delay(&mut plane, "c", REFERENCE_ENDPOINTS[0], 200);
        plane.reject_select = vec!["b".to_string()];
        let plane = Arc::new(plane);
        let controller = FailoverController::new(plane.clone(), None);

        assert!(controller.try_fix().await);
        assert_eq!(
            *plane.selected.lock().unwrap(),
            vec![("Proxy".to_string(), "c".to_string())]
        );
    }

    #[tokio::test]
    async fn try_fix_ignores_non_selector_groups() {
        let mut plane = plane_with(vec![ProxyGroup {
            name: "Auto".to_string(),
            kind: "URLTest".to_string(),
            now: Some("a".to_string()),
            all: vec!["a".to_string(), "b".to_string()],
        }]);
        delay(&mut plane, "b", REFERENCE_ENDPOINTS[0], 10);
        let plane = Arc::new(plane);
        let controller = FailoverController::new(plane.clone(), None);
        assert!(!controller.try_fix().await);
        assert!(plane.probes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_healthy_fails_over_from_dead_node() {
        let mut plane = plane_with(vec![selector("Proxy", "dead", &["dead", "alive"])]);
        delay(&mut plane, "alive", REFERENCE_ENDPOINTS[0], 90);
        let plane = Arc::new(plane);
        let controller = FailoverController::new(plane.clone(), None);
        assert!(controller.ensure_healthy().await);
        assert_eq!(plane.selected.lock().unwrap()[0].1, "alive");
    }
}
