use anyhow::Result;
use std::time::Duration;
use tracing::{error, info, warn};

use vigil::core::network::FailoverController;
use vigil::core::terminal;

const HEALTHY_INTERVAL: Duration = Duration::from_secs(180);
const UNHEALTHY_INTERVAL: Duration = Duration::from_secs(30);

/// Standalone network watchdog. Runs one pass with `once`, otherwise loops
/// until Ctrl+C.
pub async fn run_monitor(failover: &FailoverController, once: bool) -> Result<()> {
    if once {
        let healthy = check_once(failover).await;
        if healthy {
            terminal::print_success("Network healthy");
        } else {
            terminal::print_warn("Network unhealthy");
        }
        return Ok(());
    }

    info!("Network monitor started");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        let healthy = tokio::select! {
            _ = &mut shutdown => break,
            healthy = check_once(failover) => healthy,
        };
        let wait = if healthy {
            HEALTHY_INTERVAL
        } else {
            UNHEALTHY_INTERVAL
        };
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    info!("Network monitor stopped");
    Ok(())
}

async fn check_once(failover: &FailoverController) -> bool {
    let report = failover.check_health().await;
    if report.healthy {
        info!("Node {} healthy ({}ms, {})", report.node, report.latency_ms, report.status);
        return true;
    }
    warn!(
        "Node {} unhealthy ({}ms, {}), trying to fix",
        report.node, report.latency_ms, report.status
    );
    if failover.try_fix().await {
        info!("Switched to a healthy node");
        true
    } else {
        error!("No healthy node available");
        false
    }
}
