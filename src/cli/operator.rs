use anyhow::Result;

use vigil::core::config::VigilConfig;
use vigil::core::network::FailoverController;
use vigil::core::remote::RemoteControl;
use vigil::core::subscription::{SubscriptionUpdater, mask_url, read_status};
use vigil::core::terminal::{self, GuideSection};

pub async fn subscribe(updater: &SubscriptionUpdater) -> Result<()> {
    if updater.update().await {
        terminal::print_success("Subscription updated");
    } else {
        let detail = read_status(updater.status_file())
            .and_then(|s| s.error)
            .unwrap_or_else(|| "unknown error".to_string());
        terminal::print_error(&format!("Subscription update failed: {}", detail));
    }
    Ok(())
}

pub async fn status(
    config: &VigilConfig,
    failover: &FailoverController,
    remote: &RemoteControl,
) -> Result<()> {
    GuideSection::new("Network").print();
    let report = failover.check_health().await;
    terminal::print_status("Node", &report.node);
    terminal::print_status("Latency", &format!("{}ms", report.latency_ms));
    terminal::print_status("Status", report.status.as_str());

    GuideSection::new("Subscription").print();
    match read_status(&config.subscribe_status_file()) {
        Some(status) => {
            terminal::print_status("Last update", &status.last_update);
            terminal::print_status("Success", &status.success.to_string());
            terminal::print_status("URL", &status.url_preview);
            if let Some(err) = status.error {
                terminal::print_status("Error", &err);
            }
        }
        None => {
            let configured = config
                .subscription
                .default_url
                .as_deref()
                .map(mask_url)
                .unwrap_or_else(|| "(empty)".to_string());
            terminal::print_status("Last update", "never");
            terminal::print_status("URL", &configured);
        }
    }

    GuideSection::new("Agent").print();
    terminal::print_status("Paused", &remote.is_paused().to_string());
    Ok(())
}

pub fn send_command(remote: &RemoteControl, name: &str) -> Result<()> {
    remote.send_command(name)?;
    terminal::print_success(&format!("Queued command '{}'", name));
    Ok(())
}

pub fn pause(remote: &RemoteControl) -> Result<()> {
    remote.pause()?;
    terminal::print_info("Agent will pause at its next cycle");
    Ok(())
}

pub fn resume(remote: &RemoteControl) -> Result<()> {
    if remote.resume()? {
        terminal::print_success("Pause lock removed");
    } else {
        terminal::print_warn("Agent was not paused");
    }
    Ok(())
}
