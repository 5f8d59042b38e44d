use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::core::notify::Notifier;
use crate::core::page::PageDriver;

const LOGIN_URL_PATTERNS: [&str; 4] = ["login", "signin", "auth", "account"];
const PASSWORD_FIELD: &str = "input[type='password']";
const PASSWORD_VISIBLE_TIMEOUT: Duration = Duration::from_millis(500);
const LOGIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub async fn is_login_required(page: &dyn PageDriver) -> bool {
    let url = page.url().await.to_lowercase();
    if LOGIN_URL_PATTERNS.iter().any(|p| url.contains(p)) {
        return true;
    }
    page.is_visible(PASSWORD_FIELD, PASSWORD_VISIBLE_TIMEOUT).await
}

/// Alert the operator and poll until the login page goes away, or `budget`
/// runs out.
pub async fn wait_for_login(
    page: &dyn PageDriver,
    notifier: &dyn Notifier,
    screenshot: &Path,
    budget: Duration,
) -> bool {
    warn!("Login required, waiting up to {} minutes", budget.as_secs() / 60);

    if let Err(e) = page.screenshot(screenshot).await {
        warn!("Failed to capture login screenshot: {}", e);
    }
    notifier
        .notify(
            "[vigil] Login Required",
            &format!(
                "Please complete login within {} minutes.",
                budget.as_secs() / 60
            ),
            Some(screenshot),
        )
        .await;

    let started = Instant::now();
    while started.elapsed() < budget {
        if !is_login_required(page).await {
            info!("Login completed");
            return true;
        }
        tokio::time::sleep(LOGIN_POLL_INTERVAL).await;
    }
    false
}
