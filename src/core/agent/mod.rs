mod login;
mod strategy;

pub use login::{is_login_required, wait_for_login};
pub use strategy::{BotState, DemoStrategy, Strategy};

use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::core::config::VigilConfig;
use crate::core::network::FailoverController;
use crate::core::notify::Notifier;
use crate::core::page::{BoundPage, PageDriver};
use crate::core::recovery::RecoveryManager;
use crate::core::remote::RemoteControl;

const INITIAL_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const POST_NAVIGATION_SETTLE: Duration = Duration::from_secs(3);
const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(30);
const ERROR_RETRY_DELAY: Duration = Duration::from_secs(30);
const PENDING_DELAY_SECS: (f64, f64) = (2.0, 5.0);

/// The agent's main loop: network health first, then remote commands, then
/// one strategy cycle, then a randomized wait.
pub struct AgentRunner {
    config: VigilConfig,
    page: Arc<dyn PageDriver>,
    strategy: Box<dyn Strategy>,
    failover: FailoverController,
    remote: RemoteControl,
    recovery: RecoveryManager,
    notifier: Arc<dyn Notifier>,
}

impl AgentRunner {
    pub fn new(
        config: VigilConfig,
        page: Arc<dyn PageDriver>,
        strategy: Box<dyn Strategy>,
        failover: FailoverController,
        remote: RemoteControl,
        recovery: RecoveryManager,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            page,
            strategy,
            failover,
            remote,
            recovery,
            notifier,
        }
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Navigating to {}", self.config.target_url);
        match self
            .page
            .navigate(&self.config.target_url, INITIAL_NAVIGATION_TIMEOUT)
            .await
        {
            Ok(()) => tokio::time::sleep(POST_NAVIGATION_SETTLE).await,
            Err(e) => {
                warn!("Initial navigation failed: {}", e);
                self.recover(&format!("initial navigation: {}", e)).await;
            }
        }

        if is_login_required(self.page.as_ref()).await {
            let screenshot = self.config.login_image_file();
            let budget = self.config.login_timeout();
            if !wait_for_login(
                self.page.as_ref(),
                self.notifier.as_ref(),
                &screenshot,
                budget,
            )
            .await
            {
                anyhow::bail!("login was not completed within {:?}", budget);
            }
        }

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupted, stopping agent loop");
                    break;
                }
                _ = self.run_cycle() => {}
            }
        }
        Ok(())
    }

    /// One loop iteration including its trailing wait.
    pub async fn run_cycle(&mut self) {
        if !self.failover.ensure_healthy().await {
            warn!("Network unhealthy, waiting {:?}", NETWORK_RETRY_DELAY);
            tokio::time::sleep(NETWORK_RETRY_DELAY).await;
            return;
        }

        match self.run_strategy().await {
            Ok(true) => info!("Remote control requested an immediate run"),
            Ok(false) => {
                let wait = self.next_wait();
                info!("Waiting {:.1} minutes", wait.as_secs_f64() / 60.0);
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                error!("Cycle failed: {:#}", e);
                self.recover(&e.to_string()).await;
                tokio::time::sleep(ERROR_RETRY_DELAY).await;
            }
        }
    }

    /// Poll remote control, detect state and act on it. Returns whether the
    /// next cycle should start without the usual wait.
    pub async fn run_strategy(&mut self) -> Result<bool> {
        let poll = self.remote.poll().await;
        if let Some(command) = &poll.custom_command {
            self.strategy.on_command(self.page.as_ref(), command).await;
        }

        let state = self.strategy.detect_state(self.page.as_ref()).await;
        info!("Current state: {:?}", state);

        match state {
            BotState::Online => info!("Already online, monitoring"),
            BotState::Offline => {
                info!("Offline, attempting to go online");
                match self.strategy.go_online(self.page.as_ref()).await {
                    Ok(()) => self.recovery.reset_counters(),
                    Err(e) => {
                        warn!("Primary action failed: {}", e);
                        self.recover(&e.to_string()).await;
                    }
                }
            }
            BotState::Pending => {
                let secs = rand::thread_rng().gen_range(PENDING_DELAY_SECS.0..PENDING_DELAY_SECS.1);
                info!("Pending, waiting {:.1}s", secs);
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            }
            BotState::Error => {
                warn!("Error state detected, attempting recovery");
                self.recover("Error state detected").await;
            }
            BotState::Unknown => info!("Unknown state, skipping"),
        }

        self.update_monitor().await;
        Ok(poll.resume_immediately)
    }

    async fn recover(&mut self, context: &str) -> bool {
        let bound = BoundPage::new(self.page.as_ref(), &self.config.target_url);
        self.recovery.attempt_recovery(&bound, context).await
    }

    async fn update_monitor(&self) {
        let path = self.config.monitor_image_file();
        if let Err(e) = self.page.screenshot(&path).await {
            tracing::debug!("Monitor snapshot skipped: {}", e);
        }
    }

    fn next_wait(&self) -> Duration {
        let min = self.config.min_wait().as_secs();
        let max = self.config.max_wait().as_secs().max(min);
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }
}
