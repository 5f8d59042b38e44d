//! Tiered recovery for page and session faults.
//!
//! Level A reloads the page in place. Level B re-navigates to the canonical
//! target. Level C notifies, waits, and exits the process with
//! [`RESTART_EXIT_CODE`] so an external supervisor restarts it.
//!
//! A Level A reload can succeed mechanically while the underlying fault
//! persists. Each `handle` call that follows a Level A success counts as
//! evidence of that, and enough of them send the next call straight to B.

#[cfg(test)]
mod tests;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::core::notify::Notifier;
use crate::core::page::PageRecovery;

/// Exit status meaning "restart me", distinct from ordinary crash codes.
pub const RESTART_EXIT_CODE: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryLevel {
    A,
    B,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryState {
    pub error_count_a: u32,
    pub error_count_b: u32,
    /// Last level that reported success.
    pub last_level: Option<RecoveryLevel>,
    pub a_still_fail_count: u32,
    /// Set on every successful recovery; gates the cooldown.
    pub last_recovery_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub max_a_errors: u32,
    pub max_b_errors: u32,
    pub max_a_still_fail: u32,
    pub cooldown: Duration,
    pub reload_timeout: Duration,
    pub post_reload_settle: Duration,
    pub navigate_timeout: Duration,
    pub post_navigate_settle: Duration,
    pub restart_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_a_errors: 5,
            max_b_errors: 3,
            max_a_still_fail: 3,
            cooldown: Duration::from_secs(30),
            reload_timeout: Duration::from_millis(15_000),
            post_reload_settle: Duration::from_secs(3),
            navigate_timeout: Duration::from_millis(20_000),
            post_navigate_settle: Duration::from_secs(3),
            restart_delay: Duration::from_secs(30),
        }
    }
}

/// Terminates the process. Split out so Level C can be observed in tests.
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32) -> !;
}

pub struct StdProcessExit;

impl ProcessExit for StdProcessExit {
    fn exit(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

pub struct RecoveryManager {
    config: RecoveryConfig,
    state: RecoveryState,
    notifier: Arc<dyn Notifier>,
    process: Arc<dyn ProcessExit>,
}

impl RecoveryManager {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(RecoveryConfig::default(), notifier, Arc::new(StdProcessExit))
    }

    pub fn with_config(
        config: RecoveryConfig,
        notifier: Arc<dyn Notifier>,
        process: Arc<dyn ProcessExit>,
    ) -> Self {
        Self {
            config,
            state: RecoveryState::default(),
            notifier,
            process,
        }
    }

    pub fn state(&self) -> &RecoveryState {
        &self.state
    }

    /// Entry point used by the agent loop for any caught failure.
    pub async fn attempt_recovery(&mut self, page: &dyn PageRecovery, context: &str) -> bool {
        self.handle(page, context).await
    }

    /// Run one step of the escalation ladder. Returns true when the level
    /// attempted reported success. May not return at all (Level C).
    pub async fn handle(&mut self, page: &dyn PageRecovery, context: &str) -> bool {
        let now = Instant::now();

        if let Some(last) = self.state.last_recovery_at
            && now.duration_since(last) < self.config.cooldown
        {
            info!("Recovery cooldown active, skipping");
            return false;
        }

        info!("Recovery requested: {}", context);

        if self.state.last_level == Some(RecoveryLevel::A) {
            self.state.a_still_fail_count += 1;
        } else {
            self.state.a_still_fail_count = 0;
        }

        if self.state.a_still_fail_count >= self.config.max_a_still_fail {
            warn!(
                "Level A ineffective {} times, escalating to Level B",
                self.state.a_still_fail_count
            );
            let reason = format!(
                "Level A ineffective {} times: {}",
                self.state.a_still_fail_count, context
            );
            if self.recover_level_b(page, &reason).await {
                self.mark_level_b_success(now);
                return true;
            }
            self.state.error_count_b += 1;
            if self.state.error_count_b >= self.config.max_b_errors {
                let reason = format!("Level B failed {} times", self.state.error_count_b);
                match self.trigger_level_c(&reason).await {}
            }
            return false;
        }

        if self.recover_level_a(page, context).await {
            self.state.error_count_a = 0;
            self.state.last_level = Some(RecoveryLevel::A);
            self.state.last_recovery_at = Some(now);
            return true;
        }
        self.state.error_count_a += 1;

        if self.state.error_count_a >= self.config.max_a_errors {
            let reason = format!("Level A failed {} times", self.state.error_count_a);
            if self.recover_level_b(page, &reason).await {
                self.mark_level_b_success(now);
                return true;
            }
            self.state.error_count_b += 1;
        }

        if self.state.error_count_b >= self.config.max_b_errors {
            let reason = format!("Level B failed {} times", self.state.error_count_b);
            match self.trigger_level_c(&reason).await {}
        }

        false
    }

    /// Zero every counter after a strategy cycle completes successfully.
    pub fn reset_counters(&mut self) {
        self.state.error_count_a = 0;
        self.state.error_count_b = 0;
        self.state.a_still_fail_count = 0;
        self.state.last_level = None;
    }

    fn mark_level_b_success(&mut self, now: Instant) {
        self.state.error_count_a = 0;
        self.state.error_count_b = 0;
        self.state.a_still_fail_count = 0;
        self.state.last_level = Some(RecoveryLevel::B);
        self.state.last_recovery_at = Some(now);
    }

    async fn recover_level_a(&self, page: &dyn PageRecovery, context: &str) -> bool {
        info!("[Recovery-A] Page level: {}", context);
        let timeout = self.config.reload_timeout;
        match tokio::time::timeout(timeout, page.reload(timeout)).await {
            Ok(Ok(())) => {
                tokio::time::sleep(self.config.post_reload_settle).await;
                info!("[Recovery-A] Page refresh complete");
                true
            }
            Ok(Err(e)) => {
                warn!("[Recovery-A] Failed: {}", e);
                false
            }
            Err(_) => {
                warn!("[Recovery-A] Failed: reload timed out after {:?}", timeout);
                false
            }
        }
    }

    async fn recover_level_b(&self, page: &dyn PageRecovery, context: &str) -> bool {
        info!("[Recovery-B] Session level: {}", context);
        let timeout = self.config.navigate_timeout;
        match tokio::time::timeout(timeout, page.navigate_home(timeout)).await {
            Ok(Ok(())) => {
                tokio::time::sleep(self.config.post_navigate_settle).await;
                info!("[Recovery-B] Session rebuild complete");
                true
            }
            Ok(Err(e)) => {
                warn!("[Recovery-B] Failed: {}", e);
                false
            }
            Err(_) => {
                warn!("[Recovery-B] Failed: navigation timed out after {:?}", timeout);
                false
            }
        }
    }

    async fn trigger_level_c(&self, reason: &str) -> Infallible {
        error!("[Recovery-C] {}", reason);
        let body = format!(
            "Reason: {}\nSystem will restart in {} seconds.",
            reason,
            self.config.restart_delay.as_secs()
        );
        self.notifier
            .notify("[vigil] Level C Restart Triggered", &body, None)
            .await;
        tokio::time::sleep(self.config.restart_delay).await;
        self.process.exit(RESTART_EXIT_CODE)
    }
}
