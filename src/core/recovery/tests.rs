use super::*;
use crate::core::page::{PageError, PageResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct ScriptedPage {
    reloads: Mutex<VecDeque<bool>>,
    navigations: Mutex<VecDeque<bool>>,
    reload_default: bool,
    navigate_default: bool,
    reload_calls: AtomicUsize,
    navigate_calls: AtomicUsize,
}

impl ScriptedPage {
    fn always(reload_ok: bool, navigate_ok: bool) -> Self {
        Self {
            reload_default: reload_ok,
            navigate_default: navigate_ok,
            ..Default::default()
        }
    }

    fn reloads(&self) -> usize {
        self.reload_calls.load(Ordering::SeqCst)
    }

    fn navigations(&self) -> usize {
        self.navigate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageRecovery for ScriptedPage {
    async fn reload(&self, _timeout: Duration) -> PageResult<()> {
        self.reload_calls.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .reloads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.reload_default);
        if ok {
            Ok(())
        } else {
            Err(PageError::Navigation("reload failed".into()))
        }
    }

    async fn navigate_home(&self, _timeout: Duration) -> PageResult<()> {
        self.navigate_calls.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .navigations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.navigate_default);
        if ok {
            Ok(())
        } else {
            Err(PageError::Navigation("goto failed".into()))
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str, _attachment: Option<&Path>) {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
    }
}

#[derive(Default)]
struct RecordingExit {
    code: Mutex<Option<i32>>,
}

impl ProcessExit for RecordingExit {
    fn exit(&self, code: i32) -> ! {
        *self.code.lock().unwrap() = Some(code);
        panic!("process exit {}", code);
    }
}

fn manager() -> (RecoveryManager, Arc<RecordingNotifier>, Arc<RecordingExit>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let exit = Arc::new(RecordingExit::default());
    let manager = RecoveryManager::with_config(
        RecoveryConfig::default(),
        notifier.clone(),
        exit.clone(),
    );
    (manager, notifier, exit)
}

#[tokio::test(start_paused = true)]
async fn level_a_success_resets_count_and_records_level() {
    let (mut m, _, _) = manager();
    let page = ScriptedPage::always(true, true);
    assert!(m.handle(&page, "button missing").await);
    assert_eq!(m.state().error_count_a, 0);
    assert_eq!(m.state().last_level, Some(RecoveryLevel::A));
    assert!(m.state().last_recovery_at.is_some());
    assert_eq!(page.reloads(), 1);
    assert_eq!(page.navigations(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_call_within_cooldown_does_nothing() {
    let (mut m, _, _) = manager();
    let page = ScriptedPage::always(true, true);
    assert!(m.handle(&page, "first").await);
    assert!(!m.handle(&page, "second").await);
    assert_eq!(page.reloads(), 1);
    assert_eq!(m.state().a_still_fail_count, 0);
}

#[tokio::test(start_paused = true)]
async fn cooldown_expires() {
    let (mut m, _, _) = manager();
    let page = ScriptedPage::always(true, true);
    assert!(m.handle(&page, "first").await);
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(m.handle(&page, "second").await);
    assert_eq!(page.reloads(), 2);
}

#[tokio::test(start_paused = true)]
async fn a_failures_count_up_then_level_b_is_attempted() {
    let (mut m, _, _) = manager();
    let page = ScriptedPage::always(false, true);

    for expected in 1..=4 {
        assert!(!m.handle(&page, "stuck").await);
        assert_eq!(m.state().error_count_a, expected);
        assert_eq!(page.navigations(), 0);
    }

    assert!(m.handle(&page, "stuck").await);
    assert_eq!(page.reloads(), 5);
    assert_eq!(page.navigations(), 1);
    assert_eq!(m.state().error_count_a, 0);
    assert_eq!(m.state().error_count_b, 0);
    assert_eq!(m.state().last_level, Some(RecoveryLevel::B));
}

#[tokio::test(start_paused = true)]
async fn repeated_a_success_without_resolution_escalates_to_b() {
    let (mut m, _, _) = manager();
    let page = ScriptedPage::always(true, true);

    for _ in 0..3 {
        assert!(m.handle(&page, "still broken").await);
        tokio::time::advance(Duration::from_secs(31)).await;
    }
    assert_eq!(m.state().a_still_fail_count, 2);
    assert_eq!(page.reloads(), 3);

    assert!(m.handle(&page, "still broken").await);
    assert_eq!(page.reloads(), 3, "level A must be skipped");
    assert_eq!(page.navigations(), 1);
    assert_eq!(m.state().last_level, Some(RecoveryLevel::B));
    assert_eq!(m.state().a_still_fail_count, 0);
}

#[tokio::test(start_paused = true)]
async fn bypass_with_failing_b_counts_b_errors() {
    let (mut m, _, _) = manager();
    let page = ScriptedPage::always(true, false);

    for _ in 0..3 {
        assert!(m.handle(&page, "loop").await);
        tokio::time::advance(Duration::from_secs(31)).await;
    }
    assert!(!m.handle(&page, "loop").await);
    assert_eq!(m.state().error_count_b, 1);
    assert_eq!(page.reloads(), 3);
    assert_eq!(page.navigations(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_counters_clears_everything() {
    let (mut m, _, _) = manager();
    let page = ScriptedPage::always(false, false);
    for _ in 0..5 {
        m.handle(&page, "bad").await;
    }
    assert_eq!(m.state().error_count_b, 1);

    m.reset_counters();
    assert_eq!(m.state().error_count_a, 0);
    assert_eq!(m.state().error_count_b, 0);
    assert_eq!(m.state().a_still_fail_count, 0);
    assert_eq!(m.state().last_level, None);
}

#[tokio::test(start_paused = true)]
async fn reset_after_level_a_success_clears_last_level() {
    let (mut m, _, _) = manager();
    let page = ScriptedPage::always(true, true);
    assert!(m.handle(&page, "x").await);
    m.reset_counters();
    assert_eq!(m.state().last_level, None);
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(m.handle(&page, "y").await);
    assert_eq!(m.state().a_still_fail_count, 0);
}

#[tokio::test(start_paused = true)]
async fn sustained_b_failure_notifies_and_exits_with_restart_code() {
    let (manager, notifier, exit) = manager();
    let page = ScriptedPage::always(false, false);

    let task = tokio::spawn(async move {
        let mut m = manager;
        for _ in 0..10 {
            m.handle(&page, "dead session").await;
        }
    });
    let err = task.await.unwrap_err();
    assert!(err.is_panic());

    assert_eq!(*exit.code.lock().unwrap(), Some(RESTART_EXIT_CODE));
    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.contains("Level C"));
    assert!(sent[0].1.contains("Level B failed 3 times"));
}

#[tokio::test(start_paused = true)]
async fn level_c_waits_restart_delay_before_exit() {
    let (manager, _, exit) = manager();
    let page = ScriptedPage::always(false, false);
    let started = Instant::now();

    let task = tokio::spawn(async move {
        let mut m = manager;
        for _ in 0..7 {
            m.handle(&page, "dead").await;
        }
    });
    assert!(task.await.unwrap_err().is_panic());
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(*exit.code.lock().unwrap(), Some(2));
}

struct HangingPage;

#[async_trait]
impl PageRecovery for HangingPage {
    async fn reload(&self, _timeout: Duration) -> PageResult<()> {
        std::future::pending().await
    }

    async fn navigate_home(&self, _timeout: Duration) -> PageResult<()> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn hanging_reload_is_bounded_by_timeout() {
    let (mut m, _, _) = manager();
    assert!(!m.handle(&HangingPage, "hang").await);
    assert_eq!(m.state().error_count_a, 1);
}
