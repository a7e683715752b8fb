use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{MonitorConfig, MonitorTarget};
use crate::db::Database;
use crate::reporting::{AlertSink, ReportSink, ViolationReporter};
use crate::supervisor::engine::{Outcome, SupervisionEngine};

/// Live view of the supervised editor, provided by the embedding UI.
pub trait ContentSource: Send + Sync {
    fn content(&self) -> String;
    fn is_focused(&self) -> bool;
}

/// Read model for the embedding UI's status display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub mode: String,
    pub active_minutes: f64,
    pub display_seconds: u64,
    pub keystroke_count: u64,
    pub has_typed: bool,
    pub violation_count: usize,
}

struct Shared {
    engine: Mutex<SupervisionEngine>,
    reporter: ViolationReporter,
    db: Database,
    content: Arc<dyn ContentSource>,
    assignment_id: i64,
}

impl Shared {
    fn engine(&self) -> MutexGuard<'_, SupervisionEngine> {
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drives one supervised editing session: receives UI events, runs the tick
/// loop, and routes rule outcomes to the reporter and the durable store.
///
/// This is the only place that reads the clock; the engine underneath is
/// purely a function of the events and instants fed to it.
pub struct SupervisionController {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SupervisionController {
    /// Begin supervising. Any snapshot persisted for this assignment is
    /// offered to the engine, which discards it unless the route matches.
    pub async fn start(
        target: MonitorTarget,
        config: MonitorConfig,
        db: Database,
        content: Arc<dyn ContentSource>,
        sink: Option<Arc<dyn ReportSink>>,
        alerts: Option<Arc<dyn AlertSink>>,
    ) -> Result<Self> {
        let snapshot = match db.get_snapshot(target.assignment_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("could not load session snapshot, starting fresh: {err:#}");
                None
            }
        };

        let mut engine = SupervisionEngine::new(
            config.clone(),
            target.assignment_id,
            target.student_id,
            target.route_path,
        );
        engine.begin(snapshot, Instant::now());

        let reporter = ViolationReporter::new(
            target.student_id,
            target.assignment_id,
            db.clone(),
            sink,
            alerts,
            Duration::from_secs(config.report_dedupe_secs),
        );
        if let Err(err) = reporter.hydrate().await {
            warn!("could not load prior violations: {err:#}");
        }

        let shared = Arc::new(Shared {
            engine: Mutex::new(engine),
            reporter,
            db,
            content,
            assignment_id: target.assignment_id,
        });

        let cancel = CancellationToken::new();
        let loop_handle = tokio::spawn(supervision_loop(
            Arc::clone(&shared),
            config,
            cancel.clone(),
        ));

        info!("supervision started for assignment {}", target.assignment_id);

        Ok(Self {
            shared,
            cancel,
            loop_handle: Mutex::new(Some(loop_handle)),
        })
    }

    pub async fn on_keystroke(&self) {
        let now = Instant::now();
        let outcome = self.shared.engine().keystroke(now);
        apply_outcome(&self.shared, outcome, now).await;
    }

    pub async fn on_content_change(&self, content: &str) {
        let now = Instant::now();
        let outcome = self.shared.engine().content_change(content, now);
        apply_outcome(&self.shared, outcome, now).await;
    }

    pub async fn on_visibility_change(&self, visible: bool) {
        let now = Instant::now();
        let content = self.shared.content.content();
        let focused = self.shared.content.is_focused();
        let outcome = self
            .shared
            .engine()
            .visibility_change(visible, focused, &content, now);
        apply_outcome(&self.shared, outcome, now).await;
    }

    /// Submission locks the session and wipes both the violation log and the
    /// persisted snapshot; a submitted assignment starts clean.
    pub async fn on_submit(&self) {
        let now = Instant::now();
        self.shared.engine().submit(now);
        if let Err(err) = self.shared.reporter.clear().await {
            error!("failed to clear violation log on submit: {err:#}");
        }
        if let Err(err) = self.shared.db.delete_snapshot(self.shared.assignment_id).await {
            warn!("failed to drop snapshot on submit: {err:#}");
        }
    }

    pub async fn on_unsubmit(&self) {
        let now = Instant::now();
        self.shared.engine().unsubmit(now);
    }

    /// End supervision, evaluating the navigation-away rule on the way out.
    pub async fn stop(&self) {
        let now = Instant::now();
        let content = self.shared.content.content();
        let outcome = self.shared.engine().exit_check(&content, now);
        apply_outcome(&self.shared, outcome, now).await;

        self.cancel.cancel();
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("supervision loop ended abnormally: {err}");
            }
        }
        info!(
            "supervision stopped for assignment {}",
            self.shared.assignment_id
        );
    }

    pub fn status(&self) -> MonitorStatus {
        let now = Instant::now();
        let engine = self.shared.engine();
        let session = engine.session();
        MonitorStatus {
            mode: session.mode.as_str().to_string(),
            active_minutes: session.current_active_ms(now) as f64 / 60_000.0,
            display_seconds: session.display_seconds,
            keystroke_count: session.keystroke_count,
            has_typed: session.has_typed,
            violation_count: self.shared.reporter.violation_count(),
        }
    }

    pub fn violations(&self) -> Vec<crate::models::Violation> {
        self.shared.reporter.violations()
    }
}

/// Route one rule outcome: report detections, surface the blocking warning,
/// and reconcile the persisted snapshot.
async fn apply_outcome(shared: &Shared, outcome: Outcome, now: Instant) {
    for detection in outcome.detections {
        if let Err(err) = shared.reporter.report(detection, now).await {
            error!("failed to record violation: {err:#}");
        }
    }

    if outcome.punitive_reset {
        shared.reporter.blocking_warning(
            "Your active time has been reset because content was added while the page was hidden.",
        );
    }

    if outcome.clear_snapshot {
        if let Err(err) = shared.db.delete_snapshot(shared.assignment_id).await {
            warn!("failed to drop session snapshot: {err:#}");
        }
    } else if outcome.checkpoint {
        let snapshot = shared.engine().make_snapshot(now, Utc::now());
        if let Err(err) = shared.db.upsert_snapshot(&snapshot).await {
            warn!("failed to persist session snapshot: {err:#}");
        }
    }
}

/// Single scheduler for all periodic work. Three cadences, one task; the
/// engine mutex is the only synchronization with the event handlers.
async fn supervision_loop(shared: Arc<Shared>, config: MonitorConfig, cancel: CancellationToken) {
    let mut fine = interval(Duration::from_secs(config.fine_tick_secs));
    let mut coarse = interval(Duration::from_secs(config.coarse_tick_secs));
    let mut strict = interval(Duration::from_secs(config.strict_check_secs));
    fine.set_missed_tick_behavior(MissedTickBehavior::Skip);
    coarse.set_missed_tick_behavior(MissedTickBehavior::Skip);
    strict.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            now = fine.tick() => {
                let content = shared.content.content();
                let outcome = shared.engine().fine_tick(&content, now);
                apply_outcome(&shared, outcome, now).await;
            }
            now = coarse.tick() => {
                shared.engine().coarse_tick(now);
            }
            now = strict.tick() => {
                // Focus gating lives here and nowhere else: keystroke and
                // content events imply focus, and a visibility regain means
                // the tab is foreground again.
                if !shared.content.is_focused() {
                    continue;
                }
                let content = shared.content.content();
                let outcome = shared.engine().strict_check(&content, now);
                apply_outcome(&shared, outcome, now).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionSnapshot, Severity, ViolationKind};
    use crate::reporting::AlertSink;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;
    use tokio::time::advance;

    struct FakeEditor {
        content: Mutex<String>,
        focused: AtomicBool,
    }

    impl FakeEditor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                content: Mutex::new(String::new()),
                focused: AtomicBool::new(true),
            })
        }

        fn set_content(&self, content: &str) {
            *self.content.lock().unwrap() = content.to_string();
        }
    }

    impl ContentSource for FakeEditor {
        fn content(&self) -> String {
            self.content.lock().unwrap().clone()
        }

        fn is_focused(&self) -> bool {
            self.focused.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingAlerts {
        blocking: Mutex<Vec<String>>,
    }

    impl AlertSink for RecordingAlerts {
        fn transient(&self, _severity: Severity, _message: &str) {}

        fn blocking(&self, message: &str) {
            self.blocking.lock().unwrap().push(message.to_string());
        }
    }

    fn target() -> MonitorTarget {
        MonitorTarget {
            student_id: 42,
            assignment_id: 7,
            route_path: "/assignments/7".into(),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    async fn start(
        db: &Database,
        editor: &Arc<FakeEditor>,
        alerts: Option<Arc<dyn AlertSink>>,
    ) -> SupervisionController {
        init_logging();
        SupervisionController::start(
            target(),
            MonitorConfig::default(),
            db.clone(),
            editor.clone() as Arc<dyn ContentSource>,
            None,
            alerts,
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn punitive_reset_end_to_end() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("invigil.sqlite3")).unwrap();
        let editor = FakeEditor::new();
        let alerts = Arc::new(RecordingAlerts::default());
        let controller = start(&db, &editor, Some(alerts.clone())).await;

        controller.on_keystroke().await;
        editor.set_content("my draft");
        controller.on_content_change("my draft").await;
        advance(Duration::from_secs(40)).await;
        settle().await;
        assert!(controller.status().active_minutes > 0.5);

        controller.on_visibility_change(false).await;
        advance(Duration::from_secs(5)).await;
        editor.set_content("my draft plus a large block of pasted material");
        controller.on_visibility_change(true).await;

        // The handler's store round-trips let the paused clock advance a
        // little, so the reset reads as near zero rather than exactly zero.
        let status = controller.status();
        assert!(status.active_minutes < 0.1);
        assert!(!status.has_typed);
        assert_eq!(status.mode, "ActiveNormal");

        let violations = controller.violations();
        assert!(violations
            .iter()
            .any(|v| v.violation_type == ViolationKind::AppSwitch
                && v.severity == Severity::High));
        assert_eq!(alerts.blocking.lock().unwrap().len(), 1);
        assert!(db.get_snapshot(7).await.unwrap().is_none());

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_loop_persists_checkpoints() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("invigil.sqlite3")).unwrap();
        let editor = FakeEditor::new();
        let controller = start(&db, &editor, None).await;

        controller.on_keystroke().await;
        editor.set_content("steady work");
        controller.on_content_change("steady work").await;

        for _ in 0..35 {
            advance(Duration::from_secs(1)).await;
            settle().await;
        }

        let snapshot = db.get_snapshot(7).await.unwrap().expect("checkpoint written");
        assert!(snapshot.strict_mode);
        assert!(snapshot.active_minutes > 0.4);
        assert_eq!(snapshot.keystroke_count, 1);

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn matching_snapshot_resumes_and_stale_is_ignored() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("invigil.sqlite3")).unwrap();
        let editor = FakeEditor::new();

        db.upsert_snapshot(&SessionSnapshot {
            assignment_id: 7,
            route_path: "/assignments/7".into(),
            active_minutes: 12.0,
            last_update: Utc::now(),
            strict_mode: true,
            has_typed: true,
            keystroke_count: 300,
            content_snapshot: "earlier draft".into(),
            content_length: 13,
        })
        .await
        .unwrap();

        let controller = start(&db, &editor, None).await;
        let status = controller.status();
        assert!(status.active_minutes >= 12.0);
        assert!(status.has_typed);
        assert_eq!(status.mode, "ActiveStrict");
        controller.stop().await;

        // Same assignment id persisted under a different route reads as
        // stale and the session starts from zero.
        db.upsert_snapshot(&SessionSnapshot {
            assignment_id: 7,
            route_path: "/assignments/7/preview".into(),
            active_minutes: 45.0,
            last_update: Utc::now(),
            strict_mode: true,
            has_typed: true,
            keystroke_count: 900,
            content_snapshot: "other context".into(),
            content_length: 13,
        })
        .await
        .unwrap();

        let controller = start(&db, &editor, None).await;
        let status = controller.status();
        assert!(status.active_minutes < 0.001);
        assert!(!status.has_typed);
        assert_eq!(status.mode, "ActiveNormal");
        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn submit_locks_and_clears() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("invigil.sqlite3")).unwrap();
        let editor = FakeEditor::new();
        let controller = start(&db, &editor, None).await;

        controller.on_keystroke().await;
        let big = "x".repeat(600);
        editor.set_content(&big);
        controller.on_content_change(&big).await;
        settle().await;
        assert!(controller.status().violation_count > 0);

        controller.on_submit().await;
        let status = controller.status();
        assert_eq!(status.mode, "Locked");
        assert_eq!(status.violation_count, 0);
        assert!(db.get_violations(7).await.unwrap().is_empty());
        assert!(db.get_snapshot(7).await.unwrap().is_none());

        // Locked sessions stay silent whatever arrives
        let bigger = "x".repeat(1_400);
        editor.set_content(&bigger);
        controller.on_content_change(&bigger).await;
        advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(controller.status().violation_count, 0);

        controller.on_unsubmit().await;
        let status = controller.status();
        assert_eq!(status.mode, "ActiveNormal");
        assert!(status.active_minutes < 0.001);

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_fires_through_the_tick_loop() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("invigil.sqlite3")).unwrap();
        let editor = FakeEditor::new();
        let controller = start(&db, &editor, None).await;

        controller.on_keystroke().await;
        editor.set_content("a start");
        controller.on_content_change("a start").await;

        // Sub-deadline steps so no interval tick is skipped past
        for _ in 0..330 {
            advance(Duration::from_secs(1)).await;
            settle().await;
        }

        assert!(controller
            .violations()
            .iter()
            .any(|v| v.violation_type == ViolationKind::ExcessiveInactivity));

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unfocused_editor_suppresses_periodic_checks() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("invigil.sqlite3")).unwrap();
        let editor = FakeEditor::new();
        let controller = start(&db, &editor, None).await;

        controller.on_keystroke().await;
        editor.set_content("a start");
        controller.on_content_change("a start").await;
        editor.focused.store(false, Ordering::SeqCst);

        for _ in 0..330 {
            advance(Duration::from_secs(1)).await;
            settle().await;
        }

        assert_eq!(controller.status().violation_count, 0);

        controller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_reports_exit_with_substantial_work() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("invigil.sqlite3")).unwrap();
        let editor = FakeEditor::new();
        let controller = start(&db, &editor, None).await;

        controller.on_keystroke().await;
        let content = "a".repeat(120);
        editor.set_content(&content);
        controller.on_content_change(&content).await;

        controller.stop().await;
        settle().await;

        assert!(controller
            .violations()
            .iter()
            .any(|v| v.violation_type == ViolationKind::SuspiciousActivity));
        assert!(db.get_snapshot(7).await.unwrap().is_none());
    }
}
