use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::time::{Duration, Instant};

use crate::analysis::TypingAnalyzer;
use crate::config::MonitorConfig;
use crate::models::{Detection, Mode, SessionSnapshot, SessionState, Severity, ViolationKind};

/// What a handler wants the controller to do after rule evaluation.
#[derive(Debug, Default)]
pub struct Outcome {
    pub detections: Vec<Detection>,
    /// Active time was forcibly zeroed; surface the blocking warning
    pub punitive_reset: bool,
    /// Persist a snapshot checkpoint
    pub checkpoint: bool,
    /// Drop the persisted snapshot for this assignment
    pub clear_snapshot: bool,
}

impl Outcome {
    fn empty() -> Self {
        Self::default()
    }
}

/// Synchronous core of the supervision state machine.
///
/// Every entry point takes `now` explicitly and returns an [`Outcome`]; the
/// async controller owns timers, persistence and reporting. Handlers are
/// idempotent under repeated invocation (visibility flapping delivers
/// hidden/hidden or visible/visible pairs) and become no-ops once the
/// session is locked.
pub struct SupervisionEngine {
    config: MonitorConfig,
    session: SessionState,
    analyzer: TypingAnalyzer,
}

impl SupervisionEngine {
    pub fn new(
        config: MonitorConfig,
        assignment_id: i64,
        student_id: i64,
        route_path: String,
    ) -> Self {
        Self {
            config,
            session: SessionState::new(assignment_id, student_id, route_path),
            analyzer: TypingAnalyzer::new(),
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.session.mode
    }

    /// Start tracking. A persisted snapshot is honored only when both its
    /// assignment id and route path match the live context; anything else is
    /// stale state from another assignment and is discarded.
    pub fn begin(&mut self, snapshot: Option<SessionSnapshot>, now: Instant) {
        let restored = snapshot
            .filter(|snap| snap.matches(self.session.assignment_id, &self.session.route_path));

        if let Some(snap) = restored {
            let has_typed = snap.has_typed || snap.strict_mode;
            self.session
                .restore(snap.active_ms(), snap.keystroke_count, has_typed);
            self.session.content_snapshot = snap.content_snapshot;
            self.session.content_len_at_checkpoint = snap.content_length;
            if has_typed {
                // Backdate the typing start by the restored active time so
                // the speed rule does not divide by a near-zero elapsed.
                self.analyzer
                    .backdate_typing(now, Duration::from_millis(self.session.active_ms));
                self.session.mode = Mode::ActiveStrict;
            } else {
                self.session.mode = Mode::ActiveNormal;
            }
            info!(
                "resumed session for assignment {} at {:.1} active minutes",
                self.session.assignment_id,
                self.session.active_minutes()
            );
        } else {
            self.session.mode = Mode::ActiveNormal;
        }

        self.session.start_clock(now);
    }

    /// A keystroke in the editor. The first one escalates to strict mode and
    /// arms the periodic heuristics.
    pub fn keystroke(&mut self, now: Instant) -> Outcome {
        if !self.session.mode.is_accumulating() {
            return Outcome::empty();
        }

        if !self.session.has_typed {
            self.session.has_typed = true;
            self.session.mode = Mode::ActiveStrict;
            self.analyzer.start_typing(now);
            debug!("first keystroke: entering strict supervision");
        }

        self.session.keystroke_count += 1;
        self.session.last_keystroke_at = Some(now);
        self.session.last_activity_at = Some(now);
        self.analyzer.note_activity();

        Outcome::empty()
    }

    /// The editor content changed; classify the delta.
    pub fn content_change(&mut self, content: &str, now: Instant) -> Outcome {
        if !self.session.mode.is_accumulating() {
            return Outcome::empty();
        }

        let detections = self.analyzer.on_content_delta(
            self.session.content_len_at_checkpoint,
            content,
            self.session.last_activity_at,
            now,
            &self.config,
        );

        self.session.content_snapshot = content.to_string();
        self.session.content_len_at_checkpoint = content.chars().count();
        self.session.last_activity_at = Some(now);
        self.analyzer.note_activity();

        Outcome {
            detections,
            ..Outcome::default()
        }
    }

    /// Page visibility transition from the embedding UI.
    pub fn visibility_change(
        &mut self,
        visible: bool,
        focused: bool,
        content: &str,
        now: Instant,
    ) -> Outcome {
        if visible {
            self.page_visible(focused, content, now)
        } else {
            self.page_hidden(content, now)
        }
    }

    /// Transition to hidden: flush and checkpoint before the clock stops so
    /// no pending accumulation is lost.
    fn page_hidden(&mut self, content: &str, now: Instant) -> Outcome {
        if !self.session.mode.is_accumulating() {
            return Outcome::empty();
        }

        self.session.sync_active(now);

        if self.session.has_typed {
            self.session.away_content_len = content.chars().count();
            self.session.last_tab_switch_at = Some(now);
        }
        self.session.typed_before_hidden = self
            .session
            .last_keystroke_at
            .map(|at| {
                now.saturating_duration_since(at).as_secs() < self.config.recent_typing_window_secs
            })
            .unwrap_or(false);
        self.session.last_visibility_change_at = Some(now);

        self.session.pause_clock(now);
        self.session.mode = Mode::Paused;

        Outcome {
            checkpoint: true,
            ..Outcome::default()
        }
    }

    /// Transition back to visible: resume the clock first, then evaluate
    /// away-time rules so the transition instant is never double counted.
    fn page_visible(&mut self, focused: bool, content: &str, now: Instant) -> Outcome {
        if self.session.mode != Mode::Paused {
            return Outcome::empty();
        }

        self.session.mode = self.session.resume_mode();
        self.session.start_clock(now);

        let away = self
            .session
            .last_visibility_change_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::ZERO);
        self.session.last_visibility_change_at = Some(now);

        let away_secs = away.as_secs() as i64;
        let mut outcome = Outcome::empty();

        if away.as_secs() > self.config.away_focused_secs && focused {
            outcome.detections.push(
                Detection::new(
                    ViolationKind::SuspiciousActivity,
                    Severity::High,
                    format!("away from the page for {away_secs}s with the editor focused"),
                )
                .time_away(away_secs),
            );
        }

        if self.session.has_typed && away.as_millis() as u64 > self.config.away_min_ms {
            self.evaluate_tab_switch_rule(content, away, now, &mut outcome);
        }

        outcome
    }

    /// Core anti-cheat rule, run on every visibility regain after typing has
    /// started. Any text that appeared while the page was hidden is treated
    /// as conclusive evidence of external assistance.
    fn evaluate_tab_switch_rule(
        &mut self,
        content: &str,
        away: Duration,
        now: Instant,
        outcome: &mut Outcome,
    ) {
        let window = Duration::from_millis(self.config.tab_switch_window_ms);
        self.session.tab_switch_history.push(now);
        self.session
            .tab_switch_history
            .retain(|at| now.saturating_duration_since(*at) <= window);

        if self.session.tab_switch_history.len() >= self.config.tab_switch_trigger_count {
            let count = self.session.tab_switch_history.len();
            outcome.detections.push(
                Detection::new(
                    ViolationKind::TabSwitch,
                    Severity::High,
                    format!(
                        "{count} tab switches within a {}s window",
                        window.as_secs()
                    ),
                )
                .time_away(away.as_secs() as i64),
            );
            self.session.tab_switch_history.clear();
        }

        let current_len = content.chars().count();
        let content_added = current_len as i64 - self.session.away_content_len as i64;
        let away_secs = away.as_secs() as i64;

        if content_added > 0 {
            outcome.detections.push(
                Detection::new(
                    ViolationKind::AppSwitch,
                    Severity::High,
                    format!(
                        "content grew by {content_added} characters while the page was hidden for {away_secs}s"
                    ),
                )
                .time_away(away_secs)
                .content_added(content_added),
            );
            self.punitive_reset(current_len, now);
            outcome.punitive_reset = true;
            outcome.clear_snapshot = true;
        } else if self.session.typed_before_hidden {
            if away.as_secs() > self.config.away_long_secs {
                outcome.detections.push(
                    Detection::new(
                        ViolationKind::SuspiciousActivity,
                        Severity::High,
                        format!("left the page for {away_secs}s while actively typing"),
                    )
                    .time_away(away_secs),
                );
            } else if away.as_secs() >= self.config.away_short_secs {
                outcome.detections.push(
                    Detection::new(
                        ViolationKind::SuspiciousActivity,
                        Severity::Medium,
                        format!("left the page for {away_secs}s while actively typing"),
                    )
                    .time_away(away_secs),
                );
            }
        }
    }

    /// Zero the clock and drop strict mode. When configured, a grace
    /// deadline is set after which strict mode re-arms if content remains;
    /// whether that is the right product behavior is still an open question,
    /// so it stays behind `rearm_strict_after_reset`.
    fn punitive_reset(&mut self, current_len: usize, now: Instant) {
        info!(
            "punitive reset for assignment {}: zeroing {:.1} active minutes",
            self.session.assignment_id,
            self.session.active_minutes()
        );
        self.session.reset(now);
        self.analyzer.reset();
        self.session.mode = Mode::ActiveNormal;
        self.session.content_len_at_checkpoint = current_len;
        if self.config.rearm_strict_after_reset {
            self.session.rearm_deadline =
                Some(now + Duration::from_millis(self.config.rearm_grace_ms));
        }
    }

    /// Periodic heuristics; only meaningful under strict supervision.
    pub fn strict_check(&mut self, content: &str, now: Instant) -> Outcome {
        if self.session.mode != Mode::ActiveStrict {
            return Outcome::empty();
        }

        let detections = self.analyzer.periodic_check(
            content.chars().count(),
            self.session.last_activity_at,
            now,
            &self.config,
        );

        Outcome {
            detections,
            ..Outcome::default()
        }
    }

    /// Coarse tick: commit elapsed time into the session clock.
    pub fn coarse_tick(&mut self, now: Instant) {
        if self.session.mode.is_accumulating() {
            self.session.sync_active(now);
        }
    }

    /// Fine tick: refresh the seconds display, emit a checkpoint every 30
    /// accumulated seconds, and evaluate a pending strict re-arm deadline.
    pub fn fine_tick(&mut self, content: &str, now: Instant) -> Outcome {
        if self.session.mode == Mode::Locked {
            return Outcome::empty();
        }

        let mut outcome = Outcome::empty();

        if self.session.mode.is_accumulating() {
            self.session.sync_active(now);
        }
        self.session.display_seconds = self.session.active_ms / 1_000;

        let interval_ms = self.config.checkpoint_interval_secs * 1_000;
        if self.session.active_ms >= self.session.checkpointed_active_ms + interval_ms {
            self.session.checkpointed_active_ms = self.session.active_ms;
            outcome.checkpoint = true;
        }

        if let Some(deadline) = self.session.rearm_deadline {
            // An elapsed deadline stays pending while the page is hidden;
            // the first tick after resuming evaluates it.
            if now >= deadline && self.session.mode.is_accumulating() {
                self.session.rearm_deadline = None;
                let content_len = content.chars().count();
                if self.config.rearm_strict_after_reset && content_len > 0 {
                    self.session.has_typed = true;
                    self.session.mode = Mode::ActiveStrict;
                    self.analyzer.start_typing(now);
                    debug!("re-armed strict supervision after punitive reset grace period");
                }
            }
        }

        outcome
    }

    /// Submission: flush the clock and lock the session. The violation log
    /// and snapshot are cleared by the controller alongside this.
    pub fn submit(&mut self, now: Instant) {
        self.session.pause_clock(now);
        self.session.mode = Mode::Locked;
        info!(
            "assignment {} submitted with {:.1} active minutes",
            self.session.assignment_id,
            self.session.active_minutes()
        );
    }

    /// Unsubmit: back to normal supervision with a fresh zero clock.
    pub fn unsubmit(&mut self, now: Instant) {
        self.session.reset(now);
        self.analyzer.reset();
        self.session.content_len_at_checkpoint = self.session.content_snapshot.chars().count();
        self.session.mode = Mode::ActiveNormal;
    }

    /// Navigation away from the assignment while substantial typed content
    /// exists is itself suspicious, and always ends this session's clock.
    pub fn exit_check(&mut self, content: &str, now: Instant) -> Outcome {
        if !self.session.mode.is_accumulating() && self.session.mode != Mode::Paused {
            return Outcome::empty();
        }

        let content_len = content.chars().count();
        let mut outcome = Outcome::empty();

        if self.session.has_typed && content_len > self.config.exit_content_min_chars {
            outcome.detections.push(Detection::new(
                ViolationKind::SuspiciousActivity,
                Severity::Medium,
                format!("left the assignment with {content_len} characters of tracked work"),
            ));
        }

        self.session.sync_active(now);
        self.session.reset(now);
        self.session.mode = Mode::Dormant;
        outcome.clear_snapshot = true;

        outcome
    }

    /// Snapshot of the current progress for the persistence bridge.
    pub fn make_snapshot(&self, now: Instant, last_update: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            assignment_id: self.session.assignment_id,
            route_path: self.session.route_path.clone(),
            active_minutes: self.session.current_active_ms(now) as f64 / 60_000.0,
            last_update,
            strict_mode: self.session.mode == Mode::ActiveStrict,
            has_typed: self.session.has_typed,
            keystroke_count: self.session.keystroke_count,
            content_snapshot: self.session.content_snapshot.clone(),
            content_length: self.session.content_len_at_checkpoint,
        }
    }
}
