use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Supervision level of the session state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Monitoring not started, or torn down
    Dormant,
    /// Clock running, visible, no typing recorded yet
    ActiveNormal,
    /// Clock running, visible, typed at least once; all heuristics armed
    ActiveStrict,
    /// Page hidden; no accumulation, away time being measured
    Paused,
    /// Submitted; no accumulation, no violations, until unsubmit
    Locked,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Dormant
    }
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Dormant => "Dormant",
            Mode::ActiveNormal => "ActiveNormal",
            Mode::ActiveStrict => "ActiveStrict",
            Mode::Paused => "Paused",
            Mode::Locked => "Locked",
        }
    }

    pub fn is_accumulating(&self) -> bool {
        matches!(self, Mode::ActiveNormal | Mode::ActiveStrict)
    }
}

/// All mutable state for one supervised assignment-editing session.
///
/// The clock uses the baseline + anchor scheme: `active_ms_baseline` holds
/// time from earlier running windows and `running_anchor` marks the start of
/// the current one, so accumulation is exact regardless of tick cadence.
/// Every method takes `now` explicitly; nothing in here reads the wall clock,
/// which keeps the rules deterministic under test.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub assignment_id: i64,
    pub student_id: i64,
    pub route_path: String,

    pub mode: Mode,
    pub active_ms: u64,
    active_ms_baseline: u64,
    running_anchor: Option<Instant>,
    pub display_seconds: u64,

    pub has_typed: bool,
    pub keystroke_count: u64,
    pub content_snapshot: String,
    pub content_len_at_checkpoint: usize,

    pub last_activity_at: Option<Instant>,
    pub last_keystroke_at: Option<Instant>,
    pub last_visibility_change_at: Option<Instant>,
    pub last_tab_switch_at: Option<Instant>,
    pub tab_switch_history: Vec<Instant>,

    /// Content length captured at the moment the page became hidden
    pub away_content_len: usize,
    /// Whether a keystroke landed shortly before the page was hidden
    pub typed_before_hidden: bool,

    /// Active time at the last persisted checkpoint
    pub checkpointed_active_ms: u64,
    /// Deadline for re-entering strict mode after a punitive reset
    pub rearm_deadline: Option<Instant>,
}

impl SessionState {
    pub fn new(assignment_id: i64, student_id: i64, route_path: String) -> Self {
        Self {
            assignment_id,
            student_id,
            route_path,
            mode: Mode::Dormant,
            active_ms: 0,
            active_ms_baseline: 0,
            running_anchor: None,
            display_seconds: 0,
            has_typed: false,
            keystroke_count: 0,
            content_snapshot: String::new(),
            content_len_at_checkpoint: 0,
            last_activity_at: None,
            last_keystroke_at: None,
            last_visibility_change_at: None,
            last_tab_switch_at: None,
            tab_switch_history: Vec::new(),
            away_content_len: 0,
            typed_before_hidden: false,
            checkpointed_active_ms: 0,
            rearm_deadline: None,
        }
    }

    pub fn active_minutes(&self) -> f64 {
        self.active_ms as f64 / 60_000.0
    }

    pub fn current_active_ms(&self, now: Instant) -> u64 {
        if let (true, Some(anchor)) = (self.mode.is_accumulating(), self.running_anchor) {
            self.active_ms_baseline
                .saturating_add(now.saturating_duration_since(anchor).as_millis() as u64)
        } else {
            self.active_ms
        }
    }

    /// Fold the running window into `active_ms`. Called by the coarse tick
    /// and before any transition that stops the clock.
    pub fn sync_active(&mut self, now: Instant) {
        self.active_ms = self.current_active_ms(now);
    }

    /// Start the clock accumulating from `now`, keeping earlier time.
    pub fn start_clock(&mut self, now: Instant) {
        self.sync_active(now);
        self.active_ms_baseline = self.active_ms;
        self.running_anchor = Some(now);
        self.last_activity_at = Some(now);
    }

    /// Freeze the clock. The flush must happen before the anchor is cleared
    /// so no pending accumulation is lost.
    pub fn pause_clock(&mut self, now: Instant) {
        self.sync_active(now);
        self.running_anchor = None;
        self.active_ms_baseline = self.active_ms;
    }

    /// Resume mode after a pause: strict iff typing was already recorded.
    pub fn resume_mode(&self) -> Mode {
        if self.has_typed {
            Mode::ActiveStrict
        } else {
            Mode::ActiveNormal
        }
    }

    /// Zero the clock and clear typing counters. Used both for ordinary
    /// re-entry and for the punitive reset; the caller decides what mode the
    /// session continues in and whether the persisted snapshot is dropped.
    pub fn reset(&mut self, now: Instant) {
        self.active_ms = 0;
        self.active_ms_baseline = 0;
        self.running_anchor = Some(now);
        self.display_seconds = 0;
        self.has_typed = false;
        self.keystroke_count = 0;
        self.content_len_at_checkpoint = 0;
        self.tab_switch_history.clear();
        self.typed_before_hidden = false;
        self.checkpointed_active_ms = 0;
        self.rearm_deadline = None;
        self.last_activity_at = Some(now);
    }

    /// Restore accumulated progress from a persisted snapshot.
    pub fn restore(&mut self, active_ms: u64, keystroke_count: u64, has_typed: bool) {
        self.active_ms = active_ms;
        self.active_ms_baseline = active_ms;
        self.keystroke_count = keystroke_count;
        self.has_typed = has_typed;
        self.checkpointed_active_ms = active_ms;
    }
}
