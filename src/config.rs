use serde::{Deserialize, Serialize};

use crate::analysis::ClassifierConfig;

/// Tunable thresholds for the supervision rules.
///
/// Defaults mirror the grading server's expectations; embedders may override
/// individual fields, typically only in tests.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Coarse tick folding elapsed time into the session clock
    pub coarse_tick_secs: u64,
    /// Fine tick driving the seconds display and checkpoint boundary
    pub fine_tick_secs: u64,
    /// Cadence of the periodic strict-mode heuristics
    pub strict_check_secs: u64,
    /// Accumulated active time between persisted checkpoints
    pub checkpoint_interval_secs: u64,

    /// Delta above this flags a possible paste for the next periodic check
    pub paste_flag_chars: usize,
    /// Delta (or first total) above this runs the content classifier
    pub paste_classify_chars: usize,
    /// Delta above this reports a paste immediately
    pub paste_immediate_chars: usize,
    /// A flagged delta only counts when it lands this close to prior activity
    pub paste_burst_window_ms: u64,
    /// Two flagged pastes inside this window escalate the streak
    pub paste_repeat_window_secs: u64,

    /// Sustained chars-per-minute above this is implausibly fast
    pub rapid_cpm_threshold: f64,
    /// The speed rule needs at least this much content
    pub rapid_min_chars: usize,

    /// Idle time before the first inactivity event
    pub inactivity_first_secs: u64,
    /// Idle time before the follow-up inactivity event
    pub inactivity_second_secs: u64,

    /// Window for counting rapid visibility regains
    pub tab_switch_window_ms: u64,
    /// Regains inside the window that constitute a tab-switch violation
    pub tab_switch_trigger_count: usize,

    /// Absences at or under this are ignored entirely
    pub away_min_ms: u64,
    /// Lower bound of the medium away tier
    pub away_short_secs: u64,
    /// Above this the away tier escalates to high
    pub away_long_secs: u64,
    /// Absence with the editor still focused becomes suspicious past this
    pub away_focused_secs: u64,
    /// A keystroke this recent before hiding counts as "actively typing"
    pub recent_typing_window_secs: u64,

    /// Leaving the assignment with more tracked content than this is reported
    pub exit_content_min_chars: usize,

    /// Whether strict mode re-arms after a punitive reset
    pub rearm_strict_after_reset: bool,
    /// Grace period before the re-arm takes effect
    pub rearm_grace_ms: u64,

    /// Per-kind rate limit on reported violations
    pub report_dedupe_secs: u64,

    pub classifier: ClassifierConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            coarse_tick_secs: 10,
            fine_tick_secs: 1,
            strict_check_secs: 30,
            checkpoint_interval_secs: 30,
            paste_flag_chars: 100,
            paste_classify_chars: 200,
            paste_immediate_chars: 500,
            paste_burst_window_ms: 2_000,
            paste_repeat_window_secs: 30,
            rapid_cpm_threshold: 250.0,
            rapid_min_chars: 100,
            inactivity_first_secs: 300,
            inactivity_second_secs: 600,
            tab_switch_window_ms: 15_000,
            tab_switch_trigger_count: 3,
            away_min_ms: 1_000,
            away_short_secs: 10,
            away_long_secs: 30,
            away_focused_secs: 60,
            recent_typing_window_secs: 5,
            exit_content_min_chars: 50,
            rearm_strict_after_reset: true,
            rearm_grace_ms: 5_000,
            report_dedupe_secs: 120,
            classifier: ClassifierConfig::default(),
        }
    }
}

/// Static identity of the supervised context, provided by the embedding UI
/// when monitoring starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorTarget {
    pub student_id: i64,
    pub assignment_id: i64,
    pub route_path: String,
}

const WRITING_HINTS: [&str; 8] = [
    "essay", "write", "written", "paragraph", "report", "reflection", "response", "summary",
];

const NON_TEXT_HINTS: [&str; 5] = [
    "multiple choice",
    "quiz",
    "file upload",
    "upload a file",
    "recording",
];

/// Whether an assignment description reads as free-text work that content
/// supervision applies to. Non-text formats (quizzes, uploads) win over
/// writing hints when both appear.
pub fn looks_text_based(description: &str) -> bool {
    let lowered = description.to_lowercase();
    if NON_TEXT_HINTS.iter().any(|hint| lowered.contains(hint)) {
        return false;
    }
    WRITING_HINTS.iter().any(|hint| lowered.contains(hint))
}
