use log::debug;
use tokio::time::{Duration, Instant};

use crate::analysis::classifier::{assess, ClassifierConfig};
use crate::config::MonitorConfig;
use crate::models::{Detection, Severity, ViolationKind};

/// Classifies content deltas and typing cadence while strict supervision is
/// armed. Owns the paste/inactivity staging so the rules stay idempotent when
/// the periodic check fires in quick succession.
#[derive(Debug)]
pub struct TypingAnalyzer {
    typing_started_at: Option<Instant>,

    pending_large_paste: bool,
    last_large_paste_at: Option<Instant>,
    prev_large_paste_at: Option<Instant>,
    paste_streak: u32,

    initial_ai_check_done: bool,
    ai_violation_emitted: bool,

    /// 0 = quiet, 1 = first inactivity event sent, 2 = follow-up sent
    inactivity_stage: u8,
}

impl TypingAnalyzer {
    pub fn new() -> Self {
        Self {
            typing_started_at: None,
            pending_large_paste: false,
            last_large_paste_at: None,
            prev_large_paste_at: None,
            paste_streak: 0,
            initial_ai_check_done: false,
            ai_violation_emitted: false,
            inactivity_stage: 0,
        }
    }

    pub fn typing_started_at(&self) -> Option<Instant> {
        self.typing_started_at
    }

    /// Record the first keystroke of the session.
    pub fn start_typing(&mut self, now: Instant) {
        if self.typing_started_at.is_none() {
            self.typing_started_at = Some(now);
        }
    }

    /// Seed the typing start for a restored session so the speed rule sees
    /// the accumulated time instead of a near-zero denominator.
    pub fn backdate_typing(&mut self, now: Instant, already_active: Duration) {
        self.typing_started_at = Some(now - already_active);
    }

    /// Any keystroke or focus activity quiets the inactivity staging.
    pub fn note_activity(&mut self) {
        self.inactivity_stage = 0;
    }

    /// Clear all analyzer state; re-arms the content classifier.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Classify a content-change event.
    ///
    /// `prev_len` is the length at the last checkpoint, `last_activity` the
    /// most recent recorded activity before this event.
    pub fn on_content_delta(
        &mut self,
        prev_len: usize,
        new_content: &str,
        last_activity: Option<Instant>,
        now: Instant,
        config: &MonitorConfig,
    ) -> Vec<Detection> {
        let new_len = new_content.chars().count();
        let added = new_len as i64 - prev_len as i64;
        let mut detections = Vec::new();

        if added > config.paste_immediate_chars as i64 {
            detections.push(
                Detection::new(
                    ViolationKind::PasteDetected,
                    Severity::High,
                    format!("single edit added {added} characters"),
                )
                .paste_length(added),
            );
        } else if added > config.paste_flag_chars as i64 {
            let burst = last_activity
                .map(|at| now.saturating_duration_since(at).as_millis() as u64)
                .map(|ms| ms <= config.paste_burst_window_ms)
                .unwrap_or(false);
            if burst {
                debug!("large paste flagged: +{added} chars within burst window");
                self.prev_large_paste_at = self.last_large_paste_at;
                self.last_large_paste_at = Some(now);
                self.pending_large_paste = true;
            }
        }

        if added > config.paste_classify_chars as i64
            || (!self.initial_ai_check_done && new_len > config.paste_classify_chars)
        {
            if new_len > config.paste_classify_chars {
                self.initial_ai_check_done = true;
            }
            if let Some(detection) = self.classify_content(new_content, &config.classifier) {
                detections.push(detection);
            }
        }

        detections
    }

    /// Periodic evaluation; only called while the session is in strict mode
    /// and the page is visible.
    pub fn periodic_check(
        &mut self,
        current_len: usize,
        last_activity: Option<Instant>,
        now: Instant,
        config: &MonitorConfig,
    ) -> Vec<Detection> {
        let mut detections = Vec::new();

        if let Some(started) = self.typing_started_at {
            let secs = now.saturating_duration_since(started).as_secs_f64();
            if secs > 0.0 {
                let cpm = current_len as f64 / secs * 60.0;
                if cpm > config.rapid_cpm_threshold && current_len > config.rapid_min_chars {
                    detections.push(Detection::new(
                        ViolationKind::RapidCompletion,
                        Severity::Medium,
                        format!("typing speed {cpm:.0} chars/min over {current_len} characters"),
                    ));
                }
            }
        }

        if self.pending_large_paste {
            self.pending_large_paste = false;
            let repeated = match (self.prev_large_paste_at, self.last_large_paste_at) {
                (Some(prev), Some(last)) => {
                    last.saturating_duration_since(prev).as_secs() < config.paste_repeat_window_secs
                }
                _ => false,
            };
            if repeated {
                self.paste_streak += 1;
            }
            if self.paste_streak >= 2 {
                detections.push(Detection::new(
                    ViolationKind::PasteDetected,
                    Severity::High,
                    "repeated large pastes in quick succession".to_string(),
                ));
                self.paste_streak = 0;
            } else {
                detections.push(Detection::new(
                    ViolationKind::PasteDetected,
                    Severity::Medium,
                    "large paste detected".to_string(),
                ));
            }
        }

        if let Some(idle) = last_activity.map(|at| now.saturating_duration_since(at).as_secs()) {
            if self.inactivity_stage == 0 && idle >= config.inactivity_first_secs {
                self.inactivity_stage = 1;
                detections.push(
                    Detection::new(
                        ViolationKind::ExcessiveInactivity,
                        Severity::High,
                        format!(
                            "no typing or focus activity for {}s under strict supervision",
                            config.inactivity_first_secs
                        ),
                    )
                    .time_away(config.inactivity_first_secs as i64),
                );
            } else if self.inactivity_stage == 1 && idle >= config.inactivity_second_secs {
                self.inactivity_stage = 2;
                detections.push(
                    Detection::new(
                        ViolationKind::ExcessiveInactivity,
                        Severity::High,
                        format!(
                            "still no activity after {}s under strict supervision",
                            config.inactivity_second_secs
                        ),
                    )
                    .time_away(config.inactivity_second_secs as i64),
                );
            }
        }

        detections
    }

    fn classify_content(
        &mut self,
        content: &str,
        config: &ClassifierConfig,
    ) -> Option<Detection> {
        if self.ai_violation_emitted {
            return None;
        }
        let assessment = assess(content, config);
        if !assessment.is_suspicious {
            return None;
        }
        self.ai_violation_emitted = true;
        Some(
            Detection::new(
                ViolationKind::AiContentDetected,
                Severity::High,
                format!(
                    "content matches AI-style writing patterns (score {:.2})",
                    assessment.score
                ),
            )
            .ai_score(assessment.score),
        )
    }
}

impl Default for TypingAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MonitorConfig {
        MonitorConfig::default()
    }

    #[test]
    fn oversized_delta_reports_paste_immediately() {
        let now = Instant::now();
        let mut analyzer = TypingAnalyzer::new();
        let content = "x".repeat(600);

        let detections = analyzer.on_content_delta(0, &content, Some(now), now, &config());
        let paste = detections
            .iter()
            .find(|d| d.kind == ViolationKind::PasteDetected)
            .expect("paste detection");
        assert_eq!(paste.severity, Severity::High);
        assert_eq!(paste.paste_content_length, Some(600));
    }

    #[test]
    fn medium_delta_flags_pending_paste_only_in_burst() {
        let now = Instant::now();
        let mut analyzer = TypingAnalyzer::new();
        let content = "x".repeat(150);

        // Delta long after previous activity: no flag
        let quiet = analyzer.on_content_delta(
            0,
            &content,
            Some(now - Duration::from_secs(10)),
            now,
            &config(),
        );
        assert!(quiet.is_empty());
        assert!(!analyzer.pending_large_paste);

        // Same delta right after activity: flagged, reported at next check
        let burst = analyzer.on_content_delta(
            0,
            &content,
            Some(now - Duration::from_millis(500)),
            now,
            &config(),
        );
        assert!(burst.is_empty());
        assert!(analyzer.pending_large_paste);

        let later = now + Duration::from_secs(30);
        let detections = analyzer.periodic_check(150, Some(now), later, &config());
        let paste = detections
            .iter()
            .find(|d| d.kind == ViolationKind::PasteDetected)
            .expect("pending paste detection");
        assert_eq!(paste.severity, Severity::Medium);
    }

    #[test]
    fn repeated_pastes_escalate_to_high() {
        let t0 = Instant::now();
        let mut analyzer = TypingAnalyzer::new();
        let cfg = config();
        let content = "x".repeat(150);

        analyzer.on_content_delta(0, &content, Some(t0), t0, &cfg);
        let t1 = t0 + Duration::from_secs(10);
        analyzer.on_content_delta(0, &content, Some(t1), t1, &cfg);
        let t2 = t1 + Duration::from_secs(10);
        analyzer.on_content_delta(0, &content, Some(t2), t2, &cfg);

        // Streak of two repeats inside the window
        analyzer.periodic_check(150, Some(t2), t2 + Duration::from_secs(1), &cfg);
        // pending flag was consumed; raise it again via another paired paste
        let t3 = t2 + Duration::from_secs(5);
        analyzer.on_content_delta(0, &content, Some(t3), t3, &cfg);
        let detections = analyzer.periodic_check(150, Some(t3), t3 + Duration::from_secs(1), &cfg);
        let paste = detections
            .iter()
            .find(|d| d.kind == ViolationKind::PasteDetected)
            .expect("escalated paste detection");
        assert_eq!(paste.severity, Severity::High);
    }

    #[test]
    fn rapid_completion_matches_speed_rule() {
        let t0 = Instant::now();
        let mut analyzer = TypingAnalyzer::new();
        analyzer.start_typing(t0);
        let t1 = t0 + Duration::from_secs(60);

        // 400 chars in 60s = 400 cpm
        let fired = analyzer.periodic_check(400, Some(t1), t1, &config());
        assert!(fired
            .iter()
            .any(|d| d.kind == ViolationKind::RapidCompletion
                && d.severity == Severity::Medium));

        // 200 chars in 60s = 200 cpm, under the threshold
        let mut slow = TypingAnalyzer::new();
        slow.start_typing(t0);
        let quiet = slow.periodic_check(200, Some(t1), t1, &config());
        assert!(quiet
            .iter()
            .all(|d| d.kind != ViolationKind::RapidCompletion));
    }

    #[test]
    fn ai_detection_fires_once_per_session() {
        let now = Instant::now();
        let mut analyzer = TypingAnalyzer::new();
        let cfg = config();

        let mut text = String::new();
        let sentence = "However, the multifaceted implications of this phenomenon \
            necessitate a comprehensive examination of the underlying structural \
            factors that govern the observed behavior across numerous domains";
        for _ in 0..22 {
            text.push_str(sentence);
            text.push_str(". ");
        }
        text.push_str("Furthermore, in conclusion, in addition, the evidence is clear.");

        let first = analyzer.on_content_delta(0, &text, Some(now), now, &cfg);
        assert!(first
            .iter()
            .any(|d| d.kind == ViolationKind::AiContentDetected));

        // Appending more of the same never fires a second time
        let longer = format!("{text}{text}");
        let second =
            analyzer.on_content_delta(text.chars().count(), &longer, Some(now), now, &cfg);
        assert!(second
            .iter()
            .all(|d| d.kind != ViolationKind::AiContentDetected));

        // A reset re-arms the classifier
        analyzer.reset();
        let rearmed = analyzer.on_content_delta(0, &text, Some(now), now, &cfg);
        assert!(rearmed
            .iter()
            .any(|d| d.kind == ViolationKind::AiContentDetected));
    }

    #[test]
    fn inactivity_stages_fire_in_order() {
        let t0 = Instant::now();
        let mut analyzer = TypingAnalyzer::new();
        let cfg = config();
        analyzer.start_typing(t0);

        // Quiet before the first threshold
        let early = analyzer.periodic_check(50, Some(t0), t0 + Duration::from_secs(200), &cfg);
        assert!(early
            .iter()
            .all(|d| d.kind != ViolationKind::ExcessiveInactivity));

        let first =
            analyzer.periodic_check(50, Some(t0), t0 + Duration::from_secs(300), &cfg);
        let idle = first
            .iter()
            .find(|d| d.kind == ViolationKind::ExcessiveInactivity)
            .expect("first inactivity event");
        assert_eq!(idle.time_away_seconds, 300);

        // Between thresholds: nothing new
        let between =
            analyzer.periodic_check(50, Some(t0), t0 + Duration::from_secs(450), &cfg);
        assert!(between
            .iter()
            .all(|d| d.kind != ViolationKind::ExcessiveInactivity));

        let second =
            analyzer.periodic_check(50, Some(t0), t0 + Duration::from_secs(600), &cfg);
        let idle = second
            .iter()
            .find(|d| d.kind == ViolationKind::ExcessiveInactivity)
            .expect("follow-up inactivity event");
        assert_eq!(idle.time_away_seconds, 600);

        // Activity re-arms the staging
        analyzer.note_activity();
        let requiet = analyzer.periodic_check(
            50,
            Some(t0 + Duration::from_secs(650)),
            t0 + Duration::from_secs(700),
            &cfg,
        );
        assert!(requiet
            .iter()
            .all(|d| d.kind != ViolationKind::ExcessiveInactivity));
    }
}
