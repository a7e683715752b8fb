use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of detected suspicious behavior.
///
/// Serialized form matches the grading server's `violation_type` strings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    AppSwitch,
    RapidCompletion,
    PasteDetected,
    SuspiciousActivity,
    ExcessiveInactivity,
    AiContentDetected,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::AppSwitch => "app_switch",
            ViolationKind::RapidCompletion => "rapid_completion",
            ViolationKind::PasteDetected => "paste_detected",
            ViolationKind::SuspiciousActivity => "suspicious_activity",
            ViolationKind::ExcessiveInactivity => "excessive_inactivity",
            ViolationKind::AiContentDetected => "ai_content_detected",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "tab_switch" => Some(ViolationKind::TabSwitch),
            "app_switch" => Some(ViolationKind::AppSwitch),
            "rapid_completion" => Some(ViolationKind::RapidCompletion),
            "paste_detected" => Some(ViolationKind::PasteDetected),
            "suspicious_activity" => Some(ViolationKind::SuspiciousActivity),
            "excessive_inactivity" => Some(ViolationKind::ExcessiveInactivity),
            "ai_content_detected" => Some(ViolationKind::AiContentDetected),
            _ => None,
        }
    }
}

/// Severity drives whether a violation surfaces a user-facing alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }

    pub fn alerts(&self) -> bool {
        matches!(self, Severity::Medium | Severity::High)
    }
}

/// A rule firing, before it is stamped and persisted by the reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub description: String,
    pub time_away_seconds: i64,
    pub content_added_during_absence: Option<i64>,
    pub ai_similarity_score: Option<f64>,
    pub paste_content_length: Option<i64>,
}

impl Detection {
    pub fn new(kind: ViolationKind, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            time_away_seconds: 0,
            content_added_during_absence: None,
            ai_similarity_score: None,
            paste_content_length: None,
        }
    }

    pub fn time_away(mut self, seconds: i64) -> Self {
        self.time_away_seconds = seconds;
        self
    }

    pub fn content_added(mut self, chars: i64) -> Self {
        self.content_added_during_absence = Some(chars);
        self
    }

    pub fn ai_score(mut self, score: f64) -> Self {
        self.ai_similarity_score = Some(score);
        self
    }

    pub fn paste_length(mut self, chars: i64) -> Self {
        self.paste_content_length = Some(chars);
        self
    }
}

/// An immutable record of one detected suspicious behavior.
///
/// The serialized shape is the grading server's violation contract
/// (snake_case, RFC 3339 `detected_at`); the same shape is stored locally so
/// a record survives transport failures untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub student_id: i64,
    pub assignment_id: i64,
    pub violation_type: ViolationKind,
    pub severity: Severity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub time_away_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_added_during_absence: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_similarity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paste_content_length: Option<i64>,
}

impl Violation {
    pub fn from_detection(
        detection: Detection,
        student_id: i64,
        assignment_id: i64,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            student_id,
            assignment_id,
            violation_type: detection.kind,
            severity: detection.severity,
            description: detection.description,
            detected_at,
            time_away_seconds: detection.time_away_seconds,
            content_added_during_absence: detection.content_added_during_absence,
            ai_similarity_score: detection.ai_similarity_score,
            paste_content_length: detection.paste_content_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_round_trip() {
        for kind in [
            ViolationKind::TabSwitch,
            ViolationKind::AppSwitch,
            ViolationKind::RapidCompletion,
            ViolationKind::PasteDetected,
            ViolationKind::SuspiciousActivity,
            ViolationKind::ExcessiveInactivity,
            ViolationKind::AiContentDetected,
        ] {
            assert_eq!(ViolationKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ViolationKind::from_str("something_else"), None);
    }

    #[test]
    fn wire_shape_matches_server_contract() {
        let detection = Detection::new(
            ViolationKind::AppSwitch,
            Severity::High,
            "content grew while hidden",
        )
        .time_away(12)
        .content_added(240);

        let violation = Violation::from_detection(detection, 42, 7, Utc::now());
        let json = serde_json::to_value(&violation).unwrap();

        assert_eq!(json["violation_type"], "app_switch");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["student_id"], 42);
        assert_eq!(json["assignment_id"], 7);
        assert_eq!(json["time_away_seconds"], 12);
        assert_eq!(json["content_added_during_absence"], 240);
        // Unset optionals and the local id stay off the wire
        assert!(json.get("ai_similarity_score").is_none());
        assert!(json.get("id").is_none());
    }

    #[test]
    fn severity_alert_policy() {
        assert!(!Severity::Low.alerts());
        assert!(Severity::Medium.alerts());
        assert!(Severity::High.alerts());
    }
}
