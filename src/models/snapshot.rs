use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time serialization of session progress, durable across reloads.
///
/// The camelCase shape is what the original pages kept in local storage; a
/// stored record is only honored when both `assignment_id` and `route_path`
/// match the live context, so timing state never leaks between assignments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub assignment_id: i64,
    pub route_path: String,
    pub active_minutes: f64,
    pub last_update: DateTime<Utc>,
    pub strict_mode: bool,
    pub has_typed: bool,
    pub keystroke_count: u64,
    pub content_snapshot: String,
    pub content_length: usize,
}

impl SessionSnapshot {
    /// Whether this snapshot belongs to the given live context.
    pub fn matches(&self, assignment_id: i64, route_path: &str) -> bool {
        self.assignment_id == assignment_id && self.route_path == route_path
    }

    pub fn active_ms(&self) -> u64 {
        (self.active_minutes * 60_000.0).max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            assignment_id: 7,
            route_path: "/assignments/7".into(),
            active_minutes: 12.5,
            last_update: Utc::now(),
            strict_mode: true,
            has_typed: true,
            keystroke_count: 430,
            content_snapshot: "draft".into(),
            content_length: 5,
        }
    }

    #[test]
    fn match_requires_both_keys() {
        let snap = snapshot();
        assert!(snap.matches(7, "/assignments/7"));
        assert!(!snap.matches(8, "/assignments/7"));
        assert!(!snap.matches(7, "/assignments/8"));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(snapshot()).unwrap();
        assert!(json.get("activeMinutes").is_some());
        assert!(json.get("routePath").is_some());
        assert!(json.get("keystrokeCount").is_some());
    }

    #[test]
    fn active_ms_conversion() {
        assert_eq!(snapshot().active_ms(), 750_000);
    }
}
