use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, warn};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{Detection, Severity, Violation, ViolationKind};

/// Outbound delivery of violation records. Delivery is best-effort: the
/// local log stays authoritative whatever happens on the wire.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, violation: &Violation) -> Result<()>;
}

/// User-facing alert surface provided by the embedding UI.
pub trait AlertSink: Send + Sync {
    /// Transient notice for a medium/high violation.
    fn transient(&self, severity: Severity, message: &str);
    /// Blocking warning shown after a punitive reset.
    fn blocking(&self, message: &str);
}

/// Ships violations to the grading server's `/violations/` endpoint.
pub struct HttpReportSink {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpReportSink {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token,
        }
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn deliver(&self, violation: &Violation) -> Result<()> {
        let url = format!("{}/violations/", self.base_url.trim_end_matches('/'));
        let mut request = self
            .client
            .post(&url)
            .header("X-Client-Report-Id", Uuid::new_v4().to_string())
            .json(violation)
            .timeout(Duration::from_secs(10));

        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| anyhow!("violation delivery failed: {err}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("violation delivery rejected ({status}): {body}"));
        }

        Ok(())
    }
}

/// Builds immutable violation records from rule detections, rate-limits
/// repeats, persists locally, raises alerts, and forwards best-effort.
pub struct ViolationReporter {
    student_id: i64,
    assignment_id: i64,
    db: Database,
    sink: Option<Arc<dyn ReportSink>>,
    alerts: Option<Arc<dyn AlertSink>>,
    log: Mutex<Vec<Violation>>,
    last_emitted: Mutex<HashMap<ViolationKind, Instant>>,
    dedupe_window: Duration,
}

impl ViolationReporter {
    pub fn new(
        student_id: i64,
        assignment_id: i64,
        db: Database,
        sink: Option<Arc<dyn ReportSink>>,
        alerts: Option<Arc<dyn AlertSink>>,
        dedupe_window: Duration,
    ) -> Self {
        Self {
            student_id,
            assignment_id,
            db,
            sink,
            alerts,
            log: Mutex::new(Vec::new()),
            last_emitted: Mutex::new(HashMap::new()),
            dedupe_window,
        }
    }

    /// Load violations persisted by earlier sessions for this assignment.
    pub async fn hydrate(&self) -> Result<usize> {
        let existing = self.db.get_violations(self.assignment_id).await?;
        let count = existing.len();
        let mut log = self.log.lock().unwrap_or_else(|p| p.into_inner());
        *log = existing;
        Ok(count)
    }

    /// Record one detection. Returns the stored violation, or `None` when the
    /// rate limit dropped it.
    pub async fn report(&self, detection: Detection, now: Instant) -> Result<Option<Violation>> {
        {
            let mut last = self.last_emitted.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(at) = last.get(&detection.kind) {
                if now.saturating_duration_since(*at) < self.dedupe_window {
                    debug!(
                        "suppressing repeat {} violation inside rate-limit window",
                        detection.kind.as_str()
                    );
                    return Ok(None);
                }
            }
            last.insert(detection.kind, now);
        }

        let severity = detection.severity;
        let description = detection.description.clone();
        let violation =
            Violation::from_detection(detection, self.student_id, self.assignment_id, Utc::now());

        // Local persistence is authoritative; a write failure degrades to
        // the in-memory record only.
        let stored = match self.db.insert_violation(&violation).await {
            Ok(stored) => stored,
            Err(err) => {
                error!("failed to persist violation locally: {err:#}");
                violation
            }
        };

        {
            let mut log = self.log.lock().unwrap_or_else(|p| p.into_inner());
            log.push(stored.clone());
        }

        if severity.alerts() {
            if let Some(alerts) = &self.alerts {
                alerts.transient(severity, &description);
            }
        }

        if let Some(sink) = &self.sink {
            let sink = Arc::clone(sink);
            let outbound = stored.clone();
            tokio::spawn(async move {
                if let Err(err) = sink.deliver(&outbound).await {
                    warn!(
                        "violation report not delivered ({}): {err:#}",
                        outbound.violation_type.as_str()
                    );
                }
            });
        }

        Ok(Some(stored))
    }

    /// Surface the blocking punitive-reset warning.
    pub fn blocking_warning(&self, message: &str) {
        if let Some(alerts) = &self.alerts {
            alerts.blocking(message);
        }
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.log.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn violation_count(&self) -> usize {
        self.log.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Drop the whole log, memory and disk. Only submission and unsubmit may
    /// do this.
    pub async fn clear(&self) -> Result<()> {
        self.db.clear_violations(self.assignment_id).await?;
        self.log.lock().unwrap_or_else(|p| p.into_inner()).clear();
        self.last_emitted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        Ok(())
    }
}
