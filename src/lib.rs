//! Client-side supervision engine for assignment submissions.
//!
//! Tracks genuine editing time for an assignment and watches for behavior
//! that suggests outside assistance: content appearing while the page is
//! hidden, rapid tab switching, implausible typing speed, large pastes,
//! AI-styled prose, and long stretches of inactivity. Findings are recorded
//! locally in SQLite and forwarded best-effort to the grading server.
//!
//! The [`supervisor::SupervisionController`] is the entry point: the
//! embedding UI feeds it keystroke, content and visibility events and it
//! drives the tick loop, persistence and reporting. All rule logic lives in
//! the synchronous [`supervisor::SupervisionEngine`] underneath, which only
//! sees the instants the controller hands it.

pub mod analysis;
pub mod config;
pub mod db;
pub mod models;
pub mod reporting;
pub mod supervisor;

pub use config::{looks_text_based, MonitorConfig, MonitorTarget};
pub use db::Database;
pub use models::{Detection, Mode, SessionSnapshot, Severity, Violation, ViolationKind};
pub use reporting::{AlertSink, HttpReportSink, ReportSink, ViolationReporter};
pub use supervisor::{ContentSource, MonitorStatus, SupervisionController, SupervisionEngine};
