mod controller;
mod engine;

pub use controller::{ContentSource, MonitorStatus, SupervisionController};
pub use engine::{Outcome, SupervisionEngine};
