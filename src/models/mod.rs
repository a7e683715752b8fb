mod session;
mod snapshot;
mod violation;

pub use session::{Mode, SessionState};
pub use snapshot::SessionSnapshot;
pub use violation::{Detection, Severity, Violation, ViolationKind};
