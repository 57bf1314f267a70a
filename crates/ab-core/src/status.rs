use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a trial or a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Unknown,
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Canceled,
    TimedOut,
}

impl Status {
    /// Terminal statuses never transition further.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::Failed | Status::Canceled | Status::TimedOut
        )
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Status::Succeeded)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Status::Pending | Status::Ready)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Unknown => "UNKNOWN",
            Status::Pending => "PENDING",
            Status::Ready => "READY",
            Status::Running => "RUNNING",
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
            Status::Canceled => "CANCELED",
            Status::TimedOut => "TIMED_OUT",
        };
        write!(f, "{s}")
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        for s in [
            Status::Succeeded,
            Status::Failed,
            Status::Canceled,
            Status::TimedOut,
        ] {
            assert!(s.is_completed());
        }
        for s in [Status::Unknown, Status::Pending, Status::Ready, Status::Running] {
            assert!(!s.is_completed());
        }
    }

    #[test]
    fn ready_predicate() {
        assert!(Status::Pending.is_ready());
        assert!(Status::Ready.is_ready());
        assert!(!Status::Running.is_ready());
    }

    #[test]
    fn display_roundtrips_serde() {
        let s = Status::Succeeded;
        let json = serde_json::to_string(&s).unwrap();
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
