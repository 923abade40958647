//! Job status and its ordered status code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::Error;

/// Status of a task attempt.
///
/// Progress order within one attempt:
/// - Pending -> Scheduled -> Running -> Retrying -> {Stopped | Error | Finished}
///
/// The three final statuses share the same code, so none of them can
/// replace another inside the same attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Scheduled,
    Running,
    Retrying,
    Stopped,
    Error,
    Finished,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::Pending,
        Status::Scheduled,
        Status::Running,
        Status::Retrying,
        Status::Stopped,
        Status::Error,
        Status::Finished,
    ];

    /// Numeric encoding used for intra-attempt progress comparison.
    pub fn code(self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Scheduled => 1,
            Status::Running => 2,
            Status::Retrying => 3,
            Status::Stopped | Status::Error | Status::Finished => 4,
        }
    }

    /// Is this a terminal status (the state machine halts here)?
    pub fn is_final(self) -> bool {
        matches!(self, Status::Stopped | Status::Error | Status::Finished)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::Scheduled => "Scheduled",
            Status::Running => "Running",
            Status::Retrying => "Retrying",
            Status::Stopped => "Stopped",
            Status::Error => "Error",
            Status::Finished => "Finished",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn codes_follow_progress_order() {
        assert!(Status::Pending.code() < Status::Scheduled.code());
        assert!(Status::Scheduled.code() < Status::Running.code());
        assert!(Status::Running.code() < Status::Retrying.code());
        assert!(Status::Retrying.code() < Status::Finished.code());
        assert_eq!(Status::Stopped.code(), Status::Error.code());
        assert_eq!(Status::Error.code(), Status::Finished.code());
    }

    #[rstest]
    #[case::pending(Status::Pending, false)]
    #[case::scheduled(Status::Scheduled, false)]
    #[case::running(Status::Running, false)]
    #[case::retrying(Status::Retrying, false)]
    #[case::stopped(Status::Stopped, true)]
    #[case::error(Status::Error, true)]
    #[case::finished(Status::Finished, true)]
    fn final_statuses(#[case] status: Status, #[case] expected: bool) {
        assert_eq!(status.is_final(), expected);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("running".parse::<Status>().unwrap(), Status::Running);
        assert_eq!("STOPPED".parse::<Status>().unwrap(), Status::Stopped);
    }

    #[test]
    fn parse_rejects_unknown_status() {
        let err = "Success".parse::<Status>().unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(s) if s == "Success"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Status::Retrying).unwrap();
        assert_eq!(json, "\"Retrying\"");
    }
}
