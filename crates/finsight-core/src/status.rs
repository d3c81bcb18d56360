//! Ingestion status state machine.
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | `Pending` | `Fetching` | worker picks up the job |
//! | `Retrying` | `Fetching` | retry re-enqueued and picked up |
//! | `Fetching` | `Extracting` | fetch succeeded |
//! | `Fetching` | `Retrying` | transient fetch error, retries left |
//! | `Fetching` | `Failed` | permanent fetch error or retries exhausted |
//! | `Extracting` | `Completed` | extraction succeeded |
//! | `Extracting` | `Failed` | extraction error (never retried) |
//! | `Pending`, `Retrying` | `Failed` | job could not be admitted to the queue |
//! | `Completed`, `Failed` | `Pending` | new attempt (scheduled re-check) |
//!
//! `Completed` and `Failed` end an attempt. A scheduled re-check starts a
//! new attempt by moving a terminal material back to `Pending`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialStatus {
    Pending,
    Fetching,
    Extracting,
    Retrying,
    Completed,
    Failed,
}

impl MaterialStatus {
    pub const ALL: [MaterialStatus; 6] = [
        MaterialStatus::Pending,
        MaterialStatus::Fetching,
        MaterialStatus::Extracting,
        MaterialStatus::Retrying,
        MaterialStatus::Completed,
        MaterialStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialStatus::Pending => "pending",
            MaterialStatus::Fetching => "fetching",
            MaterialStatus::Extracting => "extracting",
            MaterialStatus::Retrying => "retrying",
            MaterialStatus::Completed => "completed",
            MaterialStatus::Failed => "failed",
        }
    }

    /// `Completed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MaterialStatus::Completed | MaterialStatus::Failed)
    }

    pub fn can_transition_to(&self, next: MaterialStatus) -> bool {
        use MaterialStatus::*;
        matches!(
            (*self, next),
            (Pending, Fetching)
                | (Retrying, Fetching)
                | (Fetching, Extracting)
                | (Fetching, Retrying)
                | (Fetching, Failed)
                | (Extracting, Completed)
                | (Extracting, Failed)
                | (Completed, Pending)
                | (Failed, Pending)
                | (Pending, Failed)
                | (Retrying, Failed)
        )
    }

    /// All states from which `next` may be entered.
    pub fn predecessors(next: MaterialStatus) -> Vec<MaterialStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for MaterialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown material status: '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MaterialStatus::*;

    #[test]
    fn happy_path_is_allowed() {
        assert!(Pending.can_transition_to(Fetching));
        assert!(Fetching.can_transition_to(Extracting));
        assert!(Extracting.can_transition_to(Completed));
    }

    #[test]
    fn retry_loop_is_allowed() {
        assert!(Fetching.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Fetching));
    }

    #[test]
    fn extraction_failures_do_not_retry() {
        assert!(Extracting.can_transition_to(Failed));
        assert!(!Extracting.can_transition_to(Retrying));
    }

    #[test]
    fn terminal_states_only_restart_from_pending() {
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in MaterialStatus::ALL {
                assert_eq!(terminal.can_transition_to(next), next == Pending);
            }
        }
    }

    #[test]
    fn no_skipping_stages() {
        assert!(!Pending.can_transition_to(Extracting));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Fetching.can_transition_to(Completed));
    }

    #[test]
    fn predecessors_of_fetching() {
        let mut preds = MaterialStatus::predecessors(Fetching);
        preds.sort_by_key(|s| s.as_str());
        assert_eq!(preds, vec![Pending, Retrying]);
    }

    #[test]
    fn parse_roundtrip() {
        for st in MaterialStatus::ALL {
            assert_eq!(st.as_str().parse::<MaterialStatus>().unwrap(), st);
        }
        assert!("done".parse::<MaterialStatus>().is_err());
    }
}
