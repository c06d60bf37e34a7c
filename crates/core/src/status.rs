//! Job lifecycle state machine.
//!
//! `queued → running → {done, error}`. `done` and `error` are terminal.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// States a job may be in immediately before entering `self`.
    ///
    /// Empty for `queued`: that state is only ever assigned at creation.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Queued => &[],
            JobStatus::Running => &[JobStatus::Queued],
            JobStatus::Done | JobStatus::Error => &[JobStatus::Running],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }

    pub fn check_transition(&self, next: JobStatus) -> DomainResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job status: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn happy_paths_are_allowed() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Done));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Error));
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for next in JobStatus::ALL {
            assert!(!JobStatus::Done.can_transition_to(next));
            assert!(!JobStatus::Error.can_transition_to(next));
        }
    }

    #[test]
    fn queued_cannot_skip_running() {
        let err = JobStatus::Queued.check_transition(JobStatus::Done).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Done
            }
        );
    }

    #[test]
    fn parses_wire_names() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    fn any_status() -> impl Strategy<Value = JobStatus> {
        prop::sample::select(JobStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn accepted_history_is_a_prefix_of_the_lifecycle(attempts in prop::collection::vec(any_status(), 0..16)) {
            let mut history = vec![JobStatus::Queued];
            for next in attempts {
                let current = *history.last().unwrap();
                if current.check_transition(next).is_ok() {
                    history.push(next);
                }
            }

            prop_assert!(history.len() <= 3);
            prop_assert_eq!(history[0], JobStatus::Queued);
            if history.len() > 1 {
                prop_assert_eq!(history[1], JobStatus::Running);
            }
            if history.len() == 3 {
                prop_assert!(history[2].is_terminal());
            }
        }
    }
}
