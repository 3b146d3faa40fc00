//! Job lifecycle statuses and the edges permitted between them.

use std::fmt;

use jobdock_api_types::JobStatusName;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job. The status of a stored record is the partition it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Queued,
    Completed,
    Failed,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Created,
        JobStatus::Queued,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Order in which partitions are consulted when resolving a job's status.
    /// Most polls happen after completion, so `Completed` goes first.
    pub const READ_PRIORITY: [JobStatus; 4] = [
        JobStatus::Completed,
        JobStatus::Created,
        JobStatus::Queued,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Queued => "queued",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a record may move directly from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Created, JobStatus::Queued)
                | (JobStatus::Queued, JobStatus::Completed)
                | (JobStatus::Queued, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(JobStatus::Created),
            "queued" => Ok(JobStatus::Queued),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        JobStatus::try_from(value).map_err(|_| {
            format!("unknown status `{value}` (expected created, queued, completed or failed)")
        })
    }
}

impl From<JobStatus> for JobStatusName {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Created => JobStatusName::Created,
            JobStatus::Queued => JobStatusName::Queued,
            JobStatus::Completed => JobStatusName::Completed,
            JobStatus::Failed => JobStatusName::Failed,
        }
    }
}

/// Small set of statuses, used as the target of a completion wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSet {
    bits: u8,
}

impl StatusSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `Completed` and `Failed`.
    pub fn terminal() -> Self {
        Self::from_iter([JobStatus::Completed, JobStatus::Failed])
    }

    pub fn with(mut self, status: JobStatus) -> Self {
        self.bits |= Self::bit(status);
        self
    }

    pub fn contains(&self, status: JobStatus) -> bool {
        self.bits & Self::bit(status) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = JobStatus> + '_ {
        JobStatus::ALL
            .into_iter()
            .filter(move |status| self.contains(*status))
    }

    fn bit(status: JobStatus) -> u8 {
        match status {
            JobStatus::Created => 1,
            JobStatus::Queued => 1 << 1,
            JobStatus::Completed => 1 << 2,
            JobStatus::Failed => 1 << 3,
        }
    }
}

impl FromIterator<JobStatus> for StatusSet {
    fn from_iter<I: IntoIterator<Item = JobStatus>>(iter: I) -> Self {
        iter.into_iter()
            .fold(StatusSet::empty(), |set, status| set.with(status))
    }
}

impl fmt::Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(JobStatus::as_str).collect();
        f.write_str(&names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_edges_are_permitted() {
        use JobStatus::*;

        let permitted: Vec<(JobStatus, JobStatus)> = JobStatus::ALL
            .into_iter()
            .flat_map(|from| JobStatus::ALL.into_iter().map(move |to| (from, to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            permitted,
            vec![(Created, Queued), (Queued, Completed), (Queued, Failed)]
        );
    }

    #[test]
    fn parses_status_names_case_insensitively() {
        assert_eq!(JobStatus::try_from("Queued"), Ok(JobStatus::Queued));
        assert_eq!(" FAILED ".parse::<JobStatus>(), Ok(JobStatus::Failed));
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn status_set_membership() {
        let set = StatusSet::terminal();
        assert!(set.contains(JobStatus::Completed));
        assert!(set.contains(JobStatus::Failed));
        assert!(!set.contains(JobStatus::Queued));
        assert_eq!(set.to_string(), "completed,failed");
        assert!(StatusSet::empty().is_empty());
    }
}
