//! Job snapshot as returned by one queue query.
//!
//! A [`Job`] is read-only: agents never mutate it locally. Every change to a job
//! goes back to the queue as an attribute edit or a bulk action.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classad::ClassAd;
use crate::expr::Expr;
use crate::id::JobId;

/// Attribute names the agents read or write.
pub mod attr {
    pub const CLUSTER_ID: &str = "ClusterId";
    pub const PROC_ID: &str = "ProcId";
    pub const JOB_STATUS: &str = "JobStatus";
    pub const ENTERED_CURRENT_STATUS: &str = "EnteredCurrentStatus";
    pub const IWD: &str = "Iwd";
    pub const ERR: &str = "Err";
    pub const OUT: &str = "Out";
    pub const USER_LOG: &str = "UserLog";
    pub const SUBMIT_USER_LOG: &str = "SUBMIT_UserLog";
    pub const SUBMIT_TRANSFER_OUTPUT_REMAPS: &str = "SUBMIT_TransferOutputRemaps";
    pub const SDF_PATH: &str = "sdfPath";
    pub const SDF_COPIED: &str = "sdfCopied";
    pub const LEAVE_JOB_IN_QUEUE: &str = "LeaveJobInQueue";
}

/// Job status codes as used by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    TransferringOutput,
    Suspended,
    Other(i64),
}

impl JobStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Idle,
            2 => Self::Running,
            3 => Self::Removed,
            4 => Self::Completed,
            5 => Self::Held,
            6 => Self::TransferringOutput,
            7 => Self::Suspended,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Idle => 1,
            Self::Running => 2,
            Self::Removed => 3,
            Self::Completed => 4,
            Self::Held => 5,
            Self::TransferringOutput => 6,
            Self::Suspended => 7,
            Self::Other(code) => code,
        }
    }

    /// Literal for use in filter expressions.
    pub fn expr(self) -> Expr {
        Expr::Int(self.code())
    }
}

/// State of the `LeaveJobInQueue` retention attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retention {
    Unset,
    Enabled,
    Disabled,
    /// Retained while an expression holds, e.g. for a delay after the last status change.
    Conditional(String),
}

/// State of the `sdfCopied` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdfState {
    /// Unset or 0.
    Pending,
    /// 1
    Copied,
    /// 2: copying failed permanently, never retried.
    Failed,
    Unknown(i64),
}

impl SdfState {
    pub const COPIED: i64 = 1;
    pub const FAILED: i64 = 2;

    fn from_code(code: Option<i64>) -> Self {
        match code {
            None | Some(0) => Self::Pending,
            Some(Self::COPIED) => Self::Copied,
            Some(Self::FAILED) => Self::Failed,
            Some(other) => Self::Unknown(other),
        }
    }
}

/// An ad that cannot be read as a job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobParseError {
    #[error("job ad lacks integer attribute {0}")]
    MissingId(&'static str),
}

/// Snapshot of one job's attributes for a single reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub entered_current_status: Option<i64>,
    pub iwd: Option<String>,
    pub err: Option<String>,
    pub out: Option<String>,
    pub user_log: Option<String>,
    pub submit_user_log: Option<String>,
    pub output_remaps: Option<String>,
    pub sdf_path: Option<String>,
    pub sdf_copied: SdfState,
    pub retention: Retention,
}

impl Job {
    /// Read a job from an ad returned by the queue.
    pub fn from_ad(ad: &ClassAd) -> Result<Self, JobParseError> {
        let cluster = ad
            .int(attr::CLUSTER_ID)
            .and_then(|v| u64::try_from(v).ok())
            .ok_or(JobParseError::MissingId(attr::CLUSTER_ID))?;
        let proc = ad
            .int(attr::PROC_ID)
            .and_then(|v| u64::try_from(v).ok())
            .ok_or(JobParseError::MissingId(attr::PROC_ID))?;

        let text = |name: &str| ad.string(name).map(str::to_string);

        let retention = match ad.get(attr::LEAVE_JOB_IN_QUEUE) {
            None | Some(Expr::Undefined) => Retention::Unset,
            Some(Expr::Bool(true)) => Retention::Enabled,
            Some(Expr::Bool(false)) => Retention::Disabled,
            Some(other) => Retention::Conditional(other.to_string()),
        };

        Ok(Self {
            id: JobId::new(cluster, proc),
            status: JobStatus::from_code(ad.int(attr::JOB_STATUS).unwrap_or_default()),
            entered_current_status: ad.int(attr::ENTERED_CURRENT_STATUS),
            iwd: text(attr::IWD),
            err: text(attr::ERR),
            out: text(attr::OUT),
            user_log: text(attr::USER_LOG),
            submit_user_log: text(attr::SUBMIT_USER_LOG).filter(|s| !s.is_empty()),
            output_remaps: text(attr::SUBMIT_TRANSFER_OUTPUT_REMAPS),
            sdf_path: text(attr::SDF_PATH).filter(|s| !s.is_empty()),
            sdf_copied: SdfState::from_code(ad.int(attr::SDF_COPIED)),
            retention,
        })
    }

    /// Parsed output-remap table (empty when the attribute is absent).
    pub fn remaps(&self) -> OutputRemaps {
        self.output_remaps
            .as_deref()
            .map(OutputRemaps::parse)
            .unwrap_or_default()
    }
}

/// `name=path` overrides for where output files of a job should land.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputRemaps {
    entries: Vec<(String, PathBuf)>,
}

impl OutputRemaps {
    /// Parse `name=path;name=path`. Entries that are not a plain file name
    /// mapped to a plain path are ignored.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().trim_matches('"');
        let entries = raw
            .split(';')
            .filter_map(|entry| {
                let (name, path) = entry.split_once('=')?;
                let (name, path) = (name.trim(), path.trim());
                let name_ok = !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
                let path_ok = !path.is_empty()
                    && path
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'));
                (name_ok && path_ok).then(|| (name.to_string(), normalize_path(Path::new(path))))
            })
            .collect();
        Self { entries }
    }

    /// Destination override for a source file name; the last matching entry wins.
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into its parent.
///
/// Does not touch the file system, so symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_ad() -> ClassAd {
        ClassAd::new()
            .with(attr::CLUSTER_ID, Expr::Int(18769))
            .with(attr::PROC_ID, Expr::Int(2))
            .with(attr::JOB_STATUS, Expr::Int(4))
    }

    #[test]
    fn parses_minimal_job() {
        let job = Job::from_ad(&base_ad()).unwrap();
        assert_eq!(job.id, JobId::new(18769, 2));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retention, Retention::Unset);
        assert_eq!(job.sdf_copied, SdfState::Pending);
        assert!(job.remaps().is_empty());
    }

    #[test]
    fn missing_id_is_an_error() {
        let ad = ClassAd::new().with(attr::CLUSTER_ID, Expr::Int(1));
        assert_eq!(
            Job::from_ad(&ad),
            Err(JobParseError::MissingId(attr::PROC_ID))
        );
    }

    #[test]
    fn reads_retention_states() {
        let job = |v: Expr| {
            Job::from_ad(&base_ad().with(attr::LEAVE_JOB_IN_QUEUE, v))
                .unwrap()
                .retention
        };
        assert_eq!(job(Expr::Bool(true)), Retention::Enabled);
        assert_eq!(job(Expr::Bool(false)), Retention::Disabled);
        assert_eq!(
            job(Expr::age_of("EnteredCurrentStatus").less_than(Expr::Int(10))),
            Retention::Conditional("time() - EnteredCurrentStatus < 10".to_string())
        );
    }

    #[test]
    fn reads_sdf_flag() {
        let job = |v: i64| {
            Job::from_ad(&base_ad().with(attr::SDF_COPIED, Expr::Int(v)))
                .unwrap()
                .sdf_copied
        };
        assert_eq!(job(0), SdfState::Pending);
        assert_eq!(job(1), SdfState::Copied);
        assert_eq!(job(2), SdfState::Failed);
        assert_eq!(job(9), SdfState::Unknown(9));
    }

    #[test]
    fn status_codes_round_trip() {
        for code in 1..=7 {
            assert_eq!(JobStatus::from_code(code).code(), code);
        }
        assert_eq!(JobStatus::from_code(42), JobStatus::Other(42));
    }

    #[test]
    fn remaps_parse_valid_entries_only() {
        let remaps = OutputRemaps::parse("\"job.out=/spool/a/./job.out; bad entry ;job.err=/spool/x/../b/job.err\"");
        assert_eq!(remaps.len(), 2);
        assert_eq!(remaps.get("job.out"), Some(Path::new("/spool/a/job.out")));
        assert_eq!(remaps.get("job.err"), Some(Path::new("/spool/b/job.err")));
        assert_eq!(remaps.get("job.log"), None);
    }

    #[test]
    fn remaps_reject_shell_characters() {
        let remaps = OutputRemaps::parse("a.out=/tmp/$(whoami)");
        assert!(remaps.is_empty());
    }

    #[test]
    fn normalizes_lexically() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize_path(Path::new("./")), PathBuf::from("."));
    }

    proptest::proptest! {
        #[test]
        fn absolute_paths_normalize_to_plain_components(
            segments in proptest::collection::vec(
                proptest::sample::select(vec!["a", "bb", "..", ".", "c.log"]),
                0..12,
            )
        ) {
            let raw = format!("/{}", segments.join("/"));
            let normalized = normalize_path(Path::new(&raw));
            proptest::prop_assert!(normalized.is_absolute());
            proptest::prop_assert!(normalized
                .components()
                .all(|c| matches!(c, Component::RootDir | Component::Normal(_))));
            proptest::prop_assert_eq!(normalize_path(&normalized), normalized);
        }
    }
}
