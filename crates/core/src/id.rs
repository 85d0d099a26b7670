//! Job identifiers as the remote queue knows them.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a job in the remote queue: `(cluster, proc)`, written `"cluster.proc"`.
///
/// Unique within the queue at a point in time. The queue may reuse an id once the
/// job record has been purged, so ids are never assumed stable across purges.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct JobId {
    cluster: u64,
    proc: u64,
}

/// A string that is not a `cluster.proc` job id.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid job id {0:?}: expected <cluster>.<proc>")]
pub struct InvalidJobId(pub String);

impl JobId {
    pub fn new(cluster: u64, proc: u64) -> Self {
        Self { cluster, proc }
    }

    pub fn cluster(&self) -> u64 {
        self.cluster
    }

    pub fn proc(&self) -> u64 {
        self.proc
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.cluster, self.proc)
    }
}

impl FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidJobId(s.to_string());
        let (cluster, proc) = s.split_once('.').ok_or_else(invalid)?;
        let cluster = cluster.parse().map_err(|_| invalid())?;
        let proc = proc.parse().map_err(|_| invalid())?;
        Ok(Self { cluster, proc })
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for JobId {
    type Error = InvalidJobId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_cluster_dot_proc() {
        assert_eq!(JobId::new(18769, 3).to_string(), "18769.3");
    }

    #[test]
    fn parses_cluster_dot_proc() {
        let id: JobId = "42.0".parse().unwrap();
        assert_eq!(id, JobId::new(42, 0));
        assert_eq!(id.cluster(), 42);
        assert_eq!(id.proc(), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!("42".parse::<JobId>().is_err());
        assert!("a.b".parse::<JobId>().is_err());
        assert!("1.2.3".parse::<JobId>().is_err());
        assert!("".parse::<JobId>().is_err());
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&JobId::new(7, 1)).unwrap();
        assert_eq!(json, "\"7.1\"");
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, JobId::new(7, 1));
    }
}
