use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use hgcs_core::{ClassAd, Expr, Job, JobId, QueueResult};

/// Lazy, single-use sequence of jobs produced by one query.
///
/// An `Err` item means the listing broke off part-way; the caller must treat
/// everything seen so far as incomplete.
pub type JobIter<'a> = Box<dyn Iterator<Item = QueueResult<Job>> + Send + 'a>;

/// Bulk state transitions understood by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobAction {
    /// Forcibly purge jobs that are already in the `Removed` state.
    RemoveX,
}

impl core::fmt::Display for JobAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            JobAction::RemoveX => f.write_str("RemoveX"),
        }
    }
}

/// What a bulk action reported back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSummary {
    /// Number of jobs the action applied to, when the queue reports it.
    pub affected: Option<usize>,
    /// Free-form text returned by the queue.
    pub detail: String,
}

/// Operations the agents need from the remote job queue.
///
/// Implementations must be safe to share between agent threads; each call is
/// independent and carries no per-caller state.
pub trait QueueClient: Send + Sync {
    /// List jobs matching `constraint`, fetching only `projection` attributes
    /// (empty = all) and at most `limit` jobs.
    fn query(
        &self,
        constraint: &Expr,
        projection: &[&str],
        limit: Option<usize>,
    ) -> QueueResult<JobIter<'_>>;

    /// Set `attr` to `value` on every job in `ids` in one request.
    ///
    /// Not atomic across the id list: on failure any subset may have been applied.
    fn edit(&self, ids: &[JobId], attr: &str, value: &Expr) -> QueueResult<()>;

    /// Apply a bulk action to every job matching `constraint`.
    fn act(&self, action: JobAction, constraint: &Expr) -> QueueResult<ActionSummary>;

    /// Ask the queue to transfer the output sandbox of `ids` back to the submit side.
    fn transfer_output(&self, ids: &[JobId]) -> QueueResult<()>;
}

/// Produces connected queue clients.
pub trait QueueConnector: Send + Sync {
    fn connect(&self) -> QueueResult<Arc<dyn QueueClient>>;
}

/// Turn raw ads into jobs, skipping (and logging) ads that are not jobs.
pub(crate) fn jobs_from_ads<'a, I>(ads: I) -> JobIter<'a>
where
    I: Iterator<Item = QueueResult<ClassAd>> + Send + 'a,
{
    Box::new(ads.filter_map(|ad| match ad {
        Ok(ad) => match Job::from_ad(&ad) {
            Ok(job) => Some(Ok(job)),
            Err(err) => {
                warn!(error = %err, "ignoring unreadable job ad");
                None
            }
        },
        Err(err) => Some(Err(err)),
    }))
}
