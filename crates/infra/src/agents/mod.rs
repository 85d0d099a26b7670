//! Reconciliation agents.
//!
//! ## Cycle
//!
//! Each agent runs the same loop (see [`runner`]):
//!
//! 1. acquire the shared queue handle (connection retry profile)
//! 2. flush the dedup cache if its epoch is over, then query candidates
//! 3. classify and act on each job; per-job failures are logged and the job is
//!    left out of the write-back
//! 4. write results back to the queue in batches (write-back retry profile);
//!    only confirmed ids enter the dedup cache
//! 5. sleep `sleep_period`, measured from the end of the cycle
//!
//! A failed query abandons the cycle before anything is written. A failed
//! write-back batch is dropped: its ids never reached the cache, so the next
//! cycle's query returns them again.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use hgcs_core::{Expr, JobId, QueueError};

use crate::queue::QueueClient;
use crate::retry::{RetryError, RetryExecutor};

pub mod cleanup_delayer;
pub mod log_retriever;
pub mod registry;
pub mod runner;
pub mod sdf_fetcher;
pub mod xjob_cleaner;

pub use cleanup_delayer::CleanupDelayer;
pub use log_retriever::{LogRetriever, RetrieveMode};
pub use registry::{AgentDeps, AgentSpec, ConfiguredAgent, REGISTRY, build_agents, spawn_agents};
pub use runner::{AgentExit, AgentHandle, AgentRunner, CycleOutcome};
pub use sdf_fetcher::{SdfFetcher, SdfOutcome};
pub use xjob_cleaner::XJobCleaner;

/// One reconciliation policy.
pub trait Agent: Send {
    /// Policy name, as used in configuration and logs.
    fn name(&self) -> &'static str;

    /// Run one query → classify → act → write-back pass against `queue`.
    fn run_cycle(&mut self, queue: &dyn QueueClient) -> Result<CycleReport, CycleError>;
}

/// Counters for one cycle, logged when the cycle ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Jobs returned by the query.
    pub candidates: usize,
    /// Jobs skipped because they were already handled this epoch.
    pub skipped: usize,
    /// Jobs whose action succeeded (or needed none).
    pub handled: usize,
    /// Jobs whose action failed; they are reconsidered next cycle.
    pub failed: usize,
    /// Job ids whose write-back the queue confirmed.
    pub written_back: usize,
    /// Job ids whose write-back was abandoned this cycle.
    pub write_back_failed: usize,
    /// A remote call after the query failed with a connection error.
    pub connection_lost: bool,
}

/// Why a cycle was abandoned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("could not acquire queue: {0}")]
    Connection(RetryError),

    #[error("query failed: {0}")]
    Query(QueueError),

    #[error("action failed: {0}")]
    Action(RetryError),
}

impl CycleError {
    /// Whether the cached queue handle should be dropped.
    pub fn is_connection(&self) -> bool {
        match self {
            CycleError::Connection(_) => true,
            CycleError::Query(e) => e.is_connection(),
            CycleError::Action(e) => e.last_error().is_connection(),
        }
    }
}

/// Process-wide lock held around the bulk-remove action.
///
/// Queries and edits never take it.
#[derive(Debug, Clone, Default)]
pub struct RemovalLock(Arc<Mutex<()>>);

impl RemovalLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }
}

/// Write `attr = value` to every job in `ids` in one retried call, counting
/// the result into `report`.
///
/// Returns whether the queue confirmed the write. An empty batch is trivially
/// confirmed without a remote call.
pub(crate) fn write_back(
    executor: &RetryExecutor,
    queue: &dyn QueueClient,
    agent: &'static str,
    ids: &[JobId],
    attr: &str,
    value: &Expr,
    report: &mut CycleReport,
) -> bool {
    if ids.is_empty() {
        return true;
    }
    match executor.run("edit", |_| queue.edit(ids, attr, value)) {
        Ok(()) => {
            debug!(agent, attr, value = %value, jobs = ids.len(), "write-back confirmed");
            report.written_back += ids.len();
            true
        }
        Err(err) => {
            report.write_back_failed += ids.len();
            report.connection_lost |= err.last_error().is_connection();
            warn!(
                agent,
                attr,
                jobs = ids.len(),
                error = %err,
                "write-back abandoned; jobs will be reconsidered next cycle"
            );
            false
        }
    }
}
