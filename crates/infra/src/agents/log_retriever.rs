//! Retrieves stdout/stderr/user logs of finished jobs to the submit-side spool.
//!
//! Once every file of a job is in place the job's `LeaveJobInQueue` is turned
//! off (one batched edit per cycle), which lets the queue forget the job.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use hgcs_core::{Clock, Expr, Job, JobStatus, attr, normalize_path};

use crate::dedup::DedupCache;
use crate::fs_ops::{self, Placed};
use crate::queue::QueueClient;
use crate::retry::{RetryExecutor, RetryPolicy};

use super::{Agent, CycleError, CycleReport, write_back};

pub const NAME: &str = "LogRetriever";

const PROJECTION: &[&str] = &[
    attr::JOB_STATUS,
    attr::IWD,
    attr::ERR,
    attr::OUT,
    attr::USER_LOG,
    attr::SUBMIT_USER_LOG,
    attr::SUBMIT_TRANSFER_OUTPUT_REMAPS,
];

/// How job files reach the spool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieveMode {
    /// Copy the files (no-clobber).
    #[default]
    Copy,
    /// Symlink the spool entries to the files in the working directory.
    Symlink,
    /// Let the queue transfer the output sandbox itself.
    Remote,
}

impl core::str::FromStr for RetrieveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "copy" => Ok(Self::Copy),
            "symlink" => Ok(Self::Symlink),
            "remote" | "condor" => Ok(Self::Remote),
            other => Err(format!("unknown retrieve mode {other:?}")),
        }
    }
}

/// One file of a job and where it should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug)]
pub struct LogRetriever {
    mode: RetrieveMode,
    limit: Option<usize>,
    cache: DedupCache,
    write_back: RetryExecutor,
}

impl LogRetriever {
    pub fn new(
        mode: RetrieveMode,
        flush_period: Duration,
        limit: Option<usize>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mode,
            limit,
            cache: DedupCache::new(flush_period, clock),
            write_back: RetryExecutor::new(NAME, RetryPolicy::write_back()),
        }
    }

    pub fn with_write_back_policy(mut self, policy: RetryPolicy) -> Self {
        self.write_back = RetryExecutor::new(NAME, policy);
        self
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut DedupCache {
        &mut self.cache
    }

    /// Finished jobs with a spool destination whose retention is not already off.
    pub fn constraint() -> Expr {
        Expr::attr(attr::SUBMIT_USER_LOG)
            .string_check()
            .and(Expr::attr(attr::LEAVE_JOB_IN_QUEUE).isnt(Expr::Bool(false)))
            .and(
                Expr::attr(attr::JOB_STATUS)
                    .equals(JobStatus::Completed.expr())
                    .or(Expr::attr(attr::JOB_STATUS).equals(JobStatus::Removed.expr())),
            )
    }

    /// Whether all of the job's files are now in place.
    fn retrieve(&self, queue: &dyn QueueClient, job: &Job, report: &mut CycleReport) -> bool {
        match self.mode {
            RetrieveMode::Copy | RetrieveMode::Symlink => self.place_files(job),
            RetrieveMode::Remote => {
                match self
                    .write_back
                    .run("transfer_output", |_| queue.transfer_output(&[job.id]))
                {
                    Ok(()) => true,
                    Err(err) => {
                        error!(agent = NAME, job_id = %job.id, error = %err, "output transfer failed");
                        report.connection_lost |= err.last_error().is_connection();
                        false
                    }
                }
            }
        }
    }

    fn place_files(&self, job: &Job) -> bool {
        let Some(transfers) = plan_transfers(job) else {
            debug!(agent = NAME, job_id = %job.id, "no spool destination; skipped");
            return true;
        };

        let mut ok = true;
        for Transfer {
            source,
            destination,
        } in transfers
        {
            if let Err(err) = fs_ops::check_regular_file(&source) {
                if job.status != JobStatus::Completed {
                    debug!(agent = NAME, job_id = %job.id, error = %err, "source absent for unfinished job; skipped");
                    continue;
                }
                error!(agent = NAME, job_id = %job.id, error = %err, "source is not a regular file");
                ok = false;
                continue;
            }

            let placed = match self.mode {
                RetrieveMode::Symlink => fs_ops::symlink_no_clobber(&source, &destination),
                _ => fs_ops::copy_no_clobber(&source, &destination),
            };
            match placed {
                Ok(Placed::Created) => {
                    debug!(agent = NAME, job_id = %job.id, dest = %destination.display(), "placed")
                }
                Ok(Placed::AlreadyExists) => {
                    debug!(agent = NAME, job_id = %job.id, dest = %destination.display(), "already exists; skipped")
                }
                Err(err) => {
                    error!(agent = NAME, job_id = %job.id, error = %err, "cannot place file");
                    ok = false;
                }
            }
        }
        ok
    }
}

/// Resolve source and destination of each declared file, or `None` when the job
/// has no spool destination at all.
///
/// The user log lands at `SUBMIT_UserLog`; stdout and stderr keep their file
/// names in the same directory. A remap entry for a declared name wins.
pub fn plan_transfers(job: &Job) -> Option<Vec<Transfer>> {
    let submit_log = Path::new(job.submit_user_log.as_deref()?);
    let spool_dir = submit_log.parent().unwrap_or(Path::new(""));
    let iwd = Path::new(job.iwd.as_deref().unwrap_or(""));
    let remaps = job.remaps();

    let declared = [
        (job.err.as_deref(), None),
        (job.out.as_deref(), None),
        (job.user_log.as_deref(), Some(submit_log)),
    ];

    let transfers = declared
        .into_iter()
        .filter_map(|(name, fixed_dest)| {
            let name = name.filter(|n| !n.is_empty())?;
            let destination = match remaps.get(name) {
                Some(path) => path.to_path_buf(),
                None => match fixed_dest {
                    Some(path) => path.to_path_buf(),
                    None => spool_dir.join(Path::new(name).file_name()?),
                },
            };
            Some(Transfer {
                source: normalize_path(&iwd.join(name)),
                destination: normalize_path(&destination),
            })
        })
        .collect();
    Some(transfers)
}

impl Agent for LogRetriever {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run_cycle(&mut self, queue: &dyn QueueClient) -> Result<CycleReport, CycleError> {
        self.cache.flush_if_due(NAME);
        let mut report = CycleReport::default();

        let jobs = queue
            .query(&Self::constraint(), PROJECTION, self.limit)
            .map_err(CycleError::Query)?;

        let mut retrieved = Vec::new();
        for job in jobs {
            let job = job.map_err(CycleError::Query)?;
            report.candidates += 1;
            if self.cache.contains(&job.id) {
                report.skipped += 1;
                continue;
            }
            debug!(agent = NAME, job_id = %job.id, status = ?job.status, "retrieving job files");
            if self.retrieve(queue, &job, &mut report) {
                report.handled += 1;
                retrieved.push(job.id);
            } else {
                report.failed += 1;
            }
        }

        if write_back(
            &self.write_back,
            queue,
            NAME,
            &retrieved,
            attr::LEAVE_JOB_IN_QUEUE,
            &Expr::Bool(false),
            &mut report,
        ) {
            self.cache.extend(retrieved);
        }
        Ok(report)
    }
}
