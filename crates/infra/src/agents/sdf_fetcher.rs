//! Copies each job's side-definition file (`sdfPath`) next to its log as `<stem>.jdl`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use hgcs_core::{Clock, Expr, Job, SdfState, attr, normalize_path};

use crate::dedup::DedupCache;
use crate::fs_ops::{self, FsError, Placed};
use crate::queue::QueueClient;
use crate::retry::{RetryExecutor, RetryPolicy};

use super::{Agent, CycleError, CycleReport, write_back};

pub const NAME: &str = "SDFFetcher";

pub const DEST_EXTENSION: &str = "jdl";
pub const DEST_MODE: u32 = 0o644;

const PROJECTION: &[&str] = &[
    attr::IWD,
    attr::USER_LOG,
    attr::SUBMIT_USER_LOG,
    attr::SDF_PATH,
    attr::SDF_COPIED,
];

/// What happened to one job's side-definition file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdfOutcome {
    /// No side-definition file declared; no write-back needed.
    NoOp,
    /// No log to place the file next to; flagged as done.
    NoDestination,
    /// The file is at its destination.
    Copied(PathBuf),
    /// The source can never be fetched.
    Failed,
    /// Transient trouble; try again next cycle.
    Deferred,
}

#[derive(Debug)]
pub struct SdfFetcher {
    limit: Option<usize>,
    cache: DedupCache,
    write_back: RetryExecutor,
}

impl SdfFetcher {
    pub fn new(flush_period: Duration, limit: Option<usize>, clock: Arc<dyn Clock>) -> Self {
        Self {
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

    pub fn constraint() -> Expr {
        Expr::attr(attr::SDF_COPIED)
            .undefined_check()
            .or(Expr::attr(attr::SDF_COPIED).equals(Expr::Int(0)))
            .and(Expr::attr(attr::SDF_PATH).string_check())
    }

    pub fn fetch(job: &Job) -> SdfOutcome {
        let Some(source) = source_of(job) else {
            return SdfOutcome::NoOp;
        };
        let Some(dest) = destination_of(job) else {
            debug!(agent = NAME, job_id = %job.id, "no SUBMIT_UserLog nor UserLog; skipped");
            return SdfOutcome::NoDestination;
        };

        match fs_ops::check_regular_target(&source) {
            Ok(()) => {}
            Err(err @ (FsError::Missing(_) | FsError::NotRegularFile(_))) => {
                error!(agent = NAME, job_id = %job.id, error = %err, "side-definition file unusable; giving up");
                return SdfOutcome::Failed;
            }
            Err(err) => {
                warn!(agent = NAME, job_id = %job.id, error = %err, "cannot inspect side-definition file");
                return SdfOutcome::Deferred;
            }
        }

        if fs_ops::exists(&dest) {
            debug!(agent = NAME, job_id = %job.id, dest = %dest.display(), "already exists; skipped");
            return SdfOutcome::Copied(dest);
        }

        match fs_ops::copy_no_clobber_with_mode(&source, &dest, DEST_MODE) {
            Ok(Placed::Created) => {
                debug!(agent = NAME, job_id = %job.id, dest = %dest.display(), "copied");
                SdfOutcome::Copied(dest)
            }
            Ok(Placed::AlreadyExists) => {
                debug!(agent = NAME, job_id = %job.id, dest = %dest.display(), "appeared meanwhile; skipped");
                SdfOutcome::Copied(dest)
            }
            Err(err) => {
                warn!(agent = NAME, job_id = %job.id, error = %err, "copy failed; will retry");
                SdfOutcome::Deferred
            }
        }
    }

    fn write_batch(
        &mut self,
        queue: &dyn QueueClient,
        ids: Vec<hgcs_core::JobId>,
        flag: i64,
        report: &mut CycleReport,
    ) {
        if write_back(
            &self.write_back,
            queue,
            NAME,
            &ids,
            attr::SDF_COPIED,
            &Expr::Int(flag),
            report,
        ) {
            self.cache.extend(ids);
        }
    }
}

fn resolve(job: &Job, name: &str) -> PathBuf {
    let iwd = Path::new(job.iwd.as_deref().unwrap_or(""));
    normalize_path(&iwd.join(name))
}

fn source_of(job: &Job) -> Option<PathBuf> {
    job.sdf_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(|p| resolve(job, p))
}

/// `<log dir>/<log stem>.jdl`, using `SUBMIT_UserLog` or else `UserLog`.
pub fn destination_of(job: &Job) -> Option<PathBuf> {
    let log = job
        .submit_user_log
        .as_deref()
        .or(job.user_log.as_deref())
        .filter(|p| !p.is_empty())?;
    Some(resolve(job, log).with_extension(DEST_EXTENSION))
}

impl Agent for SdfFetcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run_cycle(&mut self, queue: &dyn QueueClient) -> Result<CycleReport, CycleError> {
        self.cache.flush_if_due(NAME);
        let mut report = CycleReport::default();

        let jobs = queue
            .query(&Self::constraint(), PROJECTION, self.limit)
            .map_err(CycleError::Query)?;

        let mut copied = Vec::new();
        let mut failed = Vec::new();
        for job in jobs {
            let job = job.map_err(CycleError::Query)?;
            report.candidates += 1;
            if self.cache.contains(&job.id) || job.sdf_copied != SdfState::Pending {
                report.skipped += 1;
                continue;
            }
            match Self::fetch(&job) {
                SdfOutcome::NoOp => {
                    debug!(agent = NAME, job_id = %job.id, "nothing to fetch");
                    report.handled += 1;
                    self.cache.insert(job.id);
                }
                SdfOutcome::Copied(_) | SdfOutcome::NoDestination => {
                    report.handled += 1;
                    copied.push(job.id);
                }
                SdfOutcome::Failed => {
                    report.failed += 1;
                    failed.push(job.id);
                }
                SdfOutcome::Deferred => report.failed += 1,
            }
        }

        self.write_batch(queue, copied, SdfState::COPIED, &mut report);
        self.write_batch(queue, failed, SdfState::FAILED, &mut report);
        Ok(report)
    }
}
