//! Keeps jobs without a submit-side log in the queue for a while after their
//! last status change, so they remain inspectable once they leave it.

use std::time::Duration;

use tracing::debug;

use hgcs_core::{Expr, JobStatus, attr};

use crate::queue::QueueClient;
use crate::retry::{RetryExecutor, RetryPolicy};

use super::{Agent, CycleError, CycleReport, write_back};

pub const NAME: &str = "CleanupDelayer";

const DELAYED_STATUSES: [JobStatus; 5] = [
    JobStatus::Idle,
    JobStatus::Running,
    JobStatus::Held,
    JobStatus::TransferringOutput,
    JobStatus::Suspended,
];

#[derive(Debug)]
pub struct CleanupDelayer {
    delay: Duration,
    limit: Option<usize>,
    write_back: RetryExecutor,
}

impl CleanupDelayer {
    pub fn new(delay: Duration, limit: Option<usize>) -> Self {
        Self {
            delay,
            limit,
            write_back: RetryExecutor::new(NAME, RetryPolicy::write_back()),
        }
    }

    pub fn with_write_back_policy(mut self, policy: RetryPolicy) -> Self {
        self.write_back = RetryExecutor::new(NAME, policy);
        self
    }

    pub fn constraint() -> Expr {
        Expr::attr(attr::SUBMIT_USER_LOG)
            .is(Expr::Undefined)
            .and(Expr::attr(attr::LEAVE_JOB_IN_QUEUE).is(Expr::Bool(false)))
            .and(Expr::attr(attr::JOB_STATUS).member_of(DELAYED_STATUSES.map(JobStatus::expr)))
    }

    /// Retention predicate written to matched jobs.
    pub fn retention(&self) -> Expr {
        Expr::age_of(attr::ENTERED_CURRENT_STATUS).less_than(Expr::seconds(self.delay))
    }
}

impl Agent for CleanupDelayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run_cycle(&mut self, queue: &dyn QueueClient) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport::default();
        let jobs = queue
            .query(&Self::constraint(), &[attr::JOB_STATUS], self.limit)
            .map_err(CycleError::Query)?;

        let mut ids = Vec::new();
        for job in jobs {
            let job = job.map_err(CycleError::Query)?;
            debug!(agent = NAME, job_id = %job.id, status = ?job.status, "delaying cleanup");
            ids.push(job.id);
        }
        report.candidates = ids.len();
        report.handled = ids.len();

        write_back(
            &self.write_back,
            queue,
            NAME,
            &ids,
            attr::LEAVE_JOB_IN_QUEUE,
            &self.retention(),
            &mut report,
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hgcs_core::{ClassAd, Clock, JobId, ManualClock};

    use crate::queue::{InMemoryQueue, RemoteCall};

    fn job(cluster: i64, status: JobStatus, submit_log: bool, retained: bool) -> ClassAd {
        let ad = ClassAd::new()
            .with(attr::CLUSTER_ID, Expr::Int(cluster))
            .with(attr::PROC_ID, Expr::Int(0))
            .with(attr::JOB_STATUS, status.expr())
            .with(attr::LEAVE_JOB_IN_QUEUE, Expr::Bool(retained));
        if submit_log {
            ad.with(attr::SUBMIT_USER_LOG, Expr::str("/spool/x.log"))
        } else {
            ad
        }
    }

    #[test]
    fn renders_filter_and_value() {
        assert_eq!(
            CleanupDelayer::constraint().to_string(),
            "SUBMIT_UserLog is undefined && LeaveJobInQueue is false && member(JobStatus, {1, 2, 5, 6, 7})"
        );
        assert_eq!(
            CleanupDelayer::new(Duration::from_secs(7200), None)
                .retention()
                .to_string(),
            "time() - EnteredCurrentStatus < 7200"
        );
        assert_eq!(
            CleanupDelayer::new(Duration::from_secs(u64::MAX), None)
                .retention()
                .to_string(),
            format!("time() - EnteredCurrentStatus < {}", i64::MAX)
        );
    }

    #[test]
    fn matched_jobs_get_retention_predicate_in_one_edit() {
        let clock = ManualClock::at_unix(50_000);
        let queue = InMemoryQueue::new(Arc::new(clock.clone()));
        let idle = queue.insert(job(1, JobStatus::Idle, false, false)).unwrap();
        let held = queue.insert(job(2, JobStatus::Held, false, false)).unwrap();
        queue.insert(job(3, JobStatus::Completed, false, false)).unwrap();
        queue.insert(job(4, JobStatus::Running, true, false)).unwrap();
        queue.insert(job(5, JobStatus::Running, false, true)).unwrap();

        let mut agent = CleanupDelayer::new(Duration::from_secs(7200), None);
        let report = agent.run_cycle(&queue).unwrap();

        assert_eq!(report.written_back, 2);
        assert_eq!(
            queue.edits_of(attr::LEAVE_JOB_IN_QUEUE),
            vec![(
                vec![idle, held],
                "time() - EnteredCurrentStatus < 7200".to_string()
            )]
        );

        // Written predicate keeps the job until the delay has passed.
        queue.set_status(idle, JobStatus::Completed);
        let retention = queue.attr(idle, attr::LEAVE_JOB_IN_QUEUE).unwrap();
        let ad = queue.ad(idle).unwrap();
        assert!(retention.matches(&ad, clock.unix_now()));
        assert!(!retention.matches(&ad, clock.unix_now() + 7200));
    }

    #[test]
    fn nothing_matched_means_no_edit() {
        let queue = InMemoryQueue::new(Arc::new(ManualClock::at_unix(0)));
        queue.insert(job(1, JobStatus::Completed, false, false)).unwrap();

        let report = CleanupDelayer::new(Duration::from_secs(60), None)
            .run_cycle(&queue)
            .unwrap();

        assert_eq!(report, CycleReport::default());
        assert!(
            queue
                .calls()
                .iter()
                .all(|c| matches!(c, RemoteCall::Query { .. }))
        );
    }

    #[test]
    fn delayed_jobs_fall_out_of_the_filter() {
        let queue = InMemoryQueue::new(Arc::new(ManualClock::at_unix(0)));
        let id: JobId = queue.insert(job(1, JobStatus::Running, false, false)).unwrap();
        let mut agent = CleanupDelayer::new(Duration::from_secs(60), None);

        agent.run_cycle(&queue).unwrap();
        let report = agent.run_cycle(&queue).unwrap();

        assert_eq!(report.candidates, 0);
        assert_eq!(queue.edits_of(attr::LEAVE_JOB_IN_QUEUE).len(), 1);
        assert!(queue.contains(id));
    }
}
