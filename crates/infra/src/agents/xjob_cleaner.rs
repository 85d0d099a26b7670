//! Purges jobs that have sat in the `Removed` state longer than a grace period.

use std::time::Duration;

use tracing::info;

use hgcs_core::{Expr, JobStatus, attr};

use crate::queue::{JobAction, QueueClient};
use crate::retry::{RetryExecutor, RetryPolicy};

use super::{Agent, CycleError, CycleReport, RemovalLock};

pub const NAME: &str = "XJobCleaner";

#[derive(Debug)]
pub struct XJobCleaner {
    grace: Duration,
    lock: RemovalLock,
    executor: RetryExecutor,
}

impl XJobCleaner {
    pub fn new(grace: Duration, lock: RemovalLock) -> Self {
        Self {
            grace,
            lock,
            executor: RetryExecutor::new(NAME, RetryPolicy::write_back()),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = RetryExecutor::new(NAME, policy);
        self
    }

    /// Removed jobs whose time in that state reached `grace`.
    pub fn constraint(grace: Duration) -> Expr {
        Expr::attr(attr::JOB_STATUS)
            .meta_equals(JobStatus::Removed.expr())
            .and(
                Expr::age_of(attr::ENTERED_CURRENT_STATUS)
                    .at_least(Expr::seconds(grace)),
            )
    }
}

impl Agent for XJobCleaner {
    fn name(&self) -> &'static str {
        NAME
    }

    fn run_cycle(&mut self, queue: &dyn QueueClient) -> Result<CycleReport, CycleError> {
        let constraint = Self::constraint(self.grace);
        let summary = self
            .executor
            .run("remove", |_| {
                let _guard = self.lock.lock();
                queue.act(JobAction::RemoveX, &constraint)
            })
            .map_err(CycleError::Action)?;

        info!(agent = NAME, affected = ?summary.affected, detail = %summary.detail, "purged removed jobs");
        let affected = summary.affected.unwrap_or_default();
        Ok(CycleReport {
            candidates: affected,
            handled: affected,
            ..CycleReport::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hgcs_core::{ClassAd, ManualClock, QueueError};

    use crate::queue::{InMemoryQueue, Operation, RemoteCall};
    use crate::retry::OnExhaust;

    const DAY: u64 = 86_400;

    fn removed_job(queue: &InMemoryQueue, cluster: i64) -> hgcs_core::JobId {
        let id = queue
            .insert(
                ClassAd::new()
                    .with(attr::CLUSTER_ID, Expr::Int(cluster))
                    .with(attr::PROC_ID, Expr::Int(0))
                    .with(attr::JOB_STATUS, JobStatus::Running.expr()),
            )
            .unwrap();
        queue.set_status(id, JobStatus::Removed);
        id
    }

    fn cleaner() -> XJobCleaner {
        XJobCleaner::new(Duration::from_secs(DAY), RemovalLock::new())
            .with_retry_policy(RetryPolicy::fixed(3, Duration::ZERO, OnExhaust::LogAndSkip))
    }

    #[test]
    fn renders_filter_with_grace() {
        assert_eq!(
            XJobCleaner::constraint(Duration::from_secs(DAY)).to_string(),
            "JobStatus =?= 3 && time() - EnteredCurrentStatus >= 86400"
        );
        assert_eq!(
            XJobCleaner::constraint(Duration::from_secs(u64::MAX)).to_string(),
            format!("JobStatus =?= 3 && time() - EnteredCurrentStatus >= {}", i64::MAX)
        );
    }

    #[test]
    fn purges_only_after_grace_period() {
        let clock = ManualClock::at_unix(1_000_000);
        let queue = InMemoryQueue::new(Arc::new(clock.clone()));
        let id = removed_job(&queue, 1);
        let mut agent = cleaner();

        clock.advance_secs(DAY as i64 - 1);
        assert_eq!(agent.run_cycle(&queue).unwrap().handled, 0);
        assert!(queue.contains(id));

        clock.advance_secs(1);
        assert_eq!(agent.run_cycle(&queue).unwrap().handled, 1);
        assert!(!queue.contains(id));
    }

    #[test]
    fn one_bulk_call_per_cycle() {
        let clock = ManualClock::at_unix(0);
        let queue = InMemoryQueue::new(Arc::new(clock.clone()));
        removed_job(&queue, 1);
        removed_job(&queue, 2);
        clock.advance_secs(DAY as i64);

        let report = cleaner().run_cycle(&queue).unwrap();

        assert_eq!(report.handled, 2);
        assert_eq!(
            queue.calls(),
            vec![RemoteCall::Act {
                action: JobAction::RemoveX,
                constraint: "JobStatus =?= 3 && time() - EnteredCurrentStatus >= 86400".to_string(),
            }]
        );
    }

    #[test]
    fn action_failure_is_retried_then_reported() {
        let queue = InMemoryQueue::new(Arc::new(ManualClock::at_unix(0)));
        queue.fail_always(Operation::Act, QueueError::action("schedd busy"));

        let err = cleaner().run_cycle(&queue).unwrap_err();

        assert!(matches!(err, CycleError::Action(_)));
        assert_eq!(queue.calls().len(), 3);
    }

    #[test]
    fn waits_for_the_shared_lock() {
        let queue = InMemoryQueue::arc(Arc::new(ManualClock::at_unix(0)));
        let lock = RemovalLock::new();
        let guard = lock.lock();

        let worker = {
            let queue = Arc::clone(&queue);
            let lock = lock.clone();
            std::thread::spawn(move || {
                XJobCleaner::new(Duration::from_secs(DAY), lock)
                    .run_cycle(queue.as_ref())
                    .unwrap()
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(queue.calls().is_empty());
        drop(guard);
        worker.join().unwrap();
        assert_eq!(queue.calls().len(), 1);
    }
}
