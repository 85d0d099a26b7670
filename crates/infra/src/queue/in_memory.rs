use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use hgcs_core::{
    ClassAd, Clock, Expr, Job, JobId, JobParseError, JobStatus, QueueError, QueueResult, attr,
};

use super::r#trait::{ActionSummary, JobAction, JobIter, QueueClient, QueueConnector, jobs_from_ads};

/// Remote operations that can be made to fail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Query,
    Edit,
    Act,
    Transfer,
}

/// A remote call as the queue saw it, with expressions in their rendered form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Query {
        constraint: String,
        limit: Option<usize>,
    },
    Edit {
        ids: Vec<JobId>,
        attr: String,
        value: String,
    },
    Act {
        action: JobAction,
        constraint: String,
    },
    Transfer {
        ids: Vec<JobId>,
    },
}

#[derive(Debug)]
struct Fault {
    error: QueueError,
    /// `None` = fail forever.
    remaining: Option<usize>,
}

/// In-memory job queue.
///
/// Intended for tests/dev. Evaluates the same expressions a real queue would
/// receive, records every call, and can be told to fail specific operations.
pub struct InMemoryQueue {
    ads: RwLock<BTreeMap<JobId, ClassAd>>,
    clock: Arc<dyn Clock>,
    faults: Mutex<HashMap<Operation, VecDeque<Fault>>>,
    query_breaks_after: Mutex<Option<usize>>,
    edit_applies_first: Mutex<Option<usize>>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl core::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("jobs", &self.ads.read().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl InMemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            ads: RwLock::new(BTreeMap::new()),
            clock,
            faults: Mutex::new(HashMap::new()),
            query_breaks_after: Mutex::new(None),
            edit_applies_first: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn arc(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self::new(clock))
    }

    /// Add (or replace) a job. The ad must carry `ClusterId` and `ProcId`.
    pub fn insert(&self, ad: ClassAd) -> Result<JobId, JobParseError> {
        let id = Job::from_ad(&ad)?.id;
        self.ads.write().insert(id, ad);
        Ok(id)
    }

    /// Change a job's status, stamping `EnteredCurrentStatus` with the current time.
    pub fn set_status(&self, id: JobId, status: JobStatus) {
        let now = self.clock.unix_now();
        if let Some(ad) = self.ads.write().get_mut(&id) {
            ad.insert(attr::JOB_STATUS, status.expr());
            ad.insert(attr::ENTERED_CURRENT_STATUS, Expr::Int(now));
        }
    }

    /// Overwrite one attribute directly (an out-of-band change by an operator).
    pub fn set_attr(&self, id: JobId, name: &str, value: Expr) {
        if let Some(ad) = self.ads.write().get_mut(&id) {
            ad.insert(name, value);
        }
    }

    pub fn ad(&self, id: JobId) -> Option<ClassAd> {
        self.ads.read().get(&id).cloned()
    }

    pub fn attr(&self, id: JobId, name: &str) -> Option<Expr> {
        self.ads.read().get(&id)?.get(name).cloned()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.ads.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ads.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ads.read().is_empty()
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: Operation, error: QueueError) {
        self.fail_times(op, error, 1);
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn fail_times(&self, op: Operation, error: QueueError, times: usize) {
        if times == 0 {
            return;
        }
        self.faults.lock().entry(op).or_default().push_back(Fault {
            error,
            remaining: Some(times),
        });
    }

    /// Make every future call of `op` fail with `error`.
    pub fn fail_always(&self, op: Operation, error: QueueError) {
        self.faults.lock().entry(op).or_default().push_back(Fault {
            error,
            remaining: None,
        });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
        *self.query_breaks_after.lock() = None;
        *self.edit_applies_first.lock() = None;
    }

    /// Make the next query yield `n` jobs and then an error.
    pub fn break_next_query_after(&self, n: usize) {
        *self.query_breaks_after.lock() = Some(n);
    }

    /// Make the next edit apply to its first `n` ids only and then fail.
    pub fn apply_next_edit_partially(&self, n: usize) {
        *self.edit_applies_first.lock() = Some(n);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Recorded edits of one attribute, in call order.
    pub fn edits_of(&self, name: &str) -> Vec<(Vec<JobId>, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RemoteCall::Edit { ids, attr, value } if attr == name => {
                    Some((ids.clone(), value.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn take_fault(&self, op: Operation) -> QueueResult<()> {
        let mut faults = self.faults.lock();
        let Some(queue) = faults.get_mut(&op) else {
            return Ok(());
        };
        let Some(front) = queue.front_mut() else {
            return Ok(());
        };
        let error = front.error.clone();
        match &mut front.remaining {
            Some(n) if *n <= 1 => {
                queue.pop_front();
            }
            Some(n) => *n -= 1,
            None => {}
        }
        Err(error)
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().push(call);
    }
}

impl QueueClient for InMemoryQueue {
    fn query(
        &self,
        constraint: &Expr,
        projection: &[&str],
        limit: Option<usize>,
    ) -> QueueResult<JobIter<'_>> {
        self.record(RemoteCall::Query {
            constraint: constraint.to_string(),
            limit,
        });
        self.take_fault(Operation::Query)?;

        let now = self.clock.unix_now();
        let mut projection = projection.to_vec();
        if !projection.is_empty() {
            projection.extend([attr::CLUSTER_ID, attr::PROC_ID]);
        }
        let matched: Vec<QueueResult<ClassAd>> = self
            .ads
            .read()
            .values()
            .filter(|ad| constraint.matches(ad, now))
            .take(limit.unwrap_or(usize::MAX))
            .map(|ad| Ok(ad.project(&projection)))
            .collect();

        let breaks_after = self.query_breaks_after.lock().take();
        let ads: Box<dyn Iterator<Item = QueueResult<ClassAd>> + Send> = match breaks_after {
            Some(n) => Box::new(
                matched
                    .into_iter()
                    .take(n)
                    .chain(std::iter::once(Err(QueueError::query("listing interrupted")))),
            ),
            None => Box::new(matched.into_iter()),
        };
        Ok(jobs_from_ads(ads))
    }

    fn edit(&self, ids: &[JobId], name: &str, value: &Expr) -> QueueResult<()> {
        self.record(RemoteCall::Edit {
            ids: ids.to_vec(),
            attr: name.to_string(),
            value: value.to_string(),
        });
        self.take_fault(Operation::Edit)?;

        let partial = self.edit_applies_first.lock().take();
        let applied = partial.unwrap_or(ids.len()).min(ids.len());
        let mut ads = self.ads.write();
        for id in &ids[..applied] {
            if let Some(ad) = ads.get_mut(id) {
                ad.insert(name, value.clone());
            }
        }
        match partial {
            Some(n) => Err(QueueError::edit(format!(
                "connection dropped after {n} of {} jobs",
                ids.len()
            ))),
            None => Ok(()),
        }
    }

    fn act(&self, action: JobAction, constraint: &Expr) -> QueueResult<ActionSummary> {
        self.record(RemoteCall::Act {
            action,
            constraint: constraint.to_string(),
        });
        self.take_fault(Operation::Act)?;

        let now = self.clock.unix_now();
        let mut ads = self.ads.write();
        let doomed: Vec<JobId> = ads
            .iter()
            .filter(|(_, ad)| constraint.matches(ad, now))
            .filter(|(_, ad)| ad.int(attr::JOB_STATUS) == Some(JobStatus::Removed.code()))
            .map(|(id, _)| *id)
            .collect();
        for id in &doomed {
            ads.remove(id);
        }
        Ok(ActionSummary {
            affected: Some(doomed.len()),
            detail: format!("{action} applied to {} jobs", doomed.len()),
        })
    }

    fn transfer_output(&self, ids: &[JobId]) -> QueueResult<()> {
        self.record(RemoteCall::Transfer { ids: ids.to_vec() });
        self.take_fault(Operation::Transfer)
    }
}

/// Hands out the same [`InMemoryQueue`] on every connect, unless a
/// [`Operation::Connect`] fault is pending.
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    queue: Arc<InMemoryQueue>,
}

impl InMemoryConnector {
    pub fn new(queue: Arc<InMemoryQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<InMemoryQueue> {
        &self.queue
    }
}

impl QueueConnector for InMemoryConnector {
    fn connect(&self) -> QueueResult<Arc<dyn QueueClient>> {
        self.queue.take_fault(Operation::Connect)?;
        Ok(self.queue.clone())
    }
}
