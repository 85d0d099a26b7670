//! Per-agent memory of jobs already handled in the current flush epoch.
//!
//! The cache is an optimisation, not the source of truth: whether a job is done
//! is recorded on the job itself in the queue. Ids are only added after the
//! matching write-back was confirmed, so losing the cache (restart, flush)
//! costs repeated work but never skipped work.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use hgcs_core::{Clock, JobId};

pub struct DedupCache {
    ids: HashSet<JobId>,
    flush_period: Duration,
    last_flush: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DedupCache")
            .field("len", &self.ids.len())
            .field("flush_period", &self.flush_period)
            .field("last_flush", &self.last_flush)
            .finish()
    }
}

impl DedupCache {
    pub fn new(flush_period: Duration, clock: Arc<dyn Clock>) -> Self {
        let last_flush = clock.now();
        Self {
            ids: HashSet::new(),
            flush_period,
            last_flush,
            clock,
        }
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.ids.contains(id)
    }

    pub fn insert(&mut self, id: JobId) -> bool {
        self.ids.insert(id)
    }

    pub fn extend<I: IntoIterator<Item = JobId>>(&mut self, ids: I) {
        self.ids.extend(ids);
    }

    pub fn remove(&mut self, id: &JobId) -> bool {
        self.ids.remove(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Clear the cache if more than `flush_period` has passed since the last flush.
    ///
    /// Returns whether a flush happened.
    pub fn flush_if_due(&mut self, agent: &'static str) -> bool {
        let now = self.clock.now();
        let elapsed = (now - self.last_flush).to_std().unwrap_or_default();
        if elapsed <= self.flush_period {
            return false;
        }
        let dropped = self.ids.len();
        self.ids.clear();
        self.last_flush = now;
        info!(agent, dropped, "flushed handled-job cache");
        true
    }

    /// Clear the cache now and start a new epoch.
    pub fn flush(&mut self) {
        self.ids.clear();
        self.last_flush = self.clock.now();
    }
}
