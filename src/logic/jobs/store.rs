//! In-memory job registry
//!
//! Process-wide map from job id to its current record. Records live for the
//! lifetime of the process; there is no deletion. DashMap shards the key
//! space, so replacing one job's record never serializes against readers or
//! writers of other jobs, and a `get` racing a `replace` observes either the
//! old or the new record, never a torn one.

use dashmap::DashMap;
use uuid::Uuid;

use super::types::Job;

/// Registry of all jobs submitted since process start
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: DashMap<Uuid, Job>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Register a freshly submitted job as `{queued, 0}`
    pub fn create(&self, id: Uuid) -> Job {
        let job = Job::queued();
        self.jobs.insert(id, job.clone());
        job
    }

    /// Atomically overwrite the entire record for `id`.
    ///
    /// Writers carry forward any fields they want retained; nothing is
    /// field-merged.
    pub fn replace(&self, id: Uuid, job: Job) {
        self.jobs.insert(id, job);
    }

    /// Current record for `id`, or `None` for an unknown job
    pub fn get(&self, id: &Uuid) -> Option<Job> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }
}
