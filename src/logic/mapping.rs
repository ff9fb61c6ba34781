//! Incremental technique mapping
//!
//! Annotates the verdict's salient syscalls with best-matching threat
//! techniques, one external generation call per syscall, persisting the
//! growing artifact after every item so the frontend can poll live results.

use std::collections::BTreeSet;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifacts::ResultStore;
use super::collab::{StageFailure, TechniqueMapper};
use super::jobs::{Job, JobStatus, JobStore};
use super::pipeline::PROGRESS_MAPPING;
use super::verdict::Verdict;

/// Cap on mapped syscalls per job; each entry costs one generation call
pub const MAX_MAPPED_SYSCALLS: usize = 8;

/// The generation collaborator is single-instance: one mapping call at a
/// time, process-wide, regardless of which job issues it.
static MAPPER_GATE: Mutex<()> = Mutex::new(());

/// One syscall annotated with its best-matching technique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingItem {
    pub syscall: String,
    pub generated_description: String,
    pub technique_id: String,
    pub technique_name: String,
    pub matched_example: String,
    /// Cosine similarity of the generated description to the matched
    /// catalog example, in [-1, 1]
    pub similarity: f64,
}

/// Syscalls to map: the verdict's top syscalls flattened across the selected
/// categories, deduplicated, lexicographically sorted, capped
pub fn select_syscalls(verdict: &Verdict) -> Vec<String> {
    let unique: BTreeSet<&String> = verdict.top_syscalls.values().flatten().collect();
    unique
        .into_iter()
        .take(MAX_MAPPED_SYSCALLS)
        .cloned()
        .collect()
}

/// Run the mapping stage for one job, then finalize the result document and
/// transition the job to `done`.
///
/// Per-item failures are logged and skipped; only artifact I/O aborts.
pub fn run(
    job_id: Uuid,
    store: &JobStore,
    artifacts: &ResultStore,
    mapper: &dyn TechniqueMapper,
    verdict: &Verdict,
) -> Result<PathBuf, StageFailure> {
    let job = job_id.to_string();
    let syscalls = select_syscalls(verdict);
    let total = syscalls.len();
    let mut items: Vec<MappingItem> = Vec::with_capacity(total);

    tracing::info!("Job {}: mapping {} syscalls", job, total);

    for (idx, syscall) in syscalls.iter().enumerate() {
        let outcome = {
            let _gate = MAPPER_GATE.lock();
            mapper.map_syscall(syscall)
        };

        match outcome {
            Ok(item) => {
                items.push(item);
                artifacts.write_mapping(&job, &items)?;

                let progress = PROGRESS_MAPPING + (10 * (idx + 1) / total) as u8;
                store.replace(job_id, Job::running(JobStatus::Mapping, progress));
            }
            Err(e) => {
                tracing::warn!("Mapping failed for {}: {}", syscall, e);
            }
        }
    }

    let result_path = artifacts.merge_mapping(&job, &items)?;
    store.replace(job_id, Job::done(result_path.clone()));

    Ok(result_path)
}
