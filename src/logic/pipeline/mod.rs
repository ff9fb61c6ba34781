//! Job orchestration
//!
//! Sequences the four pipeline stages for one job on its own worker, keeping
//! the job record in the registry current at every transition. Submission
//! never waits on the pipeline: it registers the job, hands the run to the
//! blocking pool, and returns the id. Regardless of entry point (uploaded
//! archive or installed package) every job goes through this same path.
//!
//! State machine, terminal states `done` and `error`:
//!
//! `queued -> capturing(25) -> extracting(55) -> scoring(80) -> mapping(90..100) -> done`
//!
//! A stage failure transitions straight to `error` with the causing message;
//! no retry, no rollback, later stages are skipped.

use std::sync::Arc;

use uuid::Uuid;

use super::artifacts::ResultStore;
use super::categories::Category;
use super::collab::{AnalysisTarget, Collaborators, StageFailure};
use super::jobs::{Job, JobStatus, JobStore};
use super::{mapping, verdict};

pub const PROGRESS_CAPTURING: u8 = 25;
pub const PROGRESS_EXTRACTING: u8 = 55;
pub const PROGRESS_SCORING: u8 = 80;
pub const PROGRESS_MAPPING: u8 = 90;

/// Drives analysis jobs from submission to a terminal state
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<JobStore>,
    artifacts: Arc<ResultStore>,
    collab: Arc<Collaborators>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<JobStore>,
        artifacts: Arc<ResultStore>,
        collab: Arc<Collaborators>,
    ) -> Self {
        Self {
            store,
            artifacts,
            collab,
        }
    }

    /// Register a new job and start its run on the blocking pool.
    ///
    /// Returns the job id immediately; callers observe progress through the
    /// job store and the artifact store only. Must be called from within the
    /// tokio runtime.
    pub fn submit(&self, target: AnalysisTarget) -> Uuid {
        let job_id = Uuid::new_v4();
        self.store.create(job_id);

        tracing::info!("Job {} queued ({:?})", job_id, target);

        let orchestrator = self.clone();
        tokio::task::spawn_blocking(move || orchestrator.run(job_id, &target));

        job_id
    }

    /// Run one job to a terminal state. Blocks for the duration of every
    /// collaborator call; only this job's worker is held up.
    fn run(&self, job_id: Uuid, target: &AnalysisTarget) {
        match self.run_stages(job_id, target) {
            Ok(()) => tracing::info!("Job {} done", job_id),
            Err(e) => {
                tracing::error!("Job {} failed: {}", job_id, e);
                self.store.replace(job_id, Job::failed(e.to_string()));
            }
        }
    }

    fn run_stages(&self, job_id: Uuid, target: &AnalysisTarget) -> Result<(), StageFailure> {
        let job = job_id.to_string();
        self.artifacts.prepare_job_dirs(&job)?;

        // Stage 1: behavioral trace capture
        self.store
            .replace(job_id, Job::running(JobStatus::Capturing, PROGRESS_CAPTURING));
        let trace_dir = self.artifacts.trace_dir(&job);
        self.collab.capture.capture(target, &trace_dir)?;

        // Stage 2: syscall feature extraction
        self.store
            .replace(job_id, Job::running(JobStatus::Extracting, PROGRESS_EXTRACTING));
        let refined_dir = self.artifacts.refined_dir(&job);
        self.collab.extractor.extract(&trace_dir, &job, &refined_dir)?;

        // Stage 3: per-category scoring and the verdict
        self.store
            .replace(job_id, Job::running(JobStatus::Scoring, PROGRESS_SCORING));
        let mut scores = Vec::new();
        for category in Category::ALL {
            let matrix = self.artifacts.matrix_path(&job, category);
            if !matrix.exists() {
                tracing::debug!("Job {}: no frequency matrix for {}", job, category);
                continue;
            }
            scores.push(self.collab.scorer.score(category, &matrix)?);
        }
        let verdict = verdict::aggregate(scores)?;
        self.artifacts.write_verdict(&job, &verdict)?;

        // Stage 4: incremental technique mapping; transitions to done
        self.store
            .replace(job_id, Job::running(JobStatus::Mapping, PROGRESS_MAPPING));
        mapping::run(
            job_id,
            &self.store,
            &self.artifacts,
            self.collab.mapper.as_ref(),
            &verdict,
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::collab::{
        FeatureExtractor, MappingError, Scorer, TechniqueMapper, TraceCapture,
    };
    use crate::logic::mapping::MappingItem;
    use crate::logic::verdict::CategoryScore;
    use parking_lot::Mutex;
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Shared probe: each fake stage records the job record it observed on
    /// entry, so the tests can assert the exact transition sequence. Tests
    /// that do not care leave `job_id` unset and nothing is recorded.
    #[derive(Default)]
    struct StageProbe {
        job_id: Mutex<Option<Uuid>>,
        seen: Mutex<Vec<(JobStatus, Option<u8>)>>,
    }

    impl StageProbe {
        fn observe(&self, store: &JobStore) {
            let Some(id) = *self.job_id.lock() else {
                return;
            };
            if let Some(job) = store.get(&id) {
                self.seen.lock().push((job.status, job.progress));
            }
        }
    }

    struct FakeCapture {
        store: Arc<JobStore>,
        probe: Arc<StageProbe>,
        fail: bool,
    }

    impl TraceCapture for FakeCapture {
        fn capture(&self, _target: &AnalysisTarget, trace_dir: &Path) -> Result<(), StageFailure> {
            self.probe.observe(&self.store);

            if self.fail {
                return Err(StageFailure::Collaborator {
                    stage: "capture",
                    message: "emulator unreachable".to_string(),
                });
            }

            fs::write(trace_dir.join("app_syscalls.json"), "[]")?;
            Ok(())
        }
    }

    struct FakeExtractor {
        store: Arc<JobStore>,
        probe: Arc<StageProbe>,
        artifacts: Arc<ResultStore>,
        categories: Vec<Category>,
    }

    impl FeatureExtractor for FakeExtractor {
        fn extract(&self, _trace_dir: &Path, job: &str, _out_dir: &Path) -> Result<(), StageFailure> {
            self.probe.observe(&self.store);
            for category in &self.categories {
                fs::write(self.artifacts.matrix_path(job, *category), "APK,ioctl\napp,3\n")?;
            }
            Ok(())
        }
    }

    struct FakeScorer {
        store: Arc<JobStore>,
        probe: Arc<StageProbe>,
        scores: Vec<CategoryScore>,
    }

    impl Scorer for FakeScorer {
        fn score(&self, category: Category, _matrix: &Path) -> Result<CategoryScore, StageFailure> {
            self.probe.observe(&self.store);
            self.scores
                .iter()
                .find(|s| s.category == category)
                .cloned()
                .ok_or_else(|| StageFailure::ShapeMismatch(format!("no model for {}", category)))
        }
    }

    struct FakeMapper {
        store: Arc<JobStore>,
        probe: Arc<StageProbe>,
    }

    impl TechniqueMapper for FakeMapper {
        fn map_syscall(&self, syscall: &str) -> Result<MappingItem, MappingError> {
            self.probe.observe(&self.store);
            Ok(MappingItem {
                syscall: syscall.to_string(),
                generated_description: format!("attacker abuses {}", syscall),
                technique_id: "T1404".to_string(),
                technique_name: "Exploitation for Privilege Escalation".to_string(),
                matched_example: "example".to_string(),
                similarity: 0.66,
            })
        }
    }

    struct Fixture {
        store: Arc<JobStore>,
        artifacts: Arc<ResultStore>,
        probe: Arc<StageProbe>,
        orchestrator: Orchestrator,
        _dir: tempfile::TempDir,
    }

    fn score(category: Category, avg_error: f64, threshold: f64, syscalls: &[&str]) -> CategoryScore {
        CategoryScore {
            category,
            avg_error,
            sigma: 0.01,
            threshold,
            top_syscalls: syscalls.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn fixture_with(fail_capture: bool, categories: Vec<Category>, scores: Vec<CategoryScore>) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(JobStore::new());
        let artifacts = Arc::new(ResultStore::new(dir.path()));
        let probe = Arc::new(StageProbe::default());

        let collab = Collaborators {
            capture: Box::new(FakeCapture {
                store: store.clone(),
                probe: probe.clone(),
                fail: fail_capture,
            }),
            extractor: Box::new(FakeExtractor {
                store: store.clone(),
                probe: probe.clone(),
                artifacts: artifacts.clone(),
                categories,
            }),
            scorer: Box::new(FakeScorer {
                store: store.clone(),
                probe: probe.clone(),
                scores,
            }),
            mapper: Box::new(FakeMapper {
                store: store.clone(),
                probe: probe.clone(),
            }),
        };

        let orchestrator = Orchestrator::new(store.clone(), artifacts.clone(), Arc::new(collab));

        Fixture {
            store,
            artifacts,
            probe,
            orchestrator,
            _dir: dir,
        }
    }

    fn fixture(fail_capture: bool) -> Fixture {
        fixture_with(
            fail_capture,
            vec![Category::DeviceManagement, Category::FileSystem],
            vec![
                score(Category::DeviceManagement, 0.09, 0.10, &["ioctl", "connect"]),
                score(Category::FileSystem, 0.05, 0.04, &["openat", "ioctl"]),
            ],
        )
    }

    /// Register a job, pin the probe to it, and run it synchronously.
    fn run_to_completion(fixture: &Fixture) -> Uuid {
        let job_id = Uuid::new_v4();
        fixture.store.create(job_id);

        // Before the run starts, only the submission record exists.
        let job = fixture.store.get(&job_id).unwrap();
        assert_eq!((job.status, job.progress), (JobStatus::Queued, Some(0)));

        *fixture.probe.job_id.lock() = Some(job_id);
        fixture.orchestrator.run(
            job_id,
            &AnalysisTarget::Installed {
                package: "com.example.malware".to_string(),
            },
        );
        job_id
    }

    #[test]
    fn test_successful_run_walks_the_stage_sequence() {
        let fixture = fixture(false);
        let job_id = run_to_completion(&fixture);

        // Each stage observed the record its own transition had just
        // written: capture 25, extraction 55, one scoring observation per
        // category with data at 80, then the mapping loop starting at 90.
        // Selected syscalls: connect, ioctl, openat (deduplicated, sorted).
        let seen = fixture.probe.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                (JobStatus::Capturing, Some(25)),
                (JobStatus::Extracting, Some(55)),
                (JobStatus::Scoring, Some(80)),
                (JobStatus::Scoring, Some(80)),
                (JobStatus::Mapping, Some(90)),
                (JobStatus::Mapping, Some(93)),
                (JobStatus::Mapping, Some(96)),
            ]
        );

        let job = fixture.store.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress, Some(100));

        // device_management's 0.09 <= 0.10 makes the verdict malicious.
        let doc = fixture
            .artifacts
            .load_result_document(&job_id.to_string())
            .unwrap()
            .unwrap();
        assert_eq!(doc["malicious"], true);
        assert_eq!(doc["top_categories"][0], "device_management");
        assert_eq!(doc["mapping"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_stage_failure_goes_straight_to_error() {
        let fixture = fixture(true);
        let job_id = run_to_completion(&fixture);

        let job = fixture.store.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.as_deref().unwrap().contains("emulator unreachable"));

        // Capture was the only stage that ran.
        assert_eq!(fixture.probe.seen.lock().len(), 1);
        // Nothing was persisted for the job.
        assert!(fixture
            .artifacts
            .load_result_document(&job_id.to_string())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_no_matrices_is_stage_fatal() {
        // An extractor that produces no matrices at all.
        let fixture = fixture_with(false, vec![], vec![]);
        let job_id = run_to_completion(&fixture);

        let job = fixture.store.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job
            .error
            .as_deref()
            .unwrap()
            .contains("no behavioral category"));
    }

    #[test]
    fn test_shape_mismatch_aborts_the_job() {
        // A matrix exists for a category the scorer has no model for.
        let fixture = fixture_with(false, vec![Category::MemoryManagement], vec![]);
        let job_id = run_to_completion(&fixture);

        let job = fixture.store.get(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job
            .error
            .as_deref()
            .unwrap()
            .contains("does not match the trained model"));
    }

    #[test]
    fn test_submission_does_not_block_on_the_pipeline() {
        // A single blocking thread, occupied by a plug task, keeps the job's
        // worker parked until the plug is released: the submission record is
        // observable with no race against the first stage transition.
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let fixture = fixture(false);

            let (release, parked) = mpsc::channel::<()>();
            tokio::task::spawn_blocking(move || {
                parked.recv().ok();
            });

            let job_id = fixture.orchestrator.submit(AnalysisTarget::Archive {
                apk_path: "uploads/sample.apk".into(),
            });

            let job = fixture.store.get(&job_id).unwrap();
            assert_eq!(job.status, JobStatus::Queued);
            assert_eq!(job.progress, Some(0));

            release.send(()).unwrap();
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            loop {
                let job = fixture.store.get(&job_id).unwrap();
                if job.status == JobStatus::Done {
                    assert_eq!(job.progress, Some(100));
                    assert!(job.result.is_some());
                    break;
                }
                assert!(std::time::Instant::now() < deadline, "job never completed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parallel_jobs_do_not_share_state() {
        let fixture = fixture(false);

        let a = fixture.orchestrator.submit(AnalysisTarget::Installed {
            package: "com.example.a".to_string(),
        });
        let b = fixture.orchestrator.submit(AnalysisTarget::Installed {
            package: "com.example.b".to_string(),
        });
        assert_ne!(a, b);

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let done = [a, b]
                .iter()
                .filter(|id| fixture.store.get(id).map(|j| j.status) == Some(JobStatus::Done))
                .count();
            if done == 2 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "jobs never completed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Artifacts stayed partitioned by job id.
        assert!(fixture.artifacts.result_path(&a.to_string()).exists());
        assert!(fixture.artifacts.result_path(&b.to_string()).exists());
    }
}
