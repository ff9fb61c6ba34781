//! External collaborator boundary
//!
//! The pipeline's four heavy steps (trace capture, feature extraction,
//! anomaly scoring, technique mapping) run out of process. Each is behind a
//! trait so the orchestrator can be exercised with fakes; the production
//! implementations in [`process`] spawn the pipeline scripts.

pub mod process;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::categories::Category;
use super::mapping::MappingItem;
use super::verdict::CategoryScore;

pub use process::ProcessCollaborators;

// ============================================================================
// ERRORS
// ============================================================================

/// A failed pipeline stage. Always aborts the owning job.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("{stage} failed: {message}")]
    Collaborator {
        stage: &'static str,
        message: String,
    },

    /// The scorer's trained model disagrees with the matrix's feature count
    #[error("frequency matrix does not match the trained model: {0}")]
    ShapeMismatch(String),

    #[error("expected artifact missing: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("artifact {} is not valid JSON: {message}", .path.display())]
    MalformedArtifact { path: PathBuf, message: String },

    #[error("no behavioral category produced a frequency matrix")]
    NoCategories,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A failed mapping call for one syscall. Logged and skipped, never fatal.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to launch mapper: {0}")]
    Spawn(#[from] io::Error),

    #[error("mapper exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("mapper produced unparseable output: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// TARGETS
// ============================================================================

/// What a submitted job analyzes
#[derive(Debug, Clone)]
pub enum AnalysisTarget {
    /// An uploaded package archive
    Archive { apk_path: PathBuf },
    /// A package already installed on the emulator
    Installed { package: String },
}

// ============================================================================
// STAGE ADAPTERS
// ============================================================================

/// Drives the target on the emulator and writes one syscall-event list per
/// traced unit into `trace_dir`
pub trait TraceCapture: Send + Sync {
    fn capture(&self, target: &AnalysisTarget, trace_dir: &Path) -> Result<(), StageFailure>;
}

/// Turns captured traces into per-category frequency matrices under `out_dir`
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, trace_dir: &Path, job: &str, out_dir: &Path) -> Result<(), StageFailure>;
}

/// Scores one category's frequency matrix against its trained model
pub trait Scorer: Send + Sync {
    fn score(&self, category: Category, matrix: &Path) -> Result<CategoryScore, StageFailure>;
}

/// Maps one syscall to its best-matching threat technique.
///
/// The underlying generator is single-instance; callers must not issue
/// concurrent calls (see the gate in `logic::mapping`).
pub trait TechniqueMapper: Send + Sync {
    fn map_syscall(&self, syscall: &str) -> Result<MappingItem, MappingError>;
}

/// The four stage adapters a job run needs
pub struct Collaborators {
    pub capture: Box<dyn TraceCapture>,
    pub extractor: Box<dyn FeatureExtractor>,
    pub scorer: Box<dyn Scorer>,
    pub mapper: Box<dyn TechniqueMapper>,
}

impl Collaborators {
    /// Production set, backed by the pipeline scripts
    pub fn process(config: &crate::config::Config) -> Self {
        let scripts = ProcessCollaborators::new(config);
        Self {
            capture: Box::new(scripts.clone()),
            extractor: Box::new(scripts.clone()),
            scorer: Box::new(scripts.clone()),
            mapper: Box::new(scripts),
        }
    }
}
