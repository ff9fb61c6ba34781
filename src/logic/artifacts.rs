//! On-disk analysis artifacts
//!
//! System of record for everything a job persists, partitioned per job id:
//! raw traces under `strace/<job>/`, refined artifacts (frequency matrices,
//! result document, mapping artifact) under `refined/<job>/`. All JSON
//! writes go through a temp file and a rename, so a concurrent reader sees
//! either the previous complete snapshot or the new one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;

use super::categories::Category;
use super::collab::StageFailure;
use super::mapping::MappingItem;
use super::verdict::Verdict;

const RESULT_FILE: &str = "result.json";
const MAPPING_FILE: &str = "mitre_mapping.json";

/// Job-scoped artifact store rooted at the configured output directory
#[derive(Debug, Clone)]
pub struct ResultStore {
    output_root: PathBuf,
}

impl ResultStore {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    /// Where capture writes the job's raw syscall traces
    pub fn trace_dir(&self, job: &str) -> PathBuf {
        self.output_root.join("strace").join(job)
    }

    /// Where extraction and scoring write the job's refined artifacts
    pub fn refined_dir(&self, job: &str) -> PathBuf {
        self.output_root.join("refined").join(job)
    }

    /// One category's frequency matrix (rows = traced unit, columns =
    /// the category's known syscalls plus an identifier column)
    pub fn matrix_path(&self, job: &str, category: Category) -> PathBuf {
        self.refined_dir(job)
            .join(format!("{}_{}_frequency_matrix.csv", job, category))
    }

    pub fn result_path(&self, job: &str) -> PathBuf {
        self.refined_dir(job).join(RESULT_FILE)
    }

    pub fn mapping_path(&self, job: &str) -> PathBuf {
        self.refined_dir(job).join(MAPPING_FILE)
    }

    pub fn prepare_job_dirs(&self, job: &str) -> io::Result<()> {
        fs::create_dir_all(self.trace_dir(job))?;
        fs::create_dir_all(self.refined_dir(job))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writers (job run side)
    // ------------------------------------------------------------------

    /// Persist the verdict document, returning its path
    pub fn write_verdict(&self, job: &str, verdict: &Verdict) -> io::Result<PathBuf> {
        let path = self.result_path(job);
        let bytes = serde_json::to_vec_pretty(verdict)?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }

    /// Overwrite the mapping artifact with the full partial snapshot
    pub fn write_mapping(&self, job: &str, items: &[MappingItem]) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(items)?;
        write_atomic(&self.mapping_path(job), &bytes)
    }

    /// Inject the accumulated mapping into the result document by reading
    /// the current document, setting its `mapping` field, and rewriting the
    /// whole document. Returns the document path.
    pub fn merge_mapping(
        &self,
        job: &str,
        items: &[MappingItem],
    ) -> Result<PathBuf, StageFailure> {
        let path = self.result_path(job);
        let mut document =
            read_json(&path)?.ok_or_else(|| StageFailure::MissingArtifact(path.clone()))?;

        let mapping = serde_json::to_value(items).map_err(io::Error::from)?;
        object_of(&mut document, &path)?.insert("mapping".to_string(), mapping);
        write_atomic(&path, &serde_json::to_vec_pretty(&document).map_err(io::Error::from)?)?;
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Readers (query side)
    // ------------------------------------------------------------------

    /// Best-available result document for a job.
    ///
    /// `Ok(None)` when nothing has been persisted yet. While the mapping
    /// stage is running, the live partial mapping is injected into the
    /// returned document; once the job is done the persisted document
    /// already carries it.
    pub fn load_result_document(&self, job: &str) -> Result<Option<Value>, StageFailure> {
        let path = self.result_path(job);
        let Some(mut document) = read_json(&path)? else {
            return Ok(None);
        };

        if let Some(mapping) = read_json(&self.mapping_path(job))? {
            object_of(&mut document, &path)?.insert("mapping".to_string(), mapping);
        }

        Ok(Some(document))
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// `Ok(None)` when the file does not exist yet; `MalformedArtifact` when it
/// exists but does not parse
fn read_json(path: &Path) -> Result<Option<Value>, StageFailure> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StageFailure::MalformedArtifact {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn object_of<'a>(
    document: &'a mut Value,
    path: &Path,
) -> Result<&'a mut serde_json::Map<String, Value>, StageFailure> {
    document
        .as_object_mut()
        .ok_or_else(|| StageFailure::MalformedArtifact {
            path: path.to_path_buf(),
            message: "not a JSON object".to_string(),
        })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
