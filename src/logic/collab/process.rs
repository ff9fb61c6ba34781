//! Process-backed stage adapters
//!
//! Each stage shells out to its pipeline script and blocks until the child
//! exits. Non-zero exit or unparseable output is reported through the stage
//! error types; nothing here retries.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::logic::categories::Category;
use crate::logic::mapping::MappingItem;
use crate::logic::verdict::CategoryScore;

use super::{
    AnalysisTarget, FeatureExtractor, MappingError, Scorer, StageFailure, TechniqueMapper,
    TraceCapture,
};

const CAPTURE_APK_SCRIPT: &str = "run_genymotion_strace.py";
const CAPTURE_INSTALLED_SCRIPT: &str = "run_genymotion_strace_installed.py";
const EXTRACT_SCRIPT: &str = "parse_syscall.py";
const SCORE_SCRIPT: &str = "score_category.py";
const MAPPING_SCRIPT: &str = "descGenAndMapping_single.py";

/// Exit code the scorer script uses to signal a feature-count mismatch
/// between the matrix and the trained scaler/model
const SHAPE_MISMATCH_EXIT: i32 = 2;

/// Stage adapters backed by the python pipeline scripts
#[derive(Debug, Clone)]
pub struct ProcessCollaborators {
    python: String,
    pipeline_dir: PathBuf,
}

impl ProcessCollaborators {
    pub fn new(config: &Config) -> Self {
        Self {
            python: config.python_bin.clone(),
            pipeline_dir: config.pipeline_dir.clone(),
        }
    }

    fn script(&self, name: &str) -> PathBuf {
        self.pipeline_dir.join(name)
    }

    /// Run one stage script to completion, treating non-zero exit as failure
    fn run_stage(
        &self,
        stage: &'static str,
        script: &str,
        args: &[&OsStr],
    ) -> Result<Output, StageFailure> {
        tracing::debug!("[{}] running {} {:?}", stage, script, args);

        let output = Command::new(&self.python)
            .arg(self.script(script))
            .args(args)
            .output()
            .map_err(|e| StageFailure::Collaborator {
                stage,
                message: format!("failed to launch {}: {}", script, e),
            })?;

        if !output.status.success() {
            return Err(StageFailure::Collaborator {
                stage,
                message: format!("{} exited with {}: {}", script, output.status, stderr_snippet(&output)),
            });
        }

        Ok(output)
    }
}

impl TraceCapture for ProcessCollaborators {
    fn capture(&self, target: &AnalysisTarget, trace_dir: &Path) -> Result<(), StageFailure> {
        match target {
            AnalysisTarget::Archive { apk_path } => {
                self.run_stage(
                    "capture",
                    CAPTURE_APK_SCRIPT,
                    &[
                        OsStr::new("--apk"),
                        apk_path.as_os_str(),
                        OsStr::new("--out"),
                        trace_dir.as_os_str(),
                    ],
                )?;
            }
            AnalysisTarget::Installed { package } => {
                self.run_stage(
                    "capture",
                    CAPTURE_INSTALLED_SCRIPT,
                    &[
                        OsStr::new("--pkg"),
                        OsStr::new(package),
                        OsStr::new("--out"),
                        trace_dir.as_os_str(),
                    ],
                )?;
            }
        }

        // The script exits zero even when the device produced nothing; an
        // empty capture cannot feed extraction.
        if !has_syscall_lists(trace_dir) {
            return Err(StageFailure::MissingArtifact(trace_dir.to_path_buf()));
        }

        Ok(())
    }
}

impl FeatureExtractor for ProcessCollaborators {
    fn extract(&self, trace_dir: &Path, job: &str, out_dir: &Path) -> Result<(), StageFailure> {
        self.run_stage(
            "extraction",
            EXTRACT_SCRIPT,
            &[
                OsStr::new("--trace-dir"),
                trace_dir.as_os_str(),
                OsStr::new("--family"),
                OsStr::new(job),
                OsStr::new("--nested"),
                OsStr::new("true"),
                OsStr::new("--out"),
                out_dir.as_os_str(),
            ],
        )?;
        Ok(())
    }
}

impl Scorer for ProcessCollaborators {
    fn score(&self, category: Category, matrix: &Path) -> Result<CategoryScore, StageFailure> {
        let output = Command::new(&self.python)
            .arg(self.script(SCORE_SCRIPT))
            .arg("--category")
            .arg(category.as_str())
            .arg("--matrix")
            .arg(matrix)
            .output()
            .map_err(|e| StageFailure::Collaborator {
                stage: "scoring",
                message: format!("failed to launch {}: {}", SCORE_SCRIPT, e),
            })?;

        if output.status.code() == Some(SHAPE_MISMATCH_EXIT) {
            return Err(StageFailure::ShapeMismatch(stderr_snippet(&output)));
        }
        if !output.status.success() {
            return Err(StageFailure::Collaborator {
                stage: "scoring",
                message: format!(
                    "{} exited with {}: {}",
                    SCORE_SCRIPT,
                    output.status,
                    stderr_snippet(&output)
                ),
            });
        }

        let score: CategoryScore = parse_stdout("scoring", &output.stdout)?;
        if score.category != category {
            return Err(StageFailure::Collaborator {
                stage: "scoring",
                message: format!(
                    "scorer answered for {} when asked about {}",
                    score.category, category
                ),
            });
        }

        Ok(score)
    }
}

impl TechniqueMapper for ProcessCollaborators {
    fn map_syscall(&self, syscall: &str) -> Result<MappingItem, MappingError> {
        let output = Command::new(&self.python)
            .arg(self.script(MAPPING_SCRIPT))
            .arg("--syscall")
            .arg(syscall)
            .output()?;

        if !output.status.success() {
            return Err(MappingError::Failed {
                status: output.status.to_string(),
                stderr: stderr_snippet(&output),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn parse_stdout<T: DeserializeOwned>(stage: &'static str, stdout: &[u8]) -> Result<T, StageFailure> {
    serde_json::from_slice(stdout).map_err(|e| StageFailure::Collaborator {
        stage,
        message: format!("unparseable collaborator output: {}", e),
    })
}

/// Last portion of a child's stderr, trimmed for log/error messages
fn stderr_snippet(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return "<no stderr>".to_string();
    }

    const MAX: usize = 400;
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }

    let mut start = trimmed.len() - MAX;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

fn has_syscall_lists(trace_dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(trace_dir) else {
        return false;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if has_syscall_lists(&path) {
                return true;
            }
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_syscalls.json"))
        {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn collaborators_with_missing_python() -> ProcessCollaborators {
        ProcessCollaborators {
            python: "/nonexistent/python-for-tests".to_string(),
            pipeline_dir: PathBuf::from("pipeline"),
        }
    }

    #[test]
    fn test_launch_failure_is_stage_failure() {
        let collab = collaborators_with_missing_python();
        let dir = tempdir().unwrap();

        let err = collab
            .capture(
                &AnalysisTarget::Installed {
                    package: "com.example.app".to_string(),
                },
                dir.path(),
            )
            .unwrap_err();

        assert!(matches!(err, StageFailure::Collaborator { stage: "capture", .. }));
    }

    #[test]
    fn test_mapper_launch_failure_is_spawn_error() {
        let collab = collaborators_with_missing_python();
        let err = collab.map_syscall("ioctl").unwrap_err();
        assert!(matches!(err, MappingError::Spawn(_)));
    }

    #[test]
    fn test_parse_stdout_rejects_garbage() {
        let err = parse_stdout::<CategoryScore>("scoring", b"not json").unwrap_err();
        assert!(matches!(err, StageFailure::Collaborator { stage: "scoring", .. }));
    }

    #[test]
    fn test_has_syscall_lists_nested() {
        let dir = tempdir().unwrap();
        assert!(!has_syscall_lists(dir.path()));

        let nested = dir.path().join("apk_a");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("apk_a_syscalls.json"), "[]").unwrap();
        assert!(has_syscall_lists(dir.path()));
    }
}
