//! Configuration module

use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    pub port: u16,

    /// Root directory for per-job analysis artifacts
    pub output_dir: PathBuf,

    /// Directory for uploaded APK archives
    pub upload_dir: PathBuf,

    /// Python interpreter used to run the pipeline scripts
    pub python_bin: String,

    /// Directory containing the pipeline scripts
    pub pipeline_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),

            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("output")),

            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),

            python_bin: env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".to_string()),

            pipeline_dir: env::var("PIPELINE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("pipeline")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Only assert fields that no test environment is expected to override.
        let config = Config::from_env();
        assert!(!config.python_bin.is_empty());
        assert!(config.port > 0);
    }
}
