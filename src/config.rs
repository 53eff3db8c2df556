// ⚙️ Pipeline Configuration
// Explicit config struct handed to Pipeline::open - no process-wide paths

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// RE-STAGE POLICY
// ============================================================================

/// What happens when a partition is staged again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestagePolicy {
    /// Append to whatever the partition already holds (duplicates on retry)
    #[default]
    Append,

    /// Clear the partition and insert in the same transaction
    Replace,
}

// ============================================================================
// SOURCES
// ============================================================================

/// One upstream CSV export and the partition it stages into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub partition: String,
}

impl SourceConfig {
    pub fn new(path: impl Into<PathBuf>, partition: &str) -> Self {
        SourceConfig {
            path: path.into(),
            partition: partition.to_string(),
        }
    }
}

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Sources in reconciliation order: later entries override earlier ones
    pub sources: Vec<SourceConfig>,

    /// Billing summary CSV
    pub output_path: PathBuf,

    pub restage: RestagePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_base_dir(Path::new("."))
    }
}

impl PipelineConfig {
    /// Default layout rooted at `base`: data/, output/, localdb/
    pub fn with_base_dir(base: &Path) -> Self {
        let data = base.join("data");
        PipelineConfig {
            db_path: base.join("localdb").join("stt.db"),
            sources: vec![
                SourceConfig::new(data.join("M+ Software Airflow Assignment - STT1.csv"), "stt1_raw"),
                SourceConfig::new(data.join("M+ Software Airflow Assignment - STT2.csv"), "stt2_raw"),
            ],
            output_path: base.join("output").join("billing_summary.csv"),
            restage: RestagePolicy::Append,
        }
    }

    /// Load from a TOML file; omitted keys keep their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::Config("at least one source is required".to_string()));
        }

        for (i, source) in self.sources.iter().enumerate() {
            if self.sources[..i].iter().any(|s| s.partition == source.partition) {
                return Err(PipelineError::Config(format!(
                    "partition '{}' is used by more than one source",
                    source.partition
                )));
            }
        }

        Ok(())
    }

    /// Partition names in reconciliation order
    pub fn partitions(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.partition.clone()).collect()
    }
}
