// Error taxonomy for the billing pipeline
// Row-level rejections are counted in NormalizeReport, never raised here.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Input file does not exist
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Required column(s) missing after alias resolution
    #[error("{source_name}: missing required column(s): {}", .missing.join(", "))]
    Schema {
        source_name: String,
        missing: Vec<String>,
    },

    /// Partition name is not a valid table identifier
    #[error("invalid partition name: '{0}'")]
    InvalidPartition(String),

    /// Partition was never staged or initialized
    #[error("unknown partition: '{0}'")]
    UnknownPartition(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// True for failures caused by the input file itself (retrying won't help)
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceNotFound(_) | PipelineError::Schema { .. } | PipelineError::Csv(_)
        )
    }
}
