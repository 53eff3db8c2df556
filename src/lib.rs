// STT Billing Pipeline - Core Library
// Exposes the pipeline steps for the binary, orchestrators, and tests

pub mod config;
pub mod error;
pub mod record;
pub mod normalizer;  // CSV → Record
pub mod db;          // SQLite schema + audit trail
pub mod staging;     // per-source partitions
pub mod reconcile;   // latest-wins merge
pub mod aggregate;   // (date, client) totals
pub mod export;      // summary CSV
pub mod pipeline;    // orchestrator-facing steps

// Re-export commonly used types
pub use config::{PipelineConfig, RestagePolicy, SourceConfig};
pub use error::{PipelineError, Result};
pub use record::{BillingSummaryRow, ClientType, Record};
pub use normalizer::{normalize_csv, normalize_reader, read_source, NormalizeReport, Normalized};
pub use db::{open_database, setup_database, PipelineEvent};
pub use staging::{clear_partition, load_partition, stage_records, stage_records_tx, StageOutcome};
pub use reconcile::{latest_per_id, ReconcileReport, Reconciler};
pub use aggregate::{summarize, Aggregator};
pub use export::{export_summary, read_summary_csv, write_summary_csv};
pub use pipeline::{Pipeline, StageReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
