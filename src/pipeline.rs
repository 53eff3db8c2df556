// 🚚 Pipeline facade - the steps an orchestrator calls
//
//   init → stage(A), stage(B) → reconcile → aggregate → export
//
// reconcile/aggregate/export rebuild their output and are safe to retry.
// stage appends (RestagePolicy::Append): retrying it duplicates rows unless
// the partition is cleared first or the Replace policy is configured.

use crate::aggregate::Aggregator;
use crate::config::{PipelineConfig, RestagePolicy};
use crate::db::{get_events, insert_event, open_database, setup_database, PipelineEvent};
use crate::error::Result;
use crate::export::export_summary;
use crate::normalizer::{normalize_reader, read_source, NormalizeReport};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::record::BillingSummaryRow;
use crate::staging::{clear_partition, stage_records_tx, StageOutcome};
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub normalize: NormalizeReport,
    pub outcome: StageOutcome,
    /// SHA-256 of the source file bytes
    pub fingerprint: String,
    /// Same file content was already staged into this partition
    pub previously_staged: bool,
}

pub struct Pipeline {
    config: PipelineConfig,
    conn: Connection,
}

impl Pipeline {
    /// Open the configured database file
    pub fn open(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let conn = open_database(&config.db_path)?;
        Ok(Pipeline { config, conn })
    }

    /// Use an existing connection (in-memory databases, tests)
    pub fn with_connection(config: PipelineConfig, conn: Connection) -> Result<Self> {
        config.validate()?;
        Ok(Pipeline { config, conn })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // STEPS
    // ========================================================================

    /// Create every table. Safe to call repeatedly.
    pub fn init(&self) -> Result<()> {
        let partitions = self.config.partitions();
        setup_database(&self.conn, &partitions)?;
        self.record_event("init", "*", serde_json::json!({ "partitions": partitions }))?;

        info!("database initialized and tables are ready");
        Ok(())
    }

    /// Normalize `source_path` and append it to `partition`.
    /// Rows and the audit event commit together, so a failed stage stages nothing.
    pub fn stage(&self, source_path: &Path, partition: &str) -> Result<StageReport> {
        let (source_name, bytes) = read_source(source_path)?;
        let fingerprint = fingerprint_bytes(&bytes);
        let normalized = normalize_reader(bytes.as_slice(), &source_name)?;

        let previously_staged = get_events(&self.conn, "stage", partition)?
            .iter()
            .any(|e| e.data["fingerprint"] == fingerprint.as_str());

        if previously_staged && self.config.restage == RestagePolicy::Append {
            warn!(
                partition,
                source = %source_path.display(),
                "file already staged into this partition, rows will be duplicated"
            );
        }

        let tx = self.conn.unchecked_transaction()?;
        let outcome = stage_records_tx(&tx, &normalized.records, partition, self.config.restage)?;

        let report = StageReport {
            normalize: normalized.report,
            outcome,
            fingerprint,
            previously_staged,
        };
        insert_event(
            &tx,
            &PipelineEvent::new("stage", partition, serde_json::to_value(&report)?),
        )?;
        tx.commit()?;

        info!(partition, rows = report.outcome.inserted, "inserted rows into partition");
        Ok(report)
    }

    /// Stage every configured source into its partition
    pub fn stage_all(&self) -> Result<Vec<StageReport>> {
        self.config
            .sources
            .iter()
            .map(|source| self.stage(&source.path, &source.partition))
            .collect()
    }

    /// Empty a partition so a stage retry does not duplicate rows
    pub fn clear_partition(&self, partition: &str) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = clear_partition(&tx, partition)?;
        insert_event(
            &tx,
            &PipelineEvent::new("clear", partition, serde_json::json!({ "removed": removed })),
        )?;
        tx.commit()?;
        Ok(removed)
    }

    /// Rebuild the merged set from the configured partitions, in order
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let report = Reconciler::new(&self.conn).reconcile(&self.config.partitions())?;
        self.record_event("reconcile", "*", serde_json::to_value(&report)?)?;
        Ok(report)
    }

    /// Rebuild the billing summary from the merged set
    pub fn aggregate(&self) -> Result<Vec<BillingSummaryRow>> {
        let rows = Aggregator::new(&self.conn).aggregate()?;
        self.record_event("aggregate", "*", serde_json::json!({ "rows": rows.len() }))?;
        Ok(rows)
    }

    /// Write the billing summary CSV
    pub fn export(&self, destination: &Path) -> Result<usize> {
        let written = export_summary(&self.conn, destination)?;
        self.record_event(
            "export",
            &destination.display().to_string(),
            serde_json::json!({ "rows": written }),
        )?;
        Ok(written)
    }

    /// init → stage all → reconcile → aggregate → export to the configured path
    pub fn run_end_to_end(&self) -> Result<Vec<BillingSummaryRow>> {
        info!("start ETL (SQLite mode)");

        self.init()?;
        self.stage_all()?;
        self.reconcile()?;
        let rows = self.aggregate()?;
        self.export(&self.config.output_path)?;

        info!("ETL finished without errors");
        Ok(rows)
    }

    // ========================================================================
    // READ SIDE
    // ========================================================================

    pub fn summary_rows(&self) -> Result<Vec<BillingSummaryRow>> {
        Aggregator::new(&self.conn).summary_rows()
    }

    pub fn events(&self, step: &str, subject: &str) -> Result<Vec<PipelineEvent>> {
        get_events(&self.conn, step, subject)
    }

    fn record_event(&self, step: &str, subject: &str, data: serde_json::Value) -> Result<()> {
        insert_event(&self.conn, &PipelineEvent::new(step, subject, data))
    }
}

/// Hex SHA-256 of the staged bytes
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
