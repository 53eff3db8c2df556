// 📤 Exporter - billing summary → CSV

use crate::aggregate::Aggregator;
use crate::error::Result;
use crate::record::BillingSummaryRow;
use csv::{ReaderBuilder, WriterBuilder};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

pub const EXPORT_HEADER: [&str; 5] = ["date", "client_code", "STT Count", "Debit", "Credit"];

/// Write the stored summary to `destination`, replacing any existing file.
/// Returns the number of data rows written.
pub fn export_summary(conn: &Connection, destination: &Path) -> Result<usize> {
    let rows = Aggregator::new(conn).summary_rows()?;
    write_summary_csv(&rows, destination)?;

    info!(path = %destination.display(), rows = rows.len(), "billing summary saved");
    Ok(rows.len())
}

/// Header is always written, even for an empty summary
pub fn write_summary_csv(rows: &[BillingSummaryRow], destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(destination)?;

    writer.write_record(EXPORT_HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

/// Parse an exported summary back into rows
pub fn read_summary_csv(path: &Path) -> Result<Vec<BillingSummaryRow>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;

    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<BillingSummaryRow>, _>>()?;

    Ok(rows)
}
