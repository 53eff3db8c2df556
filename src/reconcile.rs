// ⚖️ Reconciler - merge staging partitions into one row per STT
//
// Two-level precedence:
//   1. within a partition, the latest date wins (same date: the row staged last)
//   2. across partitions, a later partition overrides an earlier one
//
// The merged table is rebuilt inside one transaction, so a failed run leaves
// the previous merged set untouched.

use crate::db::MERGED_TABLE;
use crate::error::{PipelineError, Result};
use crate::record::{format_date, Record};
use crate::staging::{load_partition, load_records, partition_exists};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

// ============================================================================
// RECONCILE REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub partitions: Vec<String>,
    pub rows_scanned: usize,
    /// Rows discarded because a newer row for the same STT existed in the same partition
    pub duplicates_within: usize,
    /// STTs whose earlier-partition row was replaced by a later partition
    pub overridden: usize,
    pub merged: usize,
}

// ============================================================================
// PURE MERGE LOGIC
// ============================================================================

/// Keep one row per id: the most recent date, ties going to the later row.
/// Output is in first-seen order of each id.
pub fn latest_per_id(records: &[Record]) -> Vec<Record> {
    let mut winners: Vec<&Record> = Vec::new();
    let mut slot: HashMap<&str, usize> = HashMap::new();

    for record in records {
        match slot.get(record.id.as_str()) {
            Some(&i) => {
                if record.date >= winners[i].date {
                    winners[i] = record;
                }
            }
            None => {
                slot.insert(record.id.as_str(), winners.len());
                winners.push(record);
            }
        }
    }

    winners.into_iter().cloned().collect()
}

/// Fold partitions (in precedence order) into the merged set, keyed by id
pub fn merge_partitions(partitions: &[(String, Vec<Record>)]) -> (BTreeMap<String, Record>, ReconcileReport) {
    let mut merged: BTreeMap<String, Record> = BTreeMap::new();
    let mut report = ReconcileReport::default();

    for (name, rows) in partitions {
        let winners = latest_per_id(rows);

        report.partitions.push(name.clone());
        report.rows_scanned += rows.len();
        report.duplicates_within += rows.len() - winners.len();

        let mut overridden_here = 0;
        for record in winners {
            if merged.insert(record.id.clone(), record).is_some() {
                overridden_here += 1;
            }
        }

        debug!(partition = %name, rows = rows.len(), overridden = overridden_here, "partition folded");
        report.overridden += overridden_here;
    }

    report.merged = merged.len();
    (merged, report)
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler<'a> {
    conn: &'a Connection,
}

impl<'a> Reconciler<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Reconciler { conn }
    }

    /// Rebuild the merged table from the given partitions, in order
    pub fn reconcile(&self, partitions: &[String]) -> Result<ReconcileReport> {
        // Check everything up front so a bad name never touches the merged table
        for name in partitions {
            if !partition_exists(self.conn, name)? {
                return Err(PipelineError::UnknownPartition(name.clone()));
            }
        }

        let mut loaded = Vec::with_capacity(partitions.len());
        for name in partitions {
            loaded.push((name.clone(), load_partition(self.conn, name)?));
        }

        let (merged, report) = merge_partitions(&loaded);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(&format!("DELETE FROM {MERGED_TABLE}"), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {MERGED_TABLE} (stt, date, client_code, client_type, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ))?;

            for record in merged.values() {
                stmt.execute(params![
                    record.id,
                    format_date(record.date),
                    record.client_code,
                    record.client_type.code(),
                    record.amount,
                ])?;
            }
        }
        tx.commit()?;

        info!(
            merged = report.merged,
            duplicates_within = report.duplicates_within,
            overridden = report.overridden,
            "merge complete"
        );

        Ok(report)
    }

    /// Current merged set, ordered by id
    pub fn merged_records(&self) -> Result<Vec<Record>> {
        load_records(self.conn, MERGED_TABLE, "stt ASC")
    }
}

// ============================================================================
// TESTS
// ============================================================================
