// 📊 Aggregator - merged STTs → billing summary per (date, client_code)
// Debit = Σ amount of "C" rows, Credit = Σ amount of "V" rows, sums truncated toward zero.

use crate::db::{MERGED_TABLE, SUMMARY_TABLE};
use crate::error::{PipelineError, Result};
use crate::record::{format_date, BillingSummaryRow, ClientType, Record, DATE_FORMAT};
use crate::staging::load_records;
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

#[derive(Default)]
struct GroupTotals<'r> {
    ids: HashSet<&'r str>,
    debit: f64,
    credit: f64,
}

/// Group records by (date, client_code) in one pass. Output is sorted by the key.
///
/// Both buckets default to 0, so a group holding only one client type still
/// produces a row. Unknown client types count towards `stt_count` only.
pub fn summarize(records: &[Record]) -> Vec<BillingSummaryRow> {
    let mut groups: BTreeMap<(NaiveDate, &str), GroupTotals> = BTreeMap::new();

    for record in records {
        let totals = groups
            .entry((record.date, record.client_code.as_str()))
            .or_default();

        totals.ids.insert(record.id.as_str());
        match record.client_type {
            ClientType::Debit => totals.debit += record.amount,
            ClientType::Credit => totals.credit += record.amount,
            ClientType::Other(_) => {}
        }
    }

    groups
        .into_iter()
        .map(|((date, client_code), totals)| BillingSummaryRow {
            date,
            client_code: client_code.to_string(),
            stt_count: totals.ids.len() as i64,
            debit: truncate_amount(totals.debit),
            credit: truncate_amount(totals.credit),
        })
        .collect()
}

/// Cast to integer dropping the fraction: 10.9 → 10, -10.9 → -10
pub fn truncate_amount(amount: f64) -> i64 {
    amount.trunc() as i64
}

pub struct Aggregator<'a> {
    conn: &'a Connection,
}

impl<'a> Aggregator<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Aggregator { conn }
    }

    /// Rebuild the summary table from the merged set
    pub fn aggregate(&self) -> Result<Vec<BillingSummaryRow>> {
        let merged = load_records(self.conn, MERGED_TABLE, "stt ASC")?;
        let rows = summarize(&merged);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(&format!("DELETE FROM {SUMMARY_TABLE}"), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {SUMMARY_TABLE} (date, client_code, stt_count, debit, credit)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ))?;

            for row in &rows {
                stmt.execute(params![
                    format_date(row.date),
                    row.client_code,
                    row.stt_count,
                    row.debit,
                    row.credit,
                ])?;
            }
        }
        tx.commit()?;

        if rows.is_empty() {
            info!("no merged data to aggregate");
        } else {
            info!(rows = rows.len(), "aggregate done");
        }

        Ok(rows)
    }

    /// Stored summary ordered by date, then client_code
    pub fn summary_rows(&self) -> Result<Vec<BillingSummaryRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT date, client_code, stt_count, debit, credit
             FROM {SUMMARY_TABLE}
             ORDER BY date ASC, client_code ASC"
        ))?;

        let rows = stmt
            .query_map([], |row| {
                let date_str: String = row.get(0)?;
                Ok((date_str, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<std::result::Result<Vec<(String, String, i64, i64, i64)>, _>>()?;

        rows.into_iter()
            .map(|(date, client_code, stt_count, debit, credit)| -> Result<BillingSummaryRow> {
                let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
                    PipelineError::Storage(rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    ))
                })?;

                Ok(BillingSummaryRow {
                    date,
                    client_code,
                    stt_count,
                    debit,
                    credit,
                })
            })
            .collect()
    }
}
