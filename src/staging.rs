// 🗃️ Staging Store - append-only per-source partitions
// One table per partition. Appending the same input twice stores it twice.

use crate::config::RestagePolicy;
use crate::db::{count_rows, create_partition_table, table_exists, validate_partition_name};
use crate::error::{PipelineError, Result};
use crate::record::{format_date, ClientType, Record, DATE_FORMAT};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub partition: String,
    pub inserted: usize,
    /// Rows removed first (Replace policy only)
    pub cleared: usize,
}

/// Append records to a partition, creating it if absent. All-or-nothing.
pub fn stage_records(
    conn: &Connection,
    records: &[Record],
    partition: &str,
    policy: RestagePolicy,
) -> Result<StageOutcome> {
    let tx = conn.unchecked_transaction()?;
    let outcome = stage_records_tx(&tx, records, partition, policy)?;
    tx.commit()?;
    Ok(outcome)
}

/// Same as `stage_records`, inside a transaction the caller commits.
/// Lets other writes (the audit event) succeed or fail together with the rows.
pub fn stage_records_tx(
    tx: &Transaction<'_>,
    records: &[Record],
    partition: &str,
    policy: RestagePolicy,
) -> Result<StageOutcome> {
    create_partition_table(tx, partition)?;

    let cleared = match policy {
        RestagePolicy::Append => 0,
        RestagePolicy::Replace => tx.execute(&format!("DELETE FROM {partition}"), [])?,
    };

    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {partition} (stt, date, client_code, client_type, amount)
         VALUES (?1, ?2, ?3, ?4, ?5)"
    ))?;

    for record in records {
        stmt.execute(params![
            record.id,
            format_date(record.date),
            record.client_code,
            record.client_type.code(),
            record.amount,
        ])?;
    }

    Ok(StageOutcome {
        partition: partition.to_string(),
        inserted: records.len(),
        cleared,
    })
}

/// Remove every row from a partition (the partition itself stays)
pub fn clear_partition(conn: &Connection, partition: &str) -> Result<usize> {
    ensure_partition(conn, partition)?;
    let removed = conn.execute(&format!("DELETE FROM {partition}"), [])?;
    Ok(removed)
}

pub fn partition_exists(conn: &Connection, partition: &str) -> Result<bool> {
    validate_partition_name(partition)?;
    table_exists(conn, partition)
}

pub fn partition_count(conn: &Connection, partition: &str) -> Result<i64> {
    ensure_partition(conn, partition)?;
    count_rows(conn, partition)
}

/// Rows of a partition in the order they were staged
pub fn load_partition(conn: &Connection, partition: &str) -> Result<Vec<Record>> {
    ensure_partition(conn, partition)?;
    load_records(conn, partition, "rowid ASC")
}

fn ensure_partition(conn: &Connection, partition: &str) -> Result<()> {
    if partition_exists(conn, partition)? {
        Ok(())
    } else {
        Err(PipelineError::UnknownPartition(partition.to_string()))
    }
}

/// Read every row of a record-shaped table (partition or merged set)
pub(crate) fn load_records(conn: &Connection, table: &str, order_by: &str) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT stt, date, client_code, client_type, amount
         FROM {table}
         ORDER BY {order_by}"
    ))?;

    let records = stmt
        .query_map([], |row| {
            let date_str: String = row.get(1)?;
            let client_type: String = row.get(3)?;

            Ok(Record {
                id: row.get(0)?,
                date: NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                client_code: row.get(2)?,
                client_type: ClientType::from_raw(&client_type),
                amount: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn record(id: &str, date: &str, amount: f64) -> Record {
        Record::new(
            id,
            NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            "CL001",
            ClientType::Debit,
            amount,
        )
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn, &["stt1_raw".to_string()]).unwrap();
        conn
    }

    #[test]
    fn test_stage_and_load_preserves_order() {
        let conn = setup();
        let records = vec![
            record("B", "2025-11-02", 2.0),
            record("A", "2025-11-01", 1.0),
        ];

        let outcome = stage_records(&conn, &records, "stt1_raw", RestagePolicy::Append).unwrap();
        assert_eq!(outcome.inserted, 2);

        let loaded = load_partition(&conn, "stt1_raw").unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_staging_twice_appends_duplicates() {
        let conn = setup();
        let records = vec![record("A001", "2025-11-01", 1000.0)];

        stage_records(&conn, &records, "stt1_raw", RestagePolicy::Append).unwrap();
        stage_records(&conn, &records, "stt1_raw", RestagePolicy::Append).unwrap();

        assert_eq!(partition_count(&conn, "stt1_raw").unwrap(), 2);
    }

    #[test]
    fn test_replace_policy_clears_first() {
        let conn = setup();
        let records = vec![record("A001", "2025-11-01", 1000.0)];

        stage_records(&conn, &records, "stt1_raw", RestagePolicy::Append).unwrap();
        let outcome = stage_records(&conn, &records, "stt1_raw", RestagePolicy::Replace).unwrap();

        assert_eq!(outcome.cleared, 1);
        assert_eq!(partition_count(&conn, "stt1_raw").unwrap(), 1);
    }

    #[test]
    fn test_stage_creates_missing_partition() {
        let conn = setup();
        assert!(!partition_exists(&conn, "late_feed").unwrap());

        stage_records(&conn, &[record("X", "2025-11-01", 1.0)], "late_feed", RestagePolicy::Append)
            .unwrap();

        assert!(partition_exists(&conn, "late_feed").unwrap());
    }

    #[test]
    fn test_clear_partition() {
        let conn = setup();
        stage_records(&conn, &[record("X", "2025-11-01", 1.0)], "stt1_raw", RestagePolicy::Append)
            .unwrap();

        assert_eq!(clear_partition(&conn, "stt1_raw").unwrap(), 1);
        assert_eq!(partition_count(&conn, "stt1_raw").unwrap(), 0);
    }

    #[test]
    fn test_unknown_and_invalid_partitions() {
        let conn = setup();

        assert!(matches!(
            load_partition(&conn, "nope"),
            Err(PipelineError::UnknownPartition(_))
        ));
        assert!(matches!(
            stage_records(&conn, &[], "bad name", RestagePolicy::Append),
            Err(PipelineError::InvalidPartition(_))
        ));
    }

    #[test]
    fn test_other_client_type_survives_storage() {
        let conn = setup();
        let mut rec = record("A001", "2025-11-01", 5.0);
        rec.client_type = ClientType::Other("Z".to_string());

        stage_records(&conn, &[rec.clone()], "stt1_raw", RestagePolicy::Append).unwrap();

        assert_eq!(load_partition(&conn, "stt1_raw").unwrap(), vec![rec]);
    }
}
