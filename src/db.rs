use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MERGED_TABLE: &str = "stt_merged";
pub const SUMMARY_TABLE: &str = "billing_summary";
pub const EVENTS_TABLE: &str = "pipeline_events";

/// Audit trail entry - one per executed pipeline step
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub step: String,
    /// Partition name, output path, or "*" for whole-database steps
    pub subject: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl PipelineEvent {
    pub fn new(step: &str, subject: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            step: step.to_string(),
            subject: subject.to_string(),
            data,
            actor: "stt_pipeline".to_string(),
        }
    }
}

/// Open (or create) the database file, creating its directory if needed
pub fn open_database(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;
    Ok(conn)
}

/// Partition names become table names, so they must be plain identifiers
pub fn validate_partition_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    let reserved = [MERGED_TABLE, SUMMARY_TABLE, EVENTS_TABLE]
        .iter()
        .any(|t| t.eq_ignore_ascii_case(name))
        || name.to_ascii_lowercase().starts_with("sqlite_");

    if valid_start && valid_rest && !reserved {
        Ok(())
    } else {
        Err(PipelineError::InvalidPartition(name.to_string()))
    }
}

pub fn create_partition_table(conn: &Connection, partition: &str) -> Result<()> {
    validate_partition_name(partition)?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {partition} (
                stt TEXT NOT NULL,
                date TEXT NOT NULL,
                client_code TEXT NOT NULL,
                client_type TEXT NOT NULL,
                amount REAL NOT NULL
            )"
        ),
        [],
    )?;

    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;

    Ok(found.is_some())
}

pub fn setup_database(conn: &Connection, partitions: &[String]) -> Result<()> {
    // WAL keeps readers off half-written pages if a step crashes
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Staging partitions (one per source)
    // ==========================================================================
    for partition in partitions {
        create_partition_table(conn, partition)?;
    }

    // ==========================================================================
    // Merged set (one row per STT)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS stt_merged (
            stt TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            client_code TEXT NOT NULL,
            client_type TEXT NOT NULL,
            amount REAL NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Billing summary (one row per date + client)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS billing_summary (
            date TEXT NOT NULL,
            client_code TEXT NOT NULL,
            stt_count INTEGER NOT NULL,
            debit INTEGER NOT NULL,
            credit INTEGER NOT NULL,
            PRIMARY KEY (date, client_code)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pipeline_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            step TEXT NOT NULL,
            subject TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_subject ON pipeline_events(step, subject)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_merged_group ON stt_merged(date, client_code)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &PipelineEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO pipeline_events (
            event_id, timestamp, step, subject, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.step,
            event.subject,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events for one step + subject, oldest first
pub fn get_events(conn: &Connection, step: &str, subject: &str) -> Result<Vec<PipelineEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, step, subject, data, actor
         FROM pipeline_events
         WHERE step = ?1 AND subject = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![step, subject], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(4)?;

            Ok(PipelineEvent {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?
                    .with_timezone(&Utc),
                step: row.get(2)?,
                subject: row.get(3)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_partitions() -> Vec<String> {
        vec!["stt1_raw".to_string(), "stt2_raw".to_string()]
    }

    #[test]
    fn test_setup_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn, &default_partitions()).unwrap();

        for table in ["stt1_raw", "stt2_raw", MERGED_TABLE, SUMMARY_TABLE, EVENTS_TABLE] {
            assert!(table_exists(&conn, table).unwrap(), "missing table {table}");
        }
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn, &default_partitions()).unwrap();
        setup_database(&conn, &default_partitions()).unwrap();

        assert_eq!(count_rows(&conn, MERGED_TABLE).unwrap(), 0);
    }

    #[test]
    fn test_partition_name_validation() {
        assert!(validate_partition_name("stt1_raw").is_ok());
        assert!(validate_partition_name("_scratch").is_ok());

        for bad in ["", "1raw", "raw-1", "raw; DROP TABLE x", "stt_merged", "sqlite_master"] {
            assert!(
                matches!(validate_partition_name(bad), Err(PipelineError::InvalidPartition(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn, &default_partitions()).unwrap();

        let event = PipelineEvent::new(
            "stage",
            "stt1_raw",
            serde_json::json!({"rows": 3}),
        );
        insert_event(&conn, &event).unwrap();

        let events = get_events(&conn, "stage", "stt1_raw").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, event.event_id);
        assert_eq!(events[0].data["rows"], 3);
        assert!(get_events(&conn, "stage", "stt2_raw").unwrap().is_empty());
    }
}
