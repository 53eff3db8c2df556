// 🧹 Record Normalizer
// Raw STT CSV → validated Records. Schema problems are fatal, bad rows are counted.

use crate::error::{PipelineError, Result};
use crate::record::{ClientType, Record};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// COLUMNS
// ============================================================================

pub const COL_ID: &str = "stt";
pub const COL_ID_ALIAS: &str = "number";
pub const COL_DATE: &str = "date";
pub const COL_CLIENT_CODE: &str = "client_code";
pub const COL_CLIENT_TYPE: &str = "client_type";
pub const COL_AMOUNT: &str = "amount";

const REQUIRED_COLUMNS: [&str; 5] = [COL_ID, COL_DATE, COL_CLIENT_CODE, COL_CLIENT_TYPE, COL_AMOUNT];

/// "  Client Code " → "client_code"
pub fn normalize_column_name(name: &str) -> String {
    name.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Positions of the required columns in the header row
#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    id: usize,
    date: usize,
    client_code: usize,
    client_type: usize,
    amount: usize,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord, source_name: &str) -> Result<Self> {
        let names: Vec<String> = headers.iter().map(normalize_column_name).collect();
        let find = |wanted: &str| names.iter().position(|n| n == wanted);

        // "number" only stands in for "stt" when the real column is absent
        let id = find(COL_ID).or_else(|| find(COL_ID_ALIAS));

        let found = [
            id,
            find(COL_DATE),
            find(COL_CLIENT_CODE),
            find(COL_CLIENT_TYPE),
            find(COL_AMOUNT),
        ];

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .zip(found.iter())
            .filter(|(_, pos)| pos.is_none())
            .map(|(name, _)| name.to_string())
            .collect();

        match found {
            [Some(id), Some(date), Some(client_code), Some(client_type), Some(amount)] => {
                Ok(ColumnIndex { id, date, client_code, client_type, amount })
            }
            _ => Err(PipelineError::Schema {
                source_name: source_name.to_string(),
                missing,
            }),
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// Row accounting for one normalized input
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeReport {
    pub source: String,
    pub rows_read: usize,
    pub rows_accepted: usize,
    /// Dropped: a required field was empty after trimming
    pub rejected_missing_field: usize,
    /// Dropped: date could not be parsed
    pub rejected_bad_date: usize,
    /// Dropped: row is not valid UTF-8
    pub rejected_bad_encoding: usize,
    /// Kept with amount = 0
    pub amounts_coerced: usize,
}

impl NormalizeReport {
    pub fn rows_rejected(&self) -> usize {
        self.rejected_missing_field + self.rejected_bad_date + self.rejected_bad_encoding
    }
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub records: Vec<Record>,
    pub report: NormalizeReport,
}

// ============================================================================
// FIELD PARSING
// ============================================================================

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Parse a calendar date; any time component is discarded
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }

    DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive())
}

/// Parse a signed amount. None for anything non-numeric or non-finite.
pub fn parse_amount(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite())
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Normalize a CSV file on disk
pub fn normalize_csv(path: &Path) -> Result<Normalized> {
    let (source_name, bytes) = read_source(path)?;
    normalize_reader(bytes.as_slice(), &source_name)
}

/// Read a whole source file, returning its display name and bytes
pub fn read_source(path: &Path) -> Result<(String, Vec<u8>)> {
    if !path.exists() {
        return Err(PipelineError::SourceNotFound(path.to_path_buf()));
    }

    let source_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.csv")
        .to_string();

    let bytes = std::fs::read(path)?;
    Ok((source_name, bytes))
}

/// Normalize any CSV byte stream with a header row
pub fn normalize_reader<R: Read>(input: R, source_name: &str) -> Result<Normalized> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let columns = ColumnIndex::resolve(reader.headers()?, source_name)?;

    let mut report = NormalizeReport {
        source: source_name.to_string(),
        ..Default::default()
    };
    let mut records = Vec::new();

    for result in reader.byte_records() {
        let raw = result?;
        report.rows_read += 1;

        let line = raw.position().map(|p| p.line()).unwrap_or(0);
        let Ok(row) = StringRecord::from_byte_record(raw) else {
            debug!(source = source_name, line, "row rejected: invalid UTF-8");
            report.rejected_bad_encoding += 1;
            continue;
        };
        let field = |idx: usize| row.get(idx).unwrap_or("").trim();

        let id = field(columns.id);
        let date = field(columns.date);
        let client_code = field(columns.client_code);
        let client_type = field(columns.client_type);
        let amount = field(columns.amount);

        if [id, date, client_code, client_type, amount].iter().any(|v| v.is_empty()) {
            debug!(source = source_name, line, "row rejected: empty required field");
            report.rejected_missing_field += 1;
            continue;
        }

        let Some(date) = parse_date(date) else {
            debug!(source = source_name, line, value = date, "row rejected: unparseable date");
            report.rejected_bad_date += 1;
            continue;
        };

        let amount = parse_amount(amount).unwrap_or_else(|| {
            debug!(source = source_name, line, value = amount, "amount coerced to 0");
            report.amounts_coerced += 1;
            0.0
        });

        records.push(Record::new(
            id,
            date,
            client_code,
            ClientType::from_raw(client_type),
            amount,
        ));
    }

    report.rows_accepted = records.len();

    info!(
        source = source_name,
        rows = report.rows_accepted,
        rejected = report.rows_rejected(),
        coerced = report.amounts_coerced,
        "read OK"
    );

    Ok(Normalized { records, report })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(text: &str) -> Result<Normalized> {
        normalize_reader(text.as_bytes(), "test.csv")
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_normalize_clean_input() {
        let out = normalize(
            "stt,date,client_code,client_type,amount\n\
             A001,2025-11-01,CL001,C,1000\n\
             A002,2025-11-01,CL001,V,200\n",
        )
        .unwrap();

        assert_eq!(out.records.len(), 2);
        assert_eq!(
            out.records[0],
            Record::new("A001", ymd(2025, 11, 1), "CL001", ClientType::Debit, 1000.0)
        );
        assert_eq!(out.records[1].client_type, ClientType::Credit);
        assert_eq!(out.report.rows_read, 2);
        assert_eq!(out.report.rows_rejected(), 0);
    }

    #[test]
    fn test_headers_case_and_spacing_insensitive() {
        let out = normalize(
            " STT , Date ,Client Code,CLIENT_TYPE,Amount\n\
             A001,2025-11-01,CL001,c,10\n",
        )
        .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].client_code, "CL001");
    }

    #[test]
    fn test_number_alias_for_stt() {
        let out = normalize(
            "Number,date,client_code,client_type,amount\n\
             N-77,2025-11-01,CL001,C,10\n",
        )
        .unwrap();

        assert_eq!(out.records[0].id, "N-77");
    }

    #[test]
    fn test_stt_column_preferred_over_number() {
        let out = normalize(
            "number,stt,date,client_code,client_type,amount\n\
             999,A001,2025-11-01,CL001,C,10\n",
        )
        .unwrap();

        assert_eq!(out.records[0].id, "A001");
    }

    #[test]
    fn test_missing_columns_is_schema_error() {
        let err = normalize("stt,date,amount\nA001,2025-11-01,10\n").unwrap_err();

        match err {
            PipelineError::Schema { missing, .. } => {
                assert_eq!(missing, vec!["client_code", "client_type"]);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_row_missing_client_code_is_dropped() {
        let out = normalize(
            "stt,date,client_code,client_type,amount\n\
             A001,2025-11-01,   ,C,1000\n\
             A002,2025-11-01,CL001,V,200\n",
        )
        .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].id, "A002");
        assert_eq!(out.report.rejected_missing_field, 1);
    }

    #[test]
    fn test_short_row_counts_as_missing_field() {
        let out = normalize(
            "stt,date,client_code,client_type,amount\n\
             A001,2025-11-01,CL001\n",
        )
        .unwrap();

        assert!(out.records.is_empty());
        assert_eq!(out.report.rejected_missing_field, 1);
    }

    #[test]
    fn test_bad_date_drops_row() {
        let out = normalize(
            "stt,date,client_code,client_type,amount\n\
             A001,not-a-date,CL001,C,1000\n\
             A002,2025-13-40,CL001,C,1000\n",
        )
        .unwrap();

        assert!(out.records.is_empty());
        assert_eq!(out.report.rejected_bad_date, 2);
    }

    #[test]
    fn test_bad_amount_coerces_to_zero() {
        let out = normalize(
            "stt,date,client_code,client_type,amount\n\
             A001,2025-11-01,CL001,C,abc\n",
        )
        .unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].amount, 0.0);
        assert_eq!(out.report.amounts_coerced, 1);
    }

    #[test]
    fn test_invalid_utf8_row_is_rejected_not_fatal() {
        let input: &[u8] = b"stt,date,client_code,client_type,amount\n\
            A001,2025-11-01,CL\xff01,C,1000\n\
            A002,2025-11-01,CL001,V,200\n";

        let out = normalize_reader(input, "latin1.csv").unwrap();

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].id, "A002");
        assert_eq!(out.report.rejected_bad_encoding, 1);
        assert_eq!(out.report.rows_rejected(), 1);
    }

    #[test]
    fn test_whitespace_runs_collapse_in_headers() {
        assert_eq!(normalize_column_name("Client  Code"), "client_code");
        assert_eq!(normalize_column_name("\u{feff}STT"), "stt");
    }

    #[test]
    fn test_fields_are_trimmed_and_type_uppercased() {
        let out = normalize(
            "stt,date,client_code,client_type,amount\n\
             \" A001 \",2025-11-01,\" CL001 \",\" v \",\" -12.5 \"\n",
        )
        .unwrap();

        let rec = &out.records[0];
        assert_eq!(rec.id, "A001");
        assert_eq!(rec.client_code, "CL001");
        assert_eq!(rec.client_type, ClientType::Credit);
        assert_eq!(rec.amount, -12.5);
    }

    #[test]
    fn test_unknown_client_type_passes_through() {
        let out = normalize(
            "stt,date,client_code,client_type,amount\n\
             A001,2025-11-01,CL001,x,5\n",
        )
        .unwrap();

        assert_eq!(out.records[0].client_type, ClientType::Other("X".to_string()));
    }

    #[test]
    fn test_input_order_preserved() {
        let out = normalize(
            "stt,date,client_code,client_type,amount\n\
             B,2025-11-02,CL1,C,1\n\
             A,2025-11-01,CL1,C,1\n\
             C,2025-11-03,CL1,C,1\n",
        )
        .unwrap();

        let ids: Vec<&str> = out.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = ymd(2025, 11, 1);
        assert_eq!(parse_date("2025-11-01"), Some(expected));
        assert_eq!(parse_date("2025/11/01"), Some(expected));
        assert_eq!(parse_date("11/01/2025"), Some(expected));
        assert_eq!(parse_date("2025-11-01 08:30:00"), Some(expected));
        assert_eq!(parse_date("2025-11-01T23:59:59"), Some(expected));
        assert_eq!(parse_date("2025-11-01T10:00:00+07:00"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000"), Some(1000.0));
        assert_eq!(parse_amount(" +7.25 "), Some(7.25));
        assert_eq!(parse_amount("-3"), Some(-3.0));
        assert_eq!(parse_amount("1,000"), None);
        assert_eq!(parse_amount("NaN"), None);
        assert_eq!(parse_amount("inf"), None);
    }

    #[test]
    fn test_missing_file_is_source_not_found() {
        let err = normalize_csv(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::SourceNotFound(_)));
    }
}
