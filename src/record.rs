// 📦 Core record types
// Record = one validated STT row, BillingSummaryRow = one (date, client) total

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT TYPE
// ============================================================================

/// Bucket selector for aggregation
///
/// Source values are "C" (debit) and "V" (credit). Anything else is kept
/// verbatim so it survives staging, but never lands in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientType {
    Debit,
    Credit,
    Other(String),
}

impl ClientType {
    pub const DEBIT_CODE: &'static str = "C";
    pub const CREDIT_CODE: &'static str = "V";

    /// Trim + upper-case, then map the known codes
    pub fn from_raw(raw: &str) -> Self {
        let code = raw.trim().to_uppercase();
        match code.as_str() {
            Self::DEBIT_CODE => ClientType::Debit,
            Self::CREDIT_CODE => ClientType::Credit,
            _ => ClientType::Other(code),
        }
    }

    /// Code as stored in the database
    pub fn code(&self) -> &str {
        match self {
            ClientType::Debit => Self::DEBIT_CODE,
            ClientType::Credit => Self::CREDIT_CODE,
            ClientType::Other(code) => code,
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// A normalized STT row. Only built once every required field is present.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub date: NaiveDate,
    pub client_code: String,
    pub client_type: ClientType,
    pub amount: f64,
}

impl Record {
    pub fn new(
        id: &str,
        date: NaiveDate,
        client_code: &str,
        client_type: ClientType,
        amount: f64,
    ) -> Self {
        Record {
            id: id.to_string(),
            date,
            client_code: client_code.to_string(),
            client_type,
            amount,
        }
    }
}

/// Date format used in storage and export
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

// ============================================================================
// BILLING SUMMARY ROW
// ============================================================================

/// One output row. Serde names are the export header names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSummaryRow {
    #[serde(rename = "date")]
    pub date: NaiveDate,

    #[serde(rename = "client_code")]
    pub client_code: String,

    #[serde(rename = "STT Count")]
    pub stt_count: i64,

    #[serde(rename = "Debit")]
    pub debit: i64,

    #[serde(rename = "Credit")]
    pub credit: i64,
}
