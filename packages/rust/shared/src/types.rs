//! Core domain types: raw search records, fact rows, and dimension records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AwardSyncError, Result};

/// One award record exactly as the search endpoint returned it.
///
/// Keys are the API's field labels (`"Award ID"`, `"recipient_id"`, ...).
/// Values may be strings, numbers, nested objects, or null.
pub type RawRecord = Map<String, Value>;

/// A tabular row handed to a sink. Key order is column order.
pub type Row = Map<String, Value>;

/// Convert typed rows into sink rows, keeping field declaration order.
pub fn to_rows<T: Serialize>(items: &[T]) -> Result<Vec<Row>> {
    items
        .iter()
        .map(|item| match serde_json::to_value(item) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(AwardSyncError::parse(format!(
                "row did not serialize to an object: {other}"
            ))),
            Err(e) => Err(AwardSyncError::parse(format!("row serialization failed: {e}"))),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// FactRow
// ---------------------------------------------------------------------------

/// One row of the award fact table. Created once per raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FactRow {
    pub award_id: Option<String>,
    pub recipient_id: Option<String>,
    pub award_amount: Option<f64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub awarding_agency_code: Option<String>,
    pub awarding_sub_agency_code: Option<String>,
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Flattened recipient location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Location {
    /// Non-empty address lines joined with `", "`.
    pub address: Option<String>,
    pub city: Option<String>,
    pub state_name: Option<String>,
    pub state_code: Option<String>,
    pub country: Option<String>,
}

// ---------------------------------------------------------------------------
// Dimension records
// ---------------------------------------------------------------------------

/// Recipient dimension, keyed by `recipient_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecipientRecord {
    pub recipient_id: String,
    pub recipient_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    /// State name (not the two-letter code).
    pub state: Option<String>,
    pub state_code: Option<String>,
    pub country: Option<String>,
}

/// Awarding agency dimension, keyed by agency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgencyRecord {
    pub awarding_agency_code: String,
    pub awarding_agency_name: Option<String>,
}

/// Awarding sub-agency dimension, keyed by sub-agency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubAgencyRecord {
    pub awarding_sub_agency_code: String,
    pub awarding_sub_agency_name: Option<String>,
    /// Parent agency as seen on the record that introduced this sub-agency.
    pub awarding_agency_code: Option<String>,
}
