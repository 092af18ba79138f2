//! Raw search record → fact row + dimension fragments.
//!
//! Never fails: every missing or oddly-typed field reads as null.

use serde_json::Value;

use awardsync_shared::{
    AgencyRecord, FactRow, Location, RawRecord, RecipientRecord, SubAgencyRecord,
};

/// Field labels read from a raw record.
pub mod fields {
    pub const AWARD_ID: &str = "Award ID";
    pub const RECIPIENT_ID: &str = "recipient_id";
    pub const RECIPIENT_NAME: &str = "Recipient Name";
    pub const AWARD_AMOUNT: &str = "Award Amount";
    pub const START_DATE: &str = "Start Date";
    pub const END_DATE: &str = "End Date";
    pub const AWARDING_AGENCY: &str = "Awarding Agency";
    pub const AWARDING_AGENCY_CODE: &str = "Awarding Agency Code";
    pub const AWARDING_SUB_AGENCY: &str = "Awarding Sub Agency";
    pub const AWARDING_SUB_AGENCY_CODE: &str = "Awarding Sub Agency Code";
    pub const RECIPIENT_LOCATION: &str = "Recipient Location";
}

/// Keys inside the nested `Recipient Location` object.
mod location_keys {
    pub const ADDRESS_LINES: [&str; 3] = ["address_line1", "address_line2", "address_line3"];
    pub const CITY: &str = "city_name";
    pub const STATE_NAME: &str = "state_name";
    pub const STATE_CODE: &str = "state_code";
    pub const COUNTRY: &str = "country_name";
}

/// Partial dimension views extracted from one record.
///
/// A fragment is present only when its natural id is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionFragments {
    pub recipient: Option<RecipientRecord>,
    pub agency: Option<AgencyRecord>,
    pub sub_agency: Option<SubAgencyRecord>,
}

/// Result of normalizing one raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub fact: FactRow,
    pub fragments: DimensionFragments,
}

/// Normalize one raw record.
pub fn normalize(record: &RawRecord) -> Normalized {
    let recipient_id = text(record, fields::RECIPIENT_ID);
    let agency_code = text(record, fields::AWARDING_AGENCY_CODE);
    let sub_agency_code = text(record, fields::AWARDING_SUB_AGENCY_CODE);

    let fact = FactRow {
        award_id: text(record, fields::AWARD_ID),
        recipient_id: recipient_id.clone(),
        award_amount: amount(record, fields::AWARD_AMOUNT),
        start_date: text(record, fields::START_DATE),
        end_date: text(record, fields::END_DATE),
        awarding_agency_code: agency_code.clone(),
        awarding_sub_agency_code: sub_agency_code.clone(),
    };

    let recipient = recipient_id.map(|id| {
        let loc = flatten_location(record.get(fields::RECIPIENT_LOCATION));
        RecipientRecord {
            recipient_id: id,
            recipient_name: text(record, fields::RECIPIENT_NAME),
            address: loc.address,
            city: loc.city,
            state: loc.state_name,
            state_code: loc.state_code,
            country: loc.country,
        }
    });

    let agency = agency_code.clone().map(|code| AgencyRecord {
        awarding_agency_code: code,
        awarding_agency_name: text(record, fields::AWARDING_AGENCY),
    });

    let sub_agency = sub_agency_code.map(|code| SubAgencyRecord {
        awarding_sub_agency_code: code,
        awarding_sub_agency_name: text(record, fields::AWARDING_SUB_AGENCY),
        awarding_agency_code: agency_code,
    });

    Normalized {
        fact,
        fragments: DimensionFragments {
            recipient,
            agency,
            sub_agency,
        },
    }
}

/// Flatten a nested location object (or null / anything else) into columns.
///
/// `Address` joins the non-empty address lines with `", "` and is null when
/// all three are empty.
pub fn flatten_location(loc: Option<&Value>) -> Location {
    let Some(Value::Object(loc)) = loc else {
        return Location::default();
    };

    let parts: Vec<String> = location_keys::ADDRESS_LINES
        .iter()
        .filter_map(|key| text(loc, key))
        .collect();

    Location {
        address: (!parts.is_empty()).then(|| parts.join(", ")),
        city: text(loc, location_keys::CITY),
        state_name: text(loc, location_keys::STATE_NAME),
        state_code: text(loc, location_keys::STATE_CODE),
        country: text(loc, location_keys::COUNTRY),
    }
}

/// Read a scalar as text. Empty strings, nulls, and nested values are null.
fn text(record: &RawRecord, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a monetary amount from a number or a numeric string.
fn amount(record: &RawRecord, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
