//! Deduplicated dimension tables built from per-record fragments.
//!
//! Merge policy: the first fragment for a natural id creates the record;
//! later fragments only fill fields that are still null or empty. A field
//! that already holds a value is never overwritten.

use std::collections::HashMap;

use awardsync_shared::{AgencyRecord, RecipientRecord, SubAgencyRecord};
use tracing::trace;

use crate::normalize::DimensionFragments;

/// A reference entity keyed by a natural id.
pub trait Dimension {
    /// The dedupe key.
    fn natural_id(&self) -> &str;

    /// Copy each field of `incoming` into `self` where `self`'s field is empty.
    /// Returns `true` if any field changed.
    fn fill_from(&mut self, incoming: &Self) -> bool;
}

/// Fill `slot` from `incoming` only when `slot` is null/empty and `incoming` isn't.
fn fill(slot: &mut Option<String>, incoming: &Option<String>) -> bool {
    let slot_empty = slot.as_deref().is_none_or(str::is_empty);
    match incoming {
        Some(value) if slot_empty && !value.is_empty() => {
            *slot = Some(value.clone());
            true
        }
        _ => false,
    }
}

impl Dimension for RecipientRecord {
    fn natural_id(&self) -> &str {
        &self.recipient_id
    }

    fn fill_from(&mut self, incoming: &Self) -> bool {
        // Non-short-circuiting `|` so every field gets its chance.
        fill(&mut self.recipient_name, &incoming.recipient_name)
            | fill(&mut self.address, &incoming.address)
            | fill(&mut self.city, &incoming.city)
            | fill(&mut self.state, &incoming.state)
            | fill(&mut self.state_code, &incoming.state_code)
            | fill(&mut self.country, &incoming.country)
    }
}

impl Dimension for AgencyRecord {
    fn natural_id(&self) -> &str {
        &self.awarding_agency_code
    }

    fn fill_from(&mut self, incoming: &Self) -> bool {
        fill(&mut self.awarding_agency_name, &incoming.awarding_agency_name)
    }
}

impl Dimension for SubAgencyRecord {
    fn natural_id(&self) -> &str {
        &self.awarding_sub_agency_code
    }

    fn fill_from(&mut self, incoming: &Self) -> bool {
        fill(
            &mut self.awarding_sub_agency_name,
            &incoming.awarding_sub_agency_name,
        ) | fill(&mut self.awarding_agency_code, &incoming.awarding_agency_code)
    }
}

// ---------------------------------------------------------------------------
// DimensionTable
// ---------------------------------------------------------------------------

/// What a single merge did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First sighting of the id.
    Created,
    /// Existing record had at least one empty field filled.
    Filled,
    /// Nothing changed.
    Unchanged,
}

/// One record per natural id, in first-sighting order.
#[derive(Debug, Clone)]
pub struct DimensionTable<D> {
    index: HashMap<String, usize>,
    records: Vec<D>,
}

impl<D> Default for DimensionTable<D> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            records: Vec::new(),
        }
    }
}

impl<D: Dimension> DimensionTable<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert `fragment` under its natural id.
    pub fn merge(&mut self, fragment: D) -> MergeOutcome {
        match self.index.get(fragment.natural_id()) {
            Some(&pos) => {
                if self.records[pos].fill_from(&fragment) {
                    MergeOutcome::Filled
                } else {
                    MergeOutcome::Unchanged
                }
            }
            None => {
                self.index
                    .insert(fragment.natural_id().to_string(), self.records.len());
                self.records.push(fragment);
                MergeOutcome::Created
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&D> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Freeze the table into its rows.
    pub fn into_records(self) -> Vec<D> {
        self.records
    }
}

// ---------------------------------------------------------------------------
// DimensionMerger
// ---------------------------------------------------------------------------

/// Owns the three dimension tables for a run. The only writer.
#[derive(Debug, Default)]
pub struct DimensionMerger {
    recipients: DimensionTable<RecipientRecord>,
    agencies: DimensionTable<AgencyRecord>,
    sub_agencies: DimensionTable<SubAgencyRecord>,
}

/// Frozen dimension tables, produced once paging has finished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DimensionTables {
    pub recipients: Vec<RecipientRecord>,
    pub agencies: Vec<AgencyRecord>,
    pub sub_agencies: Vec<SubAgencyRecord>,
}

/// Table sizes, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DimensionCounts {
    pub recipients: usize,
    pub agencies: usize,
    pub sub_agencies: usize,
}

impl DimensionMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every fragment present in `fragments`.
    pub fn merge(&mut self, fragments: DimensionFragments) {
        if let Some(recipient) = fragments.recipient {
            let id = recipient.recipient_id.clone();
            let outcome = self.recipients.merge(recipient);
            trace!(recipient_id = %id, ?outcome, "recipient merged");
        }
        if let Some(agency) = fragments.agency {
            self.agencies.merge(agency);
        }
        if let Some(sub_agency) = fragments.sub_agency {
            self.sub_agencies.merge(sub_agency);
        }
    }

    pub fn recipients(&self) -> &DimensionTable<RecipientRecord> {
        &self.recipients
    }

    pub fn agencies(&self) -> &DimensionTable<AgencyRecord> {
        &self.agencies
    }

    pub fn sub_agencies(&self) -> &DimensionTable<SubAgencyRecord> {
        &self.sub_agencies
    }

    pub fn counts(&self) -> DimensionCounts {
        DimensionCounts {
            recipients: self.recipients.len(),
            agencies: self.agencies.len(),
            sub_agencies: self.sub_agencies.len(),
        }
    }

    /// Finalize: no further merges are possible after this.
    pub fn finish(self) -> DimensionTables {
        DimensionTables {
            recipients: self.recipients.into_records(),
            agencies: self.agencies.into_records(),
            sub_agencies: self.sub_agencies.into_records(),
        }
    }
}

impl DimensionTables {
    pub fn counts(&self) -> DimensionCounts {
        DimensionCounts {
            recipients: self.recipients.len(),
            agencies: self.agencies.len(),
            sub_agencies: self.sub_agencies.len(),
        }
    }
}
