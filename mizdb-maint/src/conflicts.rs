//! Merge-conflict planning
//!
//! Collects, for each field of the survivor that could be filled in, every
//! distinct value the donors offer. A single candidate can be applied
//! automatically; several candidates are a conflict for a person to resolve
//! before calling `merge` with explicit field updates.

use crate::catalog::RecordType;
use crate::fields::{is_empty_value, updateable_fields};
use crate::records::Record;
use mizdb_common::Value;
use serde::Serialize;
use std::collections::BTreeMap;

/// Candidate donor values per updateable survivor field
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldUpdatePlan {
    /// Fields in column order, each with its distinct donor values in first-seen order
    candidates: Vec<(String, Vec<Value>)>,
}

impl FieldUpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self, field: &str) -> &[Value] {
        self.candidates
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.candidates
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn has_conflicts(&self) -> bool {
        self.candidates.iter().any(|(_, values)| values.len() > 1)
    }

    pub fn conflicting_fields(&self) -> Vec<String> {
        self.candidates
            .iter()
            .filter(|(_, values)| values.len() > 1)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The first donor value of every field
    pub fn first_wins(&self) -> BTreeMap<String, Value> {
        self.candidates
            .iter()
            .filter_map(|(name, values)| values.first().map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

/// Plan how `donors` could fill in the empty fields of `survivor`
///
/// Donors are scanned in the order given.
pub fn plan_field_updates(record_type: &RecordType, survivor: &Record, donors: &[Record]) -> FieldUpdatePlan {
    let mut candidates = Vec::new();

    for name in updateable_fields(record_type, survivor) {
        let Some(field) = record_type.field(&name) else {
            continue;
        };

        let mut values: Vec<Value> = Vec::new();
        for donor in donors {
            match donor.get(&name) {
                Some(value) if !is_empty_value(field, value) && !values.contains(value) => {
                    values.push(value.clone())
                }
                _ => {}
            }
        }

        if !values.is_empty() {
            candidates.push((name, values));
        }
    }

    FieldUpdatePlan { candidates }
}
