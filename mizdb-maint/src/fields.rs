//! Mutable-field classification
//!
//! Decides which columns of a record may be overwritten with donor data
//! during a merge: the ones that hold nothing meaningful yet.

use crate::catalog::{Field, FieldKind, RecordType};
use crate::records::Record;
use mizdb_common::Value;

/// Whether `value` counts as "no data" for `field`
pub fn is_empty_value(field: &Field, value: &Value) -> bool {
    if value.is_empty() {
        return true;
    }
    match (field.kind, value) {
        (FieldKind::Json, Value::Text(text)) => matches!(text.trim(), "[]" | "{}"),
        _ => false,
    }
}

/// Fields of `record` that may be filled in from other records
///
/// A field qualifies when its value is empty, or when it still holds its
/// static default. Boolean defaults are deliberate choices and never qualify.
/// The primary key, relation columns and private (`_`-prefixed) columns are
/// never returned. Result is in column order.
pub fn updateable_fields(record_type: &RecordType, record: &Record) -> Vec<String> {
    let mut updateable = Vec::new();

    for field in record_type.scalar_fields() {
        if field.name.starts_with('_') {
            continue;
        }
        let Some(value) = record.get(&field.name) else {
            continue;
        };

        if is_empty_value(field, value) {
            updateable.push(field.name.clone());
        } else if field.kind != FieldKind::Boolean && field.default.as_ref() == Some(value) {
            updateable.push(field.name.clone());
        }
    }

    updateable
}
