//! Protection checking
//!
//! Works out, without deleting anything, whether deleting a set of records
//! would be refused because of RESTRICT / NO ACTION foreign keys. Cascading
//! foreign keys are followed the way SQLite would follow them: rows removed
//! by a cascade can block as well, and rows that would be removed anyway do
//! not block.

use crate::audit::RecordRef;
use crate::catalog::{ForeignKey, OnDelete, Schema};
use crate::records::{bind_values, KEY_CHUNK};
use crate::Result;
use mizdb_common::value::{placeholders, quote_ident};
use mizdb_common::Value;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::debug;

/// A record that cannot be deleted, with the records holding on to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectedRecord {
    pub record: RecordRef,
    pub referenced_by: Vec<RecordRef>,
}

/// Deletion refused because protected relations still point at records
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("Cannot delete protected records: {}", summarize(.protected))]
pub struct ProtectionError {
    pub protected: Vec<ProtectedRecord>,
}

impl ProtectionError {
    /// Every record blocking the deletion
    pub fn blockers(&self) -> impl Iterator<Item = &RecordRef> {
        self.protected.iter().flat_map(|p| p.referenced_by.iter())
    }

    pub fn is_protected(&self, record: &RecordRef) -> bool {
        self.protected.iter().any(|p| &p.record == record)
    }
}

fn summarize(protected: &[ProtectedRecord]) -> String {
    protected
        .iter()
        .map(|p| {
            let by: Vec<String> = p.referenced_by.iter().map(ToString::to_string).collect();
            format!("{} (referenced by {})", p.record, by.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// (referencing key, referenced key) pairs for `fk` restricted to `keys`
async fn referencing_pairs(
    conn: &mut SqliteConnection,
    schema: &Schema,
    fk: &ForeignKey,
    keys: &[Value],
) -> Result<Vec<(Value, Value)>> {
    let referencing = schema.record_type(&fk.table)?;
    let referenced = schema.record_type(&fk.references)?;

    let build_sql = |count: usize| {
        format!(
            "SELECT r.{r_pk}, t.{t_pk} FROM {r_table} AS r JOIN {t_table} AS t ON r.{column} = t.{to} \
             WHERE t.{t_pk} IN ({params})",
            r_pk = quote_ident(&referencing.pk),
            t_pk = quote_ident(&referenced.pk),
            r_table = quote_ident(&referencing.name),
            t_table = quote_ident(&referenced.name),
            column = quote_ident(&fk.column),
            to = quote_ident(&fk.references_column),
            params = placeholders(count),
        )
    };

    let mut pairs = Vec::new();
    for chunk in keys.chunks(KEY_CHUNK) {
        let sql = build_sql(chunk.len());
        let rows = bind_values(sqlx::query(&sql), chunk)
            .fetch_all(&mut *conn)
            .await?;
        for row in &rows {
            pairs.push((Value::from_row(row, 0)?, Value::from_row(row, 1)?));
        }
    }

    pairs.sort_by(|a, b| a.0.sql_cmp(&b.0));
    Ok(pairs)
}

/// Check whether the records of `table` with keys `pks` could be deleted
///
/// Returns `None` when nothing blocks the deletion. Never modifies data.
pub async fn find_protected(
    conn: &mut SqliteConnection,
    schema: &Schema,
    table: &str,
    pks: &[Value],
) -> Result<Option<ProtectionError>> {
    schema.record_type(table)?;

    let mut scheduled: HashMap<String, HashSet<Value>> = HashMap::new();
    let mut queue: VecDeque<(String, Vec<Value>)> = VecDeque::new();

    let mut initial = Vec::new();
    let entry = scheduled.entry(table.to_string()).or_default();
    for pk in pks {
        if entry.insert(pk.clone()) {
            initial.push(pk.clone());
        }
    }
    if initial.is_empty() {
        return Ok(None);
    }
    queue.push_back((table.to_string(), initial));

    // (protected record, blocker) in discovery order
    let mut candidates: Vec<(RecordRef, RecordRef)> = Vec::new();

    while let Some((current, keys)) = queue.pop_front() {
        let incoming: Vec<ForeignKey> = schema.foreign_keys_into(&current).cloned().collect();

        for fk in incoming {
            match fk.on_delete {
                OnDelete::SetNull | OnDelete::SetDefault => continue,
                OnDelete::Cascade => {
                    let pairs = referencing_pairs(conn, schema, &fk, &keys).await?;
                    let seen = scheduled.entry(fk.table.clone()).or_default();
                    let mut newly = Vec::new();
                    for (referencing_key, _) in pairs {
                        if seen.insert(referencing_key.clone()) {
                            newly.push(referencing_key);
                        }
                    }
                    if !newly.is_empty() {
                        debug!(table = %fk.table, count = newly.len(), "Cascade reaches rows");
                        queue.push_back((fk.table.clone(), newly));
                    }
                }
                OnDelete::Protect | OnDelete::NoAction => {
                    let pairs = referencing_pairs(conn, schema, &fk, &keys).await?;
                    for (referencing_key, referenced_key) in pairs {
                        candidates.push((
                            RecordRef::new(&current, referenced_key),
                            RecordRef::new(&fk.table, referencing_key),
                        ));
                    }
                }
            }
        }
    }

    let mut protected: Vec<ProtectedRecord> = Vec::new();
    for (record, blocker) in candidates {
        let removed_anyway = scheduled
            .get(&blocker.table)
            .map(|keys| keys.contains(&blocker.pk))
            .unwrap_or(false);
        if removed_anyway {
            continue;
        }
        match protected.iter_mut().find(|p| p.record == record) {
            Some(existing) => {
                if !existing.referenced_by.contains(&blocker) {
                    existing.referenced_by.push(blocker);
                }
            }
            None => protected.push(ProtectedRecord {
                record,
                referenced_by: vec![blocker],
            }),
        }
    }

    if protected.is_empty() {
        Ok(None)
    } else {
        Ok(Some(ProtectionError { protected }))
    }
}
