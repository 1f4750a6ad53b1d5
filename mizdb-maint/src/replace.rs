//! Relation replacement
//!
//! Swaps a record out of every many-to-many relation it takes part in: the
//! records linked to it get linked to the replacements instead.

use crate::audit::{Actor, AuditLog, LogEntry, RecordRef};
use crate::catalog::{relation_target, Cardinality, Schema};
use crate::records::{fetch_record, referenced_value, Record};
use crate::{MaintError, Result};
use mizdb_common::value::quote_ident;
use mizdb_common::Value;
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Replace `record` with `replacements` in all its many-to-many relations
///
/// Links that already exist are kept as they are. Returns the records on the
/// far side whose links were changed.
pub async fn replace(
    pool: &SqlitePool,
    audit: &dyn AuditLog,
    actor: &Actor,
    record: &Record,
    replacements: &[Record],
) -> Result<Vec<RecordRef>> {
    let mut tx = pool.begin().await?;
    let schema = Schema::load(&mut tx).await?;
    let record_type = schema.record_type(&record.table)?;

    let current = fetch_record(&mut tx, record_type, &record.pk)
        .await?
        .ok_or_else(|| MaintError::NotFound(format!("Record {}", record.to_ref())))?;

    let mut substitutes: Vec<Record> = Vec::with_capacity(replacements.len());
    for replacement in replacements {
        if replacement.table != record.table {
            return Err(MaintError::InvalidInput(format!(
                "Cannot replace {} with {}: different tables",
                record.to_ref(),
                replacement.to_ref()
            )));
        }
        if replacement.pk == current.pk || substitutes.iter().any(|s| s.pk == replacement.pk) {
            continue;
        }
        let found = fetch_record(&mut tx, record_type, &replacement.pk)
            .await?
            .ok_or_else(|| MaintError::NotFound(format!("Replacement {}", replacement.to_ref())))?;
        substitutes.push(found);
    }

    let mut changed: Vec<RecordRef> = Vec::new();
    let mut log: Vec<LogEntry> = Vec::new();

    for relation in schema.relations_of(&record_type.name, false, false)? {
        if relation.cardinality != Cardinality::ManyToMany {
            continue;
        }
        let Some(far_field) = relation.far_field.as_deref() else {
            continue;
        };
        let (junction, column) = relation_target(&record_type.name, &relation)?;
        let junction_type = schema.record_type(junction)?;
        let referenced_column = junction_type
            .referenced_column(column)
            .unwrap_or(record_type.pk.as_str());

        let own_value = referenced_value(record_type, &current, referenced_column);
        if own_value.is_null() {
            continue;
        }

        let far_sql = format!(
            "SELECT DISTINCT {far} FROM {junction} WHERE {column} = ? AND {far} IS NOT NULL ORDER BY {far}",
            far = quote_ident(far_field),
            junction = quote_ident(junction),
            column = quote_ident(column),
        );
        let rows = own_value
            .bind_to(sqlx::query(&far_sql))
            .fetch_all(&mut *tx)
            .await?;
        let mut far_values = Vec::with_capacity(rows.len());
        for row in &rows {
            far_values.push(Value::from_row(row, 0)?);
        }

        let delete_sql = format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            quote_ident(junction),
            quote_ident(column),
            quote_ident(far_field),
        );
        let exists_sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ? AND {} = ?)",
            quote_ident(junction),
            quote_ident(column),
            quote_ident(far_field),
        );
        let insert_sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?, ?)",
            quote_ident(junction),
            quote_ident(column),
            quote_ident(far_field),
        );

        for far_value in far_values {
            let query = own_value.bind_to(sqlx::query(&delete_sql));
            far_value.bind_to(query).execute(&mut *tx).await?;

            for substitute in &substitutes {
                let link = referenced_value(record_type, substitute, referenced_column);
                let query = link.bind_to(sqlx::query(&exists_sql));
                let row = far_value.bind_to(query).fetch_one(&mut *tx).await?;
                let exists: bool = sqlx::Row::try_get(&row, 0)?;
                if exists {
                    continue;
                }
                let query = link.bind_to(sqlx::query(&insert_sql));
                far_value.bind_to(query).execute(&mut *tx).await?;
            }

            let far_ref = RecordRef::new(&relation.far_table, far_value);
            debug!(junction = %junction, record = %far_ref, "Replaced link");
            log.push(LogEntry::Change {
                record: far_ref.clone(),
                fields: vec![junction.to_string()],
                related: None,
            });
            if !changed.contains(&far_ref) {
                changed.push(far_ref);
            }
        }
    }

    for entry in &log {
        audit.record(&mut tx, actor, entry).await?;
    }
    tx.commit().await?;

    info!(
        record = %current.to_ref(),
        replacements = substitutes.len(),
        changed = changed.len(),
        "Replaced record in related sets"
    );
    Ok(changed)
}
