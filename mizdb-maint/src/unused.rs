//! Unused-record finder
//!
//! Lists the records of a table that are referenced at most `limit` times
//! through each of the table's reverse relations. With a limit of zero these
//! are the records nothing refers to.

use crate::catalog::{relation_target, Relation, Schema};
use crate::Result;
use mizdb_common::value::quote_ident;
use mizdb_common::Value;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A record under the limit, with its reference count per relation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnusedRecord {
    pub pk: Value,
    /// Keyed by `table.column` of the referencing side
    pub counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnusedReport {
    /// The relations that were counted
    pub relations: Vec<Relation>,
    /// Records in primary-key order
    pub records: Vec<UnusedRecord>,
}

fn relation_label(table: &str, column: &str) -> String {
    format!("{}.{}", table, column)
}

/// Find the records of `table` referenced at most `limit` times per relation
///
/// Self-relations are not counted.
pub async fn find_unused(
    conn: &mut SqliteConnection,
    schema: &Schema,
    table: &str,
    limit: u32,
) -> Result<UnusedReport> {
    let record_type = schema.record_type(table)?;
    let pk = quote_ident(&record_type.pk);
    let table_ident = quote_ident(&record_type.name);

    let all_sql = format!("SELECT {pk} FROM {table} ORDER BY {pk}", pk = pk, table = table_ident);
    let rows = sqlx::query(&all_sql).fetch_all(&mut *conn).await?;
    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        records.push(UnusedRecord {
            pk: Value::from_row(row, 0)?,
            counts: BTreeMap::new(),
        });
    }

    let relations: Vec<Relation> = schema
        .relations_of(table, false, true)?
        .into_iter()
        .filter(|r| !r.is_self_relation())
        .collect();

    for relation in &relations {
        let (related_table, column) = relation_target(table, relation)?;
        let related = schema.record_type(related_table)?;
        let referenced_column = related.referenced_column(column).unwrap_or(record_type.pk.as_str());

        let sql = format!(
            "SELECT t.{pk}, COUNT(r.{column}) FROM {table} AS t \
             LEFT JOIN {related} AS r ON r.{column} = t.{referenced} \
             GROUP BY t.{pk} HAVING COUNT(r.{column}) <= ?",
            pk = pk,
            table = table_ident,
            related = quote_ident(related_table),
            column = quote_ident(column),
            referenced = quote_ident(referenced_column),
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&mut *conn)
            .await?;

        let mut counts: HashMap<Value, i64> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let count: i64 = sqlx::Row::try_get(row, 1)?;
            counts.insert(Value::from_row(row, 0)?, count);
        }

        let label = relation_label(related_table, column);
        records.retain_mut(|record| match counts.get(&record.pk) {
            Some(&count) => {
                record.counts.insert(label.clone(), count);
                true
            }
            None => false,
        });
        debug!(relation = %label, remaining = records.len(), "Counted references");
    }

    Ok(UnusedReport { relations, records })
}
