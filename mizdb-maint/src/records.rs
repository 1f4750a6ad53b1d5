//! Dynamic record access

use crate::audit::RecordRef;
use crate::catalog::RecordType;
use crate::Result;
use mizdb_common::value::{placeholders, quote_ident};
use mizdb_common::Value;
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqliteConnection};

/// A row of some record type: primary key plus every column value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub table: String,
    pub pk: Value,
    /// Column values in declaration order
    pub values: Vec<(String, Value)>,
}

impl Record {
    /// A record known only by its key
    ///
    /// Enough to pass to `merge` or `replace`, which re-read every record
    /// inside their transaction.
    pub fn key(table: impl Into<String>, pk: impl Into<Value>) -> Self {
        Self {
            table: table.into(),
            pk: pk.into(),
            values: Vec::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn to_ref(&self) -> RecordRef {
        RecordRef::new(&self.table, self.pk.clone())
    }
}

/// Value of `column` that rows pointing at `record` hold
pub(crate) fn referenced_value(record_type: &RecordType, record: &Record, column: &str) -> Value {
    if column == record_type.pk {
        record.pk.clone()
    } else {
        record.get(column).cloned().unwrap_or(Value::Null)
    }
}

/// Most keys bound into one `IN (...)` list
///
/// SQLite caps the number of parameters per statement; key lists of any
/// length are sent in chunks of this size.
pub(crate) const KEY_CHUNK: usize = 500;

/// Bind `values` as the next positional parameters of `query`
pub(crate) fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = value.bind_to(query);
    }
    query
}

fn select_list(record_type: &RecordType) -> String {
    let mut columns = vec![quote_ident(&record_type.pk)];
    columns.extend(record_type.fields.iter().map(|f| quote_ident(&f.name)));
    columns.join(", ")
}

fn decode(record_type: &RecordType, row: &sqlx::sqlite::SqliteRow) -> Result<Record> {
    let pk = Value::from_row(row, 0)?;
    let mut values = Vec::with_capacity(record_type.fields.len());
    for (i, field) in record_type.fields.iter().enumerate() {
        values.push((field.name.clone(), Value::from_row(row, i + 1)?));
    }
    Ok(Record {
        table: record_type.name.clone(),
        pk,
        values,
    })
}

/// Read one record by primary key
pub async fn fetch_record(
    conn: &mut SqliteConnection,
    record_type: &RecordType,
    pk: &Value,
) -> Result<Option<Record>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?",
        select_list(record_type),
        quote_ident(&record_type.name),
        quote_ident(&record_type.pk),
    );
    let row = pk.bind_to(sqlx::query(&sql)).fetch_optional(&mut *conn).await?;

    row.map(|row| decode(record_type, &row)).transpose()
}

/// Read the records with the given keys, in primary-key order
pub async fn fetch_records(
    conn: &mut SqliteConnection,
    record_type: &RecordType,
    pks: &[Value],
) -> Result<Vec<Record>> {
    let mut records = Vec::with_capacity(pks.len());
    for chunk in pks.chunks(KEY_CHUNK) {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} IN ({})",
            select_list(record_type),
            quote_ident(&record_type.name),
            quote_ident(&record_type.pk),
            placeholders(chunk.len()),
        );
        let rows = bind_values(sqlx::query(&sql), chunk)
            .fetch_all(&mut *conn)
            .await?;
        for row in &rows {
            records.push(decode(record_type, row)?);
        }
    }

    records.sort_by(|a, b| a.pk.sql_cmp(&b.pk));
    Ok(records)
}

/// Keys of the rows of `table` whose `column` holds one of `values`, in key order
pub(crate) async fn keys_where_in(
    conn: &mut SqliteConnection,
    table: &str,
    key_column: &str,
    column: &str,
    values: &[Value],
) -> Result<Vec<Value>> {
    let mut keys = Vec::new();
    for chunk in values.chunks(KEY_CHUNK) {
        let sql = format!(
            "SELECT {key} FROM {table} WHERE {column} IN ({params})",
            key = quote_ident(key_column),
            table = quote_ident(table),
            column = quote_ident(column),
            params = placeholders(chunk.len()),
        );
        let rows = bind_values(sqlx::query(&sql), chunk)
            .fetch_all(&mut *conn)
            .await?;
        for row in &rows {
            keys.push(Value::from_row(row, 0)?);
        }
    }

    keys.sort_by(Value::sql_cmp);
    Ok(keys)
}

/// Delete the rows of `table` with the given keys
pub(crate) async fn delete_keys(
    conn: &mut SqliteConnection,
    table: &str,
    key_column: &str,
    keys: &[Value],
) -> Result<u64> {
    let mut deleted = 0;
    for chunk in keys.chunks(KEY_CHUNK) {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_ident(table),
            quote_ident(key_column),
            placeholders(chunk.len()),
        );
        let result = bind_values(sqlx::query(&sql), chunk).execute(&mut *conn).await?;
        deleted += result.rows_affected();
    }
    Ok(deleted)
}
