//! Duplicate detection
//!
//! Groups the records of one table by the values of a chosen set of fields.
//! Groups are returned in the order their first member was read (primary-key
//! order), members likewise.

use crate::catalog::RecordType;
use crate::fields::is_empty_value;
use crate::records::{bind_values, Record, KEY_CHUNK};
use crate::{MaintError, Result};
use mizdb_common::value::{placeholders, quote_ident};
use mizdb_common::Value;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Which records to search
#[derive(Debug, Clone, PartialEq)]
pub enum Candidates {
    All,
    Keys(Vec<Value>),
}

/// One member of a duplicate group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DupeEntry {
    /// The record with the fetched field values
    pub record: Record,
    /// The shared values the group was formed on
    pub duplicate_values: BTreeMap<String, Value>,
    /// Values fetched only for display
    pub display_values: BTreeMap<String, Value>,
}

type GroupKey = Vec<(String, Value)>;

/// Primary key and the selected column values of one row
type Fetched = (Value, Vec<(String, Value)>);

fn decode_rows(rows: &[SqliteRow], columns: &[&str]) -> Result<Vec<Fetched>> {
    let mut fetched = Vec::with_capacity(rows.len());
    for row in rows {
        let pk = Value::from_row(row, 0)?;
        let mut values = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            values.push((column.to_string(), Value::from_row(row, i + 1)?));
        }
        fetched.push((pk, values));
    }
    Ok(fetched)
}

/// Find groups of records sharing the values of `dupe_fields`
///
/// Empty values take no part in the comparison; records with only empty
/// values in `dupe_fields` are never grouped. Groups with a single member
/// are dropped.
pub async fn find_duplicates(
    conn: &mut SqliteConnection,
    record_type: &RecordType,
    candidates: &Candidates,
    dupe_fields: &[String],
    display_fields: &[String],
) -> Result<Vec<Vec<DupeEntry>>> {
    if dupe_fields.is_empty() {
        return Err(MaintError::InvalidInput(
            "At least one field is needed to compare records".to_string(),
        ));
    }

    let mut columns: Vec<&str> = Vec::new();
    for name in dupe_fields.iter().chain(display_fields) {
        if record_type.field(name).is_none() {
            return Err(MaintError::InvalidInput(format!(
                "{} has no field named '{}'",
                record_type.name, name
            )));
        }
        if !columns.contains(&name.as_str()) {
            columns.push(name);
        }
    }

    let keys: &[Value] = match candidates {
        Candidates::All => &[],
        Candidates::Keys(keys) if keys.is_empty() => return Ok(Vec::new()),
        Candidates::Keys(keys) => keys,
    };

    let pk = quote_ident(&record_type.pk);
    let select: Vec<String> = std::iter::once(pk.clone())
        .chain(columns.iter().map(|c| quote_ident(c)))
        .collect();
    let table = quote_ident(&record_type.name);

    let mut fetched: Vec<Fetched> = Vec::new();
    if keys.is_empty() {
        let sql = format!("SELECT {} FROM {}", select.join(", "), table);
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        fetched.extend(decode_rows(&rows, &columns)?);
    } else {
        for chunk in keys.chunks(KEY_CHUNK) {
            let sql = format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                select.join(", "),
                table,
                pk,
                placeholders(chunk.len()),
            );
            let rows = bind_values(sqlx::query(&sql), chunk).fetch_all(&mut *conn).await?;
            fetched.extend(decode_rows(&rows, &columns)?);
        }
    }
    fetched.sort_by(|a, b| a.0.sql_cmp(&b.0));
    let scanned = fetched.len();

    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<Vec<DupeEntry>> = Vec::new();

    for (pk_value, values) in fetched {
        let mut key: GroupKey = Vec::new();
        for name in dupe_fields {
            let Some((_, value)) = values.iter().find(|(c, _)| c == name) else {
                continue;
            };
            let empty = record_type
                .field(name)
                .map(|f| is_empty_value(f, value))
                .unwrap_or_else(|| value.is_empty());
            if !empty && !key.iter().any(|(k, _)| k == name) {
                key.push((name.clone(), value.clone()));
            }
        }
        if key.is_empty() {
            continue;
        }

        let display_values = display_fields
            .iter()
            .filter_map(|name| {
                values
                    .iter()
                    .find(|(c, _)| c == name)
                    .map(|(c, v)| (c.clone(), v.clone()))
            })
            .collect();

        let entry = DupeEntry {
            record: Record {
                table: record_type.name.clone(),
                pk: pk_value,
                values,
            },
            duplicate_values: key.iter().cloned().collect(),
            display_values,
        };

        match index.get(&key) {
            Some(&i) => groups[i].push(entry),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![entry]);
            }
        }
    }

    groups.retain(|group| group.len() > 1);
    debug!(
        table = %record_type.name,
        scanned = scanned,
        groups = groups.len(),
        "Searched for duplicates"
    );
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Schema;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn setup() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for sql in [
            "CREATE TABLE magazine (id INTEGER PRIMARY KEY, title TEXT, issn TEXT, note TEXT)",
            "INSERT INTO magazine (id, title, issn, note) VALUES \
                (1, 'Sounds', '0038-1853', 'a'), \
                (2, 'Spex', NULL, 'b'), \
                (3, 'Sounds', '0038-1853', 'c'), \
                (4, 'Spex', '', 'd'), \
                (5, NULL, NULL, 'e'), \
                (6, NULL, '', 'f'), \
                (7, 'Sounds', NULL, 'g')",
        ] {
            sqlx::query(sql).execute(&pool).await.unwrap();
        }
        pool
    }

    fn names(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    fn pks(group: &[DupeEntry]) -> Vec<i64> {
        group
            .iter()
            .map(|e| match e.record.pk {
                Value::Integer(pk) => pk,
                _ => panic!("unexpected key"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_groups_on_non_empty_values() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let schema = Schema::load(&mut conn).await.unwrap();
        let magazine = schema.record_type("magazine").unwrap();

        let groups = find_duplicates(&mut conn, magazine, &Candidates::All, &names(&["title", "issn"]), &[])
            .await
            .unwrap();

        // 2 and 4 share only a title: NULL and '' are both "no value".
        // 5 and 6 have nothing to compare and are never grouped.
        assert_eq!(groups.len(), 2);
        assert_eq!(pks(&groups[0]), vec![1, 3]);
        assert_eq!(pks(&groups[1]), vec![2, 4]);
        assert_eq!(groups[1][0].duplicate_values.len(), 1);
    }

    #[tokio::test]
    async fn test_restricts_to_candidates() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let schema = Schema::load(&mut conn).await.unwrap();
        let magazine = schema.record_type("magazine").unwrap();

        let candidates = Candidates::Keys(vec![Value::Integer(3), Value::Integer(7), Value::Integer(2)]);
        let groups = find_duplicates(&mut conn, magazine, &candidates, &names(&["title"]), &names(&["note"]))
            .await
            .unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(pks(&groups[0]), vec![3, 7]);
        assert_eq!(groups[0][1].display_values["note"], Value::Text("g".into()));

        let none = find_duplicates(&mut conn, magazine, &Candidates::Keys(vec![]), &names(&["title"]), &[])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_field_is_rejected() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let schema = Schema::load(&mut conn).await.unwrap();
        let magazine = schema.record_type("magazine").unwrap();

        let result = find_duplicates(&mut conn, magazine, &Candidates::All, &names(&["publisher"]), &[]).await;
        assert!(matches!(result, Err(MaintError::InvalidInput(_))));

        let result = find_duplicates(&mut conn, magazine, &Candidates::All, &[], &[]).await;
        assert!(matches!(result, Err(MaintError::InvalidInput(_))));
    }
}
