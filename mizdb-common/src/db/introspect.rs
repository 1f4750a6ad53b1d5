//! Schema introspection
//!
//! Reads the live schema of a SQLite database through the `pragma_*`
//! table-valued functions. The results are raw: interpreting them as record
//! types and relations is the job of the relation catalog.

use crate::Result;
use sqlx::{Row, SqliteConnection};
use tracing::warn;

/// Actual column from database introspection (pragma_table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    /// Column ID (position in table)
    pub cid: i64,
    /// Column name
    pub name: String,
    /// Declared SQL type (may be empty)
    pub type_name: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// DEFAULT clause as written in the schema
    pub default_value: Option<String>,
    /// Position in the primary key (0 = not part of it)
    pub pk: i64,
}

/// One single-column foreign key (pragma_foreign_key_list result)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActualForeignKey {
    /// Table declaring the foreign key
    pub table: String,
    /// Pointer column on `table`
    pub column: String,
    /// Referenced table
    pub references: String,
    /// Referenced column; `None` means the referenced table's primary key
    pub references_column: Option<String>,
    /// ON DELETE action as reported by SQLite ("CASCADE", "RESTRICT", ...)
    pub on_delete: String,
}

/// A UNIQUE index or constraint (including the primary key index)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIndex {
    pub name: String,
    pub columns: Vec<String>,
}

/// Schema introspection - read actual database schema
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// All user tables in alphabetical order, excluding SQLite internal tables
    pub async fn list_tables(conn: &mut SqliteConnection) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            r#"
            SELECT name
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(tables)
    }

    /// Check if table exists
    pub async fn table_exists(conn: &mut SqliteConnection, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type='table' AND name = ?
            )
            "#,
        )
        .bind(table_name)
        .fetch_one(&mut *conn)
        .await?;

        Ok(exists)
    }

    /// Read actual columns of a table, in declaration order
    pub async fn introspect_table(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> Result<Vec<ActualColumn>> {
        let rows = sqlx::query(
            r#"SELECT cid, name, type, "notnull", dflt_value, pk FROM pragma_table_info(?)"#,
        )
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(ActualColumn {
                cid: row.try_get("cid")?,
                name: row.try_get("name")?,
                type_name: row.try_get::<Option<String>, _>("type")?.unwrap_or_default(),
                not_null: row.try_get::<i64, _>("notnull")? != 0,
                default_value: row.try_get("dflt_value")?,
                pk: row.try_get("pk")?,
            });
        }

        // Sort by cid to ensure consistent order
        columns.sort_by_key(|c| c.cid);

        Ok(columns)
    }

    /// Read the single-column foreign keys declared by a table
    ///
    /// Composite foreign keys cannot be followed by the maintenance routines;
    /// they are reported with a warning and skipped.
    pub async fn foreign_keys(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> Result<Vec<ActualForeignKey>> {
        let rows = sqlx::query(
            r#"
            SELECT id, seq, "table", "from", "to", on_delete
            FROM pragma_foreign_key_list(?)
            ORDER BY id, seq
            "#,
        )
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        let mut grouped: Vec<(i64, Vec<ActualForeignKey>)> = Vec::new();
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let fk = ActualForeignKey {
                table: table_name.to_string(),
                column: row.try_get("from")?,
                references: row.try_get("table")?,
                references_column: row.try_get("to")?,
                on_delete: row.try_get("on_delete")?,
            };
            match grouped.last_mut() {
                Some((last_id, parts)) if *last_id == id => parts.push(fk),
                _ => grouped.push((id, vec![fk])),
            }
        }

        let mut foreign_keys = Vec::with_capacity(grouped.len());
        for (_, mut parts) in grouped {
            if parts.len() == 1 {
                foreign_keys.extend(parts.pop());
            } else {
                warn!(
                    table = %table_name,
                    references = %parts[0].references,
                    "Skipping composite foreign key"
                );
            }
        }

        Ok(foreign_keys)
    }

    /// Read the UNIQUE indexes of a table with their column lists
    ///
    /// Partial indexes and indexes on expressions do not constrain plain
    /// column values and are left out.
    pub async fn unique_indexes(
        conn: &mut SqliteConnection,
        table_name: &str,
    ) -> Result<Vec<UniqueIndex>> {
        let index_rows = sqlx::query(
            r#"SELECT name, "unique", partial FROM pragma_index_list(?) ORDER BY seq"#,
        )
        .bind(table_name)
        .fetch_all(&mut *conn)
        .await?;

        let mut indexes = Vec::new();
        for row in &index_rows {
            let unique: i64 = row.try_get("unique")?;
            let partial: i64 = row.try_get("partial")?;
            if unique == 0 || partial != 0 {
                continue;
            }
            let name: String = row.try_get("name")?;

            let column_rows = sqlx::query(
                "SELECT seqno, name FROM pragma_index_info(?) ORDER BY seqno",
            )
            .bind(&name)
            .fetch_all(&mut *conn)
            .await?;

            let mut columns = Vec::with_capacity(column_rows.len());
            let mut has_expression = false;
            for column_row in &column_rows {
                match column_row.try_get::<Option<String>, _>("name")? {
                    Some(column) => columns.push(column),
                    None => has_expression = true,
                }
            }
            if has_expression || columns.is_empty() {
                continue;
            }

            indexes.push(UniqueIndex { name, columns });
        }

        Ok(indexes)
    }
}
