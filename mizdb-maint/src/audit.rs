//! Change-log recording
//!
//! Every mutation made by the maintenance routines is reported to an
//! [`AuditLog`] as a [`LogEntry`], attributed to an explicit [`Actor`].

use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use mizdb_common::Value;
use serde::Serialize;
use serde_json::json;
use sqlx::SqliteConnection;
use std::fmt;
use std::sync::Mutex;

/// Change-log action flags
pub const ADDITION: i64 = 1;
pub const CHANGE: i64 = 2;
pub const DELETION: i64 = 3;

/// The principal on whose behalf a change is made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub user_id: i64,
}

impl Actor {
    pub fn new(user_id: i64) -> Self {
        Self { user_id }
    }
}

/// Identifies one row of one table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RecordRef {
    pub table: String,
    pub pk: Value,
}

impl RecordRef {
    pub fn new(table: impl Into<String>, pk: Value) -> Self {
        Self {
            table: table.into(),
            pk,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.table, self.pk)
    }
}

/// One change-log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LogEntry {
    Addition {
        record: RecordRef,
    },
    /// `related` now belongs to `record`
    AdditionOfRelated {
        record: RecordRef,
        related: RecordRef,
    },
    Change {
        record: RecordRef,
        fields: Vec<String>,
        related: Option<RecordRef>,
    },
    Deletion {
        record: RecordRef,
    },
}

impl LogEntry {
    /// The record the entry is filed under
    pub fn record(&self) -> &RecordRef {
        match self {
            LogEntry::Addition { record }
            | LogEntry::AdditionOfRelated { record, .. }
            | LogEntry::Change { record, .. }
            | LogEntry::Deletion { record } => record,
        }
    }

    pub fn action_flag(&self) -> i64 {
        match self {
            LogEntry::Addition { .. } | LogEntry::AdditionOfRelated { .. } => ADDITION,
            LogEntry::Change { .. } => CHANGE,
            LogEntry::Deletion { .. } => DELETION,
        }
    }

    /// Structured change message stored alongside the entry
    pub fn change_message(&self) -> serde_json::Value {
        match self {
            LogEntry::Addition { .. } => json!([{ "added": {} }]),
            LogEntry::AdditionOfRelated { related, .. } => json!([{
                "added": { "name": related.table, "object": related.pk }
            }]),
            LogEntry::Change { fields, related, .. } => {
                let mut fields = fields.clone();
                fields.sort();
                let changed = match related {
                    Some(related) => json!({
                        "name": related.table,
                        "object": related.pk,
                        "fields": fields,
                    }),
                    None => json!({ "fields": fields }),
                };
                json!([{ "changed": changed }])
            }
            LogEntry::Deletion { .. } => json!([]),
        }
    }
}

/// Receives the change-log entries of maintenance operations
///
/// Entries are handed over on the connection of the running transaction, so
/// an implementation that writes to the database commits or rolls back
/// together with the change it describes.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, conn: &mut SqliteConnection, actor: &Actor, entry: &LogEntry) -> Result<()>;
}

/// Writes entries to the `change_log` table
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeLogTable;

#[async_trait]
impl AuditLog for ChangeLogTable {
    async fn record(&self, conn: &mut SqliteConnection, actor: &Actor, entry: &LogEntry) -> Result<()> {
        let record = entry.record();
        sqlx::query(
            r#"
            INSERT INTO change_log (action_time, user_id, table_name, object_id, action_flag, change_message)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(actor.user_id)
        .bind(&record.table)
        .bind(record.pk.to_string())
        .bind(entry.action_flag())
        .bind(entry.change_message().to_string())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

/// Keeps entries in memory; for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<(Actor, LogEntry)>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Actor, LogEntry)> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, _conn: &mut SqliteConnection, actor: &Actor, entry: &LogEntry) -> Result<()> {
        match self.entries.lock() {
            Ok(mut entries) => entries.push((*actor, entry.clone())),
            Err(poisoned) => poisoned.into_inner().push((*actor, entry.clone())),
        }
        Ok(())
    }
}
