//! Record merging
//!
//! Folds a set of donor records into one survivor:
//!
//! 1. empty survivor fields are filled in from the donors (or set from
//!    caller-provided updates); the values are chosen up front and written
//!    after step 4, so unique values can pass from a donor to the survivor
//! 2. every row of every reverse relation pointing at a donor is moved over
//!    to the survivor, unless the survivor already has an equivalent row
//! 3. the donors are checked for remaining protected references
//! 4. the donors are deleted
//!
//! All of it happens in one transaction: a protection failure in step 3
//! leaves the database exactly as it was.

use crate::audit::{Actor, AuditLog, LogEntry, RecordRef};
use crate::catalog::{relation_target, RecordType, Relation, Schema};
use crate::conflicts::plan_field_updates;
use crate::protection::find_protected;
use crate::records::{
    bind_values, delete_keys, fetch_record, keys_where_in, referenced_value, Record, KEY_CHUNK,
};
use crate::{MaintError, Result};
use mizdb_common::value::{placeholders, quote_ident};
use mizdb_common::Value;
use serde::Serialize;
use sqlx::{Connection, SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Merge options
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    /// Explicit survivor updates; computed from the donors when `None`
    pub field_updates: Option<BTreeMap<String, Value>>,
    /// Whether to update the survivor's fields at all
    pub expand_survivor: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            field_updates: None,
            expand_survivor: true,
        }
    }
}

impl MergeOptions {
    pub fn with_updates(field_updates: BTreeMap<String, Value>) -> Self {
        Self {
            field_updates: Some(field_updates),
            expand_survivor: true,
        }
    }

    pub fn without_expansion() -> Self {
        Self {
            field_updates: None,
            expand_survivor: false,
        }
    }
}

/// What happened to one related row pointing at a donor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "pk", rename_all = "snake_case")]
pub enum RepointOutcome {
    /// Now points at the survivor
    Repointed(Value),
    /// Left on the donor: the survivor already has an equivalent row
    Skipped(Value),
}

/// Reassignment results for one relation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationReport {
    pub relation: Relation,
    /// One outcome per related row that pointed at a donor, in key order
    pub outcomes: Vec<RepointOutcome>,
    /// Skipped rows that were deleted to free the donors
    pub deleted: Vec<Value>,
}

impl RelationReport {
    pub fn repointed(&self) -> Vec<&Value> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                RepointOutcome::Repointed(pk) => Some(pk),
                RepointOutcome::Skipped(_) => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> Vec<&Value> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                RepointOutcome::Skipped(pk) => Some(pk),
                RepointOutcome::Repointed(_) => None,
            })
            .collect()
    }
}

/// Result of a successful merge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeResult {
    /// The survivor as stored after the merge
    pub survivor: Record,
    /// Field values written to the survivor
    pub field_updates: BTreeMap<String, Value>,
    /// Fields where donors offered different values (first donor won)
    pub conflicts: Vec<String>,
    pub relations: Vec<RelationReport>,
    /// Keys of the deleted donors
    pub deleted: Vec<Value>,
    /// Change-log entries handed to the audit log
    pub log: Vec<LogEntry>,
}

fn is_unique_violation(error: &MaintError) -> bool {
    matches!(
        error,
        MaintError::Database(sqlx::Error::Database(db_err)) if db_err.is_unique_violation()
    )
}

async fn update_fields(
    conn: &mut SqliteConnection,
    record_type: &RecordType,
    pk: &Value,
    updates: &BTreeMap<String, Value>,
) -> Result<()> {
    let assignments: Vec<String> = updates
        .keys()
        .map(|field| format!("{} = ?", quote_ident(field)))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(&record_type.name),
        assignments.join(", "),
        quote_ident(&record_type.pk),
    );

    let mut query = sqlx::query(&sql);
    for value in updates.values() {
        query = value.bind_to(query);
    }
    pk.bind_to(query).execute(&mut *conn).await?;

    Ok(())
}

/// Related rows a repointing statement applies to
#[derive(Debug, Clone, Copy)]
enum Selector<'a> {
    /// Every row whose pointer holds one of these values
    PointingAt(&'a [Value]),
    /// A single row by key
    Row(&'a Value),
}

/// Point the selected rows at `target` and return the keys that moved
///
/// For every unique set containing the pointer column, rows whose other
/// columns match a row already pointing at `target` are left where they are.
async fn move_rows(
    conn: &mut SqliteConnection,
    related: &RecordType,
    column: &str,
    target: &Value,
    selector: Selector<'_>,
) -> Result<Vec<Value>> {
    let table = quote_ident(&related.name);
    let pointer = quote_ident(column);
    let pk = quote_ident(&related.pk);

    let mut params = vec![target.clone()];
    let mut conditions = Vec::new();
    match selector {
        Selector::PointingAt(sources) => {
            conditions.push(format!("{} IN ({})", pointer, placeholders(sources.len())));
            params.extend_from_slice(sources);
        }
        Selector::Row(key) => {
            conditions.push(format!("{} = ?", pk));
            params.push(key.clone());
        }
    }

    for set in related.unique_sets_with(column) {
        let others: Vec<String> = set
            .iter()
            .filter(|c| c.as_str() != column)
            .map(|c| format!("s.{col} = {table}.{col}", col = quote_ident(c), table = table))
            .collect();
        if others.is_empty() {
            continue;
        }
        conditions.push(format!(
            "NOT EXISTS (SELECT 1 FROM {table} AS s WHERE s.{pointer} = ? AND {others})",
            table = table,
            pointer = pointer,
            others = others.join(" AND "),
        ));
        params.push(target.clone());
    }

    let sql = format!(
        "UPDATE {table} SET {pointer} = ? WHERE {conditions} RETURNING {pk}",
        table = table,
        pointer = pointer,
        conditions = conditions.join(" AND "),
        pk = pk,
    );
    let rows = bind_values(sqlx::query(&sql), &params)
        .fetch_all(&mut *conn)
        .await?;

    let mut moved = Vec::with_capacity(rows.len());
    for row in &rows {
        moved.push(Value::from_row(row, 0)?);
    }
    Ok(moved)
}

/// Move the rows pointing at `sources` onto `target`
///
/// One statement per chunk of donor values, all inside a savepoint. When
/// the donors' rows collide with each other, the savepoint is dropped and
/// `candidates` are moved one at a time in key order instead.
async fn repoint(
    conn: &mut SqliteConnection,
    related: &RecordType,
    column: &str,
    target: &Value,
    sources: &[Value],
    candidates: &[Value],
) -> Result<HashSet<Value>> {
    let mut savepoint = conn.begin().await?;
    let mut moved = HashSet::with_capacity(candidates.len());
    let mut collided = false;
    for chunk in sources.chunks(KEY_CHUNK) {
        match move_rows(&mut savepoint, related, column, target, Selector::PointingAt(chunk)).await {
            Ok(keys) => moved.extend(keys),
            Err(e) if is_unique_violation(&e) => {
                collided = true;
                break;
            }
            Err(e) => return Err(e),
        }
    }
    if !collided {
        savepoint.commit().await?;
        return Ok(moved);
    }

    savepoint.rollback().await?;
    debug!(
        table = %related.name,
        column = %column,
        "Bulk repoint hit a unique constraint, repointing row by row"
    );

    moved.clear();
    for key in candidates {
        let mut savepoint = conn.begin().await?;
        match move_rows(&mut savepoint, related, column, target, Selector::Row(key)).await {
            Ok(keys) => {
                savepoint.commit().await?;
                moved.extend(keys);
            }
            Err(e) if is_unique_violation(&e) => {
                savepoint.rollback().await?;
            }
            Err(e) => return Err(e),
        }
        if !moved.contains(key) {
            warn!(table = %related.name, pk = %key, "Skipping row that already exists on the survivor");
        }
    }
    Ok(moved)
}

/// Reassign the rows of one reverse relation from the donors to the survivor
async fn reassign(
    conn: &mut SqliteConnection,
    schema: &Schema,
    relation: &Relation,
    subject: &RecordType,
    survivor: &Record,
    donors: &[Record],
    log: &mut Vec<LogEntry>,
) -> Result<Option<RelationReport>> {
    let (table, column) = relation_target(&subject.name, relation)?;
    let related = schema.record_type(table)?;

    let referenced_column = related.referenced_column(column).unwrap_or(subject.pk.as_str());

    let sources: Vec<Value> = donors
        .iter()
        .map(|d| referenced_value(subject, d, referenced_column))
        .filter(|v| !v.is_null())
        .collect();
    if sources.is_empty() {
        return Ok(None);
    }

    let candidates = keys_where_in(conn, table, &related.pk, column, &sources).await?;
    if candidates.is_empty() {
        return Ok(None);
    }

    let target = referenced_value(subject, survivor, referenced_column);
    let moved = if target.is_null() {
        warn!(table = %table, column = %column, "Survivor has no value to point at, leaving rows on donors");
        HashSet::new()
    } else {
        repoint(conn, related, column, &target, &sources, &candidates).await?
    };

    let outcomes: Vec<RepointOutcome> = candidates
        .into_iter()
        .map(|key| {
            if moved.contains(&key) {
                RepointOutcome::Repointed(key)
            } else {
                RepointOutcome::Skipped(key)
            }
        })
        .collect();

    let survivor_ref = survivor.to_ref();
    for outcome in &outcomes {
        if let RepointOutcome::Repointed(key) = outcome {
            let related_ref = RecordRef::new(table, key.clone());
            log.push(LogEntry::AdditionOfRelated {
                record: survivor_ref.clone(),
                related: related_ref.clone(),
            });
            log.push(LogEntry::Change {
                record: related_ref,
                fields: vec![column.to_string()],
                related: None,
            });
        }
    }

    let mut report = RelationReport {
        relation: relation.clone(),
        outcomes,
        deleted: Vec::new(),
    };

    // Leftovers of a blocking relation would keep the donors alive
    if relation.on_delete.blocks_deletion() {
        let left: Vec<Value> = report.skipped().into_iter().cloned().collect();
        if !left.is_empty() {
            match find_protected(conn, schema, table, &left).await? {
                None => {
                    for key in &left {
                        log.push(LogEntry::Deletion {
                            record: RecordRef::new(table, key.clone()),
                        });
                    }
                    delete_keys(conn, table, &related.pk, &left).await?;
                    report.deleted = left;
                }
                Some(protected) => {
                    debug!(table = %table, "Leftover rows are protected: {}", protected);
                }
            }
        }
    }

    debug!(
        table = %table,
        column = %column,
        repointed = report.repointed().len(),
        skipped = report.skipped().len(),
        deleted = report.deleted.len(),
        "Reassigned relation"
    );
    Ok(Some(report))
}

/// Merge `donors` into `survivor`
///
/// Donors equal to the survivor and repeated donors are ignored; no donors
/// means nothing to do. Records are re-read inside the transaction, so
/// `Record::key` handles are enough. Fails with `MaintError::Protected`,
/// without changing anything, when a donor is still referenced through a
/// protected relation after reassignment.
pub async fn merge(
    pool: &SqlitePool,
    audit: &dyn AuditLog,
    actor: &Actor,
    survivor: &Record,
    donors: &[Record],
    options: MergeOptions,
) -> Result<MergeResult> {
    let mut tx = pool.begin().await?;
    let schema = Schema::load(&mut tx).await?;
    let record_type = schema.record_type(&survivor.table)?;

    let mut donor_keys: Vec<Value> = Vec::new();
    for donor in donors {
        if donor.table != survivor.table {
            return Err(MaintError::InvalidInput(format!(
                "Cannot merge {} into {}: different tables",
                donor.to_ref(),
                survivor.to_ref()
            )));
        }
        if donor.pk != survivor.pk && !donor_keys.contains(&donor.pk) {
            donor_keys.push(donor.pk.clone());
        }
    }

    let survivor_now = fetch_record(&mut tx, record_type, &survivor.pk)
        .await?
        .ok_or_else(|| MaintError::NotFound(format!("Survivor {}", survivor.to_ref())))?;

    let mut donor_records = Vec::with_capacity(donor_keys.len());
    for pk in &donor_keys {
        match fetch_record(&mut tx, record_type, pk).await? {
            Some(record) => donor_records.push(record),
            None => warn!(table = %record_type.name, pk = %pk, "Donor no longer exists, ignoring it"),
        }
    }
    let donor_keys: Vec<Value> = donor_records.iter().map(|d| d.pk.clone()).collect();

    if donor_records.is_empty() {
        tx.commit().await?;
        return Ok(MergeResult {
            survivor: survivor_now,
            field_updates: BTreeMap::new(),
            conflicts: Vec::new(),
            relations: Vec::new(),
            deleted: Vec::new(),
            log: Vec::new(),
        });
    }

    let mut log: Vec<LogEntry> = Vec::new();
    let survivor_ref = survivor_now.to_ref();

    // Step 1: survivor fields, written once the donors are gone
    let mut conflicts = Vec::new();
    let field_updates = match (options.expand_survivor, options.field_updates) {
        (false, _) => BTreeMap::new(),
        (true, Some(updates)) => {
            for field in updates.keys() {
                record_type.scalar_field(field)?;
            }
            updates
        }
        (true, None) => {
            let plan = plan_field_updates(record_type, &survivor_now, &donor_records);
            conflicts = plan.conflicting_fields();
            for field in &conflicts {
                warn!(
                    record = %survivor_ref,
                    field = %field,
                    candidates = plan.candidates(field).len(),
                    "Donors disagree on field value, keeping the first"
                );
            }
            plan.first_wins()
        }
    };

    // Step 2: reverse relations
    let mut relations = Vec::new();
    for relation in schema.relations_of(&record_type.name, false, true)? {
        if let Some(report) = reassign(
            &mut tx,
            &schema,
            &relation,
            record_type,
            &survivor_now,
            &donor_records,
            &mut log,
        )
        .await?
        {
            relations.push(report);
        }
    }

    // Step 3: anything still holding on to a donor aborts the merge
    if let Some(protected) = find_protected(&mut tx, &schema, &record_type.name, &donor_keys).await? {
        warn!(record = %survivor_ref, "Merge aborted: {}", protected);
        tx.rollback().await?;
        return Err(protected.into());
    }

    // Step 4: donors
    for pk in &donor_keys {
        log.push(LogEntry::Deletion {
            record: RecordRef::new(&record_type.name, pk.clone()),
        });
    }
    delete_keys(&mut tx, &record_type.name, &record_type.pk, &donor_keys).await?;

    // Survivor fields last: a unique value taken over from a donor is free now
    if !field_updates.is_empty() {
        update_fields(&mut tx, record_type, &survivor_now.pk, &field_updates).await?;
        log.push(LogEntry::Change {
            record: survivor_ref.clone(),
            fields: field_updates.keys().cloned().collect(),
            related: None,
        });
    }

    for entry in &log {
        audit.record(&mut tx, actor, entry).await?;
    }

    let survivor_after = fetch_record(&mut tx, record_type, &survivor_now.pk)
        .await?
        .ok_or_else(|| MaintError::NotFound(format!("Survivor {}", survivor_ref)))?;

    tx.commit().await?;

    info!(
        record = %survivor_ref,
        donors = donor_keys.len(),
        fields = field_updates.len(),
        relations = relations.len(),
        "Merged records"
    );

    Ok(MergeResult {
        survivor: survivor_after,
        field_updates,
        conflicts,
        relations,
        deleted: donor_keys,
        log,
    })
}
