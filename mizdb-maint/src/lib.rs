//! mizdb-maint library - archive maintenance routines
//!
//! Record merging and duplicate detection for any table of the archive
//! database, plus the helpers they share:
//! - relation catalog built from the live SQLite schema
//! - mutable-field classification
//! - dry-run protection checking
//! - change-log recording

pub mod audit;
pub mod catalog;
pub mod conflicts;
pub mod dupes;
pub mod error;
pub mod fields;
pub mod merge;
pub mod protection;
pub mod records;
pub mod replace;
pub mod unused;

pub use audit::{Actor, AuditLog, ChangeLogTable, LogEntry, MemoryAuditLog, RecordRef};
pub use catalog::{relation_target, Cardinality, Field, FieldKind, OnDelete, RecordType, Relation, Schema};
pub use conflicts::{plan_field_updates, FieldUpdatePlan};
pub use dupes::{find_duplicates, Candidates, DupeEntry};
pub use error::{MaintError, Result};
pub use fields::updateable_fields;
pub use merge::{merge, MergeOptions, MergeResult, RelationReport, RepointOutcome};
pub use protection::{find_protected, ProtectedRecord, ProtectionError};
pub use records::Record;
pub use replace::replace;
pub use unused::{find_unused, UnusedRecord, UnusedReport};
