//! Relation catalog
//!
//! Builds record types and relations from the live SQLite schema. The
//! snapshot is read once per operation (`Schema::load`); every lookup after
//! that is a pure function of the snapshot.
//!
//! **Relation kinds:**
//! - `ManyToOne`: a foreign key declared by the subject table (forward)
//! - `OneToMany`: a foreign key on another table pointing at the subject (reverse)
//! - `ManyToMany`: a junction table with one column pointing at the subject
//!
//! A table is a junction when it declares exactly two single-column foreign
//! keys and a unique constraint (or composite primary key) over exactly those
//! two columns. Extra columns on the junction are allowed.

use crate::{MaintError, Result};
use mizdb_common::db::SchemaIntrospector;
use mizdb_common::Value;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Name used for the primary key of tables without a single-column key
pub const ROWID: &str = "rowid";

/// Value domain of a column, derived from its declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Json,
    Numeric,
}

impl FieldKind {
    /// Classify a declared type by SQLite's affinity rules
    ///
    /// BOOL and JSON declarations get their own kinds: both are stored with
    /// ordinary affinities but have their own notion of "empty".
    pub fn from_declared_type(declared: &str) -> Self {
        let t = declared.to_ascii_uppercase();

        if t.contains("BOOL") {
            FieldKind::Boolean
        } else if t.contains("JSON") {
            FieldKind::Json
        } else if t.contains("INT") {
            FieldKind::Integer
        } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
            FieldKind::Text
        } else if t.contains("BLOB") || t.is_empty() {
            FieldKind::Blob
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
            FieldKind::Real
        } else {
            FieldKind::Numeric
        }
    }
}

/// One column of a record type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub declared_type: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub primary_key: bool,
    /// Static default; `None` when there is no default or it is an expression
    pub default: Option<Value>,
}

/// What happens to referencing rows when the referenced row is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OnDelete {
    Cascade,
    Protect,
    SetNull,
    SetDefault,
    NoAction,
}

impl OnDelete {
    /// Map the action reported by `pragma_foreign_key_list`
    pub fn from_sqlite(action: &str) -> Self {
        match action.to_ascii_uppercase().as_str() {
            "CASCADE" => OnDelete::Cascade,
            "RESTRICT" => OnDelete::Protect,
            "SET NULL" => OnDelete::SetNull,
            "SET DEFAULT" => OnDelete::SetDefault,
            _ => OnDelete::NoAction,
        }
    }

    /// Whether a referencing row prevents deletion of the referenced row
    ///
    /// With foreign keys enforced, SQLite rejects the delete for NO ACTION
    /// just as it does for RESTRICT.
    pub fn blocks_deletion(&self) -> bool {
        matches!(self, OnDelete::Protect | OnDelete::NoAction)
    }
}

/// A single-column foreign key with its referenced column resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub references: String,
    pub references_column: String,
    pub on_delete: OnDelete,
}

/// Schema description of one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordType {
    pub name: String,
    /// Primary key column, or `rowid` for tables with a composite key
    pub pk: String,
    pub fields: Vec<Field>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Column sets covered by UNIQUE constraints or indexes
    pub unique_sets: Vec<Vec<String>>,
}

impl RecordType {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_relation_field(&self, name: &str) -> bool {
        self.foreign_keys.iter().any(|fk| fk.column == name)
    }

    /// Columns that are neither the primary key nor foreign keys
    pub fn scalar_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(move |f| !f.primary_key && f.name != self.pk && !self.is_relation_field(&f.name))
    }

    /// Unique column sets that include `column`
    pub fn unique_sets_with<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Vec<String>> {
        self.unique_sets
            .iter()
            .filter(move |set| set.iter().any(|c| c == column))
    }

    /// Column referenced by the foreign key on `column`
    pub fn referenced_column(&self, column: &str) -> Option<&str> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.column == column)
            .map(|fk| fk.references_column.as_str())
    }

    /// Require `name` to be a scalar (updatable) column
    pub fn scalar_field(&self, name: &str) -> Result<&Field> {
        match self.field(name) {
            None => Err(MaintError::InvalidInput(format!(
                "{} has no field named '{}'",
                self.name, name
            ))),
            Some(f) if f.primary_key || f.name == self.pk => Err(MaintError::InvalidInput(
                format!("'{}' is the primary key of {}", name, self.name),
            )),
            Some(_) if self.is_relation_field(name) => Err(MaintError::InvalidInput(format!(
                "'{}' is a relation field of {}",
                name, self.name
            ))),
            Some(f) => Ok(f),
        }
    }

    fn junction_columns(&self) -> Option<(&ForeignKey, &ForeignKey)> {
        if self.foreign_keys.len() != 2 {
            return None;
        }
        let (a, b) = (&self.foreign_keys[0], &self.foreign_keys[1]);
        let covered = self.unique_sets.iter().any(|set| {
            set.len() == 2 && set.contains(&a.column) && set.contains(&b.column) && a.column != b.column
        });
        covered.then_some((a, b))
    }
}

/// How two record types are connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Cardinality {
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// A relation as seen from one subject table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub cardinality: Cardinality,
    /// Table holding the pointer (the junction for many-to-many)
    pub related_table: String,
    /// Pointer column on `related_table`
    pub related_field: String,
    /// Table `related_field` points at
    pub points_to: String,
    /// Table at the other end of the relation
    pub far_table: String,
    /// Junction column pointing at `far_table` (many-to-many only)
    pub far_field: Option<String>,
    pub on_delete: OnDelete,
}

impl Relation {
    /// Both ends of the relation are the same table
    pub fn is_self_relation(&self) -> bool {
        match self.cardinality {
            Cardinality::ManyToMany => self.far_table == self.points_to,
            Cardinality::ManyToOne | Cardinality::OneToMany => self.related_table == self.points_to,
        }
    }

    /// Reverse relations are the ones whose pointer targets the subject
    pub fn is_reverse(&self) -> bool {
        !matches!(self.cardinality, Cardinality::ManyToOne)
    }
}

/// Table and column that realize `relation`'s pointer back at `subject`
///
/// For many-to-many relations the junction column targeting `subject` is
/// chosen; when both junction columns target `subject` (self-referential),
/// the relation's own `related_field` is the one meant.
pub fn relation_target<'r>(subject: &str, relation: &'r Relation) -> Result<(&'r str, &'r str)> {
    match relation.cardinality {
        Cardinality::ManyToMany => {
            if relation.points_to == subject {
                Ok((&relation.related_table, &relation.related_field))
            } else if relation.far_table == subject {
                let far_field = relation.far_field.as_deref().ok_or_else(|| {
                    MaintError::InvalidInput(format!(
                        "Junction {} has no column towards {}",
                        relation.related_table, subject
                    ))
                })?;
                Ok((&relation.related_table, far_field))
            } else {
                Err(MaintError::InvalidInput(format!(
                    "Relation through {} does not involve {}",
                    relation.related_table, subject
                )))
            }
        }
        Cardinality::ManyToOne | Cardinality::OneToMany => {
            Ok((&relation.related_table, &relation.related_field))
        }
    }
}

/// Snapshot of every record type in the database
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: BTreeMap<String, RecordType>,
}

impl Schema {
    /// Read the schema of every user table
    pub async fn load(conn: &mut SqliteConnection) -> Result<Self> {
        let table_names = SchemaIntrospector::list_tables(conn).await?;

        let mut raw = Vec::with_capacity(table_names.len());
        for name in table_names {
            let columns = SchemaIntrospector::introspect_table(conn, &name).await?;
            let foreign_keys = SchemaIntrospector::foreign_keys(conn, &name).await?;
            let unique = SchemaIntrospector::unique_indexes(conn, &name).await?;
            raw.push((name, columns, foreign_keys, unique));
        }

        // Primary keys first: unresolved foreign keys point at them
        let mut pks: BTreeMap<String, String> = BTreeMap::new();
        for (name, columns, _, _) in &raw {
            let pk_columns: Vec<&str> = columns
                .iter()
                .filter(|c| c.pk > 0)
                .map(|c| c.name.as_str())
                .collect();
            let pk = match pk_columns.as_slice() {
                [single] => single.to_string(),
                _ => ROWID.to_string(),
            };
            pks.insert(name.clone(), pk);
        }

        let mut record_types = Vec::with_capacity(raw.len());
        for (name, columns, raw_fks, unique) in raw {
            let pk = pks.get(&name).cloned().unwrap_or_else(|| ROWID.to_string());

            let fields = columns
                .iter()
                .map(|c| Field {
                    name: c.name.clone(),
                    declared_type: c.type_name.clone(),
                    kind: FieldKind::from_declared_type(&c.type_name),
                    nullable: !c.not_null && c.pk == 0,
                    primary_key: c.pk > 0,
                    default: c.default_value.as_deref().and_then(Value::from_sql_literal),
                })
                .collect();

            let mut foreign_keys = Vec::with_capacity(raw_fks.len());
            for fk in raw_fks {
                let references_column = match (fk.references_column, pks.get(&fk.references)) {
                    (Some(column), _) => column,
                    (None, Some(pk)) => pk.clone(),
                    (None, None) => {
                        warn!(
                            table = %name,
                            column = %fk.column,
                            references = %fk.references,
                            "Skipping foreign key to unknown table"
                        );
                        continue;
                    }
                };
                foreign_keys.push(ForeignKey {
                    table: fk.table,
                    column: fk.column,
                    references: fk.references,
                    references_column,
                    on_delete: OnDelete::from_sqlite(&fk.on_delete),
                });
            }

            record_types.push(RecordType {
                name,
                pk,
                fields,
                foreign_keys,
                unique_sets: unique.into_iter().map(|u| u.columns).collect(),
            });
        }

        let schema = Self::from_record_types(record_types);
        debug!(tables = schema.tables.len(), "Loaded schema snapshot");
        Ok(schema)
    }

    /// Build a snapshot from already known record types
    pub fn from_record_types(record_types: Vec<RecordType>) -> Self {
        Self {
            tables: record_types
                .into_iter()
                .map(|rt| (rt.name.clone(), rt))
                .collect(),
        }
    }

    pub fn record_type(&self, table: &str) -> Result<&RecordType> {
        self.tables
            .get(table)
            .ok_or_else(|| MaintError::NotFound(format!("Table '{}'", table)))
    }

    pub fn record_types(&self) -> impl Iterator<Item = &RecordType> {
        self.tables.values()
    }

    pub fn is_junction(&self, table: &str) -> bool {
        self.tables
            .get(table)
            .map(|rt| rt.junction_columns().is_some())
            .unwrap_or(false)
    }

    /// Every foreign key, on any table, that references `table`
    pub fn foreign_keys_into<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ForeignKey> {
        self.tables
            .values()
            .flat_map(|rt| rt.foreign_keys.iter())
            .filter(move |fk| fk.references == table)
    }

    /// Enumerate the relations of `table`
    ///
    /// Many-to-many relations are always included, once per junction column
    /// pointing at `table`. A junction's plain reverse foreign key onto
    /// `table` is represented only by its many-to-many view.
    pub fn relations_of(
        &self,
        table: &str,
        include_forward: bool,
        include_reverse: bool,
    ) -> Result<Vec<Relation>> {
        let subject = self.record_type(table)?;
        let mut relations: Vec<Relation> = Vec::new();

        if include_forward {
            for fk in &subject.foreign_keys {
                relations.push(Relation {
                    cardinality: Cardinality::ManyToOne,
                    related_table: subject.name.clone(),
                    related_field: fk.column.clone(),
                    points_to: fk.references.clone(),
                    far_table: fk.references.clone(),
                    far_field: None,
                    on_delete: fk.on_delete,
                });
            }
        }

        for rt in self.tables.values() {
            let junction = rt.junction_columns();
            for fk in rt.foreign_keys.iter().filter(|fk| fk.references == table) {
                let relation = match junction {
                    Some((a, b)) => {
                        let other = if fk.column == a.column { b } else { a };
                        Relation {
                            cardinality: Cardinality::ManyToMany,
                            related_table: rt.name.clone(),
                            related_field: fk.column.clone(),
                            points_to: table.to_string(),
                            far_table: other.references.clone(),
                            far_field: Some(other.column.clone()),
                            on_delete: fk.on_delete,
                        }
                    }
                    None if include_reverse => Relation {
                        cardinality: Cardinality::OneToMany,
                        related_table: rt.name.clone(),
                        related_field: fk.column.clone(),
                        points_to: table.to_string(),
                        far_table: rt.name.clone(),
                        far_field: None,
                        on_delete: fk.on_delete,
                    },
                    None => continue,
                };

                // A self-referencing foreign key is one relation, not two views
                let duplicate = relations.iter().any(|r| {
                    r.related_table == relation.related_table && r.related_field == relation.related_field
                });
                if !duplicate {
                    relations.push(relation);
                }
            }
        }

        Ok(relations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, declared: &str) -> Field {
        Field {
            name: name.to_string(),
            declared_type: declared.to_string(),
            kind: FieldKind::from_declared_type(declared),
            nullable: true,
            primary_key: false,
            default: None,
        }
    }

    fn pk_field() -> Field {
        Field {
            primary_key: true,
            nullable: false,
            ..field("id", "INTEGER")
        }
    }

    fn fk(table: &str, column: &str, references: &str, on_delete: OnDelete) -> ForeignKey {
        ForeignKey {
            table: table.to_string(),
            column: column.to_string(),
            references: references.to_string(),
            references_column: "id".to_string(),
            on_delete,
        }
    }

    fn table(name: &str, fields: Vec<Field>, fks: Vec<ForeignKey>, unique: Vec<Vec<&str>>) -> RecordType {
        RecordType {
            name: name.to_string(),
            pk: "id".to_string(),
            fields,
            foreign_keys: fks,
            unique_sets: unique
                .into_iter()
                .map(|set| set.into_iter().map(String::from).collect())
                .collect(),
        }
    }

    /// musician <- alias, musician <-> genre (via musician_genre), musician -> person,
    /// musician <-> musician (via influence)
    fn archive_schema() -> Schema {
        Schema::from_record_types(vec![
            table("person", vec![pk_field(), field("name", "TEXT")], vec![], vec![]),
            table(
                "musician",
                vec![pk_field(), field("name", "TEXT"), field("person_id", "INTEGER"), field("mentor_id", "INTEGER")],
                vec![
                    fk("musician", "person_id", "person", OnDelete::SetNull),
                    fk("musician", "mentor_id", "musician", OnDelete::SetNull),
                ],
                vec![],
            ),
            table(
                "alias",
                vec![pk_field(), field("musician_id", "INTEGER"), field("alias", "TEXT")],
                vec![fk("alias", "musician_id", "musician", OnDelete::Cascade)],
                vec![vec!["musician_id", "alias"]],
            ),
            table("genre", vec![pk_field(), field("genre", "TEXT")], vec![], vec![]),
            table(
                "musician_genre",
                vec![pk_field(), field("musician_id", "INTEGER"), field("genre_id", "INTEGER")],
                vec![
                    fk("musician_genre", "musician_id", "musician", OnDelete::Cascade),
                    fk("musician_genre", "genre_id", "genre", OnDelete::Cascade),
                ],
                vec![vec!["musician_id", "genre_id"]],
            ),
            table(
                "influence",
                vec![pk_field(), field("from_id", "INTEGER"), field("to_id", "INTEGER")],
                vec![
                    fk("influence", "from_id", "musician", OnDelete::Cascade),
                    fk("influence", "to_id", "musician", OnDelete::Cascade),
                ],
                vec![vec!["from_id", "to_id"]],
            ),
        ])
    }

    #[test]
    fn test_field_kind_affinity() {
        assert_eq!(FieldKind::from_declared_type("INTEGER"), FieldKind::Integer);
        assert_eq!(FieldKind::from_declared_type("varchar(200)"), FieldKind::Text);
        assert_eq!(FieldKind::from_declared_type("BOOLEAN"), FieldKind::Boolean);
        assert_eq!(FieldKind::from_declared_type("JSON"), FieldKind::Json);
        assert_eq!(FieldKind::from_declared_type("DOUBLE PRECISION"), FieldKind::Real);
        assert_eq!(FieldKind::from_declared_type(""), FieldKind::Blob);
        assert_eq!(FieldKind::from_declared_type("DATE"), FieldKind::Numeric);
    }

    #[test]
    fn test_on_delete_mapping() {
        assert_eq!(OnDelete::from_sqlite("RESTRICT"), OnDelete::Protect);
        assert_eq!(OnDelete::from_sqlite("SET NULL"), OnDelete::SetNull);
        assert_eq!(OnDelete::from_sqlite("NO ACTION"), OnDelete::NoAction);
        assert!(OnDelete::Protect.blocks_deletion());
        assert!(OnDelete::NoAction.blocks_deletion());
        assert!(!OnDelete::Cascade.blocks_deletion());
    }

    #[test]
    fn test_junction_detection() {
        let schema = archive_schema();
        assert!(schema.is_junction("musician_genre"));
        assert!(schema.is_junction("influence"));
        assert!(!schema.is_junction("alias"));
        assert!(!schema.is_junction("musician"));
    }

    #[test]
    fn test_reverse_relations_suppress_junction_foreign_keys() {
        let schema = archive_schema();
        let relations = schema.relations_of("musician", false, true).unwrap();

        let kinds: Vec<(&str, &str, Cardinality)> = relations
            .iter()
            .map(|r| (r.related_table.as_str(), r.related_field.as_str(), r.cardinality))
            .collect();

        assert!(kinds.contains(&("alias", "musician_id", Cardinality::OneToMany)));
        assert!(kinds.contains(&("musician_genre", "musician_id", Cardinality::ManyToMany)));
        assert!(kinds.contains(&("musician", "mentor_id", Cardinality::OneToMany)));
        // Self-referential junction: one relation per column
        assert!(kinds.contains(&("influence", "from_id", Cardinality::ManyToMany)));
        assert!(kinds.contains(&("influence", "to_id", Cardinality::ManyToMany)));
        // No OneToMany view of a junction
        assert!(!relations
            .iter()
            .any(|r| r.related_table == "musician_genre" && r.cardinality == Cardinality::OneToMany));
        assert_eq!(relations.len(), 5);
    }

    #[test]
    fn test_many_to_many_always_included() {
        let schema = archive_schema();

        let relations = schema.relations_of("genre", false, false).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].cardinality, Cardinality::ManyToMany);
        assert_eq!(relations[0].far_table, "musician");
        assert_eq!(relations[0].far_field.as_deref(), Some("musician_id"));
    }

    #[test]
    fn test_forward_relations() {
        let schema = archive_schema();

        let relations = schema.relations_of("musician", true, false).unwrap();
        let forward: Vec<&Relation> = relations
            .iter()
            .filter(|r| r.cardinality == Cardinality::ManyToOne)
            .collect();
        assert_eq!(forward.len(), 2);
        assert_eq!(forward[0].points_to, "person");

        // The self foreign key appears once even with both directions requested
        let both = schema.relations_of("musician", true, true).unwrap();
        let mentor_views = both.iter().filter(|r| r.related_field == "mentor_id").count();
        assert_eq!(mentor_views, 1);
    }

    #[test]
    fn test_self_relation_detection() {
        let schema = archive_schema();
        let relations = schema.relations_of("musician", false, true).unwrap();

        for relation in &relations {
            let expected = matches!(relation.related_table.as_str(), "influence" | "musician");
            assert_eq!(relation.is_self_relation(), expected, "{:?}", relation);
        }
    }

    #[test]
    fn test_relation_target_picks_side_pointing_at_subject() {
        let schema = archive_schema();
        let from_genre = schema.relations_of("genre", false, false).unwrap();
        let relation = &from_genre[0];

        assert_eq!(relation_target("genre", relation).unwrap(), ("musician_genre", "genre_id"));
        assert_eq!(relation_target("musician", relation).unwrap(), ("musician_genre", "musician_id"));
        assert!(relation_target("person", relation).is_err());
    }

    #[test]
    fn test_scalar_field_validation() {
        let schema = archive_schema();
        let musician = schema.record_type("musician").unwrap();

        assert!(musician.scalar_field("name").is_ok());
        assert!(matches!(musician.scalar_field("id"), Err(MaintError::InvalidInput(_))));
        assert!(matches!(musician.scalar_field("person_id"), Err(MaintError::InvalidInput(_))));
        assert!(matches!(musician.scalar_field("nope"), Err(MaintError::InvalidInput(_))));
        assert!(matches!(schema.record_type("nope"), Err(MaintError::NotFound(_))));
    }
}
