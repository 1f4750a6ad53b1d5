//! Relation catalog, field classification and protection checks against the
//! archive fixture

mod helpers;

use helpers::{exec, setup_archive};
use mizdb_common::Value;
use mizdb_maint::records::fetch_record;
use mizdb_maint::{
    find_protected, relation_target, updateable_fields, Cardinality, FieldKind, OnDelete,
    RecordRef, Schema,
};

#[tokio::test]
async fn test_schema_snapshot() {
    let pool = setup_archive().await;
    let mut conn = pool.acquire().await.unwrap();
    let schema = Schema::load(&mut conn).await.unwrap();

    let musician = schema.record_type("musician").unwrap();
    assert_eq!(musician.pk, "id");
    assert_eq!(musician.field("active").unwrap().kind, FieldKind::Boolean);
    assert_eq!(musician.field("status").unwrap().default, Some(Value::Text("unknown".into())));
    assert!(musician.is_relation_field("person_id"));

    assert!(schema.is_junction("musician_genre"));
    assert!(schema.is_junction("influence"));
    assert!(!schema.is_junction("alias"));
    assert!(!schema.is_junction("recording"));
}

#[tokio::test]
async fn test_reverse_relations_of_musician() {
    let pool = setup_archive().await;
    let mut conn = pool.acquire().await.unwrap();
    let schema = Schema::load(&mut conn).await.unwrap();

    let relations = schema.relations_of("musician", false, true).unwrap();
    let mut summary: Vec<(&str, &str, Cardinality, OnDelete)> = relations
        .iter()
        .map(|r| (r.related_table.as_str(), r.related_field.as_str(), r.cardinality, r.on_delete))
        .collect();
    // Column order within one table follows SQLite's foreign key numbering
    summary.sort_by_key(|(table, field, _, _)| (*table, *field));

    assert_eq!(
        summary,
        vec![
            ("alias", "musician_id", Cardinality::OneToMany, OnDelete::Cascade),
            ("influence", "from_id", Cardinality::ManyToMany, OnDelete::Cascade),
            ("influence", "to_id", Cardinality::ManyToMany, OnDelete::Cascade),
            ("musician_genre", "musician_id", Cardinality::ManyToMany, OnDelete::Cascade),
            ("recording", "musician_id", Cardinality::OneToMany, OnDelete::Protect),
        ]
    );
}

#[tokio::test]
async fn test_forward_relations_and_targets() {
    let pool = setup_archive().await;
    let mut conn = pool.acquire().await.unwrap();
    let schema = Schema::load(&mut conn).await.unwrap();

    let forward = schema.relations_of("musician", true, false).unwrap();
    let to_person = forward
        .iter()
        .find(|r| r.cardinality == Cardinality::ManyToOne)
        .unwrap();
    assert_eq!(to_person.points_to, "person");
    assert_eq!(to_person.on_delete, OnDelete::SetNull);

    let genre_relations = schema.relations_of("genre", false, false).unwrap();
    assert_eq!(genre_relations.len(), 1);
    let relation = &genre_relations[0];
    assert_eq!(relation_target("genre", relation).unwrap(), ("musician_genre", "genre_id"));
    assert_eq!(relation_target("musician", relation).unwrap(), ("musician_genre", "musician_id"));
}

#[tokio::test]
async fn test_updateable_fields_of_stored_record() {
    let pool = setup_archive().await;
    exec(
        &pool,
        &["INSERT INTO musician (id, name, origin, status, active) VALUES (1, 'Damo Suzuki', 'Kobe', 'unknown', 0)"],
    )
    .await;
    let mut conn = pool.acquire().await.unwrap();
    let schema = Schema::load(&mut conn).await.unwrap();
    let musician = schema.record_type("musician").unwrap();

    let record = fetch_record(&mut conn, musician, &Value::Integer(1)).await.unwrap().unwrap();
    let fields = updateable_fields(musician, &record);

    assert_eq!(fields, vec!["description", "status"]);
    assert!(!fields.contains(&"id".to_string()));
    assert!(!fields.contains(&"active".to_string()));
    assert!(!fields.contains(&"person_id".to_string()));
    assert!(!fields.contains(&"_name_normalized".to_string()));
}

#[tokio::test]
async fn test_protection_check_reports_blockers() {
    let pool = setup_archive().await;
    exec(
        &pool,
        &[
            "INSERT INTO musician (id, name) VALUES (1, 'Can'), (2, 'Neu!'), (3, 'Faust')",
            "INSERT INTO alias (musician_id, alias) VALUES (1, 'The Can')",
            "INSERT INTO recording (id, musician_id, title) VALUES (10, 2, 'Neu! 75')",
            "INSERT INTO recording (id, musician_id, title) VALUES (11, 2, 'Neu! 2')",
            "INSERT INTO recording (id, musician_id, title) VALUES (30, 3, 'So Far')",
            "INSERT INTO release_track (id, recording_id) VALUES (1, 30)",
        ],
    )
    .await;
    let mut conn = pool.acquire().await.unwrap();
    let schema = Schema::load(&mut conn).await.unwrap();

    // Cascading references do not protect
    let none = find_protected(&mut conn, &schema, "musician", &[Value::Integer(1)]).await.unwrap();
    assert!(none.is_none());

    let error = find_protected(
        &mut conn,
        &schema,
        "musician",
        &[Value::Integer(1), Value::Integer(2), Value::Integer(3)],
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(error.protected.len(), 2);
    assert_eq!(error.protected[0].record, RecordRef::new("musician", Value::Integer(2)));
    assert_eq!(
        error.protected[0].referenced_by,
        vec![
            RecordRef::new("recording", Value::Integer(10)),
            RecordRef::new("recording", Value::Integer(11)),
        ]
    );
    assert_eq!(error.protected[1].record, RecordRef::new("musician", Value::Integer(3)));

    // Recording 30 is protected by its track in turn
    let error = find_protected(&mut conn, &schema, "recording", &[Value::Integer(30)])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        error.blockers().cloned().collect::<Vec<_>>(),
        vec![RecordRef::new("release_track", Value::Integer(1))]
    );
}
