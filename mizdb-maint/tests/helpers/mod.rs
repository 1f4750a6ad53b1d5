//! Shared fixture: a small music archive in an in-memory database
//!
//! - `musician` with empty/default-valued fields, a SET NULL link to `person`
//! - `alias` (CASCADE, unique per musician)
//! - `genre` linked through the `musician_genre` junction
//! - `influence`, a self-referential junction on `musician`
//! - `recording` (RESTRICT, unique title per musician), itself protected by
//!   `release_track` (RESTRICT)

#![allow(dead_code)]

use mizdb_common::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    "CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    r#"CREATE TABLE musician (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        origin TEXT,
        status TEXT NOT NULL DEFAULT 'unknown',
        active BOOLEAN NOT NULL DEFAULT 0,
        person_id INTEGER REFERENCES person(id) ON DELETE SET NULL,
        _name_normalized TEXT
    )"#,
    r#"CREATE TABLE alias (
        id INTEGER PRIMARY KEY,
        musician_id INTEGER NOT NULL REFERENCES musician(id) ON DELETE CASCADE,
        alias TEXT NOT NULL,
        UNIQUE (musician_id, alias)
    )"#,
    "CREATE TABLE genre (id INTEGER PRIMARY KEY, genre TEXT NOT NULL UNIQUE)",
    r#"CREATE TABLE musician_genre (
        id INTEGER PRIMARY KEY,
        musician_id INTEGER NOT NULL REFERENCES musician(id) ON DELETE CASCADE,
        genre_id INTEGER NOT NULL REFERENCES genre(id) ON DELETE CASCADE,
        UNIQUE (musician_id, genre_id)
    )"#,
    r#"CREATE TABLE influence (
        id INTEGER PRIMARY KEY,
        from_id INTEGER NOT NULL REFERENCES musician(id) ON DELETE CASCADE,
        to_id INTEGER NOT NULL REFERENCES musician(id) ON DELETE CASCADE,
        UNIQUE (from_id, to_id)
    )"#,
    r#"CREATE TABLE recording (
        id INTEGER PRIMARY KEY,
        musician_id INTEGER NOT NULL REFERENCES musician(id) ON DELETE RESTRICT,
        title TEXT NOT NULL,
        UNIQUE (musician_id, title)
    )"#,
    r#"CREATE TABLE release_track (
        id INTEGER PRIMARY KEY,
        recording_id INTEGER NOT NULL REFERENCES recording(id) ON DELETE RESTRICT,
        position INTEGER
    )"#,
];

/// Tables of the fixture, for snapshots
pub const TABLES: &[&str] = &[
    "person",
    "musician",
    "alias",
    "genre",
    "musician_genre",
    "influence",
    "recording",
    "release_track",
    "change_log",
];

/// Create the archive schema in a fresh in-memory database
///
/// Every connection to `sqlite::memory:` is a database of its own, so the
/// pool is limited to one connection that is never recycled.
pub async fn setup_archive() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();

    create_archive_schema(&pool).await;
    mizdb_common::db::create_change_log_table(&pool).await.unwrap();

    pool
}

/// Create the archive tables (without `change_log`) in an existing database
pub async fn create_archive_schema(pool: &SqlitePool) {
    for ddl in SCHEMA {
        sqlx::query(ddl).execute(pool).await.unwrap();
    }
}

/// Run statements against the fixture
pub async fn exec(pool: &SqlitePool, statements: &[&str]) {
    for sql in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .unwrap_or_else(|e| panic!("{}: {}", sql, e));
    }
}

pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

pub async fn text(pool: &SqlitePool, sql: &str) -> Option<String> {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

/// Every row of every fixture table, for before/after comparisons
pub async fn snapshot(pool: &SqlitePool) -> Vec<(String, Vec<Vec<Value>>)> {
    let mut tables = Vec::new();
    for table in TABLES {
        let rows = sqlx::query(&format!("SELECT * FROM {} ORDER BY rowid", table))
            .fetch_all(pool)
            .await
            .unwrap();
        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            let width = sqlx::Row::len(row);
            decoded.push((0..width).map(|i| Value::from_row(row, i).unwrap()).collect());
        }
        tables.push((table.to_string(), decoded));
    }
    tables
}

/// Two musicians: 1 "Jaki Liebezeit" (sparse) and 2 "Jaki Liebezeit" (filled in)
pub async fn seed_musicians(pool: &SqlitePool) {
    exec(
        pool,
        &[
            "INSERT INTO musician (id, name, description, origin) VALUES (1, 'Jaki Liebezeit', '', NULL)",
            "INSERT INTO musician (id, name, description, origin, status) \
             VALUES (2, 'Jaki Liebezeit', 'Drummer of Can', 'Dresden', 'unknown')",
        ],
    )
    .await;
}
