use rusqlite::Connection;
use taxonomy_core::db::migrations::latest_version;
use taxonomy_core::db::{open_db, open_db_in_memory, DbError};
use taxonomy_core::repo::category_repo::SqliteCategoryRepository;
use taxonomy_core::{ClassifiedError, RepoError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in ["namespaces", "taxonomies", "categories", "classifications"] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taxonomy.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "classifications");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failing_migration_reports_its_step_and_keeps_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clash.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE namespaces (legacy TEXT);").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match &err {
        DbError::MigrationFailed { version, name, .. } => {
            assert_eq!(*version, 1);
            assert_eq!(*name, "namespaces_taxonomies");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.code(), "migration_failed");

    let conn = Connection::open(&path).unwrap();
    assert_eq!(schema_version(&conn), 0);
}

#[test]
fn repositories_refuse_unmigrated_connections() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqliteCategoryRepository::try_new(&conn).err().unwrap();
    assert!(matches!(err, RepoError::UninitializedConnection { .. }));
}

#[test]
fn live_paths_are_unique_per_taxonomy_but_tombstones_are_not() {
    let conn = open_db_in_memory().unwrap();
    let insert = "INSERT INTO categories (
            id, tenant_id, taxonomy_id, name, slug, level, path,
            created_by, updated_by, created_at, updated_at, deleted_at
        ) VALUES (?1, 't1', 'tax-1', 'Rock', 'rock', 0, 'rock', 'u', 'u', 1, 1, ?2)";

    conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
    conn.execute(insert, rusqlite::params!["c1", Some(5_i64)]).unwrap();
    conn.execute(insert, rusqlite::params!["c2", None::<i64>]).unwrap();
    assert!(conn
        .execute(insert, rusqlite::params!["c3", None::<i64>])
        .is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table `{table_name}` should exist");
}
