//! Versioned schema for the encrypted secure store.

use rusqlite::Connection;

use crate::error::CryptoError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "secure_kv",
    sql: "CREATE TABLE IF NOT EXISTS secure_kv (
              key        TEXT PRIMARY KEY,
              value      BLOB NOT NULL,
              updated_at INTEGER NOT NULL
          );",
}];

fn applied_version(conn: &Connection) -> Result<i64, CryptoError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _secure_store_migrations (
             version    INTEGER PRIMARY KEY,
             name       TEXT NOT NULL,
             applied_at TEXT NOT NULL DEFAULT (datetime('now'))
         );",
    )?;
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _secure_store_migrations",
        [],
        |row| row.get(0),
    )?)
}

/// Apply every migration newer than the recorded version, each in its own
/// transaction.
pub fn run_store_migrations(conn: &Connection) -> Result<(), CryptoError> {
    let applied = applied_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO _secure_store_migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )?;
        tx.commit()?;
        tracing::debug!(version = migration.version, name = migration.name, "secure store migrated");
    }
    Ok(())
}
