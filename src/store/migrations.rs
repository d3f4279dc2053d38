//! Schema versions for the libSQL backend.
//!
//! Applied versions are recorded in `_migrations`; each pending step runs in
//! its own transaction together with its bookkeeping row.

use libsql::{Connection, params};
use tracing::{debug, info};

use crate::error::StoreError;

struct Step {
    version: i64,
    name: &'static str,
    up: &'static str,
}

/// Ordered schema history. Append only.
const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "user_documents",
        up: "CREATE TABLE IF NOT EXISTS users (
                 uid TEXT PRIMARY KEY,
                 document TEXT NOT NULL DEFAULT '{}',
                 created_at TEXT NOT NULL DEFAULT (datetime('now')),
                 updated_at TEXT NOT NULL DEFAULT (datetime('now'))
             );",
    },
    Step {
        version: 2,
        name: "device_settings",
        up: "CREATE TABLE IF NOT EXISTS settings (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL,
                 updated_at TEXT NOT NULL DEFAULT (datetime('now'))
             );",
    },
    Step {
        version: 3,
        name: "password_accounts",
        up: "CREATE TABLE IF NOT EXISTS accounts (
                 email TEXT PRIMARY KEY,
                 uid TEXT NOT NULL UNIQUE,
                 password_hash TEXT NOT NULL,
                 display_name TEXT,
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );",
    },
];

fn migration_err(context: &str, e: libsql::Error) -> StoreError {
    StoreError::Migration(format!("{context}: {e}"))
}

/// Bring the schema up to the latest version. Safe to call on every open.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
             version INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             applied_at TEXT NOT NULL DEFAULT (datetime('now'))
         )",
        (),
    )
    .await
    .map_err(|e| migration_err("creating _migrations", e))?;

    let applied = schema_version(conn).await?;
    for step in STEPS.iter().filter(|step| step.version > applied) {
        info!(version = step.version, name = step.name, "Applying schema step");
        apply(conn, step).await?;
    }

    debug!(version = schema_version(conn).await?, "Schema up to date");
    Ok(())
}

async fn apply(conn: &Connection, step: &Step) -> Result<(), StoreError> {
    let context = format!("V{} {}", step.version, step.name);
    let tx = conn
        .transaction()
        .await
        .map_err(|e| migration_err(&context, e))?;
    tx.execute_batch(step.up)
        .await
        .map_err(|e| migration_err(&context, e))?;
    tx.execute(
        "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
        params![step.version, step.name],
    )
    .await
    .map_err(|e| migration_err(&context, e))?;
    tx.commit().await.map_err(|e| migration_err(&context, e))
}

/// Highest applied version, 0 for a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| migration_err("reading schema version", e))?;
    let Some(row) = rows
        .next()
        .await
        .map_err(|e| migration_err("reading schema version", e))?
    else {
        return Ok(0);
    };
    row.get::<i64>(0)
        .map_err(|e| migration_err("reading schema version", e))
}
