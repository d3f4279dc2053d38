//! libSQL backend for user records, password accounts and device
//! preferences.
//!
//! Supports local file and in-memory databases. User documents are stored as
//! JSON text keyed by uid.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{PreferenceError, StoreError};
use crate::identity::{AccountStore, StoredAccount};
use crate::store::migrations;
use crate::store::traits::{Fields, PreferenceStore, UserRecord, UserRecordStore};

/// Settings key for the first-run flag.
const FIRST_RUN_KEY: &str = "is_first_run";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Serializes read-modify-write of user documents.
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// The raw stored document for `uid`, if any.
    pub async fn get_document(&self, uid: &str) -> Result<Option<Fields>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT document FROM users WHERE uid = ?1", params![uid])
            .await
            .map_err(|e| StoreError::Query(format!("get_document: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("get_document: {e}")))?;
                parse_document(uid, &raw).map(Some)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_document: {e}"))),
        }
    }

    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, String> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM settings WHERE key = ?1", params![key])
            .await
            .map_err(|e| e.to_string())?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row.get(0).map_err(|e| e.to_string())?;
                serde_json::from_str(&raw).map(Some).map_err(|e| e.to_string())
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<(), String> {
        let now = Utc::now().to_rfc3339();
        let raw = serde_json::to_string(value).map_err(|e| e.to_string())?;
        self.conn()
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?3",
                params![key, raw, now],
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn parse_document(uid: &str, raw: &str) -> Result<Fields, StoreError> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Serialization(format!(
            "document for {uid} is not an object"
        ))),
        Err(e) => Err(StoreError::Serialization(format!(
            "document for {uid}: {e}"
        ))),
    }
}

#[async_trait]
impl UserRecordStore for LibSqlBackend {
    async fn fetch_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT uid, document FROM users ORDER BY created_at, uid", ())
            .await
            .map_err(|e| StoreError::Query(format!("fetch_all: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("fetch_all: {e}")))?
        {
            let uid: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("fetch_all: {e}")))?;
            let raw: String = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("fetch_all: {e}")))?;
            let document = parse_document(&uid, &raw)?;
            records.push(UserRecord::from_document(&uid, &document));
        }
        Ok(records)
    }

    async fn put(&self, uid: &str, fields: Fields, merge: bool) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let document = if merge {
            let mut existing = self.get_document(uid).await?.unwrap_or_default();
            existing.extend(fields);
            existing
        } else {
            fields
        };

        let raw = serde_json::to_string(&document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO users (uid, document, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT (uid) DO UPDATE SET document = ?2, updated_at = ?3",
                params![uid, raw, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("put: {e}")))?;

        debug!(uid, merge, "User document written");
        Ok(())
    }
}

#[async_trait]
impl AccountStore for LibSqlBackend {
    async fn find_account(&self, email: &str) -> Result<Option<StoredAccount>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT uid, email, password_hash, display_name FROM accounts WHERE email = ?1",
                params![email],
            )
            .await
            .map_err(|e| StoreError::Query(format!("find_account: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("find_account: {e}")))?
        else {
            return Ok(None);
        };
        let text = |idx: i32| {
            row.get::<String>(idx)
                .map_err(|e| StoreError::Query(format!("find_account: {e}")))
        };
        let display_name = match row.get_value(3) {
            Ok(libsql::Value::Text(name)) => Some(name),
            _ => None,
        };
        Ok(Some(StoredAccount {
            uid: text(0)?,
            email: text(1)?,
            password_hash: text(2)?,
            display_name,
        }))
    }

    async fn insert_account(&self, account: StoredAccount) -> Result<bool, StoreError> {
        let display_name = account
            .display_name
            .map(libsql::Value::Text)
            .unwrap_or(libsql::Value::Null);
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO accounts (email, uid, password_hash, display_name)
                 VALUES (?1, ?2, ?3, ?4)",
                params![account.email, account.uid.clone(), account.password_hash, display_name],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_account: {e}")))?;
        if inserted > 0 {
            info!(uid = %account.uid, "Account stored");
        }
        Ok(inserted > 0)
    }
}

#[async_trait]
impl PreferenceStore for LibSqlBackend {
    async fn is_first_run(&self) -> Result<bool, PreferenceError> {
        let value = self
            .get_setting(FIRST_RUN_KEY)
            .await
            .map_err(|reason| PreferenceError::Read {
                key: FIRST_RUN_KEY.to_string(),
                reason,
            })?;
        Ok(value.and_then(|v| v.as_bool()).unwrap_or(true))
    }

    async fn set_first_run(&self, value: bool) -> Result<(), PreferenceError> {
        self.set_setting(FIRST_RUN_KEY, &serde_json::Value::Bool(value))
            .await
            .map_err(|reason| PreferenceError::Write {
                key: FIRST_RUN_KEY.to_string(),
                reason,
            })
    }
}
