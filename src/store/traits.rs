//! Persistence seams consumed by the onboarding orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PreferenceError, StoreError};

/// A user document's fields, keyed by field name.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Read-only projection of a stored user document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: String,
    pub username: String,
    pub email: String,
    pub has_completed_survey: bool,
}

impl UserRecord {
    /// Project a raw document. Missing string fields become empty.
    pub fn from_document(uid: &str, document: &Fields) -> Self {
        let text = |key: &str| {
            document
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            uid: uid.to_string(),
            username: text(field_keys::USERNAME),
            email: text(field_keys::EMAIL),
            has_completed_survey: document
                .get(field_keys::HAS_COMPLETED_SURVEY)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }
    }
}

/// Document field names shared by the store and the orchestrator.
pub mod field_keys {
    pub const USERNAME: &str = "username";
    pub const EMAIL: &str = "email";
    pub const HAS_COMPLETED_SURVEY: &str = "has_completed_survey";
}

/// Document store holding one record per registered user.
#[async_trait]
pub trait UserRecordStore: Send + Sync {
    /// Every user record. No filtering is pushed down to the store.
    async fn fetch_all(&self) -> Result<Vec<UserRecord>, StoreError>;

    /// Write `fields` into the document keyed by `uid`. With `merge` the
    /// stored fields not named in the patch are preserved; without it the
    /// document is replaced.
    async fn put(&self, uid: &str, fields: Fields, merge: bool) -> Result<(), StoreError>;

    /// Look a record up by uid (scans `fetch_all`).
    async fn find_by_uid(&self, uid: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .fetch_all()
            .await?
            .into_iter()
            .find(|record| record.uid == uid))
    }
}

/// Local persistence of the "first run" flag across restarts.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Whether onboarding has yet to be finished on this device. `true` when
    /// never set.
    async fn is_first_run(&self) -> Result<bool, PreferenceError>;

    async fn set_first_run(&self, value: bool) -> Result<(), PreferenceError>;
}
