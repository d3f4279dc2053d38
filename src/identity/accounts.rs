//! Email/password account storage for the local identity provider.
//!
//! Passwords are kept only as argon2 PHC strings.

use std::collections::HashMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::error::{AuthError, StoreError};

/// One email/password account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAccount {
    pub uid: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
}

/// Persistence for accounts, keyed by email.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, email: &str) -> Result<Option<StoredAccount>, StoreError>;

    /// Insert `account`. Returns `false` if the email is already taken.
    async fn insert_account(&self, account: StoredAccount) -> Result<bool, StoreError>;
}

/// Accounts that live as long as the process.
#[derive(Default)]
pub struct MemoryAccounts {
    accounts: RwLock<HashMap<String, StoredAccount>>,
}

#[async_trait]
impl AccountStore for MemoryAccounts {
    async fn find_account(&self, email: &str) -> Result<Option<StoredAccount>, StoreError> {
        Ok(self.accounts.read().await.get(email).cloned())
    }

    async fn insert_account(&self, account: StoredAccount) -> Result<bool, StoreError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.email) {
            return Ok(false);
        }
        accounts.insert(account.email.clone(), account);
        Ok(true)
    }
}

pub(crate) fn hash_password(password: &SecretString) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Provider(format!("Failed to hash password: {e}")))
}

pub(crate) fn verify_password(password: &SecretString, stored: &str) -> bool {
    PasswordHash::new(stored).is_ok_and(|hash| {
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &hash)
            .is_ok()
    })
}
