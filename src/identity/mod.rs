//! Identity provider seam. Issues authenticated sessions.
//!
//! The orchestrator only sees this trait; the wire protocol of a hosted
//! provider lives behind an implementation of it.

pub mod accounts;
mod local;

pub use accounts::{AccountStore, MemoryAccounts, StoredAccount};
pub use local::LocalIdentityProvider;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub is_anonymous: bool,
}

/// Raw result of a federated one-tap flow.
#[derive(Debug, Clone, Default)]
pub struct FederatedCredential {
    pub id_token: Option<String>,
}

impl FederatedCredential {
    pub fn new(id_token: impl Into<String>) -> Self {
        Self {
            id_token: Some(id_token.into()),
        }
    }
}

/// Backend-agnostic identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authenticate with email and password.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, AuthError>;

    /// Create an email/password account and sign into it.
    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, AuthError>;

    /// Exchange a federated identity token for an application session.
    async fn exchange_federated_token(&self, token: &str) -> Result<Session, AuthError>;

    /// Start an anonymous guest session.
    async fn sign_in_anonymously(&self) -> Result<Session, AuthError>;

    /// The session currently held, if any.
    async fn current_session(&self) -> Option<Session>;

    /// Drop the current session.
    async fn sign_out(&self);
}
