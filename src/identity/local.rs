//! In-process identity provider.
//!
//! Email/password accounts go through an `AccountStore` (in memory by
//! default, libSQL in the binary). Federated tokens are pre-registered in
//! memory. Used by the binary and tests in place of a hosted provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::accounts::{self, AccountStore, MemoryAccounts, StoredAccount};
use super::{IdentityProvider, Session};
use crate::error::AuthError;

struct FederatedIdentity {
    uid: String,
    email: String,
    display_name: String,
}

/// In-process identity provider.
pub struct LocalIdentityProvider {
    accounts: Arc<dyn AccountStore>,
    federated: RwLock<HashMap<String, FederatedIdentity>>,
    current: RwLock<Option<Session>>,
}

impl Default for LocalIdentityProvider {
    fn default() -> Self {
        Self::with_accounts(Arc::new(MemoryAccounts::default()))
    }
}

impl LocalIdentityProvider {
    /// Provider whose accounts vanish with the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose accounts live in `accounts`.
    pub fn with_accounts(accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            accounts,
            federated: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
        }
    }

    /// Make `token` exchangeable for an identity with this email and display
    /// name. Repeated registrations of the same email keep one uid.
    pub async fn register_federated_token(
        &self,
        token: &str,
        email: &str,
        display_name: &str,
    ) -> String {
        let mut federated = self.federated.write().await;
        let uid = federated
            .values()
            .find(|identity| identity.email == email)
            .map(|identity| identity.uid.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        federated.insert(
            token.to_string(),
            FederatedIdentity {
                uid: uid.clone(),
                email: email.to_string(),
                display_name: display_name.to_string(),
            },
        );
        uid
    }

    async fn start(&self, session: Session) -> Session {
        *self.current.write().await = Some(session.clone());
        session
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, AuthError> {
        let account = self
            .accounts
            .find_account(email)
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?
            .ok_or_else(|| {
                AuthError::Rejected(
                    "There is no user record corresponding to this identifier.".to_string(),
                )
            })?;
        if !accounts::verify_password(password, &account.password_hash) {
            return Err(AuthError::Rejected(
                "The password is invalid or the user does not have a password.".to_string(),
            ));
        }
        let session = Session {
            uid: account.uid,
            email: Some(account.email),
            display_name: account.display_name,
            is_anonymous: false,
        };
        debug!(uid = %session.uid, "Password sign-in accepted");
        Ok(self.start(session).await)
    }

    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, AuthError> {
        if password.expose_secret().len() < 6 {
            return Err(AuthError::Rejected(
                "The given password is invalid. Password should be at least 6 characters"
                    .to_string(),
            ));
        }
        let account = StoredAccount {
            uid: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: accounts::hash_password(password)?,
            display_name: None,
        };
        let session = Session {
            uid: account.uid.clone(),
            email: Some(email.to_string()),
            display_name: None,
            is_anonymous: false,
        };
        let inserted = self
            .accounts
            .insert_account(account)
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;
        if !inserted {
            return Err(AuthError::AccountExists {
                email: email.to_string(),
            });
        }
        info!(uid = %session.uid, "Account created");
        Ok(self.start(session).await)
    }

    async fn exchange_federated_token(&self, token: &str) -> Result<Session, AuthError> {
        let session = {
            let federated = self.federated.read().await;
            let identity = federated.get(token).ok_or_else(|| {
                AuthError::Rejected(
                    "The supplied auth credential is malformed or has expired.".to_string(),
                )
            })?;
            Session {
                uid: identity.uid.clone(),
                email: Some(identity.email.clone()),
                display_name: Some(identity.display_name.clone()),
                is_anonymous: false,
            }
        };
        debug!(uid = %session.uid, "Federated token exchanged");
        Ok(self.start(session).await)
    }

    async fn sign_in_anonymously(&self) -> Result<Session, AuthError> {
        let session = Session {
            uid: Uuid::new_v4().to_string(),
            email: None,
            display_name: None,
            is_anonymous: true,
        };
        debug!(uid = %session.uid, "Anonymous session started");
        Ok(self.start(session).await)
    }

    async fn current_session(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    async fn sign_out(&self) {
        *self.current.write().await = None;
    }
}
