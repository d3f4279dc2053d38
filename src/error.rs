//! Error types for the onboarding core.

use crate::onboarding::state::OnboardingPhase;

/// Top-level error type for the binary and configuration surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Preference error: {0}")]
    Preference(#[from] PreferenceError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Identity provider errors.
///
/// The display text of provider-originated variants is the provider's own
/// message, so it can be shown to the user unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Credentials were rejected (wrong password, expired token, ...).
    #[error("{0}")]
    Rejected(String),

    /// The provider could not be reached.
    #[error("{0}")]
    Network(String),

    /// Any other provider-side failure.
    #[error("{0}")]
    Provider(String),

    /// The federated one-tap result carried no identity token.
    #[error("No identity token was returned by the provider")]
    MissingToken,

    #[error("An account already exists for {email}")]
    AccountExists { email: String },
}

/// Record store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Local preference persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("Failed to read preference {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Failed to write preference {key}: {reason}")]
    Write { key: String, reason: String },
}

/// Errors surfaced by the onboarding orchestrator.
///
/// None of these are fatal: the orchestrator has already recovered its phase
/// by the time the caller sees one.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Preference(#[from] PreferenceError),

    #[error("Another onboarding request is already in progress")]
    Busy,

    #[error("The onboarding session ended before the request completed")]
    Stale,

    #[error("Username must not be blank")]
    BlankUsername,

    #[error("No account found for {username}")]
    UnknownUser { username: String },

    #[error("Oops! The username already exists.")]
    UsernameTaken { username: String },

    #[error("Age, height and weight are required")]
    SurveyIncomplete,

    #[error("No signed-in user to save the survey for")]
    NotAuthenticated,

    #[error("Cannot move from {from} to {to}")]
    InvalidTransition {
        from: OnboardingPhase,
        to: OnboardingPhase,
    },
}

impl OnboardingError {
    /// Text for the transient notification shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(e) => e.to_string(),
            Self::Store(e) => format!("Oops! Unable to reach your account at the moment. {e}"),
            Self::Preference(e) => format!("Oops! Unable to save your settings. {e}"),
            other => other.to_string(),
        }
    }
}

/// Result type alias for the binary surface.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_message_is_shown_unchanged() {
        let err = OnboardingError::from(AuthError::Network("The network is unreachable".into()));
        assert_eq!(err.user_message(), "The network is unreachable");
    }

    #[test]
    fn taken_username_message() {
        let err = OnboardingError::UsernameTaken {
            username: "manas".into(),
        };
        assert_eq!(err.user_message(), "Oops! The username already exists.");
    }

    #[test]
    fn store_failures_are_prefixed() {
        let err = OnboardingError::from(StoreError::Query("timeout".into()));
        assert!(err.user_message().starts_with("Oops!"));
        assert!(err.user_message().ends_with("Query failed: timeout"));
    }
}
