//! Username resolution against the full set of user records.
//!
//! Both checks scan every record the store returns; there is no indexed
//! lookup. Sign-in resolution folds case; the registration uniqueness check
//! does not.

use crate::store::UserRecord;

use super::state::{Destination, RouteDecision};

/// Route a submitted username: an existing account (ignoring case) goes to
/// sign-in, anything else to sign-up.
pub fn resolve(records: &[UserRecord], username: &str) -> RouteDecision {
    if find_by_username(records, username).is_some() {
        RouteDecision::ToSignIn
    } else {
        RouteDecision::ToSignUp
    }
}

/// First record whose username matches ignoring case.
pub fn find_by_username<'a>(records: &'a [UserRecord], username: &str) -> Option<&'a UserRecord> {
    let wanted = username.to_lowercase();
    records
        .iter()
        .find(|record| record.username.to_lowercase() == wanted)
}

/// Registration uniqueness: exact, case-sensitive comparison.
pub fn is_username_available(records: &[UserRecord], username: &str) -> bool {
    !records.iter().any(|record| record.username == username)
}

/// Where an authenticated user goes next.
pub fn post_auth_destination(record: Option<&UserRecord>) -> Destination {
    match record {
        Some(record) if record.has_completed_survey => Destination::Dashboard,
        _ => Destination::Survey,
    }
}

/// Cold-start screen from the persisted first-run flag and whether the
/// identity provider still holds a session.
pub fn start_destination(is_first_run: bool, has_session: bool) -> Destination {
    match (is_first_run, has_session) {
        (false, _) => Destination::Dashboard,
        (true, false) => Destination::Welcome,
        (true, true) => Destination::Survey,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uid: &str, username: &str, completed: bool) -> UserRecord {
        UserRecord {
            uid: uid.to_string(),
            username: username.to_string(),
            email: format!("{uid}@example.com"),
            has_completed_survey: completed,
        }
    }

    #[test]
    fn resolve_ignores_case() {
        let records = vec![record("u1", "manas", false)];
        assert_eq!(resolve(&records, "MANAS"), RouteDecision::ToSignIn);
        assert_eq!(resolve(&records, "Manas"), resolve(&records, "manas"));
        assert_eq!(resolve(&records, "newuser"), RouteDecision::ToSignUp);
    }

    #[test]
    fn resolve_is_exact_not_fuzzy() {
        let records = vec![record("u1", "manas", false)];
        assert_eq!(resolve(&records, "mana"), RouteDecision::ToSignUp);
        assert_eq!(resolve(&records, "manas "), RouteDecision::ToSignUp);
    }

    #[test]
    fn resolve_on_empty_store_goes_to_sign_up() {
        assert_eq!(resolve(&[], "anyone"), RouteDecision::ToSignUp);
    }

    #[test]
    fn uniqueness_is_case_sensitive() {
        let records = vec![record("u1", "manas", false)];
        assert!(!is_username_available(&records, "manas"));
        // Allowed to register, yet would resolve to sign-in.
        assert!(is_username_available(&records, "Manas"));
        assert_eq!(resolve(&records, "Manas"), RouteDecision::ToSignIn);
    }

    #[test]
    fn completed_survey_goes_to_dashboard() {
        let done = record("u1", "manas", true);
        let fresh = record("u2", "priya", false);
        assert_eq!(post_auth_destination(Some(&done)), Destination::Dashboard);
        assert_eq!(post_auth_destination(Some(&fresh)), Destination::Survey);
        assert_eq!(post_auth_destination(None), Destination::Survey);
    }

    #[test]
    fn start_destination_table() {
        assert_eq!(start_destination(true, false), Destination::Welcome);
        assert_eq!(start_destination(true, true), Destination::Survey);
        assert_eq!(start_destination(false, false), Destination::Dashboard);
        assert_eq!(start_destination(false, true), Destination::Dashboard);
    }
}
