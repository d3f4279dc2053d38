//! End-to-end tests for the onboarding orchestrator.
//!
//! The record store is a real in-memory libSQL database wrapped so tests can
//! inject failures and hold requests in flight; the identity provider is the
//! in-process one, wrapped the same way.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::timeout;

use svastha_onboard::config::OnboardingConfig;
use svastha_onboard::error::{AuthError, OnboardingError, PreferenceError, StoreError};
use svastha_onboard::identity::{
    FederatedCredential, IdentityProvider, LocalIdentityProvider, Session,
};
use svastha_onboard::onboarding::{
    Destination, OnboardingEvent, OnboardingManager, OnboardingPhase, RouteDecision,
};
use svastha_onboard::store::{Fields, LibSqlBackend, PreferenceStore, UserRecord, UserRecordStore};

/// Maximum time any test is allowed to wait before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Stub collaborators ──────────────────────────────────────────────────

/// Record store that can fail writes and hold reads at a gate.
struct TestStore {
    inner: LibSqlBackend,
    failing_puts: AtomicUsize,
    put_attempts: AtomicUsize,
    fail_fetch: AtomicBool,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
    put_gate: Mutex<Option<Arc<Notify>>>,
}

impl TestStore {
    async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LibSqlBackend::new_memory().await.unwrap(),
            failing_puts: AtomicUsize::new(0),
            put_attempts: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
            fetch_gate: Mutex::new(None),
            put_gate: Mutex::new(None),
        })
    }

    /// Fail the next `n` writes.
    fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Hold every `fetch_all` until the returned gate is notified.
    fn gate_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Hold every `put` until the returned gate is notified.
    fn gate_puts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.put_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    async fn seed(&self, uid: &str, document: serde_json::Value) {
        let fields = document.as_object().cloned().unwrap();
        self.inner.put(uid, fields, false).await.unwrap();
    }

    async fn document(&self, uid: &str) -> Fields {
        self.inner.get_document(uid).await.unwrap().unwrap()
    }
}

#[async_trait]
impl UserRecordStore for TestStore {
    async fn fetch_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        let gate = self.fetch_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Query("unavailable".to_string()));
        }
        self.inner.fetch_all().await
    }

    async fn put(&self, uid: &str, fields: Fields, merge: bool) -> Result<(), StoreError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let gate = self.put_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let remaining = self.failing_puts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_puts.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Query("write rejected".to_string()));
        }
        self.inner.put(uid, fields, merge).await
    }
}

#[async_trait]
impl PreferenceStore for TestStore {
    async fn is_first_run(&self) -> Result<bool, PreferenceError> {
        self.inner.is_first_run().await
    }

    async fn set_first_run(&self, value: bool) -> Result<(), PreferenceError> {
        self.inner.set_first_run(value).await
    }
}

/// Identity provider that can fail every call and hold calls at a gate.
struct TestIdentity {
    inner: LocalIdentityProvider,
    fail_with: Mutex<Option<AuthError>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl TestIdentity {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LocalIdentityProvider::new(),
            fail_with: Mutex::new(None),
            gate: Mutex::new(None),
        })
    }

    fn fail_with(&self, err: AuthError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    fn gate_calls(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    async fn check(&self) -> Result<(), AuthError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.fail_with.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityProvider for TestIdentity {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, AuthError> {
        self.check().await?;
        self.inner.sign_in_with_password(email, password).await
    }

    async fn create_account(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, AuthError> {
        self.check().await?;
        self.inner.create_account(email, password).await
    }

    async fn exchange_federated_token(&self, token: &str) -> Result<Session, AuthError> {
        self.check().await?;
        self.inner.exchange_federated_token(token).await
    }

    async fn sign_in_anonymously(&self) -> Result<Session, AuthError> {
        self.check().await?;
        self.inner.sign_in_anonymously().await
    }

    async fn current_session(&self) -> Option<Session> {
        self.inner.current_session().await
    }

    async fn sign_out(&self) {
        self.inner.sign_out().await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

struct Harness {
    manager: Arc<OnboardingManager>,
    store: Arc<TestStore>,
    identity: Arc<TestIdentity>,
}

async fn harness() -> Harness {
    let store = TestStore::new().await;
    let identity = TestIdentity::new();
    let manager = Arc::new(OnboardingManager::new(
        store.clone(),
        identity.clone(),
        store.clone(),
        &OnboardingConfig::default(),
    ));
    Harness {
        manager,
        store,
        identity,
    }
}

fn secret(s: &str) -> SecretString {
    SecretString::from(s.to_string())
}

async fn fill_required(manager: &OnboardingManager) {
    manager.update_age("24").await;
    manager.update_height("170").await;
    manager.update_weight("62").await;
}

/// Register "priya" through the orchestrator and return her uid.
async fn register_priya(h: &Harness) -> String {
    assert_eq!(h.manager.begin("priya").await.unwrap(), RouteDecision::ToSignUp);
    let destination = h
        .manager
        .register("priya", "priya@example.com", &secret("namaste1"))
        .await
        .unwrap();
    assert_eq!(destination, Destination::Survey);
    h.manager.current_session().await.unwrap().uid
}

async fn wait_for_loading(manager: &OnboardingManager) {
    timeout(TEST_TIMEOUT, async {
        while manager.current_phase().await != OnboardingPhase::Loading {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("request never entered loading");
}

// ── Username resolution ─────────────────────────────────────────────────

#[tokio::test]
async fn begin_routes_existing_username_ignoring_case() {
    let h = harness().await;
    h.store
        .seed("u1", json!({"username": "manas", "email": "manas@example.com"}))
        .await;

    assert_eq!(h.manager.resolve("MANAS").await.unwrap(), RouteDecision::ToSignIn);
    assert_eq!(h.manager.resolve(" manas ").await.unwrap(), RouteDecision::ToSignIn);
    assert_eq!(
        h.manager.resolve("Manas").await.unwrap(),
        h.manager.resolve("manas").await.unwrap()
    );

    assert_eq!(h.manager.begin("MANAS").await.unwrap(), RouteDecision::ToSignIn);
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignIn);

    assert_eq!(h.manager.begin("newuser").await.unwrap(), RouteDecision::ToSignUp);
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignUp);
}

#[tokio::test]
async fn blank_username_changes_nothing() {
    let h = harness().await;
    assert!(matches!(
        h.manager.begin("   ").await,
        Err(OnboardingError::BlankUsername)
    ));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Idle);
}

#[tokio::test]
async fn begin_lookup_failure_returns_to_previous_phase() {
    let h = harness().await;
    h.manager.begin("someone").await.unwrap();
    h.store.fail_fetch.store(true, Ordering::SeqCst);

    let err = h.manager.begin("someone").await.unwrap_err();
    assert!(matches!(err, OnboardingError::Store(_)));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignUp);
}

#[tokio::test]
async fn phase_events_follow_the_request() {
    let h = harness().await;
    let mut events = h.manager.subscribe();
    h.manager.begin("newuser").await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        OnboardingEvent::PhaseChanged {
            from: OnboardingPhase::Idle,
            to: OnboardingPhase::Loading
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        OnboardingEvent::PhaseChanged {
            from: OnboardingPhase::Loading,
            to: OnboardingPhase::AwaitingSignUp
        }
    );
}

// ── Password sign-in and registration ───────────────────────────────────

#[tokio::test]
async fn password_sign_in_routes_by_survey_marker() {
    let h = harness().await;
    register_priya(&h).await;
    h.manager.reset().await;

    assert_eq!(h.manager.begin("Priya").await.unwrap(), RouteDecision::ToSignIn);
    let destination = h
        .manager
        .sign_in_with_password("Priya", &secret("namaste1"))
        .await
        .unwrap();
    assert_eq!(destination, Destination::Survey);

    fill_required(&h.manager).await;
    h.manager.submit_survey().await.unwrap();
    h.manager.reset().await;

    h.manager.begin("priya").await.unwrap();
    let destination = h
        .manager
        .sign_in_with_password("priya", &secret("namaste1"))
        .await
        .unwrap();
    assert_eq!(destination, Destination::Dashboard);
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Idle);
}

#[tokio::test]
async fn failed_sign_in_lands_on_sign_up() {
    let h = harness().await;
    register_priya(&h).await;
    h.manager.reset().await;
    h.manager.begin("priya").await.unwrap();

    let err = h
        .manager
        .sign_in_with_password("priya", &secret("wrong-password"))
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardingError::Auth(AuthError::Rejected(_))));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignUp);
    assert!(h.manager.current_session().await.is_none());
}

#[tokio::test]
async fn sign_in_for_unknown_username_lands_on_sign_up() {
    let h = harness().await;
    h.manager.navigate_to(OnboardingPhase::AwaitingSignIn).await.unwrap();

    let err = h
        .manager
        .sign_in_with_password("ghost", &secret("whatever"))
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardingError::UnknownUser { .. }));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignUp);
}

#[tokio::test]
async fn registration_uniqueness_is_case_sensitive() {
    let h = harness().await;
    h.store
        .seed("u1", json!({"username": "manas", "email": "manas@example.com"}))
        .await;
    let mut events = h.manager.subscribe();

    let err = h
        .manager
        .register("manas", "other@example.com", &secret("namaste1"))
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardingError::UsernameTaken { .. }));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignUp);

    let mut notices = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let OnboardingEvent::Notice { message } = event {
            notices.push(message);
        }
    }
    assert_eq!(notices, vec!["Oops! The username already exists.".to_string()]);

    // A different case is a different username for registration purposes.
    h.manager
        .register("Manas", "manas2@example.com", &secret("namaste1"))
        .await
        .unwrap();
    assert_eq!(h.store.fetch_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn registration_never_stores_the_password() {
    let h = harness().await;
    let uid = register_priya(&h).await;

    let doc = h.store.document(&uid).await;
    assert_eq!(doc["username"], "priya");
    assert_eq!(doc["email"], "priya@example.com");
    assert!(!doc.contains_key("password"));
}

// ── Federated linking ───────────────────────────────────────────────────

#[tokio::test]
async fn federated_sign_up_creates_record_and_routes_to_survey() {
    let h = harness().await;
    let uid = h
        .identity
        .inner
        .register_federated_token("google-token", "asha@example.com", "Asha Rao")
        .await;

    let link = h
        .manager
        .link_federated_credential(FederatedCredential::new("google-token"), false)
        .await
        .unwrap();

    assert_eq!(link.uid, uid);
    assert!(link.is_new_user);
    assert_eq!(link.destination, Destination::Survey);
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Idle);

    let record = h.store.find_by_uid(&uid).await.unwrap().unwrap();
    assert_eq!(record.email, "asha@example.com");
    assert_eq!(record.username, "Asha Rao");
}

#[tokio::test]
async fn federated_sign_up_keeps_existing_record() {
    let h = harness().await;
    let uid = h
        .identity
        .inner
        .register_federated_token("google-token", "asha@example.com", "Asha Rao")
        .await;
    h.store
        .seed(
            &uid,
            json!({"username": "asha", "email": "asha@example.com", "has_completed_survey": true}),
        )
        .await;

    let link = h
        .manager
        .link_federated_credential(FederatedCredential::new("google-token"), false)
        .await
        .unwrap();

    assert!(!link.is_new_user);
    assert_eq!(link.destination, Destination::Dashboard);
    assert_eq!(h.store.document(&uid).await["username"], "asha");
}

#[tokio::test]
async fn federated_sign_in_without_record_goes_to_survey() {
    let h = harness().await;
    h.identity
        .inner
        .register_federated_token("google-token", "asha@example.com", "Asha Rao")
        .await;

    let link = h
        .manager
        .link_federated_credential(FederatedCredential::new("google-token"), true)
        .await
        .unwrap();

    assert!(!link.is_new_user);
    assert_eq!(link.destination, Destination::Survey);
    assert!(h.store.fetch_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn federated_failures_leave_phase_unchanged() {
    let h = harness().await;
    h.manager.begin("newuser").await.unwrap();
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignUp);

    let err = h
        .manager
        .link_federated_credential(FederatedCredential::default(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardingError::Auth(AuthError::MissingToken)));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignUp);

    h.manager.navigate_to(OnboardingPhase::AwaitingSignIn).await.unwrap();
    let err = h
        .manager
        .link_federated_credential(FederatedCredential::new("expired-token"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardingError::Auth(AuthError::Rejected(_))));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignIn);

    assert_eq!(h.store.put_attempts.load(Ordering::SeqCst), 0);
    assert!(h.manager.current_session().await.is_none());
}

#[tokio::test]
async fn federated_record_write_failure_lands_on_sign_up() {
    let h = harness().await;
    h.identity
        .inner
        .register_federated_token("google-token", "asha@example.com", "Asha Rao")
        .await;
    h.store.fail_next_puts(1);

    let err = h
        .manager
        .link_federated_credential(FederatedCredential::new("google-token"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardingError::Store(_)));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignUp);
}

// ── Guests ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn guest_goes_to_survey_without_a_record() {
    let h = harness().await;
    let destination = h.manager.continue_as_guest().await.unwrap();

    assert_eq!(destination, Destination::Survey);
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Idle);
    assert!(h.manager.current_session().await.unwrap().is_anonymous);
    assert!(h.store.fetch_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn guest_failure_surfaces_provider_text_unchanged() {
    let h = harness().await;
    let provider_text = "A network error (such as timeout, interrupted connection or unreachable host) has occurred.";
    h.identity
        .fail_with(AuthError::Network(provider_text.to_string()));
    let mut events = h.manager.subscribe();

    let err = h.manager.continue_as_guest().await.unwrap_err();
    assert_eq!(err.user_message(), provider_text);
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignUp);

    let mut notices = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let OnboardingEvent::Notice { message } = event {
            notices.push(message);
        }
    }
    assert_eq!(notices, vec![provider_text.to_string()]);
}

// ── Survey submission ───────────────────────────────────────────────────

#[tokio::test]
async fn submit_requires_age_height_and_weight() {
    let h = harness().await;
    h.manager.continue_as_guest().await.unwrap();
    h.manager.update_age("24").await;
    h.manager.update_height("170").await;
    assert!(!h.manager.can_submit_survey().await);

    let err = h.manager.submit_survey().await.unwrap_err();
    assert!(matches!(err, OnboardingError::SurveyIncomplete));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Idle);
    assert_eq!(h.store.put_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn submit_requires_a_session() {
    let h = harness().await;
    fill_required(&h.manager).await;
    let err = h.manager.submit_survey().await.unwrap_err();
    assert!(matches!(err, OnboardingError::NotAuthenticated));
}

#[tokio::test]
async fn submit_persists_survey_and_clears_first_run() {
    let h = harness().await;
    let uid = register_priya(&h).await;

    h.manager.update_gender(1).await;
    fill_required(&h.manager).await;
    h.manager.update_lifestyle(2).await;
    h.manager.toggle_condition("Thyroid").await;
    assert!(h.manager.requires_period_date().await);
    h.manager.set_period_date(1_678_752_000_000).await;
    assert_eq!(h.manager.period_date_label().await, "Tue, Mar 14");

    assert_eq!(h.manager.submit_survey().await.unwrap(), Destination::Dashboard);

    let doc = h.store.document(&uid).await;
    assert_eq!(doc["username"], "priya");
    assert_eq!(doc["gender_index"], 1);
    assert_eq!(doc["age"], "24");
    assert_eq!(doc["lifestyle_index"], 2);
    assert_eq!(doc["selected_conditions"], json!(["Thyroid"]));
    assert_eq!(doc["last_period_start_epoch_millis"], 1_678_752_000_000_i64);
    assert_eq!(doc["has_completed_survey"], true);

    assert!(!h.store.is_first_run().await.unwrap());
    assert!(h.manager.current_survey_state().await.is_none());
    assert_eq!(h.manager.start_destination().await.unwrap(), Destination::Dashboard);
}

#[tokio::test]
async fn failed_submit_keeps_answers_and_retry_writes_final_state() {
    let h = harness().await;
    let uid = register_priya(&h).await;
    fill_required(&h.manager).await;
    h.store.fail_next_puts(1);

    let err = h.manager.submit_survey().await.unwrap_err();
    assert!(matches!(err, OnboardingError::Store(_)));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignIn);
    assert!(h.store.is_first_run().await.unwrap());

    let kept = h.manager.current_survey_state().await.unwrap();
    assert_eq!(kept.age, "24");
    assert!(!h.store.document(&uid).await.contains_key("age"));

    h.manager.update_weight("64").await;
    let final_answers = h.manager.current_survey_state().await.unwrap();
    h.manager.submit_survey().await.unwrap();

    let doc = h.store.document(&uid).await;
    let mut expected = final_answers.to_patch().unwrap();
    expected.insert("has_completed_survey".to_string(), json!(true));
    expected.insert("username".to_string(), json!("priya"));
    expected.insert("email".to_string(), json!("priya@example.com"));
    assert_eq!(doc, expected);
    // Registration write, failed submit, successful submit.
    assert_eq!(h.store.put_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn guest_can_finish_the_survey() {
    let h = harness().await;
    h.manager.continue_as_guest().await.unwrap();
    let uid = h.manager.current_session().await.unwrap().uid;
    fill_required(&h.manager).await;

    h.manager.submit_survey().await.unwrap();
    assert_eq!(h.store.document(&uid).await["has_completed_survey"], true);
}

// ── Session control and concurrency ─────────────────────────────────────

#[tokio::test]
async fn concurrent_begin_is_rejected_while_loading() {
    let h = harness().await;
    h.store
        .seed("u1", json!({"username": "manas", "email": "manas@example.com"}))
        .await;
    let gate = h.store.gate_fetches();

    let manager = Arc::clone(&h.manager);
    let first = tokio::spawn(async move { manager.begin("manas").await });
    wait_for_loading(&h.manager).await;

    assert!(matches!(
        h.manager.begin("newuser").await,
        Err(OnboardingError::Busy)
    ));
    assert!(matches!(
        h.manager.continue_as_guest().await,
        Err(OnboardingError::Busy)
    ));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Loading);

    gate.notify_one();
    let decision = timeout(TEST_TIMEOUT, first).await.unwrap().unwrap().unwrap();
    assert_eq!(decision, RouteDecision::ToSignIn);
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::AwaitingSignIn);
}

#[tokio::test]
async fn result_arriving_after_reset_is_dropped() {
    let h = harness().await;
    let gate = h.identity.gate_calls();

    let manager = Arc::clone(&h.manager);
    let guest = tokio::spawn(async move { manager.continue_as_guest().await });
    wait_for_loading(&h.manager).await;

    h.manager.reset().await;
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Idle);

    gate.notify_one();
    let result = timeout(TEST_TIMEOUT, guest).await.unwrap().unwrap();
    assert!(matches!(result, Err(OnboardingError::Stale)));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Idle);
    assert!(h.manager.current_session().await.is_none());
}

#[tokio::test]
async fn stale_guest_session_is_signed_out_at_the_provider() {
    let h = harness().await;
    let gate = h.identity.gate_calls();

    let manager = Arc::clone(&h.manager);
    let guest = tokio::spawn(async move { manager.continue_as_guest().await });
    wait_for_loading(&h.manager).await;
    h.manager.reset().await;
    gate.notify_one();
    let result = timeout(TEST_TIMEOUT, guest).await.unwrap().unwrap();
    assert!(matches!(result, Err(OnboardingError::Stale)));

    assert!(h.identity.current_session().await.is_none());
    assert_eq!(h.manager.start_destination().await.unwrap(), Destination::Welcome);

    fill_required(&h.manager).await;
    assert!(matches!(
        h.manager.submit_survey().await,
        Err(OnboardingError::NotAuthenticated)
    ));
    assert!(h.store.fetch_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn reset_during_submit_leaves_first_run_set() {
    let h = harness().await;
    register_priya(&h).await;
    fill_required(&h.manager).await;
    let gate = h.store.gate_puts();

    let manager = Arc::clone(&h.manager);
    let submit = tokio::spawn(async move { manager.submit_survey().await });
    wait_for_loading(&h.manager).await;
    h.manager.reset().await;
    gate.notify_one();

    let result = timeout(TEST_TIMEOUT, submit).await.unwrap().unwrap();
    assert!(matches!(result, Err(OnboardingError::Stale)));
    assert!(h.store.is_first_run().await.unwrap());
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Idle);
    assert_eq!(h.manager.start_destination().await.unwrap(), Destination::Welcome);
}

#[tokio::test]
async fn reset_during_registration_drops_the_new_session() {
    let h = harness().await;
    let gate = h.store.gate_puts();

    let manager = Arc::clone(&h.manager);
    let register = tokio::spawn(async move {
        manager
            .register("priya", "priya@example.com", &secret("namaste1"))
            .await
    });
    wait_for_loading(&h.manager).await;
    h.manager.reset().await;
    gate.notify_one();

    let result = timeout(TEST_TIMEOUT, register).await.unwrap().unwrap();
    assert!(matches!(result, Err(OnboardingError::Stale)));
    assert!(h.identity.current_session().await.is_none());
    assert!(h.manager.current_session().await.is_none());
}

#[tokio::test]
async fn failed_registration_write_leaves_no_provider_session() {
    let h = harness().await;
    h.store.fail_next_puts(1);

    let err = h
        .manager
        .register("priya", "priya@example.com", &secret("namaste1"))
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardingError::Store(_)));
    assert!(h.identity.current_session().await.is_none());
    assert_eq!(h.manager.start_destination().await.unwrap(), Destination::Welcome);
}

#[tokio::test]
async fn stale_failure_publishes_no_notice() {
    let h = harness().await;
    let gate = h.identity.gate_calls();
    h.identity.fail_with(AuthError::Provider("boom".to_string()));

    let manager = Arc::clone(&h.manager);
    let guest = tokio::spawn(async move { manager.continue_as_guest().await });
    wait_for_loading(&h.manager).await;
    h.manager.reset().await;
    let mut events = h.manager.subscribe();

    gate.notify_one();
    let result = timeout(TEST_TIMEOUT, guest).await.unwrap().unwrap();
    assert!(matches!(result, Err(OnboardingError::Stale)));
    assert_eq!(h.manager.current_phase().await, OnboardingPhase::Idle);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn reset_discards_survey_answers() {
    let h = harness().await;
    h.manager.continue_as_guest().await.unwrap();
    fill_required(&h.manager).await;
    h.manager.toggle_condition("Asthma").await;

    h.manager.reset().await;
    assert!(h.manager.current_survey_state().await.is_none());
    assert!(h.manager.current_session().await.is_none());
    assert_eq!(h.manager.start_destination().await.unwrap(), Destination::Welcome);
}

#[tokio::test]
async fn presentation_cannot_enter_loading() {
    let h = harness().await;
    assert!(matches!(
        h.manager.navigate_to(OnboardingPhase::Loading).await,
        Err(OnboardingError::InvalidTransition { .. })
    ));
    h.manager
        .navigate_to(OnboardingPhase::AwaitingSignUp)
        .await
        .unwrap();
    h.manager.navigate_to(OnboardingPhase::Idle).await.unwrap();
}

#[tokio::test]
async fn start_destination_follows_first_run_and_session() {
    let h = harness().await;
    assert_eq!(h.manager.start_destination().await.unwrap(), Destination::Welcome);

    h.manager.continue_as_guest().await.unwrap();
    assert_eq!(h.manager.start_destination().await.unwrap(), Destination::Survey);
}

#[tokio::test]
async fn concurrent_survey_edits_all_land() {
    let h = harness().await;
    let conditions = ["Asthma", "Diabetes", "Thyroid", "PCOS", "Hypertension"];

    let edits = conditions.iter().map(|c| {
        let manager = Arc::clone(&h.manager);
        async move { manager.toggle_condition(c).await }
    });
    let selected = futures::future::join_all(edits).await;
    assert!(selected.into_iter().all(|now_selected| now_selected));

    let survey = h.manager.current_survey_state().await.unwrap();
    assert_eq!(survey.selected_conditions.len(), conditions.len());
}
