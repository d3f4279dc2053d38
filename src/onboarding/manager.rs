//! OnboardingManager drives phase transitions, calls the identity provider
//! and the stores, and owns the survey aggregate.
//!
//! Every request that talks to a collaborator follows the same shape: enter
//! `Loading` (rejected if already there), await the collaborator, then settle
//! into the next phase. Settling checks the session epoch first, so a result
//! that arrives after `reset()` changes nothing.

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use crate::config::OnboardingConfig;
use crate::error::{AuthError, OnboardingError, StoreError};
use crate::identity::{FederatedCredential, IdentityProvider, Session};
use crate::store::{Fields, PreferenceStore, UserRecord, UserRecordStore, field_keys};

use super::routing;
use super::state::{Destination, OnboardingPhase, OnboardingState, PendingRequest, RouteDecision};
use super::survey::UserSurveyData;

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnboardingEvent {
    PhaseChanged {
        from: OnboardingPhase,
        to: OnboardingPhase,
    },
    /// Transient, user-displayable message (errors are recovered, never fatal).
    Notice { message: String },
}

/// Result of linking a federated credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedLink {
    pub uid: String,
    /// A user document was created by this link.
    pub is_new_user: bool,
    pub destination: Destination,
}

/// Read-only snapshot of the session for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardingStatus {
    pub phase: OnboardingPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survey: Option<UserSurveyData>,
    pub can_submit: bool,
    pub requires_period_date: bool,
    pub period_date_label: String,
}

/// Coordinates one onboarding session.
pub struct OnboardingManager {
    records: Arc<dyn UserRecordStore>,
    identity: Arc<dyn IdentityProvider>,
    preferences: Arc<dyn PreferenceStore>,
    state: RwLock<OnboardingState>,
    events: broadcast::Sender<OnboardingEvent>,
    period_date_format: String,
}

impl OnboardingManager {
    pub fn new(
        records: Arc<dyn UserRecordStore>,
        identity: Arc<dyn IdentityProvider>,
        preferences: Arc<dyn PreferenceStore>,
        config: &OnboardingConfig,
    ) -> Self {
        let (events, _rx) = broadcast::channel(config.notice_capacity);
        Self {
            records,
            identity,
            preferences,
            state: RwLock::new(OnboardingState::default()),
            events,
            period_date_format: config.period_date_format.clone(),
        }
    }

    /// Subscribe to phase changes and notices.
    pub fn subscribe(&self) -> broadcast::Receiver<OnboardingEvent> {
        self.events.subscribe()
    }

    // ── Read side ───────────────────────────────────────────────────

    pub async fn current_phase(&self) -> OnboardingPhase {
        self.state.read().await.phase()
    }

    /// The survey answers so far, if the survey has been started.
    pub async fn current_survey_state(&self) -> Option<UserSurveyData> {
        self.state.read().await.survey().cloned()
    }

    pub async fn can_submit_survey(&self) -> bool {
        self.state
            .read()
            .await
            .survey()
            .is_some_and(UserSurveyData::can_submit)
    }

    pub async fn requires_period_date(&self) -> bool {
        self.state
            .read()
            .await
            .survey()
            .is_some_and(UserSurveyData::requires_period_date)
    }

    /// The picked period date formatted for display, or the prompt.
    pub async fn period_date_label(&self) -> String {
        let state = self.state.read().await;
        state
            .survey()
            .cloned()
            .unwrap_or_default()
            .period_date_label(&self.period_date_format)
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.state.read().await.session().cloned()
    }

    pub async fn status(&self) -> OnboardingStatus {
        let state = self.state.read().await;
        let survey = state.survey().cloned();
        let answers = survey.clone().unwrap_or_default();
        OnboardingStatus {
            phase: state.phase(),
            can_submit: survey.is_some() && answers.can_submit(),
            requires_period_date: answers.requires_period_date(),
            period_date_label: answers.period_date_label(&self.period_date_format),
            survey,
        }
    }

    /// Cold-start screen: welcome for a fresh device, the survey when a
    /// session survived a restart mid-onboarding, otherwise the dashboard.
    ///
    /// A provider session found here is adopted as the orchestrator's own.
    pub async fn start_destination(&self) -> Result<Destination, OnboardingError> {
        let is_first_run = self.preferences.is_first_run().await?;
        let provider_session = self.identity.current_session().await;
        let has_session = provider_session.is_some();
        if let Some(session) = provider_session {
            let mut state = self.state.write().await;
            if state.session().is_none() && !state.phase().is_loading() {
                debug!(uid = %session.uid, "Restored provider session");
                state.set_session(session);
            }
        }
        Ok(routing::start_destination(is_first_run, has_session))
    }

    /// Route a username without touching the session phase.
    pub async fn resolve(&self, username: &str) -> Result<RouteDecision, StoreError> {
        let records = self.records.fetch_all().await?;
        Ok(routing::resolve(&records, username.trim()))
    }

    // ── Username entry ──────────────────────────────────────────────

    /// Resolve a submitted username and move to the matching auth screen.
    ///
    /// A lookup failure returns the session to where it was.
    pub async fn begin(&self, username: &str) -> Result<RouteDecision, OnboardingError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(OnboardingError::BlankUsername);
        }
        let pending = self.start_request("begin").await?;

        let records = match self.records.fetch_all().await {
            Ok(records) => records,
            Err(e) => return Err(self.fail(&pending, pending.previous, e.into()).await),
        };

        let decision = routing::resolve(&records, username);
        self.settle(&pending, decision.phase(), |_| {}).await?;
        info!(username, ?decision, "Username resolved");
        Ok(decision)
    }

    // ── Authentication ──────────────────────────────────────────────

    /// Sign in an existing user. Any failure lands on sign-up.
    pub async fn sign_in_with_password(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<Destination, OnboardingError> {
        let pending = self.start_request("sign_in_with_password").await?;
        let on_failure = OnboardingPhase::AwaitingSignUp;

        let records = match self.records.fetch_all().await {
            Ok(records) => records,
            Err(e) => return Err(self.fail(&pending, on_failure, e.into()).await),
        };
        let Some(record) = routing::find_by_username(&records, username.trim()).cloned() else {
            let err = OnboardingError::UnknownUser {
                username: username.to_string(),
            };
            return Err(self.fail(&pending, on_failure, err).await);
        };

        let session = match self
            .identity
            .sign_in_with_password(&record.email, password)
            .await
        {
            Ok(session) => session,
            Err(e) => return Err(self.fail(&pending, on_failure, e.into()).await),
        };

        let destination = routing::post_auth_destination(Some(&record));
        let uid = session.uid.clone();
        self.settle_signed_in(&pending, session).await?;
        info!(uid = %uid, route = %destination.route(), "Signed in with password");
        Ok(destination)
    }

    /// Register a new email/password account under `username`.
    ///
    /// Uniqueness is checked case-sensitively against every stored username.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &SecretString,
    ) -> Result<Destination, OnboardingError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(OnboardingError::BlankUsername);
        }
        let pending = self.start_request("register").await?;
        let on_failure = OnboardingPhase::AwaitingSignUp;

        let records = match self.records.fetch_all().await {
            Ok(records) => records,
            Err(e) => return Err(self.fail(&pending, on_failure, e.into()).await),
        };
        if !routing::is_username_available(&records, username) {
            let err = OnboardingError::UsernameTaken {
                username: username.to_string(),
            };
            return Err(self.fail(&pending, on_failure, err).await);
        }

        let session = match self.identity.create_account(email, password).await {
            Ok(session) => session,
            Err(e) => return Err(self.fail(&pending, on_failure, e.into()).await),
        };

        if let Err(stale) = self.ensure_current(&pending).await {
            return Err(self.release_session(&session, stale).await);
        }
        let mut fields = Fields::new();
        fields.insert(field_keys::USERNAME.to_string(), username.into());
        fields.insert(field_keys::EMAIL.to_string(), email.into());
        if let Err(e) = self.records.put(&session.uid, fields, false).await {
            let err = self.fail(&pending, on_failure, e.into()).await;
            return Err(self.release_session(&session, err).await);
        }

        let uid = session.uid.clone();
        self.settle_signed_in(&pending, session).await?;
        info!(uid = %uid, username, "Registered new user");
        Ok(Destination::Survey)
    }

    /// Exchange a federated one-tap result for a session and reconcile it
    /// with the user records.
    ///
    /// On the sign-up path a document `{email, username: display name}` is
    /// created when none exists for the uid. The username is not checked
    /// against existing records. Provider failures leave the phase where it
    /// was; record store failures land on sign-up.
    pub async fn link_federated_credential(
        &self,
        credential: FederatedCredential,
        is_sign_in_attempt: bool,
    ) -> Result<FederatedLink, OnboardingError> {
        let pending = self.start_request("link_federated_credential").await?;

        let Some(token) = credential.id_token else {
            return Err(self
                .fail(&pending, pending.previous, AuthError::MissingToken.into())
                .await);
        };
        let session = match self.identity.exchange_federated_token(&token).await {
            Ok(session) => session,
            Err(e) => return Err(self.fail(&pending, pending.previous, e.into()).await),
        };

        let on_store_failure = OnboardingPhase::AwaitingSignUp;
        let mut record = match self.records.find_by_uid(&session.uid).await {
            Ok(record) => record,
            Err(e) => {
                let err = self.fail(&pending, on_store_failure, e.into()).await;
                return Err(self.release_session(&session, err).await);
            }
        };

        let mut is_new_user = false;
        if !is_sign_in_attempt && record.is_none() {
            let mut fields = Fields::new();
            fields.insert(
                field_keys::EMAIL.to_string(),
                session.email.clone().unwrap_or_default().into(),
            );
            fields.insert(
                field_keys::USERNAME.to_string(),
                session.display_name.clone().unwrap_or_default().into(),
            );
            let created = UserRecord::from_document(&session.uid, &fields);
            if let Err(stale) = self.ensure_current(&pending).await {
                return Err(self.release_session(&session, stale).await);
            }
            if let Err(e) = self.records.put(&session.uid, fields, false).await {
                let err = self.fail(&pending, on_store_failure, e.into()).await;
                return Err(self.release_session(&session, err).await);
            }
            record = Some(created);
            is_new_user = true;
        }

        let destination = routing::post_auth_destination(record.as_ref());
        let uid = session.uid.clone();
        self.settle_signed_in(&pending, session).await?;
        info!(
            uid = %uid,
            is_new_user,
            is_sign_in_attempt,
            route = %destination.route(),
            "Federated credential linked"
        );
        Ok(FederatedLink {
            uid,
            is_new_user,
            destination,
        })
    }

    /// Start an anonymous session. Guests always go to the survey and get no
    /// user document here.
    pub async fn continue_as_guest(&self) -> Result<Destination, OnboardingError> {
        let pending = self.start_request("continue_as_guest").await?;

        let session = match self.identity.sign_in_anonymously().await {
            Ok(session) => session,
            Err(e) => {
                return Err(self
                    .fail(&pending, OnboardingPhase::AwaitingSignUp, e.into())
                    .await);
            }
        };

        let uid = session.uid.clone();
        self.settle_signed_in(&pending, session).await?;
        info!(uid = %uid, "Continuing as guest");
        Ok(Destination::Survey)
    }

    // ── Survey ──────────────────────────────────────────────────────

    pub async fn update_gender(&self, index: u8) -> bool {
        self.state.write().await.survey_mut().update_gender(index)
    }

    pub async fn update_age(&self, age: &str) {
        self.state.write().await.survey_mut().update_age(age);
    }

    pub async fn update_height(&self, height: &str) {
        self.state.write().await.survey_mut().update_height(height);
    }

    pub async fn update_weight(&self, weight: &str) {
        self.state.write().await.survey_mut().update_weight(weight);
    }

    pub async fn update_lifestyle(&self, index: u8) -> bool {
        self.state.write().await.survey_mut().update_lifestyle(index)
    }

    /// Returns whether the condition is selected afterwards.
    pub async fn toggle_condition(&self, condition: &str) -> bool {
        self.state
            .write()
            .await
            .survey_mut()
            .toggle_condition(condition)
    }

    pub async fn set_period_date(&self, epoch_millis: i64) {
        self.state
            .write()
            .await
            .survey_mut()
            .set_period_date(epoch_millis);
    }

    /// Persist the survey into the signed-in user's document (merged), then
    /// clear the first-run flag.
    ///
    /// On failure the phase lands on sign-in and the answers are kept, so a
    /// retry resubmits them unchanged.
    pub async fn submit_survey(&self) -> Result<Destination, OnboardingError> {
        let (pending, uid, patch) = {
            let mut state = self.state.write().await;
            if state.phase().is_loading() {
                return Err(OnboardingError::Busy);
            }
            let survey = state.survey().cloned().unwrap_or_default();
            if !survey.can_submit() {
                return Err(OnboardingError::SurveyIncomplete);
            }
            let uid = state
                .session()
                .map(|session| session.uid.clone())
                .ok_or(OnboardingError::NotAuthenticated)?;
            let mut patch = survey.to_patch()?;
            patch.insert(field_keys::HAS_COMPLETED_SURVEY.to_string(), true.into());

            let pending = state.begin_request()?;
            self.publish_phase(pending.previous, OnboardingPhase::Loading);
            (pending, uid, patch)
        };
        debug!(uid = %uid, "Submitting survey");

        let on_failure = OnboardingPhase::AwaitingSignIn;
        if let Err(e) = self.records.put(&uid, patch, true).await {
            return Err(self.fail(&pending, on_failure, e.into()).await);
        }
        self.ensure_current(&pending).await?;
        if let Err(e) = self.preferences.set_first_run(false).await {
            return Err(self.fail(&pending, on_failure, e.into()).await);
        }

        self.settle(&pending, OnboardingPhase::Idle, |state| state.discard_survey())
            .await?;
        info!(uid = %uid, "Survey submitted");
        Ok(Destination::Dashboard)
    }

    // ── Session control ─────────────────────────────────────────────

    /// Presentation-driven move between screens. `Loading` cannot be entered
    /// or left this way.
    pub async fn navigate_to(&self, phase: OnboardingPhase) -> Result<(), OnboardingError> {
        let from = {
            let mut state = self.state.write().await;
            let from = state.phase();
            state.navigate(phase)?;
            from
        };
        self.publish_phase(from, phase);
        Ok(())
    }

    /// End the session (logout): sign out, drop the survey, and turn every
    /// in-flight request into a no-op.
    pub async fn reset(&self) {
        self.identity.sign_out().await;
        let from = {
            let mut state = self.state.write().await;
            let from = state.phase();
            state.reset();
            from
        };
        info!("Onboarding session reset");
        if from != OnboardingPhase::Idle {
            self.publish_phase(from, OnboardingPhase::Idle);
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn start_request(&self, operation: &'static str) -> Result<PendingRequest, OnboardingError> {
        let pending = {
            let mut state = self.state.write().await;
            state.begin_request().inspect_err(|_| {
                debug!(operation, "Rejected request while loading");
            })?
        };
        debug!(operation, from = %pending.previous, "Request started");
        self.publish_phase(pending.previous, OnboardingPhase::Loading);
        Ok(pending)
    }

    /// Leave `Loading` for `to`, applying `apply` under the same lock.
    async fn settle<F>(
        &self,
        pending: &PendingRequest,
        to: OnboardingPhase,
        apply: F,
    ) -> Result<(), OnboardingError>
    where
        F: FnOnce(&mut OnboardingState),
    {
        {
            let mut state = self.state.write().await;
            if let Err(e) = state.settle(pending, to) {
                debug!(epoch = pending.epoch, "Dropping result of a stale request");
                return Err(e);
            }
            apply(&mut state);
        }
        self.publish_phase(OnboardingPhase::Loading, to);
        Ok(())
    }

    /// Settle a request that produced a provider session into `Idle`,
    /// adopting the session. A stale result ends the session instead.
    async fn settle_signed_in(
        &self,
        pending: &PendingRequest,
        session: Session,
    ) -> Result<(), OnboardingError> {
        let orphan = session.clone();
        match self
            .settle(pending, OnboardingPhase::Idle, |state| state.set_session(session))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => Err(self.release_session(&orphan, err).await),
        }
    }

    /// Fails with `Stale` once the session was reset after `pending` began.
    /// Checked before every write that follows the first collaborator call.
    async fn ensure_current(&self, pending: &PendingRequest) -> Result<(), OnboardingError> {
        if self.state.read().await.is_current(pending) {
            Ok(())
        } else {
            debug!(epoch = pending.epoch, "Skipping writes of a stale request");
            Err(OnboardingError::Stale)
        }
    }

    /// End a provider session the orchestrator did not adopt, then hand
    /// back `err`. A newer provider session is left alone.
    async fn release_session(&self, session: &Session, err: OnboardingError) -> OnboardingError {
        let held = self.identity.current_session().await;
        if held.is_some_and(|held| held.uid == session.uid) {
            self.identity.sign_out().await;
            debug!(uid = %session.uid, "Signed out unadopted provider session");
        }
        err
    }

    /// Recover from a failed request: settle into `to` and publish the
    /// error as a notice. A stale request is dropped silently.
    async fn fail(
        &self,
        pending: &PendingRequest,
        to: OnboardingPhase,
        err: OnboardingError,
    ) -> OnboardingError {
        if let Err(stale) = self.settle(pending, to, |_| {}).await {
            return stale;
        }
        warn!(phase = %to, error = %err, "Onboarding request failed");
        let _ = self.events.send(OnboardingEvent::Notice {
            message: err.user_message(),
        });
        err
    }

    fn publish_phase(&self, from: OnboardingPhase, to: OnboardingPhase) {
        // Ok if nobody is listening.
        let _ = self.events.send(OnboardingEvent::PhaseChanged { from, to });
    }
}
