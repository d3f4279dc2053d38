//! Onboarding state machine. Tracks which phase the session is in.

use serde::{Deserialize, Serialize};

use crate::error::OnboardingError;
use crate::identity::Session;

use super::survey::UserSurveyData;

/// The phases of an onboarding session.
///
/// Being fully onboarded is not a phase: a finished session hands off to the
/// main application and leaves the orchestrator's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingPhase {
    Idle,
    Loading,
    AwaitingSignIn,
    AwaitingSignUp,
}

impl OnboardingPhase {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: OnboardingPhase) -> bool {
        use OnboardingPhase::*;
        matches!(
            (self, target),
            (Idle | AwaitingSignIn | AwaitingSignUp, Loading)
                | (Loading, Idle | AwaitingSignIn | AwaitingSignUp)
                | (Idle, AwaitingSignIn | AwaitingSignUp)
                | (AwaitingSignIn, Idle | AwaitingSignUp)
                | (AwaitingSignUp, Idle | AwaitingSignIn)
        )
    }

    /// Whether presentation code may request this transition directly.
    ///
    /// Entering or leaving `Loading` is reserved for the orchestrator.
    pub fn can_navigate_to(&self, target: OnboardingPhase) -> bool {
        !self.is_loading() && target != Self::Loading && self.can_transition_to(target)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

impl Default for OnboardingPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for OnboardingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::AwaitingSignIn => "awaiting_sign_in",
            Self::AwaitingSignUp => "awaiting_sign_up",
        };
        write!(f, "{s}")
    }
}

/// Outcome of resolving a username: which auth screen comes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    ToSignIn,
    ToSignUp,
}

impl RouteDecision {
    /// The awaiting phase this decision lands on.
    pub fn phase(&self) -> OnboardingPhase {
        match self {
            Self::ToSignIn => OnboardingPhase::AwaitingSignIn,
            Self::ToSignUp => OnboardingPhase::AwaitingSignUp,
        }
    }
}

/// Screens the presentation layer can be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Destination {
    Welcome,
    SignIn { username: String },
    SignUp { username: String },
    Survey,
    Dashboard,
}

impl Destination {
    /// Navigation route string understood by the presentation layer.
    pub fn route(&self) -> String {
        match self {
            Self::Welcome => "welcome".to_string(),
            Self::SignIn { username } => format!("sign_in/{username}"),
            Self::SignUp { username } => format!("signup/{username}"),
            Self::Survey => "survey".to_string(),
            Self::Dashboard => "dashboard".to_string(),
        }
    }

    /// Screen for a resolved username.
    pub fn for_decision(decision: RouteDecision, username: &str) -> Self {
        let username = username.to_string();
        match decision {
            RouteDecision::ToSignIn => Self::SignIn { username },
            RouteDecision::ToSignUp => Self::SignUp { username },
        }
    }
}

/// Receipt for a request that moved the session into `Loading`.
///
/// Carries the session epoch so a result arriving after a reset can be
/// recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub epoch: u64,
    pub previous: OnboardingPhase,
}

/// Mutable state of one onboarding session, owned by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OnboardingState {
    phase: OnboardingPhase,
    epoch: u64,
    survey: Option<UserSurveyData>,
    session: Option<Session>,
}

impl OnboardingState {
    pub fn phase(&self) -> OnboardingPhase {
        self.phase
    }

    pub fn survey(&self) -> Option<&UserSurveyData> {
        self.survey.as_ref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Enter `Loading` for a new request. Rejected while another request is
    /// in flight.
    pub fn begin_request(&mut self) -> Result<PendingRequest, OnboardingError> {
        if self.phase.is_loading() {
            return Err(OnboardingError::Busy);
        }
        let pending = PendingRequest {
            epoch: self.epoch,
            previous: self.phase,
        };
        self.phase = OnboardingPhase::Loading;
        Ok(pending)
    }

    /// Whether the request is still the one this session is waiting on.
    pub fn is_current(&self, pending: &PendingRequest) -> bool {
        pending.epoch == self.epoch && self.phase.is_loading()
    }

    /// Leave `Loading` for `to`. Fails with `Stale` if the session was reset
    /// after the request started.
    pub fn settle(
        &mut self,
        pending: &PendingRequest,
        to: OnboardingPhase,
    ) -> Result<(), OnboardingError> {
        if !self.is_current(pending) {
            return Err(OnboardingError::Stale);
        }
        if !self.phase.can_transition_to(to) {
            return Err(OnboardingError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Presentation-driven move between the non-loading phases.
    pub fn navigate(&mut self, to: OnboardingPhase) -> Result<(), OnboardingError> {
        if !self.phase.can_navigate_to(to) {
            return Err(OnboardingError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// The survey aggregate, created on first access.
    pub fn survey_mut(&mut self) -> &mut UserSurveyData {
        self.survey.get_or_insert_with(UserSurveyData::default)
    }

    pub fn discard_survey(&mut self) {
        self.survey = None;
    }

    /// End the session: back to `Idle`, survey and session dropped, and
    /// every in-flight request invalidated.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.phase = OnboardingPhase::Idle;
        self.survey = None;
        self.session = None;
    }
}
