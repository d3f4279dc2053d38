//! Onboarding system: username routing, authentication, and the first-run
//! health survey.
//!
//! A user types a username and is routed to sign-in or sign-up, then
//! authenticates with a password, a federated one-tap credential, or as a
//! guest. First-time users fill in the survey before reaching the main
//! application. `OnboardingManager` owns the session state and is the only
//! thing that changes it.

pub mod manager;
pub mod routes;
pub mod routing;
pub mod state;
pub mod survey;

pub use manager::{FederatedLink, OnboardingEvent, OnboardingManager, OnboardingStatus};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::{Destination, OnboardingPhase, OnboardingState, RouteDecision};
pub use survey::UserSurveyData;
