//! Svastha onboarding: the state machine behind the wellness app's first
//! run.

pub mod config;
pub mod error;
pub mod identity;
pub mod onboarding;
pub mod store;
