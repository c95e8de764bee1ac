//! Planner error types

use thiserror::Error;

/// Failure of an external collaborator (weather service, catalog store)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider API key missing")]
    MissingApiKey,

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while generating a plan.
///
/// Infeasibility is not an error: a plan with no (or fewer) targets and
/// per-target exclusion reasons is returned instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("Invalid scheduling constraints: {0}")]
    InvalidConstraints(String),

    #[error("Invalid instrument profile: {0}")]
    InvalidInstrument(String),

    #[error("Catalog unavailable: {0}")]
    Catalog(#[from] ProviderError),
}

pub type PlannerResult<T> = Result<T, PlannerError>;
