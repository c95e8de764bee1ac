//! Skyward session planner
//!
//! Turns a target catalog, an observing site and a set of constraints into an
//! ordered, time-stamped observing plan for one night.
//!
//! - [`astro`]: low-level astronomy (sidereal time, precession, Sun and Moon)
//! - [`visibility`]: altitude, twilight, field rotation and forward visibility
//! - [`scoring`]: candidate desirability
//! - [`scheduler`]: the greedy plan builder
//! - [`providers`]: catalog and weather collaborator traits

pub mod astro;
pub mod error;
pub mod model;
pub mod providers;
pub mod scheduler;
pub mod scoring;
pub mod visibility;

pub use error::{PlannerError, PlannerResult, ProviderError};
pub use model::{
    Exclusion, ExclusionReason, GeoLocation, InstrumentProfile, ObjectType, Plan, ScheduledTarget,
    SchedulingConstraints, ScoreBreakdown, SessionWindow, Target,
};
pub use providers::{
    CatalogFilter, CatalogProvider, FixedWeather, HourlyWeather, OptimisticWeather, SharedCatalog, SharedWeather,
    StaticCatalog, WeatherScoreProvider, DEFAULT_WEATHER_SCORE,
};
pub use scheduler::{PlanRequest, SchedulerConfig, SessionScheduler};
pub use scoring::{Candidate, CandidateScorer, UrgencyPolicy};
pub use visibility::{FieldRotation, TwilightTimes, VisibilityRun};
