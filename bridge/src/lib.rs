// Skyward Bridge
//
// Entry point for applications: configuration loading, logging setup and the
// ObservatoryService facade over the planner, link and sequencer crates.

mod api;
pub mod config;
mod error;
pub mod logging;

pub use api::*;
pub use config::{SkywardConfig, TelescopeConfig};
pub use error::{BridgeError, BridgeResult};
pub use logging::{init_logging, LoggingConfig};

pub use skyward_link::{ConnectionInfo, ConnectionState};
pub use skyward_planner::{Plan, SchedulingConstraints};
pub use skyward_sequencer::{ExecutionEvent, ExecutionProgress, ExecutionSummary, GlobalState, Phase};
