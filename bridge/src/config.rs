//! Application configuration
//!
//! One JSON document groups the settings of every component. Missing keys
//! take their defaults, so a file only needs what differs.

use crate::error::{BridgeError, BridgeResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use skyward_link::{LinkConfig, DEFAULT_PORT};
use skyward_planner::{GeoLocation, SchedulerConfig};
use skyward_sequencer::ExecutorConfig;
use std::path::{Path, PathBuf};

/// Where to reach the telescope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelescopeConfig {
    pub host: String,
    pub port: u16,
    /// Connect when the service starts
    pub auto_connect: bool,
}

impl Default for TelescopeConfig {
    fn default() -> Self {
        Self {
            host: "seestar.local".to_string(),
            port: DEFAULT_PORT,
            auto_connect: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkywardConfig {
    pub location: GeoLocation,
    pub telescope: TelescopeConfig,
    pub link: LinkConfig,
    pub executor: ExecutorConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    /// Directory for saved plans; plans are kept in memory only when unset
    pub plan_directory: Option<PathBuf>,
}

impl SkywardConfig {
    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> BridgeResult<Self> {
        let config: SkywardConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        self.location.validate()?;
        self.scheduler.validate()?;
        self.link.validate().map_err(BridgeError::Config)?;
        self.executor.validate().map_err(BridgeError::Config)?;
        self.logging.validate().map_err(BridgeError::Config)?;
        if self.telescope.host.trim().is_empty() {
            return Err(BridgeError::Config("telescope.host must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyward_planner::PlannerError;

    #[test]
    fn test_defaults_are_valid() {
        let config = SkywardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.telescope.port, 4700);
        assert_eq!(config.executor.retry.max_attempts, 3);
        assert_eq!(config.logging.retain_days, 7);
    }

    #[test]
    fn test_partial_document() {
        let config = SkywardConfig::from_json(
            r#"{
                "location": {"latitude_deg": 40.0, "longitude_deg": -105.0, "elevation_m": 1600.0, "timezone": "America/Denver"},
                "telescope": {"host": "192.168.1.50"},
                "executor": {"poll_interval_ms": 500},
                "scheduler": {"constraints": {"min_altitude_deg": 25.0}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.location.latitude_deg, 40.0);
        assert_eq!(config.telescope.host, "192.168.1.50");
        assert_eq!(config.telescope.port, 4700);
        assert_eq!(config.executor.poll_interval_ms, 500);
        assert_eq!(config.executor.slew_timeout_secs, 180);
        assert_eq!(config.scheduler.constraints.min_altitude_deg, 25.0);
        assert_eq!(config.scheduler.constraints.lookahead_minutes, 30.0);
        assert_eq!(config.link.command_timeout_ms, 10_000);
    }

    #[test]
    fn test_invalid_documents() {
        let err = SkywardConfig::from_json(
            r#"{"location": {"latitude_deg": 120.0, "longitude_deg": 0.0, "elevation_m": 0.0, "timezone": "UTC"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::Planner(PlannerError::InvalidConstraints(_))));

        let err = SkywardConfig::from_json(r#"{"link": {"command_timeout_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));

        let err = SkywardConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("skyward-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"telescope": {"port": 4701}}"#).unwrap();
        let config = SkywardConfig::load(&path).unwrap();
        assert_eq!(config.telescope.port, 4701);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(SkywardConfig::load(&path), Err(BridgeError::Config(_))));
    }
}
