//! Telescope link
//!
//! TCP JSON-RPC client for Seestar-class smart telescopes.
//!
//! ## Features
//!
//! - Request/reply correlation by id through a pending-request table
//! - One request in flight at a time
//! - Per-command timeouts that leave the connection usable
//! - Exponential backoff with jitter when the socket drops
//! - Device events forwarded on a broadcast channel

mod client;
mod error;
pub mod protocol;

pub use client::*;
pub use error::{LinkError, LinkResult};
pub use protocol::{StageReport, StageStatus, ViewState, DEFAULT_PORT};

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Reconnection backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Delay after the first failed attempt
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    /// Fractional jitter applied to each delay (0.2 = ±20%)
    pub jitter_factor: f64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 3,
            jitter_factor: 0.2,
        }
    }
}

impl ReconnectionConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let max = self.max_delay_ms as f64;
        let base = (self.base_delay_ms as f64 * self.backoff_factor.powi(exponent)).min(max);

        let delay = if self.jitter_factor > 0.0 {
            let jitter = rand::thread_rng().gen_range(-self.jitter_factor..=self.jitter_factor);
            (base * (1.0 + jitter)).clamp(0.0, max)
        } else {
            base
        };

        Duration::from_millis(delay.round() as u64)
    }
}

/// Link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub reconnection: ReconnectionConfig,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            command_timeout_ms: 10_000,
            reconnection: ReconnectionConfig::default(),
            event_buffer: 100,
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout_ms == 0 || self.command_timeout_ms == 0 {
            return Err("link timeouts must be > 0".to_string());
        }
        if !(self.reconnection.backoff_factor >= 1.0) {
            return Err("backoff_factor must be >= 1".to_string());
        }
        if !(0.0..1.0).contains(&self.reconnection.jitter_factor) {
            return Err("jitter_factor must be in [0, 1)".to_string());
        }
        if self.event_buffer == 0 {
            return Err("event_buffer must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_without_jitter() {
        let config = ReconnectionConfig {
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 5000,
            max_attempts: 5,
            jitter_factor: 0.0,
        };

        assert_eq!(config.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(4));
        // Capped
        assert_eq!(config.calculate_delay(4), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        let config = ReconnectionConfig::default();
        for _ in 0..50 {
            let delay = config.calculate_delay(2).as_millis();
            assert!((1600..=2400).contains(&delay), "{}", delay);
        }
    }

    #[test]
    fn test_link_config_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.command_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnection.max_attempts, 3);
        assert!(config.validate().is_ok());

        let partial: LinkConfig = serde_json::from_str(r#"{"command_timeout_ms": 2500}"#).unwrap();
        assert_eq!(partial.command_timeout(), Duration::from_millis(2500));
        assert_eq!(partial.connect_timeout_ms, 10_000);
    }
}
