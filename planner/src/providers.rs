//! Collaborator traits for catalog and weather data
//!
//! The planner never talks to a database or a forecast service directly.
//! Callers hand in implementations of these traits.

use crate::error::ProviderError;
use crate::model::{GeoLocation, ObjectType, Target};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Optimistic weather score used when no forecast is available
pub const DEFAULT_WEATHER_SCORE: f64 = 0.8;

/// Catalog query filter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogFilter {
    /// Only these object types (empty = all)
    pub object_types: Vec<ObjectType>,
    /// Faintest magnitude to include
    pub max_magnitude: Option<f64>,
    pub min_size_arcmin: Option<f64>,
    pub max_size_arcmin: Option<f64>,
}

impl CatalogFilter {
    pub fn matches(&self, target: &Target) -> bool {
        if !self.object_types.is_empty() && !self.object_types.contains(&target.object_type) {
            return false;
        }
        if let Some(max) = self.max_magnitude {
            if target.magnitude > max {
                return false;
            }
        }
        if let Some(min) = self.min_size_arcmin {
            if target.size_arcmin < min {
                return false;
            }
        }
        if let Some(max) = self.max_size_arcmin {
            if target.size_arcmin > max {
                return false;
            }
        }
        true
    }
}

/// Source of candidate targets
pub trait CatalogProvider: Send + Sync {
    fn targets(&self, filter: &CatalogFilter) -> Result<Vec<Target>, ProviderError>;
}

/// Weather quality in [0, 1] for a site and instant
pub trait WeatherScoreProvider: Send + Sync {
    fn score(&self, location: &GeoLocation, time: DateTime<Utc>) -> Result<f64, ProviderError>;
}

pub type SharedCatalog = Arc<dyn CatalogProvider>;
pub type SharedWeather = Arc<dyn WeatherScoreProvider>;

/// In-memory catalog
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    targets: Vec<Target>,
}

impl StaticCatalog {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl CatalogProvider for StaticCatalog {
    fn targets(&self, filter: &CatalogFilter) -> Result<Vec<Target>, ProviderError> {
        Ok(self.targets.iter().filter(|t| filter.matches(t)).cloned().collect())
    }
}

/// Same score everywhere, all the time
#[derive(Debug, Clone, Copy)]
pub struct FixedWeather(pub f64);

impl WeatherScoreProvider for FixedWeather {
    fn score(&self, _location: &GeoLocation, _time: DateTime<Utc>) -> Result<f64, ProviderError> {
        Ok(self.0)
    }
}

/// Stand-in for a forecast integration that has not been configured
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticWeather;

impl WeatherScoreProvider for OptimisticWeather {
    fn score(&self, _location: &GeoLocation, _time: DateTime<Utc>) -> Result<f64, ProviderError> {
        Err(ProviderError::MissingApiKey)
    }
}

/// Hour-bucketed forecast table keyed by the UTC hour start
#[derive(Debug, Clone, Default)]
pub struct HourlyWeather {
    hours: HashMap<i64, f64>,
}

impl HourlyWeather {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hour(mut self, hour_start: DateTime<Utc>, score: f64) -> Self {
        self.hours.insert(hour_start.timestamp().div_euclid(3600), score);
        self
    }
}

impl WeatherScoreProvider for HourlyWeather {
    fn score(&self, _location: &GeoLocation, time: DateTime<Utc>) -> Result<f64, ProviderError> {
        self.hours
            .get(&time.timestamp().div_euclid(3600))
            .copied()
            .ok_or_else(|| ProviderError::Unavailable(format!("no forecast for {}", time)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(vec![
            Target::new("M31", "Andromeda Galaxy", 0.712, 41.269, 3.4, 178.0, ObjectType::Galaxy),
            Target::new("M57", "Ring Nebula", 18.893, 33.029, 8.8, 1.4, ObjectType::PlanetaryNebula),
            Target::new("M13", "Hercules Cluster", 16.695, 36.460, 5.8, 20.0, ObjectType::GlobularCluster),
        ])
    }

    #[test]
    fn test_static_catalog_filters() {
        let all = catalog().targets(&CatalogFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let galaxies = catalog()
            .targets(&CatalogFilter {
                object_types: vec![ObjectType::Galaxy],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(galaxies.len(), 1);
        assert_eq!(galaxies[0].catalog_id, "M31");

        let bright_small = catalog()
            .targets(&CatalogFilter {
                max_magnitude: Some(6.0),
                max_size_arcmin: Some(30.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(bright_small.len(), 1);
        assert_eq!(bright_small[0].catalog_id, "M13");
    }

    #[test]
    fn test_weather_providers() {
        let loc = GeoLocation::default();
        let t = Utc.with_ymd_and_hms(2026, 10, 20, 21, 30, 0).unwrap();

        assert_eq!(FixedWeather(0.5).score(&loc, t).unwrap(), 0.5);
        assert_eq!(OptimisticWeather.score(&loc, t), Err(ProviderError::MissingApiKey));

        let hourly = HourlyWeather::new().with_hour(Utc.with_ymd_and_hms(2026, 10, 20, 21, 0, 0).unwrap(), 0.3);
        assert_eq!(hourly.score(&loc, t).unwrap(), 0.3);
        assert!(hourly.score(&loc, t + chrono::Duration::hours(1)).is_err());
    }
}
