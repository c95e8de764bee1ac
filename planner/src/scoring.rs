//! Candidate scoring
//!
//! A candidate is a target evaluated at one instant. The total is a fixed
//! weighted blend of visibility, weather and object suitability, plus an
//! urgency bonus for targets about to drop out of reach.

use crate::model::{GeoLocation, InstrumentProfile, ScoreBreakdown, SchedulingConstraints, Target};
use crate::providers::{WeatherScoreProvider, DEFAULT_WEATHER_SCORE};
use crate::visibility::FieldRotation;
use chrono::{DateTime, Utc};
use tracing::warn;

pub const VISIBILITY_WEIGHT: f64 = 0.4;
pub const WEATHER_WEIGHT: f64 = 0.3;
pub const OBJECT_WEIGHT: f64 = 0.3;

/// Durations at or above this many minutes get full duration credit
const FULL_DURATION_MINUTES: f64 = 120.0;

/// A target evaluated at a candidate start time
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub start_time: DateTime<Utc>,
    pub duration_minutes: f64,
    pub altitude_deg: f64,
    pub rotation: FieldRotation,
    /// Minutes until the target drops below the minimum altitude, when known
    pub remaining_window_minutes: Option<f64>,
}

/// Bonus for targets whose window closes within the lookahead
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UrgencyPolicy {
    pub lookahead_minutes: f64,
    pub bonus: f64,
}

impl UrgencyPolicy {
    pub fn from_constraints(constraints: &SchedulingConstraints) -> Self {
        Self {
            lookahead_minutes: constraints.lookahead_minutes,
            bonus: constraints.urgency_bonus,
        }
    }

    pub fn bonus_for(&self, remaining_window_minutes: Option<f64>) -> f64 {
        match remaining_window_minutes {
            Some(remaining) if remaining <= self.lookahead_minutes => self.bonus,
            _ => 0.0,
        }
    }
}

/// Altitude preference: flat 45-65°, falling to 0 at the horizon and 0.5 at the zenith
pub fn altitude_score(altitude_deg: f64) -> f64 {
    let score = if altitude_deg < 45.0 {
        1.0 - (45.0 - altitude_deg) / 45.0
    } else if altitude_deg <= 65.0 {
        1.0
    } else {
        1.0 - (altitude_deg - 65.0) / 50.0
    };
    score.clamp(0.0, 1.0)
}

pub fn rotation_score(rotation: &FieldRotation) -> f64 {
    let rate = rotation.deg_per_min;
    if rotation.excessive {
        0.1
    } else if rate <= 0.5 {
        1.0
    } else if rate <= 1.0 {
        1.0 - 0.3 * (rate - 0.5) / 0.5
    } else if rate <= 2.0 {
        0.7 - 0.5 * (rate - 1.0)
    } else {
        0.1
    }
}

pub fn duration_score(duration_minutes: f64) -> f64 {
    (duration_minutes.max(0.0).min(FULL_DURATION_MINUTES)) / FULL_DURATION_MINUTES
}

pub fn brightness_score(magnitude: f64) -> f64 {
    if magnitude < 6.0 {
        1.0
    } else if magnitude < 8.0 {
        0.8
    } else if magnitude < 10.0 {
        0.6
    } else {
        0.3
    }
}

/// Framing fit of the target in the field of view
pub fn size_score(size_arcmin: f64, instrument: &InstrumentProfile) -> f64 {
    let diagonal = instrument.diagonal_arcmin();
    if !(diagonal > 0.0) {
        return 0.3;
    }
    let ratio = size_arcmin / diagonal;
    if ratio < 0.3 {
        0.4 + 2.0 * ratio
    } else if ratio <= 1.2 {
        1.0
    } else {
        (1.0 - 0.5 * (ratio - 1.2)).max(0.3)
    }
}

/// Query the weather provider, falling back to the optimistic default on any fault
pub fn resolve_weather(provider: &dyn WeatherScoreProvider, location: &GeoLocation, time: DateTime<Utc>) -> f64 {
    match provider.score(location, time) {
        Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
        Ok(score) => {
            warn!("Weather provider returned {} at {}, using default", score, time);
            DEFAULT_WEATHER_SCORE
        }
        Err(e) => {
            warn!("Weather provider failed at {}: {}, using default", time, e);
            DEFAULT_WEATHER_SCORE
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandidateScorer {
    instrument: InstrumentProfile,
    urgency: UrgencyPolicy,
}

impl CandidateScorer {
    pub fn new(instrument: InstrumentProfile, urgency: UrgencyPolicy) -> Self {
        Self { instrument, urgency }
    }

    pub fn score(&self, target: &Target, candidate: &Candidate, weather_score: f64) -> ScoreBreakdown {
        let altitude = altitude_score(candidate.altitude_deg);
        let rotation = rotation_score(&candidate.rotation);
        let duration = duration_score(candidate.duration_minutes);
        let visibility = 0.5 * altitude + 0.3 * rotation + 0.2 * duration;

        let weather = if weather_score.is_finite() {
            weather_score.clamp(0.0, 1.0)
        } else {
            DEFAULT_WEATHER_SCORE
        };

        let brightness = brightness_score(target.magnitude);
        let size = size_score(target.size_arcmin, &self.instrument);
        let object = 0.6 * brightness + 0.4 * size;

        let base_total = VISIBILITY_WEIGHT * visibility + WEATHER_WEIGHT * weather + OBJECT_WEIGHT * object;
        let urgency_bonus = self.urgency.bonus_for(candidate.remaining_window_minutes);

        ScoreBreakdown {
            altitude,
            rotation,
            duration,
            visibility,
            weather,
            brightness,
            size,
            object,
            base_total,
            urgency_bonus,
            total: base_total + urgency_bonus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::model::ObjectType;
    use chrono::TimeZone;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn gentle() -> FieldRotation {
        FieldRotation {
            deg_per_min: 0.2,
            excessive: false,
        }
    }

    #[test]
    fn test_altitude_curve() {
        assert!(approx(altitude_score(0.0), 0.0));
        assert!(approx(altitude_score(22.5), 0.5));
        assert!(approx(altitude_score(45.0), 1.0));
        assert!(approx(altitude_score(55.0), 1.0));
        assert!(approx(altitude_score(65.0), 1.0));
        assert!(approx(altitude_score(90.0), 0.5));
    }

    #[test]
    fn test_rotation_bands() {
        let r = |deg_per_min, excessive| rotation_score(&FieldRotation { deg_per_min, excessive });
        assert!(approx(r(0.0, false), 1.0));
        assert!(approx(r(0.5, false), 1.0));
        assert!(approx(r(0.75, false), 0.85));
        assert!(approx(r(1.0, false), 0.7));
        assert!(approx(r(2.0, false), 0.2));
        assert!(approx(r(2.0, true), 0.1));
    }

    #[test]
    fn test_object_terms() {
        assert_eq!(brightness_score(3.4), 1.0);
        assert_eq!(brightness_score(7.0), 0.8);
        assert_eq!(brightness_score(9.9), 0.6);
        assert_eq!(brightness_score(12.0), 0.3);

        let profile = InstrumentProfile {
            fov_width_arcmin: 60.0,
            fov_height_arcmin: 80.0,
            readout_overhead_seconds: 2.0,
        };
        // diagonal 100'
        assert!(approx(size_score(10.0, &profile), 0.6));
        assert!(approx(size_score(50.0, &profile), 1.0));
        assert!(approx(size_score(160.0, &profile), 0.8));
        assert!(approx(size_score(1000.0, &profile), 0.3));
    }

    #[test]
    fn test_duration_term() {
        assert!(approx(duration_score(60.0), 0.5));
        assert!(approx(duration_score(240.0), 1.0));
        assert!(approx(duration_score(-5.0), 0.0));
    }

    #[test]
    fn test_urgency_prefers_closing_target() {
        let policy = UrgencyPolicy {
            lookahead_minutes: 30.0,
            bonus: 0.2,
        };
        // A closes 20:30, B closes 23:00, evaluated at 20:00
        let a = 0.6 + policy.bonus_for(Some(30.0));
        let b = 0.75 + policy.bonus_for(Some(180.0));
        assert!(approx(a, 0.8));
        assert!(approx(b, 0.75));
        assert!(a > b);

        assert_eq!(policy.bonus_for(None), 0.0);
    }

    #[test]
    fn test_full_score() {
        let scorer = CandidateScorer::new(
            InstrumentProfile::default(),
            UrgencyPolicy {
                lookahead_minutes: 30.0,
                bonus: 0.2,
            },
        );
        let target = Target::new("M13", "Hercules Cluster", 16.695, 36.46, 5.8, 20.0, ObjectType::GlobularCluster);
        let candidate = Candidate {
            start_time: Utc.with_ymd_and_hms(2026, 6, 1, 4, 0, 0).unwrap(),
            duration_minutes: 120.0,
            altitude_deg: 55.0,
            rotation: gentle(),
            remaining_window_minutes: Some(20.0),
        };

        let score = scorer.score(&target, &candidate, 1.0);
        assert!(approx(score.visibility, 1.0));
        assert!(approx(score.weather, 1.0));
        // 20' against an 88.9' diagonal sits in the small-target ramp
        let size = 0.4 + 2.0 * 20.0 / InstrumentProfile::default().diagonal_arcmin();
        assert!(approx(score.size, size));
        assert!(approx(score.object, 0.6 + 0.4 * size));
        assert!(approx(score.base_total, 0.4 + 0.3 + 0.3 * score.object));
        assert!(approx(score.urgency_bonus, 0.2));
        assert!(approx(score.total, score.base_total + 0.2));
        assert!(score.total > 1.0);
    }

    struct FailingWeather;

    impl WeatherScoreProvider for FailingWeather {
        fn score(&self, _: &GeoLocation, _: DateTime<Utc>) -> Result<f64, ProviderError> {
            Err(ProviderError::Unavailable("503".to_string()))
        }
    }

    struct NanWeather;

    impl WeatherScoreProvider for NanWeather {
        fn score(&self, _: &GeoLocation, _: DateTime<Utc>) -> Result<f64, ProviderError> {
            Ok(f64::NAN)
        }
    }

    #[test]
    fn test_weather_fallbacks() {
        let loc = GeoLocation::default();
        let t = Utc.with_ymd_and_hms(2026, 6, 1, 4, 0, 0).unwrap();
        assert_eq!(resolve_weather(&FailingWeather, &loc, t), DEFAULT_WEATHER_SCORE);
        assert_eq!(resolve_weather(&NanWeather, &loc, t), DEFAULT_WEATHER_SCORE);
        assert_eq!(resolve_weather(&crate::providers::FixedWeather(1.7), &loc, t), 1.0);
        assert_eq!(resolve_weather(&crate::providers::FixedWeather(-0.2), &loc, t), 0.0);
    }
}
