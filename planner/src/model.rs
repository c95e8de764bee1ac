//! Planning data model
//!
//! Everything here is plain data with serde derives so a [`Plan`] can be
//! handed to a plan store or the UI layer unchanged.

use crate::error::{PlannerError, PlannerResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Observer location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Geodetic latitude in degrees (north positive)
    pub latitude_deg: f64,
    /// Longitude in degrees (east positive)
    pub longitude_deg: f64,
    /// Elevation above sea level in meters
    pub elevation_m: f64,
    /// IANA timezone name, informational only (all computation is UTC)
    pub timezone: String,
}

impl GeoLocation {
    pub fn new(latitude_deg: f64, longitude_deg: f64, elevation_m: f64, timezone: impl Into<String>) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            elevation_m,
            timezone: timezone.into(),
        }
    }

    pub fn validate(&self) -> PlannerResult<()> {
        if !(-90.0..=90.0).contains(&self.latitude_deg) {
            return Err(PlannerError::InvalidConstraints(format!(
                "latitude {} outside [-90, 90]",
                self.latitude_deg
            )));
        }
        if !(-180.0..=360.0).contains(&self.longitude_deg) {
            return Err(PlannerError::InvalidConstraints(format!(
                "longitude {} outside [-180, 360]",
                self.longitude_deg
            )));
        }
        Ok(())
    }
}

impl Default for GeoLocation {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, "UTC")
    }
}

/// Deep-sky object classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Galaxy,
    Nebula,
    PlanetaryNebula,
    OpenCluster,
    GlobularCluster,
    SupernovaRemnant,
    Other,
}

/// A catalog target with fixed J2000 coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub catalog_id: String,
    pub name: String,
    /// Right ascension (J2000) in hours, [0, 24)
    pub ra_hours: f64,
    /// Declination (J2000) in degrees, [-90, 90]
    pub dec_degrees: f64,
    pub magnitude: f64,
    /// Apparent major axis in arcminutes
    pub size_arcmin: f64,
    pub object_type: ObjectType,
}

impl Target {
    pub fn new(
        catalog_id: impl Into<String>,
        name: impl Into<String>,
        ra_hours: f64,
        dec_degrees: f64,
        magnitude: f64,
        size_arcmin: f64,
        object_type: ObjectType,
    ) -> Self {
        Self {
            catalog_id: catalog_id.into(),
            name: name.into(),
            ra_hours,
            dec_degrees,
            magnitude,
            size_arcmin,
            object_type,
        }
    }

    /// Check coordinate ranges and finiteness
    pub fn validate(&self) -> Result<(), String> {
        if self.catalog_id.trim().is_empty() {
            return Err("empty catalog id".to_string());
        }
        if !self.ra_hours.is_finite() || !(0.0..24.0).contains(&self.ra_hours) {
            return Err(format!("RA {}h outside [0, 24)", self.ra_hours));
        }
        if !self.dec_degrees.is_finite() || !(-90.0..=90.0).contains(&self.dec_degrees) {
            return Err(format!("Dec {}° outside [-90, 90]", self.dec_degrees));
        }
        if !self.magnitude.is_finite() {
            return Err("magnitude is not finite".to_string());
        }
        if !self.size_arcmin.is_finite() || self.size_arcmin < 0.0 {
            return Err(format!("size {}' is invalid", self.size_arcmin));
        }
        Ok(())
    }
}

/// Constraints for one planning request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConstraints {
    /// Lowest usable altitude in degrees
    pub min_altitude_deg: f64,
    /// Moon illuminated fraction (0..1) above which a risen Moon blocks imaging
    pub max_moon_illumination: f64,
    pub lookahead_minutes: f64,
    pub urgency_bonus: f64,
    pub slew_seconds: f64,
    /// Desired block length per target
    pub max_target_minutes: f64,
    /// Shortest block worth scheduling
    pub min_target_minutes: f64,
    /// Cursor advance when nothing is eligible
    pub poll_step_minutes: f64,
    /// Sampling step for forward visibility runs
    pub visibility_step_minutes: f64,
    /// Field rotation ceiling in degrees per minute
    pub max_field_rotation_deg_per_min: f64,
}

impl Default for SchedulingConstraints {
    fn default() -> Self {
        Self {
            min_altitude_deg: 30.0,
            max_moon_illumination: 1.0,
            lookahead_minutes: 30.0,
            urgency_bonus: 0.2,
            slew_seconds: 60.0,
            max_target_minutes: 120.0,
            min_target_minutes: 10.0,
            poll_step_minutes: 5.0,
            visibility_step_minutes: 1.0,
            max_field_rotation_deg_per_min: 2.0,
        }
    }
}

/// Longest step, lookahead, block or slew a night can need
const MAX_SPAN_MINUTES: f64 = 24.0 * 60.0;

impl SchedulingConstraints {
    pub fn validate(&self) -> PlannerResult<()> {
        fn invalid(msg: String) -> PlannerResult<()> {
            Err(PlannerError::InvalidConstraints(msg))
        }

        if !(0.0..90.0).contains(&self.min_altitude_deg) {
            return invalid(format!("min_altitude_deg {} must be in [0, 90)", self.min_altitude_deg));
        }
        if !(0.0..=1.0).contains(&self.max_moon_illumination) {
            return invalid(format!(
                "max_moon_illumination {} must be in [0, 1]",
                self.max_moon_illumination
            ));
        }
        if !(0.0..=MAX_SPAN_MINUTES).contains(&self.lookahead_minutes) {
            return invalid(format!(
                "lookahead_minutes {} must be in [0, {}]",
                self.lookahead_minutes, MAX_SPAN_MINUTES
            ));
        }
        if !(self.urgency_bonus >= 0.0) {
            return invalid(format!("urgency_bonus {} must be >= 0", self.urgency_bonus));
        }
        if !(0.0..=MAX_SPAN_MINUTES * 60.0).contains(&self.slew_seconds) {
            return invalid(format!(
                "slew_seconds {} must be in [0, {}]",
                self.slew_seconds,
                MAX_SPAN_MINUTES * 60.0
            ));
        }
        if !(self.min_target_minutes >= 0.0)
            || !(self.max_target_minutes > 0.0)
            || self.max_target_minutes > MAX_SPAN_MINUTES
        {
            return invalid(format!("target durations must be in (0, {}] minutes", MAX_SPAN_MINUTES));
        }
        if self.min_target_minutes > self.max_target_minutes {
            return invalid(format!(
                "min_target_minutes {} exceeds max_target_minutes {}",
                self.min_target_minutes, self.max_target_minutes
            ));
        }
        for (name, step) in [
            ("poll_step_minutes", self.poll_step_minutes),
            ("visibility_step_minutes", self.visibility_step_minutes),
        ] {
            if !(step > 0.0 && step <= MAX_SPAN_MINUTES) {
                return invalid(format!("{} {} must be in (0, {}]", name, step, MAX_SPAN_MINUTES));
            }
        }
        if !(self.max_field_rotation_deg_per_min > 0.0) {
            return invalid("max_field_rotation_deg_per_min must be > 0".to_string());
        }
        Ok(())
    }
}

/// Optics and sensor characteristics used for framing and frame counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentProfile {
    pub fov_width_arcmin: f64,
    pub fov_height_arcmin: f64,
    /// Per-frame readout and download time in seconds
    pub readout_overhead_seconds: f64,
}

impl Default for InstrumentProfile {
    fn default() -> Self {
        Self {
            fov_width_arcmin: 77.4,
            fov_height_arcmin: 43.8,
            readout_overhead_seconds: 2.0,
        }
    }
}

impl InstrumentProfile {
    pub fn diagonal_arcmin(&self) -> f64 {
        self.fov_width_arcmin.hypot(self.fov_height_arcmin)
    }

    pub fn validate(&self) -> PlannerResult<()> {
        if !(self.fov_width_arcmin > 0.0) || !(self.fov_height_arcmin > 0.0) {
            return Err(PlannerError::InvalidInstrument("field of view must be positive".to_string()));
        }
        if !(self.readout_overhead_seconds >= 0.0) {
            return Err(PlannerError::InvalidInstrument(
                "readout_overhead_seconds must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Components of a candidate's desirability score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub altitude: f64,
    pub rotation: f64,
    pub duration: f64,
    pub visibility: f64,
    pub weather: f64,
    pub brightness: f64,
    pub size: f64,
    pub object: f64,
    /// Weighted sum before the urgency bonus
    pub base_total: f64,
    pub urgency_bonus: f64,
    pub total: f64,
}

/// One block in the observing plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTarget {
    pub target: Target,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_altitude_deg: f64,
    pub start_azimuth_deg: f64,
    pub end_altitude_deg: f64,
    pub end_azimuth_deg: f64,
    /// Field rotation at block start, clamped to the configured ceiling
    pub field_rotation_rate: f64,
    pub rotation_excessive: bool,
    pub exposure_seconds: f64,
    pub frame_count: u32,
    pub score: ScoreBreakdown,
}

impl ScheduledTarget {
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 1000.0
    }
}

/// Imaging window for the night
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub imaging_start: DateTime<Utc>,
    pub imaging_end: DateTime<Utc>,
}

/// Why a catalog target is absent from the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExclusionReason {
    InvalidTarget(String),
    DuplicateCatalogId,
    NoDarkness,
    NeverVisible,
    WindowTooShort,
    MoonTooBright,
    NotSelected,
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::InvalidTarget(msg) => write!(f, "invalid target: {}", msg),
            ExclusionReason::DuplicateCatalogId => write!(f, "duplicate catalog id"),
            ExclusionReason::NoDarkness => write!(f, "sky never gets dark enough on this date"),
            ExclusionReason::NeverVisible => write!(f, "never above the minimum altitude during the session"),
            ExclusionReason::WindowTooShort => write!(f, "visible window shorter than the minimum block"),
            ExclusionReason::MoonTooBright => write!(f, "only visible while the Moon was too bright"),
            ExclusionReason::NotSelected => write!(f, "visible but out-scored before the session ended"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub catalog_id: String,
    pub reason: ExclusionReason,
}

/// Ordered observing plan for one night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub location: GeoLocation,
    pub date: NaiveDate,
    pub window: Option<SessionWindow>,
    pub targets: Vec<ScheduledTarget>,
    pub exclusions: Vec<Exclusion>,
    pub slew_seconds: f64,
    pub generated_at: DateTime<Utc>,
}

impl Plan {
    pub fn empty(location: GeoLocation, date: NaiveDate, slew_seconds: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            location,
            date,
            window: None,
            targets: Vec::new(),
            exclusions: Vec::new(),
            slew_seconds,
            generated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Total scheduled imaging time in seconds
    pub fn total_imaging_secs(&self) -> f64 {
        self.targets.iter().map(|t| t.duration_secs()).sum()
    }

    /// List ordering, spacing and uniqueness violations. Empty when the plan is well formed.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut seen = HashSet::new();
        let slew = chrono::Duration::milliseconds((self.slew_seconds * 1000.0).round() as i64);

        for (i, entry) in self.targets.iter().enumerate() {
            if entry.end_time < entry.start_time {
                violations.push(format!("entry {} ({}) ends before it starts", i, entry.target.catalog_id));
            }
            if !seen.insert(entry.target.catalog_id.as_str()) {
                violations.push(format!("duplicate catalog id {}", entry.target.catalog_id));
            }
            if !entry.field_rotation_rate.is_finite() || entry.field_rotation_rate < 0.0 {
                violations.push(format!(
                    "entry {} ({}) has invalid field rotation {}",
                    i, entry.target.catalog_id, entry.field_rotation_rate
                ));
            }
            if i > 0 {
                let prev = &self.targets[i - 1];
                if entry.start_time < prev.end_time + slew {
                    violations.push(format!(
                        "entry {} ({}) starts {} before previous end + slew {}",
                        i,
                        entry.target.catalog_id,
                        entry.start_time,
                        prev.end_time + slew
                    ));
                }
            }
        }

        violations
    }
}
