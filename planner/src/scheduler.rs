//! Session scheduler
//!
//! Greedy, deterministic plan construction: at each step pick the best
//! currently observable target, book it for as long as it stays usable,
//! then move the cursor past the block plus slew time.

use crate::error::{PlannerError, PlannerResult};
use crate::model::{
    Exclusion, ExclusionReason, GeoLocation, InstrumentProfile, Plan, ScheduledTarget, SchedulingConstraints,
    SessionWindow, Target,
};
use crate::providers::{CatalogFilter, CatalogProvider, WeatherScoreProvider};
use crate::scoring::{resolve_weather, Candidate, CandidateScorer, UrgencyPolicy};
use crate::visibility::{self, ASTRONOMICAL_TWILIGHT_ALTITUDE};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info};

/// Scores closer than this are treated as equal
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub constraints: SchedulingConstraints,
    pub instrument: InstrumentProfile,
}

impl SchedulerConfig {
    pub fn validate(&self) -> PlannerResult<()> {
        self.constraints.validate()?;
        self.instrument.validate()
    }
}

/// One night's planning request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub location: GeoLocation,
    /// Civil date on which the night begins
    pub date: NaiveDate,
    pub requested_start: Option<DateTime<Utc>>,
    pub requested_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub filter: CatalogFilter,
}

impl PlanRequest {
    pub fn new(location: GeoLocation, date: NaiveDate) -> Self {
        Self {
            location,
            date,
            requested_start: None,
            requested_end: None,
            filter: CatalogFilter::default(),
        }
    }

    pub fn with_window(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.requested_start = start;
        self.requested_end = end;
        self
    }

    pub fn with_filter(mut self, filter: CatalogFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// A scored candidate at the current cursor
#[derive(Debug, Clone)]
pub(crate) struct ScoredCandidate {
    pub(crate) index: usize,
    pub(crate) catalog_id: String,
    pub(crate) total: f64,
    pub(crate) closes_at: Option<DateTime<Utc>>,
    pub(crate) candidate: Candidate,
    pub(crate) score: crate::model::ScoreBreakdown,
}

/// Preference order: higher score, then earlier window close (unknown last), then catalog id
fn preference(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    if (a.total - b.total).abs() > SCORE_EPSILON {
        return b.total.partial_cmp(&a.total).unwrap_or(Ordering::Equal);
    }
    let by_close = match (a.closes_at, b.closes_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_close.then_with(|| a.catalog_id.cmp(&b.catalog_id))
}

pub(crate) fn select_best(candidates: &[ScoredCandidate]) -> Option<&ScoredCandidate> {
    candidates.iter().min_by(|a, b| preference(a, b))
}

/// Exposure length by target brightness
pub fn exposure_for_magnitude(magnitude: f64) -> f64 {
    if magnitude < 6.0 {
        5.0
    } else if magnitude < 8.0 {
        8.0
    } else {
        10.0
    }
}

pub fn frame_count(duration_secs: f64, exposure_secs: f64, readout_secs: f64) -> u32 {
    let per_frame = exposure_secs + readout_secs;
    let frames = if per_frame > 0.0 {
        (duration_secs / per_frame).floor()
    } else {
        0.0
    };
    (frames.max(0.0) as u32).max(10)
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

fn minutes(value: f64) -> Duration {
    Duration::milliseconds((value * 60_000.0).round() as i64)
}

/// What happened to a target over the course of the loop
#[derive(Debug, Default, Clone, Copy)]
struct TargetHistory {
    observed: bool,
    ever_visible: bool,
    moon_blocked: bool,
    ever_eligible: bool,
}

impl TargetHistory {
    fn exclusion_reason(&self) -> ExclusionReason {
        if self.ever_eligible {
            ExclusionReason::NotSelected
        } else if self.moon_blocked {
            ExclusionReason::MoonTooBright
        } else if self.ever_visible {
            ExclusionReason::WindowTooShort
        } else {
            ExclusionReason::NeverVisible
        }
    }
}

/// Greedy multi-target scheduler. Holds only configuration and is safe to share.
#[derive(Debug, Clone, Default)]
pub struct SessionScheduler {
    config: SchedulerConfig,
}

impl SessionScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn generate_plan(
        &self,
        request: &PlanRequest,
        catalog: &dyn CatalogProvider,
        weather: &dyn WeatherScoreProvider,
    ) -> PlannerResult<Plan> {
        self.config.validate()?;
        request.location.validate()?;
        let constraints = &self.config.constraints;

        let raw_targets = catalog.targets(&request.filter).map_err(PlannerError::Catalog)?;
        info!(
            "Planning {} catalog targets for {} at ({:.3}, {:.3})",
            raw_targets.len(),
            request.date,
            request.location.latitude_deg,
            request.location.longitude_deg
        );

        let mut plan = Plan::empty(request.location.clone(), request.date, constraints.slew_seconds);
        let targets = screen_targets(raw_targets, &mut plan.exclusions);

        let Some(window) = self.session_window(request) else {
            info!("No astronomical darkness on {}, plan is empty", request.date);
            plan.exclusions.extend(targets.iter().map(|t| Exclusion {
                catalog_id: t.catalog_id.clone(),
                reason: ExclusionReason::NoDarkness,
            }));
            return Ok(plan);
        };
        plan.window = Some(window);

        let scorer = CandidateScorer::new(
            self.config.instrument.clone(),
            UrgencyPolicy::from_constraints(constraints),
        );
        let mut history = vec![TargetHistory::default(); targets.len()];
        let mut current = window.imaging_start;
        let end = window.imaging_end;

        while current < end && history.iter().any(|h| !h.observed) {
            let candidates = self.candidates_at(current, end, request, &targets, &mut history, &scorer, weather);

            let Some(best) = select_best(&candidates) else {
                current += minutes(constraints.poll_step_minutes);
                continue;
            };

            let target = &targets[best.index];
            match self.book(target, best, current, &request.location) {
                Some(entry) => {
                    debug!(
                        "Booked {} {} -> {} (score {:.3})",
                        target.catalog_id, entry.start_time, entry.end_time, entry.score.total
                    );
                    history[best.index].observed = true;
                    current = entry.end_time + minutes(constraints.slew_seconds / 60.0);
                    plan.targets.push(entry);
                }
                None => {
                    current += minutes(constraints.poll_step_minutes);
                }
            }
        }

        for (target, h) in targets.iter().zip(&history) {
            if !h.observed {
                plan.exclusions.push(Exclusion {
                    catalog_id: target.catalog_id.clone(),
                    reason: h.exclusion_reason(),
                });
            }
        }

        info!(
            "Plan {}: {} scheduled, {} excluded, {:.1} h imaging",
            plan.id,
            plan.targets.len(),
            plan.exclusions.len(),
            plan.total_imaging_secs() / 3600.0
        );

        Ok(plan)
    }

    /// Intersect astronomical darkness with the requested bounds
    fn session_window(&self, request: &PlanRequest) -> Option<SessionWindow> {
        let dark = visibility::dark_window(&request.location, request.date, ASTRONOMICAL_TWILIGHT_ALTITUDE)?;

        let start = match request.requested_start {
            Some(requested) => requested.max(dark.imaging_start),
            None => dark.imaging_start,
        };
        let end = match request.requested_end {
            Some(requested) => requested.min(dark.imaging_end),
            None => dark.imaging_end,
        };

        (start < end).then_some(SessionWindow {
            imaging_start: start,
            imaging_end: end,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn candidates_at(
        &self,
        current: DateTime<Utc>,
        end: DateTime<Utc>,
        request: &PlanRequest,
        targets: &[Target],
        history: &mut [TargetHistory],
        scorer: &CandidateScorer,
        weather: &dyn WeatherScoreProvider,
    ) -> Vec<ScoredCandidate> {
        let c = &self.config.constraints;
        let location = &request.location;

        let moon_blocks = c.max_moon_illumination < 1.0
            && visibility::moon_altitude(current, location) > 0.0
            && visibility::moon_illumination(current) > c.max_moon_illumination;

        let remaining_session = minutes_between(current, end);
        let horizon = c.max_target_minutes.max(c.lookahead_minutes);
        let mut weather_score = None;
        let mut candidates = Vec::new();

        for (index, target) in targets.iter().enumerate() {
            let h = &mut history[index];
            if h.observed {
                continue;
            }

            let pos = visibility::position(target, current, location);
            if pos.altitude_deg < c.min_altitude_deg {
                continue;
            }
            h.ever_visible = true;

            if moon_blocks {
                h.moon_blocked = true;
                continue;
            }

            let run = visibility::visibility_run(
                target,
                current,
                location,
                c.min_altitude_deg,
                c.visibility_step_minutes,
                horizon,
            );
            let usable = run.visible_minutes.min(c.max_target_minutes).min(remaining_session);
            if usable < c.min_target_minutes || usable <= 0.0 {
                continue;
            }
            h.ever_eligible = true;

            // A close after the session ends is not a reason to hurry
            let closes_at = run.closes_at.filter(|close| *close <= end);
            let candidate = Candidate {
                start_time: current,
                duration_minutes: usable,
                altitude_deg: pos.altitude_deg,
                rotation: visibility::field_rotation_rate(
                    location.latitude_deg,
                    pos.altitude_deg,
                    pos.azimuth_deg,
                    c.max_field_rotation_deg_per_min,
                ),
                remaining_window_minutes: closes_at.map(|close| minutes_between(current, close)),
            };

            let weather_now = *weather_score.get_or_insert_with(|| resolve_weather(weather, location, current));
            let score = scorer.score(target, &candidate, weather_now);

            candidates.push(ScoredCandidate {
                index,
                catalog_id: target.catalog_id.clone(),
                total: score.total,
                closes_at,
                candidate,
                score,
            });
        }

        candidates
    }

    /// Turn the winning candidate into a plan entry, shrinking the block
    /// until the end sample is still above the minimum altitude.
    fn book(
        &self,
        target: &Target,
        best: &ScoredCandidate,
        start: DateTime<Utc>,
        location: &GeoLocation,
    ) -> Option<ScheduledTarget> {
        let c = &self.config.constraints;
        let step = minutes(c.visibility_step_minutes);

        let mut end = start + minutes(best.candidate.duration_minutes);
        let mut end_pos = visibility::position(target, end, location);
        while end_pos.altitude_deg < c.min_altitude_deg {
            end -= step;
            if end <= start {
                return None;
            }
            end_pos = visibility::position(target, end, location);
        }

        let start_pos = visibility::position(target, start, location);
        let exposure_seconds = exposure_for_magnitude(target.magnitude);
        let duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;

        Some(ScheduledTarget {
            target: target.clone(),
            start_time: start,
            end_time: end,
            start_altitude_deg: start_pos.altitude_deg,
            start_azimuth_deg: start_pos.azimuth_deg,
            end_altitude_deg: end_pos.altitude_deg,
            end_azimuth_deg: end_pos.azimuth_deg,
            field_rotation_rate: best.candidate.rotation.deg_per_min,
            rotation_excessive: best.candidate.rotation.excessive,
            exposure_seconds,
            frame_count: frame_count(duration_secs, exposure_seconds, self.config.instrument.readout_overhead_seconds),
            score: best.score.clone(),
        })
    }
}

/// Drop invalid and duplicate entries, recording why
fn screen_targets(raw: Vec<Target>, exclusions: &mut Vec<Exclusion>) -> Vec<Target> {
    let mut seen = HashSet::new();
    let mut accepted = Vec::with_capacity(raw.len());

    for target in raw {
        if let Err(msg) = target.validate() {
            exclusions.push(Exclusion {
                catalog_id: target.catalog_id.clone(),
                reason: ExclusionReason::InvalidTarget(msg),
            });
            continue;
        }
        if !seen.insert(target.catalog_id.clone()) {
            exclusions.push(Exclusion {
                catalog_id: target.catalog_id.clone(),
                reason: ExclusionReason::DuplicateCatalogId,
            });
            continue;
        }
        accepted.push(target);
    }

    accepted
}
