//! Visibility oracle
//!
//! Answers "where is this target, is it usable, and for how long" for a site
//! and instant, plus the night's twilight boundaries.
//!
//! Threshold logic uses geometric altitude. Refraction is available through
//! [`apparent_altitude`] for display.

use crate::astro::{self, Equatorial, HorizontalPosition};
use crate::model::{GeoLocation, SessionWindow, Target};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Solar altitude at sunset/sunrise
pub const SUNSET_ALTITUDE: f64 = 0.0;
pub const CIVIL_TWILIGHT_ALTITUDE: f64 = -6.0;
pub const NAUTICAL_TWILIGHT_ALTITUDE: f64 = -12.0;
pub const ASTRONOMICAL_TWILIGHT_ALTITUDE: f64 = -18.0;

/// Coarse sampling step for twilight searches
const TWILIGHT_SAMPLE_MINUTES: i64 = 1;

/// Twilight boundaries for one night. `None` when the threshold is never crossed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TwilightTimes {
    pub sunset: Option<DateTime<Utc>>,
    pub civil_dusk: Option<DateTime<Utc>>,
    pub nautical_dusk: Option<DateTime<Utc>>,
    pub astronomical_dusk: Option<DateTime<Utc>>,
    pub astronomical_dawn: Option<DateTime<Utc>>,
    pub nautical_dawn: Option<DateTime<Utc>>,
    pub civil_dawn: Option<DateTime<Utc>>,
    pub sunrise: Option<DateTime<Utc>>,
}

/// Field rotation rate for an alt-az mount
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRotation {
    /// Degrees per minute, finite and never above the ceiling
    pub deg_per_min: f64,
    /// True when the raw rate exceeded the ceiling or was not finite
    pub excessive: bool,
}

/// Forward visibility from a starting instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibilityRun {
    /// Length of the contiguous visible run, in minutes
    pub visible_minutes: f64,
    /// First sample below the threshold, `None` if still visible at the horizon
    pub closes_at: Option<DateTime<Utc>>,
}

impl VisibilityRun {
    pub fn is_empty(&self) -> bool {
        self.visible_minutes <= 0.0
    }
}

// ============================================================================
// Positions
// ============================================================================

/// Topocentric horizontal position of a catalog target
pub fn position(target: &Target, time: DateTime<Utc>, location: &GeoLocation) -> HorizontalPosition {
    let jd = astro::julian_day(&time);
    let apparent = astro::apparent_place(Equatorial::from_hours(target.ra_hours, target.dec_degrees), jd);
    let lst = astro::local_sidereal_deg(jd, location.longitude_deg);
    let (altitude_deg, azimuth_deg) = astro::equatorial_to_horizontal(apparent, location.latitude_deg, lst);

    HorizontalPosition {
        altitude_deg,
        azimuth_deg,
        distance_au: astro::FAR_FIELD_DISTANCE_AU,
    }
}

pub fn altitude(target: &Target, time: DateTime<Utc>, location: &GeoLocation) -> f64 {
    position(target, time, location).altitude_deg
}

/// Altitude with Bennett refraction applied
pub fn apparent_altitude(target: &Target, time: DateTime<Utc>, location: &GeoLocation) -> f64 {
    let geometric = altitude(target, time, location);
    geometric + astro::bennett_refraction(geometric)
}

pub fn is_visible(target: &Target, time: DateTime<Utc>, location: &GeoLocation, min_altitude: f64) -> bool {
    altitude(target, time, location) >= min_altitude
}

fn body_altitude(coords: Equatorial, time: DateTime<Utc>, location: &GeoLocation) -> f64 {
    let jd = astro::julian_day(&time);
    let lst = astro::local_sidereal_deg(jd, location.longitude_deg);
    astro::equatorial_to_horizontal(coords, location.latitude_deg, lst).0
}

pub fn sun_altitude(time: DateTime<Utc>, location: &GeoLocation) -> f64 {
    body_altitude(astro::sun_position(astro::julian_day(&time)), time, location)
}

/// Geocentric altitude of the Moon (parallax ignored)
pub fn moon_altitude(time: DateTime<Utc>, location: &GeoLocation) -> f64 {
    body_altitude(astro::moon_position(astro::julian_day(&time)), time, location)
}

/// Illuminated fraction of the Moon in [0, 1]
pub fn moon_illumination(time: DateTime<Utc>) -> f64 {
    astro::moon_illuminated_fraction(astro::julian_day(&time))
}

/// Angular distance between a target and the Moon in degrees
pub fn moon_separation(target: &Target, time: DateTime<Utc>) -> f64 {
    let jd = astro::julian_day(&time);
    let apparent = astro::apparent_place(Equatorial::from_hours(target.ra_hours, target.dec_degrees), jd);
    astro::angular_separation(apparent, astro::moon_position(jd))
}

// ============================================================================
// Field rotation and forward visibility
// ============================================================================

/// Alt-az field rotation rate, clamped to `ceiling_deg_per_min`
pub fn field_rotation_rate(
    latitude_deg: f64,
    altitude_deg: f64,
    azimuth_deg: f64,
    ceiling_deg_per_min: f64,
) -> FieldRotation {
    if azimuth_deg.rem_euclid(180.0) == 0.0 {
        return FieldRotation {
            deg_per_min: 0.0,
            excessive: false,
        };
    }

    let raw = 15.0 * latitude_deg.to_radians().cos() * azimuth_deg.to_radians().sin().abs()
        / altitude_deg.to_radians().cos()
        / 60.0;
    let raw = raw.abs();

    if !raw.is_finite() || raw > ceiling_deg_per_min {
        FieldRotation {
            deg_per_min: ceiling_deg_per_min,
            excessive: true,
        }
    } else {
        FieldRotation {
            deg_per_min: raw,
            excessive: false,
        }
    }
}

fn minutes(value: f64) -> Duration {
    Duration::milliseconds((value * 60_000.0).round() as i64)
}

/// Walk forward from `from` in `step_minutes` increments up to `horizon_minutes`
/// and report how long the target stays at or above `min_altitude`.
pub fn visibility_run(
    target: &Target,
    from: DateTime<Utc>,
    location: &GeoLocation,
    min_altitude: f64,
    step_minutes: f64,
    horizon_minutes: f64,
) -> VisibilityRun {
    if !is_visible(target, from, location, min_altitude) {
        return VisibilityRun {
            visible_minutes: 0.0,
            closes_at: Some(from),
        };
    }
    if !(step_minutes > 0.0) || !(horizon_minutes > 0.0) {
        return VisibilityRun {
            visible_minutes: 0.0,
            closes_at: None,
        };
    }

    let steps = (horizon_minutes / step_minutes).floor() as u64;
    for k in 1..=steps {
        let sample = from + minutes(k as f64 * step_minutes);
        if !is_visible(target, sample, location, min_altitude) {
            return VisibilityRun {
                visible_minutes: (k - 1) as f64 * step_minutes,
                closes_at: Some(sample),
            };
        }
    }

    VisibilityRun {
        visible_minutes: steps as f64 * step_minutes,
        closes_at: None,
    }
}

// ============================================================================
// Twilight
// ============================================================================

fn signed_longitude(longitude_deg: f64) -> f64 {
    if longitude_deg > 180.0 {
        longitude_deg - 360.0
    } else {
        longitude_deg
    }
}

/// Local solar noon of `date` through local solar noon of the next day
pub fn night_window(location: &GeoLocation, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::default()));
    let offset_hours = signed_longitude(location.longitude_deg) / 15.0;
    let start = midnight + Duration::hours(12) - minutes(offset_hours * 60.0);
    (start, start + Duration::hours(24))
}

/// Solar altitude sampled once per minute across the night window
struct SolarTrack {
    times: Vec<DateTime<Utc>>,
    altitudes: Vec<f64>,
}

impl SolarTrack {
    fn sample(location: &GeoLocation, date: NaiveDate) -> Self {
        let (start, end) = night_window(location, date);
        let count = ((end - start).num_minutes() / TWILIGHT_SAMPLE_MINUTES) as usize + 1;

        let mut times = Vec::with_capacity(count);
        let mut altitudes = Vec::with_capacity(count);
        for i in 0..count {
            let t = start + Duration::minutes(i as i64 * TWILIGHT_SAMPLE_MINUTES);
            times.push(t);
            altitudes.push(sun_altitude(t, location));
        }

        Self { times, altitudes }
    }

    /// First interval index where the Sun goes from >= threshold to below it
    fn downward_crossing(&self, threshold: f64, from: usize) -> Option<usize> {
        (from..self.altitudes.len().saturating_sub(1))
            .find(|&i| self.altitudes[i] >= threshold && self.altitudes[i + 1] < threshold)
    }

    fn upward_crossing(&self, threshold: f64, from: usize) -> Option<usize> {
        (from..self.altitudes.len().saturating_sub(1))
            .find(|&i| self.altitudes[i] < threshold && self.altitudes[i + 1] >= threshold)
    }

    /// Bisect inside interval `i` down to one second. Returns the first second
    /// on the far side of the threshold.
    fn refine(&self, i: usize, threshold: f64, location: &GeoLocation) -> DateTime<Utc> {
        let base = self.times[i];
        let was_above = self.altitudes[i] >= threshold;
        let (mut lo, mut hi) = (0i64, TWILIGHT_SAMPLE_MINUTES * 60);

        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            let above = sun_altitude(base + Duration::seconds(mid), location) >= threshold;
            if above == was_above {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        base + Duration::seconds(hi)
    }

    /// (dusk, dawn) crossings of `threshold`
    fn crossings(&self, threshold: f64, location: &GeoLocation) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let dusk_idx = self.downward_crossing(threshold, 0);
        let dawn_idx = self.upward_crossing(threshold, dusk_idx.unwrap_or(0));
        (
            dusk_idx.map(|i| self.refine(i, threshold, location)),
            dawn_idx.map(|i| self.refine(i, threshold, location)),
        )
    }
}

/// Sunset, twilight and sunrise boundaries for the night starting on `date`
pub fn twilight_times(location: &GeoLocation, date: NaiveDate) -> TwilightTimes {
    let track = SolarTrack::sample(location, date);

    let (sunset, sunrise) = track.crossings(SUNSET_ALTITUDE, location);
    let (civil_dusk, civil_dawn) = track.crossings(CIVIL_TWILIGHT_ALTITUDE, location);
    let (nautical_dusk, nautical_dawn) = track.crossings(NAUTICAL_TWILIGHT_ALTITUDE, location);
    let (astronomical_dusk, astronomical_dawn) = track.crossings(ASTRONOMICAL_TWILIGHT_ALTITUDE, location);

    TwilightTimes {
        sunset,
        civil_dusk,
        nautical_dusk,
        astronomical_dusk,
        astronomical_dawn,
        nautical_dawn,
        civil_dawn,
        sunrise,
    }
}

/// Span of the night with the Sun below `threshold_deg`.
///
/// Polar night (Sun below the threshold throughout) yields the whole night
/// window. `None` when it never gets that dark.
pub fn dark_window(location: &GeoLocation, date: NaiveDate, threshold_deg: f64) -> Option<SessionWindow> {
    let track = SolarTrack::sample(location, date);
    let last = track.altitudes.len().checked_sub(1)?;

    let (start, start_idx) = if track.altitudes[0] < threshold_deg {
        (track.times[0], 0)
    } else {
        let i = track.downward_crossing(threshold_deg, 0)?;
        (track.refine(i, threshold_deg, location), i + 1)
    };

    let end = match track.upward_crossing(threshold_deg, start_idx) {
        Some(i) => track.refine(i, threshold_deg, location),
        None => track.times[last],
    };

    Some(SessionWindow {
        imaging_start: start,
        imaging_end: end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectType;

    fn boulder() -> GeoLocation {
        GeoLocation::new(40.0, -105.0, 1650.0, "America/Denver")
    }

    fn svalbard() -> GeoLocation {
        GeoLocation::new(78.0, 15.0, 10.0, "Arctic/Longyearbyen")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_refraction_lifts_only_above_horizon() {
        let loc = boulder();
        let t = Utc.with_ymd_and_hms(2026, 10, 11, 5, 0, 0).unwrap();
        let lst = astro::local_sidereal_deg(astro::julian_day(&t), loc.longitude_deg);

        // Transiting at dec 10: about 60° up, refraction near half an arcminute
        let high = Target::new("HIGH", "High", lst / 15.0, 10.0, 5.0, 10.0, ObjectType::Other);
        let lift = apparent_altitude(&high, t, &loc) - altitude(&high, t, &loc);
        assert!(lift > 0.005 && lift < 0.02, "{}", lift);

        let below = Target::new("LOW", "Low", lst / 15.0, -70.0, 5.0, 10.0, ObjectType::Other);
        assert!(altitude(&below, t, &loc) < 0.0);
        assert_eq!(apparent_altitude(&below, t, &loc), altitude(&below, t, &loc));
    }

    #[test]
    fn test_moon_separation() {
        let t = Utc.with_ymd_and_hms(2026, 10, 11, 5, 0, 0).unwrap();
        let moon = astro::moon_position(astro::julian_day(&t));
        let ra_hours = moon.ra_deg.rem_euclid(360.0) / 15.0;

        let near = Target::new("NEAR", "Near", ra_hours, moon.dec_deg, 5.0, 10.0, ObjectType::Other);
        assert!(moon_separation(&near, t) < 1.0);

        let opposite = Target::new(
            "FAR",
            "Far",
            (ra_hours + 12.0).rem_euclid(24.0),
            -moon.dec_deg,
            5.0,
            10.0,
            ObjectType::Other,
        );
        assert!(moon_separation(&opposite, t) > 179.0);
    }

    #[test]
    fn test_twilight_chronology() {
        let loc = boulder();
        let tw = twilight_times(&loc, date(2026, 3, 20));

        let dusk = [tw.sunset, tw.civil_dusk, tw.nautical_dusk, tw.astronomical_dusk];
        let dawn = [tw.astronomical_dawn, tw.nautical_dawn, tw.civil_dawn, tw.sunrise];
        assert!(dusk.iter().chain(dawn.iter()).all(|t| t.is_some()));

        for pair in dusk.windows(2).chain(dawn.windows(2)) {
            assert!(pair[0].unwrap() < pair[1].unwrap());
        }
        assert!(tw.astronomical_dusk.unwrap() < tw.astronomical_dawn.unwrap());

        // Equinox sunset near 19:08 local (01:08 UTC next day)
        let sunset = tw.sunset.unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 3, 21, 1, 8, 0).unwrap();
        assert!((sunset - expected).num_minutes().abs() <= 3);
    }

    #[test]
    fn test_twilight_boundaries_hit_their_altitudes() {
        let loc = boulder();
        let tw = twilight_times(&loc, date(2026, 3, 20));

        let checks = [
            (tw.sunset, SUNSET_ALTITUDE),
            (tw.civil_dusk, CIVIL_TWILIGHT_ALTITUDE),
            (tw.nautical_dusk, NAUTICAL_TWILIGHT_ALTITUDE),
            (tw.astronomical_dusk, ASTRONOMICAL_TWILIGHT_ALTITUDE),
            (tw.astronomical_dawn, ASTRONOMICAL_TWILIGHT_ALTITUDE),
            (tw.sunrise, SUNSET_ALTITUDE),
        ];
        for (time, expected) in checks {
            let alt = sun_altitude(time.unwrap(), &loc);
            assert!((alt - expected).abs() < 0.01, "{} vs {}", alt, expected);
        }

        // At any instant during dusk the deeper boundary is the lower Sun
        let at = |t: Option<DateTime<Utc>>| sun_altitude(t.unwrap(), &loc);
        assert!(at(tw.astronomical_dusk) < at(tw.nautical_dusk));
        assert!(at(tw.nautical_dusk) < at(tw.civil_dusk));
        assert!(at(tw.civil_dusk) < at(tw.sunset));
    }

    #[test]
    fn test_midnight_sun_has_no_boundaries() {
        let loc = svalbard();
        let tw = twilight_times(&loc, date(2026, 6, 21));
        assert_eq!(tw, TwilightTimes::default());
        assert!(dark_window(&loc, date(2026, 6, 21), ASTRONOMICAL_TWILIGHT_ALTITUDE).is_none());
    }

    #[test]
    fn test_polar_night_has_no_sunset() {
        let loc = svalbard();
        let tw = twilight_times(&loc, date(2026, 12, 21));
        assert!(tw.sunset.is_none());
        assert!(tw.sunrise.is_none());
        assert!(tw.civil_dusk.is_none());
        assert!(tw.astronomical_dusk.is_some());

        // Sun never rises above -6 degrees: the whole night is darker than civil twilight
        let (start, end) = night_window(&loc, date(2026, 12, 21));
        let window = dark_window(&loc, date(2026, 12, 21), CIVIL_TWILIGHT_ALTITUDE).unwrap();
        assert_eq!(window.imaging_start, start);
        assert_eq!(window.imaging_end, end);
    }

    #[test]
    fn test_short_summer_night_never_astronomically_dark() {
        let london = GeoLocation::new(51.5, 0.0, 20.0, "Europe/London");
        let tw = twilight_times(&london, date(2026, 6, 21));
        assert!(tw.nautical_dusk.is_some());
        assert!(tw.astronomical_dusk.is_none());
        assert!(tw.astronomical_dawn.is_none());
        assert!(dark_window(&london, date(2026, 6, 21), ASTRONOMICAL_TWILIGHT_ALTITUDE).is_none());
    }

    #[test]
    fn test_dark_window_matches_twilight() {
        let loc = boulder();
        let tw = twilight_times(&loc, date(2026, 3, 20));
        let window = dark_window(&loc, date(2026, 3, 20), ASTRONOMICAL_TWILIGHT_ALTITUDE).unwrap();
        assert_eq!(Some(window.imaging_start), tw.astronomical_dusk);
        assert_eq!(Some(window.imaging_end), tw.astronomical_dawn);
    }

    #[test]
    fn test_field_rotation() {
        let on_meridian = field_rotation_rate(40.0, 50.0, 180.0, 2.0);
        assert_eq!(on_meridian.deg_per_min, 0.0);
        assert!(!on_meridian.excessive);
        assert_eq!(field_rotation_rate(40.0, 50.0, 0.0, 2.0).deg_per_min, 0.0);

        // 15 * cos(60) * sin(90) / cos(0) / 60
        let east = field_rotation_rate(60.0, 0.0, 90.0, 2.0);
        assert!((east.deg_per_min - 0.125).abs() < 1e-9);
        assert!(!east.excessive);

        let zenith = field_rotation_rate(40.0, 90.0, 90.0, 2.0);
        assert!(zenith.deg_per_min.is_finite());
        assert_eq!(zenith.deg_per_min, 2.0);
        assert!(zenith.excessive);

        let high = field_rotation_rate(10.0, 89.0, 270.0, 2.0);
        assert_eq!(high.deg_per_min, 2.0);
        assert!(high.excessive);
    }

    #[test]
    fn test_position_azimuth_convention() {
        // Polaris sits low in the north
        let polaris = Target::new("Polaris", "Polaris", 2.530, 89.264, 2.0, 1.0, ObjectType::Other);
        let loc = boulder();
        let t = Utc.with_ymd_and_hms(2026, 10, 20, 4, 0, 0).unwrap();
        let pos = position(&polaris, t, &loc);
        assert!((pos.altitude_deg - 40.0).abs() < 1.5);
        assert!(pos.azimuth_deg < 3.0 || pos.azimuth_deg > 357.0);
        assert_eq!(pos.distance_au, astro::FAR_FIELD_DISTANCE_AU);
    }

    #[test]
    fn test_visibility_run() {
        let loc = boulder();
        let polaris = Target::new("Polaris", "Polaris", 2.530, 89.264, 2.0, 1.0, ObjectType::Other);
        let t = Utc.with_ymd_and_hms(2026, 10, 20, 4, 0, 0).unwrap();

        // Circumpolar: visible through the whole horizon
        let run = visibility_run(&polaris, t, &loc, 30.0, 1.0, 120.0);
        assert_eq!(run.visible_minutes, 120.0);
        assert!(run.closes_at.is_none());

        // Never high enough
        let run = visibility_run(&polaris, t, &loc, 60.0, 1.0, 120.0);
        assert!(run.is_empty());
        assert_eq!(run.closes_at, Some(t));
    }

    #[test]
    fn test_visibility_run_reports_close() {
        let loc = boulder();
        let m31 = Target::new("M31", "Andromeda Galaxy", 0.712, 41.269, 3.4, 178.0, ObjectType::Galaxy);
        let t = Utc.with_ymd_and_hms(2026, 10, 20, 4, 0, 0).unwrap();
        assert!(is_visible(&m31, t, &loc, 30.0));

        let run = visibility_run(&m31, t, &loc, 30.0, 1.0, 24.0 * 60.0);
        let closes = run.closes_at.unwrap();
        assert!(closes > t);
        assert!(!is_visible(&m31, closes, &loc, 30.0));
        let last_visible = closes - Duration::minutes(1);
        assert!(is_visible(&m31, last_visible, &loc, 30.0));
        assert_eq!(run.visible_minutes, (last_visible - t).num_minutes() as f64);
    }

    #[test]
    fn test_moon_helpers_in_range() {
        let t = Utc.with_ymd_and_hms(2026, 10, 20, 4, 0, 0).unwrap();
        let k = moon_illumination(t);
        assert!((0.0..=1.0).contains(&k));
        let alt = moon_altitude(t, &boulder());
        assert!((-90.0..=90.0).contains(&alt));
    }
}
