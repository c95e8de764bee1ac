//! Astronomy primitives
//!
//! Low-precision algorithms from Meeus, *Astronomical Algorithms* (2nd ed.).
//! Accuracy is a few arcseconds for star places and a few tenths of a degree
//! for the Moon, which is far below what altitude thresholds need.
//!
//! All angles are degrees unless a name says otherwise.

use chrono::{DateTime, Utc};

/// Julian day of the J2000.0 epoch
pub const J2000: f64 = 2_451_545.0;

/// Julian day of the Unix epoch
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Reported distance for deep-sky targets (about 1 Gpc in AU)
pub const FAR_FIELD_DISTANCE_AU: f64 = 2.0626e14;

/// Equatorial coordinates in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equatorial {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl Equatorial {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }

    pub fn from_hours(ra_hours: f64, dec_deg: f64) -> Self {
        Self::new(ra_hours * 15.0, dec_deg)
    }
}

/// Horizontal coordinates. Azimuth is measured from north through east.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HorizontalPosition {
    pub altitude_deg: f64,
    pub azimuth_deg: f64,
    pub distance_au: f64,
}

/// Nutation terms for one instant
#[derive(Debug, Clone, Copy)]
pub struct Nutation {
    /// Nutation in longitude
    pub delta_psi: f64,
    /// Nutation in obliquity
    pub delta_epsilon: f64,
    /// True obliquity of the ecliptic
    pub true_obliquity: f64,
}

// ============================================================================
// Time
// ============================================================================

/// Julian day from a UTC instant (millisecond resolution)
pub fn julian_day(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 86_400_000.0 + UNIX_EPOCH_JD
}

/// Julian centuries since J2000.0
pub fn julian_centuries(jd: f64) -> f64 {
    (jd - J2000) / 36_525.0
}

/// Greenwich mean sidereal time in degrees
pub fn greenwich_sidereal_deg(jd: f64) -> f64 {
    let t = julian_centuries(jd);
    normalize_degrees(
        280.46061837 + 360.98564736629 * (jd - J2000) + 0.000387933 * t * t - t * t * t / 38_710_000.0,
    )
}

/// Local mean sidereal time in degrees for an east-positive longitude
pub fn local_sidereal_deg(jd: f64, longitude_deg: f64) -> f64 {
    normalize_degrees(greenwich_sidereal_deg(jd) + longitude_deg)
}

/// Wrap an angle into [0, 360)
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

// ============================================================================
// Ecliptic and reduction to apparent place
// ============================================================================

pub fn mean_obliquity(jd: f64) -> f64 {
    23.439291 - 0.0130042 * julian_centuries(jd)
}

pub fn nutation(jd: f64) -> Nutation {
    let t = julian_centuries(jd);
    let omega = (125.04452 - 1934.136261 * t).to_radians();
    let l_sun = (280.4665 + 36_000.7698 * t).to_radians();
    let l_moon = (218.3165 + 481_267.8813 * t).to_radians();

    let delta_psi = (-17.20 * omega.sin() - 1.32 * (2.0 * l_sun).sin() - 0.23 * (2.0 * l_moon).sin()
        + 0.21 * (2.0 * omega).sin())
        / 3600.0;
    let delta_epsilon = (9.20 * omega.cos() + 0.57 * (2.0 * l_sun).cos() + 0.10 * (2.0 * l_moon).cos()
        - 0.09 * (2.0 * omega).cos())
        / 3600.0;

    Nutation {
        delta_psi,
        delta_epsilon,
        true_obliquity: mean_obliquity(jd) + delta_epsilon,
    }
}

/// Precess J2000 mean coordinates to the mean equinox of `jd`
pub fn precess_from_j2000(coords: Equatorial, jd: f64) -> Equatorial {
    let t = julian_centuries(jd);
    let zeta = ((2306.2181 * t + 0.30188 * t * t + 0.017998 * t * t * t) / 3600.0).to_radians();
    let z = ((2306.2181 * t + 1.09468 * t * t + 0.018203 * t * t * t) / 3600.0).to_radians();
    let theta = ((2004.3109 * t - 0.42665 * t * t - 0.041833 * t * t * t) / 3600.0).to_radians();

    let ra0 = coords.ra_deg.to_radians();
    let dec0 = coords.dec_deg.to_radians();

    let a = dec0.cos() * (ra0 + zeta).sin();
    let b = theta.cos() * dec0.cos() * (ra0 + zeta).cos() - theta.sin() * dec0.sin();
    let c = theta.sin() * dec0.cos() * (ra0 + zeta).cos() + theta.cos() * dec0.sin();

    Equatorial {
        ra_deg: normalize_degrees((a.atan2(b) + z).to_degrees()),
        dec_deg: c.clamp(-1.0, 1.0).asin().to_degrees(),
    }
}

/// Sun's geometric true longitude
fn sun_true_longitude(jd: f64) -> f64 {
    let t = julian_centuries(jd);
    let l0 = 280.46646 + 36_000.76983 * t + 0.0003032 * t * t;
    let m = (357.52911 + 35_999.05029 * t - 0.0001537 * t * t).to_radians();
    let c = (1.914602 - 0.004817 * t - 0.000014 * t * t) * m.sin()
        + (0.019993 - 0.000101 * t) * (2.0 * m).sin()
        + 0.000289 * (3.0 * m).sin();
    normalize_degrees(l0 + c)
}

/// Nutation and annual aberration corrections, in degrees of (RA, Dec)
fn nutation_aberration_offsets(coords: Equatorial, jd: f64) -> (f64, f64) {
    let nut = nutation(jd);
    let ra = coords.ra_deg.to_radians();
    let dec = coords.dec_deg.to_radians();
    let eps = nut.true_obliquity.to_radians();

    // RA corrections diverge at the celestial poles, where RA is meaningless anyway
    let near_pole = dec.cos().abs() < 1e-9;

    let (mut d_ra, mut d_dec) = (0.0, 0.0);

    if !near_pole {
        d_ra += (eps.cos() + eps.sin() * ra.sin() * dec.tan()) * nut.delta_psi
            - (ra.cos() * dec.tan()) * nut.delta_epsilon;
    }
    d_dec += (eps.sin() * ra.cos()) * nut.delta_psi + ra.sin() * nut.delta_epsilon;

    let t = julian_centuries(jd);
    let kappa = 20.49552 / 3600.0;
    let ecc = 0.016708634 - 0.000042037 * t;
    let perihelion = (102.93735 + 1.71946 * t).to_radians();
    let sun = sun_true_longitude(jd).to_radians();

    if !near_pole {
        d_ra += (-kappa * (ra.cos() * sun.cos() * eps.cos() + ra.sin() * sun.sin())
            + ecc * kappa * (ra.cos() * perihelion.cos() * eps.cos() + ra.sin() * perihelion.sin()))
            / dec.cos();
    }
    let tilt = eps.tan() * dec.cos() - ra.sin() * dec.sin();
    d_dec += -kappa * (sun.cos() * eps.cos() * tilt + ra.cos() * dec.sin() * sun.sin())
        + ecc * kappa * (perihelion.cos() * eps.cos() * tilt + ra.cos() * dec.sin() * perihelion.sin());

    (d_ra, d_dec)
}

/// Apparent place of a J2000 catalog position at `jd`
pub fn apparent_place(j2000: Equatorial, jd: f64) -> Equatorial {
    let mean = precess_from_j2000(j2000, jd);
    let (d_ra, d_dec) = nutation_aberration_offsets(mean, jd);
    Equatorial {
        ra_deg: normalize_degrees(mean.ra_deg + d_ra),
        dec_deg: (mean.dec_deg + d_dec).clamp(-90.0, 90.0),
    }
}

fn ecliptic_to_equatorial(longitude: f64, latitude: f64, obliquity: f64) -> Equatorial {
    let lam = longitude.to_radians();
    let beta = latitude.to_radians();
    let eps = obliquity.to_radians();

    let ra = (lam.sin() * eps.cos() - beta.tan() * eps.sin()).atan2(lam.cos());
    let dec = (beta.sin() * eps.cos() + beta.cos() * eps.sin() * lam.sin())
        .clamp(-1.0, 1.0)
        .asin();

    Equatorial::new(normalize_degrees(ra.to_degrees()), dec.to_degrees())
}

// ============================================================================
// Sun and Moon
// ============================================================================

/// Apparent geocentric position of the Sun
pub fn sun_position(jd: f64) -> Equatorial {
    let t = julian_centuries(jd);
    let omega = (125.04 - 1934.136 * t).to_radians();
    let lambda = sun_true_longitude(jd) - 0.00569 - 0.00478 * omega.sin();
    let eps = mean_obliquity(jd) + 0.00256 * omega.cos();
    ecliptic_to_equatorial(lambda, 0.0, eps)
}

/// Geocentric position of the Moon from the principal periodic terms
pub fn moon_position(jd: f64) -> Equatorial {
    let d = jd - J2000;
    let mean_long = 218.316 + 13.176396 * d;
    let anomaly = (134.963 + 13.064993 * d).to_radians();
    let arg_lat = (93.272 + 13.229350 * d).to_radians();
    let elongation = (297.850 + 12.190749 * d).to_radians();
    let sun_anomaly = (357.529 + 0.98560028 * d).to_radians();

    let longitude = mean_long + 6.289 * anomaly.sin() + 1.274 * (2.0 * elongation - anomaly).sin()
        + 0.658 * (2.0 * elongation).sin()
        + 0.214 * (2.0 * anomaly).sin()
        - 0.186 * sun_anomaly.sin()
        - 0.114 * (2.0 * arg_lat).sin();
    let latitude = 5.128 * arg_lat.sin()
        + 0.281 * (anomaly + arg_lat).sin()
        + 0.278 * (anomaly - arg_lat).sin()
        + 0.173 * (2.0 * elongation - arg_lat).sin();

    ecliptic_to_equatorial(normalize_degrees(longitude), latitude, nutation(jd).true_obliquity)
}

/// Illuminated fraction of the lunar disk in [0, 1]
pub fn moon_illuminated_fraction(jd: f64) -> f64 {
    let sun = sun_position(jd);
    let moon = moon_position(jd);
    let elongation = angular_separation(sun, moon).to_radians();
    ((1.0 - elongation.cos()) / 2.0).clamp(0.0, 1.0)
}

// ============================================================================
// Coordinate conversion
// ============================================================================

/// Convert apparent equatorial coordinates to altitude/azimuth
pub fn equatorial_to_horizontal(coords: Equatorial, latitude_deg: f64, lst_deg: f64) -> (f64, f64) {
    let hour_angle = normalize_degrees(lst_deg - coords.ra_deg).to_radians();
    let dec = coords.dec_deg.to_radians();
    let lat = latitude_deg.to_radians();

    let sin_alt = lat.sin() * dec.sin() + lat.cos() * dec.cos() * hour_angle.cos();
    let altitude = sin_alt.clamp(-1.0, 1.0).asin().to_degrees();

    let y = -dec.cos() * hour_angle.sin();
    let x = dec.sin() * lat.cos() - dec.cos() * lat.sin() * hour_angle.cos();
    let azimuth = normalize_degrees(y.atan2(x).to_degrees());

    (altitude, azimuth)
}

/// Bennett's atmospheric refraction for an apparent altitude, in degrees
pub fn bennett_refraction(altitude_deg: f64) -> f64 {
    if altitude_deg < -1.0 {
        return 0.0;
    }
    let arcmin = 1.0 / (altitude_deg + 7.31 / (altitude_deg + 4.4)).to_radians().tan();
    (arcmin / 60.0).max(0.0)
}

/// Great-circle separation in degrees (haversine form)
pub fn angular_separation(a: Equatorial, b: Equatorial) -> f64 {
    let dec1 = a.dec_deg.to_radians();
    let dec2 = b.dec_deg.to_radians();
    let delta_ra = (b.ra_deg - a.ra_deg).to_radians();
    let delta_dec = (b.dec_deg - a.dec_deg).to_radians();

    let h = (delta_dec / 2.0).sin().powi(2) + dec1.cos() * dec2.cos() * (delta_ra / 2.0).sin().powi(2);
    (2.0 * h.sqrt().clamp(0.0, 1.0).asin()).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_julian_day_epochs() {
        let j2000 = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert!(approx(julian_day(&j2000), J2000, 1e-9));

        let unix = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert!(approx(julian_day(&unix), UNIX_EPOCH_JD, 1e-9));
    }

    #[test]
    fn test_greenwich_sidereal_time() {
        // Meeus example 12.a: 1987-04-10 0h UT -> 13h10m46.3668s
        let dt = Utc.with_ymd_and_hms(1987, 4, 10, 0, 0, 0).unwrap();
        assert!(approx(greenwich_sidereal_deg(julian_day(&dt)), 197.693195, 1e-4));
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert!(approx(normalize_degrees(-30.0), 330.0, 1e-12));
        assert!(approx(normalize_degrees(725.0), 5.0, 1e-12));
    }

    #[test]
    fn test_sun_position() {
        // Meeus example 25.a: 1992-10-13 0h
        let sun = sun_position(2_448_908.5);
        assert!(approx(sun.ra_deg, 198.38083, 0.01));
        assert!(approx(sun.dec_deg, -7.78507, 0.01));
    }

    #[test]
    fn test_moon_position_and_phase() {
        // Meeus examples 47.a and 48.a: 1992-04-12 0h
        let moon = moon_position(2_448_724.5);
        assert!(approx(moon.ra_deg, 134.688470, 0.3));
        assert!(approx(moon.dec_deg, 13.768368, 0.3));

        let k = moon_illuminated_fraction(2_448_724.5);
        assert!(approx(k, 0.6786, 0.01));
    }

    #[test]
    fn test_apparent_place() {
        // Meeus example 23.a: theta Persei, 2028 Nov 13.19
        let catalog = Equatorial::new(41.054063, 49.227750);
        let apparent = apparent_place(catalog, 2_462_088.69);
        assert!(approx(apparent.ra_deg, 41.5599646, 0.001));
        assert!(approx(apparent.dec_deg, 49.3520685, 0.001));
    }

    #[test]
    fn test_apparent_place_at_pole_is_finite() {
        let apparent = apparent_place(Equatorial::new(0.0, 90.0), 2_461_000.5);
        assert!(apparent.ra_deg.is_finite());
        assert!(apparent.dec_deg.is_finite());
        assert!(apparent.dec_deg <= 90.0);
    }

    #[test]
    fn test_horizontal_cardinal_points() {
        // On the meridian south of zenith
        let (alt, az) = equatorial_to_horizontal(Equatorial::new(100.0, 0.0), 45.0, 100.0);
        assert!(approx(alt, 45.0, 1e-9));
        assert!(approx(az, 180.0, 1e-9));

        // Six hours east of the meridian on the equator: rising due east
        let (alt, az) = equatorial_to_horizontal(Equatorial::new(190.0, 0.0), 45.0, 100.0);
        assert!(approx(alt, 0.0, 1e-9));
        assert!(approx(az, 90.0, 1e-9));

        // Celestial pole sits due north at the latitude's altitude
        let (alt, _) = equatorial_to_horizontal(Equatorial::new(0.0, 90.0), 52.0, 33.0);
        assert!(approx(alt, 52.0, 1e-9));
    }

    #[test]
    fn test_bennett_refraction() {
        assert!(approx(bennett_refraction(0.0), 0.575, 0.01));
        assert!(bennett_refraction(90.0) < 0.001);
        assert_eq!(bennett_refraction(-5.0), 0.0);
    }

    #[test]
    fn test_angular_separation() {
        let a = Equatorial::new(0.0, 0.0);
        assert!(approx(angular_separation(a, Equatorial::new(90.0, 0.0)), 90.0, 1e-9));
        assert!(approx(angular_separation(a, Equatorial::new(0.0, 90.0)), 90.0, 1e-9));
        assert!(approx(angular_separation(a, a), 0.0, 1e-12));
    }
}
