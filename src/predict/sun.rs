use chrono::{DateTime, Utc};

const EARTH_RADIUS_KM: f64 = 6378.137;
const AU_KM: f64 = 149_597_870.7;
const J2000_UNIX_S: f64 = 946_728_000.0;

/// Low-precision geocentric solar position in the equatorial frame of date, km.
pub fn sun_position_km(at: DateTime<Utc>) -> [f64; 3] {
    let days = (at.timestamp() as f64 + at.timestamp_subsec_millis() as f64 / 1000.0
        - J2000_UNIX_S)
        / 86_400.0;
    let mean_lon = (280.460 + 0.985_647_4 * days).rem_euclid(360.0);
    let mean_anomaly = (357.528 + 0.985_600_3 * days).rem_euclid(360.0).to_radians();
    let ecliptic_lon = (mean_lon
        + 1.915 * mean_anomaly.sin()
        + 0.020 * (2.0 * mean_anomaly).sin())
    .to_radians();
    let distance_au =
        1.000_14 - 0.016_71 * mean_anomaly.cos() - 0.000_14 * (2.0 * mean_anomaly).cos();
    let obliquity = (23.439 - 0.000_000_4 * days).to_radians();

    let r = distance_au * AU_KM;
    [
        r * ecliptic_lon.cos(),
        r * obliquity.cos() * ecliptic_lon.sin(),
        r * obliquity.sin() * ecliptic_lon.sin(),
    ]
}

/// Cylindrical Earth-shadow test for an inertial satellite position (km).
pub fn is_eclipsed(sat_km: [f64; 3], sun_km: [f64; 3]) -> bool {
    let sun_norm = (sun_km[0] * sun_km[0] + sun_km[1] * sun_km[1] + sun_km[2] * sun_km[2]).sqrt();
    let sun_hat = [
        sun_km[0] / sun_norm,
        sun_km[1] / sun_norm,
        sun_km[2] / sun_norm,
    ];
    let along = sat_km[0] * sun_hat[0] + sat_km[1] * sun_hat[1] + sat_km[2] * sun_hat[2];
    if along >= 0.0 {
        return false;
    }
    let perp = [
        sat_km[0] - along * sun_hat[0],
        sat_km[1] - along * sun_hat[1],
        sat_km[2] - along * sun_hat[2],
    ];
    (perp[0] * perp[0] + perp[1] * perp[1] + perp[2] * perp[2]).sqrt() < EARTH_RADIUS_KM
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sun_near_march_equinox() {
        let at = Utc.with_ymd_and_hms(2026, 3, 20, 14, 0, 0).unwrap();
        let sun = sun_position_km(at);
        let norm = (sun[0] * sun[0] + sun[1] * sun[1] + sun[2] * sun[2]).sqrt();
        // Declination close to zero, sun along +x
        assert!((sun[2] / norm).abs() < 0.01);
        assert!(sun[0] > 0.0);
    }

    #[test]
    fn test_shadow_geometry() {
        let sun = [AU_KM, 0.0, 0.0];
        assert!(is_eclipsed([-7000.0, 0.0, 0.0], sun));
        assert!(!is_eclipsed([7000.0, 0.0, 0.0], sun));
        assert!(!is_eclipsed([-7000.0, 7000.0, 0.0], sun));
    }
}
