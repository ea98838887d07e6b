use chrono::{DateTime, Utc};
use sgp4::{Constants, Elements};

use super::ground_station::{ecef_to_geodetic, EARTH_ROTATION_RAD_S};
use super::pass_finder::find_next_pass;
use super::sun::{is_eclipsed, sun_position_km};
use super::{parse_tle_lines, Ephemeris, GroundStation, LookAngles, PassWindow, PredictError};

/// Ephemeris backed by SGP4 propagation of a two-line element set.
pub struct Sgp4Ephemeris {
    station: GroundStation,
    elements: Elements,
    constants: Constants,
}

impl Sgp4Ephemeris {
    pub fn from_tle(tle: &str, station: GroundStation) -> Result<Self, PredictError> {
        let (name, line1, line2) = parse_tle_lines(tle)?;
        let elements = Elements::from_tle(name, line1.as_bytes(), line2.as_bytes())
            .map_err(|e| PredictError::InvalidTle(e.to_string()))?;
        let constants = Constants::from_elements(&elements)
            .map_err(|e| PredictError::InvalidTle(e.to_string()))?;
        Ok(Self {
            station,
            elements,
            constants,
        })
    }

    pub fn object_name(&self) -> Option<&str> {
        self.elements.object_name.as_deref()
    }

    fn orbital_period_s(&self) -> f64 {
        // mean motion is in revolutions per day
        if self.elements.mean_motion > 0.0 {
            86_400.0 / self.elements.mean_motion
        } else {
            0.0
        }
    }
}

impl Ephemeris for Sgp4Ephemeris {
    fn look_at(&self, at: DateTime<Utc>) -> Result<LookAngles, PredictError> {
        let minutes = self
            .elements
            .datetime_to_minutes_since_epoch(&at.naive_utc())
            .map_err(|e| PredictError::Propagation(e.to_string()))?;

        let prediction = self
            .constants
            .propagate(minutes)
            .map_err(|e| PredictError::Propagation(e.to_string()))?;

        let sidereal =
            sgp4::iau_epoch_to_sidereal_time(sgp4::julian_years_since_j2000(&at.naive_utc()));

        let sat_ecef = teme_to_ecef_position(prediction.position, sidereal);
        let sat_vel_ecef = teme_to_ecef_velocity(prediction.position, prediction.velocity, sidereal);

        let sta_ecef = self.station.position_ecef_km();
        let sta_vel = self.station.velocity_ecef_km_s();

        let dr = sub(sat_ecef, sta_ecef);
        let range_km = norm(dr);

        let (east, north, up) = ecef_to_enu(dr, self.station.lat_rad(), self.station.lon_rad());
        let azimuth = east.atan2(north).to_degrees().rem_euclid(360.0);
        let elevation = if range_km > 0.0 {
            (up / range_km).asin().to_degrees()
        } else {
            0.0
        };

        let rel_vel = sub(sat_vel_ecef, sta_vel);
        let range_rate_km_s = if range_km > 0.0 {
            dot(rel_vel, dr) / range_km
        } else {
            0.0
        };

        let (sub_lat, sub_lon, height_km) = ecef_to_geodetic(sat_ecef);

        Ok(LookAngles {
            timestamp: at,
            azimuth_deg: azimuth,
            elevation_deg: elevation,
            range_km,
            range_rate_m_s: range_rate_km_s * 1000.0,
            sub_lat_deg: sub_lat,
            sub_lon_deg: sub_lon,
            height_km,
            eclipsed: is_eclipsed(prediction.position, sun_position_km(at)),
            orbital_period_s: self.orbital_period_s(),
        })
    }

    fn next_pass(&self, from: DateTime<Utc>) -> Result<Option<PassWindow>, PredictError> {
        find_next_pass(self, from, self.orbital_period_s())
    }
}

pub fn teme_to_ecef_position(pos_teme: [f64; 3], gmst: f64) -> [f64; 3] {
    let cos_gmst = gmst.cos();
    let sin_gmst = gmst.sin();
    [
        pos_teme[0] * cos_gmst + pos_teme[1] * sin_gmst,
        -pos_teme[0] * sin_gmst + pos_teme[1] * cos_gmst,
        pos_teme[2],
    ]
}

pub fn teme_to_ecef_velocity(pos_teme: [f64; 3], vel_teme: [f64; 3], gmst: f64) -> [f64; 3] {
    let pos = teme_to_ecef_position(pos_teme, gmst);
    let rotated = teme_to_ecef_position(vel_teme, gmst);
    [
        rotated[0] + EARTH_ROTATION_RAD_S * pos[1],
        rotated[1] - EARTH_ROTATION_RAD_S * pos[0],
        rotated[2],
    ]
}

pub fn ecef_to_enu(dr: [f64; 3], lat_rad: f64, lon_rad: f64) -> (f64, f64, f64) {
    let sin_lat = lat_rad.sin();
    let cos_lat = lat_rad.cos();
    let sin_lon = lon_rad.sin();
    let cos_lon = lon_rad.cos();

    let east = -sin_lon * dr[0] + cos_lon * dr[1];
    let north = -sin_lat * cos_lon * dr[0] - sin_lat * sin_lon * dr[1] + cos_lat * dr[2];
    let up = cos_lat * cos_lon * dr[0] + cos_lat * sin_lon * dr[1] + sin_lat * dr[2];
    (east, north, up)
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}
