use chrono::{DateTime, Utc};
use serde::Serialize;

/// Satellite position relative to the observer at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LookAngles {
    pub timestamp: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub range_km: f64,
    /// Positive while the satellite recedes.
    pub range_rate_m_s: f64,
    pub sub_lat_deg: f64,
    pub sub_lon_deg: f64,
    pub height_km: f64,
    pub eclipsed: bool,
    pub orbital_period_s: f64,
}

/// A predicted satellite pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PassWindow {
    pub rise: DateTime<Utc>,
    pub tca: DateTime<Utc>,
    pub los: DateTime<Utc>,
    pub max_elevation_deg: f64,
}

impl PassWindow {
    /// Human countdown to the next event of this pass.
    pub fn next_event(&self, now: DateTime<Utc>) -> String {
        let (label, at) = if now < self.rise {
            ("AOS", self.rise)
        } else if now < self.tca {
            ("TCA", self.tca)
        } else {
            ("LOS", self.los)
        };
        let secs = (at - now).num_seconds().max(0);
        format!(
            "{} in {:02}:{:02}:{:02}",
            label,
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}
