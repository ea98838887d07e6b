mod control;
mod driver;
mod error;
mod optimizer;

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::transport::SerialSettings;

pub use control::RotatorHandle;
pub use driver::Gs232Rotator;
pub use error::RotatorError;
pub use optimizer::{PassPlan, RouteOptimizer};

/// Mechanical travel of the rotator, in degrees.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct RotatorLimits {
    #[serde(default)]
    pub az_min: f64,
    #[serde(default = "default_az_max")]
    pub az_max: f64,
    #[serde(default)]
    pub el_min: f64,
    #[serde(default = "default_el_max")]
    pub el_max: f64,
}

impl Default for RotatorLimits {
    fn default() -> Self {
        Self {
            az_min: 0.0,
            az_max: default_az_max(),
            el_min: 0.0,
            el_max: default_el_max(),
        }
    }
}

impl RotatorLimits {
    pub fn validate(&self) -> Result<(), RotatorError> {
        if self.az_min >= self.az_max || self.el_min >= self.el_max {
            return Err(RotatorError::InvalidLimits(format!(
                "az {}..{} el {}..{}",
                self.az_min, self.az_max, self.el_min, self.el_max
            )));
        }
        if self.az_max - self.az_min < 360.0 {
            return Err(RotatorError::InvalidLimits(format!(
                "azimuth travel {}° is less than a full turn",
                self.az_max - self.az_min
            )));
        }
        Ok(())
    }

    /// Rounds to whole degrees, then clamps into the mechanical range.
    pub fn clamp(&self, azimuth_deg: f64, elevation_deg: f64) -> (i32, i32) {
        let az = azimuth_deg.round().clamp(self.az_min, self.az_max);
        let el = elevation_deg.round().clamp(self.el_min, self.el_max);
        (az as i32, el as i32)
    }
}

fn default_az_max() -> f64 {
    450.0
}

fn default_el_max() -> f64 {
    180.0
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RotatorSettings {
    #[serde(flatten)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub limits: RotatorLimits,
    #[serde(default = "default_min_elevation")]
    pub min_elevation_deg: f64,
    #[serde(default)]
    pub park_azimuth_deg: f64,
    #[serde(default)]
    pub park_elevation_deg: f64,
    #[serde(default = "default_poll_interval", with = "crate::config::duration")]
    pub poll_interval: Duration,
    #[serde(default = "default_cache_window", with = "crate::config::duration")]
    pub cache_window: Duration,
    #[serde(default = "default_look_ahead", with = "crate::config::duration")]
    pub look_ahead: Duration,
    #[serde(default = "default_sample_interval", with = "crate::config::duration")]
    pub sample_interval: Duration,
    /// Derive look-ahead and sample interval from the shape of each pass.
    #[serde(default)]
    pub adaptive: bool,
}

fn default_min_elevation() -> f64 {
    5.0
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_cache_window() -> Duration {
    Duration::from_millis(500)
}

fn default_look_ahead() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

/// Last position read from the rotator, shared with the telemetry task.
#[derive(Debug)]
pub struct PositionCache {
    window: Duration,
    last: Mutex<Option<(Instant, Position)>>,
}

impl PositionCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    /// Cached position if it was read within the cache window.
    pub fn fresh(&self) -> Option<Position> {
        let guard = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        (*guard)
            .filter(|(at, _)| at.elapsed() < self.window)
            .map(|(_, pos)| pos)
    }

    /// Last known position regardless of age.
    pub fn last(&self) -> Option<Position> {
        let guard = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        (*guard).map(|(_, pos)| pos)
    }

    pub fn store(&self, position: Position) {
        let mut guard = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some((Instant::now(), position));
    }
}
