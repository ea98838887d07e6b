use serde::Deserialize;
use thiserror::Error;

use crate::predict::{GroundStation, PredictError, Sgp4Ephemeris};
use crate::radio::frame::CONTROLLER_ADDRESS;
use crate::radio::{IcomRadio, RadioModel, RetryPolicy};
use crate::rotator::{RotatorError, RotatorSettings};
use crate::tracker::{SatelliteConfig, TrackerError, TrackingSettings, TransponderLeg};
use crate::transport::SerialSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid station coordinates: {0}")]
    Coordinates(String),
    #[error("unknown satellite: {0}")]
    UnknownSatellite(String),
    #[error("{satellite} has no transponder named {transponder}")]
    UnknownTransponder {
        satellite: String,
        transponder: String,
    },
    #[error("no rotator configured")]
    NoRotator,
    #[error("{0}")]
    Tracker(#[from] TrackerError),
    #[error("{0}")]
    Predict(#[from] PredictError),
    #[error("{0}")]
    Rotator(#[from] RotatorError),
}

/// Humantime strings (`"300ms"`, `"15m"`) for `std::time::Duration` fields.
pub mod duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub station: StationConfig,
    pub radio: RadioConfig,
    #[serde(default)]
    pub tracking: TrackingSettings,
    #[serde(default)]
    pub rotator: Option<RotatorSettings>,
    #[serde(default)]
    pub satellites: Vec<SatelliteEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub name: Option<String>,
    pub coordinates: String,
    #[serde(default)]
    pub altitude_m: f64,
}

impl StationConfig {
    pub fn ground_station(&self) -> Result<GroundStation, ConfigError> {
        GroundStation::from_coordinates(&self.coordinates, Some(self.altitude_m))
            .ok_or_else(|| ConfigError::Coordinates(self.coordinates.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RadioConfig {
    /// `"910"`, `"9100"` or `"9700"`.
    pub model: String,
    #[serde(flatten)]
    pub serial: SerialSettings,
    /// CI-V address; the model's default when absent.
    #[serde(default)]
    pub address: Option<u8>,
    #[serde(default = "default_controller_address")]
    pub controller_address: u8,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_controller_address() -> u8 {
    CONTROLLER_ADDRESS
}

impl RadioConfig {
    pub fn model(&self) -> Result<RadioModel, TrackerError> {
        self.model
            .parse()
            .map_err(|_| TrackerError::UnknownRadioModel(self.model.clone()))
    }

    /// Opens the serial link, falling back to dummy mode when it is unreachable.
    pub fn open(&self, model: RadioModel) -> IcomRadio {
        IcomRadio::connect(&self.serial, model, self.address)
            .with_controller_address(self.controller_address)
            .with_retry_policy(self.retry)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegEntry {
    pub frequency_hz: f64,
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransponderEntry {
    pub name: String,
    pub downlink: Option<LegEntry>,
    #[serde(default)]
    pub uplink: Option<LegEntry>,
    #[serde(default)]
    pub reversed: bool,
    #[serde(default)]
    pub cross_band: Option<bool>,
    #[serde(default)]
    pub tone_hz: Option<f64>,
    #[serde(default)]
    pub tone_squelch_hz: Option<f64>,
    #[serde(default)]
    pub calibration_hz: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SatelliteEntry {
    pub name: String,
    pub tle: String,
    #[serde(default)]
    pub transponders: Vec<TransponderEntry>,
}

impl SatelliteEntry {
    pub fn transponder(&self, name: &str) -> Result<SatelliteConfig, ConfigError> {
        let entry = self
            .transponders
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownTransponder {
                satellite: self.name.clone(),
                transponder: name.to_string(),
            })?;
        Ok(self.resolve(entry)?)
    }

    /// Turns a transponder entry into the parsed form the tracker accepts.
    pub fn resolve(&self, entry: &TransponderEntry) -> Result<SatelliteConfig, TrackerError> {
        let leg = |leg: &Option<LegEntry>| {
            leg.as_ref()
                .map(|l| TransponderLeg::new(l.frequency_hz, &l.mode))
                .transpose()
        };
        Ok(SatelliteConfig {
            name: self.name.clone(),
            transponder: entry.name.clone(),
            downlink: leg(&entry.downlink)?,
            uplink: leg(&entry.uplink)?,
            reversed: entry.reversed,
            cross_band: entry.cross_band,
            tone_hz: entry.tone_hz,
            tone_squelch_hz: entry.tone_squelch_hz,
            calibration_hz: entry.calibration_hz,
        })
    }

    pub fn ephemeris(&self, station: GroundStation) -> Result<Sgp4Ephemeris, PredictError> {
        Sgp4Ephemeris::from_tle(&self.tle, station)
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn satellite(&self, name: &str) -> Result<&SatelliteEntry, ConfigError> {
        self.satellites
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownSatellite(name.to_string()))
    }

    pub fn rotator(&self) -> Result<&RotatorSettings, ConfigError> {
        self.rotator.as_ref().ok_or(ConfigError::NoRotator)
    }

    /// Checks everything a tracking session would reject, without opening any port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let station = self.station.ground_station()?;
        self.radio.model()?;
        if let Some(rotator) = &self.rotator {
            rotator.limits.validate()?;
        }
        for satellite in &self.satellites {
            satellite.ephemeris(station)?;
            for transponder in &satellite.transponders {
                let resolved = satellite.resolve(transponder)?;
                if resolved.downlink.is_none() {
                    return Err(TrackerError::MissingDownlink {
                        satellite: resolved.name,
                        transponder: resolved.transponder,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}
