use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use super::TrackerError;
use crate::radio::{Mode, Vfo};

/// Transponders whose legs are further apart than this need both VFOs at once.
pub const CROSS_BAND_SEPARATION_HZ: f64 = 10_000_000.0;

/// One side of a transponder as seen from the satellite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransponderLeg {
    pub frequency_hz: f64,
    pub mode: Mode,
}

impl TransponderLeg {
    pub fn new(frequency_hz: f64, mode: &str) -> Result<Self, TrackerError> {
        let mode = mode
            .parse()
            .map_err(|_| TrackerError::UnsupportedMode(mode.to_string()))?;
        Ok(Self { frequency_hz, mode })
    }
}

/// A selected satellite/transponder pair, handed to the tracker already parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SatelliteConfig {
    pub name: String,
    pub transponder: String,
    pub downlink: Option<TransponderLeg>,
    pub uplink: Option<TransponderLeg>,
    /// Inverting transponder: uplink moves opposite to the downlink.
    pub reversed: bool,
    /// `None` derives the flag from the leg separation.
    pub cross_band: Option<bool>,
    pub tone_hz: Option<f64>,
    /// CTCSS decode on the receive VFO.
    pub tone_squelch_hz: Option<f64>,
    pub calibration_hz: i64,
}

impl SatelliteConfig {
    pub fn is_cross_band(&self) -> bool {
        if let Some(explicit) = self.cross_band {
            return explicit;
        }
        match (self.downlink, self.uplink) {
            (Some(down), Some(up)) => {
                (down.frequency_hz - up.frequency_hz).abs() > CROSS_BAND_SEPARATION_HZ
            }
            _ => false,
        }
    }

    pub fn vfo_strategy(&self) -> VfoStrategy {
        if self.uplink.is_none() {
            VfoStrategy::RxOnly
        } else if self.is_cross_band() {
            VfoStrategy::CrossBand
        } else {
            VfoStrategy::Split
        }
    }
}

/// How the radio's two VFOs are paired for a transponder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum VfoStrategy {
    /// Satellite mode: downlink on Main, uplink on Sub, full duplex.
    CrossBand,
    /// Split A/B on one band: receive on A, transmit on B.
    Split,
    RxOnly,
}

impl VfoStrategy {
    pub fn rx_vfo(self) -> Vfo {
        match self {
            VfoStrategy::CrossBand => Vfo::Main,
            VfoStrategy::Split | VfoStrategy::RxOnly => Vfo::A,
        }
    }

    pub fn tx_vfo(self) -> Option<Vfo> {
        match self {
            VfoStrategy::CrossBand => Some(Vfo::Sub),
            VfoStrategy::Split => Some(Vfo::B),
            VfoStrategy::RxOnly => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum TrackingState {
    Idle,
    Initializing,
    FmAutonomous,
    LinearInteractive,
    LinearAutonomous,
    HalfDuplexPtt,
}

impl TrackingState {
    pub const ALL: [TrackingState; 6] = [
        TrackingState::Idle,
        TrackingState::Initializing,
        TrackingState::FmAutonomous,
        TrackingState::LinearInteractive,
        TrackingState::LinearAutonomous,
        TrackingState::HalfDuplexPtt,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> TrackingState {
        TrackingState::ALL
            .get(index as usize)
            .copied()
            .unwrap_or(TrackingState::Idle)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrackingSettings {
    #[serde(default = "default_threshold_fm")]
    pub doppler_threshold_fm_hz: i64,
    #[serde(default = "default_threshold_linear")]
    pub doppler_threshold_linear_hz: i64,
    #[serde(default = "default_fm_interval", with = "crate::config::duration")]
    pub fm_interval: Duration,
    #[serde(default = "default_linear_interval", with = "crate::config::duration")]
    pub linear_interval: Duration,
    #[serde(default = "default_ptt_interval", with = "crate::config::duration")]
    pub ptt_interval: Duration,
    /// Look-ahead for predictive Doppler; zero disables it.
    #[serde(default = "default_predictive_lead", with = "crate::config::duration")]
    pub predictive_lead: Duration,
    #[serde(default = "default_interactive")]
    pub interactive: bool,
    #[serde(default = "default_telemetry_interval", with = "crate::config::duration")]
    pub telemetry_interval: Duration,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            doppler_threshold_fm_hz: default_threshold_fm(),
            doppler_threshold_linear_hz: default_threshold_linear(),
            fm_interval: default_fm_interval(),
            linear_interval: default_linear_interval(),
            ptt_interval: default_ptt_interval(),
            predictive_lead: default_predictive_lead(),
            interactive: default_interactive(),
            telemetry_interval: default_telemetry_interval(),
        }
    }
}

fn default_threshold_fm() -> i64 {
    200
}

fn default_threshold_linear() -> i64 {
    50
}

fn default_fm_interval() -> Duration {
    Duration::from_millis(300)
}

fn default_linear_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_ptt_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_predictive_lead() -> Duration {
    Duration::from_secs_f64(crate::doppler::DEFAULT_PREDICTION_LEAD_S)
}

fn default_interactive() -> bool {
    true
}

fn default_telemetry_interval() -> Duration {
    Duration::from_millis(200)
}
