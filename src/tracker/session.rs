use log::info;

use super::{SatelliteConfig, TrackerError, TrackingSettings, TrackingState, TransponderLeg, VfoStrategy};
use crate::doppler::{downlink_predictive, to_radio_hz, uplink_predictive, RangeRateSample};

const DIAL_HISTORY_LEN: usize = 4;

/// Dial readings below this distance from the commanded value are echo, not QSY.
const DIAL_DEADBAND_HZ: i64 = 1;

/// The last few downlink frequencies read back from the radio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DialHistory {
    samples: [i64; DIAL_HISTORY_LEN],
}

impl DialHistory {
    pub fn push(&mut self, hz: i64) {
        self.samples.rotate_left(1);
        self.samples[DIAL_HISTORY_LEN - 1] = hz;
    }

    /// True when every remembered reading is identical.
    pub fn is_still(&self) -> bool {
        self.samples.iter().all(|s| *s == self.samples[0])
    }

    pub fn clear(&mut self) {
        self.samples = [0; DIAL_HISTORY_LEN];
    }
}

/// Mutable state of one tracking run. Created by `start_tracking`, dropped by
/// `stop_tracking`.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    pub satellite: String,
    pub transponder: String,
    downlink: TransponderLeg,
    uplink: Option<TransponderLeg>,
    pub reversed: bool,
    pub strategy: VfoStrategy,
    pub tone_hz: Option<f64>,
    pub tone_squelch_hz: Option<f64>,
    pub state: TrackingState,
    /// State entered once initialization completes.
    pub operating_state: TrackingState,
    pub threshold_hz: i64,
    pub interactive: bool,
    pub downlink_nominal_hz: f64,
    pub uplink_nominal_hz: Option<f64>,
    pub calibration_hz: i64,
    pub calibration_pending: bool,
    pub last_downlink_hz: Option<i64>,
    pub last_uplink_hz: Option<i64>,
    pub dial: DialHistory,
    pub dial_was_still: bool,
    pub ptt_keyed: bool,
}

impl TrackingSession {
    pub fn new(config: &SatelliteConfig, settings: &TrackingSettings) -> Result<Self, TrackerError> {
        let downlink = config.downlink.ok_or_else(|| TrackerError::MissingDownlink {
            satellite: config.name.clone(),
            transponder: config.transponder.clone(),
        })?;
        for leg in std::iter::once(downlink).chain(config.uplink) {
            if !leg.frequency_hz.is_finite() || leg.frequency_hz <= 0.0 {
                return Err(TrackerError::InvalidFrequency(leg.frequency_hz));
            }
        }

        let strategy = config.vfo_strategy();
        let mode = downlink.mode;
        let (operating_state, threshold_hz) = if strategy == VfoStrategy::Split {
            let threshold = if mode.is_fm() {
                settings.doppler_threshold_fm_hz
            } else if mode.is_data() {
                0
            } else {
                settings.doppler_threshold_linear_hz
            };
            (TrackingState::HalfDuplexPtt, threshold)
        } else if mode.is_fm() {
            (TrackingState::FmAutonomous, settings.doppler_threshold_fm_hz)
        } else if mode.is_data() {
            (TrackingState::LinearAutonomous, 0)
        } else {
            (TrackingState::LinearInteractive, settings.doppler_threshold_linear_hz)
        };

        Ok(Self {
            satellite: config.name.clone(),
            transponder: config.transponder.clone(),
            downlink,
            uplink: config.uplink,
            reversed: config.reversed,
            strategy,
            tone_hz: config.tone_hz,
            tone_squelch_hz: config.tone_squelch_hz,
            state: TrackingState::Idle,
            operating_state,
            threshold_hz,
            interactive: settings.interactive,
            downlink_nominal_hz: downlink.frequency_hz,
            uplink_nominal_hz: config.uplink.map(|u| u.frequency_hz),
            calibration_hz: config.calibration_hz,
            calibration_pending: false,
            last_downlink_hz: None,
            last_uplink_hz: None,
            dial: DialHistory::default(),
            dial_was_still: false,
            ptt_keyed: false,
        })
    }

    pub fn downlink(&self) -> TransponderLeg {
        self.downlink
    }

    pub fn uplink(&self) -> Option<TransponderLeg> {
        self.uplink
    }

    /// Radio frequency for the downlink, calibration included.
    pub fn downlink_target(&self, sample: RangeRateSample) -> i64 {
        to_radio_hz(downlink_predictive(
            self.downlink_nominal_hz + self.calibration_hz as f64,
            sample,
        ))
    }

    pub fn uplink_target(&self, sample: RangeRateSample) -> Option<i64> {
        self.uplink_nominal_hz
            .map(|nominal| to_radio_hz(uplink_predictive(nominal, sample)))
    }

    /// Whether `new_hz` differs enough from what was last commanded.
    pub fn needs_update(&self, new_hz: i64, last_hz: Option<i64>) -> bool {
        match last_hz {
            None => true,
            Some(last) => (new_hz - last).abs() > self.threshold_hz,
        }
    }

    /// Moves both nominal frequencies by the amount the operator turned the dial.
    /// Returns the applied delta.
    pub fn follow_dial(&mut self, dial_hz: i64) -> Option<i64> {
        let last = self.last_downlink_hz?;
        let delta = dial_hz - last;
        if delta.abs() <= DIAL_DEADBAND_HZ {
            return None;
        }
        self.downlink_nominal_hz += delta as f64;
        if let Some(uplink) = self.uplink_nominal_hz.as_mut() {
            if self.reversed {
                *uplink -= delta as f64;
            } else {
                *uplink += delta as f64;
            }
        }
        self.last_downlink_hz = Some(dial_hz);
        Some(delta)
    }

    pub fn set_calibration(&mut self, hz: i64) {
        if hz != self.calibration_hz {
            info!(
                "{}/{}: calibration {} -> {} Hz",
                self.satellite, self.transponder, self.calibration_hz, hz
            );
            self.calibration_hz = hz;
            self.calibration_pending = true;
        }
    }

    /// Returns to the configured transponder frequencies, discarding dial offsets.
    pub fn sync(&mut self) {
        self.downlink_nominal_hz = self.downlink.frequency_hz;
        self.uplink_nominal_hz = self.uplink.map(|u| u.frequency_hz);
        self.last_downlink_hz = None;
        self.last_uplink_hz = None;
        self.dial.clear();
        self.dial_was_still = false;
        info!("{}/{}: synced to nominal", self.satellite, self.transponder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(down: (&str, f64), up: Option<(&str, f64)>) -> SatelliteConfig {
        SatelliteConfig {
            name: "TEST".to_string(),
            transponder: "tpx".to_string(),
            downlink: Some(TransponderLeg::new(down.1, down.0).unwrap()),
            uplink: up.map(|(m, hz)| TransponderLeg::new(hz, m).unwrap()),
            reversed: false,
            cross_band: None,
            tone_hz: None,
            tone_squelch_hz: None,
            calibration_hz: 0,
        }
    }

    #[test]
    fn test_state_selection() {
        let settings = TrackingSettings::default();
        let fm = TrackingSession::new(&config(("FM", 145.9e6), Some(("FM", 435.5e6))), &settings).unwrap();
        assert_eq!(fm.operating_state, TrackingState::FmAutonomous);
        assert_eq!(fm.threshold_hz, 200);

        let ssb = TrackingSession::new(&config(("USB", 145.9e6), Some(("LSB", 435.5e6))), &settings).unwrap();
        assert_eq!(ssb.operating_state, TrackingState::LinearInteractive);

        let data = TrackingSession::new(&config(("DATA-USB", 145.825e6), None), &settings).unwrap();
        assert_eq!(data.operating_state, TrackingState::LinearAutonomous);
        assert_eq!(data.threshold_hz, 0);

        let split = TrackingSession::new(&config(("FM", 435.8e6), Some(("FM", 435.3e6))), &settings).unwrap();
        assert_eq!(split.operating_state, TrackingState::HalfDuplexPtt);
    }

    #[test]
    fn test_rejects_missing_downlink_and_bad_frequency() {
        let settings = TrackingSettings::default();
        let mut cfg = config(("FM", 145.9e6), None);
        cfg.downlink = None;
        assert!(matches!(
            TrackingSession::new(&cfg, &settings),
            Err(TrackerError::MissingDownlink { .. })
        ));
        let cfg = config(("FM", -1.0), None);
        assert!(matches!(
            TrackingSession::new(&cfg, &settings),
            Err(TrackerError::InvalidFrequency(_))
        ));
    }

    #[test]
    fn test_dial_history() {
        let mut dial = DialHistory::default();
        assert!(dial.is_still());
        dial.push(145_900_000);
        assert!(!dial.is_still());
        for _ in 0..3 {
            dial.push(145_900_000);
        }
        assert!(dial.is_still());
    }

    #[test]
    fn test_follow_dial_respects_polarity() {
        let settings = TrackingSettings::default();
        let mut normal = TrackingSession::new(&config(("USB", 145.9e6), Some(("LSB", 435.5e6))), &settings).unwrap();
        normal.last_downlink_hz = Some(145_900_000);
        assert_eq!(normal.follow_dial(145_901_000), Some(1000));
        assert_eq!(normal.downlink_nominal_hz, 145_901_000.0);
        assert_eq!(normal.uplink_nominal_hz, Some(435_501_000.0));
        assert_eq!(normal.follow_dial(145_901_001), None);

        let mut cfg = config(("USB", 145.9e6), Some(("LSB", 435.5e6)));
        cfg.reversed = true;
        let mut inverted = TrackingSession::new(&cfg, &settings).unwrap();
        inverted.last_downlink_hz = Some(145_900_000);
        inverted.follow_dial(145_899_500);
        assert_eq!(inverted.uplink_nominal_hz, Some(435_500_500.0));

        inverted.sync();
        assert_eq!(inverted.downlink_nominal_hz, 145_900_000.0);
        assert_eq!(inverted.uplink_nominal_hz, Some(435_500_000.0));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let settings = TrackingSettings::default();
        let session = TrackingSession::new(&config(("FM", 145.9e6), None), &settings).unwrap();
        assert!(session.needs_update(1, None));
        assert!(!session.needs_update(145_900_200, Some(145_900_000)));
        assert!(session.needs_update(145_900_201, Some(145_900_000)));
    }
}
