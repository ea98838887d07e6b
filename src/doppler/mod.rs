//! Doppler correction for satellite up- and downlinks.
//!
//! Range-rate is in metres per second and positive while the satellite
//! recedes from the observer.

pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// Default look-ahead used to pre-empt serial command latency.
pub const DEFAULT_PREDICTION_LEAD_S: f64 = 0.25;

/// Frequency heard on the ground for a signal sent at `nominal_hz` by the satellite.
pub fn downlink_corrected(nominal_hz: f64, range_rate_m_s: f64) -> f64 {
    nominal_hz * (1.0 - range_rate_m_s / SPEED_OF_LIGHT_M_S)
}

/// Frequency to transmit so the satellite receives `nominal_hz`.
pub fn uplink_corrected(nominal_hz: f64, range_rate_m_s: f64) -> f64 {
    nominal_hz * (1.0 + range_rate_m_s / SPEED_OF_LIGHT_M_S)
}

/// Doppler shift observed on the downlink, in Hz.
pub fn downlink_shift(nominal_hz: f64, range_rate_m_s: f64) -> f64 {
    -range_rate_m_s * nominal_hz / SPEED_OF_LIGHT_M_S
}

/// Pre-compensation applied to the uplink, in Hz.
pub fn uplink_shift(nominal_hz: f64, range_rate_m_s: f64) -> f64 {
    range_rate_m_s * nominal_hz / SPEED_OF_LIGHT_M_S
}

/// Range-rate sampled at `t` and `t + lead_s`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeRateSample {
    pub now_m_s: f64,
    pub ahead_m_s: f64,
    pub lead_s: f64,
}

impl RangeRateSample {
    pub fn instantaneous(range_rate_m_s: f64) -> Self {
        Self {
            now_m_s: range_rate_m_s,
            ahead_m_s: range_rate_m_s,
            lead_s: 0.0,
        }
    }
}

/// Downlink frequency extrapolated `lead_s` seconds ahead.
pub fn downlink_predictive(nominal_hz: f64, sample: RangeRateSample) -> f64 {
    extrapolate(
        downlink_corrected(nominal_hz, sample.now_m_s),
        downlink_corrected(nominal_hz, sample.ahead_m_s),
        sample.lead_s,
    )
}

/// Uplink frequency extrapolated `lead_s` seconds ahead.
pub fn uplink_predictive(nominal_hz: f64, sample: RangeRateSample) -> f64 {
    extrapolate(
        uplink_corrected(nominal_hz, sample.now_m_s),
        uplink_corrected(nominal_hz, sample.ahead_m_s),
        sample.lead_s,
    )
}

fn extrapolate(now_hz: f64, ahead_hz: f64, lead_s: f64) -> f64 {
    if lead_s <= 0.0 {
        return now_hz;
    }
    let rate = (ahead_hz - now_hz) / lead_s;
    now_hz + rate * lead_s
}

/// Rounds to the whole Hz the radio accepts.
pub fn to_radio_hz(freq_hz: f64) -> i64 {
    freq_hz.round() as i64
}

/// Rounds to two decimals for display and telemetry.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Doppler value and its rate of change between two telemetry samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DopplerTrend {
    pub shift_hz: f64,
    pub rate_hz_s: f64,
}

/// Rates above this are treated as sample glitches (satellite switch, clock jump).
pub const RATE_GLITCH_LIMIT_HZ_S: f64 = 250.0;

impl DopplerTrend {
    pub fn advance(&self, shift_hz: f64, elapsed_s: f64) -> Self {
        let mut rate = if elapsed_s > 0.0 {
            (shift_hz - self.shift_hz) / elapsed_s
        } else {
            0.0
        };
        if rate.abs() > RATE_GLITCH_LIMIT_HZ_S {
            rate = 0.0;
        }
        Self {
            shift_hz: round2(shift_hz),
            rate_hz_s: round2(rate),
        }
    }
}
