//! Lock-free status shared between the worker threads and callers.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;

use super::TrackingState;
use crate::doppler::{downlink_shift, round2, uplink_shift, DopplerTrend};
use crate::predict::{Ephemeris, PassWindow};
use crate::rotator::PositionCache;
use crate::worker::pause;

/// `f64` stored as raw bits. NaN stands for "unknown".
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    fn get(&self) -> Option<f64> {
        Some(self.load()).filter(|v| !v.is_nan())
    }
}

const NO_FREQUENCY: i64 = 0;
/// Minimum spacing between pass searches while no upcoming pass is known.
const PASS_RETRY_INTERVAL_S: i64 = 60;

#[derive(Debug)]
pub struct Telemetry {
    state: AtomicU8,
    downlink_radio_hz: AtomicI64,
    uplink_radio_hz: AtomicI64,
    downlink_nominal_hz: AtomicF64,
    uplink_nominal_hz: AtomicF64,
    calibration_hz: AtomicI64,
    downlink_doppler_hz: AtomicF64,
    downlink_doppler_rate_hz_s: AtomicF64,
    uplink_doppler_hz: AtomicF64,
    uplink_doppler_rate_hz_s: AtomicF64,
    elevation_deg: AtomicF64,
    azimuth_deg: AtomicF64,
    height_km: AtomicF64,
    sub_lat_deg: AtomicF64,
    sub_lon_deg: AtomicF64,
    eclipsed: AtomicBool,
    link_connected: AtomicBool,
    rotator_az_deg: AtomicF64,
    rotator_el_deg: AtomicF64,
    parked: AtomicBool,
    has_pass: AtomicBool,
    pass_rise: AtomicI64,
    pass_tca: AtomicI64,
    pass_los: AtomicI64,
    pass_max_elevation_deg: AtomicF64,
}

/// Point-in-time copy of the telemetry for display or serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub state: TrackingState,
    pub downlink_radio_hz: Option<i64>,
    pub uplink_radio_hz: Option<i64>,
    pub downlink_nominal_hz: Option<f64>,
    pub uplink_nominal_hz: Option<f64>,
    pub calibration_hz: i64,
    pub downlink_doppler_hz: f64,
    pub downlink_doppler_rate_hz_s: f64,
    pub uplink_doppler_hz: f64,
    pub uplink_doppler_rate_hz_s: f64,
    pub elevation_deg: Option<f64>,
    pub azimuth_deg: Option<f64>,
    pub height_km: Option<f64>,
    pub sub_lat_deg: Option<f64>,
    pub sub_lon_deg: Option<f64>,
    pub eclipsed: bool,
    pub link_connected: bool,
    pub rotator_az_deg: Option<f64>,
    pub rotator_el_deg: Option<f64>,
    pub parked: bool,
    pub next_event: Option<String>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(TrackingState::Idle.index()),
            downlink_radio_hz: AtomicI64::new(NO_FREQUENCY),
            uplink_radio_hz: AtomicI64::new(NO_FREQUENCY),
            downlink_nominal_hz: AtomicF64::new(f64::NAN),
            uplink_nominal_hz: AtomicF64::new(f64::NAN),
            calibration_hz: AtomicI64::new(0),
            downlink_doppler_hz: AtomicF64::new(0.0),
            downlink_doppler_rate_hz_s: AtomicF64::new(0.0),
            uplink_doppler_hz: AtomicF64::new(0.0),
            uplink_doppler_rate_hz_s: AtomicF64::new(0.0),
            elevation_deg: AtomicF64::new(f64::NAN),
            azimuth_deg: AtomicF64::new(f64::NAN),
            height_km: AtomicF64::new(f64::NAN),
            sub_lat_deg: AtomicF64::new(f64::NAN),
            sub_lon_deg: AtomicF64::new(f64::NAN),
            eclipsed: AtomicBool::new(false),
            link_connected: AtomicBool::new(false),
            rotator_az_deg: AtomicF64::new(f64::NAN),
            rotator_el_deg: AtomicF64::new(f64::NAN),
            parked: AtomicBool::new(false),
            has_pass: AtomicBool::new(false),
            pass_rise: AtomicI64::new(0),
            pass_tca: AtomicI64::new(0),
            pass_los: AtomicI64::new(0),
            pass_max_elevation_deg: AtomicF64::new(f64::NAN),
        }
    }
}

fn frequency(value: i64) -> Option<i64> {
    (value != NO_FREQUENCY).then_some(value)
}

impl Telemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> TrackingState {
        TrackingState::from_index(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: TrackingState) {
        self.state.store(state.index(), Ordering::Release);
    }

    /// Values owned by the tracking loop.
    pub fn publish_radio(
        &self,
        downlink_hz: Option<i64>,
        uplink_hz: Option<i64>,
        downlink_nominal_hz: f64,
        uplink_nominal_hz: Option<f64>,
        calibration_hz: i64,
        link_connected: bool,
    ) {
        self.downlink_radio_hz
            .store(downlink_hz.unwrap_or(NO_FREQUENCY), Ordering::Release);
        self.uplink_radio_hz
            .store(uplink_hz.unwrap_or(NO_FREQUENCY), Ordering::Release);
        self.downlink_nominal_hz.store(downlink_nominal_hz);
        self.uplink_nominal_hz
            .store(uplink_nominal_hz.unwrap_or(f64::NAN));
        self.calibration_hz.store(calibration_hz, Ordering::Release);
        self.link_connected.store(link_connected, Ordering::Release);
    }

    /// Clears everything before a new session.
    pub fn reset(&self) {
        let fresh = Telemetry::default();
        self.set_state(TrackingState::Idle);
        self.publish_radio(None, None, f64::NAN, None, 0, false);
        for (target, source) in [
            (&self.downlink_doppler_hz, &fresh.downlink_doppler_hz),
            (&self.downlink_doppler_rate_hz_s, &fresh.downlink_doppler_rate_hz_s),
            (&self.uplink_doppler_hz, &fresh.uplink_doppler_hz),
            (&self.uplink_doppler_rate_hz_s, &fresh.uplink_doppler_rate_hz_s),
            (&self.elevation_deg, &fresh.elevation_deg),
            (&self.azimuth_deg, &fresh.azimuth_deg),
            (&self.height_km, &fresh.height_km),
            (&self.sub_lat_deg, &fresh.sub_lat_deg),
            (&self.sub_lon_deg, &fresh.sub_lon_deg),
            (&self.rotator_az_deg, &fresh.rotator_az_deg),
            (&self.rotator_el_deg, &fresh.rotator_el_deg),
        ] {
            target.store(source.load());
        }
        self.eclipsed.store(false, Ordering::Release);
        self.parked.store(false, Ordering::Release);
        self.has_pass.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> TelemetrySnapshot {
        let next_event = self.pass().map(|pass| pass.next_event(now));
        TelemetrySnapshot {
            state: self.state(),
            downlink_radio_hz: frequency(self.downlink_radio_hz.load(Ordering::Acquire)),
            uplink_radio_hz: frequency(self.uplink_radio_hz.load(Ordering::Acquire)),
            downlink_nominal_hz: self.downlink_nominal_hz.get(),
            uplink_nominal_hz: self.uplink_nominal_hz.get(),
            calibration_hz: self.calibration_hz.load(Ordering::Acquire),
            downlink_doppler_hz: self.downlink_doppler_hz.load(),
            downlink_doppler_rate_hz_s: self.downlink_doppler_rate_hz_s.load(),
            uplink_doppler_hz: self.uplink_doppler_hz.load(),
            uplink_doppler_rate_hz_s: self.uplink_doppler_rate_hz_s.load(),
            elevation_deg: self.elevation_deg.get(),
            azimuth_deg: self.azimuth_deg.get(),
            height_km: self.height_km.get(),
            sub_lat_deg: self.sub_lat_deg.get(),
            sub_lon_deg: self.sub_lon_deg.get(),
            eclipsed: self.eclipsed.load(Ordering::Acquire),
            link_connected: self.link_connected.load(Ordering::Acquire),
            rotator_az_deg: self.rotator_az_deg.get(),
            rotator_el_deg: self.rotator_el_deg.get(),
            parked: self.parked.load(Ordering::Acquire),
            next_event,
        }
    }

    /// Pass the countdown refers to, if one is known.
    pub fn pass(&self) -> Option<PassWindow> {
        if !self.has_pass.load(Ordering::Acquire) {
            return None;
        }
        let at = |cell: &AtomicI64| DateTime::from_timestamp(cell.load(Ordering::Acquire), 0);
        Some(PassWindow {
            rise: at(&self.pass_rise)?,
            tca: at(&self.pass_tca)?,
            los: at(&self.pass_los)?,
            max_elevation_deg: self.pass_max_elevation_deg.load(),
        })
    }

    fn publish_pass(&self, pass: Option<&PassWindow>) {
        let Some(pass) = pass else {
            self.has_pass.store(false, Ordering::Release);
            return;
        };
        self.pass_rise.store(pass.rise.timestamp(), Ordering::Release);
        self.pass_tca.store(pass.tca.timestamp(), Ordering::Release);
        self.pass_los.store(pass.los.timestamp(), Ordering::Release);
        self.pass_max_elevation_deg.store(pass.max_elevation_deg);
        self.has_pass.store(true, Ordering::Release);
    }
}

/// Rotator state the telemetry task mirrors.
#[derive(Clone)]
pub struct RotatorFeed {
    pub cache: Arc<PositionCache>,
    pub parked: Arc<AtomicBool>,
}

/// Read-only display computations, one call per telemetry interval.
pub struct TelemetryTask {
    telemetry: Arc<Telemetry>,
    ephemeris: Arc<dyn Ephemeris>,
    rotator: Option<RotatorFeed>,
    downlink: DopplerTrend,
    uplink: DopplerTrend,
    last_sample: Option<Instant>,
    pass: Option<PassWindow>,
    next_pass_search: Option<DateTime<Utc>>,
}

impl TelemetryTask {
    pub fn new(
        telemetry: Arc<Telemetry>,
        ephemeris: Arc<dyn Ephemeris>,
        rotator: Option<RotatorFeed>,
    ) -> Self {
        Self {
            telemetry,
            ephemeris,
            rotator,
            downlink: DopplerTrend::default(),
            uplink: DopplerTrend::default(),
            last_sample: None,
            pass: None,
            next_pass_search: None,
        }
    }

    pub fn update(&mut self, now: DateTime<Utc>, elapsed_s: f64) {
        let t = &self.telemetry;
        match self.ephemeris.look_at(now) {
            Ok(look) => {
                if let Some(nominal) = t.downlink_nominal_hz.get() {
                    let shift = downlink_shift(nominal, look.range_rate_m_s);
                    self.downlink = self.downlink.advance(shift, elapsed_s);
                }
                if let Some(nominal) = t.uplink_nominal_hz.get() {
                    let shift = uplink_shift(nominal, look.range_rate_m_s);
                    self.uplink = self.uplink.advance(shift, elapsed_s);
                }
                t.downlink_doppler_hz.store(self.downlink.shift_hz);
                t.downlink_doppler_rate_hz_s.store(self.downlink.rate_hz_s);
                t.uplink_doppler_hz.store(self.uplink.shift_hz);
                t.uplink_doppler_rate_hz_s.store(self.uplink.rate_hz_s);
                t.elevation_deg.store(round2(look.elevation_deg));
                t.azimuth_deg.store(round2(look.azimuth_deg));
                t.height_km.store(round2(look.height_km));
                t.sub_lat_deg.store(look.sub_lat_deg);
                t.sub_lon_deg.store(look.sub_lon_deg);
                t.eclipsed.store(look.eclipsed, Ordering::Release);
            }
            Err(e) => debug!("telemetry: no look angles: {}", e),
        }

        let expired = self.pass.map_or(true, |p| p.los <= now);
        if expired && self.next_pass_search.map_or(true, |at| at <= now) {
            self.pass = match self.ephemeris.next_pass(now) {
                Ok(pass) => pass,
                Err(e) => {
                    warn!("telemetry: pass prediction failed: {}", e);
                    None
                }
            };
            if self.pass.is_none() {
                self.next_pass_search =
                    Some(now + chrono::Duration::seconds(PASS_RETRY_INTERVAL_S));
            }
        }
        t.publish_pass(self.pass.as_ref());

        if let Some(feed) = &self.rotator {
            if let Some(pos) = feed.cache.last() {
                t.rotator_az_deg.store(pos.azimuth_deg);
                t.rotator_el_deg.store(pos.elevation_deg);
            }
            t.parked
                .store(feed.parked.load(Ordering::Acquire), Ordering::Release);
        }
    }

    /// Worker body: updates until `active` clears.
    pub fn run(mut self, active: Arc<AtomicBool>, interval: std::time::Duration) {
        while active.load(Ordering::Acquire) {
            let started = Instant::now();
            let elapsed = self
                .last_sample
                .map(|prev| started.duration_since(prev).as_secs_f64())
                .unwrap_or(0.0);
            self.last_sample = Some(started);
            self.update(Utc::now(), elapsed);
            if !pause(&active, interval) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::{LookAngles, PredictError};
    use crate::rotator::Position;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::AtomicUsize;

    struct Receding {
        range_rate_m_s: f64,
        rise: DateTime<Utc>,
    }

    impl Ephemeris for Receding {
        fn look_at(&self, at: DateTime<Utc>) -> Result<LookAngles, PredictError> {
            Ok(LookAngles {
                timestamp: at,
                azimuth_deg: 123.456,
                elevation_deg: 45.678,
                range_km: 1200.0,
                range_rate_m_s: self.range_rate_m_s,
                sub_lat_deg: 50.0,
                sub_lon_deg: 10.0,
                height_km: 420.0,
                eclipsed: true,
                orbital_period_s: 5560.0,
            })
        }

        fn next_pass(&self, _from: DateTime<Utc>) -> Result<Option<PassWindow>, PredictError> {
            Ok(Some(PassWindow {
                rise: self.rise,
                tca: self.rise + Duration::minutes(5),
                los: self.rise + Duration::minutes(10),
                max_elevation_deg: 60.0,
            }))
        }
    }

    #[test]
    fn test_snapshot_defaults() {
        let telemetry = Telemetry::new();
        let snap = telemetry.snapshot();
        assert_eq!(snap.state, TrackingState::Idle);
        assert_eq!(snap.downlink_radio_hz, None);
        assert_eq!(snap.elevation_deg, None);
        assert_eq!(snap.next_event, None);
        assert!(!snap.link_connected);
    }

    #[test]
    fn test_update_publishes_doppler_and_countdown() {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        let telemetry = Telemetry::new();
        telemetry.publish_radio(
            Some(145_896_595),
            Some(435_510_165),
            145_900_000.0,
            Some(435_500_000.0),
            0,
            true,
        );
        let cache = Arc::new(PositionCache::new(std::time::Duration::from_secs(1)));
        cache.store(Position {
            azimuth_deg: 120.0,
            elevation_deg: 44.0,
        });
        let feed = RotatorFeed {
            cache,
            parked: Arc::new(AtomicBool::new(false)),
        };
        let eph = Arc::new(Receding {
            range_rate_m_s: 7000.0,
            rise: now + Duration::seconds(90),
        });
        let mut task = TelemetryTask::new(telemetry.clone(), eph, Some(feed));
        task.update(now, 0.0);

        let snap = telemetry.snapshot_at(now);
        assert_eq!(snap.downlink_doppler_hz, -3406.69);
        assert_eq!(snap.uplink_doppler_hz, 10168.7);
        assert_eq!(snap.downlink_doppler_rate_hz_s, 0.0);
        assert_eq!(snap.elevation_deg, Some(45.68));
        assert_eq!(snap.rotator_az_deg, Some(120.0));
        assert!(snap.eclipsed);
        assert_eq!(snap.next_event.as_deref(), Some("AOS in 00:01:30"));
        assert_eq!(snap.downlink_radio_hz, Some(145_896_595));
    }

    #[test]
    fn test_rate_glitch_is_suppressed() {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        let telemetry = Telemetry::new();
        telemetry.publish_radio(None, None, 145_900_000.0, None, 0, false);
        let mut task = TelemetryTask::new(
            telemetry.clone(),
            Arc::new(Receding {
                range_rate_m_s: 0.0,
                rise: now,
            }),
            None,
        );
        task.update(now, 0.2);
        // jump of 3.4 kHz within 0.2 s
        task.ephemeris = Arc::new(Receding {
            range_rate_m_s: 7000.0,
            rise: now,
        });
        task.update(now, 0.2);
        let snap = telemetry.snapshot_at(now);
        assert_eq!(snap.downlink_doppler_rate_hz_s, 0.0);
        assert_eq!(snap.next_event.as_deref(), Some("TCA in 00:05:00"));
    }

    /// Never rises; counts how often it is asked.
    struct Geostationary {
        searches: AtomicUsize,
    }

    impl Ephemeris for Geostationary {
        fn look_at(&self, at: DateTime<Utc>) -> Result<LookAngles, PredictError> {
            Ok(LookAngles {
                timestamp: at,
                azimuth_deg: 170.0,
                elevation_deg: -12.0,
                range_km: 38_000.0,
                range_rate_m_s: 0.0,
                sub_lat_deg: 0.0,
                sub_lon_deg: 19.2,
                height_km: 35_786.0,
                eclipsed: false,
                orbital_period_s: 86_164.0,
            })
        }

        fn next_pass(&self, _from: DateTime<Utc>) -> Result<Option<PassWindow>, PredictError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[test]
    fn test_pass_search_is_rate_limited() {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        let telemetry = Telemetry::new();
        let eph = Arc::new(Geostationary {
            searches: AtomicUsize::new(0),
        });
        let mut task = TelemetryTask::new(telemetry.clone(), eph.clone(), None);

        for tick in 0..250 {
            task.update(now + Duration::milliseconds(200 * tick), 0.2);
        }
        assert_eq!(eph.searches.load(Ordering::SeqCst), 1);
        assert_eq!(telemetry.snapshot_at(now).next_event, None);

        task.update(now + Duration::seconds(60), 0.2);
        assert_eq!(eph.searches.load(Ordering::SeqCst), 2);
    }
}
