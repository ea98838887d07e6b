use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use super::{Gs232Rotator, PassPlan, PositionCache, RotatorError, RotatorSettings, RouteOptimizer};
use crate::predict::Ephemeris;
use crate::worker::{pause, WorkerHandle};

/// Smallest change in either axis worth a new positioning command.
const MOVE_THRESHOLD_DEG: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RotatorAction {
    Moved { azimuth_deg: f64, elevation_deg: f64 },
    Holding,
    Parked { azimuth_deg: f64, elevation_deg: f64 },
    Idle,
}

/// Decides, once per poll, where the rotator should point.
pub struct RotatorLoop {
    optimizer: RouteOptimizer,
    settings: RotatorSettings,
    plan: Option<PassPlan>,
    last_sent: Option<(f64, f64)>,
    parked: bool,
}

impl RotatorLoop {
    pub fn new(settings: RotatorSettings) -> Self {
        Self {
            optimizer: RouteOptimizer::new(settings.limits, settings.min_elevation_deg),
            settings,
            plan: None,
            last_sent: None,
            parked: false,
        }
    }

    pub fn parked(&self) -> bool {
        self.parked
    }

    pub fn plan(&self) -> Option<&PassPlan> {
        self.plan.as_ref()
    }

    pub fn tick(
        &mut self,
        rotator: &mut Gs232Rotator,
        ephemeris: &dyn Ephemeris,
        now: DateTime<Utc>,
    ) -> Result<RotatorAction, RotatorError> {
        let look = match ephemeris.look_at(now) {
            Ok(look) => look,
            Err(e) => {
                warn!("rotator: no look angles for {}: {}", now, e);
                return Ok(RotatorAction::Holding);
            }
        };
        let current_az = rotator
            .position(false)?
            .map(|p| p.azimuth_deg)
            .or(self.last_sent.map(|(az, _)| az));

        if look.elevation_deg < self.settings.min_elevation_deg {
            self.plan = None;
            if self.parked {
                return Ok(RotatorAction::Idle);
            }
            let park_el = self.settings.park_elevation_deg;
            let park_az = match current_az {
                Some(current) => self
                    .optimizer
                    .best_azimuth(current, self.settings.park_azimuth_deg),
                None => self.settings.park_azimuth_deg,
            };
            rotator.park(park_az, park_el)?;
            self.parked = true;
            self.last_sent = Some((park_az, park_el));
            return Ok(RotatorAction::Parked {
                azimuth_deg: park_az,
                elevation_deg: park_el,
            });
        }

        self.parked = false;
        let target_az = self
            .planned_azimuth(ephemeris, now, current_az)
            .unwrap_or_else(|| match current_az {
                Some(current) => self.optimizer.best_azimuth(current, look.azimuth_deg),
                None => look.azimuth_deg,
            });
        let el = look.elevation_deg;

        let send = match self.last_sent {
            None => true,
            Some((az, prev_el)) => {
                (target_az - az).abs() >= MOVE_THRESHOLD_DEG
                    || (el - prev_el).abs() >= MOVE_THRESHOLD_DEG
            }
        };
        if !send {
            return Ok(RotatorAction::Holding);
        }
        rotator.set_position(target_az, el)?;
        self.last_sent = Some((target_az, el));
        Ok(RotatorAction::Moved {
            azimuth_deg: target_az,
            elevation_deg: el,
        })
    }

    /// Target azimuth for `now` from the current pass plan, re-planning when
    /// the plan has run out.
    fn planned_azimuth(
        &mut self,
        ephemeris: &dyn Ephemeris,
        now: DateTime<Utc>,
        current_az: Option<f64>,
    ) -> Option<f64> {
        let exhausted = self
            .plan
            .as_ref()
            .and_then(|p| p.segments.last())
            .map_or(true, |last| last.time < now);
        if exhausted {
            self.plan = self.make_plan(ephemeris, now, current_az);
        }

        let segments = &self.plan.as_ref()?.segments;
        let index = segments.iter().rposition(|s| s.time <= now)?;
        let here = &segments[index];
        match segments.get(index + 1) {
            Some(next) => {
                let span = (next.time - here.time).num_milliseconds() as f64;
                let into = (now - here.time).num_milliseconds() as f64;
                let fraction = if span > 0.0 { into / span } else { 0.0 };
                Some(here.target_az + (next.target_az - here.target_az) * fraction)
            }
            None => Some(here.target_az),
        }
    }

    fn make_plan(
        &self,
        ephemeris: &dyn Ephemeris,
        now: DateTime<Utc>,
        current_az: Option<f64>,
    ) -> Option<PassPlan> {
        let (window, interval) = if self.settings.adaptive {
            let pass = match self.optimizer.detect_characteristics(ephemeris, now) {
                Ok(pass) => pass,
                Err(e) => {
                    warn!("rotator: pass scan failed: {}", e);
                    None
                }
            };
            let params = self.optimizer.adaptive_parameters(pass.as_ref());
            info!("rotator prediction: {}", params.reason);
            (params.window, params.interval)
        } else {
            (self.settings.look_ahead, self.settings.sample_interval)
        };

        let samples = match self
            .optimizer
            .predict_positions(ephemeris, now, window, interval)
        {
            Ok(samples) => samples,
            Err(e) => {
                warn!("rotator: prediction failed: {}", e);
                return None;
            }
        };
        // only the pass in progress, not the next one inside the window
        let in_pass = samples
            .iter()
            .take_while(|s| s.elevation_deg >= self.settings.min_elevation_deg)
            .count();
        let plan = self.optimizer.optimize(&samples[..in_pass], current_az);
        plan.strategy.map(|_| plan)
    }
}

/// The running rotator control thread.
pub struct RotatorHandle {
    worker: WorkerHandle,
    parked: Arc<AtomicBool>,
    cache: Arc<PositionCache>,
}

impl RotatorHandle {
    pub fn spawn(
        mut rotator: Gs232Rotator,
        ephemeris: Arc<dyn Ephemeris>,
        settings: RotatorSettings,
    ) -> std::io::Result<Self> {
        let parked = Arc::new(AtomicBool::new(false));
        let cache = rotator.cache();
        let parked_flag = parked.clone();
        let poll = settings.poll_interval;
        let mut control = RotatorLoop::new(settings);

        let worker = WorkerHandle::spawn("rotator", move |active| {
            info!("rotator loop started");
            while active.load(Ordering::Acquire) {
                if let Err(e) = control.tick(&mut rotator, ephemeris.as_ref(), Utc::now()) {
                    warn!("rotator tick failed: {}", e);
                }
                parked_flag.store(control.parked(), Ordering::Release);
                if !pause(&active, poll) {
                    break;
                }
            }
            if let Err(e) = rotator.stop() {
                warn!("rotator stop failed: {}", e);
            }
            info!("rotator loop stopped");
        })?;

        Ok(Self {
            worker,
            parked,
            cache,
        })
    }

    pub fn parked_flag(&self) -> Arc<AtomicBool> {
        self.parked.clone()
    }

    pub fn cache(&self) -> Arc<PositionCache> {
        self.cache.clone()
    }

    pub fn stop(&mut self) {
        self.worker.stop();
    }
}
