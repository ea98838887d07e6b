use std::sync::mpsc::{self, Sender};
use std::sync::Arc;

use log::{info, warn};

use super::control::{ControlCommand, TrackingLoop};
use super::error::TrackerError;
use super::telemetry::{RotatorFeed, Telemetry, TelemetrySnapshot, TelemetryTask};
use super::{SatelliteConfig, TrackingSession, TrackingSettings, TrackingState};
use crate::predict::Ephemeris;
use crate::radio::RadioControl;
use crate::rotator::{Gs232Rotator, RotatorError, RotatorHandle, RotatorSettings};
use crate::worker::WorkerHandle;

/// Opens the radio for a new session. Called once per `start_tracking`.
pub type RadioFactory = Box<dyn Fn() -> Box<dyn RadioControl> + Send>;

/// Opens the rotator for a new session.
pub type RotatorFactory = Box<dyn Fn(&RotatorSettings) -> Result<Gs232Rotator, RotatorError> + Send>;

struct RotatorSetup {
    settings: RotatorSettings,
    open: RotatorFactory,
}

struct ActiveSession {
    satellite: String,
    transponder: String,
    commands: Sender<ControlCommand>,
    tracking: WorkerHandle,
    telemetry: WorkerHandle,
    rotator: Option<RotatorHandle>,
}

impl ActiveSession {
    fn stop(&mut self) {
        self.tracking.stop();
        if let Some(rotator) = self.rotator.as_mut() {
            rotator.stop();
        }
        self.telemetry.stop();
    }
}

/// Caller-facing boundary: starts and stops sessions, forwards operator
/// commands, and serves telemetry snapshots.
pub struct Tracker {
    settings: TrackingSettings,
    radio: RadioFactory,
    rotator: Option<RotatorSetup>,
    telemetry: Arc<Telemetry>,
    active: Option<ActiveSession>,
}

impl Tracker {
    pub fn new(settings: TrackingSettings, radio: RadioFactory) -> Self {
        Self {
            settings,
            radio,
            rotator: None,
            telemetry: Telemetry::new(),
            active: None,
        }
    }

    pub fn with_rotator(mut self, settings: RotatorSettings, open: RotatorFactory) -> Self {
        self.rotator = Some(RotatorSetup { settings, open });
        self
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn start_tracking(
        &mut self,
        config: &SatelliteConfig,
        ephemeris: Arc<dyn Ephemeris>,
    ) -> Result<(), TrackerError> {
        if self.active.is_some() {
            return Err(TrackerError::AlreadyRunning);
        }
        let session = TrackingSession::new(config, &self.settings)?;
        info!(
            "starting {}/{}: {} ({})",
            session.satellite, session.transponder, session.operating_state, session.strategy
        );

        self.telemetry.reset();
        self.telemetry.set_state(TrackingState::Initializing);

        let (commands, receiver) = mpsc::channel();
        let tracking_loop = TrackingLoop::new(
            (self.radio)(),
            session,
            self.settings.clone(),
            self.telemetry.clone(),
        );
        let eph = ephemeris.clone();
        let tracking = WorkerHandle::spawn("tracking", move |active| {
            tracking_loop.run(eph, receiver, active)
        })?;

        let rotator = match &self.rotator {
            Some(setup) => match (setup.open)(&setup.settings) {
                Ok(rotator) => Some(RotatorHandle::spawn(
                    rotator,
                    ephemeris.clone(),
                    setup.settings.clone(),
                )?),
                Err(e) => {
                    warn!("rotator unavailable, tracking radio only: {}", e);
                    None
                }
            },
            None => None,
        };

        let feed = rotator.as_ref().map(|r| RotatorFeed {
            cache: r.cache(),
            parked: r.parked_flag(),
        });
        let task = TelemetryTask::new(self.telemetry.clone(), ephemeris, feed);
        let interval = self.settings.telemetry_interval;
        let telemetry = WorkerHandle::spawn("telemetry", move |active| task.run(active, interval))?;

        self.active = Some(ActiveSession {
            satellite: config.name.clone(),
            transponder: config.transponder.clone(),
            commands,
            tracking,
            telemetry,
            rotator,
        });
        Ok(())
    }

    /// Stops every worker of the current session. Does nothing when idle.
    pub fn stop_tracking(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.stop();
            info!("stopped {}/{}", active.satellite, active.transponder);
        }
        self.telemetry.set_state(TrackingState::Idle);
    }

    pub fn set_calibration_offset(
        &mut self,
        satellite: &str,
        transponder: &str,
        hz: i64,
    ) -> Result<(), TrackerError> {
        let not_tracking = || TrackerError::NotTracking {
            satellite: satellite.to_string(),
            transponder: transponder.to_string(),
        };
        let active = self.active.as_ref().ok_or_else(not_tracking)?;
        if active.satellite != satellite || active.transponder != transponder {
            return Err(not_tracking());
        }
        active
            .commands
            .send(ControlCommand::Calibration(hz))
            .map_err(|_| not_tracking())
    }

    /// Also becomes the default for later sessions.
    pub fn set_interactive_dial_tracking(&mut self, on: bool) {
        self.settings.interactive = on;
        if let Some(active) = &self.active {
            if active.commands.send(ControlCommand::Interactive(on)).is_err() {
                warn!("tracking thread gone, dial setting not delivered");
            }
        }
    }

    /// Resets the tracked frequencies to the transponder's nominal values.
    pub fn sync(&mut self) -> Result<(), TrackerError> {
        let active = self.active.as_ref().ok_or(TrackerError::Idle)?;
        active
            .commands
            .send(ControlCommand::Sync)
            .map_err(|_| TrackerError::Idle)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop_tracking();
    }
}
