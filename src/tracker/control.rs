use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::telemetry::Telemetry;
use super::{TrackingSession, TrackingSettings, TrackingState, VfoStrategy};
use crate::doppler::RangeRateSample;
use crate::predict::Ephemeris;
use crate::radio::{RadioControl, RadioError, Vfo};
use crate::worker::pause;

/// Main VFO above this while the downlink is below it means the bands are swapped.
const UHF_SPLIT_HZ: f64 = 400_000_000.0;
/// Main VFO below this while the downlink is above it means the bands are swapped.
const VHF_SPLIT_HZ: f64 = 200_000_000.0;

/// Operator requests delivered to the tracking thread between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Calibration(i64),
    Interactive(bool),
    Sync,
}

/// Samples range-rate at `now` and `now + lead`. `None` when the ephemeris fails.
pub fn sample_range_rate(
    ephemeris: &dyn Ephemeris,
    now: DateTime<Utc>,
    lead: Duration,
) -> Option<RangeRateSample> {
    let current = match ephemeris.look_at(now) {
        Ok(look) => look.range_rate_m_s,
        Err(e) => {
            debug!("no range-rate at {}: {}", now, e);
            return None;
        }
    };
    if lead.is_zero() {
        return Some(RangeRateSample::instantaneous(current));
    }
    let ahead = chrono::Duration::from_std(lead)
        .ok()
        .and_then(|lead| ephemeris.look_at(now + lead).ok())
        .map_or(current, |look| look.range_rate_m_s);
    Some(RangeRateSample {
        now_m_s: current,
        ahead_m_s: ahead,
        lead_s: lead.as_secs_f64(),
    })
}

fn log_setup(what: &str, result: Result<(), RadioError>) {
    if let Err(e) = result {
        warn!("radio setup: {} failed: {}", what, e);
    }
}

/// Drives one radio for one session. Owns the radio link exclusively.
pub struct TrackingLoop {
    radio: Box<dyn RadioControl>,
    session: TrackingSession,
    settings: TrackingSettings,
    telemetry: Arc<Telemetry>,
}

impl TrackingLoop {
    pub fn new(
        radio: Box<dyn RadioControl>,
        session: TrackingSession,
        settings: TrackingSettings,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            radio,
            session,
            settings,
            telemetry,
        }
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Calibration(hz) => self.session.set_calibration(hz),
            ControlCommand::Interactive(on) => {
                info!("interactive dial tracking {}", if on { "on" } else { "off" });
                self.session.interactive = on;
                self.session.dial.clear();
                self.session.dial_was_still = false;
            }
            ControlCommand::Sync => self.session.sync(),
        }
    }

    /// One-time radio setup followed by unconditional first writes.
    pub fn initialize(&mut self, sample: RangeRateSample) {
        self.session.state = TrackingState::Initializing;
        self.telemetry.set_state(TrackingState::Initializing);
        let strategy = self.session.strategy;
        info!(
            "{}/{}: initializing {} ({})",
            self.session.satellite,
            self.session.transponder,
            strategy,
            self.radio.model()
        );

        match strategy {
            VfoStrategy::CrossBand => {
                log_setup("split off", self.radio.set_split(false));
                log_setup("satellite mode on", self.radio.set_satellite_mode(true));
                self.check_band_order();
            }
            VfoStrategy::Split => {
                log_setup("satellite mode off", self.radio.set_satellite_mode(false));
                log_setup("simplex", self.radio.clear_duplex());
                log_setup("split on", self.radio.set_split(true));
            }
            VfoStrategy::RxOnly => {
                log_setup("satellite mode off", self.radio.set_satellite_mode(false));
                log_setup("simplex", self.radio.clear_duplex());
                log_setup("split off", self.radio.set_split(false));
            }
        }

        let rx = strategy.rx_vfo();
        log_setup("select rx vfo", self.radio.set_vfo(rx));
        log_setup(
            "rx mode",
            self.radio
                .set_mode(self.session.downlink().mode.operating_mode()),
        );
        self.configure_receiver();

        if let (Some(tx), Some(uplink)) = (strategy.tx_vfo(), self.session.uplink()) {
            log_setup("select tx vfo", self.radio.set_vfo(tx));
            log_setup("tx mode", self.radio.set_mode(uplink.mode.operating_mode()));
            match self.session.tone_hz {
                Some(tone) => {
                    log_setup("tone frequency", self.radio.set_tone_hz(tone));
                    log_setup("tone on", self.radio.set_tone_on(true));
                }
                None => log_setup("tone off", self.radio.set_tone_on(false)),
            }
            log_setup("select rx vfo", self.radio.set_vfo(rx));
        }

        let downlink = self.session.downlink_target(sample);
        self.write_downlink(downlink);
        if let Some(uplink) = self.session.uplink_target(sample) {
            self.write_uplink_when_clear(uplink);
        }

        self.session.state = self.session.operating_state;
        self.session.calibration_pending = false;
        info!(
            "{}/{}: tracking in {}",
            self.session.satellite, self.session.transponder, self.session.state
        );
        self.publish();
    }

    /// Receive VFO setup. AFC and RIT would move the receiver off the
    /// commanded frequency and confuse the dial comparison.
    fn configure_receiver(&mut self) {
        let model = self.radio.model();
        if model.supports_afc() {
            log_setup("afc off", self.radio.set_afc(false));
        }
        if model.supports_rit() {
            log_setup("rit offset", self.radio.set_rit_frequency(0));
            log_setup("rit off", self.radio.set_rit(false));
        }
        match self.session.tone_squelch_hz {
            Some(hz) => {
                log_setup("tone squelch frequency", self.radio.set_tone_squelch_hz(hz));
                log_setup("tone squelch on", self.radio.set_tone_squelch_on(true));
            }
            None => log_setup("tone squelch off", self.radio.set_tone_squelch_on(false)),
        }
    }

    /// Makes sure Main carries the downlink band in satellite mode.
    fn check_band_order(&mut self) {
        log_setup("select main", self.radio.set_vfo(Vfo::Main));
        let Some(main_hz) = self.radio.get_frequency() else {
            debug!("main vfo frequency unknown, skipping band check");
            return;
        };
        let main = main_hz as f64;
        let down = self.session.downlink_nominal_hz;
        let swapped = (main > UHF_SPLIT_HZ && down < UHF_SPLIT_HZ)
            || (main < VHF_SPLIT_HZ && down > VHF_SPLIT_HZ);
        if swapped {
            info!("main vfo on {} Hz, exchanging bands", main_hz);
            log_setup("exchange bands", self.radio.exchange_bands());
        }
    }

    /// Runs the current state once and returns how long to wait before the next tick.
    pub fn tick(&mut self, sample: RangeRateSample) -> Duration {
        let interval = match self.session.state {
            TrackingState::Idle | TrackingState::Initializing => {
                self.initialize(sample);
                return self.settings.linear_interval;
            }
            TrackingState::FmAutonomous => {
                self.track_autonomous(sample);
                self.settings.fm_interval
            }
            TrackingState::LinearAutonomous => {
                self.track_autonomous(sample);
                self.settings.linear_interval
            }
            TrackingState::LinearInteractive => {
                if self.session.interactive {
                    self.track_interactive(sample);
                } else {
                    self.track_autonomous(sample);
                }
                self.settings.linear_interval
            }
            TrackingState::HalfDuplexPtt => {
                self.track_half_duplex(sample);
                self.settings.ptt_interval
            }
        };
        self.session.calibration_pending = false;
        self.publish();
        interval
    }

    fn track_autonomous(&mut self, sample: RangeRateSample) {
        let downlink = self.session.downlink_target(sample);
        if self.session.needs_update(downlink, self.session.last_downlink_hz) {
            self.write_downlink(downlink);
        }
        if let Some(uplink) = self.session.uplink_target(sample) {
            if self.session.needs_update(uplink, self.session.last_uplink_hz) {
                self.write_uplink_when_clear(uplink);
            }
        }
    }

    fn track_interactive(&mut self, sample: RangeRateSample) {
        let Some(dial) = self.radio.get_frequency() else {
            debug!("no dial reading this tick");
            return;
        };
        let dial = dial as i64;
        self.session.dial.push(dial);
        let still = self.session.dial.is_still();

        if still && !self.session.calibration_pending {
            if let Some(delta) = self.session.follow_dial(dial) {
                info!(
                    "dial moved {:+} Hz, downlink nominal now {:.0} Hz",
                    delta, self.session.downlink_nominal_hz
                );
            }
        }
        if still && self.session.dial_was_still {
            self.track_autonomous(sample);
        }
        self.session.dial_was_still = still;
    }

    fn track_half_duplex(&mut self, sample: RangeRateSample) {
        let keyed = self.radio.is_ptt_keyed();
        let was_keyed = self.session.ptt_keyed;
        self.session.ptt_keyed = keyed;
        match (was_keyed, keyed) {
            (false, true) => {
                debug!("ptt keyed");
                if let Some(uplink) = self.session.uplink_target(sample) {
                    self.write_uplink(uplink);
                }
            }
            (true, false) => {
                debug!("ptt released");
                let downlink = self.session.downlink_target(sample);
                self.write_downlink(downlink);
            }
            (false, false) => {
                let downlink = self.session.downlink_target(sample);
                if self.session.needs_update(downlink, self.session.last_downlink_hz) {
                    self.write_downlink(downlink);
                }
            }
            (true, true) => {}
        }
    }

    /// Writes the receive VFO, which is left selected between ticks.
    fn write_downlink(&mut self, hz: i64) -> bool {
        let committed = self.radio.set_frequency(hz);
        if committed {
            self.session.last_downlink_hz = Some(hz);
        } else {
            debug!("downlink {} Hz not committed, retrying next tick", hz);
        }
        committed
    }

    /// Whether retuning the uplink now would touch a VFO that is on the air.
    fn uplink_busy(&mut self) -> bool {
        if self.session.strategy == VfoStrategy::CrossBand
            && self.radio.model().full_duplex_satellite_mode()
        {
            return false;
        }
        self.radio.is_ptt_keyed()
    }

    /// Uplink write outside the PTT edge logic. Skipped while keyed so the
    /// next tick picks it up.
    fn write_uplink_when_clear(&mut self, hz: i64) -> bool {
        if self.uplink_busy() {
            debug!("ptt keyed, uplink {} Hz deferred", hz);
            return false;
        }
        self.write_uplink(hz)
    }

    fn write_uplink(&mut self, hz: i64) -> bool {
        let strategy = self.session.strategy;
        let Some(tx) = strategy.tx_vfo() else {
            return false;
        };
        let committed = if strategy == VfoStrategy::Split
            && self.radio.model().supports_unselected_vfo()
        {
            self.radio.set_unselected_frequency(hz)
        } else if self.session.state == TrackingState::HalfDuplexPtt {
            // keyed in split: the radio has already swapped to its transmit VFO
            self.radio.set_frequency(hz)
        } else {
            if let Err(e) = self.radio.set_vfo(tx) {
                warn!("cannot select {} for uplink: {}", tx, e);
                return false;
            }
            let committed = self.radio.set_frequency(hz);
            log_setup("select rx vfo", self.radio.set_vfo(strategy.rx_vfo()));
            committed
        };
        if committed {
            self.session.last_uplink_hz = Some(hz);
        } else {
            debug!("uplink {} Hz not committed, retrying next tick", hz);
        }
        committed
    }

    fn publish(&self) {
        let link = self.radio.link_state();
        self.telemetry.publish_radio(
            self.session.last_downlink_hz,
            self.session.last_uplink_hz,
            self.session.downlink_nominal_hz + self.session.calibration_hz as f64,
            self.session.uplink_nominal_hz,
            self.session.calibration_hz,
            link.connected,
        );
        self.telemetry.set_state(self.session.state);
    }

    /// Worker body. Drains operator commands, samples the clock once per tick.
    pub fn run(
        mut self,
        ephemeris: Arc<dyn Ephemeris>,
        commands: Receiver<ControlCommand>,
        active: Arc<AtomicBool>,
    ) {
        let lead = self.settings.predictive_lead;
        while active.load(Ordering::Acquire) {
            for command in commands.try_iter() {
                self.apply(command);
            }
            let interval = match sample_range_rate(ephemeris.as_ref(), Utc::now(), lead) {
                Some(sample) => self.tick(sample),
                None => self.settings.linear_interval,
            };
            if !pause(&active, interval) {
                break;
            }
        }
        self.session.state = TrackingState::Idle;
        self.telemetry.set_state(TrackingState::Idle);
        info!(
            "{}/{}: tracking stopped",
            self.session.satellite, self.session.transponder
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::radio::{Command, RadioLinkState, RadioModel};
    use crate::tracker::{SatelliteConfig, TransponderLeg};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Frequency(Vfo, i64),
        Unselected(i64),
        Configure(Command),
    }

    /// Records every call; scripted dial and PTT readings.
    pub struct FakeRadio {
        pub model: RadioModel,
        pub calls: Arc<Mutex<Vec<Call>>>,
        pub dial: VecDeque<u64>,
        pub ptt: VecDeque<bool>,
        pub main_hz: Option<u64>,
        link: RadioLinkState,
    }

    impl FakeRadio {
        pub fn new(model: RadioModel) -> (Self, Arc<Mutex<Vec<Call>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let radio = Self {
                model,
                calls: calls.clone(),
                dial: VecDeque::new(),
                ptt: VecDeque::new(),
                main_hz: None,
                link: RadioLinkState::new(true),
            };
            (radio, calls)
        }
    }

    impl RadioControl for FakeRadio {
        fn model(&self) -> RadioModel {
            self.model
        }

        fn link_state(&self) -> RadioLinkState {
            self.link
        }

        fn set_frequency(&mut self, hz: i64) -> bool {
            self.link.last_written[self.link.current_vfo.slot()] = Some(hz as u64);
            self.calls
                .lock()
                .unwrap()
                .push(Call::Frequency(self.link.current_vfo, hz));
            true
        }

        fn set_unselected_frequency(&mut self, hz: i64) -> bool {
            self.calls.lock().unwrap().push(Call::Unselected(hz));
            true
        }

        fn get_frequency(&mut self) -> Option<u64> {
            if let Some(main) = self.main_hz.take() {
                return Some(main);
            }
            self.dial
                .pop_front()
                .or(self.link.last_written[self.link.current_vfo.slot()])
        }

        fn is_ptt_keyed(&mut self) -> bool {
            self.ptt.pop_front().unwrap_or(false)
        }

        fn configure(&mut self, command: Command) -> Result<(), RadioError> {
            if let Command::SelectVfo(vfo) = command {
                self.link.current_vfo = vfo;
            }
            self.calls.lock().unwrap().push(Call::Configure(command));
            Ok(())
        }
    }

    fn satellite(down: (&str, f64), up: Option<(&str, f64)>) -> SatelliteConfig {
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

    fn tracking_loop(config: &SatelliteConfig, radio: FakeRadio) -> TrackingLoop {
        let settings = TrackingSettings::default();
        let session = TrackingSession::new(config, &settings).unwrap();
        TrackingLoop::new(Box::new(radio), session, settings, Telemetry::new())
    }

    fn frequency_writes(calls: &Arc<Mutex<Vec<Call>>>) -> Vec<Call> {
        calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !matches!(c, Call::Configure(_)))
            .cloned()
            .collect()
    }

    #[test]
    fn test_initialize_cross_band_writes_corrected_frequencies() {
        let (mut radio, calls) = FakeRadio::new(RadioModel::Ic9700);
        radio.main_hz = Some(435_000_000);
        let mut config = satellite(("FM", 145_900_000.0), Some(("FM", 435_500_000.0)));
        config.tone_hz = Some(67.0);
        config.tone_squelch_hz = Some(67.0);
        let mut tracking = tracking_loop(&config, radio);

        tracking.initialize(RangeRateSample::instantaneous(7000.0));

        let recorded = calls.lock().unwrap().clone();
        for expected in [
            Command::SetSatelliteMode(true),
            Command::ExchangeBands,
            Command::SetToneOn(true),
            Command::SetToneSquelchHz(670),
            Command::SetToneSquelchOn(true),
            Command::SetAfc(false),
            Command::SetRitOn(false),
        ] {
            assert!(recorded.contains(&Call::Configure(expected)), "{:?}", expected);
        }
        assert_eq!(
            frequency_writes(&calls),
            vec![
                Call::Frequency(Vfo::Main, 145_896_593),
                Call::Frequency(Vfo::Sub, 435_510_169),
            ]
        );
        assert_eq!(tracking.session().state, TrackingState::FmAutonomous);
        let snap = tracking.telemetry.snapshot();
        assert_eq!(snap.downlink_radio_hz, Some(145_896_593));
        assert_eq!(snap.state, TrackingState::FmAutonomous);
    }

    #[test]
    fn test_fm_threshold_gates_writes() {
        let (radio, calls) = FakeRadio::new(RadioModel::Ic9700);
        let config = satellite(("FM", 145_900_000.0), None);
        let mut tracking = tracking_loop(&config, radio);
        let still = RangeRateSample::instantaneous(0.0);
        tracking.initialize(still);
        assert_eq!(frequency_writes(&calls).len(), 1);

        tracking.apply(ControlCommand::Calibration(200));
        assert_eq!(tracking.tick(still), Duration::from_millis(300));
        assert_eq!(frequency_writes(&calls).len(), 1);

        tracking.apply(ControlCommand::Calibration(201));
        tracking.tick(still);
        assert_eq!(
            frequency_writes(&calls).last(),
            Some(&Call::Frequency(Vfo::A, 145_900_201))
        );
    }

    #[test]
    fn test_interactive_follows_dial_then_writes() {
        let (mut radio, calls) = FakeRadio::new(RadioModel::Ic9700);
        radio.main_hz = Some(145_000_000);
        radio.dial = VecDeque::from(vec![145_901_000; 5]);
        let config = satellite(("USB", 145_900_000.0), Some(("LSB", 435_500_000.0)));
        let mut tracking = tracking_loop(&config, radio);
        let still = RangeRateSample::instantaneous(0.0);
        tracking.initialize(still);
        assert_eq!(tracking.session().state, TrackingState::LinearInteractive);
        let writes_after_init = frequency_writes(&calls).len();

        for _ in 0..4 {
            tracking.tick(still);
        }
        assert_eq!(tracking.session().downlink_nominal_hz, 145_901_000.0);
        assert_eq!(tracking.session().uplink_nominal_hz, Some(435_501_000.0));
        assert_eq!(frequency_writes(&calls).len(), writes_after_init);

        tracking.tick(still);
        assert_eq!(
            frequency_writes(&calls)[writes_after_init..],
            [Call::Frequency(Vfo::Sub, 435_501_000)]
        );
    }

    #[test]
    fn test_half_duplex_ptt_edges() {
        let (mut radio, calls) = FakeRadio::new(RadioModel::Ic9700);
        radio.ptt = VecDeque::from(vec![false, true, true, false]);
        let config = satellite(("FM", 435_800_000.0), Some(("FM", 435_300_000.0)));
        let mut tracking = tracking_loop(&config, radio);
        let still = RangeRateSample::instantaneous(0.0);
        tracking.initialize(still);
        assert_eq!(tracking.session().state, TrackingState::HalfDuplexPtt);
        let writes_after_init = frequency_writes(&calls).len();

        for _ in 0..4 {
            assert_eq!(tracking.tick(still), Duration::from_millis(50));
        }
        assert_eq!(
            frequency_writes(&calls)[writes_after_init..],
            [
                Call::Unselected(435_300_000),
                Call::Frequency(Vfo::A, 435_800_000),
            ]
        );
    }

    #[test]
    fn test_data_mode_writes_every_change() {
        let (radio, calls) = FakeRadio::new(RadioModel::Ic9100);
        let config = satellite(("DATA-USB", 145_825_000.0), None);
        let mut tracking = tracking_loop(&config, radio);
        tracking.initialize(RangeRateSample::instantaneous(0.0));
        // 1 Hz of Doppler at 145.825 MHz is about 2.06 m/s
        tracking.tick(RangeRateSample::instantaneous(-2.1));
        assert_eq!(
            frequency_writes(&calls).last(),
            Some(&Call::Frequency(Vfo::A, 145_825_001))
        );
    }

    #[test]
    fn test_sync_forces_rewrite() {
        let (radio, calls) = FakeRadio::new(RadioModel::Ic9700);
        let config = satellite(("FM", 145_900_000.0), None);
        let mut tracking = tracking_loop(&config, radio);
        let still = RangeRateSample::instantaneous(0.0);
        tracking.initialize(still);
        tracking.apply(ControlCommand::Sync);
        tracking.tick(still);
        assert_eq!(frequency_writes(&calls).len(), 2);
    }

    #[test]
    fn test_uplink_waits_for_ptt_release() {
        let (mut radio, calls) = FakeRadio::new(RadioModel::Ic9100);
        radio.ptt = VecDeque::from(vec![true, true]);
        let config = satellite(("LSB", 435_800_000.0), Some(("USB", 145_900_000.0)));
        let mut tracking = tracking_loop(&config, radio);
        let approaching = RangeRateSample::instantaneous(-3000.0);

        for _ in 0..6 {
            tracking.tick(approaching);
        }
        assert_eq!(tracking.session().state, TrackingState::LinearInteractive);
        assert_eq!(tracking.session().last_uplink_hz, None);
        assert_eq!(
            frequency_writes(&calls),
            [Call::Frequency(Vfo::Main, 435_804_361)]
        );
        assert!(!calls
            .lock()
            .unwrap()
            .iter()
            .skip_while(|c| !matches!(c, Call::Frequency(..)))
            .any(|c| *c == Call::Configure(Command::SelectVfo(Vfo::Sub))));

        tracking.tick(approaching);
        assert_eq!(
            frequency_writes(&calls),
            [
                Call::Frequency(Vfo::Main, 435_804_361),
                Call::Frequency(Vfo::Sub, 145_898_540),
            ]
        );
    }

    #[test]
    fn test_half_duplex_without_unselected_vfo_stays_put() {
        let (mut radio, calls) = FakeRadio::new(RadioModel::Ic9100);
        radio.ptt = VecDeque::from(vec![false, false, true, false]);
        let config = satellite(("FM", 435_800_000.0), Some(("FM", 435_300_000.0)));
        let mut tracking = tracking_loop(&config, radio);
        let still = RangeRateSample::instantaneous(0.0);
        tracking.initialize(still);
        assert_eq!(tracking.session().state, TrackingState::HalfDuplexPtt);
        assert!(calls
            .lock()
            .unwrap()
            .contains(&Call::Configure(Command::ClearDuplex)));
        let after_init = calls.lock().unwrap().len();

        for _ in 0..4 {
            tracking.tick(still);
        }
        assert_eq!(
            calls.lock().unwrap()[after_init..],
            [
                Call::Frequency(Vfo::A, 435_300_000),
                Call::Frequency(Vfo::A, 435_800_000),
            ]
        );
    }
}
