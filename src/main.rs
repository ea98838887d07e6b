mod config;
mod doppler;
mod predict;
mod radio;
mod rotator;
mod tracker;
mod transport;
mod worker;

use clap::{Parser, Subcommand};
use log::{error, warn};
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{Config, ConfigError};
use crate::predict::{Ephemeris, PassWindow};
use crate::radio::RadioControl;
use crate::rotator::{Gs232Rotator, RotatorSettings, RouteOptimizer};
use crate::tracker::{
    RadioFactory, RotatorFactory, SatelliteConfig, TelemetrySnapshot, Tracker, TrackerError,
    TrackingSession,
};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "sat-o-tune")]
#[command(about = "Doppler tuning and antenna pointing for amateur satellites")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a station config file
    Validate { config: String },
    /// Track a satellite transponder until stopped
    Track {
        config: String,
        satellite: String,
        transponder: String,
        /// Leave the rotator alone even if one is configured
        #[arg(long)]
        no_rotator: bool,
        /// Stop after this long, e.g. "12m"
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
        /// Print telemetry as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Park the rotator
    Park { config: String },
    /// Show the next pass of a satellite
    Next { config: String, satellite: String },
}

/// Operator input read from stdin while tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperatorCommand {
    Calibration(i64),
    Dial(bool),
    Sync,
    Status,
    Quit,
}

impl std::str::FromStr for OperatorCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = match (words.next(), words.next()) {
            (Some("cal"), Some(hz)) => hz
                .parse()
                .map(OperatorCommand::Calibration)
                .map_err(|_| format!("bad calibration offset: {}", hz))?,
            (Some("dial"), Some("on")) => OperatorCommand::Dial(true),
            (Some("dial"), Some("off")) => OperatorCommand::Dial(false),
            (Some("sync"), None) => OperatorCommand::Sync,
            (Some("status"), None) => OperatorCommand::Status,
            (Some("q" | "quit"), None) => OperatorCommand::Quit,
            _ => return Err(format!("unknown command: {}", line.trim())),
        };
        Ok(command)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Track {
            config,
            satellite,
            transponder,
            no_rotator,
            duration,
            json,
        } => track(&config, &satellite, &transponder, no_rotator, duration, json),
        Commands::Park { config } => park(&config),
        Commands::Next { config, satellite } => next(&config, &satellite),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn validate(path: &str) -> Result<(), ConfigError> {
    let config = Config::from_file(path)?;
    config.validate()?;
    println!(
        "Config is valid for {} ({}, {} satellites)",
        config.station.name.as_deref().unwrap_or("unnamed station"),
        config.radio.model()?,
        config.satellites.len()
    );
    for satellite in &config.satellites {
        for entry in &satellite.transponders {
            let resolved = satellite.resolve(entry)?;
            let session = TrackingSession::new(&resolved, &config.tracking)?;
            let uplink = session
                .uplink()
                .map(|u| format!("{:.0} Hz {}", u.frequency_hz, u.mode))
                .unwrap_or_else(|| "none".to_string());
            println!(
                "  {}/{}: down {:.0} Hz {}, up {}, {} -> {}",
                satellite.name,
                entry.name,
                session.downlink().frequency_hz,
                session.downlink().mode,
                uplink,
                session.strategy,
                session.operating_state
            );
        }
    }
    Ok(())
}

fn track(
    path: &str,
    satellite: &str,
    transponder: &str,
    no_rotator: bool,
    duration: Option<Duration>,
    json: bool,
) -> Result<(), ConfigError> {
    let config = Config::from_file(path)?;
    let station = config.station.ground_station()?;
    let entry = config.satellite(satellite)?;
    let selected = entry.transponder(transponder)?;
    let model = config.radio.model()?;
    let ephemeris: Arc<dyn Ephemeris> = Arc::new(entry.ephemeris(station)?);

    let radio_config = config.radio.clone();
    let factory: RadioFactory =
        Box::new(move || Box::new(radio_config.open(model)) as Box<dyn RadioControl>);
    let mut tracker = Tracker::new(config.tracking.clone(), factory);
    if let (false, Some(settings)) = (no_rotator, config.rotator.clone()) {
        let open: RotatorFactory = Box::new(Gs232Rotator::open);
        tracker = tracker.with_rotator(settings, open);
    }
    tracker.start_tracking(&selected, ephemeris)?;

    let (input_tx, input_rx) = mpsc::channel();
    thread::Builder::new().name("stdin".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if input_tx.send(line.parse::<OperatorCommand>()).is_err() {
                return;
            }
        }
        let _ = input_tx.send(Ok(OperatorCommand::Quit));
    })?;

    let deadline = duration.map(|d| Instant::now() + d);
    let mut next_status = Instant::now();
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let now = Instant::now();
        if now >= next_status {
            print_snapshot(&tracker.snapshot(), json);
            next_status = now + STATUS_INTERVAL;
        }
        match input_rx.recv_timeout(next_status.saturating_duration_since(Instant::now())) {
            Ok(Ok(OperatorCommand::Quit)) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Ok(command)) => {
                if let Err(e) = apply(&mut tracker, &selected, command, json) {
                    eprintln!("{}", e);
                }
            }
            Ok(Err(e)) => eprintln!("{} (try: cal <hz>, dial on|off, sync, status, q)", e),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    tracker.stop_tracking();
    Ok(())
}

fn apply(
    tracker: &mut Tracker,
    selected: &SatelliteConfig,
    command: OperatorCommand,
    json: bool,
) -> Result<(), TrackerError> {
    match command {
        OperatorCommand::Calibration(hz) => {
            tracker.set_calibration_offset(&selected.name, &selected.transponder, hz)?
        }
        OperatorCommand::Dial(on) => tracker.set_interactive_dial_tracking(on),
        OperatorCommand::Sync => tracker.sync()?,
        OperatorCommand::Status => print_snapshot(&tracker.snapshot(), json),
        OperatorCommand::Quit => {}
    }
    Ok(())
}

fn print_snapshot(snapshot: &TelemetrySnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("cannot serialize telemetry: {}", e),
        }
        return;
    }
    println!("{}", format_snapshot(snapshot));
}

fn format_snapshot(s: &TelemetrySnapshot) -> String {
    let hz = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
    let deg = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v));
    let mut line = format!(
        "{} | DL {} ({:+.0} Hz, {:+.1} Hz/s) | UL {} ({:+.0} Hz) | az {} el {}",
        s.state,
        hz(s.downlink_radio_hz),
        s.downlink_doppler_hz,
        s.downlink_doppler_rate_hz_s,
        hz(s.uplink_radio_hz),
        s.uplink_doppler_hz,
        deg(s.azimuth_deg),
        deg(s.elevation_deg),
    );
    if s.calibration_hz != 0 {
        line.push_str(&format!(" | cal {:+} Hz", s.calibration_hz));
    }
    if s.rotator_az_deg.is_some() || s.parked {
        line.push_str(&format!(
            " | rot {}/{}{}",
            deg(s.rotator_az_deg),
            deg(s.rotator_el_deg),
            if s.parked { " parked" } else { "" }
        ));
    }
    if s.eclipsed {
        line.push_str(" | eclipsed");
    }
    if !s.link_connected {
        line.push_str(" | radio offline");
    }
    if let Some(event) = &s.next_event {
        line.push_str(&format!(" | {}", event));
    }
    line
}

fn park(path: &str) -> Result<(), ConfigError> {
    let config = Config::from_file(path)?;
    let settings = config.rotator()?;
    let mut rotator = Gs232Rotator::open(settings)?;
    let optimizer = RouteOptimizer::new(settings.limits, settings.min_elevation_deg);
    let azimuth = match rotator.position(true)? {
        Some(current) => optimizer.best_azimuth(current.azimuth_deg, settings.park_azimuth_deg),
        None => settings.park_azimuth_deg,
    };
    rotator.park(azimuth, settings.park_elevation_deg)?;
    println!(
        "Parking at az {:.0} el {:.0}",
        azimuth, settings.park_elevation_deg
    );
    Ok(())
}

fn next(path: &str, satellite: &str) -> Result<(), ConfigError> {
    let config = Config::from_file(path)?;
    let station = config.station.ground_station()?;
    let entry = config.satellite(satellite)?;
    let ephemeris = entry.ephemeris(station)?;
    let now = chrono::Utc::now();
    match ephemeris.next_pass(now)? {
        Some(pass) => {
            println!(
                "{}: rise {} | TCA {} | LOS {} | max el {:.1}",
                ephemeris.object_name().unwrap_or(&entry.name),
                pass.rise.format("%Y-%m-%d %H:%M:%S"),
                pass.tca.format("%H:%M:%S"),
                pass.los.format("%H:%M:%S"),
                pass.max_elevation_deg
            );
            println!("{}", pass.next_event(now));
            if let Some(settings) = &config.rotator {
                advise_pre_positioning(settings, &ephemeris, &pass)?;
            }
        }
        None => println!("{}: no pass in the search window", entry.name),
    }
    Ok(())
}

/// Suggests where to leave the rotator before AOS.
fn advise_pre_positioning(
    settings: &RotatorSettings,
    ephemeris: &dyn Ephemeris,
    pass: &PassWindow,
) -> Result<(), ConfigError> {
    let optimizer = RouteOptimizer::new(settings.limits, settings.min_elevation_deg);
    let window = (pass.los - pass.rise).to_std().unwrap_or_default();
    let samples =
        optimizer.predict_positions(ephemeris, pass.rise, window, settings.sample_interval)?;
    let current = match Gs232Rotator::open(settings).and_then(|mut r| r.position(true)) {
        Ok(position) => position.map(|p| p.azimuth_deg),
        Err(e) => {
            warn!("rotator position unavailable: {}", e);
            None
        }
    };
    let advice = optimizer.pre_positioning(&optimizer.filter_visible(&samples), current);
    match (advice.should_preposition, advice.recommended_az) {
        (true, Some(azimuth)) => println!("rotator: move to az {:.0} ({})", azimuth, advice.reason),
        _ => println!("rotator: {}", advice.reason),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackingState;

    #[test]
    fn test_operator_commands() {
        assert_eq!("cal -150".parse(), Ok(OperatorCommand::Calibration(-150)));
        assert_eq!("dial off".parse(), Ok(OperatorCommand::Dial(false)));
        assert_eq!(" sync ".parse(), Ok(OperatorCommand::Sync));
        assert_eq!("q".parse(), Ok(OperatorCommand::Quit));
        assert!("cal fast".parse::<OperatorCommand>().is_err());
        assert!("dial maybe".parse::<OperatorCommand>().is_err());
    }

    #[test]
    fn test_format_snapshot() {
        let snapshot = TelemetrySnapshot {
            state: TrackingState::FmAutonomous,
            downlink_radio_hz: Some(145_896_593),
            uplink_radio_hz: None,
            downlink_nominal_hz: Some(145_900_000.0),
            uplink_nominal_hz: None,
            calibration_hz: 0,
            downlink_doppler_hz: -3406.69,
            downlink_doppler_rate_hz_s: 12.5,
            uplink_doppler_hz: 0.0,
            uplink_doppler_rate_hz_s: 0.0,
            elevation_deg: Some(45.68),
            azimuth_deg: Some(123.46),
            height_km: Some(420.0),
            sub_lat_deg: None,
            sub_lon_deg: None,
            eclipsed: false,
            link_connected: true,
            rotator_az_deg: None,
            rotator_el_deg: None,
            parked: false,
            next_event: Some("LOS in 00:04:00".to_string()),
        };
        assert_eq!(
            format_snapshot(&snapshot),
            "FmAutonomous | DL 145896593 (-3407 Hz, +12.5 Hz/s) | UL - (+0 Hz) | az 123.5 el 45.7 | LOS in 00:04:00"
        );
    }
}
