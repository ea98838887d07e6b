mod error;
mod ground_station;
mod parsing;
mod pass_finder;
mod propagator;
mod sun;
mod types;

use chrono::{DateTime, Utc};

pub use error::PredictError;
pub use ground_station::GroundStation;
pub use parsing::parse_tle_lines;
pub use propagator::Sgp4Ephemeris;
pub use types::{LookAngles, PassWindow};

/// Source of satellite look angles for one satellite seen from one observer.
///
/// Implementations are shared by the tracking loop, the rotator loop and the
/// telemetry task, so they must be callable from several threads at once.
pub trait Ephemeris: Send + Sync {
    fn look_at(&self, at: DateTime<Utc>) -> Result<LookAngles, PredictError>;

    /// Next pass starting at or after `from`. A pass already in progress is
    /// returned with its rise time in the past.
    fn next_pass(&self, from: DateTime<Utc>) -> Result<Option<PassWindow>, PredictError>;
}
