mod control;
mod error;
mod session;
mod telemetry;
mod tracker;
mod types;

pub use error::TrackerError;
pub use session::TrackingSession;
pub use telemetry::TelemetrySnapshot;
pub use tracker::{RadioFactory, RotatorFactory, Tracker};
pub use types::{SatelliteConfig, TrackingSettings, TrackingState, TransponderLeg, VfoStrategy};
