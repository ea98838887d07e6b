use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker already running")]
    AlreadyRunning,
    #[error("no tracking session")]
    Idle,
    #[error("not tracking {satellite}/{transponder}")]
    NotTracking {
        satellite: String,
        transponder: String,
    },
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),
    #[error("unknown radio model: {0}")]
    UnknownRadioModel(String),
    #[error("{satellite}/{transponder} has no downlink")]
    MissingDownlink {
        satellite: String,
        transponder: String,
    },
    #[error("invalid nominal frequency {0} Hz")]
    InvalidFrequency(f64),
    #[error("failed to start worker: {0}")]
    Spawn(#[from] std::io::Error),
}
