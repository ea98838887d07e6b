use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("unsupported mode: {0}")]
    UnknownMode(String),
    #[error("unknown radio model: {0}")]
    UnknownModel(String),
    #[error("frequency {0} Hz outside supported bands")]
    InvalidFrequency(i64),
    #[error("{0} not supported by this radio")]
    Unsupported(&'static str),
    #[error("no acknowledgement for {command} after {attempts} attempts")]
    NoAck {
        command: &'static str,
        attempts: u32,
    },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
