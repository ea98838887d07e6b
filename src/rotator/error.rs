use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum RotatorError {
    #[error("invalid rotator limits: {0}")]
    InvalidLimits(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
