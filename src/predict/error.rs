use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("invalid tle format")]
    InvalidTleFormat,
    #[error("invalid tle: {0}")]
    InvalidTle(String),
    #[error("Propagation error: {0}")]
    Propagation(String),
}
