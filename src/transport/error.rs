use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open {port}: {message}")]
    Open { port: String, message: String },
    #[error("serial io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),
}
