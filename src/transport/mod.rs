mod error;
mod serial;

#[cfg(test)]
pub mod mock;

use std::time::Duration;

use serde::Deserialize;

pub use error::TransportError;
pub use serial::SerialTransport;

/// Byte-oriented link shared by the radio and rotator drivers.
pub trait Transport: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Reads whatever arrives until the line goes quiet for one inter-byte
    /// timeout. Returns an empty buffer when nothing arrives within the read
    /// timeout.
    fn read_burst(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Drops stale bytes waiting in the receive buffer.
    fn clear_input(&mut self) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud: u32,
    #[serde(default = "default_read_timeout", with = "crate::config::duration")]
    pub read_timeout: Duration,
    #[serde(default = "default_write_timeout", with = "crate::config::duration")]
    pub write_timeout: Duration,
    #[serde(default = "default_inter_byte_timeout", with = "crate::config::duration")]
    pub inter_byte_timeout: Duration,
}

impl SerialSettings {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            inter_byte_timeout: default_inter_byte_timeout(),
        }
    }
}

fn default_read_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_write_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_inter_byte_timeout() -> Duration {
    Duration::from_millis(20)
}
