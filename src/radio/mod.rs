mod error;
pub mod frame;
mod icom;
mod types;

use serde::Serialize;

pub use error::RadioError;
pub use frame::Command;
pub use icom::{IcomRadio, RetryPolicy};
pub use types::{Band, Mode, OperatingMode, RadioModel, Vfo};

/// Connectivity and VFO bookkeeping owned by a radio driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RadioLinkState {
    pub connected: bool,
    pub current_vfo: Vfo,
    /// Last frequency written to the A/Main and B/Sub slots.
    pub last_written: [Option<u64>; 2],
}

impl RadioLinkState {
    pub fn new(connected: bool) -> Self {
        Self {
            connected,
            current_vfo: Vfo::Main,
            last_written: [None, None],
        }
    }
}

/// Hardware-independent command surface used by the tracking loop.
///
/// Frequency writes and setup commands are deliberately separate paths:
/// `set_frequency` is fire-once, `configure` retries per the driver's policy.
pub trait RadioControl: Send {
    fn model(&self) -> RadioModel;

    fn link_state(&self) -> RadioLinkState;

    /// Tunes the selected VFO. Returns whether the radio committed the value.
    fn set_frequency(&mut self, hz: i64) -> bool;

    /// Tunes the VFO that is not selected, on radios that allow it.
    fn set_unselected_frequency(&mut self, hz: i64) -> bool;

    fn get_frequency(&mut self) -> Option<u64>;

    /// Always `false` on radios that cannot report transmit status.
    fn is_ptt_keyed(&mut self) -> bool;

    fn configure(&mut self, command: Command) -> Result<(), RadioError>;

    fn set_mode(&mut self, mode: OperatingMode) -> Result<(), RadioError> {
        self.configure(Command::SetMode(mode))
    }

    fn set_vfo(&mut self, vfo: Vfo) -> Result<(), RadioError> {
        self.configure(Command::SelectVfo(vfo))
    }

    fn set_satellite_mode(&mut self, on: bool) -> Result<(), RadioError> {
        self.configure(Command::SetSatelliteMode(on))
    }

    fn set_split(&mut self, on: bool) -> Result<(), RadioError> {
        self.configure(Command::SetSplit(on))
    }

    /// Simplex: no repeater offset on the transmit frequency.
    fn clear_duplex(&mut self) -> Result<(), RadioError> {
        self.configure(Command::ClearDuplex)
    }

    fn exchange_bands(&mut self) -> Result<(), RadioError> {
        self.configure(Command::ExchangeBands)
    }

    fn set_tone_on(&mut self, on: bool) -> Result<(), RadioError> {
        self.configure(Command::SetToneOn(on))
    }

    fn set_tone_hz(&mut self, hz: f64) -> Result<(), RadioError> {
        self.configure(Command::SetToneHz(frame::tone_tenths(hz)))
    }

    fn set_tone_squelch_on(&mut self, on: bool) -> Result<(), RadioError> {
        self.configure(Command::SetToneSquelchOn(on))
    }

    fn set_tone_squelch_hz(&mut self, hz: f64) -> Result<(), RadioError> {
        self.configure(Command::SetToneSquelchHz(frame::tone_tenths(hz)))
    }

    fn set_afc(&mut self, on: bool) -> Result<(), RadioError> {
        self.configure(Command::SetAfc(on))
    }

    fn set_rit(&mut self, on: bool) -> Result<(), RadioError> {
        self.configure(Command::SetRitOn(on))
    }

    fn set_rit_frequency(&mut self, hz: i16) -> Result<(), RadioError> {
        self.configure(Command::SetRitFrequency(hz))
    }
}
