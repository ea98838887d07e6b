use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;

use super::frame::{decode_reply, encode_frame, Command, Reply, CONTROLLER_ADDRESS};
use super::{Band, RadioControl, RadioError, RadioLinkState, RadioModel, Vfo};
use crate::transport::{SerialSettings, SerialTransport, Transport};

/// Retry policy for setup commands. Frequency writes never retry.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay", with = "crate::config::duration")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            delay: default_retry_delay(),
        }
    }
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(100)
}

/// CI-V driver for the Icom satellite transceivers.
///
/// Without a transport the driver runs in dummy mode: every write succeeds
/// locally and reads return the last value written to the selected VFO.
pub struct IcomRadio {
    transport: Option<Box<dyn Transport>>,
    model: RadioModel,
    address: u8,
    controller: u8,
    retry: RetryPolicy,
    link: RadioLinkState,
}

impl IcomRadio {
    pub fn connect(settings: &SerialSettings, model: RadioModel, address: Option<u8>) -> Self {
        let address = address.unwrap_or_else(|| model.default_address());
        match SerialTransport::open(settings) {
            Ok(transport) => {
                info!(
                    "{} connected on {} at {} baud (CI-V {:#04x})",
                    model, settings.port, settings.baud, address
                );
                Self::with_transport(Box::new(transport), model, address)
            }
            Err(e) => {
                warn!("{} unreachable ({}), running in dummy mode", model, e);
                Self::dummy(model, address)
            }
        }
    }

    pub fn with_transport(transport: Box<dyn Transport>, model: RadioModel, address: u8) -> Self {
        Self {
            transport: Some(transport),
            model,
            address,
            controller: CONTROLLER_ADDRESS,
            retry: RetryPolicy::default(),
            link: RadioLinkState::new(true),
        }
    }

    pub fn dummy(model: RadioModel, address: u8) -> Self {
        Self {
            transport: None,
            model,
            address,
            controller: CONTROLLER_ADDRESS,
            retry: RetryPolicy::default(),
            link: RadioLinkState::new(false),
        }
    }

    pub fn with_controller_address(mut self, controller: u8) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One write/read round trip. `Ok(None)` means nothing usable came back.
    fn transact(&mut self, command: &Command) -> Result<Option<Reply>, RadioError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(None);
        };
        let frame = encode_frame(self.address, self.controller, &command.payload(self.model));
        let result = transport
            .clear_input()
            .and_then(|_| transport.write_all(&frame))
            .and_then(|_| transport.read_burst());
        match result {
            Ok(raw) => {
                self.link.connected = true;
                let reply = decode_reply(&raw, self.address, self.controller);
                if reply.is_none() && !raw.is_empty() {
                    debug!("{}: discarded malformed reply {:02X?}", command.name(), raw);
                }
                Ok(reply)
            }
            Err(e) => {
                self.link.connected = false;
                Err(e.into())
            }
        }
    }

    fn record_local(&mut self, command: &Command) {
        match command {
            Command::SelectVfo(vfo) => self.link.current_vfo = *vfo,
            Command::ExchangeBands => self.link.last_written.swap(0, 1),
            _ => {}
        }
    }

    fn validate(hz: i64) -> Option<u64> {
        Band::of(hz).map(|_| hz as u64)
    }
}

impl RadioControl for IcomRadio {
    fn model(&self) -> RadioModel {
        self.model
    }

    fn link_state(&self) -> RadioLinkState {
        self.link
    }

    fn set_frequency(&mut self, hz: i64) -> bool {
        let Some(hz) = Self::validate(hz) else {
            warn!("refusing to tune to {} Hz: outside satellite sub-bands", hz);
            return false;
        };
        let slot = self.link.current_vfo.slot();
        if self.transport.is_none() {
            self.link.last_written[slot] = Some(hz);
            return true;
        }
        // a missed write is superseded by the next tick, so no retry here
        match self.transact(&Command::SetFrequency(hz)) {
            Ok(Some(Reply::Ack)) => {
                self.link.last_written[slot] = Some(hz);
                true
            }
            Ok(reply) => {
                debug!("set_frequency {} Hz not acknowledged: {:?}", hz, reply);
                false
            }
            Err(e) => {
                debug!("set_frequency {} Hz failed: {}", hz, e);
                false
            }
        }
    }

    fn set_unselected_frequency(&mut self, hz: i64) -> bool {
        if !self.model.supports_unselected_vfo() {
            return false;
        }
        let Some(hz) = Self::validate(hz) else {
            warn!("refusing to tune unselected VFO to {} Hz", hz);
            return false;
        };
        let slot = 1 - self.link.current_vfo.slot();
        if self.transport.is_none() {
            self.link.last_written[slot] = Some(hz);
            return true;
        }
        match self.transact(&Command::SetUnselectedFrequency(hz)) {
            Ok(reply) if reply.as_ref().is_some_and(|r| r.is_ack()) => {
                self.link.last_written[slot] = Some(hz);
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!("set_unselected_frequency {} Hz failed: {}", hz, e);
                false
            }
        }
    }

    fn get_frequency(&mut self) -> Option<u64> {
        if self.transport.is_none() {
            return self.link.last_written[self.link.current_vfo.slot()];
        }
        match self.transact(&Command::ReadFrequency) {
            Ok(reply) => reply.and_then(|r| r.frequency()),
            Err(e) => {
                debug!("read_frequency failed: {}", e);
                None
            }
        }
    }

    fn is_ptt_keyed(&mut self) -> bool {
        if !self.model.reports_ptt() || self.transport.is_none() {
            return false;
        }
        match self.transact(&Command::ReadTransmitStatus) {
            Ok(reply) => reply.and_then(|r| r.transmitting()).unwrap_or(false),
            Err(e) => {
                debug!("read_transmit_status failed: {}", e);
                false
            }
        }
    }

    fn configure(&mut self, command: Command) -> Result<(), RadioError> {
        match command {
            Command::SetFrequency(_)
            | Command::SetUnselectedFrequency(_)
            | Command::ReadFrequency
            | Command::ReadTransmitStatus => return Err(RadioError::Unsupported(command.name())),
            Command::SetRitOn(_) | Command::SetRitFrequency(_) if !self.model.supports_rit() => {
                return Err(RadioError::Unsupported(command.name()))
            }
            Command::SetAfc(_) if !self.model.supports_afc() => {
                return Err(RadioError::Unsupported(command.name()))
            }
            _ => {}
        }

        if self.transport.is_none() {
            self.record_local(&command);
            return Ok(());
        }

        let attempts = self.retry.retries + 1;
        for attempt in 1..=attempts {
            match self.transact(&command) {
                Ok(Some(Reply::Ack)) => {
                    self.record_local(&command);
                    return Ok(());
                }
                Ok(Some(Reply::Nak)) => {
                    debug!("{} rejected (attempt {}/{})", command.name(), attempt, attempts)
                }
                Ok(_) => debug!("{} unanswered (attempt {}/{})", command.name(), attempt, attempts),
                Err(e) => warn!("{} failed (attempt {}/{}): {}", command.name(), attempt, attempts, e),
            }
            if attempt < attempts {
                thread::sleep(self.retry.delay);
            }
        }
        Err(RadioError::NoAck {
            command: command.name(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::frame::{ack_frame, NAK};
    use crate::radio::OperatingMode;
    use crate::transport::mock::MockTransport;

    const ADDR: u8 = 0xA2;

    fn radio(mock: &MockTransport, model: RadioModel) -> IcomRadio {
        IcomRadio::with_transport(mock.boxed(), model, ADDR).with_retry_policy(RetryPolicy {
            retries: 2,
            delay: Duration::ZERO,
        })
    }

    fn nak() -> [u8; 6] {
        [0xFE, 0xFE, 0x00, ADDR, NAK, 0xFD]
    }

    #[test]
    fn test_out_of_band_frequency_is_not_sent() {
        let mock = MockTransport::new();
        let mut radio = radio(&mock, RadioModel::Ic9700);
        assert!(!radio.set_frequency(0));
        assert!(!radio.set_frequency(-145_900_000));
        assert!(!radio.set_frequency(600_000_000));
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_in_band_frequency_is_committed() {
        let mock = MockTransport::new();
        mock.push_reply(&ack_frame(ADDR, 0x00));
        let mut radio = radio(&mock, RadioModel::Ic9700);
        assert!(radio.set_frequency(435_500_000));
        assert_eq!(
            mock.writes(),
            vec![vec![0xFE, 0xFE, ADDR, 0x00, 0x05, 0x00, 0x00, 0x50, 0x35, 0x04, 0xFD]]
        );
        assert_eq!(radio.link_state().last_written[0], Some(435_500_000));
    }

    #[test]
    fn test_frequency_write_never_retries() {
        let mock = MockTransport::new();
        mock.push_reply(&nak());
        let mut radio = radio(&mock, RadioModel::Ic9700);
        assert!(!radio.set_frequency(145_900_000));
        assert_eq!(mock.writes().len(), 1);
        // a refused write is not remembered as the radio's frequency
        assert_eq!(radio.link_state().last_written, [None, None]);
    }

    #[test]
    fn test_setup_command_retries_until_ack() {
        let mock = MockTransport::new();
        mock.push_reply(&nak());
        mock.push_reply(&[]);
        mock.push_reply(&ack_frame(ADDR, 0x00));
        let mut radio = radio(&mock, RadioModel::Ic9700);
        radio.set_mode(OperatingMode::Usb).unwrap();
        assert_eq!(mock.writes().len(), 3);
        assert_eq!(mock.writes()[0], vec![0xFE, 0xFE, ADDR, 0x00, 0x06, 0x01, 0xFD]);
    }

    #[test]
    fn test_setup_command_gives_up_after_retries() {
        let mock = MockTransport::new();
        let mut radio = radio(&mock, RadioModel::Ic9700);
        let err = radio.set_vfo(Vfo::Sub).unwrap_err();
        assert!(matches!(err, RadioError::NoAck { attempts: 3, .. }));
        assert_eq!(mock.writes().len(), 3);
        // failed selection leaves the VFO where it was
        assert_eq!(radio.link_state().current_vfo, Vfo::Main);
    }

    #[test]
    fn test_read_frequency_parses_reply() {
        let mock = MockTransport::new();
        let mut reply = vec![0xFE, 0xFE, ADDR, 0x00, 0x03, 0xFD];
        reply.extend_from_slice(&[0xFE, 0xFE, 0x00, ADDR, 0x03, 0x00, 0x00, 0x90, 0x45, 0x01, 0xFD]);
        mock.push_reply(&reply);
        let mut radio = radio(&mock, RadioModel::Ic9700);
        assert_eq!(radio.get_frequency(), Some(145_900_000));
        assert_eq!(radio.get_frequency(), None);
    }

    #[test]
    fn test_ptt_query() {
        let mock = MockTransport::new();
        mock.push_reply(&[0xFE, 0xFE, 0x00, ADDR, 0x1C, 0x00, 0x01, 0xFD]);
        let mut radio = radio(&mock, RadioModel::Ic9700);
        assert!(radio.is_ptt_keyed());

        let silent = MockTransport::new();
        let mut old = IcomRadio::with_transport(silent.boxed(), RadioModel::Ic910, 0x60);
        assert!(!old.is_ptt_keyed());
        assert!(silent.writes().is_empty());
    }

    #[test]
    fn test_dummy_mode_reads_back_per_vfo() {
        let mut radio = IcomRadio::dummy(RadioModel::Ic9100, 0x7C);
        assert!(!radio.link_state().connected);
        assert_eq!(radio.get_frequency(), None);
        assert!(radio.set_frequency(145_900_000));
        radio.set_vfo(Vfo::Sub).unwrap();
        assert!(radio.set_frequency(435_500_000));
        assert_eq!(radio.get_frequency(), Some(435_500_000));
        radio.set_vfo(Vfo::Main).unwrap();
        assert_eq!(radio.get_frequency(), Some(145_900_000));
        assert!(!radio.set_frequency(600_000_000));
        assert_eq!(radio.get_frequency(), Some(145_900_000));
    }

    #[test]
    fn test_frequency_commands_bypass_configure() {
        let mut radio = IcomRadio::dummy(RadioModel::Ic9100, 0x7C);
        assert!(matches!(
            radio.configure(Command::SetFrequency(145_900_000)),
            Err(RadioError::Unsupported(_))
        ));
        assert!(matches!(
            radio.set_rit_frequency(100),
            Err(RadioError::Unsupported(_))
        ));
        assert!(matches!(radio.set_afc(false), Err(RadioError::Unsupported(_))));
    }
}
