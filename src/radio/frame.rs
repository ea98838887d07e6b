//! CI-V framing: `FE FE <to> <from> <command...> FD`.

use super::types::{OperatingMode, RadioModel, Vfo};

pub const PREAMBLE: [u8; 2] = [0xFE, 0xFE];
pub const TERMINATOR: u8 = 0xFD;
pub const ACK: u8 = 0xFB;
pub const NAK: u8 = 0xFA;
pub const CONTROLLER_ADDRESS: u8 = 0x00;
const BROADCAST_ADDRESS: u8 = 0x00;

const FREQUENCY_DIGIT_PAIRS: usize = 5;
const MAX_FREQUENCY_HZ: u64 = 9_999_999_999;

/// Every command the driver can put on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetFrequency(u64),
    ReadFrequency,
    SetMode(OperatingMode),
    SelectVfo(Vfo),
    ExchangeBands,
    SetSatelliteMode(bool),
    SetSplit(bool),
    ClearDuplex,
    SetToneOn(bool),
    SetToneSquelchOn(bool),
    /// Tone frequency in tenths of a Hz.
    SetToneHz(u16),
    SetToneSquelchHz(u16),
    SetAfc(bool),
    SetRitOn(bool),
    SetRitFrequency(i16),
    ReadTransmitStatus,
    SetUnselectedFrequency(u64),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetFrequency(_) => "set_frequency",
            Command::ReadFrequency => "read_frequency",
            Command::SetMode(_) => "set_mode",
            Command::SelectVfo(_) => "select_vfo",
            Command::ExchangeBands => "exchange_bands",
            Command::SetSatelliteMode(_) => "set_satellite_mode",
            Command::SetSplit(_) => "set_split",
            Command::ClearDuplex => "clear_duplex",
            Command::SetToneOn(_) => "set_tone_on",
            Command::SetToneSquelchOn(_) => "set_tone_squelch_on",
            Command::SetToneHz(_) => "set_tone_hz",
            Command::SetToneSquelchHz(_) => "set_tone_squelch_hz",
            Command::SetAfc(_) => "set_afc",
            Command::SetRitOn(_) => "set_rit_on",
            Command::SetRitFrequency(_) => "set_rit_frequency",
            Command::ReadTransmitStatus => "read_transmit_status",
            Command::SetUnselectedFrequency(_) => "set_unselected_frequency",
        }
    }

    /// Command and data bytes between the addresses and the terminator.
    pub fn payload(&self, model: RadioModel) -> Vec<u8> {
        let flag = |on: bool| u8::from(on);
        match *self {
            Command::SetFrequency(hz) => {
                let mut out = vec![0x05];
                out.extend_from_slice(&encode_bcd_frequency(hz));
                out
            }
            Command::ReadFrequency => vec![0x03],
            Command::SetMode(mode) => vec![0x06, mode.opcode()],
            Command::SelectVfo(vfo) => vec![0x07, vfo.opcode()],
            Command::ExchangeBands => vec![0x07, 0xB0],
            Command::SetSatelliteMode(on) => {
                let [a, b] = model.satellite_mode_opcode();
                vec![a, b, flag(on)]
            }
            Command::SetSplit(on) => vec![0x0F, flag(on)],
            Command::ClearDuplex => vec![0x0F, 0x10],
            Command::SetToneOn(on) => vec![0x16, 0x42, flag(on)],
            Command::SetToneSquelchOn(on) => vec![0x16, 0x43, flag(on)],
            Command::SetToneHz(tenths) => {
                let [hi, lo] = encode_tone(tenths);
                vec![0x1B, 0x00, hi, lo]
            }
            Command::SetToneSquelchHz(tenths) => {
                let [hi, lo] = encode_tone(tenths);
                vec![0x1B, 0x01, hi, lo]
            }
            Command::SetAfc(on) => vec![0x16, 0x4A, flag(on)],
            Command::SetRitOn(on) => vec![0x1A, 0x06, flag(on)],
            Command::SetRitFrequency(hz) => {
                let magnitude = hz.unsigned_abs().min(9999);
                let digits = to_bcd_digits(u64::from(magnitude), 2);
                vec![0x21, 0x00, digits[0], digits[1], flag(hz < 0)]
            }
            Command::ReadTransmitStatus => vec![0x1C, 0x00],
            Command::SetUnselectedFrequency(hz) => {
                let mut out = vec![0x25, 0x01];
                out.extend_from_slice(&encode_bcd_frequency(hz));
                out
            }
        }
    }
}

pub fn encode_frame(to: u8, from: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 5);
    frame.extend_from_slice(&PREAMBLE);
    frame.push(to);
    frame.push(from);
    frame.extend_from_slice(payload);
    frame.push(TERMINATOR);
    frame
}

/// Packs `value` into `pairs` BCD bytes, least-significant pair first.
fn to_bcd_digits(mut value: u64, pairs: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(pairs);
    for _ in 0..pairs {
        let lo = (value % 10) as u8;
        value /= 10;
        let hi = (value % 10) as u8;
        value /= 10;
        out.push((hi << 4) | lo);
    }
    out
}

fn from_bcd_digits(bytes: &[u8]) -> Option<u64> {
    let mut value = 0u64;
    for byte in bytes.iter().rev() {
        let hi = byte >> 4;
        let lo = byte & 0x0F;
        if hi > 9 || lo > 9 {
            return None;
        }
        value = value * 100 + u64::from(hi) * 10 + u64::from(lo);
    }
    Some(value)
}

/// Ten-digit frequency as five BCD bytes, least-significant pair first.
pub fn encode_bcd_frequency(hz: u64) -> [u8; FREQUENCY_DIGIT_PAIRS] {
    let digits = to_bcd_digits(hz.min(MAX_FREQUENCY_HZ), FREQUENCY_DIGIT_PAIRS);
    let mut out = [0u8; FREQUENCY_DIGIT_PAIRS];
    out.copy_from_slice(&digits);
    out
}

pub fn decode_bcd_frequency(bytes: &[u8]) -> Option<u64> {
    if bytes.len() != FREQUENCY_DIGIT_PAIRS {
        return None;
    }
    from_bcd_digits(bytes)
}

/// Four-digit tone in tenths of Hz, most-significant pair first (67.0 Hz -> `06 70`).
pub fn encode_tone(tenths: u16) -> [u8; 2] {
    let digits = to_bcd_digits(u64::from(tenths.min(9999)), 2);
    [digits[1], digits[0]]
}

/// Tone in Hz to the tenths the radio expects.
pub fn tone_tenths(hz: f64) -> u16 {
    (hz * 10.0).round().clamp(0.0, 9999.0) as u16
}

/// A frame received from the radio, addresses and envelope removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nak,
    Data { command: u8, data: Vec<u8> },
}

impl Reply {
    pub fn is_ack(&self) -> bool {
        matches!(self, Reply::Ack)
    }

    /// Frequency carried by a read-frequency answer or a transceive broadcast.
    pub fn frequency(&self) -> Option<u64> {
        match self {
            Reply::Data { command, data } if *command == 0x03 || *command == 0x00 => {
                decode_bcd_frequency(data)
            }
            _ => None,
        }
    }

    pub fn transmitting(&self) -> Option<bool> {
        match self {
            Reply::Data { command: 0x1C, data } if data.len() == 2 && data[0] == 0x00 => {
                Some(data[1] == 0x01)
            }
            _ => None,
        }
    }
}

pub fn ack_frame(radio: u8, controller: u8) -> [u8; 6] {
    [PREAMBLE[0], PREAMBLE[1], controller, radio, ACK, TERMINATOR]
}

/// Validates a raw receive buffer and extracts the reply addressed to us.
///
/// Only the last complete frame is considered; echoes of our own commands and
/// anything malformed yield `None`.
pub fn decode_reply(buf: &[u8], radio: u8, controller: u8) -> Option<Reply> {
    let ack = ack_frame(radio, controller);
    let mut buf = buf;
    if buf.len() > ack.len() && buf.starts_with(&ack) {
        buf = &buf[ack.len()..];
    }

    let terminators: Vec<usize> = buf
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == TERMINATOR)
        .map(|(i, _)| i)
        .collect();
    if terminators.len() > 1 {
        buf = &buf[terminators[terminators.len() - 2] + 1..];
    }

    if buf.len() < 6 || !buf.starts_with(&PREAMBLE) || buf[buf.len() - 1] != TERMINATOR {
        return None;
    }
    let (to, from) = (buf[2], buf[3]);
    if from != radio || (to != controller && to != BROADCAST_ADDRESS) {
        return None;
    }

    let body = &buf[4..buf.len() - 1];
    match body {
        [ACK] => Some(Reply::Ack),
        [NAK] => Some(Reply::Nak),
        [command, data @ ..] => Some(Reply::Data {
            command: *command,
            data: data.to_vec(),
        }),
        [] => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RADIO: u8 = 0x60;

    #[test]
    fn test_set_frequency_frame_layout() {
        let payload = Command::SetFrequency(145_900_000).payload(RadioModel::Ic910);
        let frame = encode_frame(RADIO, CONTROLLER_ADDRESS, &payload);
        assert_eq!(
            frame,
            vec![0xFE, 0xFE, 0x60, 0x00, 0x05, 0x00, 0x00, 0x90, 0x45, 0x01, 0xFD]
        );
    }

    #[test]
    fn test_bcd_frequency_round_trip() {
        let bytes = encode_bcd_frequency(145_900_000);
        assert_eq!(decode_bcd_frequency(&bytes), Some(145_900_000));
        assert_eq!(
            decode_bcd_frequency(&encode_bcd_frequency(1_268_123_456)),
            Some(1_268_123_456)
        );
        assert_eq!(decode_bcd_frequency(&[0x00, 0x0A, 0x00, 0x00, 0x00]), None);
        assert_eq!(decode_bcd_frequency(&[0x00, 0x00]), None);
    }

    #[test]
    fn test_tone_encoding() {
        assert_eq!(encode_tone(tone_tenths(67.0)), [0x06, 0x70]);
        assert_eq!(encode_tone(tone_tenths(71.9)), [0x07, 0x19]);
        assert_eq!(encode_tone(tone_tenths(123.0)), [0x12, 0x30]);
        assert_eq!(
            Command::SetToneHz(670).payload(RadioModel::Ic910),
            vec![0x1B, 0x00, 0x06, 0x70]
        );
        assert_eq!(
            Command::SetToneSquelchHz(670).payload(RadioModel::Ic9700),
            vec![0x1B, 0x01, 0x06, 0x70]
        );
    }

    #[test]
    fn test_receive_setup_opcodes() {
        let m = RadioModel::Ic9700;
        assert_eq!(Command::ClearDuplex.payload(m), vec![0x0F, 0x10]);
        assert_eq!(Command::SetToneSquelchOn(true).payload(m), vec![0x16, 0x43, 0x01]);
        assert_eq!(Command::SetAfc(false).payload(m), vec![0x16, 0x4A, 0x00]);
        assert_eq!(Command::SetRitOn(false).payload(m), vec![0x1A, 0x06, 0x00]);
    }

    #[test]
    fn test_satellite_mode_depends_on_model() {
        assert_eq!(
            Command::SetSatelliteMode(true).payload(RadioModel::Ic910),
            vec![0x1A, 0x07, 0x01]
        );
        assert_eq!(
            Command::SetSatelliteMode(false).payload(RadioModel::Ic9700),
            vec![0x16, 0x5A, 0x00]
        );
    }

    #[test]
    fn test_rit_frequency_sign() {
        assert_eq!(
            Command::SetRitFrequency(-150).payload(RadioModel::Ic9700),
            vec![0x21, 0x00, 0x50, 0x01, 0x01]
        );
    }

    #[test]
    fn test_decode_ack_and_nak() {
        let ack = ack_frame(RADIO, CONTROLLER_ADDRESS);
        assert_eq!(decode_reply(&ack, RADIO, 0x00), Some(Reply::Ack));
        let nak = [0xFE, 0xFE, 0x00, RADIO, NAK, 0xFD];
        assert_eq!(decode_reply(&nak, RADIO, 0x00), Some(Reply::Nak));
    }

    #[test]
    fn test_decode_keeps_last_frame_only() {
        // echo of our query followed by the answer
        let mut buf = encode_frame(RADIO, 0x00, &[0x03]);
        buf.extend_from_slice(&encode_frame(
            0x00,
            RADIO,
            &[0x03, 0x00, 0x00, 0x90, 0x45, 0x01],
        ));
        let reply = decode_reply(&buf, RADIO, 0x00).unwrap();
        assert_eq!(reply.frequency(), Some(145_900_000));
    }

    #[test]
    fn test_decode_strips_leading_ack() {
        let mut buf = ack_frame(RADIO, 0x00).to_vec();
        buf.extend_from_slice(&encode_frame(0x00, RADIO, &[0x1C, 0x00, 0x01]));
        let reply = decode_reply(&buf, RADIO, 0x00).unwrap();
        assert_eq!(reply.transmitting(), Some(true));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode_reply(&[], RADIO, 0x00), None);
        assert_eq!(decode_reply(&[0xFE, 0xFE, 0x00, RADIO, 0x03], RADIO, 0x00), None);
        assert_eq!(decode_reply(&[0x00, 0xFE, 0x00, RADIO, 0xFB, 0xFD], RADIO, 0x00), None);
        // our own echo only
        let echo = encode_frame(RADIO, 0x00, &[0x03]);
        assert_eq!(decode_reply(&echo, RADIO, 0x00), None);
        // another radio on the bus
        assert_eq!(decode_reply(&ack_frame(0xA2, 0x00), RADIO, 0x00), None);
    }
}
