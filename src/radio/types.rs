use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use super::RadioError;

/// Transponder operating mode as named in satellite frequency lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    #[strum(to_string = "FM")]
    Fm,
    #[strum(to_string = "FMN")]
    Fmn,
    #[strum(to_string = "USB")]
    Usb,
    #[strum(to_string = "LSB")]
    Lsb,
    #[strum(to_string = "CW")]
    Cw,
    #[strum(to_string = "DATA-USB")]
    DataUsb,
    #[strum(to_string = "DATA-LSB")]
    DataLsb,
}

impl Mode {
    pub fn is_fm(self) -> bool {
        matches!(self, Mode::Fm | Mode::Fmn)
    }

    /// Machine-decoded modes that must follow Doppler without manual tuning.
    pub fn is_data(self) -> bool {
        matches!(self, Mode::DataUsb | Mode::DataLsb)
    }

    /// Mode the radio is switched to for this transponder mode.
    pub fn operating_mode(self) -> OperatingMode {
        match self {
            Mode::Fm => OperatingMode::Fm,
            Mode::Fmn => OperatingMode::FmNarrow,
            Mode::Usb | Mode::DataUsb => OperatingMode::Usb,
            Mode::Lsb | Mode::DataLsb => OperatingMode::Lsb,
            Mode::Cw => OperatingMode::Cw,
        }
    }
}

impl FromStr for Mode {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "FM" => Ok(Mode::Fm),
            "FMN" => Ok(Mode::Fmn),
            "USB" => Ok(Mode::Usb),
            "LSB" => Ok(Mode::Lsb),
            "CW" => Ok(Mode::Cw),
            "DATA-USB" => Ok(Mode::DataUsb),
            "DATA-LSB" => Ok(Mode::DataLsb),
            _ => Err(RadioError::UnknownMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = RadioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.to_string()
    }
}

/// Demodulator setting sent with command `06`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum OperatingMode {
    Lsb,
    Usb,
    Cw,
    Fm,
    FmNarrow,
}

impl OperatingMode {
    pub fn opcode(self) -> u8 {
        match self {
            OperatingMode::Lsb => 0x00,
            OperatingMode::Usb => 0x01,
            OperatingMode::Cw => 0x03,
            OperatingMode::Fm => 0x04,
            OperatingMode::FmNarrow => 0x05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum Vfo {
    A,
    B,
    Main,
    Sub,
}

impl Vfo {
    pub fn opcode(self) -> u8 {
        match self {
            Vfo::A => 0x00,
            Vfo::B => 0x01,
            Vfo::Main => 0xD0,
            Vfo::Sub => 0xD1,
        }
    }

    /// Index of the frequency slot this VFO shares with its counterpart.
    pub(crate) fn slot(self) -> usize {
        match self {
            Vfo::A | Vfo::Main => 0,
            Vfo::B | Vfo::Sub => 1,
        }
    }
}

/// Amateur-satellite sub-bands covered by this radio family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Band {
    Vhf,
    Uhf,
    LBand,
}

impl Band {
    pub const ALL: [Band; 3] = [Band::Vhf, Band::Uhf, Band::LBand];

    pub fn range_hz(self) -> RangeInclusive<i64> {
        match self {
            Band::Vhf => 144_000_000..=148_000_000,
            Band::Uhf => 430_000_000..=450_000_000,
            Band::LBand => 1_200_000_000..=1_300_000_000,
        }
    }

    pub fn of(hz: i64) -> Option<Band> {
        Band::ALL.into_iter().find(|b| b.range_hz().contains(&hz))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum RadioModel {
    #[strum(to_string = "IC-910")]
    Ic910,
    #[strum(to_string = "IC-9100")]
    Ic9100,
    #[strum(to_string = "IC-9700")]
    Ic9700,
}

impl RadioModel {
    pub fn default_address(self) -> u8 {
        match self {
            RadioModel::Ic910 => 0x60,
            RadioModel::Ic9100 => 0x7C,
            RadioModel::Ic9700 => 0xA2,
        }
    }

    pub fn satellite_mode_opcode(self) -> [u8; 2] {
        match self {
            RadioModel::Ic910 => [0x1A, 0x07],
            RadioModel::Ic9100 | RadioModel::Ic9700 => [0x16, 0x5A],
        }
    }

    /// Whether the radio answers transmit-status queries.
    pub fn reports_ptt(self) -> bool {
        !matches!(self, RadioModel::Ic910)
    }

    pub fn supports_unselected_vfo(self) -> bool {
        matches!(self, RadioModel::Ic9700)
    }

    /// RIT on/off and RIT offset commands.
    pub fn supports_rit(self) -> bool {
        matches!(self, RadioModel::Ic9700)
    }

    pub fn supports_afc(self) -> bool {
        matches!(self, RadioModel::Ic9700)
    }

    /// Receives and transmits at once in satellite mode, so the uplink VFO
    /// can be retuned while keyed.
    pub fn full_duplex_satellite_mode(self) -> bool {
        matches!(self, RadioModel::Ic9700)
    }
}

impl FromStr for RadioModel {
    type Err = RadioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.trim_start_matches("ic") {
            "910" | "910h" => Ok(RadioModel::Ic910),
            "9100" => Ok(RadioModel::Ic9100),
            "9700" => Ok(RadioModel::Ic9700),
            _ => Err(RadioError::UnknownModel(s.to_string())),
        }
    }
}

impl TryFrom<String> for RadioModel {
    type Error = RadioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!("data-usb".parse::<Mode>().unwrap(), Mode::DataUsb);
        assert_eq!("FMN".parse::<Mode>().unwrap(), Mode::Fmn);
        assert_eq!(Mode::DataLsb.to_string(), "DATA-LSB");
        assert!(matches!("AM".parse::<Mode>(), Err(RadioError::UnknownMode(_))));
    }

    #[test]
    fn test_data_modes_use_sideband() {
        assert_eq!(Mode::DataUsb.operating_mode(), OperatingMode::Usb);
        assert_eq!(Mode::DataLsb.operating_mode().opcode(), 0x00);
        assert_eq!(Mode::Fmn.operating_mode().opcode(), 0x05);
    }

    #[test]
    fn test_band_lookup() {
        assert_eq!(Band::of(145_900_000), Some(Band::Vhf));
        assert_eq!(Band::of(435_500_000), Some(Band::Uhf));
        assert_eq!(Band::of(1_268_000_000), Some(Band::LBand));
        assert_eq!(Band::of(600_000_000), None);
        assert_eq!(Band::of(-1), None);
    }

    #[test]
    fn test_model_parsing() {
        assert_eq!("IC-910".parse::<RadioModel>().unwrap(), RadioModel::Ic910);
        assert_eq!("9700".parse::<RadioModel>().unwrap(), RadioModel::Ic9700);
        assert!("ft-847".parse::<RadioModel>().is_err());
        assert!(!RadioModel::Ic910.reports_ptt());
    }
}
