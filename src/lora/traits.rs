//! Transceiver abstraction shared by the SX126x driver and the test mock
//!
//! The radio is driven without blocking: transmit and receive are started,
//! and completion is picked up later through `poll_event`. This lets one task
//! own the radio and interleave TX, RX and other work.

use crate::config::limits::MAX_LORA_PAYLOAD;
use crate::config::lora_defaults;
use crate::error::TallyError;
use crate::store::FrequencyBand;
use core::future::Future;
use heapless::Vec;

/// Radio driver failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoraError {
    /// BUSY line never dropped
    BusyTimeout,
    SpiError,
    /// Payload empty or too long, or a parameter the chip cannot take
    InvalidConfig,
    /// Packet could not be handed to the chip
    TransmitFailed,
    /// RX buffer empty or unreadable
    ReceiveFailed,
    /// Called before a successful detection
    NotInitialised,
    /// The chip did not answer or rejected the band
    ChipNotFound,
}

impl From<LoraError> for TallyError {
    fn from(e: LoraError) -> Self {
        match e {
            LoraError::BusyTimeout => TallyError::LinkTimeout,
            LoraError::NotInitialised | LoraError::ChipNotFound | LoraError::SpiError => TallyError::DeviceAbsent,
            LoraError::InvalidConfig => TallyError::InvalidArgument,
            LoraError::TransmitFailed | LoraError::ReceiveFailed => TallyError::ProtocolError,
        }
    }
}

/// Supported transceivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipType {
    /// 850-930 MHz module
    Sx1262,
    /// 410-493 MHz module
    Sx1268,
}

impl ChipType {
    /// Detection order
    pub const DETECT_ORDER: [ChipType; 2] = [ChipType::Sx1262, ChipType::Sx1268];

    pub fn name(self) -> &'static str {
        match self {
            ChipType::Sx1262 => "SX1262 (868MHz)",
            ChipType::Sx1268 => "SX1268 (433MHz)",
        }
    }

    /// Frequency the chip is detected and started on
    pub fn detect_mhz(self) -> f32 {
        match self {
            ChipType::Sx1262 => lora_defaults::SX1262_DETECT_MHZ,
            ChipType::Sx1268 => lora_defaults::SX1268_DETECT_MHZ,
        }
    }

    pub fn band(self) -> FrequencyBand {
        match self {
            ChipType::Sx1262 => FrequencyBand {
                min_mhz: 850.0,
                max_mhz: 930.0,
                default_mhz: 868.0,
            },
            ChipType::Sx1268 => FrequencyBand {
                min_mhz: 410.0,
                max_mhz: 493.0,
                default_mhz: 433.0,
            },
        }
    }
}

/// Modulation and RF settings applied at detection
#[derive(Debug, Clone, PartialEq)]
pub struct LoraConfig {
    /// Centre frequency in MHz
    pub frequency_mhz: f32,
    /// SF7 to SF12
    pub spreading_factor: u8,
    /// Whole kHz; 125 when not a SX126x step
    pub bandwidth_khz: u32,
    /// Denominator of 4/x, 5..=8
    pub coding_rate: u8,
    /// dBm at the PA output
    pub tx_power_dbm: i8,
    pub preamble_length: u16,
    pub sync_word: u8,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: lora_defaults::SX1262_DETECT_MHZ,
            spreading_factor: lora_defaults::SPREADING_FACTOR,
            bandwidth_khz: lora_defaults::BANDWIDTH_KHZ,
            coding_rate: lora_defaults::CODING_RATE,
            tx_power_dbm: lora_defaults::TX_POWER_DBM,
            preamble_length: lora_defaults::PREAMBLE_LENGTH,
            sync_word: lora_defaults::SYNC_WORD,
        }
    }
}

/// Frame off the air, with link quality in dBm / dB
#[derive(Debug, Clone, PartialEq)]
pub struct RxPacket {
    pub data: Vec<u8, MAX_LORA_PAYLOAD>,
    pub rssi: i16,
    pub snr: i8,
}

/// Completion reported by the radio
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// Nothing pending
    Idle,
    TxDone,
    RxDone(RxPacket),
    /// A packet arrived with a bad CRC
    CrcError,
    Timeout,
}

/// Half-duplex transceiver owned by the radio task
pub trait LoraRadio {
    /// Reset the radio and try to bring it up as `chip` with `config`
    ///
    /// Fails with `ChipNotFound` when the chip does not answer or cannot
    /// calibrate for the configured band.
    fn detect(&mut self, chip: ChipType, config: &LoraConfig) -> impl Future<Output = Result<(), LoraError>>;

    fn set_frequency(&mut self, mhz: f32) -> impl Future<Output = Result<(), LoraError>>;

    fn set_sync_word(&mut self, sync_word: u8) -> impl Future<Output = Result<(), LoraError>>;

    /// Load `data` and start transmitting; completion arrives as `TxDone`
    fn start_transmit(&mut self, data: &[u8]) -> impl Future<Output = Result<(), LoraError>>;

    /// Enter continuous receive
    fn start_receive(&mut self) -> impl Future<Output = Result<(), LoraError>>;

    /// Read and clear the pending interrupt, fetching a packet if one arrived
    fn poll_event(&mut self) -> impl Future<Output = Result<RadioEvent, LoraError>>;

    /// Resolve once the interrupt line is raised
    fn wait_irq(&mut self) -> impl Future<Output = ()>;

    /// Instantaneous RSSI in dBm on the current frequency
    fn rssi(&mut self) -> impl Future<Output = Result<i16, LoraError>>;

    fn sleep(&mut self) -> impl Future<Output = Result<(), LoraError>>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_bands() {
        assert!(ChipType::Sx1262.band().contains(868.0));
        assert!(ChipType::Sx1262.band().contains(915.0));
        assert!(!ChipType::Sx1262.band().contains(433.0));
        assert!(ChipType::Sx1268.band().contains(433.0));
        assert_eq!(ChipType::Sx1268.band().default_mhz, ChipType::Sx1268.detect_mhz());
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(TallyError::from(LoraError::BusyTimeout), TallyError::LinkTimeout);
        assert_eq!(TallyError::from(LoraError::ChipNotFound), TallyError::DeviceAbsent);
        assert_eq!(TallyError::from(LoraError::InvalidConfig), TallyError::InvalidArgument);
    }
}
