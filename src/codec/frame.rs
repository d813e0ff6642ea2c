//! LoRa air frames
//!
//! All multi-byte fields are little-endian. The physical layer supplies
//! preamble and CRC, so frames carry neither.

use crate::codec::device::{DeviceRequest, DeviceResponse};
use crate::config::limits::{MAX_CHANNELS, MAX_FRAME_SIZE};
use crate::error::TallyError;
use crate::tally::types::channel_mask;
use heapless::Vec;

/// Frame header bytes
pub mod header {
    pub const TALLY_8CH: u8 = 0xF1;
    pub const TALLY_12CH: u8 = 0xF2;
    pub const TALLY_16CH: u8 = 0xF3;
    pub const TALLY_20CH: u8 = 0xF4;
    pub const LEGACY_TALLY: u8 = 0xAA;
    pub const STATUS: u8 = 0xBB;
    pub const CONFIG_CHANGE: u8 = 0xFC;
}

/// Encoded frame buffer
pub type FrameBuf = Vec<u8, MAX_FRAME_SIZE>;

/// Size of a config-change frame
pub const CONFIG_CHANGE_LEN: usize = 6;

/// Size of a status frame
pub const STATUS_LEN: usize = 8;

/// Tally packet-size class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyClass {
    Ch8,
    Ch12,
    Ch16,
    Ch20,
}

impl TallyClass {
    /// Smallest class covering `max_channel`
    pub fn for_channels(max_channel: u8) -> Self {
        match max_channel {
            0..=8 => TallyClass::Ch8,
            9..=12 => TallyClass::Ch12,
            13..=16 => TallyClass::Ch16,
            _ => TallyClass::Ch20,
        }
    }

    pub fn from_header(byte: u8) -> Option<Self> {
        match byte {
            header::TALLY_8CH => Some(TallyClass::Ch8),
            header::TALLY_12CH => Some(TallyClass::Ch12),
            header::TALLY_16CH => Some(TallyClass::Ch16),
            header::TALLY_20CH => Some(TallyClass::Ch20),
            _ => None,
        }
    }

    pub fn header(self) -> u8 {
        match self {
            TallyClass::Ch8 => header::TALLY_8CH,
            TallyClass::Ch12 => header::TALLY_12CH,
            TallyClass::Ch16 => header::TALLY_16CH,
            TallyClass::Ch20 => header::TALLY_20CH,
        }
    }

    pub fn channels(self) -> u8 {
        match self {
            TallyClass::Ch8 => 8,
            TallyClass::Ch12 => 12,
            TallyClass::Ch16 => 16,
            TallyClass::Ch20 => 20,
        }
    }

    /// Payload length in bytes (four channels per byte)
    pub fn payload_len(self) -> usize {
        self.channels() as usize / 4
    }
}

/// Status report from an RX node (`0xBB`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFrame {
    pub device_id: u8,
    pub battery_level: u8,
    pub rssi: i8,
    pub uptime: u32,
}

/// Decoded air frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `0xAA` frame with an explicit channel count
    TallyLegacy { channel_count: u8, packed: u64 },
    /// `0xF1..0xF4` frame
    Tally { channel_count: u8, packed: u64 },
    /// `0xAA` frame with zero channels
    Heartbeat,
    ConfigChange { frequency_mhz: f32, sync_word: u8 },
    Status(StatusFrame),
    DeviceRequest(DeviceRequest),
    DeviceResponse(DeviceResponse),
    /// Anything else; not an error
    Unknown(u8),
}

fn push_le(buf: &mut FrameBuf, value: u64, len: usize) {
    for i in 0..len {
        let _ = buf.push((value >> (8 * i)) as u8);
    }
}

fn read_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | ((b as u64) << (8 * i)))
}

/// Encode a tally frame in the smallest class covering `max_channel`
pub fn encode_tally(packed: u64, max_channel: u8) -> FrameBuf {
    let class = TallyClass::for_channels(max_channel);
    let mut buf = FrameBuf::new();
    let _ = buf.push(class.header());
    push_le(&mut buf, packed & channel_mask(class.channels()), class.payload_len());
    buf
}

/// Encode a legacy `0xAA` tally frame
///
/// Fails with `InvalidArgument` above 20 channels.
pub fn encode_legacy_tally(packed: u64, channel_count: u8) -> Result<FrameBuf, TallyError> {
    if channel_count > MAX_CHANNELS {
        return Err(TallyError::InvalidArgument);
    }
    let mut buf = FrameBuf::new();
    let _ = buf.push(header::LEGACY_TALLY);
    let _ = buf.push(channel_count);
    let len = (channel_count as usize).div_ceil(4);
    push_le(&mut buf, packed & channel_mask(channel_count), len);
    Ok(buf)
}

/// `[0xAA, 0x00]`
pub fn encode_heartbeat() -> FrameBuf {
    let mut buf = FrameBuf::new();
    let _ = buf.push(header::LEGACY_TALLY);
    let _ = buf.push(0x00);
    buf
}

pub fn encode_config_change(frequency_mhz: f32, sync_word: u8) -> FrameBuf {
    let mut buf = FrameBuf::new();
    let _ = buf.push(header::CONFIG_CHANGE);
    let _ = buf.extend_from_slice(&frequency_mhz.to_le_bytes());
    let _ = buf.push(sync_word);
    buf
}

pub fn encode_status(status: &StatusFrame) -> FrameBuf {
    let mut buf = FrameBuf::new();
    let _ = buf.push(header::STATUS);
    let _ = buf.push(status.device_id);
    let _ = buf.push(status.battery_level);
    let _ = buf.push(status.rssi as u8);
    let _ = buf.extend_from_slice(&status.uptime.to_le_bytes());
    buf
}

/// Decode one frame, dispatching on the first byte
///
/// Frames shorter than their class minimum fail with `InvalidArgument`.
/// A legacy frame declaring more than 20 channels fails with `ProtocolError`.
pub fn decode(bytes: &[u8]) -> Result<Frame, TallyError> {
    let (&first, rest) = bytes.split_first().ok_or(TallyError::InvalidArgument)?;

    if let Some(class) = TallyClass::from_header(first) {
        let len = class.payload_len();
        if rest.len() < len {
            return Err(TallyError::InvalidArgument);
        }
        return Ok(Frame::Tally {
            channel_count: class.channels(),
            packed: read_le(&rest[..len]) & channel_mask(class.channels()),
        });
    }

    match first {
        header::LEGACY_TALLY => {
            let (&channel_count, payload) = rest.split_first().ok_or(TallyError::InvalidArgument)?;
            if channel_count == 0 {
                return Ok(Frame::Heartbeat);
            }
            if channel_count > MAX_CHANNELS {
                return Err(TallyError::ProtocolError);
            }
            let len = (channel_count as usize).div_ceil(4);
            if payload.len() < len {
                return Err(TallyError::InvalidArgument);
            }
            Ok(Frame::TallyLegacy {
                channel_count,
                packed: read_le(&payload[..len]) & channel_mask(channel_count),
            })
        }
        header::CONFIG_CHANGE => {
            if bytes.len() < CONFIG_CHANGE_LEN {
                return Err(TallyError::InvalidArgument);
            }
            let frequency_mhz = f32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            Ok(Frame::ConfigChange {
                frequency_mhz,
                sync_word: rest[4],
            })
        }
        header::STATUS => {
            if bytes.len() < STATUS_LEN {
                return Err(TallyError::InvalidArgument);
            }
            Ok(Frame::Status(StatusFrame {
                device_id: rest[0],
                battery_level: rest[1],
                rssi: rest[2] as i8,
                uptime: u32::from_le_bytes([rest[3], rest[4], rest[5], rest[6]]),
            }))
        }
        0xE0..=0xEF => DeviceRequest::decode(bytes).map(Frame::DeviceRequest),
        0xD0..=0xDF => DeviceResponse::decode(bytes).map(Frame::DeviceResponse),
        other => Ok(Frame::Unknown(other)),
    }
}
