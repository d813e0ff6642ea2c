//! Device management frames exchanged between the TX node and RX nodes
//!
//! Requests (`0xE0..=0xE6`) flow TX → RX, responses (`0xD0..=0xD2`) flow back.
//! Every frame carries a 4-byte device id right after the header.

use crate::codec::frame::FrameBuf;
use crate::error::TallyError;

/// Request headers
pub mod request {
    pub const STATUS: u8 = 0xE0;
    pub const SET_BRIGHTNESS: u8 = 0xE1;
    pub const SET_CAMERA_ID: u8 = 0xE2;
    pub const SET_RF: u8 = 0xE3;
    pub const STOP: u8 = 0xE4;
    pub const REBOOT: u8 = 0xE5;
    pub const PING: u8 = 0xE6;
}

/// Response headers
pub mod response {
    pub const STATUS: u8 = 0xD0;
    pub const ACK: u8 = 0xD1;
    pub const PONG: u8 = 0xD2;
}

/// Status flag: node is stopped
pub const STATUS_FLAG_STOPPED: u8 = 0x01;

/// Four-byte device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub [u8; 4]);

impl DeviceId {
    pub const BROADCAST: DeviceId = DeviceId([0xFF; 4]);

    /// Identifier from the last two MAC bytes, as four uppercase hex digits
    pub fn from_mac(mac: &[u8; 6]) -> Self {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        DeviceId([
            HEX[(mac[4] >> 4) as usize],
            HEX[(mac[4] & 0x0F) as usize],
            HEX[(mac[5] >> 4) as usize],
            HEX[(mac[5] & 0x0F) as usize],
        ])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// True when a frame addressed to `self` targets `node`
    pub fn addresses(&self, node: &DeviceId) -> bool {
        self.is_broadcast() || self == node
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_broadcast() {
            return f.write_str("*");
        }
        match core::str::from_utf8(&self.0) {
            Ok(text) => f.write_str(text),
            Err(_) => write!(f, "{:02X}{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2], self.0[3]),
        }
    }
}

/// Result code carried by an ack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    Success,
    Unknown,
    Invalid,
    Failed,
}

impl AckResult {
    fn to_byte(self) -> u8 {
        match self {
            AckResult::Success => 0x00,
            AckResult::Unknown => 0x01,
            AckResult::Invalid => 0x02,
            AckResult::Failed => 0x03,
        }
    }

    fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => AckResult::Success,
            0x02 => AckResult::Invalid,
            0x03 => AckResult::Failed,
            _ => AckResult::Unknown,
        }
    }
}

/// TX → RX management request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceRequest {
    Status { target: DeviceId },
    /// Brightness in percent (0-100)
    SetBrightness { target: DeviceId, brightness: u8 },
    SetCameraId { target: DeviceId, camera_id: u8 },
    SetRf { target: DeviceId, frequency_mhz: f32, sync_word: u8 },
    Stop { target: DeviceId },
    Reboot { target: DeviceId },
    Ping { target: DeviceId, timestamp: u32 },
}

/// RX → TX management response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceResponse {
    Status {
        device: DeviceId,
        battery: u8,
        camera_id: u8,
        uptime_s: u32,
        brightness: u8,
        flags: u8,
    },
    Ack {
        device: DeviceId,
        command: u8,
        result: AckResult,
    },
    Pong {
        device: DeviceId,
        tx_timestamp: u32,
        rx_timestamp: u32,
    },
}

fn device_id(bytes: &[u8]) -> Result<DeviceId, TallyError> {
    match bytes.get(1..5) {
        Some(id) => Ok(DeviceId([id[0], id[1], id[2], id[3]])),
        None => Err(TallyError::InvalidArgument),
    }
}

fn u32_at(bytes: &[u8], offset: usize) -> Result<u32, TallyError> {
    match bytes.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(TallyError::InvalidArgument),
    }
}

fn byte_at(bytes: &[u8], offset: usize) -> Result<u8, TallyError> {
    bytes.get(offset).copied().ok_or(TallyError::InvalidArgument)
}

fn start(header: u8, id: &DeviceId) -> FrameBuf {
    let mut buf = FrameBuf::new();
    let _ = buf.push(header);
    let _ = buf.extend_from_slice(&id.0);
    buf
}

impl DeviceRequest {
    pub fn target(&self) -> DeviceId {
        match *self {
            DeviceRequest::Status { target }
            | DeviceRequest::SetBrightness { target, .. }
            | DeviceRequest::SetCameraId { target, .. }
            | DeviceRequest::SetRf { target, .. }
            | DeviceRequest::Stop { target }
            | DeviceRequest::Reboot { target }
            | DeviceRequest::Ping { target, .. } => target,
        }
    }

    pub fn header(&self) -> u8 {
        match self {
            DeviceRequest::Status { .. } => request::STATUS,
            DeviceRequest::SetBrightness { .. } => request::SET_BRIGHTNESS,
            DeviceRequest::SetCameraId { .. } => request::SET_CAMERA_ID,
            DeviceRequest::SetRf { .. } => request::SET_RF,
            DeviceRequest::Stop { .. } => request::STOP,
            DeviceRequest::Reboot { .. } => request::REBOOT,
            DeviceRequest::Ping { .. } => request::PING,
        }
    }

    pub fn encode(&self) -> FrameBuf {
        let mut buf = start(self.header(), &self.target());
        match *self {
            DeviceRequest::SetBrightness { brightness, .. } => {
                let _ = buf.push(brightness);
            }
            DeviceRequest::SetCameraId { camera_id, .. } => {
                let _ = buf.push(camera_id);
            }
            DeviceRequest::SetRf {
                frequency_mhz,
                sync_word,
                ..
            } => {
                let _ = buf.extend_from_slice(&frequency_mhz.to_le_bytes());
                let _ = buf.push(sync_word);
            }
            DeviceRequest::Ping { timestamp, .. } => {
                let _ = buf.extend_from_slice(&timestamp.to_le_bytes());
            }
            DeviceRequest::Status { .. } | DeviceRequest::Stop { .. } | DeviceRequest::Reboot { .. } => {}
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TallyError> {
        let header = byte_at(bytes, 0)?;
        let target = device_id(bytes)?;
        match header {
            request::STATUS => Ok(DeviceRequest::Status { target }),
            request::SET_BRIGHTNESS => Ok(DeviceRequest::SetBrightness {
                target,
                brightness: byte_at(bytes, 5)?,
            }),
            request::SET_CAMERA_ID => Ok(DeviceRequest::SetCameraId {
                target,
                camera_id: byte_at(bytes, 5)?,
            }),
            request::SET_RF => Ok(DeviceRequest::SetRf {
                target,
                frequency_mhz: f32::from_bits(u32_at(bytes, 5)?),
                sync_word: byte_at(bytes, 9)?,
            }),
            request::STOP => Ok(DeviceRequest::Stop { target }),
            request::REBOOT => Ok(DeviceRequest::Reboot { target }),
            request::PING => Ok(DeviceRequest::Ping {
                target,
                timestamp: u32_at(bytes, 5)?,
            }),
            _ => Err(TallyError::InvalidArgument),
        }
    }
}

impl DeviceResponse {
    pub fn device(&self) -> DeviceId {
        match *self {
            DeviceResponse::Status { device, .. }
            | DeviceResponse::Ack { device, .. }
            | DeviceResponse::Pong { device, .. } => device,
        }
    }

    pub fn encode(&self) -> FrameBuf {
        match *self {
            DeviceResponse::Status {
                device,
                battery,
                camera_id,
                uptime_s,
                brightness,
                flags,
            } => {
                let mut buf = start(response::STATUS, &device);
                let _ = buf.push(battery);
                let _ = buf.push(camera_id);
                let _ = buf.extend_from_slice(&uptime_s.to_le_bytes());
                let _ = buf.push(brightness);
                let _ = buf.push(flags);
                buf
            }
            DeviceResponse::Ack {
                device,
                command,
                result,
            } => {
                let mut buf = start(response::ACK, &device);
                let _ = buf.push(command);
                let _ = buf.push(result.to_byte());
                buf
            }
            DeviceResponse::Pong {
                device,
                tx_timestamp,
                rx_timestamp,
            } => {
                let mut buf = start(response::PONG, &device);
                let _ = buf.extend_from_slice(&tx_timestamp.to_le_bytes());
                let _ = buf.extend_from_slice(&rx_timestamp.to_le_bytes());
                buf
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TallyError> {
        let header = byte_at(bytes, 0)?;
        let device = device_id(bytes)?;
        match header {
            response::STATUS => Ok(DeviceResponse::Status {
                device,
                battery: byte_at(bytes, 5)?,
                camera_id: byte_at(bytes, 6)?,
                uptime_s: u32_at(bytes, 7)?,
                brightness: byte_at(bytes, 11)?,
                flags: byte_at(bytes, 12)?,
            }),
            response::ACK => Ok(DeviceResponse::Ack {
                device,
                command: byte_at(bytes, 5)?,
                result: AckResult::from_byte(byte_at(bytes, 6)?),
            }),
            response::PONG => Ok(DeviceResponse::Pong {
                device,
                tx_timestamp: u32_at(bytes, 5)?,
                rx_timestamp: u32_at(bytes, 9)?,
            }),
            _ => Err(TallyError::InvalidArgument),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frame::{decode, Frame};

    const NODE: DeviceId = DeviceId(*b"3F2A");

    #[test]
    fn test_device_id_from_mac() {
        let id = DeviceId::from_mac(&[0x24, 0x6F, 0x28, 0x01, 0x3F, 0x2A]);
        assert_eq!(id, NODE);
        assert_eq!(id.to_string(), "3F2A");
        assert_eq!(DeviceId::BROADCAST.to_string(), "*");
    }

    #[test]
    fn test_broadcast_addresses_everyone() {
        assert!(DeviceId::BROADCAST.addresses(&NODE));
        assert!(NODE.addresses(&NODE));
        assert!(!DeviceId(*b"0000").addresses(&NODE));
    }

    #[test]
    fn test_set_rf_layout() {
        let req = DeviceRequest::SetRf {
            target: NODE,
            frequency_mhz: 433.5,
            sync_word: 0x34,
        };
        let bytes = req.encode();
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[0], 0xE3);
        assert_eq!(&bytes[1..5], b"3F2A");
        assert_eq!(&bytes[5..9], &433.5f32.to_le_bytes());
        assert_eq!(decode(&bytes), Ok(Frame::DeviceRequest(req)));
    }

    #[test]
    fn test_status_response_layout() {
        let status = DeviceResponse::Status {
            device: NODE,
            battery: 80,
            camera_id: 5,
            uptime_s: 120,
            brightness: 100,
            flags: STATUS_FLAG_STOPPED,
        };
        let bytes = status.encode();
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[7..11], &120u32.to_le_bytes());
        assert_eq!(decode(&bytes), Ok(Frame::DeviceResponse(status)));
    }

    #[test]
    fn test_pong_and_ack() {
        let pong = DeviceResponse::Pong {
            device: NODE,
            tx_timestamp: 1000,
            rx_timestamp: 1042,
        };
        assert_eq!(DeviceResponse::decode(&pong.encode()), Ok(pong));

        let ack = DeviceResponse::Ack {
            device: NODE,
            command: request::SET_CAMERA_ID,
            result: AckResult::Invalid,
        };
        assert_eq!(ack.encode().as_slice(), &[0xD1, b'3', b'F', b'2', b'A', 0xE2, 0x02]);
        assert_eq!(DeviceResponse::decode(&ack.encode()), Ok(ack));
    }

    #[test]
    fn test_truncated_requests_rejected() {
        assert_eq!(DeviceRequest::decode(&[0xE1, 1, 2, 3, 4]), Err(TallyError::InvalidArgument));
        assert_eq!(DeviceRequest::decode(&[0xE0, 1, 2]), Err(TallyError::InvalidArgument));
        assert_eq!(decode(&[0xE9, 1, 2, 3, 4]), Err(TallyError::InvalidArgument));
    }
}
