//! ATEM UDP packet layout
//!
//! Every packet starts with a 12-byte header, all fields big-endian:
//!
//! ```text
//! [flags:5 | length:11][session][ack id][local id][unknown][remote id]
//! ```
//!
//! Commands follow as `[length u16][reserved u16][name 4B][payload]`.

use crate::config::limits::ATEM_MAX_OUT_PACKET;
use crate::error::TallyError;
use heapless::Vec;

/// Header flag bits (upper five bits of the first word)
pub mod flags {
    pub const ACK_REQUEST: u8 = 0x01;
    pub const HELLO: u8 = 0x02;
    pub const RESEND: u8 = 0x04;
    pub const REQUEST_RESEND: u8 = 0x08;
    pub const ACK: u8 = 0x10;
}

pub const HEADER_LEN: usize = 12;
pub const CMD_HEADER_LEN: usize = 8;
pub const HELLO_LEN: usize = 20;

/// Session id a client proposes in its hello
pub const HELLO_SESSION: u16 = 0x1000;

/// Packet ids are 15 bits wide
const PACKET_ID_MASK: u16 = 0x7FFF;

pub type OutBuf = Vec<u8, ATEM_MAX_OUT_PACKET>;

fn be16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn put16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn header_word(flags: u8, length: usize) -> u16 {
    ((flags as u16) << 11) | (length as u16 & 0x07FF)
}

/// Parsed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: u8,
    pub length: u16,
    pub session_id: u16,
    pub ack_id: u16,
    pub local_id: u16,
    pub remote_id: u16,
}

impl Header {
    /// Parse and sanity-check the header of a received datagram
    pub fn parse(data: &[u8]) -> Result<Self, TallyError> {
        if data.len() < HEADER_LEN {
            return Err(TallyError::ProtocolError);
        }
        let word = be16(data, 0);
        let header = Header {
            flags: (word >> 11) as u8 & 0x1F,
            length: word & 0x07FF,
            session_id: be16(data, 2),
            ack_id: be16(data, 4),
            local_id: be16(data, 6),
            remote_id: be16(data, 10),
        };
        if (header.length as usize) < HEADER_LEN || header.length as usize > data.len() {
            return Err(TallyError::ProtocolError);
        }
        Ok(header)
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// True when `id` comes after `last` in the 15-bit wrapping sequence
pub fn is_newer(id: u16, last: u16) -> bool {
    let distance = id.wrapping_sub(last) & PACKET_ID_MASK;
    distance != 0 && distance < 0x4000
}

/// Opening handshake packet
pub fn hello() -> [u8; HELLO_LEN] {
    let mut buf = [0u8; HELLO_LEN];
    put16(&mut buf, 0, header_word(flags::HELLO, HELLO_LEN));
    put16(&mut buf, 2, HELLO_SESSION);
    buf[9] = 0x3a;
    buf[12] = 0x01;
    buf
}

/// Empty acknowledgement of `packet_id`
pub fn ack(session_id: u16, packet_id: u16) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    put16(&mut buf, 0, header_word(flags::ACK, HEADER_LEN));
    put16(&mut buf, 2, session_id);
    put16(&mut buf, 4, packet_id);
    buf
}

/// Empty packet asking the switcher to acknowledge, used as keepalive
///
/// `ack_id` is the newest switcher packet id seen.
pub fn keepalive(session_id: u16, ack_id: u16, local_id: u16) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    put16(&mut buf, 0, header_word(flags::ACK_REQUEST, HEADER_LEN));
    put16(&mut buf, 2, session_id);
    put16(&mut buf, 4, ack_id);
    put16(&mut buf, 10, local_id);
    buf
}

/// Single-command data packet
pub fn command(session_id: u16, local_id: u16, name: &[u8; 4], payload: &[u8]) -> Result<OutBuf, TallyError> {
    let cmd_len = CMD_HEADER_LEN + payload.len();
    let total = HEADER_LEN + cmd_len;
    if total > ATEM_MAX_OUT_PACKET {
        return Err(TallyError::InvalidArgument);
    }

    let mut buf = OutBuf::new();
    buf.resize_default(total)
        .map_err(|_| TallyError::InvalidArgument)?;
    put16(&mut buf, 0, header_word(flags::ACK_REQUEST, total));
    put16(&mut buf, 2, session_id);
    put16(&mut buf, 10, local_id);
    put16(&mut buf, 12, cmd_len as u16);
    buf[16..20].copy_from_slice(name);
    buf[20..].copy_from_slice(payload);
    Ok(buf)
}

/// One command inside a packet body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: [u8; 4],
    pub data: &'a [u8],
}

impl Command<'_> {
    pub fn name_str(&self) -> &str {
        core::str::from_utf8(&self.name).unwrap_or("????")
    }
}

/// Iterator over the commands of a packet
///
/// Stops at the first command whose length field is invalid and records
/// that in `malformed`.
pub struct Commands<'a> {
    data: &'a [u8],
    offset: usize,
    pub malformed: bool,
}

impl<'a> Commands<'a> {
    /// `packet` is the whole datagram, truncated to the header's length
    pub fn new(packet: &'a [u8]) -> Self {
        Self {
            data: packet,
            offset: HEADER_LEN,
            malformed: false,
        }
    }
}

impl<'a> Iterator for Commands<'a> {
    type Item = Command<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + CMD_HEADER_LEN > self.data.len() {
            if self.offset < self.data.len() {
                self.malformed = true;
            }
            return None;
        }
        let len = be16(self.data, self.offset) as usize;
        if len < CMD_HEADER_LEN || self.offset + len > self.data.len() {
            self.malformed = true;
            self.offset = self.data.len();
            return None;
        }

        let start = self.offset;
        self.offset += len;
        let mut name = [0u8; 4];
        name.copy_from_slice(&self.data[start + 4..start + 8]);
        Some(Command {
            name,
            data: &self.data[start + CMD_HEADER_LEN..start + len],
        })
    }
}

#[cfg(test)]
pub mod trace {
    //! Builders for canned switcher traffic

    use super::*;
    use std::vec::Vec;

    pub type Cmd<'a> = (&'a [u8; 4], &'a [u8]);

    pub fn cmd<'a>(name: &'a [u8; 4], payload: &'a [u8]) -> Cmd<'a> {
        (name, payload)
    }

    /// Server packet with `flags`, `session` and `remote_id` carrying `commands`
    pub fn server_packet(flags: u8, session: u16, remote_id: u16, commands: &[Cmd<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, payload) in commands {
            let len = (CMD_HEADER_LEN + payload.len()) as u16;
            body.extend_from_slice(&len.to_be_bytes());
            body.extend_from_slice(&[0, 0]);
            body.extend_from_slice(*name);
            body.extend_from_slice(payload);
        }
        let total = HEADER_LEN + body.len();
        let mut packet = std::vec![0u8; HEADER_LEN];
        packet[0..2].copy_from_slice(&header_word(flags, total).to_be_bytes());
        packet[2..4].copy_from_slice(&session.to_be_bytes());
        packet[10..12].copy_from_slice(&remote_id.to_be_bytes());
        packet.extend_from_slice(&body);
        packet
    }

    /// Hello reply from the switcher
    pub fn hello_reply(session: u16) -> Vec<u8> {
        let mut packet = server_packet(flags::HELLO, session, 0, &[]);
        packet.extend_from_slice(&[0x02, 0, 0, 0, 0, 0, 0, 0]);
        let len = packet.len();
        packet[0..2].copy_from_slice(&header_word(flags::HELLO, len).to_be_bytes());
        packet
    }

    /// `_TlI` payload for the given per-input flag bytes
    pub fn tally_payload(bytes: &[u8]) -> Vec<u8> {
        let mut payload = (bytes.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(bytes);
        payload
    }
}
