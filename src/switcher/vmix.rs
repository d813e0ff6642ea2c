//! vMix TCP tally link (port 8099)
//!
//! CRLF-terminated text lines. After connecting the client subscribes to
//! tally; vMix then pushes `TALLY OK <digits>` on every change, one digit per
//! input (`0` off, `1` program, `2` preview).

use crate::config::limits::{MAX_CHANNELS, VMIX_LINE_MAX, VMIX_MAX_OUT_LINE};
use crate::config::timing::{VMIX_KEEPALIVE_MS, VMIX_SILENCE_TIMEOUT_MS};
use crate::error::TallyError;
use crate::switcher::outbox::Outbox;
use crate::tally::types::{set_channel_code, TallyCode};
use core::fmt::Write;
use heapless::{String, Vec};

const TALLY_PREFIX: &str = "TALLY OK ";
const SUBSCRIBED: &str = "SUBSCRIBE OK TALLY";

/// vMix client state
#[derive(Debug, Clone)]
pub struct VmixClient {
    connected: bool,
    subscribed: bool,
    /// Inputs reported by the last tally line, capped at 20
    num_cameras: u8,
    camera_limit: u8,
    program_input: u8,
    preview_input: u8,
    tally_packed: u64,
    line: Vec<u8, VMIX_LINE_MAX>,
    overflow: bool,
    last_contact_ms: u64,
    last_keepalive_ms: u64,
}

impl VmixClient {
    pub fn new(camera_limit: u8) -> Self {
        Self {
            connected: false,
            subscribed: false,
            num_cameras: 0,
            camera_limit,
            program_input: 0,
            preview_input: 0,
            tally_packed: 0,
            line: Vec::new(),
            overflow: false,
            last_contact_ms: 0,
            last_keepalive_ms: 0,
        }
    }

    /// Called once the TCP connection is up
    pub fn start(&mut self, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        *self = Self::new(self.camera_limit);
        self.connected = true;
        self.last_contact_ms = now_ms;
        self.last_keepalive_ms = now_ms;
        send_line(out, format_args!("SUBSCRIBE TALLY"))?;
        log::info!(target: "vmix", "subscribing to tally");
        Ok(())
    }

    /// Orderly disconnect; queues `QUIT` if the link was up
    pub fn stop(&mut self, out: &mut Outbox) {
        if self.connected {
            let _ = send_line(out, format_args!("QUIT"));
            log::info!(target: "vmix", "disconnected");
        }
        self.connected = false;
        self.subscribed = false;
    }

    /// Feed received bytes
    ///
    /// Complete lines are processed immediately. A line that fails to parse
    /// is dropped and reported as `ProtocolError` after the whole chunk.
    pub fn handle_bytes(&mut self, data: &[u8], now_ms: u64) -> Result<(), TallyError> {
        if !self.connected {
            return Ok(());
        }
        self.last_contact_ms = now_ms;

        let mut result = Ok(());
        for &byte in data {
            match byte {
                b'\r' => {}
                b'\n' => {
                    if self.overflow {
                        log::warn!(target: "vmix", "line longer than {} bytes dropped", VMIX_LINE_MAX);
                        result = Err(TallyError::ProtocolError);
                    } else if !self.line.is_empty() {
                        let line = core::mem::take(&mut self.line);
                        if let Err(e) = self.process_line(&line) {
                            result = Err(e);
                        }
                    }
                    self.line.clear();
                    self.overflow = false;
                }
                _ => {
                    if self.line.push(byte).is_err() {
                        self.overflow = true;
                    }
                }
            }
        }
        result
    }

    fn process_line(&mut self, raw: &[u8]) -> Result<(), TallyError> {
        let line = core::str::from_utf8(raw).map_err(|_| TallyError::ProtocolError)?;

        if let Some(digits) = line.strip_prefix(TALLY_PREFIX) {
            return self.apply_tally(digits.trim_end());
        }
        if line.starts_with(SUBSCRIBED) {
            self.subscribed = true;
            log::info!(target: "vmix", "tally subscription confirmed");
            return Ok(());
        }
        if line.contains(" ER ") {
            log::warn!(target: "vmix", "error response: {}", line);
            return Ok(());
        }
        log::debug!(target: "vmix", "ignored: {}", line);
        Ok(())
    }

    fn apply_tally(&mut self, digits: &str) -> Result<(), TallyError> {
        if !digits.bytes().all(|b| matches!(b, b'0'..=b'2')) {
            log::warn!(target: "vmix", "bad tally line: {}", digits);
            return Err(TallyError::ProtocolError);
        }

        self.num_cameras = digits.len().min(MAX_CHANNELS as usize) as u8;
        let count = self.camera_count();

        let mut packed = 0u64;
        let mut program = 0;
        let mut preview = 0;
        for (index, byte) in digits.bytes().take(count as usize).enumerate() {
            let channel = index as u8 + 1;
            let code = match byte {
                b'1' => TallyCode::Program,
                b'2' => TallyCode::Preview,
                _ => TallyCode::Off,
            };
            set_channel_code(&mut packed, channel, code);
            if code == TallyCode::Program && program == 0 {
                program = channel;
            }
            if code == TallyCode::Preview && preview == 0 {
                preview = channel;
            }
        }

        if packed != self.tally_packed {
            log::debug!(target: "vmix", "tally {} -> 0x{:010X}", digits, packed);
        }
        self.tally_packed = packed;
        self.program_input = program;
        self.preview_input = preview;
        Ok(())
    }

    /// Keepalive and silence timeout
    pub fn poll(&mut self, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        if !self.connected {
            return Ok(());
        }
        let silent = now_ms.saturating_sub(self.last_contact_ms);
        if silent > VMIX_SILENCE_TIMEOUT_MS {
            log::warn!(target: "vmix", "no data for {} ms", silent);
            self.connected = false;
            return Err(TallyError::LinkTimeout);
        }
        let idle = now_ms.saturating_sub(self.last_contact_ms.max(self.last_keepalive_ms));
        if idle >= VMIX_KEEPALIVE_MS {
            send_line(out, format_args!("TALLY"))?;
            self.last_keepalive_ms = now_ms;
        }
        Ok(())
    }

    fn function(&self, out: &mut Outbox, args: core::fmt::Arguments<'_>) -> Result<(), TallyError> {
        if !self.connected {
            return Err(TallyError::InvalidArgument);
        }
        send_line(out, format_args!("FUNCTION {}", args))
    }

    pub fn cut(&self, out: &mut Outbox) -> Result<(), TallyError> {
        self.function(out, format_args!("Cut"))
    }

    pub fn fade(&self, out: &mut Outbox) -> Result<(), TallyError> {
        self.function(out, format_args!("Fade"))
    }

    pub fn set_program(&self, input: u16, out: &mut Outbox) -> Result<(), TallyError> {
        self.function(out, format_args!("ActiveInput Input={}", input))
    }

    pub fn set_preview(&self, input: u16, out: &mut Outbox) -> Result<(), TallyError> {
        self.function(out, format_args!("PreviewInput Input={}", input))
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// First tally line has been parsed
    pub fn is_initialized(&self) -> bool {
        self.connected && self.num_cameras > 0
    }

    pub fn tally_packed(&self) -> u64 {
        self.tally_packed
    }

    pub fn num_cameras(&self) -> u8 {
        self.num_cameras
    }

    /// min(user limit, reported inputs)
    pub fn camera_count(&self) -> u8 {
        if self.camera_limit == 0 {
            self.num_cameras
        } else {
            self.num_cameras.min(self.camera_limit)
        }
    }

    pub fn program_input(&self) -> u8 {
        self.program_input
    }

    pub fn preview_input(&self) -> u8 {
        self.preview_input
    }
}

fn send_line(out: &mut Outbox, args: core::fmt::Arguments<'_>) -> Result<(), TallyError> {
    let mut line: String<VMIX_MAX_OUT_LINE> = String::new();
    line.write_fmt(args)
        .and_then(|_| line.write_str("\r\n"))
        .map_err(|_| TallyError::InvalidArgument)?;
    out.push(line.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::types::TallyLists;

    fn connected(limit: u8) -> (VmixClient, Outbox) {
        let mut client = VmixClient::new(limit);
        let mut out = Outbox::new();
        client.start(0, &mut out).unwrap();
        (client, out)
    }

    fn sent_text(out: &mut Outbox) -> std::string::String {
        let mut text = std::string::String::new();
        while let Some(packet) = out.pop() {
            text.push_str(core::str::from_utf8(&packet).unwrap());
        }
        text
    }

    #[test]
    fn test_subscribe_on_start() {
        let (_, mut out) = connected(0);
        assert_eq!(sent_text(&mut out), "SUBSCRIBE TALLY\r\n");
    }

    #[test]
    fn test_tally_line_parsing() {
        let (mut client, _) = connected(0);
        client.handle_bytes(b"TALLY OK 0010200\r\n", 10).unwrap();

        assert!(client.is_initialized());
        assert_eq!(client.num_cameras(), 7);
        assert_eq!(client.tally_packed(), (0b01 << 4) | (0b10 << 8));

        let lists = TallyLists::from_packed(client.tally_packed(), client.num_cameras());
        assert_eq!(lists.program.as_slice(), &[3]);
        assert_eq!(lists.preview.as_slice(), &[5]);
        assert_eq!(client.program_input(), 3);
        assert_eq!(client.preview_input(), 5);
    }

    #[test]
    fn test_lines_split_across_reads() {
        let (mut client, _) = connected(0);
        client.handle_bytes(b"SUBSCRIBE OK TA", 1).unwrap();
        assert!(!client.is_subscribed());
        client.handle_bytes(b"LLY\r\nTALLY OK 1", 2).unwrap();
        assert!(client.is_subscribed());
        assert!(!client.is_initialized());
        client.handle_bytes(b"2\r\n", 3).unwrap();
        assert_eq!(client.tally_packed(), 0b1001);
    }

    #[test]
    fn test_camera_limit_and_cap() {
        let (mut client, _) = connected(2);
        client.handle_bytes(b"TALLY OK 1211\r\n", 1).unwrap();
        assert_eq!(client.num_cameras(), 4);
        assert_eq!(client.camera_count(), 2);
        assert_eq!(client.tally_packed(), 0b1001);

        let (mut client, _) = connected(0);
        let line = std::format!("TALLY OK {}\r\n", "1".repeat(30));
        client.handle_bytes(line.as_bytes(), 1).unwrap();
        assert_eq!(client.num_cameras(), 20);
        assert_eq!(client.tally_packed(), 0x55_5555_5555);
    }

    #[test]
    fn test_error_and_bad_lines() {
        let (mut client, _) = connected(0);
        client.handle_bytes(b"FUNCTION ER Input not found\r\n", 1).unwrap();
        assert_eq!(
            client.handle_bytes(b"TALLY OK 01x\r\n", 2),
            Err(TallyError::ProtocolError)
        );
        assert!(!client.is_initialized());

        // A bad line does not poison the next one
        client.handle_bytes(b"TALLY OK 01\r\n", 3).unwrap();
        assert_eq!(client.tally_packed(), 0b0100);
    }

    #[test]
    fn test_overlong_line_dropped() {
        let (mut client, _) = connected(0);
        let mut data = std::vec![b'0'; VMIX_LINE_MAX + 10];
        data.extend_from_slice(b"\r\nTALLY OK 1\r\n");
        assert_eq!(client.handle_bytes(&data, 1), Err(TallyError::ProtocolError));
        assert_eq!(client.tally_packed(), 0b01);
    }

    #[test]
    fn test_keepalive_and_timeout() {
        let (mut client, mut out) = connected(0);
        sent_text(&mut out);

        client.poll(9_999, &mut out).unwrap();
        assert!(out.is_empty());
        client.poll(10_000, &mut out).unwrap();
        assert_eq!(sent_text(&mut out), "TALLY\r\n");

        // Incoming data resets the idle clock
        client.handle_bytes(b"TALLY OK 0\r\n", 15_000).unwrap();
        client.poll(24_000, &mut out).unwrap();
        assert!(out.is_empty());

        assert_eq!(client.poll(45_001, &mut out), Err(TallyError::LinkTimeout));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_functions_and_quit() {
        let (mut client, mut out) = connected(0);
        sent_text(&mut out);

        client.cut(&mut out).unwrap();
        client.fade(&mut out).unwrap();
        client.set_program(3, &mut out).unwrap();
        client.set_preview(12, &mut out).unwrap();
        assert_eq!(
            sent_text(&mut out),
            "FUNCTION Cut\r\nFUNCTION Fade\r\nFUNCTION ActiveInput Input=3\r\nFUNCTION PreviewInput Input=12\r\n"
        );

        client.stop(&mut out);
        assert_eq!(sent_text(&mut out), "QUIT\r\n");
        assert_eq!(client.cut(&mut out), Err(TallyError::InvalidArgument));

        // Stopping twice sends nothing
        client.stop(&mut out);
        assert!(out.is_empty());
    }
}
