//! ATEM session layer
//!
//! Sans-IO: received datagrams go in through `handle_packet`, anything to
//! send comes out through the supplied `Outbox`, and time is passed in as
//! milliseconds since boot.

use super::packet::{self, flags, Commands, Header};
use super::state::{Applied, AtemState, Topology};
use crate::config::timing::{ATEM_KEEPALIVE_MS, ATEM_SILENCE_TIMEOUT_MS};
use crate::error::TallyError;
use crate::switcher::outbox::Outbox;

/// ATEM UDP client
#[derive(Debug, Clone)]
pub struct AtemClient {
    state: AtemState,
    camera_limit: u8,
    session_id: u16,
    /// The switcher moves to its own session id after the hello exchange
    session_adopted: bool,
    local_packet_id: u16,
    remote_packet_id: u16,
    last_received_packet_id: Option<u16>,
    hello_sent: bool,
    connected: bool,
    last_contact_ms: u64,
    last_sent_ms: u64,
    restart_hint: bool,
}

impl AtemClient {
    pub fn new(camera_limit: u8) -> Self {
        Self {
            state: AtemState::new(camera_limit),
            camera_limit,
            session_id: packet::HELLO_SESSION,
            session_adopted: false,
            local_packet_id: 0,
            remote_packet_id: 0,
            last_received_packet_id: None,
            hello_sent: false,
            connected: false,
            last_contact_ms: 0,
            last_sent_ms: 0,
            restart_hint: false,
        }
    }

    /// Reset the session and queue the hello
    pub fn start(&mut self, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        *self = Self::new(self.camera_limit);
        out.push(&packet::hello())?;
        self.hello_sent = true;
        self.last_sent_ms = now_ms;
        self.last_contact_ms = now_ms;
        log::info!(target: "atem", "hello sent");
        Ok(())
    }

    /// Drop the session
    pub fn stop(&mut self) {
        if self.connected {
            log::info!(target: "atem", "session 0x{:04X} closed", self.session_id);
        }
        self.connected = false;
        self.hello_sent = false;
    }

    /// Process one received datagram
    ///
    /// Returns `ProtocolError` for a malformed header, a foreign session or a
    /// malformed command. Commands before the bad one are still applied.
    pub fn handle_packet(&mut self, data: &[u8], now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        let header = Header::parse(data).inspect_err(|_| {
            self.restart_hint = true;
        })?;
        let data = &data[..header.length as usize];

        if header.has(flags::HELLO) {
            if self.hello_sent && !self.connected {
                self.session_id = header.session_id;
                self.connected = true;
                self.last_contact_ms = now_ms;
                out.push(&packet::ack(self.session_id, header.remote_id))?;
                self.last_sent_ms = now_ms;
                log::info!(target: "atem", "hello answered, session 0x{:04X}", self.session_id);
            }
            return Ok(());
        }

        if !self.connected {
            return Ok(());
        }

        if !self.session_adopted {
            self.session_id = header.session_id;
            self.session_adopted = true;
        } else if header.session_id != self.session_id {
            log::warn!(
                target: "atem",
                "session mismatch: expected 0x{:04X}, got 0x{:04X}",
                self.session_id,
                header.session_id
            );
            return Err(TallyError::ProtocolError);
        }
        self.last_contact_ms = now_ms;

        let remote = header.remote_id;
        let skip = self.track_remote_id(remote, header.has(flags::RESEND));

        if header.has(flags::ACK_REQUEST) {
            out.push(&packet::ack(self.session_id, remote))?;
            self.last_sent_ms = now_ms;
        }
        if skip {
            return Ok(());
        }
        if packet::is_newer(remote, self.remote_packet_id) {
            self.remote_packet_id = remote;
        }

        self.apply_commands(data)
    }

    /// Duplicate filter; returns true when the packet must not be parsed
    fn track_remote_id(&mut self, remote: u16, resend: bool) -> bool {
        if remote == 0 {
            return false;
        }
        let newer = match self.last_received_packet_id {
            Some(last) => packet::is_newer(remote, last),
            None => true,
        };
        if newer {
            self.last_received_packet_id = Some(remote);
        }
        // Before initialisation every packet is parsed, resends included
        if !self.state.initialized() {
            return false;
        }
        !newer || resend
    }

    fn apply_commands(&mut self, data: &[u8]) -> Result<(), TallyError> {
        let was_initialized = self.state.initialized();
        let mut commands = Commands::new(data);
        let mut result = Ok(());

        for command in commands.by_ref() {
            match self.state.apply(&command) {
                Ok(Applied::Tally) | Ok(Applied::Info) | Ok(Applied::Nothing) => {}
                Err(e) => {
                    log::warn!(target: "atem", "bad {} command ({} bytes)", command.name_str(), command.data.len());
                    if command.name == *b"_pin" {
                        self.restart_hint = true;
                    }
                    result = Err(e);
                }
            }
        }
        if commands.malformed {
            log::warn!(target: "atem", "malformed command list");
            result = Err(TallyError::ProtocolError);
        }

        if !was_initialized && self.state.initialized() {
            log::info!(
                target: "atem",
                "initialised: {} MEs, {} sources, {} tally channels",
                self.state.topology.num_mes,
                self.state.topology.num_sources,
                self.state.num_cameras
            );
        }
        result
    }

    /// Keepalive and silence timeout
    pub fn poll(&mut self, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        if !self.connected {
            return Ok(());
        }
        let silent = now_ms.saturating_sub(self.last_contact_ms);
        if silent > ATEM_SILENCE_TIMEOUT_MS {
            log::warn!(target: "atem", "no packet for {} ms", silent);
            self.connected = false;
            self.restart_hint = true;
            return Err(TallyError::LinkTimeout);
        }
        if now_ms.saturating_sub(self.last_sent_ms) >= ATEM_KEEPALIVE_MS {
            let id = self.next_local_id();
            out.push(&packet::keepalive(self.session_id, self.remote_packet_id, id))?;
            self.last_sent_ms = now_ms;
        }
        Ok(())
    }

    fn next_local_id(&mut self) -> u16 {
        self.local_packet_id = self.local_packet_id.wrapping_add(1) & 0x7FFF;
        self.local_packet_id
    }

    fn send_command(&mut self, name: &[u8; 4], payload: &[u8], now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        if !self.connected || !self.state.initialized() {
            return Err(TallyError::InvalidArgument);
        }
        let id = self.next_local_id();
        let data = packet::command(self.session_id, id, name, payload)?;
        out.push(&data)?;
        self.last_sent_ms = now_ms;
        Ok(())
    }

    pub fn cut(&mut self, me: u8, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        self.send_command(b"DCut", &[me, 0, 0, 0], now_ms, out)
    }

    pub fn auto_transition(&mut self, me: u8, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        self.send_command(b"DAut", &[me, 0, 0, 0], now_ms, out)
    }

    pub fn set_program(&mut self, me: u8, source: u16, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        let [hi, lo] = source.to_be_bytes();
        self.send_command(b"CPgI", &[me, 0, hi, lo], now_ms, out)
    }

    pub fn set_preview(&mut self, me: u8, source: u16, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        let [hi, lo] = source.to_be_bytes();
        self.send_command(b"CPvI", &[me, 0, hi, lo], now_ms, out)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_initialized(&self) -> bool {
        self.connected && self.state.initialized()
    }

    pub fn tally_packed(&self) -> u64 {
        self.state.tally_packed
    }

    /// Channel count the tally covers
    pub fn camera_count(&self) -> u8 {
        self.state.effective_cameras()
    }

    pub fn topology(&self) -> Topology {
        self.state.topology
    }

    pub fn state(&self) -> &AtemState {
        &self.state
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    /// Take the pending network-restart hint
    pub fn take_restart_hint(&mut self) -> bool {
        core::mem::take(&mut self.restart_hint)
    }
}
