//! Tagged switcher client
//!
//! One enum over the protocol clients so the supervisor can drive any
//! switcher family through the same calls.

use super::atem::AtemClient;
use super::outbox::Outbox;
use super::vmix::VmixClient;
use crate::error::TallyError;
use crate::store::settings::SwitcherKind;

/// How a client reaches its switcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Datagram,
    Stream,
}

/// Switcher-side control requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitcherControl {
    Cut,
    AutoTransition,
    SetProgram(u16),
    SetPreview(u16),
}

/// Summary printed when a link comes up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub kind: SwitcherKind,
    pub camera_count: u8,
    pub num_mes: u8,
    pub num_sources: u8,
}

#[derive(Debug, Clone)]
pub enum SwitcherClient {
    Atem(AtemClient),
    Vmix(VmixClient),
}

impl SwitcherClient {
    /// Client for `kind`, or `None` for families without a protocol client
    pub fn for_kind(kind: SwitcherKind, camera_limit: u8) -> Option<Self> {
        match kind {
            SwitcherKind::Atem => Some(SwitcherClient::Atem(AtemClient::new(camera_limit))),
            SwitcherKind::Vmix => Some(SwitcherClient::Vmix(VmixClient::new(camera_limit))),
            SwitcherKind::Obs => None,
        }
    }

    pub fn kind(&self) -> SwitcherKind {
        match self {
            SwitcherClient::Atem(_) => SwitcherKind::Atem,
            SwitcherClient::Vmix(_) => SwitcherKind::Vmix,
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            SwitcherClient::Atem(_) => Transport::Datagram,
            SwitcherClient::Vmix(_) => Transport::Stream,
        }
    }

    /// Begin a session once the transport is open
    pub fn start(&mut self, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        match self {
            SwitcherClient::Atem(c) => c.start(now_ms, out),
            SwitcherClient::Vmix(c) => c.start(now_ms, out),
        }
    }

    pub fn stop(&mut self, out: &mut Outbox) {
        match self {
            SwitcherClient::Atem(c) => c.stop(),
            SwitcherClient::Vmix(c) => c.stop(out),
        }
    }

    /// Feed a datagram or a chunk of stream bytes
    pub fn handle_input(&mut self, data: &[u8], now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        match self {
            SwitcherClient::Atem(c) => c.handle_packet(data, now_ms, out),
            SwitcherClient::Vmix(c) => c.handle_bytes(data, now_ms),
        }
    }

    pub fn poll(&mut self, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        match self {
            SwitcherClient::Atem(c) => c.poll(now_ms, out),
            SwitcherClient::Vmix(c) => c.poll(now_ms, out),
        }
    }

    pub fn control(&mut self, control: SwitcherControl, now_ms: u64, out: &mut Outbox) -> Result<(), TallyError> {
        match (self, control) {
            (SwitcherClient::Atem(c), SwitcherControl::Cut) => c.cut(0, now_ms, out),
            (SwitcherClient::Atem(c), SwitcherControl::AutoTransition) => c.auto_transition(0, now_ms, out),
            (SwitcherClient::Atem(c), SwitcherControl::SetProgram(input)) => c.set_program(0, input, now_ms, out),
            (SwitcherClient::Atem(c), SwitcherControl::SetPreview(input)) => c.set_preview(0, input, now_ms, out),
            (SwitcherClient::Vmix(c), SwitcherControl::Cut) => c.cut(out),
            (SwitcherClient::Vmix(c), SwitcherControl::AutoTransition) => c.fade(out),
            (SwitcherClient::Vmix(c), SwitcherControl::SetProgram(input)) => c.set_program(input, out),
            (SwitcherClient::Vmix(c), SwitcherControl::SetPreview(input)) => c.set_preview(input, out),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            SwitcherClient::Atem(c) => c.is_connected(),
            SwitcherClient::Vmix(c) => c.is_connected(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        match self {
            SwitcherClient::Atem(c) => c.is_initialized(),
            SwitcherClient::Vmix(c) => c.is_initialized(),
        }
    }

    pub fn tally_packed(&self) -> u64 {
        match self {
            SwitcherClient::Atem(c) => c.tally_packed(),
            SwitcherClient::Vmix(c) => c.tally_packed(),
        }
    }

    pub fn camera_count(&self) -> u8 {
        match self {
            SwitcherClient::Atem(c) => c.camera_count(),
            SwitcherClient::Vmix(c) => c.camera_count(),
        }
    }

    pub fn take_restart_hint(&mut self) -> bool {
        match self {
            SwitcherClient::Atem(c) => c.take_restart_hint(),
            SwitcherClient::Vmix(_) => false,
        }
    }

    pub fn info(&self) -> LinkInfo {
        match self {
            SwitcherClient::Atem(c) => {
                let topology = c.topology();
                LinkInfo {
                    kind: SwitcherKind::Atem,
                    camera_count: c.camera_count(),
                    num_mes: topology.num_mes,
                    num_sources: topology.num_sources,
                }
            }
            SwitcherClient::Vmix(c) => LinkInfo {
                kind: SwitcherKind::Vmix,
                camera_count: c.camera_count(),
                num_mes: 1,
                num_sources: c.num_cameras(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_kind() {
        let atem = SwitcherClient::for_kind(SwitcherKind::Atem, 0).unwrap();
        assert_eq!(atem.transport(), Transport::Datagram);
        assert_eq!(atem.kind(), SwitcherKind::Atem);

        let vmix = SwitcherClient::for_kind(SwitcherKind::Vmix, 0).unwrap();
        assert_eq!(vmix.transport(), Transport::Stream);

        assert!(SwitcherClient::for_kind(SwitcherKind::Obs, 0).is_none());
    }

    #[test]
    fn test_vmix_dispatch() {
        let mut client = SwitcherClient::for_kind(SwitcherKind::Vmix, 0).unwrap();
        let mut out = Outbox::new();
        client.start(0, &mut out).unwrap();
        out.clear();

        client.handle_input(b"TALLY OK 21\r\n", 5, &mut out).unwrap();
        assert!(client.is_initialized());
        assert_eq!(client.tally_packed(), 0b0110);
        assert_eq!(client.info().camera_count, 2);

        client
            .control(SwitcherControl::AutoTransition, 6, &mut out)
            .unwrap();
        assert_eq!(out.pop().unwrap().as_slice(), b"FUNCTION Fade\r\n");
    }

    #[test]
    fn test_atem_control_requires_session() {
        let mut client = SwitcherClient::for_kind(SwitcherKind::Atem, 0).unwrap();
        let mut out = Outbox::new();
        assert_eq!(
            client.control(SwitcherControl::Cut, 0, &mut out),
            Err(TallyError::InvalidArgument)
        );
        assert!(!client.take_restart_hint());
    }
}
