//! Switcher link supervisor
//!
//! Owns one socket pair per slot and drives each slot's client through
//! `Disconnected -> Connecting -> Connected`. All socket waits use a zero
//! timeout so one `poll` never blocks longer than a TCP connect.

use super::client::{LinkInfo, SwitcherClient, SwitcherControl, Transport};
use super::net::{DatagramSocket, StreamSocket};
use super::outbox::Outbox;
use crate::config::limits::{ATEM_MAX_PACKET, SWITCHER_SLOTS};
use crate::config::timing::{
    CONNECT_TIMEOUT_MS, NETWORK_RESTART_COOLDOWN_MS, PROTOCOL_ERROR_LIMIT, PROTOCOL_ERROR_WINDOW_MS,
    RECONNECT_INTERVAL_MS, STALE_TALLY_MS, TCP_CONNECT_TIMEOUT_MS,
};
use crate::error::TallyError;
use crate::store::settings::{SwitcherKind, SwitcherSettings, SystemSettings};
use crate::store::{ConfigStore, KvBackend};
use crate::tally::mapper::SlotMapping;
use core::net::SocketAddrV4;

/// Consecutive failed connects before the network is suspected
const CONNECT_FAILURES_BEFORE_HINT: u8 = 3;

/// Datagrams drained per slot per poll
const MAX_RECV_PER_POLL: usize = 16;

/// Called once each time a slot reaches `Connected`
pub type ConnectedCallback = fn(slot: usize, info: &LinkInfo);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// What happened during one `poll`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Slot reached `Connected` this poll
    pub connected: [bool; SWITCHER_SLOTS],
    /// Slot left `Connected` this poll
    pub disconnected: [bool; SWITCHER_SLOTS],
    pub tally_changed: bool,
    /// The IP network should be restarted
    pub network_restart: bool,
    /// Stale-link watchdog tore down every link
    pub restarted: bool,
}

/// Read side used by the TX dispatcher
pub trait TallySource {
    /// Packed tally of a connected slot, 0 otherwise
    fn tally(&self, slot: usize) -> u64;

    /// Channel placement of a slot in the combined bitmap
    fn mapping(&self, slot: usize) -> SlotMapping;
}

struct Slot<D, S> {
    settings: Option<SwitcherSettings>,
    client: Option<SwitcherClient>,
    state: LinkState,
    udp: D,
    tcp: S,
    peer: Option<SocketAddrV4>,
    outbox: Outbox,
    last_attempt_ms: Option<u64>,
    connect_started_ms: u64,
    last_tally: u64,
    last_change_ms: u64,
    error_window_ms: u64,
    error_count: u8,
    connect_failures: u8,
    unsupported_warned: bool,
}

impl<D: DatagramSocket, S: StreamSocket> Slot<D, S> {
    fn new(udp: D, tcp: S) -> Self {
        Self {
            settings: None,
            client: None,
            state: LinkState::Disconnected,
            udp,
            tcp,
            peer: None,
            outbox: Outbox::new(),
            last_attempt_ms: None,
            connect_started_ms: 0,
            last_tally: 0,
            last_change_ms: 0,
            error_window_ms: 0,
            error_count: 0,
            connect_failures: 0,
            unsupported_warned: false,
        }
    }

    fn due(&self, now_ms: u64) -> bool {
        match self.last_attempt_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= RECONNECT_INTERVAL_MS,
        }
    }

    async fn connect_start(&mut self, index: usize, now_ms: u64) -> Result<(), TallyError> {
        self.last_attempt_ms = Some(now_ms);
        let Some(settings) = self.settings.as_ref() else {
            return Ok(());
        };

        let Some(mut client) = SwitcherClient::for_kind(settings.kind, settings.camera_limit) else {
            if !self.unsupported_warned {
                log::warn!(
                    target: "supervisor",
                    "slot {}: {} has no protocol client, slot stays inactive",
                    index,
                    settings.kind.name()
                );
                self.unsupported_warned = true;
            }
            return Ok(());
        };

        let Some(peer) = settings.endpoint() else {
            log::warn!(target: "supervisor", "slot {}: invalid address {}", index, settings.ip);
            return Err(TallyError::InvalidArgument);
        };

        log::info!(
            target: "supervisor",
            "slot {}: connecting to {} at {}",
            index,
            settings.kind.name(),
            peer
        );
        self.outbox.clear();
        match client.transport() {
            Transport::Datagram => self.udp.open().await?,
            Transport::Stream => self.tcp.connect(peer, TCP_CONNECT_TIMEOUT_MS).await?,
        }
        self.peer = Some(peer);
        client.start(now_ms, &mut self.outbox)?;
        self.client = Some(client);
        self.state = LinkState::Connecting;
        self.connect_started_ms = now_ms;
        self.error_count = 0;
        self.flush().await
    }

    async fn flush(&mut self) -> Result<(), TallyError> {
        let (Some(client), Some(peer)) = (self.client.as_ref(), self.peer) else {
            self.outbox.clear();
            return Ok(());
        };
        let transport = client.transport();
        while let Some(packet) = self.outbox.pop() {
            match transport {
                Transport::Datagram => self.udp.send_to(&packet, peer).await?,
                Transport::Stream => self.tcp.write_all(&packet).await?,
            }
        }
        Ok(())
    }

    /// Count a protocol error; true once the window limit is exceeded
    fn record_error(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.error_window_ms) > PROTOCOL_ERROR_WINDOW_MS {
            self.error_window_ms = now_ms;
            self.error_count = 0;
        }
        self.error_count = self.error_count.saturating_add(1);
        self.error_count > PROTOCOL_ERROR_LIMIT
    }

    /// Pump received data through the client and run its timers
    async fn service(&mut self, now_ms: u64, buf: &mut [u8]) -> Result<(), TallyError> {
        let Some(transport) = self.client.as_ref().map(SwitcherClient::transport) else {
            return Ok(());
        };

        for _ in 0..MAX_RECV_PER_POLL {
            let received = match transport {
                Transport::Datagram => self.udp.recv(buf, 0).await?,
                Transport::Stream => self.tcp.read(buf, 0).await?,
            };
            let Some(len) = received else {
                break;
            };
            let Some(client) = self.client.as_mut() else {
                break;
            };
            match client.handle_input(&buf[..len], now_ms, &mut self.outbox) {
                Ok(()) => {}
                Err(TallyError::ProtocolError) => {
                    if self.record_error(now_ms) {
                        log::warn!(target: "supervisor", "too many protocol errors, dropping link");
                        return Err(TallyError::ProtocolError);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(client) = self.client.as_mut() {
            client.poll(now_ms, &mut self.outbox)?;
        }
        self.flush().await
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.as_mut() {
            client.stop(&mut self.outbox);
        }
        let _ = self.flush().await;
        self.udp.close();
        self.tcp.close();
        self.state = LinkState::Disconnected;
    }

    fn take_restart_hint(&mut self) -> bool {
        self.client
            .as_mut()
            .map(SwitcherClient::take_restart_hint)
            .unwrap_or(false)
    }
}

/// Supervisor for up to two switcher links
pub struct SwitcherSupervisor<D: DatagramSocket, S: StreamSocket> {
    slots: [Slot<D, S>; SWITCHER_SLOTS],
    dual_mode: bool,
    rx_buf: [u8; ATEM_MAX_PACKET],
    on_connected: Option<ConnectedCallback>,
    last_restart_hint_ms: Option<u64>,
    restart_count: u32,
}

impl<D: DatagramSocket, S: StreamSocket> SwitcherSupervisor<D, S> {
    pub fn new(primary: (D, S), secondary: (D, S)) -> Self {
        Self {
            slots: [Slot::new(primary.0, primary.1), Slot::new(secondary.0, secondary.1)],
            dual_mode: false,
            rx_buf: [0; ATEM_MAX_PACKET],
            on_connected: None,
            last_restart_hint_ms: None,
            restart_count: 0,
        }
    }

    pub fn set_on_connected(&mut self, callback: ConnectedCallback) {
        self.on_connected = Some(callback);
    }

    /// Install slot settings; a slot whose settings changed reconnects
    pub async fn configure(&mut self, dual_mode: bool, settings: [SwitcherSettings; SWITCHER_SLOTS]) {
        self.dual_mode = dual_mode;
        for (slot, new) in self.slots.iter_mut().zip(settings) {
            if slot.settings.as_ref() != Some(&new) {
                slot.disconnect().await;
                slot.client = None;
                slot.last_attempt_ms = None;
                slot.connect_failures = 0;
                slot.unsupported_warned = false;
                slot.settings = Some(new);
            }
        }
    }

    /// Read slot settings and the dual-mode flag from the store
    pub async fn load<B: KvBackend>(&mut self, store: &ConfigStore<B>) -> Result<(), TallyError> {
        let system = SystemSettings::load(store)?;
        let settings = [SwitcherSettings::load(store, 0)?, SwitcherSettings::load(store, 1)?];
        self.configure(system.dual_mode, settings).await;
        Ok(())
    }

    fn slot_active(&self, index: usize) -> bool {
        index == 0 || self.dual_mode
    }

    /// Advance every slot
    pub async fn poll(&mut self, now_ms: u64) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        let mut stale = false;
        let mut hint = false;

        for index in 0..SWITCHER_SLOTS {
            let active = self.slot_active(index);
            let slot = &mut self.slots[index];

            if !active {
                if slot.state != LinkState::Disconnected {
                    slot.disconnect().await;
                }
                continue;
            }

            if slot.state == LinkState::Disconnected && slot.due(now_ms) {
                if let Err(e) = slot.connect_start(index, now_ms).await {
                    log::warn!(target: "supervisor", "slot {}: connect failed: {}", index, e);
                    slot.disconnect().await;
                    slot.connect_failures = slot.connect_failures.saturating_add(1);
                    if slot.connect_failures >= CONNECT_FAILURES_BEFORE_HINT {
                        hint = true;
                    }
                }
            }

            if slot.state == LinkState::Disconnected {
                continue;
            }

            if let Err(e) = slot.service(now_ms, &mut self.rx_buf).await {
                log::warn!(target: "supervisor", "slot {}: link lost: {}", index, e);
                hint |= slot.take_restart_hint();
                if slot.state == LinkState::Connected {
                    outcome.disconnected[index] = true;
                    // Reconnect on the next poll
                    slot.last_attempt_ms = None;
                }
                slot.disconnect().await;
                continue;
            }
            hint |= slot.take_restart_hint();

            let Some(client) = slot.client.as_ref() else {
                continue;
            };
            match slot.state {
                LinkState::Connecting => {
                    if client.is_connected() && client.is_initialized() {
                        let info = client.info();
                        slot.state = LinkState::Connected;
                        slot.connect_failures = 0;
                        slot.last_tally = client.tally_packed();
                        slot.last_change_ms = now_ms;
                        outcome.connected[index] = true;
                        outcome.tally_changed = true;
                        log::info!(
                            target: "supervisor",
                            "slot {}: {} connected, {} cameras, {} MEs, {} sources",
                            index,
                            info.kind.name(),
                            info.camera_count,
                            info.num_mes,
                            info.num_sources
                        );
                        if let Some(callback) = self.on_connected {
                            callback(index, &info);
                        }
                    } else if now_ms.saturating_sub(slot.connect_started_ms) >= CONNECT_TIMEOUT_MS {
                        log::warn!(target: "supervisor", "slot {}: connect timed out", index);
                        slot.disconnect().await;
                        slot.last_attempt_ms = Some(now_ms);
                        slot.connect_failures = slot.connect_failures.saturating_add(1);
                        if slot.connect_failures >= CONNECT_FAILURES_BEFORE_HINT {
                            hint = true;
                        }
                    }
                }
                LinkState::Connected => {
                    if !client.is_connected() {
                        log::warn!(target: "supervisor", "slot {}: client reports disconnect", index);
                        outcome.disconnected[index] = true;
                        slot.disconnect().await;
                        slot.last_attempt_ms = None;
                        continue;
                    }
                    let packed = client.tally_packed();
                    if packed != slot.last_tally {
                        slot.last_tally = packed;
                        slot.last_change_ms = now_ms;
                        outcome.tally_changed = true;
                    } else if now_ms.saturating_sub(slot.last_change_ms) > STALE_TALLY_MS {
                        log::warn!(target: "supervisor", "slot {}: tally unchanged for an hour", index);
                        stale = true;
                    }
                }
                LinkState::Disconnected => {}
            }
        }

        if stale {
            self.restart_all().await;
            outcome.restarted = true;
            outcome.tally_changed = true;
        }

        if hint {
            let cooled = self
                .last_restart_hint_ms
                .map_or(true, |last| now_ms.saturating_sub(last) >= NETWORK_RESTART_COOLDOWN_MS);
            if cooled {
                log::warn!(target: "supervisor", "requesting network restart");
                self.last_restart_hint_ms = Some(now_ms);
                outcome.network_restart = true;
            }
        }
        outcome
    }

    /// Tear down every link and rebuild the clients from current settings
    pub async fn restart_all(&mut self) {
        log::info!(target: "supervisor", "restarting all switcher links");
        for slot in self.slots.iter_mut() {
            slot.disconnect().await;
            slot.client = None;
            slot.last_attempt_ms = None;
        }
        self.restart_count += 1;
    }

    /// Send a control request to a connected slot
    pub async fn control(&mut self, slot: usize, control: SwitcherControl, now_ms: u64) -> Result<(), TallyError> {
        let slot = self.slots.get_mut(slot).ok_or(TallyError::InvalidArgument)?;
        if slot.state != LinkState::Connected {
            return Err(TallyError::InvalidArgument);
        }
        let client = slot.client.as_mut().ok_or(TallyError::InvalidArgument)?;
        client.control(control, now_ms, &mut slot.outbox)?;
        slot.flush().await
    }

    pub fn state(&self, slot: usize) -> LinkState {
        self.slots
            .get(slot)
            .map(|s| s.state)
            .unwrap_or(LinkState::Disconnected)
    }

    pub fn settings(&self, slot: usize) -> Option<&SwitcherSettings> {
        self.slots.get(slot).and_then(|s| s.settings.as_ref())
    }

    pub fn kind(&self, slot: usize) -> Option<SwitcherKind> {
        self.settings(slot).map(|s| s.kind)
    }

    pub fn dual_mode(&self) -> bool {
        self.dual_mode
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    fn connected_client(&self, slot: usize) -> Option<&SwitcherClient> {
        let slot = self.slots.get(slot)?;
        if slot.state == LinkState::Connected {
            slot.client.as_ref()
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn datagram(&self, slot: usize) -> &D {
        &self.slots[slot].udp
    }

    #[cfg(test)]
    pub fn stream(&self, slot: usize) -> &S {
        &self.slots[slot].tcp
    }
}

impl<D: DatagramSocket, S: StreamSocket> TallySource for SwitcherSupervisor<D, S> {
    fn tally(&self, slot: usize) -> u64 {
        self.connected_client(slot)
            .map(SwitcherClient::tally_packed)
            .unwrap_or(0)
    }

    fn mapping(&self, slot: usize) -> SlotMapping {
        match (self.connected_client(slot), self.settings(slot)) {
            (Some(client), Some(settings)) => SlotMapping {
                offset: settings.camera_offset,
                camera_count: client.camera_count(),
                enabled: self.slot_active(slot),
            },
            _ => SlotMapping::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::settings::NetInterface;
    use crate::switcher::atem::packet::flags;
    use crate::switcher::atem::packet::trace::{cmd, hello_reply, server_packet, tally_payload};
    use crate::switcher::net::mock::{MockDatagramSocket, MockStreamSocket};
    use core::sync::atomic::{AtomicUsize, Ordering};
    use futures::executor::block_on;
    use heapless::String;

    type Supervisor = SwitcherSupervisor<MockDatagramSocket, MockStreamSocket>;

    const SESSION: u16 = 0x8011;

    fn settings(kind: SwitcherKind, ip: &str, offset: u8, limit: u8) -> SwitcherSettings {
        let mut text = String::new();
        text.push_str(ip).unwrap();
        SwitcherSettings {
            kind,
            interface: NetInterface::WifiSta,
            ip: text,
            port: 0,
            password: String::new(),
            camera_offset: offset,
            camera_limit: limit,
        }
    }

    fn supervisor() -> Supervisor {
        SwitcherSupervisor::new(
            (MockDatagramSocket::new(), MockStreamSocket::new()),
            (MockDatagramSocket::new(), MockStreamSocket::new()),
        )
    }

    fn queue_atem_handshake(socket: &MockDatagramSocket, cameras: u8) {
        socket.queue_inbound(&hello_reply(0x1000));
        socket.queue_inbound(&server_packet(
            flags::ACK_REQUEST,
            SESSION,
            1,
            &[cmd(b"_top", &[1, 24, 0, 0, 0, 1, 0, 0, 0, 0]), cmd(b"_TlC", &[0, 0, 0, 0, cameras])],
        ));
    }

    fn switcher_ack() -> std::vec::Vec<u8> {
        server_packet(flags::ACK, SESSION, 0, &[])
    }

    fn atem_supervisor() -> Supervisor {
        let mut sup = supervisor();
        block_on(sup.configure(
            false,
            [
                settings(SwitcherKind::Atem, "192.168.0.240", 0, 0),
                settings(SwitcherKind::Atem, "192.168.0.241", 4, 0),
            ],
        ));
        sup
    }

    #[test]
    fn test_atem_connects_and_reports_tally() {
        let mut sup = atem_supervisor();
        queue_atem_handshake(sup.datagram(0), 8);

        let outcome = block_on(sup.poll(0));
        assert!(outcome.connected[0]);
        assert_eq!(sup.state(0), LinkState::Connected);
        assert_eq!(sup.state(1), LinkState::Disconnected);
        assert_eq!(
            sup.datagram(0).last_peer(),
            Some("192.168.0.240:9910".parse().unwrap())
        );
        assert_eq!(
            sup.mapping(0),
            SlotMapping {
                offset: 0,
                camera_count: 8,
                enabled: true
            }
        );

        let tally = server_packet(flags::ACK_REQUEST, SESSION, 2, &[cmd(b"_TlI", &tally_payload(&[0, 1]))]);
        sup.datagram(0).queue_inbound(&tally);
        let outcome = block_on(sup.poll(10));
        assert!(outcome.tally_changed);
        assert_eq!(sup.tally(0), 0b01 << 2);

        // Secondary stays down without dual mode
        assert_eq!(sup.datagram(1).open_count(), 0);
        assert_eq!(sup.tally(1), 0);
    }

    #[test]
    fn test_on_connected_fires_once() {
        static CONNECTS: AtomicUsize = AtomicUsize::new(0);
        fn on_connected(_slot: usize, info: &LinkInfo) {
            assert_eq!(info.camera_count, 6);
            CONNECTS.fetch_add(1, Ordering::SeqCst);
        }

        let mut sup = atem_supervisor();
        sup.set_on_connected(on_connected);
        queue_atem_handshake(sup.datagram(0), 6);

        block_on(sup.poll(0));
        for t in 1..5u64 {
            sup.datagram(0).queue_inbound(&switcher_ack());
            block_on(sup.poll(t * 400));
        }
        assert_eq!(CONNECTS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reconnect_interval_and_connect_timeout() {
        let mut sup = atem_supervisor();

        // No answer: hello sent, then connecting until the deadline
        block_on(sup.poll(0));
        assert_eq!(sup.state(0), LinkState::Connecting);
        assert_eq!(sup.datagram(0).sent().len(), 1);

        block_on(sup.poll(CONNECT_TIMEOUT_MS - 1));
        assert_eq!(sup.state(0), LinkState::Connecting);
        block_on(sup.poll(CONNECT_TIMEOUT_MS));
        assert_eq!(sup.state(0), LinkState::Disconnected);

        // Next attempt waits for the reconnect interval
        block_on(sup.poll(CONNECT_TIMEOUT_MS + 1));
        assert_eq!(sup.datagram(0).open_count(), 1);
        block_on(sup.poll(CONNECT_TIMEOUT_MS + RECONNECT_INTERVAL_MS));
        assert_eq!(sup.datagram(0).open_count(), 2);
    }

    #[test]
    fn test_connected_link_loss_reconnects_immediately() {
        let mut sup = atem_supervisor();
        queue_atem_handshake(sup.datagram(0), 8);
        block_on(sup.poll(0));
        assert_eq!(sup.state(0), LinkState::Connected);

        // Switcher goes silent past the session timeout
        let outcome = block_on(sup.poll(5_100));
        assert!(outcome.disconnected[0]);
        assert_eq!(sup.state(0), LinkState::Disconnected);
        assert!(outcome.network_restart);

        block_on(sup.poll(5_110));
        assert_eq!(sup.state(0), LinkState::Connecting);
        assert_eq!(sup.datagram(0).open_count(), 2);
    }

    #[test]
    fn test_network_restart_cooldown() {
        let mut sup = atem_supervisor();
        queue_atem_handshake(sup.datagram(0), 8);
        block_on(sup.poll(0));
        assert!(block_on(sup.poll(5_100)).network_restart);

        // Second silent session inside the cooldown
        queue_atem_handshake(sup.datagram(0), 8);
        block_on(sup.poll(5_110));
        assert_eq!(sup.state(0), LinkState::Connected);
        assert!(!block_on(sup.poll(10_200)).network_restart);

        queue_atem_handshake(sup.datagram(0), 8);
        block_on(sup.poll(40_000));
        assert!(block_on(sup.poll(45_200)).network_restart);
    }

    #[test]
    fn test_stale_link_restarts_all_once() {
        let mut sup = atem_supervisor();
        queue_atem_handshake(sup.datagram(0), 8);
        block_on(sup.poll(0));
        assert_eq!(sup.state(0), LinkState::Connected);

        let mut t = 0;
        while t <= STALE_TALLY_MS + 4_000 {
            t += 4_000;
            sup.datagram(0).queue_inbound(&switcher_ack());
            block_on(sup.poll(t));
        }
        assert_eq!(sup.restart_count(), 1);

        // Later polls reconnect rather than restart again
        for _ in 0..5 {
            t += 1_000;
            block_on(sup.poll(t));
        }
        assert_eq!(sup.restart_count(), 1);
        assert_eq!(sup.state(0), LinkState::Connecting);
    }

    #[test]
    fn test_protocol_error_burst_drops_link() {
        let mut sup = atem_supervisor();
        queue_atem_handshake(sup.datagram(0), 8);
        block_on(sup.poll(0));

        for id in 0..3u16 {
            let stray = server_packet(flags::ACK_REQUEST, 0x7777, 10 + id, &[]);
            sup.datagram(0).queue_inbound(&stray);
        }
        block_on(sup.poll(100));
        assert_eq!(sup.state(0), LinkState::Connected);

        sup.datagram(0)
            .queue_inbound(&server_packet(flags::ACK_REQUEST, 0x7777, 20, &[]));
        let outcome = block_on(sup.poll(200));
        assert!(outcome.disconnected[0]);
        assert_eq!(sup.state(0), LinkState::Disconnected);
    }

    #[test]
    fn test_vmix_slot_in_dual_mode() {
        let mut sup = supervisor();
        block_on(sup.configure(
            true,
            [
                settings(SwitcherKind::Atem, "192.168.0.240", 0, 4),
                settings(SwitcherKind::Vmix, "192.168.0.50", 4, 4),
            ],
        ));
        queue_atem_handshake(sup.datagram(0), 8);
        sup.stream(1).queue_inbound(b"SUBSCRIBE OK TALLY\r\nTALLY OK 0100\r\n");

        let outcome = block_on(sup.poll(0));
        assert_eq!(outcome.connected, [true, true]);
        assert_eq!(sup.stream(1).written_text(), "SUBSCRIBE TALLY\r\n");
        assert_eq!(sup.tally(1), 0b01 << 2);
        assert_eq!(
            sup.mapping(1),
            SlotMapping {
                offset: 4,
                camera_count: 4,
                enabled: true
            }
        );
        assert_eq!(sup.mapping(0).camera_count, 4);

        block_on(sup.control(1, SwitcherControl::Cut, 10)).unwrap();
        assert!(sup.stream(1).written_text().ends_with("FUNCTION Cut\r\n"));

        // Peer closes: link drops and QUIT is not possible
        sup.stream(1).close_from_peer();
        let outcome = block_on(sup.poll(20));
        assert!(outcome.disconnected[1]);
        assert_eq!(sup.tally(1), 0);
    }

    #[test]
    fn test_vmix_refused_counts_toward_restart_hint() {
        let mut sup = supervisor();
        block_on(sup.configure(
            false,
            [
                settings(SwitcherKind::Vmix, "192.168.0.50", 0, 0),
                settings(SwitcherKind::Atem, "192.168.0.241", 4, 0),
            ],
        ));
        sup.stream(0).set_refuse(true);

        let mut hints = 0;
        for attempt in 0..3u64 {
            if block_on(sup.poll(attempt * RECONNECT_INTERVAL_MS)).network_restart {
                hints += 1;
            }
        }
        assert_eq!(sup.stream(0).connect_count(), 3);
        assert_eq!(hints, 1);
    }

    #[test]
    fn test_obs_slot_stays_inactive() {
        let mut sup = supervisor();
        block_on(sup.configure(
            false,
            [
                settings(SwitcherKind::Obs, "192.168.0.60", 0, 0),
                settings(SwitcherKind::Atem, "192.168.0.241", 4, 0),
            ],
        ));
        block_on(sup.poll(0));
        block_on(sup.poll(10_000));
        assert_eq!(sup.state(0), LinkState::Disconnected);
        assert_eq!(sup.stream(0).connect_count(), 0);
        assert_eq!(sup.datagram(0).open_count(), 0);
        assert_eq!(sup.mapping(0), SlotMapping::default());
    }

    #[test]
    fn test_invalid_address() {
        let mut sup = supervisor();
        block_on(sup.configure(
            false,
            [
                settings(SwitcherKind::Atem, "not-an-ip", 0, 0),
                settings(SwitcherKind::Atem, "192.168.0.241", 4, 0),
            ],
        ));
        block_on(sup.poll(0));
        assert_eq!(sup.state(0), LinkState::Disconnected);
        assert_eq!(sup.datagram(0).open_count(), 0);
    }

    #[test]
    fn test_control_requires_connection() {
        let mut sup = atem_supervisor();
        assert_eq!(
            block_on(sup.control(0, SwitcherControl::Cut, 0)),
            Err(TallyError::InvalidArgument)
        );
        assert_eq!(
            block_on(sup.control(5, SwitcherControl::Cut, 0)),
            Err(TallyError::InvalidArgument)
        );
    }

    #[test]
    fn test_load_from_store() {
        use crate::store::backend::MemoryBackend;
        use crate::store::keys;
        use crate::store::Namespace;

        let mut store = ConfigStore::new(MemoryBackend::default());
        store.init().unwrap();
        store.set(Namespace::System, keys::DUAL_MODE, true).unwrap();

        let mut sup = supervisor();
        block_on(sup.load(&store)).unwrap();
        assert!(sup.dual_mode());
        assert_eq!(sup.kind(0), Some(SwitcherKind::Atem));
        assert_eq!(sup.settings(1).unwrap().camera_offset, 4);
    }
}
