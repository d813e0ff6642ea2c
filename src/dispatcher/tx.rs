//! TX side: switcher tally to air frames

use crate::codec::frame::{decode, encode_heartbeat, encode_tally, Frame, FrameBuf};
use crate::codec::DeviceResponse;
use crate::config::limits::SWITCHER_SLOTS;
use crate::config::timing::HEARTBEAT_INTERVAL_MS;
use crate::switcher::supervisor::TallySource;
use crate::tally::mapper::{SlotMapping, TallyMapper};
use crate::tally::types::TallyLists;

/// Turns switcher tally into frames for the radio
///
/// A frame goes out when the combined bitmap or the header class changes.
/// A heartbeat follows once no frame has been sent for the heartbeat
/// interval.
pub struct TxDispatcher {
    mapper: TallyMapper,
    snapshot: Option<[u64; SWITCHER_SLOTS]>,
    combined: Option<u64>,
    class: Option<u8>,
    last_tx_ms: u64,
}

impl TxDispatcher {
    pub fn new(now_ms: u64) -> Self {
        Self {
            mapper: TallyMapper::new(),
            snapshot: None,
            combined: None,
            class: None,
            last_tx_ms: now_ms,
        }
    }

    pub fn mapper(&self) -> &TallyMapper {
        &self.mapper
    }

    /// Pick up slot placement changes from the supervisor
    ///
    /// Returns true and logs the new layout when anything moved.
    pub fn sync_mapping<T: TallySource>(&mut self, source: &T) -> bool {
        let mut changed = false;
        for slot in 0..SWITCHER_SLOTS {
            let mapping = source.mapping(slot);
            if self.mapper.slot(slot) == Some(&mapping) {
                continue;
            }
            if let Err(e) = self.mapper.register(slot, mapping) {
                log::warn!(target: "dispatch", "slot {}: bad mapping {:?}: {}", slot, mapping, e);
                let _ = self.mapper.register(slot, SlotMapping::default());
            }
            changed = true;
        }
        if changed {
            self.mapper.log_layout();
            self.snapshot = None;
        }
        changed
    }

    /// One TX loop step; returns the frame to transmit, if any
    pub fn poll<T: TallySource>(&mut self, source: &T, now_ms: u64) -> Option<FrameBuf> {
        self.sync_mapping(source);

        let bitmaps = [source.tally(0), source.tally(1)];
        if self.snapshot != Some(bitmaps) {
            self.snapshot = Some(bitmaps);
            let combined = self.mapper.map(bitmaps);
            let class = self.mapper.header_class();
            // Same bits in a wider frame still need to reach the nodes
            if self.combined != Some(combined) || self.class != Some(class) {
                self.combined = Some(combined);
                self.class = Some(class);
                let channels = self.mapper.max_channel();
                log::info!(
                    target: "dispatch",
                    "tally {}",
                    TallyLists::from_packed(combined, channels)
                );
                self.last_tx_ms = now_ms;
                return Some(encode_tally(combined, channels));
            }
        }

        if now_ms.saturating_sub(self.last_tx_ms) > HEARTBEAT_INTERVAL_MS {
            log::debug!(target: "dispatch", "heartbeat");
            self.last_tx_ms = now_ms;
            return Some(encode_heartbeat());
        }
        None
    }
}

/// Log a frame heard from an RX node
///
/// Returns true for node reports. Nothing here feeds back into the tally.
pub fn handle_node_frame(data: &[u8], rssi_dbm: i16, snr_db: i8) -> bool {
    match decode(data) {
        Ok(Frame::DeviceResponse(response)) => {
            log_response(&response, rssi_dbm, snr_db);
            true
        }
        Ok(Frame::Status(status)) => {
            log::info!(
                target: "dispatch",
                "status from node {}: battery {}%, rssi {}, up {} s",
                status.device_id,
                status.battery_level,
                status.rssi,
                status.uptime
            );
            true
        }
        Ok(other) => {
            log::debug!(target: "dispatch", "ignoring {:?}", other);
            false
        }
        Err(e) => {
            log::debug!(target: "dispatch", "undecodable frame ({} bytes): {}", data.len(), e);
            false
        }
    }
}

fn log_response(response: &DeviceResponse, rssi_dbm: i16, snr_db: i8) {
    let id = response.device();
    match *response {
        DeviceResponse::Status {
            battery,
            camera_id,
            uptime_s,
            brightness,
            flags,
            ..
        } => log::info!(
            target: "dispatch",
            "node {}: camera {}, battery {}%, brightness {}%, up {} s, flags 0x{:02X} ({} dBm, {} dB)",
            id,
            camera_id,
            battery,
            brightness,
            uptime_s,
            flags,
            rssi_dbm,
            snr_db
        ),
        DeviceResponse::Ack { command, result, .. } => {
            log::info!(target: "dispatch", "node {}: 0x{:02X} -> {:?}", id, command, result)
        }
        DeviceResponse::Pong {
            tx_timestamp,
            rx_timestamp,
            ..
        } => log::info!(
            target: "dispatch",
            "node {}: pong sent {} answered {} ({} dBm)",
            id,
            tx_timestamp,
            rx_timestamp,
            rssi_dbm
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frame::header;
    use crate::codec::{AckResult, DeviceId};

    #[derive(Default)]
    struct FixedSource {
        tally: [u64; SWITCHER_SLOTS],
        mapping: [SlotMapping; SWITCHER_SLOTS],
    }

    impl TallySource for FixedSource {
        fn tally(&self, slot: usize) -> u64 {
            self.tally[slot]
        }

        fn mapping(&self, slot: usize) -> SlotMapping {
            self.mapping[slot]
        }
    }

    fn slot(offset: u8, camera_count: u8) -> SlotMapping {
        SlotMapping {
            offset,
            camera_count,
            enabled: true,
        }
    }

    #[test]
    fn test_single_atem_program_change() {
        let mut source = FixedSource::default();
        source.mapping[0] = slot(0, 8);
        let mut dispatcher = TxDispatcher::new(0);

        // First poll announces the all-off state
        assert_eq!(dispatcher.poll(&source, 0).unwrap().as_slice(), &[0xF1, 0x00, 0x00]);

        source.tally[0] = 0b01 << 2;
        let frame = dispatcher.poll(&source, 10).unwrap();
        assert_eq!(frame.as_slice(), &[0xF1, 0x04, 0x00]);

        // Unchanged tally sends nothing
        assert!(dispatcher.poll(&source, 20).is_none());
    }

    #[test]
    fn test_dual_mode_combination() {
        let mut source = FixedSource::default();
        source.mapping = [slot(0, 4), slot(4, 4)];
        source.tally = [0b01, 0b01 << 2];
        let mut dispatcher = TxDispatcher::new(0);

        let frame = dispatcher.poll(&source, 0).unwrap();
        assert_eq!(frame.as_slice(), &[0xF1, 0x01, 0x04]);
        assert_eq!(dispatcher.mapper().map(source.tally), 0x0401);
        assert_eq!(dispatcher.mapper().header_class(), 0xF1);
    }

    #[test]
    fn test_heartbeat_interval() {
        let mut source = FixedSource::default();
        source.mapping[0] = slot(0, 8);
        let mut dispatcher = TxDispatcher::new(0);
        assert!(dispatcher.poll(&source, 0).is_some());

        assert!(dispatcher.poll(&source, HEARTBEAT_INTERVAL_MS).is_none());
        let frame = dispatcher.poll(&source, HEARTBEAT_INTERVAL_MS + 1).unwrap();
        assert_eq!(frame.as_slice(), &[header::LEGACY_TALLY, 0x00]);

        // Exactly once per interval
        for t in (HEARTBEAT_INTERVAL_MS + 2..2 * HEARTBEAT_INTERVAL_MS + 1).step_by(1_000) {
            assert!(dispatcher.poll(&source, t).is_none());
        }
        assert!(dispatcher.poll(&source, 2 * HEARTBEAT_INTERVAL_MS + 2).is_some());
    }

    #[test]
    fn test_tally_change_restarts_heartbeat_timer() {
        let mut source = FixedSource::default();
        source.mapping[0] = slot(0, 8);
        let mut dispatcher = TxDispatcher::new(0);
        dispatcher.poll(&source, 0);

        source.tally[0] = 0b10;
        assert!(dispatcher.poll(&source, 20_000).is_some());
        assert!(dispatcher.poll(&source, 45_000).is_none());
        assert!(dispatcher.poll(&source, 50_001).is_some());
    }

    #[test]
    fn test_mapping_change_resends() {
        let mut source = FixedSource::default();
        source.mapping[0] = slot(0, 4);
        source.tally[0] = 0b01;
        let mut dispatcher = TxDispatcher::new(0);
        assert!(dispatcher.poll(&source, 0).is_some());

        // Secondary comes up with its camera 1 on preview
        source.mapping[1] = slot(4, 8);
        source.tally[1] = 0b10;
        let frame = dispatcher.poll(&source, 10).unwrap();
        assert_eq!(frame.as_slice(), &[0xF2, 0x01, 0x02, 0x00]);
        assert_eq!(dispatcher.mapper().max_channel(), 12);
    }

    #[test]
    fn test_mapping_without_bits_change_is_silent() {
        let mut source = FixedSource::default();
        source.mapping[0] = slot(0, 4);
        let mut dispatcher = TxDispatcher::new(0);
        dispatcher.poll(&source, 0);

        source.mapping[1] = slot(4, 4);
        assert!(dispatcher.sync_mapping(&source));
        assert!(dispatcher.poll(&source, 10).is_none());
        assert!(!dispatcher.sync_mapping(&source));
    }

    #[test]
    fn test_header_class_change_resends() {
        let mut source = FixedSource::default();
        source.mapping[0] = slot(0, 8);
        let mut dispatcher = TxDispatcher::new(0);
        assert_eq!(dispatcher.poll(&source, 0).unwrap().as_slice(), &[0xF1, 0x00, 0x00]);

        // Secondary comes up idle: bits unchanged, frame grows to 12 channels
        source.mapping[1] = slot(8, 4);
        let frame = dispatcher.poll(&source, 10).unwrap();
        assert_eq!(frame.as_slice(), &[0xF2, 0x00, 0x00, 0x00]);
        assert_eq!(dispatcher.mapper().header_class(), 0xF2);
        assert!(dispatcher.poll(&source, 20).is_none());
    }

    #[test]
    fn test_node_frames_are_only_logged() {
        let mut source = FixedSource::default();
        source.mapping[0] = slot(0, 8);
        source.tally[0] = 0b01;
        let mut dispatcher = TxDispatcher::new(0);
        assert!(dispatcher.poll(&source, 0).is_some());
        let (snapshot, combined, class, last_tx_ms) = (
            dispatcher.snapshot,
            dispatcher.combined,
            dispatcher.class,
            dispatcher.last_tx_ms,
        );

        let ack = DeviceResponse::Ack {
            device: DeviceId(*b"0A1B"),
            command: 0xE1,
            result: AckResult::Success,
        };
        assert!(handle_node_frame(&ack.encode(), -80, 7));
        assert!(!handle_node_frame(&[], -80, 7));
        assert!(!handle_node_frame(&[0x42, 0x00], -80, 7));
        // A tally frame echoed back by a node is not a report either
        assert!(!handle_node_frame(&[0xF1, 0x04, 0x00], -80, 7));

        assert_eq!(dispatcher.snapshot, snapshot);
        assert_eq!(dispatcher.combined, combined);
        assert_eq!(dispatcher.class, class);
        assert_eq!(dispatcher.last_tx_ms, last_tx_ms);
        assert!(dispatcher.poll(&source, 10).is_none());
    }
}
