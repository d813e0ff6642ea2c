//! Combines per-switcher tally bitmaps into one on-air bitmap
//!
//! Each slot shifts its own bitmap by `offset` channels. The combined value
//! never extends past channel 20.

use crate::codec::frame::TallyClass;
use crate::config::limits::{MAX_CHANNELS, SWITCHER_SLOTS};
use crate::error::TallyError;
use crate::tally::types::channel_mask;

/// Placement of one switcher's channels in the combined bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotMapping {
    /// First combined channel minus one (0-19)
    pub offset: u8,
    /// Number of channels the switcher contributes
    pub camera_count: u8,
    pub enabled: bool,
}

impl SlotMapping {
    /// Bit range `(shift, width)` this slot occupies, clamped to the 40-bit window
    fn window(&self) -> Option<(u32, u32)> {
        if !self.enabled || self.offset >= MAX_CHANNELS || self.camera_count == 0 {
            return None;
        }
        let shift = self.offset as u32 * 2;
        let width = (self.camera_count as u32 * 2).min(MAX_CHANNELS as u32 * 2 - shift);
        Some((shift, width))
    }

    /// Highest combined channel this slot occupies
    fn last_channel(&self) -> u8 {
        match self.window() {
            Some((shift, width)) => ((shift + width) / 2) as u8,
            None => 0,
        }
    }
}

/// Tally mapper for up to two switchers
#[derive(Debug, Clone, Default)]
pub struct TallyMapper {
    slots: [SlotMapping; SWITCHER_SLOTS],
}

impl TallyMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update one slot
    pub fn register(&mut self, slot: usize, mapping: SlotMapping) -> Result<(), TallyError> {
        if mapping.offset >= MAX_CHANNELS {
            return Err(TallyError::InvalidArgument);
        }
        let entry = self.slots.get_mut(slot).ok_or(TallyError::InvalidArgument)?;
        *entry = mapping;
        Ok(())
    }

    pub fn slot(&self, slot: usize) -> Option<&SlotMapping> {
        self.slots.get(slot)
    }

    /// OR every enabled slot's shifted bitmap into one value
    ///
    /// Overlapping slots are not an error: their bits simply combine.
    pub fn map(&self, bitmaps: [u64; SWITCHER_SLOTS]) -> u64 {
        self.slots
            .iter()
            .zip(bitmaps.iter())
            .filter_map(|(mapping, &bits)| {
                let (shift, width) = mapping.window()?;
                let mask = channel_mask((width / 2) as u8);
                Some((bits & mask) << shift)
            })
            .fold(0, |acc, bits| acc | bits)
    }

    /// Highest occupied channel across enabled slots (at most 20)
    pub fn max_channel(&self) -> u8 {
        self.slots
            .iter()
            .map(SlotMapping::last_channel)
            .max()
            .unwrap_or(0)
            .min(MAX_CHANNELS)
    }

    /// Header byte of the smallest frame class covering `max_channel`
    pub fn header_class(&self) -> u8 {
        TallyClass::for_channels(self.max_channel()).header()
    }

    /// Log the combined channel layout
    pub fn log_layout(&self) {
        for (index, mapping) in self.slots.iter().enumerate() {
            match mapping.window() {
                Some((shift, width)) => log::info!(
                    target: "dispatch",
                    "slot {}: switcher ch 1-{} -> combined ch {}-{}",
                    index,
                    width / 2,
                    shift / 2 + 1,
                    (shift + width) / 2
                ),
                None => log::info!(target: "dispatch", "slot {}: inactive", index),
            }
        }
        log::info!(
            target: "dispatch",
            "combined channels: {} (header 0x{:02X})",
            self.max_channel(),
            self.header_class()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(offset: u8, camera_count: u8) -> SlotMapping {
        SlotMapping {
            offset,
            camera_count,
            enabled: true,
        }
    }

    #[test]
    fn test_slots_are_isolated() {
        let mut mapper = TallyMapper::new();
        mapper.register(0, mapping(0, 4)).unwrap();
        mapper.register(1, mapping(4, 4)).unwrap();

        let samples = [
            (0u64, 0u64),
            (0xFFFF_FFFF, 0xFFFF_FFFF),
            (0x1234_5678_9ABC, 0xDEAD_BEEF),
            (0x55, 0xAA),
        ];
        for (a, b) in samples {
            assert_eq!(mapper.map([a, b]), (a & 0xFF) | ((b & 0xFF) << 8));
        }
    }

    #[test]
    fn test_clamped_to_forty_bits() {
        let mut mapper = TallyMapper::new();
        mapper.register(0, mapping(18, 6)).unwrap();

        // Only the two lowest input channels fit above offset 18
        let combined = mapper.map([0xFFF, 0]);
        assert_eq!(combined, 0x0F << 36);
        assert_eq!(combined >> 40, 0);
        assert_eq!(mapper.max_channel(), 20);
    }

    #[test]
    fn test_dual_mode_combination() {
        let mut mapper = TallyMapper::new();
        mapper.register(0, mapping(0, 4)).unwrap();
        mapper.register(1, mapping(4, 4)).unwrap();

        // Primary camera 1 PGM, secondary camera 2 PGM
        let combined = mapper.map([0b01, 0b01 << 2]);
        assert_eq!(combined, 0x0401);
        assert_eq!(mapper.max_channel(), 8);
        assert_eq!(mapper.header_class(), 0xF1);
    }

    #[test]
    fn test_disabled_slot_contributes_nothing() {
        let mut mapper = TallyMapper::new();
        mapper.register(0, mapping(0, 4)).unwrap();
        mapper
            .register(
                1,
                SlotMapping {
                    offset: 4,
                    camera_count: 4,
                    enabled: false,
                },
            )
            .unwrap();

        assert_eq!(mapper.map([0x01, 0xFF]), 0x01);
        assert_eq!(mapper.max_channel(), 4);
    }

    #[test]
    fn test_overlap_is_bitwise_or() {
        let mut mapper = TallyMapper::new();
        mapper.register(0, mapping(0, 4)).unwrap();
        mapper.register(1, mapping(2, 4)).unwrap();

        // Primary ch3 PGM, secondary ch1 PVW lands on the same combined ch3
        let combined = mapper.map([0b01 << 4, 0b10]);
        assert_eq!(combined, 0b11 << 4);
        assert_eq!(mapper.max_channel(), 6);
    }

    #[test]
    fn test_header_class_thresholds() {
        let mut mapper = TallyMapper::new();
        assert_eq!(mapper.max_channel(), 0);
        assert_eq!(mapper.header_class(), 0xF1);

        mapper.register(0, mapping(0, 10)).unwrap();
        assert_eq!(mapper.header_class(), 0xF2);

        mapper.register(1, mapping(10, 6)).unwrap();
        assert_eq!(mapper.header_class(), 0xF3);

        mapper.register(1, mapping(10, 10)).unwrap();
        assert_eq!(mapper.max_channel(), 20);
        assert_eq!(mapper.header_class(), 0xF4);
    }

    #[test]
    fn test_register_rejects_bad_input() {
        let mut mapper = TallyMapper::new();
        assert_eq!(mapper.register(2, mapping(0, 4)), Err(TallyError::InvalidArgument));
        assert_eq!(mapper.register(0, mapping(20, 4)), Err(TallyError::InvalidArgument));
    }
}
