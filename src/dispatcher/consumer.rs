//! Interfaces to the tally consumers on an RX node
//!
//! The dispatcher never touches LED or display hardware directly. It drives
//! whatever implements these traits, registered when the node starts.

use crate::tally::types::{channel_code, TallyCode, TallyLists};

/// Indicator colour state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Off,
    /// Red
    Program,
    /// Green
    Preview,
    /// Program and preview at once, shown as program
    Live,
    BatteryLow,
}

impl LedState {
    /// State for `camera` in a packed bitmap; both bits map to program
    pub fn for_camera(packed: u64, camera: u8) -> Self {
        match channel_code(packed, camera) {
            TallyCode::Off => LedState::Off,
            TallyCode::Program | TallyCode::Both => LedState::Program,
            TallyCode::Preview => LedState::Preview,
        }
    }

    pub fn is_lit(self) -> bool {
        self != LedState::Off
    }
}

/// Local camera indicator
pub trait Indicator {
    fn set_state(&mut self, state: LedState);

    /// Output level, 1-255
    fn set_brightness(&mut self, level: u8);
}

/// Receives decoded tally lists, typically a display
pub trait TallyConsumer {
    fn on_tally(&mut self, lists: &TallyLists, channel_count: u8);

    /// Link quality of the last received frame
    fn on_signal(&mut self, _rssi_dbm: i16, _snr_db: i8) {}
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use core::cell::RefCell;
    use std::vec::Vec;

    /// Indicator that records every call
    #[derive(Default)]
    pub struct RecordingIndicator {
        pub states: RefCell<Vec<LedState>>,
        pub brightness: RefCell<Vec<u8>>,
    }

    impl RecordingIndicator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn last_state(&self) -> Option<LedState> {
            self.states.borrow().last().copied()
        }

        pub fn last_brightness(&self) -> Option<u8> {
            self.brightness.borrow().last().copied()
        }
    }

    impl Indicator for RecordingIndicator {
        fn set_state(&mut self, state: LedState) {
            self.states.borrow_mut().push(state);
        }

        fn set_brightness(&mut self, level: u8) {
            self.brightness.borrow_mut().push(level);
        }
    }

    /// Display stand-in that records tally lists
    #[derive(Default)]
    pub struct RecordingDisplay {
        pub tallies: RefCell<Vec<(TallyLists, u8)>>,
        pub signal: RefCell<Option<(i16, i8)>>,
    }

    impl RecordingDisplay {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn last(&self) -> Option<TallyLists> {
            self.tallies.borrow().last().map(|(lists, _)| lists.clone())
        }
    }

    impl TallyConsumer for RecordingDisplay {
        fn on_tally(&mut self, lists: &TallyLists, channel_count: u8) {
            self.tallies.borrow_mut().push((lists.clone(), channel_count));
        }

        fn on_signal(&mut self, rssi_dbm: i16, snr_db: i8) {
            *self.signal.borrow_mut() = Some((rssi_dbm, snr_db));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_led_state_for_camera() {
        // Camera 1 program, camera 2 preview, camera 3 both
        let packed = 0b11_10_01;
        assert_eq!(LedState::for_camera(packed, 1), LedState::Program);
        assert_eq!(LedState::for_camera(packed, 2), LedState::Preview);
        assert_eq!(LedState::for_camera(packed, 3), LedState::Program);
        assert_eq!(LedState::for_camera(packed, 4), LedState::Off);
        assert!(!LedState::Off.is_lit());
    }
}
