//! Indicator task
//!
//! Drives the program (red) and preview (green) LEDs from the tally event
//! bus, and flashes the board LED for every tally frame.

use crate::dispatcher::{LedState, TallyEvent, TALLY_EVENTS};
use embassy_time::Timer;
use esp_hal::gpio::Output;

/// Board LED flash length per tally frame
const FLASH_MS: u64 = 30;

pub struct IndicatorPins {
    pub board: Output<'static>,
    pub program: Output<'static>,
    pub preview: Output<'static>,
}

impl IndicatorPins {
    fn show(&mut self, state: LedState) {
        let (red, green) = match state {
            LedState::Off => (false, false),
            LedState::Program | LedState::Live => (true, false),
            LedState::Preview => (false, true),
            LedState::BatteryLow => (true, true),
        };
        self.program.set_level(red.into());
        self.preview.set_level(green.into());
    }
}

pub async fn indicator_task(mut pins: IndicatorPins) -> ! {
    let Ok(mut events) = TALLY_EVENTS.subscriber() else {
        log::error!(target: "dispatch", "no tally event subscriber slot");
        loop {
            Timer::after_secs(3600).await;
        }
    };
    pins.show(LedState::Off);

    loop {
        match events.next_message_pure().await {
            TallyEvent::Led(state) => pins.show(state),
            TallyEvent::Brightness(level) => {
                // GPIO indicators are on/off only
                log::debug!(target: "dispatch", "brightness level {}", level);
            }
            TallyEvent::Tally { .. } => {
                pins.board.toggle();
                Timer::after_millis(FLASH_MS).await;
                pins.board.toggle();
            }
        }
    }
}
