//! Tally dispatch between switchers, radio and indicators
//!
//! `tx` turns switcher tally into air frames, `rx` turns air frames into
//! indicator and display updates. The channels below carry traffic between
//! the embedded tasks.

pub mod command;
pub mod consumer;
pub mod rx;
pub mod tx;

pub use command::{execute, CommandReply, RadioCommand};
pub use consumer::{Indicator, LedState, TallyConsumer};
pub use rx::{retune, RxDispatcher, RxOutcome};
pub use tx::{handle_node_frame, TxDispatcher};

#[cfg(feature = "embedded")]
pub use channels::*;

#[cfg(feature = "embedded")]
mod channels {
    use super::{CommandReply, LedState, RadioCommand};
    use crate::error::TallyError;
    use crate::tally::types::TallyLists;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::Channel;
    use embassy_sync::pubsub::PubSubChannel;
    use embassy_sync::signal::Signal;

    /// Capacity of the radio command channel
    const RADIO_COMMAND_CHANNEL_SIZE: usize = 8;

    /// Event fanned out to the indicator and display consumers
    #[derive(Debug, Clone)]
    pub enum TallyEvent {
        Tally { lists: TallyLists, channel_count: u8 },
        Led(LedState),
        Brightness(u8),
    }

    pub static RADIO_COMMANDS: Channel<CriticalSectionRawMutex, RadioCommand, RADIO_COMMAND_CHANNEL_SIZE> =
        Channel::new();

    /// CAP=4 events, SUBS=1 (indicator task), PUBS=1 (radio task)
    pub static TALLY_EVENTS: PubSubChannel<CriticalSectionRawMutex, TallyEvent, 4, 1, 1> = PubSubChannel::new();

    /// Raised by the switcher task when the IP network looks dead
    pub static NETWORK_RESTART: Signal<CriticalSectionRawMutex, ()> = Signal::new();

    /// Outcome of the last command that `expects_reply`
    pub static RADIO_REPLY: Signal<CriticalSectionRawMutex, Result<CommandReply, TallyError>> = Signal::new();
}
