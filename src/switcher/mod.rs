//! Video switcher links
//!
//! Protocol clients are sans-IO: they parse what the supervisor feeds them
//! and queue outgoing data in an [`Outbox`]. The supervisor owns the sockets.

pub mod atem;
pub mod client;
pub mod net;
pub mod outbox;
pub mod supervisor;
pub mod vmix;

pub use atem::AtemClient;
pub use client::{LinkInfo, SwitcherClient, SwitcherControl, Transport};
pub use net::{DatagramSocket, NetError, StreamSocket};
pub use outbox::Outbox;
pub use supervisor::{LinkState, PollOutcome, SwitcherSupervisor, TallySource};
pub use vmix::VmixClient;
