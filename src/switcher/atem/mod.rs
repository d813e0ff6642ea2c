//! Blackmagic ATEM switcher link (UDP, port 9910)

pub mod client;
pub mod packet;
pub mod state;

pub use client::AtemClient;
pub use state::{AtemState, Topology};
