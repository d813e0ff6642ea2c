#![cfg_attr(not(test), no_std)]

#[cfg(feature = "embedded")]
extern crate alloc;

pub mod codec;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod lora;
pub mod store;
pub mod switcher;
pub mod tally;

// Task bodies need the executor, the IP stack and the HAL
#[cfg(feature = "embedded")]
pub mod tasks;

pub use error::TallyError;
