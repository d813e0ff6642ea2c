//! Embassy tasks
//!
//! Generic task bodies; `main.rs` wraps them in concrete
//! `#[embassy_executor::task]` functions for each role.

pub mod console;
pub mod indicator;
pub mod net;
pub mod radio;
pub mod switcher;

pub use console::console_task;
pub use indicator::{indicator_task, IndicatorPins};
pub use net::{net_task, stack_config, wifi_task, NetDatagram, NetStream, TcpBuffers, UdpBuffers};
pub use radio::{rx_radio_task, tx_radio_task, BusDisplay, BusIndicator, SharedStore};
pub use switcher::switcher_task;
