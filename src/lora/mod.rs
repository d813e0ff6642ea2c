#[cfg(feature = "embedded")]
pub mod driver;
pub mod link;
pub mod params;
pub mod traits;

#[cfg(feature = "embedded")]
pub use driver::{Sx126xDriver, Sx126xPins};
pub use link::{ChannelInfo, LinkEvent, LinkMode, LinkStatus, LoraLink};
pub use traits::{ChipType, LoraConfig, LoraError, LoraRadio, RadioEvent, RxPacket};
