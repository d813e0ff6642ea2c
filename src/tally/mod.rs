pub mod mapper;
pub mod types;

pub use mapper::{SlotMapping, TallyMapper};
pub use types::{channel_code, channel_mask, set_channel_code, TallyCode, TallyLists};
