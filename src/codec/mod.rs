pub mod device;
pub mod frame;

pub use device::{AckResult, DeviceId, DeviceRequest, DeviceResponse};
pub use frame::{
    decode, encode_config_change, encode_heartbeat, encode_legacy_tally, encode_tally, Frame, FrameBuf,
    StatusFrame, TallyClass,
};
