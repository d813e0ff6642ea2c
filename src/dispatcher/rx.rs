//! RX side: air frames to the local indicator and display

use super::consumer::{Indicator, LedState, TallyConsumer};
use crate::codec::device::STATUS_FLAG_STOPPED;
use crate::codec::frame::{decode, Frame, FrameBuf};
use crate::codec::{AckResult, DeviceId, DeviceRequest, DeviceResponse};
use crate::config::limits::MAX_CHANNELS;
use crate::config::timing::RX_WATCHDOG_MS;
use crate::error::TallyError;
use crate::lora::{LoraLink, LoraRadio};
use crate::store::settings::{LoraSettings, SystemSettings};
use crate::store::{keys, ConfigStore, KvBackend, Namespace};
use crate::tally::types::TallyLists;

/// Follow-up work for the radio task after one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RxOutcome {
    /// Frame to send back to the TX node
    pub reply: Option<FrameBuf>,
    /// Retune to `(frequency_mhz, sync_word)` once the reply is out
    pub retune: Option<(f32, u8)>,
    pub reboot: bool,
}

/// Percent (0-100) to LED level (1-255)
fn percent_to_level(percent: u8) -> u8 {
    ((percent as u16 * 255 / 100) as u8).max(1)
}

fn level_to_percent(level: u8) -> u8 {
    ((level as u16 * 100 + 127) / 255) as u8
}

pub struct RxDispatcher<I: Indicator, C: TallyConsumer> {
    indicator: I,
    display: C,
    device_id: DeviceId,
    camera_id: u8,
    brightness: u8,
    battery: u8,
    stopped: bool,
    led: LedState,
    boot_ms: u64,
    last_frame_ms: u64,
}

impl<I: Indicator, C: TallyConsumer> RxDispatcher<I, C> {
    pub fn new(mut indicator: I, display: C, device_id: DeviceId, settings: &SystemSettings, now_ms: u64) -> Self {
        indicator.set_brightness(settings.led_brightness);
        indicator.set_state(LedState::Off);
        Self {
            indicator,
            display,
            device_id,
            camera_id: settings.camera_id,
            brightness: settings.led_brightness,
            battery: 100,
            stopped: false,
            led: LedState::Off,
            boot_ms: now_ms,
            last_frame_ms: now_ms,
        }
    }

    pub fn camera_id(&self) -> u8 {
        self.camera_id
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn led(&self) -> LedState {
        self.led
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn set_battery(&mut self, percent: u8) {
        self.battery = percent.min(100);
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    pub fn display(&self) -> &C {
        &self.display
    }

    fn set_led(&mut self, state: LedState) {
        if self.led != state {
            self.led = state;
            self.indicator.set_state(state);
        }
    }

    /// Handle one received frame
    pub fn handle_frame<B: KvBackend>(
        &mut self,
        data: &[u8],
        rssi_dbm: i16,
        snr_db: i8,
        now_ms: u64,
        store: &mut ConfigStore<B>,
    ) -> RxOutcome {
        self.last_frame_ms = now_ms;
        self.display.on_signal(rssi_dbm, snr_db);

        let frame = match decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!(target: "dispatch", "undecodable frame ({} bytes): {}", data.len(), e);
                return RxOutcome::default();
            }
        };

        match frame {
            Frame::Tally { channel_count, packed } | Frame::TallyLegacy { channel_count, packed } => {
                self.apply_tally(packed, channel_count);
                RxOutcome::default()
            }
            Frame::Heartbeat => {
                log::debug!(target: "dispatch", "heartbeat ({} dBm)", rssi_dbm);
                RxOutcome::default()
            }
            Frame::ConfigChange {
                frequency_mhz,
                sync_word,
            } => {
                log::info!(
                    target: "dispatch",
                    "config change: {} MHz, sync 0x{:02X}",
                    frequency_mhz,
                    sync_word
                );
                RxOutcome {
                    retune: Some((frequency_mhz, sync_word)),
                    ..RxOutcome::default()
                }
            }
            Frame::DeviceRequest(request) => self.handle_request(request, now_ms, store),
            other => {
                log::debug!(target: "dispatch", "ignoring {:?}", other);
                RxOutcome::default()
            }
        }
    }

    fn apply_tally(&mut self, packed: u64, channel_count: u8) {
        self.stopped = false;
        let lists = TallyLists::from_packed(packed, channel_count);
        log::info!(target: "dispatch", "camera {}: {}", self.camera_id, lists);
        self.display.on_tally(&lists, channel_count);
        let state = LedState::for_camera(packed, self.camera_id);
        self.set_led(state);
    }

    fn ack(&self, command: u8, result: AckResult) -> RxOutcome {
        let response = DeviceResponse::Ack {
            device: self.device_id,
            command,
            result,
        };
        RxOutcome {
            reply: Some(response.encode()),
            ..RxOutcome::default()
        }
    }

    fn handle_request<B: KvBackend>(&mut self, request: DeviceRequest, now_ms: u64, store: &mut ConfigStore<B>) -> RxOutcome {
        if !request.target().addresses(&self.device_id) {
            return RxOutcome::default();
        }
        let header = request.header();

        match request {
            DeviceRequest::Status { .. } => {
                let response = DeviceResponse::Status {
                    device: self.device_id,
                    battery: self.battery,
                    camera_id: self.camera_id,
                    uptime_s: (now_ms.saturating_sub(self.boot_ms) / 1000) as u32,
                    brightness: level_to_percent(self.brightness),
                    flags: if self.stopped { STATUS_FLAG_STOPPED } else { 0 },
                };
                RxOutcome {
                    reply: Some(response.encode()),
                    ..RxOutcome::default()
                }
            }
            DeviceRequest::SetBrightness { brightness, .. } => {
                if brightness > 100 {
                    return self.ack(header, AckResult::Invalid);
                }
                let level = percent_to_level(brightness);
                if store.set(Namespace::System, keys::LED_BRIGHTNESS, level).is_err() {
                    return self.ack(header, AckResult::Failed);
                }
                self.brightness = level;
                self.indicator.set_brightness(level);
                log::info!(target: "dispatch", "brightness {}% (level {})", brightness, level);
                self.ack(header, AckResult::Success)
            }
            DeviceRequest::SetCameraId { camera_id, .. } => {
                if camera_id == 0 || camera_id > MAX_CHANNELS {
                    return self.ack(header, AckResult::Invalid);
                }
                if store.set(Namespace::System, keys::CAMERA_ID, camera_id).is_err() {
                    return self.ack(header, AckResult::Failed);
                }
                log::info!(target: "dispatch", "camera id {} -> {}", self.camera_id, camera_id);
                self.camera_id = camera_id;
                self.ack(header, AckResult::Success)
            }
            DeviceRequest::SetRf {
                frequency_mhz,
                sync_word,
                ..
            } => {
                let in_band = store.band().map_or(true, |band| band.contains(frequency_mhz));
                if !in_band {
                    return self.ack(header, AckResult::Invalid);
                }
                RxOutcome {
                    retune: Some((frequency_mhz, sync_word)),
                    ..self.ack(header, AckResult::Success)
                }
            }
            DeviceRequest::Stop { .. } => {
                self.stopped = true;
                self.set_led(LedState::Off);
                self.ack(header, AckResult::Success)
            }
            DeviceRequest::Reboot { .. } => RxOutcome {
                reboot: true,
                ..self.ack(header, AckResult::Success)
            },
            DeviceRequest::Ping { timestamp, .. } => {
                let response = DeviceResponse::Pong {
                    device: self.device_id,
                    tx_timestamp: timestamp,
                    rx_timestamp: now_ms as u32,
                };
                RxOutcome {
                    reply: Some(response.encode()),
                    ..RxOutcome::default()
                }
            }
        }
    }

    /// True once per watchdog period without any received frame
    pub fn watchdog_expired(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_frame_ms) > RX_WATCHDOG_MS {
            self.last_frame_ms = now_ms;
            return true;
        }
        false
    }
}

/// Move the radio to a new channel and persist it
pub async fn retune<R: LoraRadio, B: KvBackend>(
    link: &mut LoraLink<R>,
    store: &mut ConfigStore<B>,
    frequency_mhz: f32,
    sync_word: u8,
) -> Result<(), TallyError> {
    link.set_frequency(frequency_mhz).await?;
    link.set_sync_word(sync_word).await?;
    link.restart_receive().await?;
    LoraSettings {
        frequency_mhz,
        sync_word,
    }
    .save(store)
}
