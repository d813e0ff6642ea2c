//! Radio supervisor
//!
//! `LoraLink` is owned by the radio task. It serialises TX and RX on one
//! radio, keeps a small TX queue, and implements the live frequency/sync
//! change and the channel scan.

use crate::codec::frame::{encode_config_change, FrameBuf};
use crate::config::limits::{MAX_LORA_PAYLOAD, TX_QUEUE_DEPTH};
use crate::config::timing;
use crate::error::TallyError;
use crate::lora::traits::{ChipType, LoraConfig, LoraRadio, RadioEvent, RxPacket};
use crate::store::settings::LoraSettings;
use crate::store::{ConfigStore, KvBackend};
use embedded_hal_async::delay::DelayNs;
use heapless::{Deque, Vec};

/// Maximum channels reported by one scan
pub const MAX_SCAN_RESULTS: usize = 32;

/// RSSI below which a channel counts as clear, in dBm
const CLEAR_CHANNEL_DBM: i32 = -100;

/// Polls allowed while waiting for a blocking transmit to finish
const TX_DRAIN_POLLS: u32 = 2_000;

/// Called from the radio task for every received frame: `(data, rssi, snr)`
pub type ReceiveCallback = fn(&[u8], i16, i8);

type QueuedFrame = Vec<u8, MAX_LORA_PAYLOAD>;

/// Radio mode as seen by the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// No chip detected
    Absent,
    RxListen,
    TxInFlight,
    Sleep,
}

/// What one `service` call observed
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    None,
    /// A transmit completed
    Sent,
    Received(RxPacket),
    /// A packet or transmit was lost (CRC error or radio timeout)
    Discarded,
}

/// Snapshot returned by `status`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkStatus {
    pub chip: Option<ChipType>,
    pub mode: LinkMode,
    pub frequency_mhz: f32,
    pub sync_word: u8,
    /// Chip band, both zero when no chip is present
    pub freq_min_mhz: f32,
    pub freq_max_mhz: f32,
    pub last_rssi_dbm: i16,
    pub last_snr_db: i8,
    pub tx_count: u32,
    pub rx_count: u32,
    pub queued: usize,
}

/// One scan step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelInfo {
    pub frequency_mhz: f32,
    pub rssi_dbm: i16,
    pub clear: bool,
}

pub struct LoraLink<R: LoraRadio> {
    radio: R,
    config: LoraConfig,
    chip: Option<ChipType>,
    mode: LinkMode,
    queue: Deque<QueuedFrame, TX_QUEUE_DEPTH>,
    receive_callback: Option<ReceiveCallback>,
    pending_frequency: Option<f32>,
    pending_sync_word: Option<u8>,
    last_rssi: i16,
    last_snr: i8,
    tx_count: u32,
    rx_count: u32,
}

impl<R: LoraRadio> LoraLink<R> {
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            config: LoraConfig::default(),
            chip: None,
            mode: LinkMode::Absent,
            queue: Deque::new(),
            receive_callback: None,
            pending_frequency: None,
            pending_sync_word: None,
            last_rssi: -120,
            last_snr: 0,
            tx_count: 0,
            rx_count: 0,
        }
    }

    /// Detect the chip, apply frequency and sync word, and start listening
    ///
    /// SX1262 is tried first on 868 MHz, then SX1268 on 433 MHz. A
    /// requested frequency outside the detected chip's band is replaced by
    /// the chip's detection frequency.
    pub async fn init(&mut self, config: LoraConfig) -> Result<ChipType, TallyError> {
        for chip in ChipType::DETECT_ORDER {
            log::info!(target: "lora", "probing {}", chip.name());
            let detect_config = LoraConfig {
                frequency_mhz: chip.detect_mhz(),
                ..config.clone()
            };
            match self.radio.detect(chip, &detect_config).await {
                Ok(()) => {
                    self.chip = Some(chip);
                    self.config = detect_config;
                    break;
                }
                Err(e) => log::warn!(target: "lora", "{} not detected: {:?}", chip.name(), e),
            }
        }

        let Some(chip) = self.chip else {
            log::error!(target: "lora", "no LoRa chip detected, running without radio");
            self.mode = LinkMode::Absent;
            return Err(TallyError::DeviceAbsent);
        };

        let band = chip.band();
        if band.contains(config.frequency_mhz) {
            if config.frequency_mhz != self.config.frequency_mhz {
                self.radio.set_frequency(config.frequency_mhz).await?;
                self.config.frequency_mhz = config.frequency_mhz;
            }
        } else {
            log::warn!(
                target: "lora",
                "{} MHz outside {} band, staying on {} MHz",
                config.frequency_mhz,
                chip.name(),
                self.config.frequency_mhz
            );
        }
        self.radio.set_sync_word(config.sync_word).await?;
        self.config.sync_word = config.sync_word;

        self.enter_receive().await?;

        log::info!(
            target: "lora",
            "{} ready: {} MHz SF{} BW{} CR4/{} {} dBm sync 0x{:02X}",
            chip.name(),
            self.config.frequency_mhz,
            self.config.spreading_factor,
            self.config.bandwidth_khz,
            self.config.coding_rate,
            self.config.tx_power_dbm,
            self.config.sync_word
        );
        Ok(chip)
    }

    pub fn is_present(&self) -> bool {
        self.chip.is_some()
    }

    pub fn chip(&self) -> Option<ChipType> {
        self.chip
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub fn set_receive_callback(&mut self, callback: ReceiveCallback) {
        self.receive_callback = Some(callback);
    }

    async fn enter_receive(&mut self) -> Result<(), TallyError> {
        self.radio.start_receive().await?;
        self.mode = LinkMode::RxListen;
        Ok(())
    }

    async fn start_tx(&mut self, data: &[u8]) -> Result<(), TallyError> {
        match self.radio.start_transmit(data).await {
            Ok(()) => {
                self.mode = LinkMode::TxInFlight;
                Ok(())
            }
            Err(e) => {
                log::error!(target: "lora", "transmit start failed: {:?}", e);
                self.enter_receive().await?;
                Err(e.into())
            }
        }
    }

    /// Accept a frame for transmission
    ///
    /// Starts transmitting right away when no transmit is in flight,
    /// otherwise queues the frame. A full queue drops its oldest frame.
    pub async fn transmit(&mut self, data: &[u8]) -> Result<(), TallyError> {
        if self.chip.is_none() {
            return Err(TallyError::DeviceAbsent);
        }
        if data.is_empty() || data.len() > MAX_LORA_PAYLOAD {
            return Err(TallyError::InvalidArgument);
        }

        if self.mode == LinkMode::TxInFlight {
            let mut frame = QueuedFrame::new();
            frame
                .extend_from_slice(data)
                .map_err(|_| TallyError::InvalidArgument)?;
            if self.queue.is_full() {
                log::warn!(target: "lora", "tx queue full, dropping oldest frame");
                self.queue.pop_front();
            }
            let _ = self.queue.push_back(frame);
            log::debug!(target: "lora", "queued frame ({}/{})", self.queue.len(), TX_QUEUE_DEPTH);
            return Ok(());
        }

        log::debug!(target: "lora", "tx {} bytes: {:02X?}", data.len(), data);
        self.start_tx(data).await
    }

    /// Newest queued frame; everything older is discarded
    fn dequeue_latest(&mut self) -> Option<QueuedFrame> {
        let count = self.queue.len();
        let latest = self.queue.pop_back()?;
        if count > 1 {
            log::debug!(target: "lora", "coalesced {} queued frames into the newest", count);
        }
        self.queue.clear();
        Some(latest)
    }

    /// Wait for the radio interrupt line
    pub async fn wait_irq(&mut self) {
        self.radio.wait_irq().await
    }

    /// Handle whatever the radio has completed since the last call
    pub async fn service(&mut self) -> Result<LinkEvent, TallyError> {
        if self.chip.is_none() {
            return Ok(LinkEvent::None);
        }

        match self.radio.poll_event().await? {
            RadioEvent::Idle => Ok(LinkEvent::None),
            RadioEvent::TxDone => {
                self.tx_count = self.tx_count.wrapping_add(1);
                match self.dequeue_latest() {
                    Some(frame) => {
                        // Stays in TxInFlight
                        if let Err(e) = self.start_tx(&frame).await {
                            log::warn!(target: "lora", "queued frame lost: {:?}", e);
                        }
                    }
                    None => self.enter_receive().await?,
                }
                Ok(LinkEvent::Sent)
            }
            RadioEvent::RxDone(packet) => {
                self.rx_count = self.rx_count.wrapping_add(1);
                self.last_rssi = packet.rssi;
                self.last_snr = packet.snr;
                log::debug!(
                    target: "lora",
                    "rx {} bytes (RSSI {} dBm, SNR {} dB)",
                    packet.data.len(),
                    packet.rssi,
                    packet.snr
                );
                if let Some(callback) = self.receive_callback {
                    callback(&packet.data, packet.rssi, packet.snr);
                }
                Ok(LinkEvent::Received(packet))
            }
            RadioEvent::CrcError => {
                log::warn!(target: "lora", "rx CRC error, packet dropped");
                Ok(LinkEvent::Discarded)
            }
            RadioEvent::Timeout => {
                log::warn!(target: "lora", "radio timeout in {:?}", self.mode);
                if self.mode == LinkMode::TxInFlight {
                    match self.dequeue_latest() {
                        Some(frame) => self.start_tx(&frame).await?,
                        None => self.enter_receive().await?,
                    }
                }
                Ok(LinkEvent::Discarded)
            }
        }
    }

    /// Put the radio back into receive, dropping any queued frames
    pub async fn restart_receive(&mut self) -> Result<(), TallyError> {
        if self.chip.is_none() {
            return Err(TallyError::DeviceAbsent);
        }
        self.queue.clear();
        self.enter_receive().await
    }

    pub async fn sleep(&mut self) -> Result<(), TallyError> {
        if self.chip.is_none() {
            return Err(TallyError::DeviceAbsent);
        }
        self.queue.clear();
        self.radio.sleep().await?;
        self.mode = LinkMode::Sleep;
        Ok(())
    }

    /// Retune now, without announcing the change on air
    pub async fn set_frequency(&mut self, mhz: f32) -> Result<(), TallyError> {
        let chip = self.chip.ok_or(TallyError::DeviceAbsent)?;
        if !chip.band().contains(mhz) {
            return Err(TallyError::InvalidArgument);
        }
        self.radio.set_frequency(mhz).await?;
        self.config.frequency_mhz = mhz;
        log::info!(target: "lora", "frequency set to {} MHz", mhz);
        Ok(())
    }

    pub async fn set_sync_word(&mut self, sync_word: u8) -> Result<(), TallyError> {
        if self.chip.is_none() {
            return Err(TallyError::DeviceAbsent);
        }
        self.radio.set_sync_word(sync_word).await?;
        self.config.sync_word = sync_word;
        log::info!(target: "lora", "sync word set to 0x{:02X}", sync_word);
        Ok(())
    }

    /// Stage a frequency for the next `apply_pending_config`
    pub fn set_pending_frequency(&mut self, mhz: f32) -> Result<(), TallyError> {
        let chip = self.chip.ok_or(TallyError::DeviceAbsent)?;
        if !chip.band().contains(mhz) {
            log::warn!(target: "lora", "pending frequency {} MHz outside {} band", mhz, chip.name());
            return Err(TallyError::InvalidArgument);
        }
        self.pending_frequency = Some(mhz);
        Ok(())
    }

    pub fn set_pending_sync_word(&mut self, sync_word: u8) {
        self.pending_sync_word = Some(sync_word);
    }

    pub fn has_pending_config(&self) -> bool {
        self.pending_frequency.is_some() || self.pending_sync_word.is_some()
    }

    /// Transmit one frame and wait until the radio is listening again
    pub async fn transmit_and_drain<D: DelayNs>(&mut self, data: &[u8], delay: &mut D) -> Result<(), TallyError> {
        self.transmit(data).await?;
        for _ in 0..TX_DRAIN_POLLS {
            if self.mode != LinkMode::TxInFlight {
                return Ok(());
            }
            self.service().await?;
            if self.mode != LinkMode::TxInFlight {
                return Ok(());
            }
            delay.delay_ms(1).await;
        }
        log::warn!(target: "lora", "transmit did not complete");
        self.enter_receive().await?;
        Err(TallyError::LinkTimeout)
    }

    /// Announce and apply the staged frequency and sync word
    ///
    /// The config-change frame goes out three times one second apart on the
    /// current parameters, then one more second passes before this radio
    /// retunes. Returns the values now in use, or `None` when nothing was
    /// staged. Nothing is persisted here.
    pub async fn announce_pending_config<D: DelayNs>(&mut self, delay: &mut D) -> Result<Option<(f32, u8)>, TallyError> {
        if self.chip.is_none() {
            return Err(TallyError::DeviceAbsent);
        }
        if !self.has_pending_config() {
            return Ok(None);
        }

        let frequency = self.pending_frequency.unwrap_or(self.config.frequency_mhz);
        let sync_word = self.pending_sync_word.unwrap_or(self.config.sync_word);
        let frame: FrameBuf = encode_config_change(frequency, sync_word);

        log::info!(
            target: "lora",
            "announcing config change: {} MHz sync 0x{:02X}",
            frequency,
            sync_word
        );
        for attempt in 1..=timing::CONFIG_CHANGE_REPEATS {
            if let Err(e) = self.transmit_and_drain(&frame, delay).await {
                log::warn!(target: "lora", "config change frame {} failed: {}", attempt, e);
            }
            delay.delay_ms(timing::CONFIG_CHANGE_INTERVAL_MS).await;
        }
        // Let receivers retune
        delay.delay_ms(timing::CONFIG_CHANGE_INTERVAL_MS).await;

        if self.pending_frequency.is_some() {
            self.set_frequency(frequency).await?;
        }
        if self.pending_sync_word.is_some() {
            self.set_sync_word(sync_word).await?;
        }
        self.enter_receive().await?;

        self.pending_frequency = None;
        self.pending_sync_word = None;
        Ok(Some((frequency, sync_word)))
    }

    /// `announce_pending_config`, then persist the new values
    pub async fn apply_pending_config<D: DelayNs, B: KvBackend>(
        &mut self,
        delay: &mut D,
        store: &mut ConfigStore<B>,
    ) -> Result<(), TallyError> {
        if let Some((frequency_mhz, sync_word)) = self.announce_pending_config(delay).await? {
            LoraSettings {
                frequency_mhz,
                sync_word,
            }
            .save(store)?;
            log::info!(target: "lora", "config change applied and saved");
        }
        Ok(())
    }

    /// Measure the average RSSI across a frequency range
    pub async fn scan<D: DelayNs>(
        &mut self,
        delay: &mut D,
        start_mhz: f32,
        end_mhz: f32,
        step_mhz: f32,
    ) -> Result<Vec<ChannelInfo, MAX_SCAN_RESULTS>, TallyError> {
        if self.chip.is_none() {
            return Err(TallyError::DeviceAbsent);
        }
        if !(start_mhz < end_mhz) || !(step_mhz > 0.0) {
            return Err(TallyError::InvalidArgument);
        }

        log::info!(target: "lora", "scan {} - {} MHz step {}", start_mhz, end_mhz, step_mhz);
        let original = self.config.frequency_mhz;
        self.queue.clear();
        let mut results = Vec::new();

        let mut index = 0u32;
        while !results.is_full() {
            let freq = start_mhz + step_mhz * index as f32;
            if freq > end_mhz {
                break;
            }
            index += 1;

            if let Err(e) = self.radio.set_frequency(freq).await {
                log::warn!(target: "lora", "scan: cannot tune {} MHz: {:?}", freq, e);
                continue;
            }
            self.radio.start_receive().await?;
            delay.delay_ms(timing::SCAN_SETTLE_MS).await;

            let mut sum = 0i32;
            for sample in 0..timing::SCAN_SAMPLES {
                sum += self.radio.rssi().await? as i32;
                if sample + 1 < timing::SCAN_SAMPLES {
                    delay.delay_ms(timing::SCAN_SAMPLE_INTERVAL_MS).await;
                }
            }
            let avg = sum / timing::SCAN_SAMPLES as i32;
            log::debug!(target: "lora", "{} MHz: {} dBm", freq, avg);
            let _ = results.push(ChannelInfo {
                frequency_mhz: freq,
                rssi_dbm: avg as i16,
                clear: avg < CLEAR_CHANNEL_DBM,
            });
        }

        self.radio.set_frequency(original).await?;
        self.enter_receive().await?;
        log::info!(target: "lora", "scan complete: {} channels", results.len());
        Ok(results)
    }

    pub fn status(&self) -> LinkStatus {
        let (freq_min_mhz, freq_max_mhz) = match self.chip {
            Some(chip) => (chip.band().min_mhz, chip.band().max_mhz),
            None => (0.0, 0.0),
        };
        LinkStatus {
            chip: self.chip,
            mode: self.mode,
            frequency_mhz: self.config.frequency_mhz,
            sync_word: self.config.sync_word,
            freq_min_mhz,
            freq_max_mhz,
            last_rssi_dbm: self.last_rssi,
            last_snr_db: self.last_snr,
            tx_count: self.tx_count,
            rx_count: self.rx_count,
            queued: self.queue.len(),
        }
    }

    #[cfg(test)]
    pub fn radio(&self) -> &R {
        &self.radio
    }
}

#[cfg(test)]
pub mod mock {
    //! Delay that records instead of sleeping

    use core::cell::RefCell;
    use embedded_hal_async::delay::DelayNs;

    #[derive(Default)]
    pub struct RecordingDelay {
        pub elapsed_ns: RefCell<u64>,
        pub calls_ms: RefCell<std::vec::Vec<u32>>,
    }

    impl RecordingDelay {
        pub fn elapsed_ms(&self) -> u64 {
            *self.elapsed_ns.borrow() / 1_000_000
        }
    }

    impl DelayNs for RecordingDelay {
        async fn delay_ns(&mut self, ns: u32) {
            *self.elapsed_ns.borrow_mut() += ns as u64;
        }

        async fn delay_ms(&mut self, ms: u32) {
            *self.elapsed_ns.borrow_mut() += ms as u64 * 1_000_000;
            self.calls_ms.borrow_mut().push(ms);
        }
    }
}
