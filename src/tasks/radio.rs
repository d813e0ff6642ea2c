//! Radio task
//!
//! Sole owner of the `LoraLink`. Wakes on the DIO1 edge, on a radio command
//! from another task, or on a periodic tick, then services the link.

use crate::config::timing::RADIO_TICK_MS;
use crate::dispatcher::{
    execute, handle_node_frame, retune, CommandReply, Indicator, LedState, RadioCommand, RxDispatcher,
    TallyConsumer, TallyEvent, RADIO_COMMANDS, RADIO_REPLY, TALLY_EVENTS,
};
use crate::lora::{LinkEvent, LoraLink, LoraRadio, RxPacket};
use crate::store::{ConfigStore, KvBackend};
use crate::tally::types::TallyLists;
use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::pubsub::ImmediatePublisher;
use embassy_time::{Delay, Instant, Timer};

/// Store shared between tasks
pub type SharedStore<B> = Mutex<CriticalSectionRawMutex, ConfigStore<B>>;

/// Events serviced per wake-up
const MAX_EVENTS_PER_WAKE: usize = 8;

type EventPublisher = ImmediatePublisher<'static, CriticalSectionRawMutex, TallyEvent, 4, 1, 1>;

/// Indicator that forwards to the indicator task
pub struct BusIndicator(EventPublisher);

impl BusIndicator {
    pub fn new() -> Self {
        Self(TALLY_EVENTS.immediate_publisher())
    }
}

impl Indicator for BusIndicator {
    fn set_state(&mut self, state: LedState) {
        self.0.publish_immediate(TallyEvent::Led(state));
    }

    fn set_brightness(&mut self, level: u8) {
        self.0.publish_immediate(TallyEvent::Brightness(level));
    }
}

/// Display stand-in that forwards tally lists onto the event bus
pub struct BusDisplay(EventPublisher);

impl BusDisplay {
    pub fn new() -> Self {
        Self(TALLY_EVENTS.immediate_publisher())
    }
}

impl TallyConsumer for BusDisplay {
    fn on_tally(&mut self, lists: &TallyLists, channel_count: u8) {
        self.0.publish_immediate(TallyEvent::Tally {
            lists: lists.clone(),
            channel_count,
        });
    }
}

enum Wake {
    Irq,
    Command(RadioCommand),
    Tick,
}

async fn next_wake<R: LoraRadio>(link: &mut LoraLink<R>) -> Wake {
    match select3(
        link.wait_irq(),
        RADIO_COMMANDS.receive(),
        Timer::after_millis(RADIO_TICK_MS),
    )
    .await
    {
        Either3::First(()) => Wake::Irq,
        Either3::Second(command) => Wake::Command(command),
        Either3::Third(()) => Wake::Tick,
    }
}

/// Drain link events, handing each received packet to `on_packet`
async fn drain<R: LoraRadio>(link: &mut LoraLink<R>, mut on_packet: impl FnMut(RxPacket)) {
    for _ in 0..MAX_EVENTS_PER_WAKE {
        match link.service().await {
            Ok(LinkEvent::None) => break,
            Ok(LinkEvent::Received(packet)) => on_packet(packet),
            Ok(LinkEvent::Sent) | Ok(LinkEvent::Discarded) => {}
            Err(e) => {
                log::warn!(target: "lora", "service failed: {}", e);
                break;
            }
        }
    }
}

async fn handle_command<R: LoraRadio, B: KvBackend>(
    link: &mut LoraLink<R>,
    store: &'static SharedStore<B>,
    command: RadioCommand,
) {
    let wants_reply = command.expects_reply();
    let result = execute(link, &mut Delay, command).await;
    match &result {
        Ok(reply) => {
            if let CommandReply::Applied { .. } = reply {
                // Locked only for the write, never across the announce
                let mut store = store.lock().await;
                if let Err(e) = reply.persist(&mut *store) {
                    log::error!(target: "lora", "saving new channel failed: {}", e);
                }
            }
        }
        Err(e) => log::warn!(target: "lora", "radio command failed: {}", e),
    }
    if wants_reply {
        RADIO_REPLY.signal(result);
    }
}

/// TX node radio loop
pub async fn tx_radio_task<R: LoraRadio, B: KvBackend>(mut link: LoraLink<R>, store: &'static SharedStore<B>) -> ! {
    loop {
        match next_wake(&mut link).await {
            Wake::Command(command) => handle_command(&mut link, store, command).await,
            Wake::Irq | Wake::Tick => {}
        }
        drain(&mut link, |packet| {
            handle_node_frame(&packet.data, packet.rssi, packet.snr);
        })
        .await;
    }
}

/// RX node radio loop
pub async fn rx_radio_task<R: LoraRadio, B: KvBackend>(
    mut link: LoraLink<R>,
    store: &'static SharedStore<B>,
    mut rx: RxDispatcher<BusIndicator, BusDisplay>,
) -> ! {
    loop {
        match next_wake(&mut link).await {
            Wake::Command(command) => handle_command(&mut link, store, command).await,
            Wake::Irq => {}
            Wake::Tick => {
                if rx.watchdog_expired(Instant::now().as_millis()) {
                    log::warn!(target: "lora", "no frame received for a while, restarting receive");
                    if let Err(e) = link.restart_receive().await {
                        log::warn!(target: "lora", "restart receive failed: {}", e);
                    }
                }
            }
        }

        let mut received: heapless::Vec<RxPacket, 4> = heapless::Vec::new();
        drain(&mut link, |packet| {
            if received.push(packet).is_err() {
                log::warn!(target: "lora", "rx backlog full, frame dropped");
            }
        })
        .await;

        for packet in received {
            let outcome = {
                let mut store = store.lock().await;
                rx.handle_frame(
                    &packet.data,
                    packet.rssi,
                    packet.snr,
                    Instant::now().as_millis(),
                    &mut *store,
                )
            };

            if let Some(reply) = outcome.reply {
                if let Err(e) = link.transmit_and_drain(&reply, &mut Delay).await {
                    log::warn!(target: "lora", "reply failed: {}", e);
                }
            }
            if let Some((frequency_mhz, sync_word)) = outcome.retune {
                let mut store = store.lock().await;
                if let Err(e) = retune(&mut link, &mut *store, frequency_mhz, sync_word).await {
                    log::error!(target: "lora", "retune to {} MHz failed: {}", frequency_mhz, e);
                }
            }
            if outcome.reboot {
                log::info!(target: "dispatch", "rebooting on request");
                Timer::after_millis(500).await;
                esp_hal::system::software_reset();
            }
        }
    }
}
