//! Switcher task (TX node)
//!
//! Runs the supervisor and the TX dispatcher on the main loop period and
//! hands finished frames to the radio task.

use super::radio::SharedStore;
use crate::config::timing::MAIN_LOOP_MS;
use crate::dispatcher::{RadioCommand, TxDispatcher, NETWORK_RESTART, RADIO_COMMANDS};
use crate::store::KvBackend;
use crate::switcher::net::{DatagramSocket, StreamSocket};
use crate::switcher::SwitcherSupervisor;
use embassy_net::Stack;
use embassy_time::{Instant, Timer};

pub async fn switcher_task<D: DatagramSocket, S: StreamSocket, B: KvBackend>(
    mut supervisor: SwitcherSupervisor<D, S>,
    store: &'static SharedStore<B>,
    stack: Stack<'static>,
) -> ! {
    log::info!(target: "supervisor", "waiting for network");
    stack.wait_config_up().await;
    if let Some(config) = stack.config_v4() {
        log::info!(target: "supervisor", "network up: {}", config.address);
    }

    {
        let store = store.lock().await;
        if let Err(e) = supervisor.load(&*store).await {
            log::error!(target: "supervisor", "switcher settings unreadable: {}", e);
        }
    }

    let mut dispatcher = TxDispatcher::new(Instant::now().as_millis());
    let commands = RADIO_COMMANDS.sender();

    loop {
        let now = Instant::now().as_millis();
        let outcome = supervisor.poll(now).await;
        if outcome.network_restart {
            NETWORK_RESTART.signal(());
        }

        if let Some(frame) = dispatcher.poll(&supervisor, now) {
            if commands.try_send(RadioCommand::Transmit(frame)).is_err() {
                log::warn!(target: "dispatch", "radio busy, frame dropped");
            }
        }

        Timer::after_millis(MAIN_LOOP_MS).await;
    }
}
