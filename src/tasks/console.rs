//! Console task
//!
//! Reads command lines from the USB serial port and answers on the same
//! port. Radio work is posted to the radio task and the reply awaited.

use crate::config::limits::CONSOLE_OUT_MAX;
use crate::config::timing::CONSOLE_REPLY_TIMEOUT_MS;
use crate::console::{write_reply, ConsoleCommand, LineBuffer, HELP};
use crate::dispatcher::{RADIO_COMMANDS, RADIO_REPLY};
use crate::error::TallyError;
use crate::store::settings::log_summary;
use crate::store::KvBackend;
use crate::tasks::SharedStore;
use core::fmt::Write as _;
use embassy_time::{with_timeout, Duration, Timer};
use embedded_io_async::{Read, Write};
use heapless::String;

type Reply = String<CONSOLE_OUT_MAX>;

/// Run one line; returns true when the node should reboot
async fn run_line<B: KvBackend>(line: &str, store: &'static SharedStore<B>, out: &mut Reply) -> bool {
    let command = match ConsoleCommand::parse(line) {
        Ok(command) => command,
        Err(_) => {
            let _ = writeln!(out, "bad command '{}', try 'help'", line);
            return false;
        }
    };
    log::info!(target: "console", "{:?}", command);

    if let Some(radio) = command.radio_command() {
        RADIO_REPLY.reset();
        RADIO_COMMANDS.send(radio).await;
        let reply = with_timeout(Duration::from_millis(CONSOLE_REPLY_TIMEOUT_MS), RADIO_REPLY.wait())
            .await
            .unwrap_or(Err(TallyError::LinkTimeout));
        let _ = write_reply(out, &reply);
        return false;
    }

    match command {
        ConsoleCommand::Help => {
            let _ = out.push_str(HELP);
        }
        ConsoleCommand::Config => {
            log_summary(&*store.lock().await);
            let _ = writeln!(out, "ok");
        }
        ConsoleCommand::FactoryReset => match store.lock().await.factory_reset() {
            Ok(()) => {
                let _ = writeln!(out, "defaults restored, reboot to apply");
            }
            Err(e) => {
                let _ = writeln!(out, "error: {}", e);
            }
        },
        ConsoleCommand::Reboot => {
            let _ = writeln!(out, "rebooting");
            return true;
        }
        _ => {}
    }
    false
}

pub async fn console_task<Rd: Read, Wr: Write, B: KvBackend>(
    mut reader: Rd,
    mut writer: Wr,
    store: &'static SharedStore<B>,
) -> ! {
    let mut lines = LineBuffer::new();
    let mut out = Reply::new();

    loop {
        let mut buf = [0u8; 64];
        let n = match reader.read(&mut buf).await {
            Ok(0) => continue,
            Ok(n) => n,
            Err(_) => {
                Timer::after_millis(10).await;
                continue;
            }
        };

        for &byte in &buf[..n] {
            let Some(line) = lines.push(byte) else {
                continue;
            };
            out.clear();
            let reboot = run_line(&line, store, &mut out).await;
            if writer.write_all(out.as_bytes()).await.is_err() {
                log::warn!(target: "console", "reply lost");
            }
            if reboot {
                let _ = writer.flush().await;
                Timer::after_millis(500).await;
                esp_hal::system::software_reset();
            }
        }
    }
}
