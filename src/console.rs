//! Text console on the USB serial port
//!
//! One command per line. Radio commands are forwarded to the radio task;
//! the rest act on the config store or the chip.

use crate::config::limits::CONSOLE_LINE_MAX;
use crate::dispatcher::{CommandReply, RadioCommand};
use crate::error::TallyError;
use core::fmt::{self, Write};
use heapless::String;

pub const HELP: &str = "\
commands:
  status                         radio status
  apply <mhz> <sync>             announce and switch channel (sync as 0x12 or 18)
  scan <start> <end> <step>      RSSI per channel, MHz
  config                         log the stored configuration
  factory-reset                  restore defaults
  reboot
";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Status,
    Apply { frequency_mhz: f32, sync_word: u8 },
    Scan { start_mhz: f32, end_mhz: f32, step_mhz: f32 },
    Config,
    FactoryReset,
    Reboot,
}

fn parse_sync_word(text: &str) -> Result<u8, TallyError> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| TallyError::InvalidArgument)
}

fn parse_mhz(text: Option<&str>) -> Result<f32, TallyError> {
    text.and_then(|t| t.parse::<f32>().ok())
        .filter(|mhz| mhz.is_finite())
        .ok_or(TallyError::InvalidArgument)
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, TallyError> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(TallyError::InvalidArgument)?;
        let command = match verb {
            "help" | "?" => ConsoleCommand::Help,
            "status" => ConsoleCommand::Status,
            "apply" => ConsoleCommand::Apply {
                frequency_mhz: parse_mhz(words.next())?,
                sync_word: parse_sync_word(words.next().ok_or(TallyError::InvalidArgument)?)?,
            },
            "scan" => ConsoleCommand::Scan {
                start_mhz: parse_mhz(words.next())?,
                end_mhz: parse_mhz(words.next())?,
                step_mhz: parse_mhz(words.next())?,
            },
            "config" => ConsoleCommand::Config,
            "factory-reset" => ConsoleCommand::FactoryReset,
            "reboot" => ConsoleCommand::Reboot,
            _ => return Err(TallyError::InvalidArgument),
        };
        if words.next().is_some() {
            return Err(TallyError::InvalidArgument);
        }
        Ok(command)
    }

    /// The radio task's share of this command, if any
    pub fn radio_command(&self) -> Option<RadioCommand> {
        match *self {
            ConsoleCommand::Status => Some(RadioCommand::QueryStatus),
            ConsoleCommand::Apply {
                frequency_mhz,
                sync_word,
            } => Some(RadioCommand::ApplyConfig {
                frequency_mhz,
                sync_word,
            }),
            ConsoleCommand::Scan {
                start_mhz,
                end_mhz,
                step_mhz,
            } => Some(RadioCommand::Scan {
                start_mhz,
                end_mhz,
                step_mhz,
            }),
            _ => None,
        }
    }
}

/// Collects bytes into lines
///
/// CR or LF ends a line. Backspace edits. A line longer than the buffer is
/// dropped whole.
#[derive(Debug, Default)]
pub struct LineBuffer {
    line: String<CONSOLE_LINE_MAX>,
    overflow: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; returns a complete non-empty line
    pub fn push(&mut self, byte: u8) -> Option<String<CONSOLE_LINE_MAX>> {
        match byte {
            b'\r' | b'\n' => {
                let line = core::mem::take(&mut self.line);
                if core::mem::take(&mut self.overflow) {
                    log::warn!(target: "console", "line too long, dropped");
                    return None;
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    return None;
                }
                let mut out = String::new();
                let _ = out.push_str(trimmed);
                Some(out)
            }
            0x08 | 0x7F => {
                self.line.pop();
                None
            }
            0x20..=0x7E => {
                if self.line.push(byte as char).is_err() {
                    self.overflow = true;
                }
                None
            }
            _ => None,
        }
    }
}

/// Render the radio task's answer
pub fn write_reply<W: Write>(out: &mut W, reply: &Result<CommandReply, TallyError>) -> fmt::Result {
    match reply {
        Err(e) => writeln!(out, "error: {}", e),
        Ok(CommandReply::Done) => writeln!(out, "ok"),
        Ok(CommandReply::Applied {
            frequency_mhz,
            sync_word,
        }) => writeln!(out, "now on {} MHz sync 0x{:02X}", frequency_mhz, sync_word),
        Ok(CommandReply::Status(status)) => {
            match status.chip {
                Some(chip) => writeln!(
                    out,
                    "chip {} ({}-{} MHz)",
                    chip.name(),
                    status.freq_min_mhz,
                    status.freq_max_mhz
                )?,
                None => writeln!(out, "chip absent")?,
            }
            writeln!(
                out,
                "{} MHz sync 0x{:02X} mode {:?}",
                status.frequency_mhz, status.sync_word, status.mode
            )?;
            writeln!(
                out,
                "last rssi {} dBm snr {} dB, tx {} rx {} queued {}",
                status.last_rssi_dbm, status.last_snr_db, status.tx_count, status.rx_count, status.queued
            )
        }
        Ok(CommandReply::Scan(channels)) => {
            for channel in channels.iter() {
                writeln!(
                    out,
                    "{:>8.2} MHz {:>5} dBm{}",
                    channel.frequency_mhz,
                    channel.rssi_dbm,
                    if channel.clear { "  clear" } else { "" }
                )?;
            }
            writeln!(out, "{} channels", channels.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::execute;
    use crate::lora::link::mock::RecordingDelay;
    use crate::lora::traits::mock::MockLoraRadio;
    use crate::lora::{LoraConfig, LoraLink};
    use crate::store::{keys, ConfigStore, MemoryBackend, Namespace};
    use futures::executor::block_on;

    fn feed(buffer: &mut LineBuffer, text: &str) -> Option<String<CONSOLE_LINE_MAX>> {
        let mut last = None;
        for &byte in text.as_bytes() {
            if let Some(line) = buffer.push(byte) {
                last = Some(line);
            }
        }
        last
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("status"), Ok(ConsoleCommand::Status));
        assert_eq!(
            ConsoleCommand::parse("apply 869.5 0x34"),
            Ok(ConsoleCommand::Apply {
                frequency_mhz: 869.5,
                sync_word: 0x34
            })
        );
        assert_eq!(
            ConsoleCommand::parse("apply 433 18"),
            Ok(ConsoleCommand::Apply {
                frequency_mhz: 433.0,
                sync_word: 0x12
            })
        );
        assert_eq!(
            ConsoleCommand::parse("scan 867 869 0.5"),
            Ok(ConsoleCommand::Scan {
                start_mhz: 867.0,
                end_mhz: 869.0,
                step_mhz: 0.5
            })
        );
        assert_eq!(ConsoleCommand::parse("factory-reset"), Ok(ConsoleCommand::FactoryReset));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(ConsoleCommand::parse("apply 869.5"), Err(TallyError::InvalidArgument));
        assert_eq!(ConsoleCommand::parse("apply 869.5 0x1FF"), Err(TallyError::InvalidArgument));
        assert_eq!(ConsoleCommand::parse("apply nan 0x12"), Err(TallyError::InvalidArgument));
        assert_eq!(ConsoleCommand::parse("scan 867 869"), Err(TallyError::InvalidArgument));
        assert_eq!(ConsoleCommand::parse("status now"), Err(TallyError::InvalidArgument));
        assert_eq!(ConsoleCommand::parse("launch"), Err(TallyError::InvalidArgument));
    }

    #[test]
    fn test_only_radio_commands_are_forwarded() {
        assert_eq!(ConsoleCommand::Status.radio_command(), Some(RadioCommand::QueryStatus));
        assert_eq!(ConsoleCommand::Config.radio_command(), None);
        assert_eq!(ConsoleCommand::Reboot.radio_command(), None);
    }

    #[test]
    fn test_line_buffer() {
        let mut buffer = LineBuffer::new();
        assert_eq!(feed(&mut buffer, "  stat").as_deref(), None);
        assert_eq!(feed(&mut buffer, "uz\x08s\r\n").as_deref(), Some("status"));
        assert_eq!(feed(&mut buffer, "\r\n"), None);

        let long = "x".repeat(CONSOLE_LINE_MAX + 5);
        assert_eq!(feed(&mut buffer, &long), None);
        assert_eq!(feed(&mut buffer, "\n"), None);
        assert_eq!(feed(&mut buffer, "help\n").as_deref(), Some("help"));
    }

    #[test]
    fn test_console_apply_reaches_radio_and_store() {
        let mut link = LoraLink::new(MockLoraRadio::new());
        block_on(link.init(LoraConfig::default())).unwrap();
        let mut store = ConfigStore::new(MemoryBackend::new());
        store.init().unwrap();
        let mut delay = RecordingDelay::default();

        let mut buffer = LineBuffer::new();
        let line = feed(&mut buffer, "apply 869.5 0x34\r").unwrap();
        let command = ConsoleCommand::parse(&line).unwrap().radio_command().unwrap();
        let reply = block_on(execute(&mut link, &mut delay, command));
        reply.as_ref().unwrap().persist(&mut store).unwrap();

        assert_eq!(link.radio().get_tx_history().len(), 3);
        assert_eq!(link.status().sync_word, 0x34);
        assert_eq!(store.get::<f32>(Namespace::Lora, keys::FREQUENCY), Ok(869.5));

        let mut out: String<128> = String::new();
        write_reply(&mut out, &reply).unwrap();
        assert_eq!(out.as_str(), "now on 869.5 MHz sync 0x34\n");
    }

    #[test]
    fn test_write_error_reply() {
        let mut out: String<64> = String::new();
        write_reply(&mut out, &Err(TallyError::InvalidArgument)).unwrap();
        assert!(out.starts_with("error: "));
    }
}
