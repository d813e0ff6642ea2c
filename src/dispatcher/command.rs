//! Work the radio task performs for other tasks
//!
//! Other tasks never touch the `LoraLink`. They post a `RadioCommand` and,
//! for everything but `Transmit`, wait for the `CommandReply`.

use crate::codec::FrameBuf;
use crate::error::TallyError;
use crate::lora::link::MAX_SCAN_RESULTS;
use crate::lora::{ChannelInfo, LinkStatus, LoraLink, LoraRadio};
use crate::store::settings::LoraSettings;
use crate::store::{ConfigStore, KvBackend};
use embedded_hal_async::delay::DelayNs;
use heapless::Vec;

#[derive(Debug, Clone, PartialEq)]
pub enum RadioCommand {
    /// Queue a frame for transmission
    Transmit(FrameBuf),
    /// Announce and apply a new channel
    ApplyConfig { frequency_mhz: f32, sync_word: u8 },
    QueryStatus,
    Scan { start_mhz: f32, end_mhz: f32, step_mhz: f32 },
}

impl RadioCommand {
    pub fn expects_reply(&self) -> bool {
        !matches!(self, RadioCommand::Transmit(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Done,
    Status(LinkStatus),
    /// The radio now runs on this channel; not yet persisted
    Applied { frequency_mhz: f32, sync_word: u8 },
    Scan(Vec<ChannelInfo, MAX_SCAN_RESULTS>),
}

impl CommandReply {
    /// Save a newly applied channel; every other reply is a no-op
    pub fn persist<B: KvBackend>(&self, store: &mut ConfigStore<B>) -> Result<(), TallyError> {
        if let CommandReply::Applied {
            frequency_mhz,
            sync_word,
        } = *self
        {
            LoraSettings {
                frequency_mhz,
                sync_word,
            }
            .save(store)?;
            log::info!(target: "lora", "channel {} MHz sync 0x{:02X} saved", frequency_mhz, sync_word);
        }
        Ok(())
    }
}

/// Run one command against the link
///
/// Never touches the config store, so the caller can hold its lock only
/// for `CommandReply::persist`.
pub async fn execute<R: LoraRadio, D: DelayNs>(
    link: &mut LoraLink<R>,
    delay: &mut D,
    command: RadioCommand,
) -> Result<CommandReply, TallyError> {
    match command {
        RadioCommand::Transmit(frame) => {
            link.transmit(&frame).await?;
            Ok(CommandReply::Done)
        }
        RadioCommand::ApplyConfig {
            frequency_mhz,
            sync_word,
        } => {
            link.set_pending_frequency(frequency_mhz)?;
            link.set_pending_sync_word(sync_word);
            Ok(match link.announce_pending_config(delay).await? {
                Some((frequency_mhz, sync_word)) => CommandReply::Applied {
                    frequency_mhz,
                    sync_word,
                },
                None => CommandReply::Done,
            })
        }
        RadioCommand::QueryStatus => Ok(CommandReply::Status(link.status())),
        RadioCommand::Scan {
            start_mhz,
            end_mhz,
            step_mhz,
        } => Ok(CommandReply::Scan(link.scan(delay, start_mhz, end_mhz, step_mhz).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frame::{decode, encode_heartbeat, Frame};
    use crate::lora::link::mock::RecordingDelay;
    use crate::lora::traits::mock::MockLoraRadio;
    use crate::lora::LoraConfig;
    use crate::store::{keys, MemoryBackend, Namespace};
    use futures::executor::block_on;

    fn ready_link() -> LoraLink<MockLoraRadio> {
        let mut link = LoraLink::new(MockLoraRadio::new());
        block_on(link.init(LoraConfig::default())).unwrap();
        link
    }

    #[test]
    fn test_apply_config_announces_then_persists() {
        let mut link = ready_link();
        let mut delay = RecordingDelay::default();
        let mut store = ConfigStore::new(MemoryBackend::new());
        store.init().unwrap();

        let command = RadioCommand::ApplyConfig {
            frequency_mhz: 869.5,
            sync_word: 0x34,
        };
        assert!(command.expects_reply());
        let reply = block_on(execute(&mut link, &mut delay, command)).unwrap();
        assert_eq!(
            reply,
            CommandReply::Applied {
                frequency_mhz: 869.5,
                sync_word: 0x34
            }
        );

        let history = link.radio().get_tx_history();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|frame| matches!(
            decode(frame),
            Ok(Frame::ConfigChange { sync_word: 0x34, .. })
        )));
        assert_eq!(link.status().frequency_mhz, 869.5);
        // The store is untouched until the reply is persisted
        assert_eq!(store.get::<f32>(Namespace::Lora, keys::FREQUENCY), Ok(868.0));

        reply.persist(&mut store).unwrap();
        assert_eq!(store.get::<f32>(Namespace::Lora, keys::FREQUENCY), Ok(869.5));
        assert_eq!(store.get::<u8>(Namespace::Lora, keys::SYNC_WORD), Ok(0x34));
    }

    #[test]
    fn test_apply_config_out_of_band() {
        let mut link = ready_link();
        let mut delay = RecordingDelay::default();
        let command = RadioCommand::ApplyConfig {
            frequency_mhz: 433.0,
            sync_word: 0x34,
        };
        assert_eq!(
            block_on(execute(&mut link, &mut delay, command)),
            Err(TallyError::InvalidArgument)
        );
        assert!(link.radio().get_tx_history().is_empty());
        assert_eq!(delay.elapsed_ms(), 0);
    }

    #[test]
    fn test_status_and_scan() {
        let mut link = ready_link();
        let mut delay = RecordingDelay::default();

        match block_on(execute(&mut link, &mut delay, RadioCommand::QueryStatus)).unwrap() {
            CommandReply::Status(status) => assert_eq!(status.frequency_mhz, 868.0),
            other => panic!("unexpected reply {:?}", other),
        }

        let scan = RadioCommand::Scan {
            start_mhz: 867.0,
            end_mhz: 868.0,
            step_mhz: 0.5,
        };
        match block_on(execute(&mut link, &mut delay, scan)).unwrap() {
            CommandReply::Scan(channels) => assert_eq!(channels.len(), 3),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_transmit_needs_no_reply() {
        let mut link = ready_link();
        let mut delay = RecordingDelay::default();
        let command = RadioCommand::Transmit(encode_heartbeat());
        assert!(!command.expects_reply());
        assert_eq!(
            block_on(execute(&mut link, &mut delay, command)),
            Ok(CommandReply::Done)
        );
        assert_eq!(link.radio().get_tx_history().len(), 1);
    }
}
