//! Switcher state rebuilt from ATEM commands

use super::packet::Command;
use crate::config::limits::{MAX_CHANNELS, PRODUCT_NAME_LEN};
use crate::error::TallyError;
use crate::tally::types::{channel_code, set_channel_code, TallyCode};
use heapless::String;

/// Mix-effect bus the tally follows
const PRIMARY_ME: u8 = 0;

/// Switcher topology from `_top`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Topology {
    pub num_mes: u8,
    pub num_sources: u8,
    pub num_dsks: u8,
    pub num_supersources: u8,
}

/// What a command changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Nothing,
    Tally,
    Info,
}

#[derive(Debug, Clone, Default)]
pub struct AtemState {
    pub product_name: String<PRODUCT_NAME_LEN>,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub topology: Topology,
    pub topology_received: bool,
    pub tally_config_received: bool,
    pub init_complete: bool,
    /// Tally channel count from `_TlC`
    pub num_cameras: u8,
    /// Keyers on the primary ME
    pub num_keyers: u8,
    /// Raw source id on the primary ME's program bus as sent in `PrgI`;
    /// cameras are 1.., other sources keep their own ids (1000 is bars)
    pub program_input: u16,
    /// Raw source id on the primary ME's preview bus, as in `PrvI`
    pub preview_input: u16,
    pub in_transition: bool,
    pub transition_position: u16,
    pub tally_packed: u64,
    /// User channel limit, 0 for none
    camera_limit: u8,
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn require(data: &[u8], len: usize) -> Result<(), TallyError> {
    if data.len() < len {
        Err(TallyError::ProtocolError)
    } else {
        Ok(())
    }
}

impl AtemState {
    pub fn new(camera_limit: u8) -> Self {
        Self {
            camera_limit,
            ..Self::default()
        }
    }

    /// Topology and tally layout are known, or the switcher said so
    pub fn initialized(&self) -> bool {
        (self.topology_received && self.tally_config_received) || self.init_complete
    }

    /// min(user limit, switcher count, 20)
    pub fn effective_cameras(&self) -> u8 {
        let reported = if self.tally_config_received {
            self.num_cameras
        } else {
            MAX_CHANNELS
        };
        let limit = if self.camera_limit == 0 {
            MAX_CHANNELS
        } else {
            self.camera_limit
        };
        reported.min(limit).min(MAX_CHANNELS)
    }

    pub fn apply(&mut self, command: &Command<'_>) -> Result<Applied, TallyError> {
        let data = command.data;
        match &command.name {
            b"_ver" => {
                require(data, 4)?;
                self.protocol_major = u16_at(data, 0);
                self.protocol_minor = u16_at(data, 2);
                log::info!(target: "atem", "protocol {}.{}", self.protocol_major, self.protocol_minor);
                Ok(Applied::Info)
            }
            b"_pin" => {
                self.set_product_name(data)?;
                Ok(Applied::Info)
            }
            b"_top" => {
                require(data, 7)?;
                self.topology = Topology {
                    num_mes: data[0],
                    num_sources: data[1],
                    num_dsks: data[5],
                    num_supersources: data[6],
                };
                self.topology_received = true;
                Ok(Applied::Info)
            }
            b"_MeC" => {
                require(data, 2)?;
                if data[0] == PRIMARY_ME {
                    self.num_keyers = data[1];
                }
                Ok(Applied::Info)
            }
            b"_TlC" => {
                require(data, 5)?;
                self.num_cameras = data[4];
                self.tally_config_received = true;
                Ok(Applied::Info)
            }
            b"_TlI" | b"TlIn" => {
                self.apply_tally(data)?;
                Ok(Applied::Tally)
            }
            b"PrgI" => {
                require(data, 4)?;
                if data[0] != PRIMARY_ME {
                    return Ok(Applied::Nothing);
                }
                let source = u16_at(data, 2);
                self.move_bus(self.program_input, source, TallyCode::Program);
                self.program_input = source;
                Ok(Applied::Tally)
            }
            b"PrvI" => {
                require(data, 4)?;
                if data[0] != PRIMARY_ME {
                    return Ok(Applied::Nothing);
                }
                let source = u16_at(data, 2);
                self.move_bus(self.preview_input, source, TallyCode::Preview);
                self.preview_input = source;
                Ok(Applied::Tally)
            }
            b"TrPs" => {
                require(data, 6)?;
                if data[0] == PRIMARY_ME {
                    self.in_transition = data[1] != 0;
                    self.transition_position = u16_at(data, 4);
                }
                Ok(Applied::Info)
            }
            b"InCm" => {
                self.init_complete = true;
                log::info!(target: "atem", "initialisation complete");
                Ok(Applied::Info)
            }
            _ => Ok(Applied::Nothing),
        }
    }

    fn set_product_name(&mut self, data: &[u8]) -> Result<(), TallyError> {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        let raw = &data[..end.min(PRODUCT_NAME_LEN)];
        let name = core::str::from_utf8(raw).map_err(|_| TallyError::ProtocolError)?;
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return Err(TallyError::ProtocolError);
        }
        self.product_name.clear();
        let _ = self.product_name.push_str(name);
        log::info!(target: "atem", "product: {}", name);
        Ok(())
    }

    /// Repack the per-input tally flags
    fn apply_tally(&mut self, data: &[u8]) -> Result<(), TallyError> {
        require(data, 2)?;
        let declared = u16_at(data, 0) as usize;
        let count = declared
            .min(data.len() - 2)
            .min(self.effective_cameras() as usize);

        let mut packed = 0u64;
        for (index, &flags) in data[2..2 + count].iter().enumerate() {
            set_channel_code(&mut packed, index as u8 + 1, TallyCode::from_bits(flags));
        }
        if packed != self.tally_packed {
            log::debug!(target: "atem", "tally {} inputs -> 0x{:010X}", count, packed);
        }
        self.tally_packed = packed;
        Ok(())
    }

    /// Move one bus bit from `old` to `new` input
    fn move_bus(&mut self, old: u16, new: u16, bus: TallyCode) {
        let limit = self.effective_cameras() as u16;
        let bit = bus.bits();
        if (1..=limit).contains(&old) {
            let code = channel_code(self.tally_packed, old as u8).bits() & !bit;
            set_channel_code(&mut self.tally_packed, old as u8, TallyCode::from_bits(code));
        }
        if (1..=limit).contains(&new) {
            let code = channel_code(self.tally_packed, new as u8).bits() | bit;
            set_channel_code(&mut self.tally_packed, new as u8, TallyCode::from_bits(code));
        }
    }
}
