//! Packed tally representation
//!
//! Each camera channel takes two bits: bit 0 is program, bit 1 is preview.
//! Channel `k` (1-based) lives at bits `2(k-1)` and `2(k-1)+1`.

use crate::config::limits::MAX_CHANNELS;
use core::fmt;
use heapless::Vec;

/// Two-bit tally state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyCode {
    Off,
    Program,
    Preview,
    Both,
}

impl TallyCode {
    /// Decode the low two bits of `bits`
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => TallyCode::Off,
            1 => TallyCode::Program,
            2 => TallyCode::Preview,
            _ => TallyCode::Both,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            TallyCode::Off => 0,
            TallyCode::Program => 1,
            TallyCode::Preview => 2,
            TallyCode::Both => 3,
        }
    }

    pub fn is_program(self) -> bool {
        self.bits() & 0x01 != 0
    }

    pub fn is_preview(self) -> bool {
        self.bits() & 0x02 != 0
    }
}

/// Mask covering the first `channels` channels (capped at 32, the width of a u64)
pub const fn channel_mask(channels: u8) -> u64 {
    let bits = channels as u32 * 2;
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Read the code of `channel` (1-based) out of a packed value
pub fn channel_code(packed: u64, channel: u8) -> TallyCode {
    if channel == 0 || channel > 32 {
        return TallyCode::Off;
    }
    let shift = (channel as u32 - 1) * 2;
    TallyCode::from_bits(((packed >> shift) & 0x03) as u8)
}

/// Write the code of `channel` (1-based) into a packed value
pub fn set_channel_code(packed: &mut u64, channel: u8, code: TallyCode) {
    if channel == 0 || channel > 32 {
        return;
    }
    let shift = (channel as u32 - 1) * 2;
    *packed &= !(0x03u64 << shift);
    *packed |= (code.bits() as u64) << shift;
}

/// Program and preview channel lists decoded from a packed value
///
/// A channel that is both on program and preview appears in both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallyLists {
    pub program: Vec<u8, { MAX_CHANNELS as usize }>,
    pub preview: Vec<u8, { MAX_CHANNELS as usize }>,
}

impl TallyLists {
    pub fn from_packed(packed: u64, channel_count: u8) -> Self {
        let mut lists = TallyLists::default();
        for channel in 1..=channel_count.min(MAX_CHANNELS) {
            let code = channel_code(packed, channel);
            if code.is_program() {
                let _ = lists.program.push(channel);
            }
            if code.is_preview() {
                let _ = lists.preview.push(channel);
            }
        }
        lists
    }
}

struct ChannelList<'a>(&'a [u8]);

impl fmt::Display for ChannelList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("--");
        }
        for (i, channel) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", channel)?;
        }
        Ok(())
    }
}

impl fmt::Display for TallyLists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PGM[{}] PVW[{}]",
            ChannelList(&self.program),
            ChannelList(&self.preview)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_bits() {
        assert_eq!(TallyCode::from_bits(0b01), TallyCode::Program);
        assert_eq!(TallyCode::from_bits(0b10), TallyCode::Preview);
        assert_eq!(TallyCode::from_bits(0b111), TallyCode::Both);
        assert!(TallyCode::Both.is_program());
        assert!(TallyCode::Both.is_preview());
        assert!(!TallyCode::Off.is_program());
    }

    #[test]
    fn test_channel_mask() {
        assert_eq!(channel_mask(0), 0);
        assert_eq!(channel_mask(4), 0xFF);
        assert_eq!(channel_mask(20), 0xFF_FFFF_FFFF);
        assert_eq!(channel_mask(32), u64::MAX);
        assert_eq!(channel_mask(40), u64::MAX);
    }

    #[test]
    fn test_set_and_get_channel() {
        let mut packed = 0u64;
        set_channel_code(&mut packed, 3, TallyCode::Program);
        set_channel_code(&mut packed, 5, TallyCode::Preview);
        assert_eq!(packed, (0b01 << 4) | (0b10 << 8));
        assert_eq!(channel_code(packed, 3), TallyCode::Program);
        assert_eq!(channel_code(packed, 5), TallyCode::Preview);
        assert_eq!(channel_code(packed, 4), TallyCode::Off);

        set_channel_code(&mut packed, 3, TallyCode::Off);
        assert_eq!(packed, 0b10 << 8);

        // Out of range channels are ignored
        set_channel_code(&mut packed, 0, TallyCode::Both);
        set_channel_code(&mut packed, 33, TallyCode::Both);
        assert_eq!(packed, 0b10 << 8);
    }

    #[test]
    fn test_lists_include_both_in_each() {
        let mut packed = 0u64;
        set_channel_code(&mut packed, 1, TallyCode::Both);
        set_channel_code(&mut packed, 2, TallyCode::Preview);

        let lists = TallyLists::from_packed(packed, 8);
        assert_eq!(lists.program.as_slice(), &[1]);
        assert_eq!(lists.preview.as_slice(), &[1, 2]);
    }

    #[test]
    fn test_lists_display() {
        let mut packed = 0u64;
        set_channel_code(&mut packed, 2, TallyCode::Program);
        let lists = TallyLists::from_packed(packed, 4);

        let mut s: heapless::String<64> = heapless::String::new();
        core::fmt::write(&mut s, format_args!("{}", lists)).unwrap();
        assert_eq!(s.as_str(), "PGM[2] PVW[--]");
    }
}
