//! Error kinds surfaced by the tally core

use core::fmt;

/// Errors returned by the core components
///
/// Every error is returned by value. Only `DeviceAbsent` during the very
/// first radio init is treated as fatal, and even then only for the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyError {
    /// Out-of-range argument or undecodable input; nothing was mutated
    InvalidArgument,
    /// Flash write failed; the cached value was rolled back
    Persistence,
    /// Peer went silent or a connect deadline passed
    LinkTimeout,
    /// Malformed switcher traffic
    ProtocolError,
    /// No LoRa chip answered during detection
    DeviceAbsent,
    /// A bounded queue was full
    ResourceExhausted,
}

impl fmt::Display for TallyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TallyError::InvalidArgument => "invalid argument",
            TallyError::Persistence => "persistence failure",
            TallyError::LinkTimeout => "link timeout",
            TallyError::ProtocolError => "protocol error",
            TallyError::DeviceAbsent => "device absent",
            TallyError::ResourceExhausted => "resource exhausted",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        let mut s: heapless::String<32> = heapless::String::new();
        core::fmt::write(&mut s, format_args!("{}", TallyError::LinkTimeout)).unwrap();
        assert_eq!(s.as_str(), "link timeout");
    }
}
