//! Outgoing packet queue shared by the protocol clients
//!
//! Clients never touch a socket. They push what they want sent here and the
//! supervisor flushes it after every call.

use crate::config::limits::VMIX_MAX_OUT_LINE;
use crate::error::TallyError;
use heapless::{Deque, Vec};

/// One outgoing datagram or text line
pub type OutPacket = Vec<u8, VMIX_MAX_OUT_LINE>;

const OUTBOX_DEPTH: usize = 8;

#[derive(Debug, Default)]
pub struct Outbox {
    queue: Deque<OutPacket, OUTBOX_DEPTH>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) -> Result<(), TallyError> {
        let packet = OutPacket::from_slice(data).map_err(|_| TallyError::InvalidArgument)?;
        self.queue
            .push_back(packet)
            .map_err(|_| TallyError::ResourceExhausted)
    }

    pub fn pop(&mut self) -> Option<OutPacket> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
