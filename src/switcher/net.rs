//! Socket traits for the switcher links
//!
//! The supervisor talks to the IP stack only through these traits so the
//! protocol logic runs unchanged against embassy-net sockets on the device
//! and against scripted mocks in unit tests.

use crate::error::TallyError;
use core::future::Future;
use core::net::SocketAddrV4;

/// Errors surfaced by the socket layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// TCP connect refused or socket could not be opened
    ConnectFailed,
    /// Deadline passed
    Timeout,
    /// Peer closed the connection
    Closed,
    /// Any other stack error
    Io,
}

impl From<NetError> for TallyError {
    /// Every socket failure ends in the reconnect loop
    fn from(_: NetError) -> Self {
        TallyError::LinkTimeout
    }
}

/// UDP socket used by the ATEM link
pub trait DatagramSocket {
    /// Bind to an ephemeral local port
    fn open(&mut self) -> impl Future<Output = Result<(), NetError>>;

    fn send_to(&mut self, data: &[u8], peer: SocketAddrV4) -> impl Future<Output = Result<(), NetError>>;

    /// Receive one datagram, waiting at most `timeout_ms`
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A zero timeout is a
    /// pure readiness check.
    fn recv(&mut self, buf: &mut [u8], timeout_ms: u32) -> impl Future<Output = Result<Option<usize>, NetError>>;

    fn close(&mut self);
}

/// TCP socket used by the vMix link
pub trait StreamSocket {
    fn connect(&mut self, peer: SocketAddrV4, timeout_ms: u32) -> impl Future<Output = Result<(), NetError>>;

    fn write_all(&mut self, data: &[u8]) -> impl Future<Output = Result<(), NetError>>;

    /// Read available bytes, waiting at most `timeout_ms`
    ///
    /// `Ok(None)` means no data yet; a closed peer is `Err(NetError::Closed)`.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> impl Future<Output = Result<Option<usize>, NetError>>;

    fn close(&mut self);
}
