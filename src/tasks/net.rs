//! IP networking for the switcher links
//!
//! embassy-net sockets behind the switcher socket traits, the stack runner
//! and the Wi-Fi station keeper.

use crate::config::timing::RECONNECT_INTERVAL_MS;
use crate::dispatcher::NETWORK_RESTART;
use crate::store::settings::{EthernetSettings, WifiSettings};
use crate::switcher::net::{DatagramSocket, NetError, StreamSocket};
use core::net::{Ipv4Addr, SocketAddrV4};
use embassy_futures::select::{select, Either};
use embassy_net::tcp::{State, TcpSocket};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Ipv4Cidr, Runner, Stack, StaticConfigV4};
use embassy_time::{with_timeout, Duration, Timer};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState};

const UDP_RX_BUFFER: usize = 2048;
const UDP_TX_BUFFER: usize = 512;
const UDP_METADATA: usize = 8;
const TCP_BUFFER: usize = 2048;

fn endpoint(peer: SocketAddrV4) -> IpEndpoint {
    IpEndpoint::new(IpAddress::Ipv4(*peer.ip()), peer.port())
}

/// Static storage for one UDP socket
pub struct UdpBuffers {
    rx_meta: [PacketMetadata; UDP_METADATA],
    rx: [u8; UDP_RX_BUFFER],
    tx_meta: [PacketMetadata; UDP_METADATA],
    tx: [u8; UDP_TX_BUFFER],
}

impl UdpBuffers {
    pub const fn new() -> Self {
        Self {
            rx_meta: [PacketMetadata::EMPTY; UDP_METADATA],
            rx: [0; UDP_RX_BUFFER],
            tx_meta: [PacketMetadata::EMPTY; UDP_METADATA],
            tx: [0; UDP_TX_BUFFER],
        }
    }
}

/// Static storage for one TCP socket
pub struct TcpBuffers {
    rx: [u8; TCP_BUFFER],
    tx: [u8; TCP_BUFFER],
}

impl TcpBuffers {
    pub const fn new() -> Self {
        Self {
            rx: [0; TCP_BUFFER],
            tx: [0; TCP_BUFFER],
        }
    }
}

pub struct NetDatagram {
    stack: Stack<'static>,
    socket: UdpSocket<'static>,
}

impl NetDatagram {
    pub fn new(stack: Stack<'static>, buffers: &'static mut UdpBuffers) -> Self {
        let UdpBuffers {
            rx_meta,
            rx,
            tx_meta,
            tx,
        } = buffers;
        Self {
            stack,
            socket: UdpSocket::new(stack, rx_meta, rx, tx_meta, tx),
        }
    }
}

impl DatagramSocket for NetDatagram {
    async fn open(&mut self) -> Result<(), NetError> {
        if !self.stack.is_config_up() {
            return Err(NetError::ConnectFailed);
        }
        if !self.socket.is_open() {
            self.socket.bind(0).map_err(|_| NetError::Io)?;
        }
        Ok(())
    }

    async fn send_to(&mut self, data: &[u8], peer: SocketAddrV4) -> Result<(), NetError> {
        self.socket
            .send_to(data, endpoint(peer))
            .await
            .map_err(|_| NetError::Io)
    }

    async fn recv(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<Option<usize>, NetError> {
        match with_timeout(Duration::from_millis(timeout_ms as u64), self.socket.recv_from(buf)).await {
            Ok(Ok((len, _meta))) => Ok(Some(len)),
            Ok(Err(_)) => Err(NetError::Io),
            Err(_) => Ok(None),
        }
    }

    fn close(&mut self) {
        self.socket.close();
    }
}

pub struct NetStream {
    stack: Stack<'static>,
    socket: TcpSocket<'static>,
}

impl NetStream {
    pub fn new(stack: Stack<'static>, buffers: &'static mut TcpBuffers) -> Self {
        let TcpBuffers { rx, tx } = buffers;
        Self {
            stack,
            socket: TcpSocket::new(stack, rx, tx),
        }
    }
}

impl StreamSocket for NetStream {
    async fn connect(&mut self, peer: SocketAddrV4, timeout_ms: u32) -> Result<(), NetError> {
        if !self.stack.is_config_up() {
            return Err(NetError::ConnectFailed);
        }
        if self.socket.state() != State::Closed {
            self.socket.abort();
            let _ = self.socket.flush().await;
        }
        match with_timeout(Duration::from_millis(timeout_ms as u64), self.socket.connect(endpoint(peer))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(NetError::ConnectFailed),
            Err(_) => {
                self.socket.abort();
                Err(NetError::Timeout)
            }
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), NetError> {
        embedded_io_async::Write::write_all(&mut self.socket, data)
            .await
            .map_err(|_| NetError::Closed)
    }

    async fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<Option<usize>, NetError> {
        match with_timeout(Duration::from_millis(timeout_ms as u64), self.socket.read(buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => Err(NetError::Closed),
            Ok(Ok(len)) => Ok(Some(len)),
            Err(_) => Ok(None),
        }
    }

    fn close(&mut self) {
        self.socket.abort();
    }
}

fn parse_ip(text: &str) -> Option<Ipv4Addr> {
    text.parse().ok()
}

/// Stack configuration: DHCP, or the stored static address
pub fn stack_config(eth: &EthernetSettings) -> embassy_net::Config {
    if eth.dhcp_enabled {
        return embassy_net::Config::dhcpv4(Default::default());
    }
    let (Some(ip), Some(mask), gateway) = (
        parse_ip(&eth.static_ip),
        parse_ip(&eth.static_netmask),
        parse_ip(&eth.static_gateway),
    ) else {
        log::warn!(target: "supervisor", "invalid static address, falling back to DHCP");
        return embassy_net::Config::dhcpv4(Default::default());
    };
    let prefix = u32::from(mask).leading_ones() as u8;
    embassy_net::Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(ip, prefix),
        gateway,
        dns_servers: Default::default(),
    })
}

pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

/// Keep the station associated; drop and rejoin on a network restart request
pub async fn wifi_task(mut controller: WifiController<'static>, wifi: WifiSettings) -> ! {
    let config = ModeConfig::Client(
        ClientConfig::default()
            .with_ssid(alloc::string::String::from(wifi.sta_ssid.as_str()))
            .with_password(alloc::string::String::from(wifi.sta_password.as_str())),
    );

    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            match select(controller.wait_for_event(WifiEvent::StaDisconnected), NETWORK_RESTART.wait()).await {
                Either::First(()) => log::warn!(target: "supervisor", "wifi disconnected"),
                Either::Second(()) => {
                    log::warn!(target: "supervisor", "restarting wifi link");
                    let _ = controller.disconnect_async().await;
                }
            }
            Timer::after_millis(RECONNECT_INTERVAL_MS).await;
        }

        if !matches!(controller.is_started(), Ok(true)) {
            if let Err(e) = controller.set_config(&config) {
                log::error!(target: "supervisor", "wifi config rejected: {:?}", e);
                Timer::after_millis(RECONNECT_INTERVAL_MS).await;
                continue;
            }
            log::info!(target: "supervisor", "starting wifi");
            if let Err(e) = controller.start_async().await {
                log::error!(target: "supervisor", "wifi start failed: {:?}", e);
                Timer::after_millis(RECONNECT_INTERVAL_MS).await;
                continue;
            }
        }

        log::info!(target: "supervisor", "joining '{}'", wifi.sta_ssid);
        match controller.connect_async().await {
            Ok(()) => log::info!(target: "supervisor", "wifi connected"),
            Err(e) => {
                log::warn!(target: "supervisor", "wifi join failed: {:?}", e);
                Timer::after_millis(RECONNECT_INTERVAL_MS).await;
            }
        }
    }
}
