//! Fake ATEM: answers the UDP handshake, sends the initial state dump and
//! pushes `_TlI` on every board change.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::board::Board;
use crate::report::Stats;

const HELLO: u8 = 0x02;
const ACK_REQUEST: u8 = 0x01;
const ACK: u8 = 0x10;
const HEADER_LEN: usize = 12;
const PRODUCT: &str = "ATEM Television Studio Emulator";

/// Keepalive period towards the node
const KEEPALIVE: Duration = Duration::from_millis(500);

struct Header {
    flags: u8,
    length: usize,
    session: u16,
    remote_id: u16,
}

fn parse_header(data: &[u8]) -> Option<Header> {
    if data.len() < HEADER_LEN {
        return None;
    }
    let word = u16::from_be_bytes([data[0], data[1]]);
    let length = (word & 0x07FF) as usize;
    if length < HEADER_LEN || length > data.len() {
        return None;
    }
    Some(Header {
        flags: (word >> 11) as u8,
        length,
        session: u16::from_be_bytes([data[2], data[3]]),
        remote_id: u16::from_be_bytes([data[10], data[11]]),
    })
}

fn packet(flags: u8, session: u16, ack_id: u16, packet_id: u16, body: &[u8]) -> Vec<u8> {
    let total = HEADER_LEN + body.len();
    let mut out = vec![0u8; HEADER_LEN];
    out[0..2].copy_from_slice(&(((flags as u16) << 11) | total as u16).to_be_bytes());
    out[2..4].copy_from_slice(&session.to_be_bytes());
    out[4..6].copy_from_slice(&ack_id.to_be_bytes());
    out[10..12].copy_from_slice(&packet_id.to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn command(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((8 + payload.len()) as u16).to_be_bytes().to_vec();
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(name);
    out.extend_from_slice(payload);
    out
}

fn tally_command(board: &Board) -> Vec<u8> {
    let flags = board.flags();
    let mut payload = (flags.len() as u16).to_be_bytes().to_vec();
    payload.extend_from_slice(&flags);
    command(b"_TlI", &payload)
}

fn bus_commands(board: &Board) -> Vec<u8> {
    let mut body = command(b"PrgI", &[0, 0, 0, board.program]);
    body.extend(command(b"PrvI", &[0, 0, 0, board.preview]));
    body.extend(tally_command(board));
    body
}

fn initial_dump(board: &Board) -> Vec<u8> {
    let mut name = PRODUCT.as_bytes().to_vec();
    name.resize(44, 0);
    let mut body = command(b"_ver", &[0, 2, 0, 30]);
    body.extend(command(b"_pin", &name));
    body.extend(command(b"_top", &[1, board.inputs, 0, 0, 0, 1, 0, 0, 0, 0]));
    body.extend(command(b"_MeC", &[0, 1, 0, 0]));
    body.extend(command(b"_TlC", &[0, 0, 0, 0, board.inputs]));
    body.extend(bus_commands(board));
    body.extend(command(b"InCm", &[1, 0, 0, 0]));
    body
}

struct Session {
    peer: SocketAddr,
    id: u16,
    next_packet_id: u16,
}

impl Session {
    fn next(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1) & 0x7FFF;
        self.next_packet_id
    }
}

/// Apply a control command sent by the node; returns its name.
fn apply_control(name: &[u8], data: &[u8], board: &watch::Sender<Board>) -> Option<String> {
    let input = data.get(3).copied().unwrap_or(0);
    let text = String::from_utf8_lossy(name).to_string();
    let result = match name {
        b"DCut" | b"DAut" => {
            board.send_modify(Board::cut);
            Ok(())
        }
        b"CPgI" => {
            let mut result = Ok(());
            board.send_modify(|b| result = b.set_program(input));
            result
        }
        b"CPvI" => {
            let mut result = Ok(());
            board.send_modify(|b| result = b.set_preview(input));
            result
        }
        _ => return None,
    };
    if let Err(e) = result {
        println!("  {} {}: {}", "rejected".red(), text, e);
    }
    Some(text)
}

fn commands_in(data: &[u8]) -> Vec<(&[u8], &[u8])> {
    let mut found = Vec::new();
    let mut offset = HEADER_LEN;
    while offset + 8 <= data.len() {
        let len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
        if len < 8 || offset + len > data.len() {
            break;
        }
        found.push((&data[offset + 4..offset + 8], &data[offset + 8..offset + len]));
        offset += len;
    }
    found
}

pub async fn serve(bind: SocketAddr, board: watch::Sender<Board>, stats: Arc<Mutex<Stats>>) -> Result<()> {
    let socket = UdpSocket::bind(bind).await?;
    println!("{} listening on udp {}", "ATEM".bold(), socket.local_addr()?);

    let mut changes = board.subscribe();
    let mut session: Option<Session> = None;
    let mut keepalive = tokio::time::interval(KEEPALIVE);
    let mut buf = [0u8; 1500];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = received?;
                let Some(header) = parse_header(&buf[..len]) else {
                    println!("  {} {} bytes from {}", "malformed".red(), len, peer);
                    continue;
                };
                let data = &buf[..header.length];
                stats.lock().unwrap().touch();

                if header.flags & HELLO != 0 {
                    let id = 0x8000 | (rand_session() & 0x7FFF);
                    println!("  hello from {}, session 0x{:04X}", peer, id);
                    let reply = packet(HELLO, 0x1000, 0, 0, &[0x02, 0, 0, 0, 0, 0, 0, 0]);
                    socket.send_to(&reply, peer).await?;

                    let mut new = Session { peer, id, next_packet_id: 0 };
                    let packet_id = new.next();
                    let snapshot = board.borrow().clone();
                    socket
                        .send_to(&packet(ACK_REQUEST, id, 0, packet_id, &initial_dump(&snapshot)), peer)
                        .await?;
                    session = Some(new);
                    {
                        let mut stats = stats.lock().unwrap();
                        stats.connections += 1;
                        stats.handshakes += 1;
                    }
                    continue;
                }

                let Some(current) = session.as_mut().filter(|s| s.peer == peer && s.id == header.session) else {
                    continue;
                };
                if header.flags & ACK != 0 {
                    stats.lock().unwrap().acks += 1;
                }
                if header.flags & ACK_REQUEST != 0 {
                    let controls: Vec<String> = commands_in(data)
                        .into_iter()
                        .filter_map(|(name, payload)| apply_control(name, payload, &board))
                        .collect();
                    if controls.is_empty() {
                        stats.lock().unwrap().keepalives += 1;
                    }
                    for control in controls {
                        println!("  node sent {}", control.cyan());
                        stats.lock().unwrap().controls.push(control);
                    }
                    socket
                        .send_to(&packet(ACK, current.id, header.remote_id, 0, &[]), peer)
                        .await?;
                }
            }
            changed = changes.changed() => {
                changed?;
                let snapshot = changes.borrow_and_update().clone();
                if let Some(current) = session.as_mut() {
                    let packet_id = current.next();
                    socket
                        .send_to(&packet(ACK_REQUEST, current.id, 0, packet_id, &bus_commands(&snapshot)), current.peer)
                        .await?;
                }
            }
            _ = keepalive.tick() => {
                if let Some(current) = session.as_mut() {
                    let packet_id = current.next();
                    socket
                        .send_to(&packet(ACK_REQUEST, current.id, 0, packet_id, &[]), current.peer)
                        .await?;
                }
            }
        }
    }
}

fn rand_session() -> u16 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos >> 8) as u16
}
