//! Fake vMix: line-based TCP API with `SUBSCRIBE TALLY`, `TALLY` and the
//! `FUNCTION` calls the node can make.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::board::Board;
use crate::report::Stats;

/// Reply to one request line; `None` closes the connection.
fn respond(line: &str, board: &watch::Sender<Board>, subscribed: &mut bool, stats: &Mutex<Stats>) -> Option<String> {
    let line = line.trim_end();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    match verb {
        "SUBSCRIBE" if rest == "TALLY" => {
            *subscribed = true;
            stats.lock().unwrap().handshakes += 1;
            Some(format!("SUBSCRIBE OK TALLY\r\nTALLY OK {}\r\n", board.borrow().digits()))
        }
        "TALLY" => {
            stats.lock().unwrap().keepalives += 1;
            Some(format!("TALLY OK {}\r\n", board.borrow().digits()))
        }
        "FUNCTION" => {
            stats.lock().unwrap().controls.push(rest.to_string());
            Some(match function(rest, board) {
                Ok(()) => "FUNCTION OK Completed\r\n".to_string(),
                Err(e) => format!("FUNCTION ER {}\r\n", e),
            })
        }
        "QUIT" => {
            stats.lock().unwrap().quits += 1;
            None
        }
        _ => Some(format!("{} ER Unknown command\r\n", verb)),
    }
}

fn function(args: &str, board: &watch::Sender<Board>) -> Result<(), String> {
    let mut words = args.split_whitespace();
    let name = words.next().unwrap_or("");
    let input = words
        .next()
        .and_then(|arg| arg.strip_prefix("Input="))
        .map(|n| n.parse::<u8>().map_err(|e| e.to_string()));

    let mut result = Ok(());
    match (name, input) {
        ("Cut" | "Fade", None) => board.send_modify(Board::cut),
        ("ActiveInput", Some(n)) => {
            let n = n?;
            board.send_modify(|b| result = b.set_program(n).map_err(|e| e.to_string()));
        }
        ("PreviewInput", Some(n)) => {
            let n = n?;
            board.send_modify(|b| result = b.set_preview(n).map_err(|e| e.to_string()));
        }
        _ => return Err(format!("Unknown function {}", name)),
    }
    result
}

async fn handle(stream: TcpStream, peer: SocketAddr, board: watch::Sender<Board>, stats: Arc<Mutex<Stats>>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut changes = board.subscribe();
    let mut subscribed = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    println!("  {} closed the connection", peer);
                    return Ok(());
                };
                stats.lock().unwrap().touch();
                println!("  {} {}", "<".dimmed(), line.cyan());
                match respond(&line, &board, &mut subscribed, &stats) {
                    Some(reply) => writer.write_all(reply.as_bytes()).await?,
                    None => {
                        println!("  {} said goodbye", peer);
                        return Ok(());
                    }
                }
            }
            changed = changes.changed() => {
                changed?;
                let digits = changes.borrow_and_update().digits();
                if subscribed {
                    writer.write_all(format!("TALLY OK {}\r\n", digits).as_bytes()).await?;
                }
            }
        }
    }
}

pub async fn serve(bind: SocketAddr, board: watch::Sender<Board>, stats: Arc<Mutex<Stats>>) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    println!("{} listening on tcp {}", "vMix".bold(), listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        println!("  connection from {}", peer);
        stats.lock().unwrap().connections += 1;
        let board = board.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            if let Err(e) = handle(stream, peer, board, stats).await {
                println!("  {} {}: {}", "error".red(), peer, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (watch::Sender<Board>, Mutex<Stats>) {
        let (board, _rx) = watch::channel(Board::new(4));
        (board, Mutex::new(Stats::default()))
    }

    #[test]
    fn test_subscribe_sends_current_tally() {
        let (board, stats) = setup();
        let mut subscribed = false;
        let reply = respond("SUBSCRIBE TALLY\r\n", &board, &mut subscribed, &stats).unwrap();
        assert_eq!(reply, "SUBSCRIBE OK TALLY\r\nTALLY OK 1200\r\n");
        assert!(subscribed);
        assert_eq!(stats.lock().unwrap().handshakes, 1);
    }

    #[test]
    fn test_functions_move_board() {
        let (board, stats) = setup();
        let mut subscribed = false;
        assert_eq!(
            respond("FUNCTION ActiveInput Input=3", &board, &mut subscribed, &stats).unwrap(),
            "FUNCTION OK Completed\r\n"
        );
        respond("FUNCTION Cut", &board, &mut subscribed, &stats);
        assert_eq!(board.borrow().digits(), "0120");
        assert!(respond("FUNCTION PreviewInput Input=9", &board, &mut subscribed, &stats)
            .unwrap()
            .starts_with("FUNCTION ER"));
        assert_eq!(stats.lock().unwrap().controls.len(), 3);
    }

    #[test]
    fn test_quit_closes() {
        let (board, stats) = setup();
        let mut subscribed = true;
        assert!(respond("QUIT", &board, &mut subscribed, &stats).is_none());
        assert_eq!(stats.lock().unwrap().quits, 1);
    }
}
