//! Bench switcher emulator for tally-link TX nodes.
//!
//! Point a flashed TX node's switcher address at this host, then flip
//! program/preview from a script or stdin and watch the camera LEDs.

mod atem;
mod board;
mod report;
mod vmix;

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use board::{Board, Step};
use report::{evaluate, print_results, Protocol, Stats};

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Atem,
    Vmix,
}

#[derive(Parser)]
#[command(name = "switcher-emulator")]
#[command(about = "Fake ATEM / vMix switcher for tally-link bench tests")]
struct Args {
    /// Switcher to emulate
    #[arg(value_enum)]
    kind: Kind,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0")]
    address: IpAddr,

    /// Port (default: 9910 for ATEM, 8099 for vMix)
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of inputs on the emulated switcher
    #[arg(short, long, default_value = "8")]
    inputs: u8,

    /// Operator script, e.g. "sleep 5; pgm 3; pvw 4; sleep 2; cut; report"
    #[arg(short, long)]
    script: Option<String>,
}

fn print_board(board: &Board) {
    println!(
        "  {} {}  {} {}  [{}]",
        "PGM".red().bold(),
        board.program,
        "PVW".green().bold(),
        board.preview,
        board.digits()
    );
}

/// Apply one step; returns false to stop.
async fn run_step(step: Step, board: &watch::Sender<Board>, stats: &Mutex<Stats>, protocol: Protocol, started: Instant) -> bool {
    let result = match step {
        Step::Program(n) => {
            let mut result = Ok(());
            board.send_modify(|b| result = b.set_program(n));
            result
        }
        Step::Preview(n) => {
            let mut result = Ok(());
            board.send_modify(|b| result = b.set_preview(n));
            result
        }
        Step::Cut => {
            board.send_modify(Board::cut);
            Ok(())
        }
        Step::Sleep(secs) => {
            tokio::time::sleep(Duration::from_secs_f32(secs.max(0.0))).await;
            return true;
        }
        Step::Show => Ok(()),
        Step::Report => {
            print_results(&evaluate(protocol, &stats.lock().unwrap(), started.elapsed()));
            return true;
        }
        Step::Quit => return false,
    };
    match result {
        Ok(()) => print_board(&board.borrow()),
        Err(e) => println!("  {}", e.to_string().red()),
    }
    true
}

async fn operate(script: Option<String>, board: watch::Sender<Board>, stats: Arc<Mutex<Stats>>, protocol: Protocol) -> Result<bool> {
    let started = Instant::now();

    if let Some(script) = script {
        for step in Step::parse_script(&script)? {
            if !run_step(step, &board, &stats, protocol, started).await {
                break;
            }
        }
    } else {
        println!("Commands: pgm N, pvw N, cut, sleep S, show, report, quit");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match Step::parse(&line) {
                Ok(step) => {
                    if !run_step(step, &board, &stats, protocol, started).await {
                        break;
                    }
                }
                Err(e) => println!("  {}", e.to_string().red()),
            }
        }
    }

    let results = evaluate(protocol, &stats.lock().unwrap(), started.elapsed());
    print_results(&results);
    Ok(results.iter().all(|r| r.passed))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    anyhow::ensure!((1..=20).contains(&args.inputs), "inputs must be 1..=20");

    let (protocol, default_port) = match args.kind {
        Kind::Atem => (Protocol::Atem, 9910),
        Kind::Vmix => (Protocol::Vmix, 8099),
    };
    let bind = SocketAddr::new(args.address, args.port.unwrap_or(default_port));

    println!("{}", "Tally-Link Switcher Emulator".bold());
    let (board, _watch) = watch::channel(Board::new(args.inputs));
    print_board(&board.borrow());
    let stats = Arc::new(Mutex::new(Stats::default()));

    let server = {
        let board = board.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            match protocol {
                Protocol::Atem => atem::serve(bind, board, stats).await,
                Protocol::Vmix => vmix::serve(bind, board, stats).await,
            }
        })
    };

    let passed = tokio::select! {
        outcome = operate(args.script, board, stats, protocol) => outcome?,
        finished = server => {
            finished??;
            false
        }
    };

    // Exit with error code if any check failed
    if !passed {
        std::process::exit(1);
    }
    Ok(())
}
