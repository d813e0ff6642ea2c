//! What the node did while connected, and the pass/fail summary.

use std::time::{Duration, Instant};

use colored::Colorize;

/// Traffic counters shared with the fake servers.
#[derive(Debug, Default)]
pub struct Stats {
    pub connections: u32,
    pub handshakes: u32,
    pub acks: u32,
    pub keepalives: u32,
    pub quits: u32,
    pub controls: Vec<String>,
    pub last_seen: Option<Instant>,
}

impl Stats {
    pub fn touch(&mut self) {
        self.last_seen = Some(Instant::now());
    }
}

/// Check result.
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: Option<String>,
}

impl CheckResult {
    fn check(name: &str, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed,
            message: (!passed).then(|| message.into()),
        }
    }
}

/// Which switcher was emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Atem,
    Vmix,
}

/// Judge the session against what a healthy TX node does.
pub fn evaluate(protocol: Protocol, stats: &Stats, elapsed: Duration) -> Vec<CheckResult> {
    let mut results = vec![
        CheckResult::check("Node connected", stats.connections > 0, "no connection seen"),
        CheckResult::check(
            match protocol {
                Protocol::Atem => "Handshake completed",
                Protocol::Vmix => "Subscribed to tally",
            },
            stats.handshakes > 0,
            "no hello / SUBSCRIBE TALLY received",
        ),
        CheckResult::check(
            "Node still talking",
            stats
                .last_seen
                .is_some_and(|seen| seen.elapsed() < Duration::from_secs(15)),
            "nothing received in the last 15 s",
        ),
    ];

    match protocol {
        Protocol::Atem => {
            results.push(CheckResult::check(
                "Reliable packets acknowledged",
                stats.acks > 0,
                "no ACK packet received",
            ));
            // Node keepalive runs every 500 ms
            if elapsed > Duration::from_secs(5) {
                results.push(CheckResult::check(
                    "Keepalives flowing",
                    stats.keepalives > 0,
                    format!("0 keepalives in {} s", elapsed.as_secs()),
                ));
            }
        }
        Protocol::Vmix => {
            // Node re-queries TALLY after 10 s of silence
            if elapsed > Duration::from_secs(15) {
                results.push(CheckResult::check(
                    "Tally keepalive queries",
                    stats.keepalives > 0,
                    format!("no TALLY query in {} s", elapsed.as_secs()),
                ));
            }
        }
    }
    results
}

/// Print check results summary.
pub fn print_results(results: &[CheckResult]) {
    println!("\n{}", "=".repeat(60));
    println!("{}", "Check Results".bold());
    println!("{}", "=".repeat(60));

    let mut passed = 0;
    let mut failed = 0;

    for result in results {
        if result.passed {
            println!("  {} {}", "[PASS]".green().bold(), result.name);
            passed += 1;
        } else {
            println!("  {} {}", "[FAIL]".red().bold(), result.name);
            if let Some(msg) = &result.message {
                println!("         {}", msg.red());
            }
            failed += 1;
        }
    }

    println!("{}", "-".repeat(60));
    println!(
        "  Total: {} passed, {} failed",
        passed.to_string().green(),
        if failed > 0 {
            failed.to_string().red()
        } else {
            failed.to_string().normal()
        }
    );
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_node_fails() {
        let results = evaluate(Protocol::Vmix, &Stats::default(), Duration::from_secs(1));
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.passed));
    }

    #[test]
    fn test_healthy_atem_session_passes() {
        let mut stats = Stats {
            connections: 1,
            handshakes: 1,
            acks: 12,
            keepalives: 20,
            ..Stats::default()
        };
        stats.touch();
        let results = evaluate(Protocol::Atem, &stats, Duration::from_secs(10));
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.passed && r.message.is_none()));
    }
}
