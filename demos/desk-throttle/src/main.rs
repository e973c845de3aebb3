//! # `desk-throttle`: keyboard throttle for a Rocrail server
//!
//! Reads one command per line from stdin and feeds it to the throttle
//! engine as if it came from the handheld's buttons and dial.
//!
//! ```text
//! 0..100   set the dial to that percentage
//! n / p    next / previous locomotive
//! d        reverse direction
//! s        emergency stop
//! l        toggle light
//! h        toggle sound
//! q        quit
//! ```
//!
//! Log verbosity follows `RUST_LOG`, e.g. `RUST_LOG=rcp_throttle=debug`.

#![forbid(unsafe_code)]

use std::io::BufRead;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rcp_throttle::control::Calibration;
use rcp_throttle::core::{Button, InputProvider, InputSample};
use rcp_throttle::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "desk-throttle", about = "Keyboard throttle for a Rocrail server")]
struct Args {
    /// Rocrail server host.
    #[arg(long, env = "ROCRAIL_HOST", default_value = "localhost")]
    host: String,

    /// Rocrail server port.
    #[arg(long, env = "ROCRAIL_PORT", default_value_t = 8051)]
    port: u16,

    /// Connect timeout in seconds.
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Maximum number of locomotives kept in the roster.
    #[arg(long, default_value_t = 5)]
    roster_limit: usize,

    /// Locomotive to control before the roster arrives.
    #[arg(long)]
    loco: Option<String>,

    /// Default log filter when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

enum Line {
    Dial(u8),
    Press(Button),
    Quit,
}

fn parse_line(line: &str) -> Option<Line> {
    let line = line.trim();
    let parsed = match line {
        "n" => Line::Press(Button::NextLoco),
        "p" => Line::Press(Button::PreviousLoco),
        "d" => Line::Press(Button::Direction),
        "s" => Line::Press(Button::EmergencyStop),
        "l" => Line::Press(Button::Light),
        "h" => Line::Press(Button::Sound),
        "q" => Line::Quit,
        other => Line::Dial(other.parse::<u8>().ok()?.min(100)),
    };
    Some(parsed)
}

/// Turns stdin lines into input samples.
struct KeyboardInput {
    lines: mpsc::Receiver<Line>,
    calibration: Calibration,
    raw: u16,
    quit: CancellationToken,
}

impl KeyboardInput {
    fn raw_for(&self, percent: u8) -> u16 {
        let span = u32::from(self.calibration.max() - self.calibration.min());
        let offset = span * u32::from(percent) / 100;
        self.calibration.min() + u16::try_from(offset).unwrap_or(u16::MAX)
    }
}

impl InputProvider for KeyboardInput {
    fn sample(&mut self) -> InputSample {
        let mut pressed = Vec::new();
        while let Ok(line) = self.lines.try_recv() {
            match line {
                Line::Dial(percent) => self.raw = self.raw_for(percent),
                Line::Press(button) => pressed.push(button),
                Line::Quit => self.quit.cancel(),
            }
        }
        InputSample {
            pressed,
            raw_speed: self.raw,
        }
    }
}

fn spawn_stdin_reader() -> mpsc::Receiver<Line> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_line(&line) {
                Some(parsed) => {
                    if tx.send(parsed).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => eprintln!("unknown command: {line}"),
            }
        }
    });
    rx
}

fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let mut builder = ThrottleConfig::builder()
        .host(args.host)
        .port(args.port)
        .connect_timeout(Duration::from_secs(args.connect_timeout))
        .roster_limit(args.roster_limit);
    if let Some(loco) = args.loco {
        builder = builder.default_loco_id(Some(loco));
    }
    let config = builder.build().context("invalid configuration")?;

    let client = ThrottleClient::tcp(config);
    let input = KeyboardInput {
        lines: spawn_stdin_reader(),
        calibration: client.config().calibration,
        raw: client.config().calibration.min(),
        quit: client.shutdown_token(),
    };
    let sink = |status: &StatusSnapshot| {
        tracing::info!(
            link = %status.link,
            loco = status.selected_id.as_deref().unwrap_or("-"),
            index = ?status.selected_index,
            roster = status.roster_size,
            forward = status.forward,
            zero_required = status.zero_required,
            "status"
        );
    };

    let token = client.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    client.run(input, sink).await;
    Ok(())
}
