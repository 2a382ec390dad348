//! RCPC client entry point.
//!
//! Connects to one host, logs every lifecycle event, and turns line commands
//! read from stdin into remote-control envelopes.
//!
//! # Usage
//!
//! ```text
//! rcpc-client <HOST[:PORT]> [--config <PATH>]
//!
//! Commands (one per line):
//!   move <dx> <dy>     scroll <dx> <dy>
//!   click | right | middle
//!   play | stop | next | prev
//!   vol <0-100> | getvol
//!   quit
//! ```
//!
//! Logging honours `RUST_LOG`; without it the `[client] log_level` from the
//! config file applies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rcpc_client::application::remote_control::{PadButton, RemoteControlUseCase};
use rcpc_client::application::volume::VolumeTracker;
use rcpc_client::infrastructure::network::{
    ConnectionConfig, Connector, Endpoint, EventKind, NetworkEvent,
};
use rcpc_client::infrastructure::notifier::EventNotifier;
use rcpc_client::infrastructure::storage::{config, FileDeviceIdentity};
use rcpc_client::infrastructure::tls::SecureSessionFactory;

/// Remote-input client for an RCPC host.
#[derive(Debug, Parser)]
#[command(name = "rcpc-client", version, about)]
struct Cli {
    /// Host to control, as `host` or `host:port`.
    endpoint: String,

    /// Config file to use instead of the platform default.
    #[arg(long, env = "RCPC_CONFIG")]
    config: Option<PathBuf>,
}

/// One parsed stdin command.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Move(f32, f32),
    Scroll(f32, f32),
    Press(PadButton),
    PlayPause,
    Stop,
    Next,
    Previous,
    SetVolume(f32),
    GetVolume,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let name = words.next().ok_or_else(|| "empty command".to_string())?;
    let mut number = |what: &str| -> Result<f32, String> {
        words
            .next()
            .ok_or_else(|| format!("{name}: missing {what}"))?
            .parse::<f32>()
            .map_err(|e| format!("{name}: bad {what}: {e}"))
    };

    let command = match name {
        "move" => Command::Move(number("dx")?, number("dy")?),
        "scroll" => Command::Scroll(number("dx")?, number("dy")?),
        "click" => Command::Press(PadButton::Left),
        "right" => Command::Press(PadButton::Right),
        "middle" => Command::Press(PadButton::Middle),
        "play" => Command::PlayPause,
        "stop" => Command::Stop,
        "next" => Command::Next,
        "prev" => Command::Previous,
        "vol" => Command::SetVolume(number("level")?),
        "getvol" => Command::GetVolume,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command {other:?}")),
    };
    Ok(command)
}

fn execute(control: &RemoteControlUseCase, command: &Command) {
    match *command {
        Command::Move(dx, dy) => control.pointer_move(dx, dy),
        Command::Scroll(dx, dy) => control.scroll(dx, dy),
        Command::Press(button) => control.press(button),
        Command::PlayPause => control.play_pause(),
        Command::Stop => control.stop(),
        Command::Next => control.next_track(),
        Command::Previous => control.previous_track(),
        Command::SetVolume(level) => control.set_volume(level),
        Command::GetVolume => control.request_volume(),
        Command::Quit => {}
    }
}

fn log_event(event: &NetworkEvent) {
    let attempt = event.attempt;
    match &event.kind {
        EventKind::Accepted => info!(%attempt, "connected; host accepted"),
        EventKind::Refused => warn!(%attempt, "host refused the connection"),
        EventKind::TimedOut => warn!(%attempt, "connection timed out"),
        EventKind::Error(err) => error!(%attempt, "connection error: {err}"),
        EventKind::Disconnected => info!(%attempt, "disconnected"),
        EventKind::MessageReceived(envelope) => info!(%attempt, "host: {envelope:?}"),
        EventKind::MessageSent(_) => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Configuration ─────────────────────────────────────────────────────────
    let mut cfg = match &cli.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => config::load_config().context("loading client config")?,
    };
    cfg.tls.apply_env_overrides();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.client.log_level)),
        )
        .init();

    info!("RCPC client starting");

    let endpoint = Endpoint::parse_with_default(&cli.endpoint, cfg.network.port)
        .with_context(|| format!("invalid endpoint {:?}", cli.endpoint))?;

    // ── Wiring ────────────────────────────────────────────────────────────────
    let factory = SecureSessionFactory::load(&cfg.tls).context("building TLS context")?;
    let identity = Arc::new(FileDeviceIdentity::new(
        cfg.device_id_path().context("locating device identifier")?,
    ));

    let notifier = Arc::new(EventNotifier::new());
    notifier.subscribe_fn(log_event);
    let volume = Arc::new(VolumeTracker::new());
    notifier.subscribe(volume.clone());

    let connector = Arc::new(Connector::new(
        ConnectionConfig::from(&cfg),
        factory,
        notifier,
        identity,
    ));
    let control = RemoteControlUseCase::new(connector.clone(), cfg.client.invert_touchpad_buttons);

    let session = connector.connect(endpoint);

    // ── Command loop ──────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            state = session.closed() => {
                info!("session ended ({state:?})");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let line = match line.context("reading stdin")? {
                    Some(line) => line,
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(Command::GetVolume) => {
                        if let Some(level) = volume.latest() {
                            info!("last reported volume: {level:.0}%");
                        }
                        execute(&control, &Command::GetVolume);
                    }
                    Ok(command) => execute(&control, &command),
                    Err(e) => warn!("{e}"),
                }
            }
        }
    }

    connector.disconnect();
    if tokio::time::timeout(Duration::from_secs(2), session.closed())
        .await
        .is_err()
    {
        warn!("session did not close within 2 s");
    }

    info!("RCPC client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
