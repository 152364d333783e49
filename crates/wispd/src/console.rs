//! Line console
//!
//! `/connect host:port`, `/peers`, `/id`, `/help`, `/quit`; any other line
//! is broadcast to every established peer.

use std::io::BufRead;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::lookup_host;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wisp_net::{BroadcastReport, NodeHandle, TransportEvent};

const HELP: &str = "\
commands:
  /connect <host:port>  start a handshake with a peer
  /peers                list known peers and their state
  /id                   show this node's id and address
  /quit                 exit
anything else is sent to all established peers";

/// Console input errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("usage: /connect <host:port>")]
    MissingTarget,
    #[error("unknown command: {0} (try /help)")]
    Unknown(String),
}

/// A parsed console line
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Peers,
    Id,
    Help,
    Quit,
    Say(String),
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Empty);
        }
        if !line.starts_with('/') {
            return Ok(Self::Say(line.to_string()));
        }

        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        match verb {
            "/connect" => parts
                .next()
                .map(|target| Self::Connect(target.to_string()))
                .ok_or(CommandError::MissingTarget),
            "/peers" => Ok(Self::Peers),
            "/id" => Ok(Self::Id),
            "/help" => Ok(Self::Help),
            "/quit" | "/exit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Resolve `host:port`, preferring the address family we are bound to
async fn resolve(target: &str, local: SocketAddr) -> anyhow::Result<SocketAddr> {
    let candidates: Vec<SocketAddr> = lookup_host(target).await?.collect();
    candidates
        .iter()
        .find(|addr| addr.is_ipv4() == local.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| anyhow::anyhow!("{} did not resolve to any address", target))
}

/// Console note for a broadcast that did not reach everyone
fn broadcast_note(report: &BroadcastReport) -> Option<String> {
    if report.targets == 0 {
        return Some("no established peers".into());
    }
    match report.failed() {
        0 => None,
        failed if report.sent == 0 => Some(format!("send failed to all {} peers", failed)),
        failed => Some(format!("send failed to {} of {} peers", failed, report.targets)),
    }
}

fn print_event(event: TransportEvent) {
    match event {
        TransportEvent::PeerEstablished { addr, node_id } => {
            println!("* session established with {} ({})", addr, node_id);
        }
        TransportEvent::MessageReceived { from, payload } => {
            println!("<{}> {}", from, String::from_utf8_lossy(&payload));
        }
    }
}

/// Read stdin on a detached thread so a pending read never holds up shutdown
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Run the console until `/quit` or end of input
pub async fn run(
    handle: NodeHandle,
    mut events: mpsc::Receiver<TransportEvent>,
) -> anyhow::Result<()> {
    let mut lines = spawn_stdin_reader();
    println!("node {} on {} (/help for commands)", handle.node_id(), handle.local_addr());

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    debug!("stdin closed");
                    return Ok(());
                };
                match Command::parse(&line) {
                    Ok(Command::Quit) => return Ok(()),
                    Ok(command) => execute(&handle, command).await,
                    Err(e) => println!("{}", e),
                }
            }
            Some(event) = events.recv() => print_event(event),
        }
    }
}

async fn execute(handle: &NodeHandle, command: Command) {
    match command {
        Command::Connect(target) => match resolve(&target, handle.local_addr()).await {
            Ok(addr) => match handle.connect(addr).await {
                Ok(()) => println!("handshake sent to {}", addr),
                Err(e) => println!("connect to {} failed: {}", addr, e),
            },
            Err(e) => {
                warn!(%target, error = %e, "resolve failed");
                println!("cannot resolve {}: {}", target, e);
            }
        },
        Command::Peers => {
            let peers = handle.peers();
            if peers.is_empty() {
                println!("no peers");
            }
            for peer in peers {
                let id = peer
                    .node_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:<22} {:<13} {} (idle {}s)",
                    peer.address,
                    peer.status,
                    id,
                    peer.idle.as_secs()
                );
            }
        }
        Command::Id => println!("{} on {}", handle.node_id(), handle.local_addr()),
        Command::Help => println!("{}", HELP),
        Command::Say(text) => {
            let report = handle.broadcast(text.as_bytes()).await;
            if let Some(note) = broadcast_note(&report) {
                println!("{}", note);
            }
        }
        Command::Quit | Command::Empty => {}
    }
}
