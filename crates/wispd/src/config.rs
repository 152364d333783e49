//! wispd configuration

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use wisp_net::{ExpiryPolicy, KeyPinning, NodeConfig};

/// Default rendezvous address
pub const DEFAULT_BOOTSTRAP: &str = "127.0.0.1:7946";

/// Key substitution policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PinningArg {
    /// Reject handshakes whose key differs from the first one seen
    Strict,
    /// Accept the new key and restart the session
    Replace,
}

impl From<PinningArg> for KeyPinning {
    fn from(arg: PinningArg) -> Self {
        match arg {
            PinningArg::Strict => KeyPinning::Strict,
            PinningArg::Replace => KeyPinning::Replace,
        }
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// wispd - Wisp encrypted peer node
#[derive(Parser, Debug, Clone)]
#[command(name = "wispd")]
#[command(author, version, about = "Encrypted peer-to-peer messaging over UDP", long_about = None)]
pub struct Config {
    /// Local UDP address to bind (port 0 picks an ephemeral port)
    #[arg(short, long, env = "WISP_BIND", default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,

    /// Rendezvous address contacted once at startup
    #[arg(long, env = "WISP_BOOTSTRAP", default_value = DEFAULT_BOOTSTRAP)]
    pub bootstrap: SocketAddr,

    /// Do not contact the bootstrap address
    #[arg(long)]
    pub no_bootstrap: bool,

    /// Delay before contacting the bootstrap address (milliseconds)
    #[arg(long, default_value = "500")]
    pub bootstrap_delay_ms: u64,

    /// Maximum datagrams handled concurrently
    #[arg(long, default_value = "256")]
    pub max_inflight: usize,

    /// Idle time before a pending peer is forgotten (seconds)
    #[arg(long, default_value = "60")]
    pub pending_ttl_secs: u64,

    /// Idle time before an established peer is forgotten (seconds)
    #[arg(long, default_value = "600")]
    pub session_ttl_secs: u64,

    /// Expiry sweep interval (seconds)
    #[arg(long, default_value = "15")]
    pub sweep_interval_secs: u64,

    /// Handling of a changed public key from a known address
    #[arg(long, value_enum, default_value = "strict")]
    pub key_pinning: PinningArg,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format
    #[arg(long, value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_inflight == 0 {
            anyhow::bail!("max-inflight must be at least 1");
        }
        if self.pending_ttl_secs == 0 || self.session_ttl_secs == 0 {
            anyhow::bail!("peer TTLs must be non-zero");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep interval must be non-zero");
        }
        Ok(())
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            bind: self.bind,
            bootstrap: (!self.no_bootstrap).then_some(self.bootstrap),
            bootstrap_delay: Duration::from_millis(self.bootstrap_delay_ms),
            max_inflight: self.max_inflight,
            expiry: ExpiryPolicy {
                pending_ttl: Duration::from_secs(self.pending_ttl_secs),
                established_ttl: Duration::from_secs(self.session_ttl_secs),
            },
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            pinning: self.key_pinning.into(),
            ..NodeConfig::default()
        }
    }
}
