//! wispd - Wisp node daemon
//!
//! Wires the Wisp network layer to:
//! - Command-line and environment configuration
//! - An interactive line console on stdin

pub mod config;
pub mod console;

pub use config::Config;
