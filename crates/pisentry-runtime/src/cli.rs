//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pisentry", about = "presence-aware security camera")]
pub struct Cli {
    /// Configuration file
    #[arg(long, short = 'c', global = true, default_value = "/etc/pisentry.toml")]
    pub config: PathBuf,

    /// JSON file holding the operator channel
    #[arg(
        long,
        short = 's',
        global = true,
        default_value = "/var/lib/pisentry/data.json"
    )]
    pub data_file: PathBuf,

    /// Debug logging (overridden by PISENTRY_LOG / RUST_LOG)
    #[arg(long, short = 'd', global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the monitor (default)
    Run,
    /// Check interface, privileges and network, then exit
    Check,
    /// Print the packet capture filter and exit
    Filter,
}
