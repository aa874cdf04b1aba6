// SPDX-License-Identifier: Apache-2.0

//! The thin CLI shell, per spec §6. Service lifecycle subcommands
//! (`install`/`start`/`stop`/...) are a shim over an OS service wrapper —
//! out of scope for the core per spec §1 — so they're modeled here only as
//! the surface the core must expose unambiguously: an exit code and a
//! one-line stderr summary on failure (spec §7).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "repset-bridge", about = "Gym access-control bridge daemon")]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "./config.json", env = "BRIDGE_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground (default when no subcommand given).
    Run,
    /// Exchange a one-time pair code for a device identity.
    Pair {
        #[arg(long)]
        pair_code: String,
    },
    /// Wipe the local device identity and stop the sender loop.
    Unpair {
        #[arg(long)]
        force: bool,
    },
    /// Delegate to the OS service wrapper.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    Install,
    Uninstall,
    Start,
    Stop,
    Restart,
    Status,
}

#[derive(Debug, Subcommand)]
pub enum ServiceAction {
    Install,
    Uninstall,
    Start,
    Stop,
    Restart,
    Status,
}

/// Process exit codes, per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    Generic = 1,
    Misuse = 2,
    Precondition = 3,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}
