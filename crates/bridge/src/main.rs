// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use tracing::error;

use bridge::cli::{Cli, Command, ExitCode};

#[tokio::main]
async fn main() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let exit_code = match cli.command.unwrap_or(Command::Run) {
        Command::Run => match bridge::run(cli.config).await {
            Ok(()) => ExitCode::Ok,
            Err(e) => {
                error!("fatal: {e:#}");
                ExitCode::Generic
            }
        },
        Command::Pair { pair_code } => match bridge::pair_cli(&cli.config, &pair_code).await {
            Ok(identity) => {
                println!("paired as device {}", identity.device_id);
                ExitCode::Ok
            }
            Err(e) => {
                eprintln!("pairing failed: {e:#}");
                ExitCode::Precondition
            }
        },
        Command::Unpair { force } => match bridge::unpair_cli(&cli.config).await {
            Ok(()) => ExitCode::Ok,
            Err(e) if force => {
                eprintln!("unpair encountered an error but was forced through: {e:#}");
                ExitCode::Ok
            }
            Err(e) => {
                eprintln!("unpair failed: {e:#}");
                ExitCode::Generic
            }
        },
        // Service lifecycle subcommands delegate to an OS service wrapper,
        // out of scope for the core (spec §1) — reported as misuse here
        // rather than silently doing nothing.
        Command::Service { .. }
        | Command::Install
        | Command::Uninstall
        | Command::Start
        | Command::Stop
        | Command::Restart
        | Command::Status => {
            eprintln!("service lifecycle management is provided by the OS service wrapper, not this binary");
            ExitCode::Misuse
        }
    };

    std::process::exit(exit_code.code());
}
