// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Switchyard node: runs the application binary matching the chain version
#![warn(missing_docs)]

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use switchyard_logging::setup_tracing;
use switchyard_node::{build_settings, StartCommandHandler, VersionFile};
use switchyard_versioning::ActivationStrategy;
use tracing::{info, warn};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the binaries, switching when the chain upgrades
    Start(StartArgs),
    /// Print the version reported by every binary
    Versions,
}

#[derive(clap::Args)]
struct StartArgs {
    /// Version to start with while the version file is missing (latest by default)
    #[arg(long)]
    app_version: Option<u64>,
    /// Forwarded to every binary after its start arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    program_args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings =
        build_settings("switchyard-node", "SWITCHYARD").context("could not load settings")?;
    setup_tracing(settings.logging.level)?;

    let registry = Arc::new(settings.version_registry()?);
    info!("registered application versions: {:?}", registry.versions());
    let handler = StartCommandHandler::new(registry);

    match cli.command {
        Command::Start(args) => {
            let config = settings.runner_config(args.program_args)?;
            let initial = args
                .app_version
                .map_or(ActivationStrategy::Latest, ActivationStrategy::Exact);
            let source = VersionFile::new(&settings.node.version_file);

            let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
            ctrlc::set_handler(move || {
                if stop_tx.try_send(()).is_err() {
                    warn!("stop already requested");
                }
            })
            .context("could not set the interruption handler")?;

            handler.run_binaries(config, initial, &source, &stop_rx)?;
            info!("stopped");
        }
        Command::Versions => {
            let config = settings.runner_config(Vec::new())?;
            for (version, output) in handler.binary_versions(&config) {
                match output {
                    Ok(reported) => println!("{}: {}", version, reported),
                    Err(err) => println!("{}: unavailable ({})", version, err),
                }
            }
        }
    }
    Ok(())
}
