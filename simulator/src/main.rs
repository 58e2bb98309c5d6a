mod args;
mod logging;
mod model;
mod runner;

use std::process::ExitCode;

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::Level;

use crate::args::{Args, SimConfig};
use crate::logging::TeeWriter;

fn main() -> ExitCode {
    let config = SimConfig::from_args(Args::parse());

    let writer = match TeeWriter::open(config.log.as_deref()) {
        Ok(writer) => writer,
        Err(err) => {
            eprintln!("cannot open log file: {err}");
            return ExitCode::FAILURE;
        }
    };
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_max_level(if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    match serde_json::to_string(&config) {
        Ok(json) => tracing::info!(config = %json, "simulator starting"),
        Err(err) => tracing::warn!(%err, "cannot serialise config"),
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(%err, "cannot start runtime");
            return ExitCode::FAILURE;
        }
    };

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    match runtime.block_on(runner::run(&config, &mut rng)) {
        Ok(stats) => {
            match serde_json::to_string(&stats) {
                Ok(json) => tracing::info!(seed = config.seed, stats = %json, "simulation passed"),
                Err(_) => tracing::info!(seed = config.seed, "simulation passed"),
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            tracing::error!(seed = config.seed, %failure, "simulation failed");
            ExitCode::FAILURE
        }
    }
}
