//! Demonstration host bootstrap.
//!
//! Wires the in-memory [`Dispatcher`]/[`WorkerChannel`] test doubles to the
//! real [`ConcurrencyManager`] so the control loop can be observed end to
//! end. The real RPC transport, process launcher, and configuration
//! discovery a full function-hosting runtime would wire this into are
//! left out.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dynamic_concurrency_manager::concurrency::{
    resolve_options, ConcurrencyManager, ConcurrencyOptionsConfig, SystemCoreCount, SystemEnv,
};
use dynamic_concurrency_manager::testkit::InMemoryDispatcher;

#[derive(Parser, Debug)]
#[command(about = "Dynamic worker-pool concurrency control loop demo host")]
struct CliArgs {
    /// Path to a TOML file with a `[worker_concurrency]` section.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// env_logger filter level.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of demo workers to seed before starting the loop.
    #[arg(long, default_value_t = 1)]
    initial_workers: usize,
}

#[derive(Default, serde::Deserialize)]
struct ConfigFile {
    #[serde(default)]
    worker_concurrency: ConcurrencyOptionsConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    env_logger::Builder::from_default_env()
        .filter_level(args.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            toml::from_str::<ConfigFile>(&text)?.worker_concurrency
        }
        None => ConcurrencyOptionsConfig::default(),
    };

    let options = Arc::new(resolve_options(&SystemEnv, &config, &SystemCoreCount)?);
    log::info!("resolved options: {options:?}");

    let dispatcher = InMemoryDispatcher::new(options.clone());
    dispatcher.seed_workers(args.initial_workers);

    let manager = ConcurrencyManager::new(options, dispatcher.clone());
    manager.start().await;

    // Demo run: let the loop observe the seeded workers for a short window,
    // then shut down cleanly.
    tokio::time::sleep(Duration::from_secs(5)).await;
    manager.stop();
    manager.dispose();

    log::info!("final worker count: {}", dispatcher.worker_count());
    Ok(())
}
