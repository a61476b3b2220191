mod config;
mod error;
mod magnifier;
mod platform;
mod timer;
mod tracker;
mod utils;

use anyhow::Context;
use clap::Parser;
use config::{Cli, Config};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .init();

    log::info!("Starting twinmag v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_cli(&cli);
    log::debug!("Configuration: {:?}", config);
    let viewports = config.viewports()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, exiting...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    let host = platform::wayland::WaylandHost::connect(running.clone())?;
    let mut magnifier = magnifier::Magnifier::new(host, viewports);

    log::info!("Press Escape or Ctrl+C to exit");
    magnifier.run(&running, config.interval)?;

    log::info!("Exiting twinmag");
    Ok(())
}
