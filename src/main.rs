//! brewline - cafe fulfillment server entry point
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌───────────┐    ┌──────────┐
//! │ Acceptor │───▶│ Sessions  │───▶│ Scheduler │───▶│ Brewers  │
//! │ (TCP)    │    │ (intake)  │    │ (capacity)│    │ (pool)   │
//! └──────────┘    └─────▲─────┘    └───────────┘    └────┬─────┘
//!                       └──────── ready notifications ◀──┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use crossbeam_queue::ArrayQueue;

use brewline::brewer::spawn_brewers;
use brewline::scheduler::{BREW_QUEUE_CAPACITY, run_scheduler};
use brewline::{AppConfig, Cafe, CafeServer};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn load_config() -> anyhow::Result<AppConfig> {
    let args: Vec<String> = std::env::args().collect();
    let path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    if std::path::Path::new(path).exists() {
        AppConfig::from_file(path).with_context(|| format!("loading config from {path}"))
    } else {
        Ok(AppConfig::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let _log_guard = brewline::logging::init_logging(&config.log);

    let cafe = Arc::new(Cafe::new(config));
    let jobs = Arc::new(ArrayQueue::new(BREW_QUEUE_CAPACITY));

    let brewers = spawn_brewers(cafe.clone(), jobs.clone());
    let scheduler = tokio::spawn(run_scheduler(cafe.clone(), jobs));

    let server = CafeServer::bind(cafe.clone())
        .await
        .context("binding listen address")?;
    tracing::info!(addr = %server.local_addr()?, "cafe open for business");
    let acceptor = tokio::spawn(server.run());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");
    cafe.shutdown.request_shutdown();

    let _ = scheduler.await;
    let _ = acceptor.await;
    // in-flight brews are abandoned; the tickets are lost with the process
    for brewer in brewers {
        brewer.abort();
    }

    tracing::info!("{}", cafe.stats.snapshot());
    Ok(())
}
