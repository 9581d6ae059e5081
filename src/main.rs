mod config;
mod controller;
mod engine;
mod feeds;
mod logging;
mod metrics;
mod pusher;
mod sim;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use crate::config::Config;
use crate::controller::Controller;
use crate::feeds::hermes::HermesListener;
use crate::feeds::PriceListener;
use crate::metrics::{MetricsSink, NoopMetrics, PusherMetrics};
use crate::sim::SimChain;

#[derive(Parser)]
#[command(
    name = "price-pusher",
    about = "Keeps target-chain price feeds in sync with a source price service"
)]
struct Cli {
    /// Path to config file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    logging::init();

    let source: Arc<dyn PriceListener> =
        Arc::new(HermesListener::new(&cfg.source, cfg.feed_ids()));

    // Chain-specific submission lives behind the pusher trait; the in-tree
    // target is a simulated chain that mirrors accepted pushes locally.
    let sim = SimChain::new(source.clone());
    info!("using simulated target chain");

    let pusher_metrics: Arc<dyn MetricsSink> = if cfg.metrics_summary_interval_secs > 0 {
        let collected = Arc::new(PusherMetrics::new());
        metrics::spawn_summary_logger(
            collected.clone(),
            Duration::from_secs(cfg.metrics_summary_interval_secs),
        );
        collected
    } else {
        Arc::new(NoopMetrics)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller = Controller::new(
        cfg.feeds.clone(),
        source,
        sim.listener(),
        sim.pusher(),
        pusher_metrics,
        Duration::from_secs(cfg.push_interval_secs),
        shutdown_rx,
    );
    let mut handle = tokio::spawn(controller.start());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            let _ = shutdown_tx.send(true);
            handle.await??;
        }
        // a listener that fails to start surfaces here
        res = &mut handle => res??,
    }

    Ok(())
}
