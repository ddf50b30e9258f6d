use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arena_ticker::config::Config;
use arena_ticker::graceful_shutdown;
use arena_ticker::health::spawn_heartbeat;
use arena_ticker::poller::{PollerSettings, TradePoller};
use arena_ticker::upstream::HttpUpstream;

#[derive(Parser, Debug)]
#[command(
    name = "arena-ticker",
    version,
    about = "Poll arena trades and keep a delta cache of new trades"
)]
struct Args {
    #[arg(long, default_value = "config.toml")]
    config: String,
    /// Run a single cycle, print the snapshot JSON and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let cfg = Config::load(&args.config).context("load config")?;

    let upstream = HttpUpstream::new(&cfg.upstream).context("build upstream client")?;
    info!(base_url = %upstream.base_url(), "upstream configured");
    let poller = TradePoller::new(Arc::new(upstream), PollerSettings::from_config(&cfg.poller));

    if args.once {
        let snap = match poller.trigger_once().await {
            Ok(snap) => snap,
            Err(e) => {
                error!(error = %e, status = e.http_status(), "poll failed");
                return Err(e).context("poll once");
            }
        };
        let json = serde_json::to_string_pretty(&snap).context("serialize snapshot")?;
        println!("{json}");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = graceful_shutdown::channel();
    let heartbeat = (cfg.poller.heartbeat_seconds > 0).then(|| {
        spawn_heartbeat(
            poller.health(),
            Duration::from_secs(cfg.poller.heartbeat_seconds),
            shutdown_rx,
        )
    });

    poller.start();

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("ctrl-c received; shutting down");

    graceful_shutdown::request(&shutdown_tx);
    poller.stop().await;
    if let Some(handle) = heartbeat {
        let _ = handle.await;
    }

    info!("done");
    Ok(())
}
