use anyhow::Context as _;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use arena_ticker::config::Config;
use arena_ticker::latest::{latest_trades, parse_limit, ErrorBody};
use arena_ticker::upstream::HttpUpstream;

/// Exit code used when the trades list itself could not be fetched.
const EXIT_BAD_GATEWAY: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "latest_trades",
    about = "Fetch, normalize and print the latest arena trades and open positions"
)]
struct Args {
    #[arg(long, default_value = "config.toml")]
    config: String,
    /// Trades to return; unparseable values fall back to the configured default.
    #[arg(long)]
    limit: Option<String>,
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config).context("load config")?;
    let upstream = HttpUpstream::new(&cfg.upstream).context("build upstream client")?;
    let limit = parse_limit(args.limit.as_deref(), cfg.display.effective_trade_limit());

    match latest_trades(&upstream, &cfg.display, limit).await {
        Ok(doc) => {
            println!("{}", to_json(&doc, args.pretty)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, status = e.http_status(), "latest trades failed");
            println!("{}", to_json(&ErrorBody::from(&e), args.pretty)?);
            std::process::exit(EXIT_BAD_GATEWAY);
        }
    }
}

fn to_json<T: serde::Serialize>(v: &T, pretty: bool) -> anyhow::Result<String> {
    let out = if pretty {
        serde_json::to_string_pretty(v)
    } else {
        serde_json::to_string(v)
    };
    out.context("serialize json")
}
