//! regpoll agent.
//!
//! Polls register blocks on Modbus/TCP field devices through a single
//! transaction-at-a-time transport, with writes, identity probes and
//! metadata scans arbitrated ahead of reads.
//!
//! Usage:
//!   regpoll-agent --host 192.168.1.20 --poll 40001:8@3
//!   regpoll-agent --simulate --poll 40001:4 --metadata --json

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---

mod config;
mod control;
mod poller;
mod report;
mod session;

// ---

use config::Config;

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---

    let cfg = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    // JSON goes to stdout; keep logs on stderr so the two don't interleave.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(!no_color)
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        simulate = cfg.simulate,
        polls = cfg.polls.len(),
        writes = cfg.writes.len(),
        "regpoll-agent starting",
    );

    session::run(cfg).await?;

    info!("shutting down");
    Ok(())
}
