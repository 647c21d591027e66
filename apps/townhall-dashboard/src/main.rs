use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use townhall_dashboard::{
    ConsoleView, HttpFetcher, HttpPushConnector, Role, Section, SyncConfig, SyncManager,
};

#[derive(Debug, Parser)]
#[command(
    name = "townhall-dashboard",
    version,
    about = "Terminal dashboard kept live by push events and fallback polling"
)]
struct Args {
    #[arg(long, env = "TOWNHALL_BASE", default_value = "http://127.0.0.1:8092")]
    base: String,
    #[arg(long, env = "TOWNHALL_TOKEN")]
    token: Option<String>,
    #[arg(long, value_enum, default_value_t = Role::Admin)]
    role: Role,
    /// Section shown at start
    #[arg(long, default_value = "dashboard")]
    section: Section,
    /// Fallback poll interval for the visible section
    #[arg(long, default_value_t = 30)]
    poll_secs: u64,
    /// Summary refresh interval
    #[arg(long, default_value_t = 30)]
    refresh_secs: u64,
    /// Reconnects after the push stream drops (0 = polling only once lost)
    #[arg(long, default_value_t = 0)]
    reconnect_attempts: u32,
    /// Print full JSON bodies instead of one-line summaries
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    townhall_otel::init_stderr();
    let args = Args::parse();

    let client = reqwest::Client::builder()
        .build()
        .context("building http client")?;
    let fetcher = Arc::new(HttpFetcher::new(
        client.clone(),
        &args.base,
        args.role,
        args.token.clone(),
    ));
    let push = Arc::new(HttpPushConnector::new(client, &args.base, args.token.clone()));
    let config = SyncConfig {
        poll_interval: Duration::from_secs(args.poll_secs.max(1)),
        refresh_interval: Duration::from_secs(args.refresh_secs.max(1)),
        reconnect_attempts: args.reconnect_attempts,
        ..SyncConfig::default()
    };
    let mut manager = SyncManager::new(args.role, fetcher, ConsoleView::new(args.json), config);

    manager
        .show_section(args.section)
        .with_context(|| format!("cannot open section {}", args.section))?;
    manager.start_global_refresh();
    manager.connect_push(push);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !command(&mut manager, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(err) => {
                    tracing::warn!(%err, "stdin closed");
                    stdin_open = false;
                }
            },
            signal = manager.next_signal() => match signal {
                Some(signal) => manager.dispatch(signal),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                manager.sign_out().await;
                break;
            }
        }
    }
    Ok(())
}

/// Handles one stdin command. Returns `false` once the session is over.
async fn command(manager: &mut SyncManager<HttpFetcher, ConsoleView>, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => {}
        (Some("show"), Some(name)) => match name.parse::<Section>() {
            Ok(section) => {
                if let Err(err) = manager.show_section(section) {
                    eprintln!("{err}");
                }
            }
            Err(err) => eprintln!("{err}"),
        },
        (Some("sections"), _) => {
            let names: Vec<&str> = manager.role().sections().iter().map(|s| s.name()).collect();
            println!("{}", names.join(" "));
        }
        (Some("status"), _) => {
            let stats = manager.stats();
            println!(
                "section={} pollers={:?} push={:?} fetches={} applied={} discarded={} failed={}",
                manager
                    .active_section()
                    .map(|s| s.name())
                    .unwrap_or("-"),
                manager.active_pollers(),
                manager.push_state(),
                stats.fetches,
                stats.applied,
                stats.discarded,
                stats.failed,
            );
        }
        (Some("signout" | "quit" | "exit"), _) => {
            manager.sign_out().await;
            return false;
        }
        (Some(other), _) => {
            eprintln!("unknown command: {other} (show <section>, sections, status, signout)")
        }
    }
    true
}
