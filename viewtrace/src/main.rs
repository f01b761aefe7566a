//! viewtrace - page engagement telemetry pipeline
//!
//! This tool provides commands for:
//! - Showing the effective collector configuration
//! - Replaying recorded host signals through the pipeline
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/viewtrace/config.toml (~/.config/viewtrace/config.toml)
//! - Logs: $XDG_STATE_HOME/viewtrace/viewtrace.log (~/.local/state/viewtrace/viewtrace.log)

mod replay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use viewtrace_core::collector::RecordingTransport;
use viewtrace_core::{Collector, Config};

use crate::replay::ReplayObserver;

#[derive(Parser)]
#[command(name = "viewtrace")]
#[command(about = "Page engagement telemetry pipeline")]
#[command(version)]
struct Args {
    /// Log every admission, flush and requeue
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the configured collector endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show collector configuration
    Status,

    /// Replay a JSON-lines file of host signals through the pipeline
    Replay {
        /// Signals file
        file: PathBuf,

        /// Record batches locally instead of posting them
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(endpoint) = args.endpoint {
        config.collector.endpoint = endpoint;
    }
    if args.verbose {
        config.collector.enable_debug_logging = true;
        config.logging.level = "debug".to_string();
    }

    let _log_guard =
        viewtrace_core::logging::init(&config.logging).context("failed to initialize logging")?;

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Replay { file, dry_run } => cmd_replay(config, file, dry_run).await,
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("viewtrace Collector Configuration");
    println!("=================================");
    println!();

    let collector = &config.collector;
    println!("Config File:     {}", Config::config_path().display());
    println!("Endpoint:        {}", collector.endpoint);
    println!(
        "API Key:         {}",
        if collector.api_key.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Batch Size:      {}", collector.batch_size);
    println!("Flush Interval:  {}ms", collector.flush_interval_ms);
    println!("Timeout:         {}ms", collector.timeout_ms);
    println!("Retries:         {}", collector.retries);
    println!("Backoff Base:    {}ms", collector.backoff_base_ms);
    println!("Requeue Limit:   {}", collector.requeue_limit());
    println!("Privacy Mode:    {:?}", collector.privacy_mode);

    let policy = &config.policy;
    println!();
    println!("Admission Policy");
    println!("----------------");
    if policy.skip.is_empty() {
        println!("Skip:            <none>");
    } else {
        let mut skip = policy.skip.clone();
        skip.sort();
        println!("Skip:            {}", skip.join(", "));
    }

    let mut throttles: Vec<_> = policy.throttle_ms.iter().collect();
    throttles.sort();
    for (event_type, ms) in throttles {
        println!("Throttle:        {} every {}ms", event_type, ms);
    }

    let mut rates: Vec<_> = policy.sampling.iter().collect();
    rates.sort_by(|a, b| a.0.cmp(b.0));
    for (event_type, rate) in rates {
        println!("Sample:          {} at {:.0}%", event_type, rate * 100.0);
    }

    match config.validate() {
        Ok(()) => {
            println!();
            println!("Status: Ready");
        }
        Err(e) => {
            println!();
            println!("Status: Invalid ({})", e);
        }
    }

    Ok(())
}

async fn cmd_replay(config: Config, file: PathBuf, dry_run: bool) -> Result<()> {
    let signals = replay::load(&file)?;
    println!("Replaying {} signal(s) from {}", signals.len(), file.display());

    let recorder = Arc::new(RecordingTransport::accepting());
    let mut builder = Collector::builder(config).observer(Box::new(ReplayObserver::default()));
    if dry_run {
        builder = builder.transport(recorder.clone());
    }
    let collector = builder.build().context("failed to start collector")?;

    let summary = replay::run(&collector, signals).await;
    collector.destroy().await;

    let stats = collector.stats();
    println!();
    println!("Signals:         {}", summary.signals);
    println!("Tracked:         {} admitted, {} rejected", summary.admitted, summary.rejected);
    println!();
    println!("Delivery:");
    println!("  Batches Sent:    {}", stats.batches_sent);
    println!("  Events Sent:     {}", stats.events_sent);
    println!("  Batches Failed:  {}", stats.batches_failed);
    println!("  Requeued:        {}", stats.events_requeued);
    println!("  Dropped:         {}", stats.events_dropped);

    if dry_run {
        println!();
        println!("Dry run: {} batch(es) recorded", recorder.request_count());
        for body in recorder.bodies() {
            println!("{}", body);
        }
    }

    Ok(())
}
