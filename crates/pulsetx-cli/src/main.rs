//! pulsetx CLI
//!
//! Cyclic AF_XDP transmit generator

mod config;
mod reporter;
mod setup;

use anyhow::Context;
use clap::Parser;
use pulsetx_core::{CancellationToken, Engine, RunSummary};
use pulsetx_transport::TxQueue;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Overrides;
use reporter::Reporter;
use setup::SchedPolicy;

/// pulsetx - emit fixed-size packet batches at a programmable period
#[derive(Parser)]
#[command(name = "pulsetx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against the in-process loopback driver instead of an interface
    #[arg(long)]
    loopback: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,

    /// Write the effective configuration to this TOML file and exit
    #[arg(long, value_name = "PATH")]
    save_config: Option<PathBuf>,

    /// Seconds between statistics reports (0 disables them)
    #[arg(long, default_value_t = 1)]
    stats_interval: u64,

    /// Scheduling policy for the transmit thread
    #[arg(long, value_enum, default_value_t = SchedPolicy::Other)]
    sched_policy: SchedPolicy,

    /// Real-time priority used with the fifo policy
    #[arg(long, default_value_t = 50)]
    sched_priority: i32,

    #[command(flatten)]
    generator: Overrides,
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let generator = config::resolve(cli.config.as_deref(), cli.generator)?;
    if cli.dump_config {
        print!("{}", toml::to_string_pretty(&generator)?);
        return Ok(());
    }
    if let Some(path) = &cli.save_config {
        config::save(&generator, path)
            .with_context(|| format!("cannot write config file {}", path.display()))?;
        info!(path = %path.display(), "configuration saved");
        return Ok(());
    }

    if !cli.loopback {
        if let Err(e) = setup::raise_memlock_limit() {
            warn!(error = %e, "cannot raise RLIMIT_MEMLOCK, pinning the frame pool may fail");
        }
    }
    if cli.sched_policy != SchedPolicy::Other {
        setup::apply_sched_policy(cli.sched_policy, cli.sched_priority)
            .context("failed to apply scheduling policy")?;
    }

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        info!("interrupt received, stopping");
        handler_token.cancel();
    })
    .context("failed to install signal handler")?;

    let interval = Duration::from_secs(cli.stats_interval);
    let summary = if cli.loopback {
        let (engine, _handle) = Engine::loopback(generator, token, false)?;
        run_engine(engine, interval)?
    } else {
        let engine = Engine::open(generator, token)
            .context("failed to set up AF_XDP sockets")?;
        run_engine(engine, interval)?
    };

    println!(
        "{} cycles, {} packets ({} descriptors) in {:.3}s{}{}",
        summary.cycles,
        summary.packets,
        summary.descriptors,
        summary.elapsed.as_secs_f64(),
        if summary.cancelled { ", cancelled" } else { "" },
        if summary.drained { "" } else { ", completions not drained" },
    );
    Ok(())
}

/// Run `engine` with an optional reporter thread alongside it
fn run_engine<Q: TxQueue>(mut engine: Engine<Q>, interval: Duration) -> anyhow::Result<RunSummary> {
    let stats_thread = (!interval.is_zero())
        .then(|| Reporter::spawn(engine.stats_collector(), interval))
        .transpose()
        .context("failed to start statistics reporter")?;

    let result = engine.run();

    if let Some(mut collector) = stats_thread.and_then(Reporter::stop) {
        reporter::log_report(&collector.sample());
    }
    Ok(result?)
}
