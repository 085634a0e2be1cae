use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

use crackpair::controller::{ControllerConfig, ControllerSession, Outcome};
use crackpair::engine::{CryptVerifier, SearchEngine};
use crackpair::metrics::Summary;
use crackpair::worker::{WorkerConfig, WorkerOutcome, WorkerSession};
use crackpair::{logging, shadow};

#[derive(Parser, Debug)]
#[command(about = "Distributed crypt(3) password search")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve one hash from a shadow file to a single worker.
    Controller {
        /// Port to listen on
        #[arg(short = 'p', value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,

        /// Shadow-format file holding the target hash
        #[arg(short = 'f')]
        file: PathBuf,

        /// Account to crack
        #[arg(short = 'u')]
        username: String,

        /// Seconds between heartbeat requests
        #[arg(short = 'b', value_parser = clap::value_parser!(u32).range(1..))]
        interval: u32,

        /// Seconds to wait for the worker to announce itself
        #[arg(long, default_value_t = 30)]
        handshake_timeout: u64,

        /// More logging (-v debug, -vv trace)
        #[arg(short = 'v', action = clap::ArgAction::Count)]
        verbose: u8,
    },

    /// Connect to a controller and crack the hash it sends.
    Worker {
        /// Controller host
        #[arg(short = 'c')]
        controller: String,

        /// Controller port
        #[arg(short = 'p', value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,

        /// Search threads (default: CPU cores)
        #[arg(short = 't', value_parser = positive)]
        threads: Option<usize>,

        /// Longest candidate to try (default: unbounded)
        #[arg(long, value_parser = positive)]
        max_length: Option<usize>,

        /// Seconds to wait for shutdown after reporting
        #[arg(long, default_value_t = 30)]
        shutdown_timeout: u64,

        /// More logging (-v debug, -vv trace)
        #[arg(short = 'v', action = clap::ArgAction::Count)]
        verbose: u8,
    },
}

fn positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn main() {
    let result = match Args::parse().command {
        Command::Controller {
            port,
            file,
            username,
            interval,
            handshake_timeout,
            verbose,
        } => main_controller(
            port,
            file,
            &username,
            interval,
            Duration::from_secs(handshake_timeout),
            verbose,
        ),

        Command::Worker {
            controller,
            port,
            threads,
            max_length,
            shutdown_timeout,
            verbose,
        } => {
            logging::init(verbose, None);
            main_worker(
                &controller,
                port,
                threads.unwrap_or_else(num_cpus::get),
                max_length,
                Duration::from_secs(shutdown_timeout),
            )
        }
    };

    if let Err(e) = result {
        tracing::error!("fatal: {e:#}");
        process::exit(1);
    }
}

fn main_controller(
    port: u16,
    file: PathBuf,
    username: &str,
    interval: u32,
    handshake_timeout: Duration,
    verbose: u8,
) -> anyhow::Result<()> {
    let started = Instant::now();
    let bars = MultiProgress::new();
    logging::init(verbose, Some(bars.clone()));

    let parse_started = Instant::now();
    let mut job = shadow::find_user(&file, username)
        .with_context(|| format!("unable to load {username} from {}", file.display()))?;
    let parse_time = parse_started.elapsed();
    job.interval_seconds = interval;
    tracing::info!(username, setting = %job.setting, "target loaded");

    let span = tracing::info_span!("controller", port);
    let session = ControllerSession::new(job, ControllerConfig { handshake_timeout }, span)
        .with_progress(bars.add(ProgressBar::new_spinner()));

    let runtime = Runtime::new()?;
    let report = runtime
        .block_on(async {
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;
            session.serve(listener).await
        })
        .context("session with worker failed")?;

    let (password, metrics) = match &report.outcome {
        Outcome::Found { password, metrics } => (Some(password.as_str()), *metrics),
        Outcome::NotFound { metrics } => (None, *metrics),
        Outcome::Failed { reason } => bail!("worker failed: {reason}"),
    };

    let summary = Summary {
        password,
        parse_time: to_signed(parse_time),
        session: metrics,
        end_to_end: to_signed(started.elapsed()),
        heartbeats: report.heartbeats.len(),
    };
    bars.suspend(|| println!("{}", summary.render()));

    Ok(())
}

fn main_worker(
    controller: &str,
    port: u16,
    threads: usize,
    max_length: Option<usize>,
    shutdown_timeout: Duration,
) -> anyhow::Result<()> {
    let span = tracing::info_span!("worker", controller, port);
    let engine = SearchEngine::new(CryptVerifier, threads, span.clone())?.with_max_length(max_length);
    let config = WorkerConfig {
        shutdown_timeout,
        ..WorkerConfig::default()
    };

    let runtime = Runtime::new()?;
    let outcome = runtime
        .block_on(WorkerSession::new(engine, config, span).connect((controller, port)))
        .with_context(|| format!("session with {controller}:{port} failed"))?;

    match outcome {
        WorkerOutcome::Found { tested, .. } => tracing::info!(tested, "password reported"),
        WorkerOutcome::NotFound { tested } => tracing::info!(tested, "no password in keyspace"),
        WorkerOutcome::Interrupted { tested } => tracing::info!(tested, "stopped by controller"),
        WorkerOutcome::Failed { reason } => bail!("search failed: {reason}"),
    }

    Ok(())
}

fn to_signed(d: Duration) -> time::Duration {
    time::Duration::try_from(d).unwrap_or(time::Duration::MAX)
}
