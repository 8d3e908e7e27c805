//! rdslog-dl command-line interface
//!
//! Downloads every log of one database instance through a log gateway:
//!
//! ```bash
//! RDSLOG_ENDPOINT=https://logs.internal.example rdslog-dl -o ./logs -r us-east-1 proddb
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use rdslog_dl::{
    Config, Error, Event, FailurePolicy, HttpLogSource, InstanceId, LogFetcher, Result,
    ToExitCode, drain_with_shutdown,
};

/// Download managed database error/slow logs.
#[derive(Parser, Debug)]
#[command(name = "rdslog-dl", version, about, long_about = None)]
struct Cli {
    /// Target database instance name
    #[arg(value_name = "TARGET_INSTANCE")]
    target: Option<String>,

    /// Output destination
    #[arg(short, long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Target region
    #[arg(short, long)]
    region: Option<String>,

    /// Log gateway base URL
    #[arg(long, env = "RDSLOG_ENDPOINT")]
    endpoint: Option<String>,

    /// Bearer token for the log gateway
    #[arg(long, env = "RDSLOG_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum concurrent downloads
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Delay between download launches, in milliseconds
    #[arg(long, value_name = "MS")]
    launch_delay_ms: Option<u64>,

    /// Per-file download timeout, in seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Cancel the remaining downloads after the first failed one
    #[arg(long)]
    fail_fast: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Layer command-line flags over the file (or default) configuration.
    fn into_config(self) -> Result<(Config, Option<String>)> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)?,
            None => Config::default(),
        };

        if let Some(out) = self.out {
            config.output_dir = out;
        }
        if let Some(region) = self.region {
            config.source.region = region;
        }
        if self.endpoint.is_some() {
            config.source.endpoint = self.endpoint;
        }
        if self.token.is_some() {
            config.source.api_token = self.token;
        }
        if let Some(n) = self.concurrency {
            config.fetch.max_concurrent_fetches = n;
        }
        if let Some(ms) = self.launch_delay_ms {
            config.fetch.launch_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.timeout_secs {
            config.fetch.fetch_timeout = Some(Duration::from_secs(secs));
        }
        if self.fail_fast {
            config.fetch.failure_policy = FailurePolicy::Abort;
        }

        config.validate()?;
        Ok((config, self.target))
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "rdslog_dl=info",
        1 => "rdslog_dl=debug",
        _ => "rdslog_dl=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.error_code(), "{e}");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let (config, target) = cli.into_config()?;

    let target = target.unwrap_or_default();
    println!("Target instance: {target}");
    println!("Output path: {}", config.output_dir.display());
    println!("Target region: {}", config.source.region);
    if target.is_empty() {
        return Err(Error::config("target", "target instance name must be specified"));
    }
    let instance = InstanceId::new(target)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime_worker_threads())
        .enable_all()
        .build()
        .map_err(|e| Error::Session(format!("failed to start runtime: {e}")))?;

    runtime.block_on(fetch_instance(config, instance))
}

async fn fetch_instance(config: Config, instance: InstanceId) -> Result<()> {
    let source = Arc::new(HttpLogSource::new(&config.source)?);
    let fetcher = LogFetcher::new(config, source)?;

    let batch = fetcher.list_artifacts(&instance).await?;
    let progress = tokio::spawn(print_progress(fetcher.subscribe()));

    let report = drain_with_shutdown(fetcher.dispatch(instance, batch)).await;
    progress.await.ok();

    for failure in report.failures.iter() {
        eprintln!(
            "Failed: {} ({})",
            failure.artifact,
            failure.error().unwrap_or("unknown error")
        );
    }
    report.into_result()?;
    println!("Complete!");
    Ok(())
}

/// Print one line per launch and per saved file until the batch completes.
async fn print_progress(mut events: tokio::sync::broadcast::Receiver<Event>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(Event::ArtifactLaunched { name }) => println!("Log filename: {name}"),
            Ok(Event::ArtifactWritten { path, .. }) => {
                println!("Destination: {}", path.display())
            }
            Ok(Event::BatchComplete { .. }) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => {
                tracing::debug!(skipped = n, "Progress output lagged behind");
            }
        }
    }
}
