use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use vantage_pipeline::{
    run_pipeline, BranchSelection, ConfigFileError, PipelineConfig, PipelineRunError,
    RequestOrigin, RunOutcome, SourceMode, TerminationHandle,
};

#[derive(Parser)]
#[command(
    name = "vantage",
    version,
    about = "Video analytics pipeline runner with display, network and file outputs"
)]
struct Args {
    /// Source topology selector: 1 = container file, 2 = live sensor
    mode: u32,

    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Which splitter branches to attach
    #[arg(long, value_enum, default_value_t = BranchArg::All)]
    branches: BranchArg,

    /// Verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Errors only
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BranchArg {
    /// Display, network and file outputs
    All,
    /// The minimal streaming variant: network output only
    Network,
}

impl std::fmt::Display for BranchArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchArg::All => write!(f, "all"),
            BranchArg::Network => write!(f, "network"),
        }
    }
}

impl From<BranchArg> for BranchSelection {
    fn from(arg: BranchArg) -> Self {
        match arg {
            BranchArg::All => BranchSelection::All,
            BranchArg::Network => BranchSelection::NetworkOnly,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Mode(#[from] vantage_pipeline::ModeError),

    #[error(transparent)]
    Config(#[from] ConfigFileError),

    #[error(transparent)]
    Run(#[from] PipelineRunError),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.quiet) {
        eprintln!("Error: cannot initialize logging: {e}");
        process::exit(1);
    }

    match run(args).await {
        Ok(RunOutcome::Completed) => {}
        Ok(RunOutcome::Failed { node, message }) => {
            eprintln!("Error: {node}: {message}");
            process::exit(1);
        }
        Err(AppError::Mode(e)) => {
            eprintln!("{e}");
            eprintln!("Usage: vantage <MODE> [--config <path>] [--branches <all|network>]");
            process::exit(2);
        }
        Err(e) => {
            error!("fatal: {e}");
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<RunOutcome, AppError> {
    // The selector is validated before anything is allocated.
    let mode = SourceMode::try_from(args.mode)?;
    let config = PipelineConfig::load(args.config.as_deref())?;

    let termination = TerminationHandle::new();
    let interrupt = termination.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, requesting graceful stop");
            interrupt.request(RequestOrigin::Signal);
        }
    });

    let report = run_pipeline(mode, args.branches.into(), &config, termination).await?;
    info!(
        frames_displayed = report.stats.frames_displayed(),
        datagrams_sent = report.stats.datagrams_sent(),
        records_stored = report.stats.records_stored(),
        "run finished"
    );
    Ok(report.outcome)
}

fn init_logging(verbose: bool, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .try_init()?;
    Ok(())
}
