use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use fusionflow::config::Config;
use fusionflow::core::OrbitRange;
use fusionflow::orchestration::{
    run_process, run_pull, run_push, DryRunSubmitter, Orchestrator, PbsSubmitter, PipelineHandler,
};
use fusionflow::state::{JobPhase, LogTree};
use fusionflow::transfer::GlobusBackend;
use fusionflow::{util, Result};

/// FusionFlow - batch pipeline orchestrator for orbit archive fusion
#[derive(Parser, Debug)]
#[command(name = "fusionflow")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    FUSIONFLOW_DEBUG=1     Enable debug logging (alternative to --debug)\n    FUSIONFLOW_LOG=<filter>  Override the log filter")]
pub struct Cli {
    /// Configuration file (defaults to ~/.fusionflow/fusionflow.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Split an orbit range into quanta and submit their jobs
    Submit {
        /// First orbit
        start: u32,

        /// Last orbit, inclusive
        end: u32,

        /// Orbits per quantum (overrides the configuration)
        #[arg(long, short = 'g')]
        granularity: Option<u32>,

        /// Write scripts and print the plan without calling the scheduler
        #[arg(long)]
        dry_run: bool,
    },

    /// Fetch the archives of one quantum
    Pull(JobArgs),

    /// Verify, extract and generate one quantum
    Process(JobArgs),

    /// Ship the products of one quantum
    Push(JobArgs),
}

/// Arguments shared by the per-quantum job commands.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct JobArgs {
    /// Log tree written at submission time
    #[arg(long)]
    pub log_tree: PathBuf,

    pub start: u32,

    pub end: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Submit {
            start,
            end,
            granularity,
            dry_run,
        } => {
            fusionflow::log::init(cli.debug, None)?;
            run_submit(cli.config.as_deref(), start, end, granularity, dry_run)
        }
        Command::Pull(args) => run_job(JobPhase::Pull, cli.config.as_deref(), cli.debug, &args),
        Command::Process(args) => run_job(JobPhase::Process, cli.config.as_deref(), cli.debug, &args),
        Command::Push(args) => run_job(JobPhase::Push, cli.config.as_deref(), cli.debug, &args),
    }
}

fn run_submit(
    config_path: Option<&Path>,
    start: u32,
    end: u32,
    granularity: Option<u32>,
    dry_run: bool,
) -> Result<()> {
    let mut config = Config::load(config_path)?;
    if let Some(granularity) = granularity {
        config.pipeline.granularity = granularity;
    }
    config.validate()?;
    config.resolve_paths(&std::env::current_dir()?);

    let range = OrbitRange::new(start, end)?;
    let orchestrator = Orchestrator::new(config.clone(), std::env::current_exe()?);

    let (plan, report) = if dry_run {
        orchestrator.run(range, DryRunSubmitter::new())?
    } else {
        util::ensure_available(&config.scheduler.command)?;
        orchestrator.run(range, PbsSubmitter::new(&config.scheduler.command))?
    };

    println!("{}", report);
    println!(
        "{} quanta, {} jobs, run directory {}",
        plan.quanta.len(),
        report.len(),
        plan.tree.run_dir.display()
    );
    Ok(())
}

fn run_job(phase: JobPhase, config_path: Option<&Path>, debug: bool, args: &JobArgs) -> Result<()> {
    let range = OrbitRange::new(args.start, args.end)?;
    let tree = LogTree::load(&args.log_tree)?;
    let log_file = tree
        .log_dir(phase)
        .join(format!("{}_{}.log", phase, range.label()));
    fusionflow::log::init(debug, Some(&log_file))?;

    let config = Config::load(config_path)?;
    info!(%phase, range = %range, run_dir = %tree.run_dir.display(), "job started");

    match phase {
        JobPhase::Pull => {
            util::ensure_available(&config.transfer.command)?;
            let backend = Arc::new(GlobusBackend::pull(&config.transfer));
            run_pull(&config, &tree, range, backend)?;
        }
        JobPhase::Process => {
            let handler = Arc::new(PipelineHandler::new(&config));
            let backend = Arc::new(GlobusBackend::pull(&config.transfer));
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_process(&config, &tree, range, handler, backend))?;
        }
        JobPhase::Push => {
            util::ensure_available(&config.transfer.command)?;
            let backend = Arc::new(GlobusBackend::push(&config.transfer));
            run_push(&config, &tree, range, backend)?;
        }
    }

    info!(%phase, range = %range, "job finished");
    Ok(())
}
