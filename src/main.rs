//! cell-tm - target manager command line
//!
//! Main entry point. Commands run against the in-process simulated target.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tm_core::config::{Config, LogLevel};
use tm_core::{TargetId, TimeoutPolicy};
use tm_pump::{AbortHandle, AbortPolicy, PollLoop, PollReport, PollSettings};
use tm_target::{
    BdCommand, BdRequest, InputSource, RunCommand, SimTarget, StdinLines, SyncCommand,
    WaitOptions, DEFAULT_LATENCY,
};

#[derive(Parser, Debug)]
#[command(
    name = "cell-tm",
    version,
    about = "Drive a development target through the target manager"
)]
struct Cli {
    /// Configuration file (defaults to the per-user config)
    #[arg(long, global = true, env = "CELL_TM_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace); RUST_LOG wins
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Kicks before a simulated operation completes
    #[arg(long, global = true, default_value_t = DEFAULT_LATENCY)]
    sim_latency: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a host directory, skipping files that already match
    Sync {
        #[command(flatten)]
        target: TargetArg,
        host_dir: PathBuf,
        target_dir: String,
        /// Upload every file even if size and timestamp match
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// BD emulator operations
    Bd {
        #[command(flatten)]
        target: TargetArg,
        #[command(subcommand)]
        op: BdOp,
        #[command(flatten)]
        wait: WaitArgs,
    },
    /// Load a process and stream its TTY output
    Run {
        #[command(flatten)]
        target: TargetArg,
        elf: String,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
        /// Stop once this text appears in the output
        #[arg(long)]
        abort_text: Option<String>,
        /// Treat a matched abort text as a failure
        #[arg(long, requires = "abort_text")]
        abort_is_failure: bool,
        /// Return as soon as the process is started
        #[arg(long)]
        no_wait: bool,
        /// Forward stdin lines to the target; a lone ESC or `~.` stops
        #[arg(long)]
        stdin: bool,
        /// TTY channel stdin is sent to
        #[arg(long, default_value_t = 0)]
        channel: u32,
        #[command(flatten)]
        wait: WaitArgs,
    },
}

#[derive(Subcommand, Debug)]
enum BdOp {
    Transfer { device: String, image: PathBuf },
    Format { device: String },
    Mount { device: String },
    Unmount { device: String },
}

#[derive(Args, Debug)]
struct TargetArg {
    /// Target number
    #[arg(long = "target", default_value_t = 0)]
    id: u32,
}

#[derive(Args, Debug)]
struct WaitArgs {
    /// Overall time limit
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Give up after this long without any notification
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
    /// What to do with pending operations on timeout
    #[arg(long, value_enum)]
    on_timeout: Option<OnTimeout>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum OnTimeout {
    Abandon,
    Cancel,
}

impl WaitArgs {
    /// Command line values override the configured ones
    fn options(&self, config: &Config, abort: &AbortHandle) -> anyhow::Result<WaitOptions> {
        let mut wait = WaitOptions::from_config(&config.timeouts);
        wait.abort = Some(abort.clone());
        if let Some(ms) = self.timeout_ms {
            wait.absolute_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = self.idle_timeout_ms {
            anyhow::ensure!(ms > 0, "--idle-timeout-ms must be at least 1");
            wait.idle_timeout = Some(Duration::from_millis(ms));
        }
        match self.on_timeout {
            Some(OnTimeout::Abandon) => wait.on_timeout = TimeoutPolicy::Abandon,
            Some(OnTimeout::Cancel) => wait.on_timeout = TimeoutPolicy::Cancel,
            None => {}
        }
        Ok(wait)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    if let Some(level) = cli.log_level {
        config.debug.log_level = level;
    }
    tm_core::logging::init(&config.debug);

    tracing::info!("Starting cell-tm (simulated target, latency {} kicks)", cli.sim_latency);

    let abort = install_interrupt_handler()?;
    let poll = PollLoop::new(PollSettings::from(&config.poll));
    let mut sim = SimTarget::new().with_latency(cli.sim_latency);
    let codes = &config.exit_codes;

    let code = match cli.command {
        Command::Sync {
            target,
            host_dir,
            target_dir,
            force,
            wait,
        } => {
            let mut command = SyncCommand::new(TargetId(target.id), host_dir, target_dir);
            command.force = force;
            command.wait = wait.options(&config, &abort)?;

            let report = command.run(&mut sim, &poll)?;
            for (path, err) in &report.initiation_failures {
                eprintln!("{}: not started: {}", path, err);
            }
            for handle in report.failed() {
                if let Some(result) = handle.result {
                    eprintln!("{}: failed: {}", handle.label, result);
                }
            }
            print_outcome(&report.poll);
            if let Some(worst) = report.worst_result.filter(|r| !r.is_ok()) {
                println!("worst result: {}", worst);
            }
            println!(
                "{} uploaded, {} skipped, {} failed, {} abandoned",
                report.uploaded(),
                report.skipped.len(),
                report.initiation_failures.len() + report.failed().count(),
                report.abandoned.len()
            );
            report.exit_code(codes)
        }
        Command::Bd { target, op, wait } => {
            let request = match op {
                BdOp::Transfer { device, image } => BdRequest::TransferImage { device, image },
                BdOp::Format { device } => BdRequest::Format { device },
                BdOp::Mount { device } => BdRequest::Mount { device },
                BdOp::Unmount { device } => BdRequest::Unmount { device },
            };
            let mut command = BdCommand::new(TargetId(target.id), request);
            command.wait = wait.options(&config, &abort)?;

            let report = command.run(&mut sim, &poll)?;
            print_outcome(&report.poll);
            if let Some(result) = report.result {
                println!("{} {}: {}", command.request.name(), command.request.device(), result);
            }
            report.exit_code(codes)
        }
        Command::Run {
            target,
            elf,
            args,
            abort_text,
            abort_is_failure,
            no_wait,
            stdin,
            channel,
            wait,
        } => {
            let mut command = RunCommand::new(TargetId(target.id), elf);
            command.args = args;
            command.input_channel = channel;
            command.wait_for_exit = !no_wait;
            command.abort_text = abort_text.map(|text| {
                let policy = if abort_is_failure {
                    AbortPolicy::Failure
                } else {
                    AbortPolicy::Success
                };
                (text, policy)
            });
            command.wait = wait.options(&config, &abort)?;

            let input: Option<Box<dyn InputSource>> = if stdin {
                Some(Box::new(StdinLines::spawn().context("failed to read stdin")?))
            } else {
                None
            };

            let report = command.run(&mut sim, &poll, std::io::stdout(), input)?;
            print_outcome(&report.poll);
            report.exit_code(codes)
        }
    };

    tracing::debug!("Exiting with code {}", code);
    std::process::exit(code)
}

/// Ctrl-C raises the returned handle; the running command stops at its next iteration
fn install_interrupt_handler() -> anyhow::Result<AbortHandle> {
    let abort = AbortHandle::new();
    let raised = abort.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupted, stopping");
        raised.abort();
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(abort)
}

fn print_outcome(report: &PollReport) {
    println!("cell-tm: {}", report.describe());
}
