//! kube-roll - rolling restart of the pods matching a label selector.
//!
//! This is the entry point for the `kube-roll` binary.

mod kubeconfig;
mod progress;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use kube_roll_directory::K8sPodDirectory;
use kube_roll_replacer::{
    CycleState, Progress, ReadinessMode, ReplacerError, Replacer, RetryPolicy, RollConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kubeconfig::resolve_kubeconfig;
use progress::ConsolePrinter;

/// Restart pods one at a time, waiting for each replacement to be running.
#[derive(Parser, Debug)]
#[command(name = "kube-roll")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the kubeconfig file.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Namespace containing the pods.
    #[arg(long, env = "KUBE_ROLL_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Label selector choosing the pods, e.g. `run=hello`.
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    label: String,

    /// Seconds between polls.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Maximum seconds for each wait; 0 waits forever.
    #[arg(long, default_value_t = 600)]
    timeout: u64,

    /// Require at least one new running pod before moving on.
    #[arg(long, default_value = "false")]
    strict: bool,

    /// Attempts per API call for transient errors.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    retries: u32,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,
}

impl Args {
    fn roll_config(&self) -> RollConfig {
        RollConfig {
            namespace: self.namespace.clone(),
            label_selector: self.label.clone(),
            poll_interval_seconds: self.interval,
            wait_timeout_seconds: self.timeout,
            readiness: if self.strict {
                ReadinessMode::Strict
            } else {
                ReadinessMode::Lenient
            },
            retry: RetryPolicy {
                max_attempts: self.retries,
                ..RetryPolicy::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors exit with status 2 before any API call
    let args = Args::parse();

    init_tracing(args.debug);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Logs go to stderr so stdout carries only progress text.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("kube_roll=debug,kube_roll_replacer=debug,kube_roll_directory=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ReplacerError>()
        .map_or(1, ReplacerError::exit_code)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.roll_config();
    config.validate()?;

    let kubeconfig = resolve_kubeconfig(
        args.kubeconfig,
        std::env::var_os("KUBECONFIG").is_some(),
        dirs::home_dir().as_deref(),
    );
    let directory = K8sPodDirectory::from_kubeconfig(kubeconfig.as_deref())
        .await
        .context("failed to create Kubernetes client")?;

    let printer = Arc::new(ConsolePrinter::new(io::stdout()));
    printer.header(&config.label_selector, &config.namespace);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping");
            signal_token.cancel();
        }
    });

    let mut replacer = Replacer::new(Arc::new(directory), config)
        .with_observer(printer.clone())
        .with_cancellation(cancel);

    match replacer.run().await {
        Ok(report) => {
            info!(
                deletions = report.deletions,
                finalized = report.finalized.len(),
                elapsed_secs = (report.finished_at - report.started_at).num_seconds(),
                "Rolling replacement complete"
            );
            printer.line(&format!("--> Replaced {} pod(s)", report.deletions));
            Ok(())
        }
        Err(err) => {
            print_partial(&printer, &replacer.progress(), &err);
            Err(err.into())
        }
    }
}

fn print_partial<W: io::Write + Send>(
    printer: &ConsolePrinter<W>,
    progress: &Progress,
    err: &ReplacerError,
) {
    // Terminate a pending line of poll dots
    if progress
        .active
        .as_ref()
        .is_some_and(|active| active.state == CycleState::WaitingForTermination)
    {
        printer.line("");
    }

    printer.line(&format!(
        "--> Stopped after {} of {} pod(s)",
        progress.completed.len(),
        progress.initial.len()
    ));
    if let Some(active) = &progress.active {
        printer.line(&format!("    in progress: {} ({})", active.pod, active.state));
    }
    if !progress.remaining.is_empty() {
        printer.line(&format!("    remaining: {}", progress.remaining.join(", ")));
    }
    if !progress.finalized.is_empty() {
        printer.line(&format!("    replacements: {}", progress.finalized.join(", ")));
    }
    if err.is_retriable() {
        printer.line("    the failure looks transient; re-running may succeed");
    }
}
