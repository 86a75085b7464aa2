mod activity;
mod config;
mod escalation;
mod recorder;
mod signals;
mod status;
mod supervisor;
mod termination;
mod watchdog;

use clap::{CommandFactory, Parser};
use config::{HangmanConfig, Overrides, RunConfig};
use escalation::{EscalationPolicy, Escalator};
use recorder::EventRecorder;
use status::TitleStatus;
use std::path::PathBuf;
use std::time::Duration;
use termination::ProcessGroupTermination;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use watchdog::{Watchdog, WatchdogOutcome};

/// Exit code for an unreadable or invalid config file, matching clap's usage errors.
const EXIT_USAGE: i32 = 2;
/// Exit code when waiting on the child fails.
const EXIT_WAIT_FAILED: i32 = 1;

/// How long to let the output pumps flush after the child exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Monitor a command line process and kill it if it stops writing output.
///
/// If nothing arrives on the child's stdout or stderr within the timeout, it
/// is sent an interrupt (Ctrl-C), then forcibly killed after a grace period.
#[derive(Parser, Debug)]
#[command(
    name = "hangman",
    version,
    about,
    after_help = "Any additional arguments are passed through to the executable.\n\
                  Everything from the first pass-through argument on is forwarded, \
                  hangman options included: put hangman options first, or separate \
                  the executable's arguments with `--`."
)]
pub struct Cli {
    /// Executable process to run
    #[arg(long, value_name = "EXECUTABLE")]
    file: PathBuf,

    /// Seconds without output before the process is interrupted (default: 600)
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Seconds between the interrupt and the forced kill; 0 kills at the timeout (default: 10)
    #[arg(long, value_name = "SECONDS")]
    grace_period: Option<u64>,

    /// Append process terminations to this file
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Config file with [watchdog] and [log] settings
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Extra logging (watchdog ticks, status changes)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Arguments passed through to the executable
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    if std::env::args_os().len() <= 1 {
        let _ = Cli::command().print_help();
        println!();
        return;
    }

    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let file_config = match &cli.config {
        Some(path) => match HangmanConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "could not load config");
                return EXIT_USAGE;
            }
        },
        None => HangmanConfig::default(),
    };

    let config = RunConfig::resolve(
        cli.file,
        cli.args,
        file_config,
        Overrides {
            timeout_secs: cli.timeout,
            grace_period_secs: cli.grace_period,
            log_file: cli.log,
        },
    );
    tracing::debug!(?config, "resolved configuration");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    // Take over SIGINT before the child exists so an early Ctrl-C can't
    // kill the watchdog and orphan it.
    let listener = signals::spawn_interrupt_listener(events_tx.clone());

    let mut process = match supervisor::launch(&config, events_tx) {
        Ok(process) => process,
        Err(e) => {
            tracing::error!(error = %e, "could not launch process");
            listener.abort();
            return e.exit_code();
        }
    };

    let recorder = EventRecorder::new(config.log_file.clone());
    match recorder.path() {
        Some(path) => tracing::info!(path = %path.display(), "recording escalations"),
        None => tracing::debug!("no log file, escalations reported on console only"),
    }
    let termination = ProcessGroupTermination::new(process.pid());
    tracing::debug!(
        pgid = termination.pgid(),
        timeout_secs = config.timeout_secs,
        grace_period_secs = config.grace_period_secs,
        "watching process group"
    );

    let mut watchdog = Watchdog::new(
        Escalator::new(EscalationPolicy {
            timeout_secs: config.timeout_secs,
            grace_period_secs: config.grace_period_secs,
            warn_after_secs: config.warn_after_secs,
        }),
        recorder,
        Box::new(termination),
        TitleStatus::new(process.display_name(), config.warn_after_secs),
        config.check_interval,
    );

    let outcome = watchdog.run(&mut process, &mut events_rx).await;
    listener.abort();

    match outcome {
        Ok(outcome @ WatchdogOutcome::Exited { .. }) => {
            process.drain_output(DRAIN_TIMEOUT).await;
            outcome.exit_code()
        }
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            tracing::error!(error = %e, "lost track of monitored process");
            EXIT_WAIT_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_file_is_required() {
        assert!(Cli::try_parse_from(["hangman", "--timeout", "5"]).is_err());
    }

    #[test]
    fn test_minimal_invocation() {
        let cli = Cli::try_parse_from(["hangman", "--file", "make"]).unwrap();
        assert_eq!(cli.file, PathBuf::from("make"));
        assert!(cli.timeout.is_none());
        assert!(cli.log.is_none());
        assert!(cli.args.is_empty());
    }

    #[test]
    fn test_options_and_passthrough_after_separator() {
        let cli = Cli::try_parse_from([
            "hangman",
            "--file",
            "make",
            "--timeout",
            "5",
            "--log",
            "hangs.log",
            "--",
            "-j4",
            "--log",
            "inner.log",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Some(5));
        assert_eq!(cli.log, Some(PathBuf::from("hangs.log")));
        assert_eq!(cli.args, vec!["-j4", "--log", "inner.log"]);
    }

    #[test]
    fn test_trailing_args_without_separator() {
        let cli = Cli::try_parse_from(["hangman", "--file", "make", "all", "-j4"]).unwrap();
        assert_eq!(cli.args, vec!["all", "-j4"]);
    }

    #[test]
    fn test_options_after_pass_through_are_forwarded() {
        let cli =
            Cli::try_parse_from(["hangman", "--file", "make", "all", "--timeout", "5"]).unwrap();
        assert!(cli.timeout.is_none());
        assert_eq!(cli.args, vec!["all", "--timeout", "5"]);

        let help = Cli::command().render_help().to_string();
        assert!(help.contains("forwarded"));
        assert!(help.contains("`--`"));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["hangman", "--file", "x", "-v", "-q"]).is_err());
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        assert!(Cli::try_parse_from(["hangman", "--file", "x", "--timeout", "soon"]).is_err());
    }
}
