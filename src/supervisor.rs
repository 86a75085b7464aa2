/// Child process lifecycle: spawn the command with piped output, pump every
/// line through to the console while reporting it as activity, wait for exit.
use crate::config::RunConfig;
use crate::watchdog::WatchdogEvent;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Exit code when the executable does not exist.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code when the executable exists but cannot be run.
pub const EXIT_CANNOT_EXECUTE: i32 = 126;
/// Exit code for any other failure to start the child.
pub const EXIT_LAUNCH_FAILED: i32 = 125;

/// Errors that can occur while starting the child.
#[derive(Debug)]
pub enum LaunchError {
    /// The executable could not be found.
    NotFound {
        program: PathBuf,
        source: std::io::Error,
    },
    /// The executable exists but we may not run it.
    PermissionDenied {
        program: PathBuf,
        source: std::io::Error,
    },
    /// Any other spawn failure.
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
}

impl LaunchError {
    fn from_spawn(program: PathBuf, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => LaunchError::NotFound { program, source },
            std::io::ErrorKind::PermissionDenied => {
                LaunchError::PermissionDenied { program, source }
            }
            _ => LaunchError::Spawn { program, source },
        }
    }

    /// Exit code the watchdog returns for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::NotFound { .. } => EXIT_NOT_FOUND,
            LaunchError::PermissionDenied { .. } => EXIT_CANNOT_EXECUTE,
            LaunchError::Spawn { .. } => EXIT_LAUNCH_FAILED,
        }
    }
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::NotFound { program, source } => {
                write!(f, "executable not found: {}: {}", program.display(), source)
            }
            LaunchError::PermissionDenied { program, source } => {
                write!(f, "cannot execute {}: {}", program.display(), source)
            }
            LaunchError::Spawn { program, source } => {
                write!(f, "failed to start {}: {}", program.display(), source)
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::NotFound { source, .. } => Some(source),
            LaunchError::PermissionDenied { source, .. } => Some(source),
            LaunchError::Spawn { source, .. } => Some(source),
        }
    }
}

/// The running child and the tasks pumping its output.
#[derive(Debug)]
pub struct MonitoredProcess {
    child: Child,
    pid: u32,
    process_name: String,
    display_name: String,
    pumps: Vec<JoinHandle<()>>,
}

impl MonitoredProcess {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Executable name without directory or extension, as logged.
    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Program plus arguments, as shown in the status line.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Wait for the child to exit. Cancel-safe, so it can sit in a `select!`.
    pub async fn wait_for_exit(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Give the output pumps a moment to flush what the child wrote before it
    /// exited. Pumps still blocked after `timeout` (e.g. a grandchild holding
    /// the pipe open) are abandoned.
    pub async fn drain_output(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        for pump in self.pumps.drain(..) {
            let abort = pump.abort_handle();
            if tokio::time::timeout_at(deadline, pump).await.is_err() {
                tracing::debug!("output pump still busy after exit, abandoning");
                abort.abort();
            }
        }
    }
}

/// Start the configured program with stdout/stderr captured.
///
/// The child gets its own process group so escalation signals reach any
/// helpers it forks, and so the terminal's Ctrl-C reaches only the
/// watchdog, which decides what to forward. Stdin is closed: a background
/// process group reading the terminal would be stopped by SIGTTIN.
pub fn launch(
    config: &RunConfig,
    events: UnboundedSender<WatchdogEvent>,
) -> Result<MonitoredProcess, LaunchError> {
    tracing::info!(
        program = %config.program.display(),
        args = ?config.args,
        "launching monitored process"
    );

    let mut child = Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(false)
        .spawn()
        .map_err(|e| LaunchError::from_spawn(config.program.clone(), e))?;

    let pid = child.id().unwrap_or(0);
    tracing::info!(pid, "monitored process started");

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump_lines(
            stdout,
            tokio::io::stdout(),
            events.clone(),
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump_lines(stderr, tokio::io::stderr(), events)));
    }

    Ok(MonitoredProcess {
        child,
        pid,
        process_name: process_name(config),
        display_name: config.display_name(),
        pumps,
    })
}

fn process_name(config: &RunConfig) -> String {
    config
        .program
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.program.display().to_string())
}

/// Copy `reader` to `writer` line by line, reporting each line as activity
/// before writing it out so a slow console can't delay the timestamp.
///
/// Works on raw bytes so non-UTF-8 output is forwarded untouched.
async fn pump_lines<R, W>(reader: R, mut writer: W, events: UnboundedSender<WatchdogEvent>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                // The receiver only goes away once the watchdog has finished.
                let _ = events.send(WatchdogEvent::ActivityObserved { at: Instant::now() });
                if writer.write_all(&line).await.is_err() || writer.flush().await.is_err() {
                    // Console gone; keep draining so the child never blocks on a full pipe.
                    continue;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "error reading child output");
                break;
            }
        }
    }
}

/// Map a child exit status to the watchdog's own exit code.
///
/// A child killed by a signal reports `128 + signal`, as a shell would.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => 1,
    }
}
