/// Signal delivery to the monitored process group.
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Errors from delivering a termination signal.
#[derive(Debug)]
pub enum SignalError {
    /// Refused to signal a protected or invalid process group.
    InvalidTarget { pgid: i32 },
    /// The kill call itself failed (e.g. ESRCH when the group is gone).
    Delivery {
        signal: Signal,
        pgid: i32,
        source: Errno,
    },
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalError::InvalidTarget { pgid } => {
                write!(f, "refusing to signal process group {pgid}")
            }
            SignalError::Delivery {
                signal,
                pgid,
                source,
            } => write!(
                f,
                "failed to send {} to process group {}: {}",
                signal.as_str(),
                pgid,
                source
            ),
        }
    }
}

impl std::error::Error for SignalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignalError::InvalidTarget { .. } => None,
            SignalError::Delivery { source, .. } => Some(source),
        }
    }
}

/// Capability to end the monitored child, gently or not.
pub trait TerminationChannel: Send {
    /// Ask the child to shut down (it may catch this).
    fn request_graceful(&self) -> Result<(), SignalError>;

    /// Terminate the child unconditionally.
    fn force_kill(&self) -> Result<(), SignalError>;
}

/// Signals the whole process group the child leads.
///
/// The child is spawned with `process_group(0)`, so its pid is also its
/// group id and any grandchildren it forks share the group.
#[derive(Debug, Clone, Copy)]
pub struct ProcessGroupTermination {
    pgid: i32,
}

impl ProcessGroupTermination {
    pub fn new(pid: u32) -> Self {
        Self {
            pgid: i32::try_from(pid).unwrap_or(0),
        }
    }

    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    fn send(&self, sig: Signal) -> Result<(), SignalError> {
        // killpg(0) would hit our own group and killpg(1) every process we may signal.
        if self.pgid <= 1 {
            return Err(SignalError::InvalidTarget { pgid: self.pgid });
        }
        signal::killpg(Pid::from_raw(self.pgid), sig).map_err(|e| SignalError::Delivery {
            signal: sig,
            pgid: self.pgid,
            source: e,
        })
    }
}

impl TerminationChannel for ProcessGroupTermination {
    fn request_graceful(&self) -> Result<(), SignalError> {
        self.send(Signal::SIGINT)
    }

    fn force_kill(&self) -> Result<(), SignalError> {
        self.send(Signal::SIGKILL)
    }
}
