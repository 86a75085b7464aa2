/// Escalation audit log: one appended line per interrupt or kill.
///
/// Logging is best-effort. A failure to write is reported on the console and
/// otherwise ignored so it can never hold up the escalation itself.
use crate::escalation::EscalationAction;
use chrono::{DateTime, Local};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attempts at taking the log lock before giving up on the line.
const LOCK_ATTEMPTS: u32 = 5;
/// Pause between lock attempts. Bounds the worst-case stall to ~100ms.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// A single escalation, as written to the log.
#[derive(Debug, Clone)]
pub struct EscalationRecord {
    pub timestamp: DateTime<Local>,
    pub action: EscalationAction,
    pub process_name: String,
    pub pid: u32,
}

impl EscalationRecord {
    /// Record an escalation happening now.
    pub fn now(action: EscalationAction, process_name: &str, pid: u32) -> Self {
        Self {
            timestamp: Local::now(),
            action,
            process_name: process_name.to_string(),
            pid,
        }
    }
}

impl std::fmt::Display for EscalationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} : Sent {} signal to process '{}' (PID: {})",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.action.signal_name(),
            self.process_name,
            self.pid
        )
    }
}

/// Errors from appending to the log file.
#[derive(Debug)]
pub enum LogWriteError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LogWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogWriteError::Open { path, source } => {
                write!(f, "failed to open log {}: {}", path.display(), source)
            }
            LogWriteError::Lock { path, source } => {
                write!(f, "failed to lock log {}: {}", path.display(), source)
            }
            LogWriteError::Write { path, source } => {
                write!(f, "failed to write log {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for LogWriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogWriteError::Open { source, .. } => Some(source),
            LogWriteError::Lock { source, .. } => Some(source),
            LogWriteError::Write { source, .. } => Some(source),
        }
    }
}

/// Append one record as a line, creating the file if needed.
///
/// Holds an exclusive advisory lock for the duration of the write so that
/// several watchdogs sharing one log never interleave partial lines. The lock
/// is only tried a few times: a log held by someone else costs the line, never
/// the escalation.
pub fn append_record(path: &Path, record: &EscalationRecord) -> Result<(), LogWriteError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LogWriteError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

    try_lock_bounded(&file).map_err(|e| LogWriteError::Lock {
        path: path.to_path_buf(),
        source: e,
    })?;

    let line = format!("{record}\n");
    let written = file.write_all(line.as_bytes()).map_err(|e| LogWriteError::Write {
        path: path.to_path_buf(),
        source: e,
    });

    // Closing the file drops the lock anyway; unlock errors are irrelevant.
    let _ = FileExt::unlock(&file);
    written
}

fn try_lock_bounded(file: &std::fs::File) -> std::io::Result<()> {
    let contended = fs2::lock_contended_error().raw_os_error();
    let mut attempt = 1;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if e.raw_os_error() == contended && attempt < LOCK_ATTEMPTS => {
                attempt += 1;
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Best-effort recorder bound to the optional `--log` path.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    path: Option<PathBuf>,
}

impl EventRecorder {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append the record if a log file is configured. Returns whether the
    /// line was written; failures are reported and swallowed.
    pub fn record(&self, record: &EscalationRecord) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        match append_record(path, record) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "escalation recorded");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not record escalation, continuing");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_record(action: EscalationAction) -> EscalationRecord {
        EscalationRecord {
            timestamp: Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap(),
            action,
            process_name: "make".to_string(),
            pid: 4242,
        }
    }

    #[test]
    fn test_record_line_format() {
        let line = fixed_record(EscalationAction::Interrupt).to_string();
        assert_eq!(
            line,
            "2024-03-07 14:05:09 : Sent CtrlC signal to process 'make' (PID: 4242)"
        );
        let line = fixed_record(EscalationAction::Kill).to_string();
        assert_eq!(
            line,
            "2024-03-07 14:05:09 : Sent Kill signal to process 'make' (PID: 4242)"
        );
    }

    #[test]
    fn test_append_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hangman.log");

        append_record(&path, &fixed_record(EscalationAction::Kill)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn test_append_preserves_order_and_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hangman.log");
        std::fs::write(&path, "earlier line\n").unwrap();

        append_record(&path, &fixed_record(EscalationAction::Interrupt)).unwrap();
        append_record(&path, &fixed_record(EscalationAction::Kill)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "earlier line");
        assert!(lines[1].contains("Sent CtrlC"));
        assert!(lines[2].contains("Sent Kill"));
    }

    #[test]
    fn test_append_missing_directory_errors() {
        let err = append_record(
            Path::new("/nonexistent-dir/impossible/hangman.log"),
            &fixed_record(EscalationAction::Kill),
        )
        .unwrap_err();
        assert!(matches!(err, LogWriteError::Open { .. }));
    }

    #[test]
    fn test_append_gives_up_on_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hangman.log");
        let holder = std::fs::File::create(&path).unwrap();
        holder.lock_exclusive().unwrap();

        let start = std::time::Instant::now();
        let err = append_record(&path, &fixed_record(EscalationAction::Kill)).unwrap_err();
        assert!(matches!(err, LogWriteError::Lock { .. }));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        FileExt::unlock(&holder).unwrap();
        append_record(&path, &fixed_record(EscalationAction::Kill)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_recorder_without_path_writes_nothing() {
        let recorder = EventRecorder::new(None);
        assert!(recorder.path().is_none());
        assert!(!recorder.record(&fixed_record(EscalationAction::Kill)));
    }

    #[test]
    fn test_recorder_swallows_write_failure() {
        let recorder = EventRecorder::new(Some(PathBuf::from(
            "/nonexistent-dir/impossible/hangman.log",
        )));
        assert!(!recorder.record(&fixed_record(EscalationAction::Interrupt)));
    }

    #[test]
    fn test_recorder_appends_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let recorder = EventRecorder::new(Some(path.clone()));

        assert!(recorder.record(&EscalationRecord::now(
            EscalationAction::Interrupt,
            "sleep",
            99
        )));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Sent CtrlC signal to process 'sleep' (PID: 99)"));
    }
}
