use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from an optional TOML file.
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct HangmanConfig {
    pub watchdog: WatchdogConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub timeout_secs: u64,
    pub grace_period_secs: u64,
    pub check_interval_ms: u64,
    pub warn_after_secs: u64,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub file: Option<PathBuf>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            grace_period_secs: 10,
            check_interval_ms: 1000,
            warn_after_secs: 9,
        }
    }
}

/// Errors from reading or parsing the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl HangmanConfig {
    /// Load config from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// CLI values that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub timeout_secs: Option<u64>,
    pub grace_period_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
}

/// Fully resolved settings for one watchdog run. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub grace_period_secs: u64,
    pub check_interval: Duration,
    pub warn_after_secs: u64,
    pub log_file: Option<PathBuf>,
}

impl RunConfig {
    /// Merge file config and CLI overrides into the settings for a run.
    pub fn resolve(
        program: PathBuf,
        args: Vec<String>,
        file: HangmanConfig,
        overrides: Overrides,
    ) -> Self {
        let watchdog = file.watchdog;
        Self {
            program,
            args,
            timeout_secs: overrides.timeout_secs.unwrap_or(watchdog.timeout_secs),
            grace_period_secs: overrides
                .grace_period_secs
                .unwrap_or(watchdog.grace_period_secs),
            // A zero interval would make tokio's interval panic.
            check_interval: Duration::from_millis(watchdog.check_interval_ms.max(1)),
            warn_after_secs: watchdog.warn_after_secs,
            log_file: overrides.log_file.or(file.log.file),
        }
    }

    /// Program name followed by its arguments, as shown in the status line.
    pub fn display_name(&self) -> String {
        let mut name = self.program.display().to_string();
        for arg in &self.args {
            name.push(' ');
            name.push_str(arg);
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HangmanConfig::default();
        assert_eq!(config.watchdog.timeout_secs, 600);
        assert_eq!(config.watchdog.grace_period_secs, 10);
        assert_eq!(config.watchdog.check_interval_ms, 1000);
        assert_eq!(config.watchdog.warn_after_secs, 9);
        assert!(config.log.file.is_none());
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hangman.toml");
        std::fs::write(&path, "[watchdog]\ntimeout_secs = 30\n").unwrap();

        let config = HangmanConfig::load(&path).unwrap();
        assert_eq!(config.watchdog.timeout_secs, 30);
        assert_eq!(config.watchdog.grace_period_secs, 10);
        assert!(config.log.file.is_none());
    }

    #[test]
    fn test_load_log_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hangman.toml");
        std::fs::write(&path, "[log]\nfile = \"/var/log/hangman.log\"\n").unwrap();

        let config = HangmanConfig::load(&path).unwrap();
        assert_eq!(
            config.log.file,
            Some(PathBuf::from("/var/log/hangman.log"))
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = HangmanConfig::load(Path::new("/nonexistent/hangman.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[watchdog\ntimeout_secs = ").unwrap();

        let err = HangmanConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("invalid config"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut file = HangmanConfig::default();
        file.watchdog.timeout_secs = 30;
        file.log.file = Some(PathBuf::from("from-file.log"));

        let run = RunConfig::resolve(
            PathBuf::from("make"),
            vec![],
            file,
            Overrides {
                timeout_secs: Some(5),
                grace_period_secs: Some(0),
                log_file: Some(PathBuf::from("from-cli.log")),
            },
        );
        assert_eq!(run.timeout_secs, 5);
        assert_eq!(run.grace_period_secs, 0);
        assert_eq!(run.log_file, Some(PathBuf::from("from-cli.log")));
    }

    #[test]
    fn test_file_values_used_without_overrides() {
        let mut file = HangmanConfig::default();
        file.watchdog.timeout_secs = 30;
        file.watchdog.check_interval_ms = 250;
        file.log.file = Some(PathBuf::from("from-file.log"));

        let run = RunConfig::resolve(PathBuf::from("make"), vec![], file, Overrides::default());
        assert_eq!(run.timeout_secs, 30);
        assert_eq!(run.check_interval, Duration::from_millis(250));
        assert_eq!(run.log_file, Some(PathBuf::from("from-file.log")));
    }

    #[test]
    fn test_zero_check_interval_clamped() {
        let mut file = HangmanConfig::default();
        file.watchdog.check_interval_ms = 0;
        let run = RunConfig::resolve(PathBuf::from("x"), vec![], file, Overrides::default());
        assert_eq!(run.check_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_display_name_joins_args() {
        let run = RunConfig::resolve(
            PathBuf::from("/usr/bin/make"),
            vec!["-j4".to_string(), "all".to_string()],
            HangmanConfig::default(),
            Overrides::default(),
        );
        assert_eq!(run.display_name(), "/usr/bin/make -j4 all");
    }
}
