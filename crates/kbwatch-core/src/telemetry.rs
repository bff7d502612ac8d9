//! Centralised tracing initialisation for kbwatch binaries.
//!
//! [`TelemetryConfig`] is built from the `[logging]` section plus command
//! line overrides, then handed to [`init_tracing`] once at program start.
//! Console output is plain or JSON; an optional second layer writes
//! plain-text lines to a rolling log file for unattended (cron) runs.
//!
//! Safe to call more than once; subsequent calls are silently ignored
//! (the global subscriber can only be set once per process).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{ConfigError, LoggingSection};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("cannot open log file under {}: {source}", directory.display())]
    LogFile {
        directory: PathBuf,
        #[source]
        source: InitError,
    },
}

/// How often the log file rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl LogRotation {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "hourly" => Some(Self::Hourly),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    fn rotation(self) -> Rotation {
        match self {
            Self::Daily => Rotation::DAILY,
            Self::Hourly => Rotation::HOURLY,
            Self::Never => Rotation::NEVER,
        }
    }
}

/// Where the file layer writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub directory: PathBuf,
    pub prefix: String,
    pub suffix: Option<String>,
    pub rotation: LogRotation,
    pub max_files: usize,
}

impl LogFile {
    /// Split `logs/kbwatch.log` into directory `logs`, prefix `kbwatch` and
    /// suffix `log`.
    pub fn from_path(path: &Path, rotation: LogRotation, max_files: usize) -> Self {
        let directory = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "kbwatch".to_string());
        let suffix = path
            .extension()
            .map(|s| s.to_string_lossy().into_owned());
        Self {
            directory,
            prefix,
            suffix,
            rotation,
            max_files,
        }
    }

    /// Open (creating the directory if needed) the rolling appender.
    pub fn appender(&self) -> Result<RollingFileAppender, TelemetryError> {
        let mut builder = RollingFileAppender::builder()
            .rotation(self.rotation.rotation())
            .filename_prefix(&self.prefix)
            .max_log_files(self.max_files.max(1));
        if let Some(suffix) = &self.suffix {
            builder = builder.filename_suffix(suffix);
        }
        builder
            .build(&self.directory)
            .map_err(|source| TelemetryError::LogFile {
                directory: self.directory.clone(),
                source,
            })
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Default verbosity when `RUST_LOG` is not set.
    pub level: Level,
    /// Emit newline-delimited JSON on the console.
    pub json: bool,
    pub file: Option<LogFile>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            file: None,
        }
    }
}

impl TelemetryConfig {
    pub fn from_section(section: &LoggingSection) -> Result<Self, ConfigError> {
        let level = parse_level(&section.level).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown log level {:?}", section.level))
        })?;
        let rotation = LogRotation::parse(&section.rotation).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown log rotation {:?}", section.rotation))
        })?;
        let file = section
            .file
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| LogFile::from_path(Path::new(f), rotation, section.max_files));
        Ok(Self {
            level,
            json: section.json,
            file,
        })
    }

    /// `--verbose` forces debug; `--json` can only switch JSON on.
    pub fn with_overrides(mut self, verbose: bool, json: bool) -> Self {
        if verbose {
            self.level = Level::DEBUG;
        }
        self.json |= json;
        self
    }
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set. Fails only when the log
/// file cannot be opened.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let console = if config.json {
        fmt::layer().with_target(false).json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };
    let file = match &config.file {
        Some(log_file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(log_file.appender()?),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(env_filter)
        .try_init()
        .ok();
    Ok(())
}

/// Parse a configured level name ("info", "DEBUG", ...).
pub fn parse_level(name: &str) -> Option<Level> {
    Level::from_str(name.trim()).ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_level_names_case_insensitively() {
        assert_eq!(parse_level("info"), Some(Level::INFO));
        assert_eq!(parse_level(" WARN "), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn section_without_file_logs_to_console_only() {
        let config = TelemetryConfig::from_section(&LoggingSection::default()).unwrap();
        assert_eq!(config, TelemetryConfig::default());
    }

    #[test]
    fn flags_override_section() {
        let section = LoggingSection {
            level: "warn".to_string(),
            ..LoggingSection::default()
        };
        let config = TelemetryConfig::from_section(&section).unwrap();
        assert_eq!(config.level, Level::WARN);

        let config = config.with_overrides(true, true);
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.json);

        let quiet = TelemetryConfig::from_section(&section)
            .unwrap()
            .with_overrides(false, false);
        assert_eq!(quiet.level, Level::WARN);
        assert!(!quiet.json);
    }

    #[test]
    fn file_path_is_split_for_the_appender() {
        let section = LoggingSection {
            file: Some("logs/kbwatch.log".to_string()),
            rotation: "Hourly".to_string(),
            max_files: 3,
            ..LoggingSection::default()
        };
        let file = TelemetryConfig::from_section(&section).unwrap().file.unwrap();
        assert_eq!(file.directory, PathBuf::from("logs"));
        assert_eq!(file.prefix, "kbwatch");
        assert_eq!(file.suffix.as_deref(), Some("log"));
        assert_eq!(file.rotation, LogRotation::Hourly);
        assert_eq!(file.max_files, 3);

        let bare = LogFile::from_path(Path::new("monitor"), LogRotation::Never, 1);
        assert_eq!(bare.directory, PathBuf::from("."));
        assert_eq!(bare.suffix, None);
    }

    #[test]
    fn unknown_rotation_is_rejected() {
        let section = LoggingSection {
            rotation: "weekly".to_string(),
            ..LoggingSection::default()
        };
        assert!(TelemetryConfig::from_section(&section).is_err());
    }

    #[test]
    fn appender_creates_directory_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let file = LogFile::from_path(&log_dir.join("kbwatch.log"), LogRotation::Daily, 2);

        let mut appender = file.appender().unwrap();
        appender.write_all(b"run finished\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(&log_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("kbwatch."));
        assert!(names[0].ends_with(".log"));
    }

    #[test]
    fn init_twice_is_harmless() {
        init_tracing(&TelemetryConfig::default()).unwrap();
        init_tracing(&TelemetryConfig {
            json: true,
            level: Level::DEBUG,
            file: None,
        })
        .unwrap();
    }
}
