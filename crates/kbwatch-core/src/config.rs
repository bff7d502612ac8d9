//! Application configuration.
//!
//! Loaded from an optional TOML file layered over built-in defaults, then
//! overridden by `KBWATCH_<SECTION>__<KEY>` environment variables. Secrets
//! never live here; see [`crate::secret`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::{default_link_selectors, LoginSettings};
use crate::backoff::{BackoffPolicy, MAX_BACKOFF};
use crate::domain::RowSelector;
use crate::evidence::{EvidenceSettings, ScreenshotFormat};
use crate::retry_engine::RemediationPolicy;
use crate::scan::{default_header_labels, ScanSettings};
use crate::telemetry::{parse_level, LogRotation};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "KBWATCH_";

/// Longest configurable settle or step delay, in seconds.
pub const MAX_WAIT_SECS: f64 = 3600.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid value for {key}: {value:?}")]
    Env { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    pub base_url: String,
    pub scan_url: Option<String>,
    pub navigation_path: Vec<String>,
    pub failure_markers: Vec<String>,
    pub header_labels: Vec<String>,
    pub link_selectors: Vec<String>,
    pub step_delay_secs: f64,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            base_url: "https://admin.gbase.ai".to_string(),
            scan_url: None,
            navigation_path: vec![
                "関連ナレッジベース".to_string(),
                "ファイルとドキュメント".to_string(),
            ],
            failure_markers: ["失敗", "エラー", "error", "failed"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            header_labels: default_header_labels(),
            link_selectors: default_link_selectors(),
            step_delay_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub first_cell_selector: String,
    pub settle_after_navigation_secs: f64,
    pub row_selectors: Vec<RowSelector>,
}

impl Default for ScanSection {
    fn default() -> Self {
        let scan = ScanSettings::default();
        Self {
            first_cell_selector: scan.first_cell_selector,
            settle_after_navigation_secs: scan.settle_after_navigation.as_secs_f64(),
            row_selectors: scan.row_selectors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationSection {
    pub enabled: bool,
    pub max_attempts: u32,
    pub settle_secs: f64,
    pub menu_open_delay_ms: u64,
    pub menu_selectors: Vec<String>,
    pub action_selectors: Vec<String>,
    pub action_labels: Vec<String>,
}

impl Default for RemediationSection {
    fn default() -> Self {
        let policy = RemediationPolicy::default();
        Self {
            enabled: true,
            max_attempts: policy.max_attempts,
            settle_secs: policy.settle.as_secs_f64(),
            menu_open_delay_ms: policy.menu_open_delay.as_millis() as u64,
            menu_selectors: policy.menu_selectors,
            action_selectors: policy.action_selectors,
            action_labels: policy.action_labels.terms().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub backoff_base: f64,
    pub initial_delay_secs: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            backoff_base: policy.backoff_base,
            initial_delay_secs: policy.initial_delay.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub headless: bool,
    pub chrome_executable: Option<String>,
    pub window_width: u32,
    pub window_height: u32,
    pub navigation_timeout_secs: u64,
    pub element_timeout_secs: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            window_width: 1920,
            window_height: 1080,
            navigation_timeout_secs: 60,
            element_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSection {
    pub username_selectors: Vec<String>,
    pub password_selectors: Vec<String>,
    pub submit_selectors: Vec<String>,
    pub pending_url_markers: Vec<String>,
    pub completion_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LoginSection {
    fn default() -> Self {
        let login = LoginSettings::default();
        Self {
            username_selectors: login.username_selectors,
            password_selectors: login.password_selectors,
            submit_selectors: login.submit_selectors,
            pending_url_markers: login.pending_url_markers,
            completion_timeout_secs: login.completion_timeout.as_secs(),
            poll_interval_ms: login.poll_interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceSection {
    pub directory: String,
    pub prefix: String,
    pub format: String,
    pub cell_selector: String,
    pub hover_delay_ms: u64,
    pub tooltip_selectors: Vec<String>,
}

impl Default for EvidenceSection {
    fn default() -> Self {
        let evidence = EvidenceSettings::default();
        Self {
            directory: evidence.directory.to_string_lossy().into_owned(),
            prefix: evidence.prefix,
            format: evidence.format.extension().to_string(),
            cell_selector: evidence.cell_selector,
            hover_delay_ms: evidence.hover_delay.as_millis() as u64,
            tooltip_selectors: evidence.tooltip_selectors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,

    /// Also write plain-text logs under this path (`logs/kbwatch.log`
    /// rolls to `logs/kbwatch.<date>.log`). Off when unset.
    pub file: Option<String>,

    /// `daily`, `hourly` or `never`.
    pub rotation: String,

    /// Rolled files kept before the oldest is deleted.
    pub max_files: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
            rotation: "daily".to_string(),
            max_files: 5,
        }
    }
}

/// Settings for the Lark/Feishu sink. Credentials come from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LarkSection {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub title: String,
    pub timezone_label: String,
    pub utc_offset_hours: i32,

    /// Open API host; derived from the webhook host when unset.
    pub api_base: Option<String>,
}

impl Default for LarkSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
            title: "KB Monitor Report".to_string(),
            timezone_label: "Asia/Tokyo".to_string(),
            utc_offset_hours: 9,
            api_base: None,
        }
    }
}

/// Full configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitoring: MonitoringSection,
    pub scan: ScanSection,
    pub remediation: RemediationSection,
    pub retry: RetrySection,
    pub browser: BrowserSection,
    pub login: LoginSection,
    pub evidence: EvidenceSection,
    pub logging: LoggingSection,
    pub lark: LarkSection,
}

impl AppConfig {
    /// Defaults, then `path` (if any), then process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, std::env::vars())
    }

    /// Like [`AppConfig::load`] with an explicit environment.
    pub fn load_with_env<I>(path: Option<&Path>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let file = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Some(toml::from_str::<toml::Table>(&content)?)
            }
            None => None,
        };
        Self::from_layers(file, env)
    }

    /// Parse TOML text layered over defaults, without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file = toml::from_str::<toml::Table>(content)?;
        Self::from_layers(Some(file), std::iter::empty())
    }

    fn from_layers<I>(file: Option<toml::Table>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut merged = match toml::Value::try_from(AppConfig::default())? {
            toml::Value::Table(table) => table,
            _ => return Err(ConfigError::Invalid("defaults are not a table".to_string())),
        };
        if let Some(file) = file {
            merge_tables(&mut merged, file);
        }
        apply_env_overrides(&mut merged, env)?;

        let config: AppConfig = toml::Value::Table(merged).try_into()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.monitoring.failure_markers.iter().all(|m| m.is_empty()) {
            return invalid("monitoring.failure_markers must not be empty");
        }
        if self.monitoring.base_url.trim().is_empty() {
            return invalid("monitoring.base_url must not be empty");
        }
        if self.scan.row_selectors.iter().all(|s| s.pattern.trim().is_empty()) {
            return invalid("scan.row_selectors must not be empty");
        }
        if self.remediation.max_attempts < 1 {
            return invalid("remediation.max_attempts must be at least 1");
        }
        if self.remediation.enabled && self.remediation.action_labels.iter().all(|l| l.is_empty()) {
            return invalid("remediation.action_labels must not be empty");
        }
        if self.retry.max_attempts < 1 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !(self.retry.backoff_base >= 1.0) {
            return invalid("retry.backoff_base must be >= 1");
        }
        let max_initial = MAX_BACKOFF.as_secs_f64();
        if !(0.0..=max_initial).contains(&self.retry.initial_delay_secs) {
            return invalid("retry.initial_delay_secs must be within 0..=60");
        }
        for (name, secs) in [
            ("scan.settle_after_navigation_secs", self.scan.settle_after_navigation_secs),
            ("remediation.settle_secs", self.remediation.settle_secs),
            ("monitoring.step_delay_secs", self.monitoring.step_delay_secs),
        ] {
            if !(0.0..=MAX_WAIT_SECS).contains(&secs) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within 0..={MAX_WAIT_SECS}"
                )));
            }
        }
        if ScreenshotFormat::parse(&self.evidence.format).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown screenshot format {:?} (expected png or jpeg)",
                self.evidence.format
            )));
        }
        if parse_level(&self.logging.level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown log level {:?}",
                self.logging.level
            )));
        }
        if LogRotation::parse(&self.logging.rotation).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown log rotation {:?} (expected daily, hourly or never)",
                self.logging.rotation
            )));
        }
        if self.logging.max_files < 1 {
            return invalid("logging.max_files must be at least 1");
        }
        Ok(())
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Recursively merge `overlay` into `base`. Non-table values replace.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply `KBWATCH_<SECTION>__<KEY>` overrides, coercing to the type of the
/// value being replaced. Lists are comma separated.
fn apply_env_overrides<I>(table: &mut toml::Table, env: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, raw) in env {
        let Some(path) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let parts: Vec<String> = path.to_lowercase().split("__").map(str::to_string).collect();
        let Some((leaf, parents)) = parts.split_last() else {
            continue;
        };
        if leaf.is_empty() {
            continue;
        }

        let mut current = &mut *table;
        for part in parents {
            let entry = current
                .entry(part.clone())
                .or_insert(toml::Value::Table(toml::Table::new()));
            current = match entry {
                toml::Value::Table(inner) => inner,
                _ => {
                    return Err(ConfigError::Env {
                        key: name.clone(),
                        value: raw.clone(),
                    })
                }
            };
        }

        let coerced = coerce(current.get(leaf.as_str()), &raw).ok_or_else(|| ConfigError::Env {
            key: name.clone(),
            value: raw.clone(),
        })?;
        current.insert(leaf.clone(), coerced);
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn coerce(existing: Option<&toml::Value>, raw: &str) -> Option<toml::Value> {
    use toml::Value;

    match existing {
        Some(Value::Boolean(_)) => parse_bool(raw).map(Value::Boolean),
        Some(Value::Integer(_)) => raw.trim().parse().ok().map(Value::Integer),
        Some(Value::Float(_)) => raw.trim().parse().ok().map(Value::Float),
        Some(Value::Array(_)) => Some(Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )),
        Some(Value::String(_)) => Some(Value::String(raw.to_string())),
        Some(_) => None,
        None => Some(match raw.trim() {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            trimmed => trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .unwrap_or_else(|_| Value::String(raw.to_string())),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.monitoring.failure_markers.len(), 4);
    }

    #[test]
    fn file_values_override_defaults_per_key() {
        let config = AppConfig::from_toml_str(
            r#"
            [monitoring]
            scan_url = "https://console.example/kb/files"

            [retry]
            initial_delay_secs = 0.5

            [[scan.row_selectors]]
            pattern = ".file-row"
            skip_leading = 1
            "#,
        )
        .unwrap();
        assert_eq!(
            config.monitoring.scan_url.as_deref(),
            Some("https://console.example/kb/files")
        );
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_secs, 0.5);
        assert_eq!(config.scan.row_selectors, vec![RowSelector::new(".file-row").skipping(1)]);
        assert_eq!(config.scan.first_cell_selector, "td:first-child");
    }

    #[test]
    fn env_overrides_are_typed_by_target_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kbwatch.toml");
        std::fs::write(&path, "[browser]\nheadless = true\n").unwrap();

        let config = AppConfig::load_with_env(
            Some(&path),
            env(&[
                ("KBWATCH_BROWSER__HEADLESS", "false"),
                ("KBWATCH_RETRY__MAX_ATTEMPTS", "5"),
                ("KBWATCH_RETRY__BACKOFF_BASE", "3"),
                ("KBWATCH_MONITORING__FAILURE_MARKERS", "失敗, failed"),
                ("KBWATCH_MONITORING__SCAN_URL", "https://console.example/x"),
                ("UNRELATED", "1"),
            ]),
        )
        .unwrap();
        assert!(!config.browser.headless);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_base, 3.0);
        assert_eq!(config.monitoring.failure_markers, vec!["失敗", "failed"]);
        assert_eq!(
            config.monitoring.scan_url.as_deref(),
            Some("https://console.example/x")
        );
    }

    #[test]
    fn bad_env_value_is_reported() {
        let err = AppConfig::load_with_env(None, env(&[("KBWATCH_RETRY__MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { ref key, .. } if key == "KBWATCH_RETRY__MAX_ATTEMPTS"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        for (toml, needle) in [
            ("[monitoring]\nfailure_markers = []", "failure_markers"),
            ("[scan]\nrow_selectors = []", "row_selectors"),
            ("[retry]\nmax_attempts = 0", "retry.max_attempts"),
            ("[retry]\nbackoff_base = 0.5", "backoff_base"),
            ("[retry]\ninitial_delay_secs = 90.0", "initial_delay"),
            ("[evidence]\nformat = \"gif\"", "screenshot format"),
            ("[logging]\nlevel = \"chatty\"", "log level"),
            ("[remediation]\nsettle_secs = 1e30", "remediation.settle_secs"),
            ("[scan]\nsettle_after_navigation_secs = -2.0", "settle_after_navigation_secs"),
            ("[monitoring]\nstep_delay_secs = 7200.0", "step_delay_secs"),
            ("[logging]\nrotation = \"weekly\"", "log rotation"),
            ("[logging]\nmax_files = 0", "max_files"),
        ] {
            let err = AppConfig::from_toml_str(toml).unwrap_err();
            assert!(err.to_string().contains(needle), "{toml}: {err}");
        }
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = AppConfig::load_with_env(Some(Path::new("/nonexistent/kbwatch.toml")), Vec::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn rendered_config_parses_back() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml_str(&text).unwrap(), config);
    }
}
