//! Immutable per-run context.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::access::{LoginSettings, TargetSurface};
use crate::backoff::BackoffPolicy;
use crate::classifier::{MarkerSet, SynonymSet};
use crate::config::{AppConfig, ConfigError};
use crate::evidence::{EvidenceSettings, ScreenshotFormat};
use crate::retry_engine::RemediationPolicy;
use crate::scan::ScanSettings;
use crate::secret::Credentials;

/// Everything one run needs, built once and passed explicitly.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub target: TargetSurface,
    pub markers: MarkerSet,
    pub backoff: BackoffPolicy,
    pub remediation: RemediationPolicy,
    pub remediation_enabled: bool,
    pub scan: ScanSettings,
    pub evidence: EvidenceSettings,
    pub login: LoginSettings,
    pub credentials: Option<Credentials>,
    pub navigation_timeout: Duration,
}

impl RunContext {
    /// Context with default policies against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            target: TargetSurface::new(base_url),
            markers: SynonymSet::new(["失敗", "エラー", "error", "failed"]),
            backoff: BackoffPolicy::default(),
            remediation: RemediationPolicy::default(),
            remediation_enabled: true,
            scan: ScanSettings::default(),
            evidence: EvidenceSettings::default(),
            login: LoginSettings::default(),
            credentials: None,
            navigation_timeout: Duration::from_secs(60),
        }
    }

    /// Build a fresh context (new run id and start time) from configuration.
    pub fn from_config(
        config: &AppConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self, ConfigError> {
        let format = ScreenshotFormat::parse(&config.evidence.format).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown screenshot format {:?}", config.evidence.format))
        })?;

        let monitoring = &config.monitoring;
        let target = TargetSurface {
            base_url: monitoring.base_url.clone(),
            scan_url: monitoring.scan_url.clone().filter(|u| !u.trim().is_empty()),
            navigation_path: monitoring.navigation_path.clone(),
            link_selectors: monitoring.link_selectors.clone(),
            step_delay: secs("monitoring.step_delay_secs", monitoring.step_delay_secs)?,
        };

        let remediation = RemediationPolicy {
            max_attempts: config.remediation.max_attempts,
            settle: secs("remediation.settle_secs", config.remediation.settle_secs)?,
            menu_open_delay: Duration::from_millis(config.remediation.menu_open_delay_ms),
            menu_selectors: config.remediation.menu_selectors.clone(),
            action_selectors: config.remediation.action_selectors.clone(),
            action_labels: SynonymSet::new(config.remediation.action_labels.iter().cloned()),
        };

        Ok(Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            target,
            markers: SynonymSet::new(monitoring.failure_markers.iter().cloned()),
            backoff: BackoffPolicy {
                max_attempts: config.retry.max_attempts,
                backoff_base: config.retry.backoff_base,
                initial_delay: secs("retry.initial_delay_secs", config.retry.initial_delay_secs)?,
            },
            remediation,
            remediation_enabled: config.remediation.enabled,
            scan: ScanSettings {
                row_selectors: config.scan.row_selectors.clone(),
                first_cell_selector: config.scan.first_cell_selector.clone(),
                header_labels: monitoring.header_labels.clone(),
                settle_after_navigation: secs(
                    "scan.settle_after_navigation_secs",
                    config.scan.settle_after_navigation_secs,
                )?,
            },
            evidence: EvidenceSettings {
                directory: PathBuf::from(&config.evidence.directory),
                prefix: config.evidence.prefix.clone(),
                format,
                tooltip_selectors: config.evidence.tooltip_selectors.clone(),
                cell_selector: config.evidence.cell_selector.clone(),
                hover_delay: Duration::from_millis(config.evidence.hover_delay_ms),
            },
            login: LoginSettings {
                username_selectors: config.login.username_selectors.clone(),
                password_selectors: config.login.password_selectors.clone(),
                submit_selectors: config.login.submit_selectors.clone(),
                pending_url_markers: config.login.pending_url_markers.clone(),
                completion_timeout: Duration::from_secs(config.login.completion_timeout_secs),
                poll_interval: Duration::from_millis(config.login.poll_interval_ms),
            },
            credentials,
            navigation_timeout: Duration::from_secs(config.browser.navigation_timeout_secs),
        })
    }
}

fn secs(name: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::Invalid(format!("{name} is not a valid duration: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_carries_policies_over() {
        let mut config = AppConfig::default();
        config.retry.initial_delay_secs = 0.25;
        config.monitoring.scan_url = Some("  ".to_string());
        config.evidence.format = "jpg".to_string();

        let ctx = RunContext::from_config(&config, None).unwrap();
        assert_eq!(ctx.backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(ctx.target.scan_url, None);
        assert_eq!(ctx.evidence.format, ScreenshotFormat::Jpeg);
        assert_eq!(ctx.remediation.max_attempts, 3);
        assert!(ctx.markers.contains_any("処理失敗"));
    }

    #[test]
    fn every_context_gets_a_fresh_run_id() {
        let config = AppConfig::default();
        let a = RunContext::from_config(&config, None).unwrap();
        let b = RunContext::from_config(&config, None).unwrap();
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(uuid::Uuid::parse_str(&a.run_id).unwrap().get_version_num(), 4);
    }

    #[test]
    fn unrepresentable_delay_is_rejected_not_zeroed() {
        let mut config = AppConfig::default();
        config.remediation.settle_secs = 1e30;
        assert!(matches!(
            RunContext::from_config(&config, None),
            Err(ConfigError::Invalid(msg)) if msg.contains("remediation.settle_secs")
        ));

        config.remediation.settle_secs = -1.0;
        assert!(RunContext::from_config(&config, None).is_err());
    }
}
