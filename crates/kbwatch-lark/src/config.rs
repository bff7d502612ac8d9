//! Resolved Lark settings: file section plus secrets.

use std::time::Duration;

use kbwatch_core::{LarkSection, Secret};

pub const LARK_API_BASE: &str = "https://open.larksuite.com/open-apis";
pub const FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";

#[derive(Debug, Clone)]
pub struct LarkConfig {
    pub webhook_url: Secret,
    pub app_id: Option<String>,
    pub app_secret: Option<Secret>,

    /// Open API root (no trailing slash).
    pub api_base: String,
    pub timeout: Duration,
    pub title: String,
    pub timezone_label: String,
    pub utc_offset_hours: i32,
}

impl LarkConfig {
    pub fn from_section(
        section: &LarkSection,
        webhook_url: Secret,
        app_id: Option<String>,
        app_secret: Option<Secret>,
    ) -> Self {
        let api_base = section
            .api_base
            .clone()
            .unwrap_or_else(|| api_base_for(webhook_url.expose()).to_string());
        Self {
            webhook_url,
            app_id: app_id.filter(|id| !id.is_empty()),
            app_secret: app_secret.filter(|s| !s.is_empty()),
            api_base: api_base.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(section.timeout_secs),
            title: section.title.clone(),
            timezone_label: section.timezone_label.clone(),
            utc_offset_hours: section.utc_offset_hours,
        }
    }

    /// Whether screenshots can be uploaded.
    pub fn has_app_credentials(&self) -> bool {
        self.app_id.is_some() && self.app_secret.is_some()
    }
}

/// International webhooks live on larksuite.com; everything else is Feishu.
pub fn api_base_for(webhook_url: &str) -> &'static str {
    if webhook_url.contains("open.larksuite.com") {
        LARK_API_BASE
    } else {
        FEISHU_API_BASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_host_follows_webhook_host() {
        assert_eq!(
            api_base_for("https://open.larksuite.com/open-apis/bot/v2/hook/abc"),
            LARK_API_BASE
        );
        assert_eq!(
            api_base_for("https://open.feishu.cn/open-apis/bot/v2/hook/abc"),
            FEISHU_API_BASE
        );
    }

    #[test]
    fn explicit_api_base_wins() {
        let section = LarkSection {
            api_base: Some("http://127.0.0.1:9000/open-apis/".to_string()),
            ..LarkSection::default()
        };
        let config = LarkConfig::from_section(
            &section,
            Secret::new("https://open.larksuite.com/open-apis/bot/v2/hook/abc"),
            Some("cli_a".to_string()),
            Some(Secret::new("s")),
        );
        assert_eq!(config.api_base, "http://127.0.0.1:9000/open-apis");
        assert!(config.has_app_credentials());
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn blank_credentials_count_as_missing() {
        let config = LarkConfig::from_section(
            &LarkSection::default(),
            Secret::new("https://open.feishu.cn/open-apis/bot/v2/hook/abc"),
            Some(String::new()),
            Some(Secret::new("")),
        );
        assert!(!config.has_app_credentials());
        assert_eq!(config.api_base, FEISHU_API_BASE);
    }
}
