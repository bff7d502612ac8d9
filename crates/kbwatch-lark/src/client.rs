//! Thin client for the Lark open API and custom-bot webhook.

use std::time::Duration;

use kbwatch_core::{Attachment, Secret};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::LarkConfig;
use crate::error::LarkError;

/// Tokens are refreshed this long before Lark says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Lifetime assumed when the token response omits `expire`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 7200;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    expire: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    image_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<ImageData>,
}

/// Webhook acknowledgement. Older bot endpoints answer `StatusCode` instead
/// of `code`.
#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default, alias = "StatusCode")]
    code: i64,
    #[serde(default, alias = "StatusMessage")]
    msg: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: Secret,
    refresh_at: Instant,
}

fn check(code: i64, msg: String) -> Result<(), LarkError> {
    if code == 0 {
        Ok(())
    } else {
        Err(LarkError::Api { code, msg })
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, LarkError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LarkError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(serde_json::from_str(&body)?)
}

pub struct LarkClient {
    http: reqwest::Client,
    config: LarkConfig,
    token: Mutex<Option<CachedToken>>,
}

impl LarkClient {
    pub fn new(config: LarkConfig) -> Result<Self, LarkError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("kbwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &LarkConfig {
        &self.config
    }

    /// Tenant access token, reusing the cached one until shortly before it
    /// expires.
    pub async fn tenant_token(&self) -> Result<Secret, LarkError> {
        let (Some(app_id), Some(app_secret)) = (&self.config.app_id, &self.config.app_secret)
        else {
            return Err(LarkError::NoAppCredentials);
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.token.clone());
            }
        }

        let url = format!(
            "{}/auth/v3/tenant_access_token/internal",
            self.config.api_base
        );
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "app_id": app_id,
                "app_secret": app_secret.expose(),
            }))
            .send()
            .await?;
        let parsed: TokenResponse = read_json(response).await?;
        check(parsed.code, parsed.msg)?;
        let token = parsed
            .tenant_access_token
            .filter(|t| !t.is_empty())
            .map(Secret::new)
            .ok_or_else(|| LarkError::Api {
                code: -1,
                msg: "token response carried no tenant_access_token".to_string(),
            })?;

        let ttl = Duration::from_secs(parsed.expire.unwrap_or(DEFAULT_TOKEN_TTL_SECS));
        let refresh_at = Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_MARGIN);
        debug!(ttl_secs = ttl.as_secs(), "obtained tenant access token");
        *cached = Some(CachedToken {
            token: token.clone(),
            refresh_at,
        });
        Ok(token)
    }

    /// Upload an image for use in message cards and return its image key.
    pub async fn upload_image(&self, attachment: &Attachment) -> Result<String, LarkError> {
        let token = self.tenant_token().await?;
        let part = Part::bytes(attachment.bytes.clone()).file_name(attachment.file_name.clone());
        let form = Form::new().text("image_type", "message").part("image", part);

        let response = self
            .http
            .post(format!("{}/im/v1/images", self.config.api_base))
            .bearer_auth(token.expose())
            .multipart(form)
            .send()
            .await?;
        let parsed: ImageResponse = read_json(response).await?;
        check(parsed.code, parsed.msg)?;
        parsed
            .data
            .and_then(|d| d.image_key)
            .filter(|k| !k.is_empty())
            .ok_or(LarkError::MissingImageKey)
    }

    /// POST a card (or any message payload) to the webhook.
    pub async fn post_webhook(&self, payload: &Value) -> Result<(), LarkError> {
        let response = self
            .http
            .post(self.config.webhook_url.expose())
            .json(payload)
            .send()
            .await?;
        let parsed: WebhookResponse = read_json(response).await?;
        check(parsed.code, parsed.msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_response_accepts_both_shapes() {
        let modern: WebhookResponse =
            serde_json::from_str(r#"{"code":0,"msg":"success","data":{}}"#).unwrap();
        assert_eq!(modern.code, 0);

        let legacy: WebhookResponse =
            serde_json::from_str(r#"{"StatusCode":0,"StatusMessage":"success"}"#).unwrap();
        assert_eq!(legacy.code, 0);

        let rejected: WebhookResponse =
            serde_json::from_str(r#"{"code":19021,"msg":"sign match fail"}"#).unwrap();
        assert!(matches!(
            check(rejected.code, rejected.msg),
            Err(LarkError::Api { code: 19021, .. })
        ));
    }

    #[tokio::test]
    async fn token_requires_app_credentials() {
        let config = LarkConfig::from_section(
            &kbwatch_core::LarkSection::default(),
            Secret::new("https://open.feishu.cn/open-apis/bot/v2/hook/x"),
            None,
            None,
        );
        let client = LarkClient::new(config).unwrap();
        assert!(matches!(
            client.tenant_token().await,
            Err(LarkError::NoAppCredentials)
        ));
    }
}
