//! [`NotificationSink`] that posts run reports to Lark.

use async_trait::async_trait;
use kbwatch_core::{Attachment, NotificationSink, NotifyError, RunReport};
use tracing::{info, warn};

use crate::card::{build_card, CardOptions};
use crate::client::LarkClient;
use crate::config::LarkConfig;
use crate::error::LarkError;

pub struct LarkNotifier {
    client: LarkClient,
    card: CardOptions,
}

impl LarkNotifier {
    pub fn new(config: LarkConfig) -> Result<Self, LarkError> {
        let card = CardOptions {
            title: config.title.clone(),
            timezone_label: config.timezone_label.clone(),
            utc_offset_hours: config.utc_offset_hours,
        };
        Ok(Self {
            client: LarkClient::new(config)?,
            card,
        })
    }

    pub fn client(&self) -> &LarkClient {
        &self.client
    }

    /// Upload what can be uploaded; a failed image never fails the report.
    async fn upload_all(&self, attachments: &[Attachment]) -> Vec<String> {
        if attachments.is_empty() {
            return Vec::new();
        }
        if !self.client.config().has_app_credentials() {
            warn!(
                count = attachments.len(),
                "Lark app credentials not configured, screenshots stay local"
            );
            return Vec::new();
        }

        let mut keys = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            match self.client.upload_image(attachment).await {
                Ok(key) => {
                    info!(file = %attachment.file_name, "screenshot uploaded");
                    keys.push(key);
                }
                Err(e) => warn!(file = %attachment.file_name, error = %e, "screenshot upload failed"),
            }
        }
        keys
    }
}

#[async_trait]
impl NotificationSink for LarkNotifier {
    fn name(&self) -> &str {
        "lark"
    }

    async fn send(&self, report: &RunReport, attachments: &[Attachment]) -> Result<(), NotifyError> {
        let image_keys = self.upload_all(attachments).await;
        let card = build_card(report, &image_keys, &self.card);
        self.client.post_webhook(&card).await?;
        info!(
            run_id = %report.run_id,
            images = image_keys.len(),
            "Lark notification sent"
        );
        Ok(())
    }
}
