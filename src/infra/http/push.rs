use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::application::ports::{PortError, PushChannel};
use crate::application::repos::SettingsSource;
use crate::application::settings::keys;
use crate::domain::comments::CommentRecord;

const BODY_PREVIEW_CHARS: usize = 120;

#[derive(Debug, Serialize, PartialEq)]
struct PushPayload {
    title: String,
    body: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_nickname: Option<String>,
}

/// Bark-style webhook: one JSON POST per notification to the configured URL.
#[derive(Clone)]
pub struct WebhookPushChannel {
    client: Client,
    settings: Arc<dyn SettingsSource>,
}

impl WebhookPushChannel {
    pub fn new(client: Client, settings: Arc<dyn SettingsSource>) -> Self {
        Self { client, settings }
    }
}

fn payload(
    comment: &CommentRecord,
    parent: Option<&CommentRecord>,
    site_url: Option<&str>,
) -> PushPayload {
    let title = match parent {
        Some(parent) => format!("{} replied to {}", comment.nickname, parent.nickname),
        None => format!("New comment from {}", comment.nickname),
    };
    let body: String = comment.content.chars().take(BODY_PREVIEW_CHARS).collect();
    let url = match site_url.map(|base| base.trim_end_matches('/')) {
        Some(base) if !base.is_empty() => format!("{base}{}", comment.target_path),
        _ => comment.target_path.clone(),
    };

    PushPayload {
        title,
        body,
        url,
        parent_nickname: parent.map(|p| p.nickname.clone()),
    }
}

#[async_trait]
impl PushChannel for WebhookPushChannel {
    async fn send_comment_notification(
        &self,
        comment: &CommentRecord,
        parent: Option<&CommentRecord>,
    ) -> Result<(), PortError> {
        let endpoint = self
            .settings
            .get_string(keys::PUSH_URL)
            .await
            .filter(|url| !url.trim().is_empty())
            .ok_or(PortError::NotConfigured("push webhook url"))?;
        let site_url = self.settings.get_string(keys::SITE_URL).await;

        let response = self
            .client
            .post(endpoint.trim())
            .json(&payload(comment, parent, site_url.as_deref()))
            .send()
            .await
            .map_err(PortError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PortError::response(format!("status {status} body {text}")));
        }
        Ok(())
    }
}
