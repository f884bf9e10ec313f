//! HipChat v1 room message client.

use std::time::Duration;

use async_trait::async_trait;

use boardwatch_common::config::AppConfig;
use boardwatch_common::error::AppError;
use boardwatch_common::types::MessageColor;

use crate::delivery::Notifier;

pub struct HipChatClient {
    http: reqwest::Client,
    api_url: String,
    room_id: String,
    from: String,
    auth_token: String,
}

impl HipChatClient {
    pub fn new(
        api_url: impl Into<String>,
        room_id: impl Into<String>,
        from: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            api_url: api_url.into(),
            room_id: room_id.into(),
            from: from.into(),
            auth_token: auth_token.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            config.hipchat_api_url.clone(),
            config.hipchat_room_id.clone(),
            config.hipchat_from.clone(),
            config.hipchat_auth_token.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }
}

#[async_trait]
impl Notifier for HipChatClient {
    async fn notify(&self, message: &str, color: MessageColor) -> Result<(), AppError> {
        tracing::info!(room_id = %self.room_id, color = %color, message, "Sending to HipChat");

        let form = [
            ("room_id", self.room_id.as_str()),
            ("from", self.from.as_str()),
            ("message", message),
            ("message_format", "html"),
            ("notify", "1"),
            ("color", color.as_str()),
            ("format", "json"),
            ("auth_token", self.auth_token.as_str()),
        ];

        let response = self.http.post(&self.api_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Delivery(format!(
                "HipChat responded {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}
