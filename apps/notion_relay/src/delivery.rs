use std::fmt;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::models::{DeliveryOutcome, DeliveryTarget, OutboundNotification, UserId};
use crate::utils::format::clamp_chars;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const BODY_LOG_LIMIT: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("upstream rejected the request with status {status}: {body}")]
    UpstreamRejected { status: u16, body: String },
    #[error("malformed target: {0}")]
    MalformedTarget(String),
    #[error("bot credential is not configured")]
    MissingCredential,
    #[error("unexpected upstream response: {0}")]
    UnexpectedResponse(String),
}

impl DeliveryError {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Transport(_) => "transport_failure",
            DeliveryError::UpstreamRejected { .. } => "upstream_rejected",
            DeliveryError::MalformedTarget(_) => "malformed_target",
            DeliveryError::MissingCredential => "missing_credential",
            DeliveryError::UnexpectedResponse(_) => "unexpected_response",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::UpstreamRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        // Drop the URL: webhook URLs embed their own secret token.
        DeliveryError::Transport(err.without_url().to_string())
    }
}

/// Bot credential. Never printed.
#[derive(Clone)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.0)
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BotToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: Option<String>,
}

/// Talks to Discord: incoming webhooks for channel posts, the REST API for DMs.
#[derive(Debug, Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: Option<BotToken>,
}

impl DiscordClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        bot_token: Option<BotToken>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token,
        }
    }

    pub fn has_bot_token(&self) -> bool {
        self.bot_token.is_some()
    }

    /// Sends `notification` to `target`. Never retries.
    pub async fn deliver(
        &self,
        notification: &OutboundNotification,
        target: &DeliveryTarget,
    ) -> DeliveryOutcome {
        let result = match target {
            DeliveryTarget::Channel { webhook_url, .. } => {
                self.post_webhook(webhook_url, notification).await
            }
            DeliveryTarget::DirectMessage(user_id) => {
                self.send_direct_message(user_id, notification).await
            }
        };

        match result {
            Ok(()) => {
                info!(
                    target_kind = target.describe(),
                    mentions = notification.mentioned_users().len(),
                    "notification delivered"
                );
                DeliveryOutcome::Delivered
            }
            Err(err) => {
                warn!(
                    target_kind = target.describe(),
                    kind = err.kind(),
                    status = err.status(),
                    error = %err,
                    "notification delivery failed"
                );
                DeliveryOutcome::Failed(err)
            }
        }
    }

    pub async fn post_webhook(
        &self,
        webhook_url: &str,
        notification: &OutboundNotification,
    ) -> Result<(), DeliveryError> {
        if webhook_url.trim().is_empty() {
            return Err(DeliveryError::MalformedTarget(
                "webhook url is empty".to_string(),
            ));
        }
        let response = self.http.post(webhook_url).json(notification).send().await?;
        ensure_success(response).await?;
        debug!("webhook post accepted");
        Ok(())
    }

    async fn send_direct_message(
        &self,
        user_id: &UserId,
        notification: &OutboundNotification,
    ) -> Result<(), DeliveryError> {
        if user_id.is_blank() {
            return Err(DeliveryError::MalformedTarget(
                "recipient user id is empty".to_string(),
            ));
        }
        let token = self
            .bot_token
            .as_ref()
            .ok_or(DeliveryError::MissingCredential)?;

        let channel_id = self.open_dm_channel(token, user_id).await?;
        self.post_channel_message(token, &channel_id, notification)
            .await?;
        info!(user_id = %user_id, "direct message sent");
        Ok(())
    }

    async fn open_dm_channel(
        &self,
        token: &BotToken,
        user_id: &UserId,
    ) -> Result<String, DeliveryError> {
        let response = self
            .http
            .post(format!("{}/users/@me/channels", self.api_base))
            .header(reqwest::header::AUTHORIZATION, token.authorization())
            .json(&json!({ "recipient_id": user_id }))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let channel: DmChannel = response
            .json()
            .await
            .map_err(|err| DeliveryError::UnexpectedResponse(err.without_url().to_string()))?;
        channel
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DeliveryError::UnexpectedResponse("dm channel has no id".to_string()))
    }

    async fn post_channel_message(
        &self,
        token: &BotToken,
        channel_id: &str,
        notification: &OutboundNotification,
    ) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(format!("{}/channels/{}/messages", self.api_base, channel_id))
            .header(reqwest::header::AUTHORIZATION, token.authorization())
            .json(notification)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::UpstreamRejected {
        status: status.as_u16(),
        body: clamp_chars(&body, BODY_LOG_LIMIT),
    })
}
