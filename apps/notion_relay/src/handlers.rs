use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn, Instrument};
use utoipa::OpenApi;
use uuid::Uuid;

use crate::adapters::{build, debug_notice, extract};
use crate::config::{DeliveryMode, RelayConfig};
use crate::delivery::{DeliveryError, DiscordClient};
use crate::directory::{resolve, DirectoryTable};
use crate::models::{
    DeliveryOutcome, DeliveryTarget, FieldSet, MessageResponse, OutboundNotification,
};

const NO_RECIPIENT_MESSAGE: &str = "No matching user found to notify.";
const PROCESSING_FAILED: &str = "Failed to process webhook.";
const TEST_MESSAGE: &str = "Hello from notion-relay! Your test function is running.";

#[derive(Clone)]
pub struct AppState {
    pub relays: Arc<BTreeMap<String, RelayConfig>>,
    pub directory: Arc<DirectoryTable>,
    pub discord: DiscordClient,
    pub webhook_url: Option<String>,
    pub debug_webhook_url: Option<String>,
}

impl AppState {
    /// Name of the setting `relay` needs but does not have, if any.
    pub fn missing_configuration(&self, relay: &RelayConfig) -> Option<&'static str> {
        match relay.mode {
            DeliveryMode::Channel if self.webhook_url.is_none() => Some("DISCORD_WEBHOOK_URL"),
            DeliveryMode::DirectMessage if !self.discord.has_bot_token() => {
                Some("DISCORD_BOT_TOKEN")
            }
            _ => None,
        }
    }

    async fn send_debug_notice(&self, relay_name: &str, fields: &FieldSet, err: &DeliveryError) {
        let Some(url) = self.debug_webhook_url.as_deref() else {
            return;
        };
        let notice = debug_notice(relay_name, fields, err, Utc::now());
        match self.discord.post_webhook(url, &notice).await {
            Ok(()) => debug!("debug notice sent"),
            Err(debug_err) => warn!(error = %debug_err, "failed to send debug notice"),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/test", any(test_send))
        .route("/api/:relay", any(notify))
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(healthz, notify, test_send),
    components(schemas(MessageResponse, AppErrorResponse)),
    tags(
        (name = "notion-relay", description = "Notion automation to Discord relay")
    )
)]
pub struct ApiDoc;

#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct AppErrorResponse {
    pub error: String,
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Health check", body = String)
    )
)]
pub async fn healthz() -> &'static str {
    "ok"
}

#[utoipa::path(
    post,
    path = "/api/{relay}",
    params(
        ("relay" = String, Path, description = "Relay name")
    ),
    request_body = Value,
    responses(
        (status = 200, description = "Delivered, or nobody to notify", body = MessageResponse),
        (status = 400, description = "Invalid JSON body", body = AppErrorResponse),
        (status = 404, description = "Unknown relay", body = AppErrorResponse),
        (status = 405, description = "Only POST is accepted", body = AppErrorResponse),
        (status = 500, description = "Missing configuration or failed delivery", body = AppErrorResponse)
    )
)]
pub async fn notify(
    method: Method,
    Path(relay_name): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MessageResponse>, AppError> {
    let span = tracing::info_span!("relay", relay = %relay_name, request_id = %Uuid::new_v4());
    handle_notify(method, &relay_name, &state, &body)
        .instrument(span)
        .await
}

async fn handle_notify(
    method: Method,
    relay_name: &str,
    state: &AppState,
    body: &[u8],
) -> Result<Json<MessageResponse>, AppError> {
    if method != Method::POST {
        warn!(%method, "rejected non-POST request");
        return Err(AppError::method_not_allowed());
    }

    let relay = state.relays.get(relay_name).ok_or_else(|| {
        info!("unknown relay");
        AppError::not_found("relay not found")
    })?;

    if let Some(setting) = state.missing_configuration(relay) {
        error!(setting, "required setting is not configured");
        return Err(AppError::internal("Server config error."));
    }

    let payload: Value = serde_json::from_slice(body).map_err(|err| {
        warn!(error = %err, "invalid json payload");
        AppError::bad_request(format!("invalid json payload: {err}"))
    })?;

    match relay_event(state, relay_name, relay, &payload).await {
        DeliveryOutcome::Delivered => Ok(Json(MessageResponse::new(
            relay.template.success_message.clone(),
        ))),
        DeliveryOutcome::Skipped(reason) => {
            info!(%reason, "nothing delivered");
            Ok(Json(MessageResponse::new(NO_RECIPIENT_MESSAGE)))
        }
        DeliveryOutcome::Failed(_) => Err(AppError::internal(PROCESSING_FAILED)),
    }
}

/// Extract, resolve, build and deliver one change event.
async fn relay_event(
    state: &AppState,
    relay_name: &str,
    relay: &RelayConfig,
    payload: &Value,
) -> DeliveryOutcome {
    let fields = extract(payload, &relay.schema);
    debug!(?fields, "fields extracted");

    let recipient = if relay.requires_recipient() {
        match resolve(fields.person_name.as_deref(), &state.directory) {
            Ok(user_id) => Some(user_id),
            Err(unmapped) => return DeliveryOutcome::Skipped(unmapped.to_string()),
        }
    } else {
        None
    };

    let target = match relay.mode {
        DeliveryMode::Channel => DeliveryTarget::Channel {
            webhook_url: state.webhook_url.clone().unwrap_or_default(),
            mention: recipient,
        },
        DeliveryMode::DirectMessage => match recipient {
            Some(user_id) => DeliveryTarget::DirectMessage(user_id),
            None => {
                return DeliveryOutcome::Failed(DeliveryError::MalformedTarget(
                    "direct message without a recipient".to_string(),
                ))
            }
        },
    };

    let notification = build(&fields, &target, &relay.template);
    let outcome = state.discord.deliver(&notification, &target).await;
    if let DeliveryOutcome::Failed(err) = &outcome {
        state.send_debug_notice(relay_name, &fields, err).await;
    }
    outcome
}

#[utoipa::path(
    method(get, post),
    path = "/test",
    responses(
        (status = 200, description = "Test message sent", body = MessageResponse),
        (status = 500, description = "Webhook missing or rejected", body = AppErrorResponse)
    )
)]
/// Accepts any method, so the route can be checked from a browser.
pub async fn test_send(State(state): State<AppState>) -> Result<Json<MessageResponse>, AppError> {
    info!("test send requested");

    let Some(url) = state.webhook_url.as_deref() else {
        error!("DISCORD_WEBHOOK_URL is not set");
        return Err(AppError::internal("Server config missing URL."));
    };

    match state
        .discord
        .post_webhook(url, &OutboundNotification::text(TEST_MESSAGE))
        .await
    {
        Ok(()) => Ok(Json(MessageResponse::new("Test message sent."))),
        Err(err) => {
            error!(kind = err.kind(), status = err.status(), error = %err, "test send failed");
            Err(AppError::internal("Test failed."))
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn method_not_allowed() -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "Method Not Allowed".to_string(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}
