//! WhatsApp channel — receives Cloud API webhook notifications.
//!
//! Meta pushes inbound messages to `POST /webhook`; the subscription itself is
//! confirmed once through the `GET /webhook` handshake. The listener keeps the
//! most recent text message in memory and hands it to the pipeline through
//! [`MessageSource`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::WebhookConfig;
use crate::error::ChannelError;
use crate::pipeline::types::{InboundMessage, MessageSource};

const CHANNEL_NAME: &str = "whatsapp";

/// Header carrying the payload signature.
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

// ── Webhook payload ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    object: String,
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    field: String,
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    metadata: Option<PhoneMetadata>,
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    messages: Vec<WaMessage>,
}

#[derive(Debug, Deserialize)]
struct PhoneMetadata {
    display_phone_number: Option<String>,
    phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Contact {
    wa_id: String,
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaMessage {
    id: String,
    from: String,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    text: Option<WaText>,
}

#[derive(Debug, Deserialize)]
struct WaText {
    body: String,
}

/// Query parameters of the subscription handshake.
#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

// ── Listener ────────────────────────────────────────────────────────────

struct ListenerInner {
    verify_token: String,
    app_secret: Option<SecretString>,
    latest: RwLock<Option<InboundMessage>>,
}

/// Webhook listener holding the latest inbound text message.
#[derive(Clone)]
pub struct WhatsAppListener {
    inner: Arc<ListenerInner>,
}

impl WhatsAppListener {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                verify_token: config.verify_token.clone(),
                app_secret: config.app_secret.clone(),
                latest: RwLock::new(None),
            }),
        }
    }

    /// Build the Axum router with `/webhook` and `/health`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/webhook", get(verify_handler).post(receive_handler))
            .route("/health", get(|| async { "ok" }))
            .with_state(self.clone())
    }

    /// Record a message if it is at least as recent as the current one.
    ///
    /// Webhook deliveries can arrive out of order; an older message never
    /// replaces a newer one.
    pub async fn record(&self, message: InboundMessage) {
        let mut latest = self.inner.latest.write().await;
        let replace = match latest.as_ref() {
            Some(current) => message.received_at >= current.received_at,
            None => true,
        };
        if replace {
            debug!(id = %message.id, sender = %message.sender, "Latest message updated");
            *latest = Some(message);
        } else {
            debug!(id = %message.id, "Ignoring out-of-order message");
        }
    }

    /// Check the `X-Hub-Signature-256` header against the raw body.
    fn verify_signature(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ChannelError> {
        let Some(secret) = &self.inner.app_secret else {
            return Ok(());
        };
        let bad = || ChannelError::BadSignature {
            name: CHANNEL_NAME.to_string(),
        };

        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(bad)?;
        let expected = header
            .strip_prefix("sha256=")
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or_else(bad)?;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|_| bad())?;
        mac.update(body);
        mac.verify_slice(&expected).map_err(|_| bad())
    }
}

#[async_trait]
impl MessageSource for WhatsAppListener {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn get_latest_message(&self) -> Result<Option<InboundMessage>, ChannelError> {
        Ok(self.inner.latest.read().await.clone())
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn verify_handler(
    State(listener): State<WhatsAppListener>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    let token_ok = params.verify_token.as_deref() == Some(listener.inner.verify_token.as_str());
    match (params.mode.as_deref(), params.challenge) {
        (Some("subscribe"), Some(challenge)) if token_ok => {
            info!("Webhook subscription verified");
            (StatusCode::OK, challenge)
        }
        _ => {
            warn!("Webhook verification rejected");
            (StatusCode::FORBIDDEN, String::new())
        }
    }
}

async fn receive_handler(
    State(listener): State<WhatsAppListener>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Err(e) = listener.verify_signature(&headers, &body) {
        warn!(error = %e, "Rejecting webhook delivery");
        return StatusCode::UNAUTHORIZED;
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Malformed webhook payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    let messages = parse_payload(payload);
    if messages.is_empty() {
        debug!("Webhook delivery without text messages");
    }
    for message in messages {
        info!(id = %message.id, sender = %message.sender, "Inbound WhatsApp message");
        listener.record(message).await;
    }

    StatusCode::OK
}

// ── Payload conversion ──────────────────────────────────────────────────

/// Extract text messages from a webhook notification, in delivery order.
fn parse_payload(payload: WebhookPayload) -> Vec<InboundMessage> {
    if payload.object != "whatsapp_business_account" {
        debug!(object = %payload.object, "Ignoring non-WhatsApp webhook object");
        return Vec::new();
    }

    let mut out = Vec::new();
    for change in payload.entry.into_iter().flat_map(|e| e.changes) {
        if change.field != "messages" {
            continue;
        }
        let value = change.value;
        let phone_number_id = value
            .metadata
            .as_ref()
            .and_then(|m| m.phone_number_id.clone());
        let display_number = value
            .metadata
            .as_ref()
            .and_then(|m| m.display_phone_number.clone());

        for msg in value.messages {
            let Some(text) = msg.text.filter(|_| msg.kind == "text") else {
                debug!(id = %msg.id, kind = %msg.kind, "Skipping non-text message");
                continue;
            };
            let sender_name = value
                .contacts
                .iter()
                .find(|c| c.wa_id == msg.from)
                .and_then(|c| c.profile.as_ref())
                .and_then(|p| p.name.clone());

            out.push(InboundMessage {
                id: msg.id,
                channel: CHANNEL_NAME.to_string(),
                sender: msg.from,
                sender_name,
                content: text.body,
                received_at: parse_timestamp(msg.timestamp.as_deref()),
                metadata: serde_json::json!({
                    "phone_number_id": phone_number_id,
                    "display_phone_number": display_number,
                    "type": msg.kind,
                }),
            });
        }
    }
    out
}

/// Parse a Unix-seconds timestamp string; falls back to now.
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}
