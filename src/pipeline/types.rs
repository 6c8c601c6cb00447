//! Shared types for the message processing pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, DatabaseError};

// ── Inbound message ─────────────────────────────────────────────────

/// Inbound message fetched from the webhook source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel-native message ID.
    pub id: String,
    /// Source channel, e.g. "whatsapp".
    pub channel: String,
    /// Sender identifier (phone number / wa_id).
    pub sender: String,
    /// Profile name, if the platform sent one.
    pub sender_name: Option<String>,
    /// Message body text.
    pub content: String,
    /// When the message was sent.
    pub received_at: DateTime<Utc>,
    /// Channel-specific extras (phone number id, message type, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl InboundMessage {
    /// Build a plain text message with no metadata.
    pub fn text(
        id: impl Into<String>,
        channel: impl Into<String>,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel: channel.into(),
            sender: sender.into(),
            sender_name: None,
            content: content.into(),
            received_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    /// True when there is nothing to process.
    ///
    /// Whitespace-only content is still a message and goes to the processor.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

// ── Processing outcome ──────────────────────────────────────────────

/// Outcome reported by the message processor.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessResult {
    /// Processing succeeded; `data` is what gets persisted.
    Success { data: serde_json::Value },
    /// Processing failed, optionally with a description.
    Failure { error: Option<String> },
}

impl ProcessResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self::Success { data }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: Some(error.into()),
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
        }
    }

    /// Interpret a `{status, data?, error?}` object.
    ///
    /// Only `status == "success"` counts as success; any other status, or a
    /// missing one, is a failure.
    pub fn from_value(value: &serde_json::Value) -> Self {
        match value.get("status").and_then(|v| v.as_str()) {
            Some("success") => Self::Success {
                data: value
                    .get("data")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            },
            _ => Self::Failure {
                error: value.get("error").and_then(|v| match v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                }),
            },
        }
    }

    /// The `{status, data?, error?}` wire form.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Success { data } => serde_json::json!({ "status": "success", "data": data }),
            Self::Failure { error: Some(e) } => {
                serde_json::json!({ "status": "error", "error": e })
            }
            Self::Failure { error: None } => serde_json::json!({ "status": "error" }),
        }
    }
}

// ── Collaborator traits ─────────────────────────────────────────────

/// Source of inbound messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source name for logging.
    fn name(&self) -> &str;

    /// Latest message received, or `None` when nothing is available.
    async fn get_latest_message(&self) -> Result<Option<InboundMessage>, ChannelError>;
}

/// Turns a message into structured data.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Process a message. Failures are reported in the result, not as `Err`.
    async fn process(&self, message: &InboundMessage) -> ProcessResult;
}

/// Durable store for processed results.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a document. Returns the new document ID.
    async fn save(&self, data: &serde_json::Value) -> Result<String, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_status_carries_data() {
        let value = serde_json::json!({"status": "success", "data": {"text": "hello"}});
        assert_eq!(
            ProcessResult::from_value(&value),
            ProcessResult::Success {
                data: serde_json::json!({"text": "hello"})
            }
        );
    }

    #[test]
    fn error_status_carries_description() {
        let value = serde_json::json!({"status": "error", "error": "timeout"});
        assert_eq!(
            ProcessResult::from_value(&value),
            ProcessResult::failure("timeout")
        );
    }

    #[test]
    fn non_string_error_keeps_its_text() {
        let value = serde_json::json!({"status": "error", "error": 500});
        assert_eq!(ProcessResult::from_value(&value), ProcessResult::failure("500"));

        let value = serde_json::json!({"status": "error", "error": null});
        assert_eq!(
            ProcessResult::from_value(&value),
            ProcessResult::Failure { error: None }
        );
    }

    #[test]
    fn unknown_status_is_failure() {
        let value = serde_json::json!({"status": "partial", "data": {"x": 1}});
        assert_eq!(
            ProcessResult::from_value(&value),
            ProcessResult::Failure { error: None }
        );
    }

    #[test]
    fn missing_status_is_failure() {
        let value = serde_json::json!({"data": {"x": 1}});
        assert!(matches!(
            ProcessResult::from_value(&value),
            ProcessResult::Failure { .. }
        ));
    }

    #[test]
    fn status_match_is_case_sensitive() {
        let value = serde_json::json!({"status": "SUCCESS", "data": {}});
        assert_eq!(ProcessResult::from_value(&value).label(), "failure");
    }

    #[test]
    fn wire_form_keeps_error_text() {
        let value = ProcessResult::failure("quota exceeded").to_value();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "quota exceeded");
        assert!(ProcessResult::Failure { error: None }.to_value().get("error").is_none());
    }

    #[test]
    fn only_zero_length_content_is_empty() {
        assert!(InboundMessage::text("1", "whatsapp", "5511", "").is_empty());
        assert!(!InboundMessage::text("1", "whatsapp", "5511", "   ").is_empty());
        assert!(!InboundMessage::text("1", "whatsapp", "5511", "oi").is_empty());
    }
}
