//! ChatGPT processor — turns a free-text message into a finance entry.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint over reqwest.
//! The model is asked for a single JSON object; the object is extracted,
//! validated and enriched with the source message before it is persisted.

use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProcessorConfig;
use crate::error::ProcessorError;
use crate::pipeline::types::{InboundMessage, MessageProcessor, ProcessResult};

const PROVIDER: &str = "openai";

/// Temperature for extraction (deterministic-ish).
const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// Max tokens for the extraction call.
const EXTRACTION_MAX_TOKENS: u32 = 512;

/// Message content sent to the model is capped to this many chars.
const MAX_CONTENT_CHARS: usize = 2000;

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ── Processor ───────────────────────────────────────────────────────────

/// Chat-completions backed message processor.
pub struct ChatGptProcessor {
    client: reqwest::Client,
    config: ProcessorConfig,
}

impl ChatGptProcessor {
    pub fn new(config: ProcessorConfig) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProcessorError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    /// Send the extraction prompt and return the raw model reply.
    async fn complete(&self, message: &InboundMessage) -> Result<String, ProcessorError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage::system(build_system_prompt()),
                ChatMessage::user(build_user_prompt(message)),
            ],
            temperature: EXTRACTION_TEMPERATURE,
            max_tokens: EXTRACTION_MAX_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProcessorError::Timeout {
                        provider: PROVIDER.to_string(),
                        timeout: self.config.timeout,
                    }
                } else {
                    ProcessorError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProcessorError::HttpStatus {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let parsed: ChatResponse =
            resp.json()
                .await
                .map_err(|e| ProcessorError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: format!("JSON decode failed: {e}"),
                })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProcessorError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "empty completion".to_string(),
            })
    }
}

#[async_trait]
impl MessageProcessor for ChatGptProcessor {
    async fn process(&self, message: &InboundMessage) -> ProcessResult {
        let raw = match self.complete(message).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id = %message.id, error = %e, "Completion failed");
                return ProcessResult::failure(e.to_string());
            }
        };
        debug!(id = %message.id, raw = %truncate(&raw, 200), "Completion received");

        match parse_entry(&raw) {
            Ok(entry) => ProcessResult::success(enrich(entry, message)),
            Err(reason) => {
                warn!(id = %message.id, error = %reason, "Unusable completion");
                ProcessResult::failure(reason)
            }
        }
    }
}

// ── Prompt construction ─────────────────────────────────────────────────

fn build_system_prompt() -> String {
    "Você é um assistente de finanças pessoais. Cada mensagem descreve um gasto ou uma receita.\n\n\
     Responda APENAS com um objeto JSON:\n\
     {\"tipo\": \"despesa\" | \"receita\", \"valor\": 0.0, \"categoria\": \"...\", \"descricao\": \"...\", \"data\": \"AAAA-MM-DD\" | null}\n\n\
     Regras:\n\
     - \"valor\" é um número positivo, sem símbolo de moeda\n\
     - \"categoria\" curta, em minúsculas (ex.: \"mercado\", \"transporte\", \"salario\")\n\
     - \"data\" só quando a mensagem citar uma data; caso contrário null\n\
     - Se a mensagem não descrever uma transação, responda {\"erro\": \"<motivo>\"}"
        .to_string()
}

fn build_user_prompt(message: &InboundMessage) -> String {
    let mut prompt = String::with_capacity(256);
    prompt.push_str(&format!("Remetente: {}", message.sender));
    if let Some(ref name) = message.sender_name {
        prompt.push_str(&format!(" ({})", name));
    }
    prompt.push('\n');
    prompt.push_str(&format!(
        "Recebida em: {}\n",
        message.received_at.format("%Y-%m-%d %H:%M")
    ));

    let content: String = message.content.chars().take(MAX_CONTENT_CHARS).collect();
    prompt.push_str(&format!("\nMensagem:\n{}", content));
    prompt
}

// ── Response parsing ────────────────────────────────────────────────────

/// Parse the model reply into a finance entry object.
fn parse_entry(raw: &str) -> Result<serde_json::Value, String> {
    let json_str = extract_json_object(raw);
    let value: serde_json::Value =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let obj = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;

    if let Some(reason) = obj.get("erro").and_then(|v| v.as_str()) {
        return Err(reason.to_string());
    }

    match obj.get("tipo").and_then(|v| v.as_str()) {
        Some("despesa") | Some("receita") => {}
        Some(other) => return Err(format!("unknown entry type: '{other}'")),
        None => return Err("entry missing 'tipo'".to_string()),
    }

    match obj.get("valor").and_then(|v| v.as_f64()) {
        Some(v) if v.is_finite() && v >= 0.0 => {}
        Some(v) => return Err(format!("invalid amount: {v}")),
        None => return Err("entry missing numeric 'valor'".to_string()),
    }

    Ok(value)
}

/// Attach the source message to the extracted entry.
fn enrich(mut entry: serde_json::Value, message: &InboundMessage) -> serde_json::Value {
    if let Some(obj) = entry.as_object_mut() {
        obj.insert("mensagem_id".into(), message.id.clone().into());
        obj.insert("canal".into(), message.channel.clone().into());
        obj.insert("remetente".into(), message.sender.clone().into());
        obj.insert("texto_original".into(), message.content.clone().into());
        obj.insert(
            "recebido_em".into(),
            message.received_at.to_rfc3339().into(),
        );
        obj.insert("processado_em".into(), Utc::now().to_rfc3339().into());
    }
    entry
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
