//! End-to-end tests: WhatsApp webhook → ChatGPT processor → libSQL store.
//!
//! Each test spins up the webhook router and a stub chat-completions server
//! on random ports and drives them over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, http::StatusCode, routing::post};
use secrecy::SecretString;
use tokio::net::TcpListener;

use message_pipeline::channels::WhatsAppListener;
use message_pipeline::config::{ProcessorConfig, WebhookConfig};
use message_pipeline::error::PipelineError;
use message_pipeline::pipeline::{MessageSource, PipelineStep};
use message_pipeline::processor::ChatGptProcessor;
use message_pipeline::store::{DocumentReader, LibSqlBackend};

/// Serve `app` on a random local port and return the port.
async fn serve(app: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Stub chat-completions endpoint that always answers with `content`.
async fn start_completions(status: StatusCode, content: &'static str) -> String {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || async move {
            let body = serde_json::json!({
                "id": "chatcmpl-test",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": content},
                    "finish_reason": "stop"
                }]
            });
            (status, Json(body))
        }),
    );
    let port = serve(app).await;
    format!("http://127.0.0.1:{port}/v1")
}

async fn start_webhook() -> (WhatsAppListener, u16) {
    let listener = WhatsAppListener::new(&WebhookConfig {
        port: 0,
        verify_token: "verify-me".to_string(),
        app_secret: None,
    });
    let port = serve(listener.router()).await;
    (listener, port)
}

fn processor(base_url: String) -> ChatGptProcessor {
    ChatGptProcessor::new(ProcessorConfig {
        api_key: SecretString::from("sk-test".to_string()),
        model: "gpt-4o-mini".to_string(),
        base_url,
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn whatsapp_payload(id: &str, body: &str) -> serde_json::Value {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "WABA_ID",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {"display_phone_number": "15550001111", "phone_number_id": "PHONE_ID"},
                    "contacts": [{"profile": {"name": "Rafael"}, "wa_id": "5511999990000"}],
                    "messages": [{
                        "from": "5511999990000",
                        "id": id,
                        "timestamp": "1753700000",
                        "type": "text",
                        "text": {"body": body}
                    }]
                }
            }]
        }]
    })
}

async fn deliver(port: u16, payload: &serde_json::Value) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/webhook"))
        .json(payload)
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn handshake_over_http() {
    let (_listener, port) = start_webhook().await;
    let resp = reqwest::get(format!(
        "http://127.0.0.1:{port}/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=abc"
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "abc");
}

#[tokio::test]
async fn delivered_message_is_processed_and_persisted() {
    let (listener, port) = start_webhook().await;
    let base_url = start_completions(
        StatusCode::OK,
        r#"{"tipo": "despesa", "valor": 80.5, "categoria": "mercado", "descricao": "compras", "data": null}"#,
    )
    .await;
    let db = Arc::new(LibSqlBackend::new_memory("mensagens").await.unwrap());

    let status = deliver(port, &whatsapp_payload("wamid.100", "Gastei 80,50 no mercado")).await;
    assert_eq!(status, reqwest::StatusCode::OK);

    let step = PipelineStep::new(
        Arc::new(listener.clone()),
        Arc::new(processor(base_url)),
        db.clone(),
    );
    let outcome = step.run().await.unwrap();
    assert_eq!(outcome.message_id, "wamid.100");

    let doc = db.get_document(&outcome.document_id).await.unwrap().unwrap();
    assert_eq!(doc.data["tipo"], "despesa");
    assert_eq!(doc.data["categoria"], "mercado");
    assert_eq!(doc.data["mensagem_id"], "wamid.100");
    assert_eq!(doc.data["remetente"], "5511999990000");
    assert_eq!(doc.data["texto_original"], "Gastei 80,50 no mercado");
    assert_eq!(db.count_documents().await.unwrap(), 1);
}

#[tokio::test]
async fn no_delivery_means_no_message() {
    let (listener, _port) = start_webhook().await;
    let base_url = start_completions(StatusCode::OK, "{}").await;
    let db = Arc::new(LibSqlBackend::new_memory("mensagens").await.unwrap());

    let step = PipelineStep::new(Arc::new(listener), Arc::new(processor(base_url)), db.clone());
    let err = step.run().await.unwrap_err();

    assert_eq!(err.to_string(), "Nenhuma mensagem recebida");
    assert_eq!(db.count_documents().await.unwrap(), 0);
}

#[tokio::test]
async fn provider_error_fails_run_with_description() {
    let (listener, port) = start_webhook().await;
    let base_url = start_completions(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
    let db = Arc::new(LibSqlBackend::new_memory("mensagens").await.unwrap());

    deliver(port, &whatsapp_payload("wamid.200", "Uber 25")).await;

    let step = PipelineStep::new(Arc::new(listener), Arc::new(processor(base_url)), db.clone());
    let err = step.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Failed(_)));
    let text = err.to_string();
    assert!(text.starts_with("Erro: "), "{text}");
    assert!(text.contains("500"), "{text}");
    assert_eq!(db.count_documents().await.unwrap(), 0);
}

#[tokio::test]
async fn model_refusal_fails_run_with_reason() {
    let (listener, port) = start_webhook().await;
    let base_url = start_completions(StatusCode::OK, r#"{"erro": "não é uma transação"}"#).await;
    let db = Arc::new(LibSqlBackend::new_memory("mensagens").await.unwrap());

    deliver(port, &whatsapp_payload("wamid.300", "Bom dia!")).await;

    let step = PipelineStep::new(Arc::new(listener), Arc::new(processor(base_url)), db.clone());
    let err = step.run().await.unwrap_err();

    assert_eq!(err.to_string(), "Erro: não é uma transação");
    assert_eq!(db.count_documents().await.unwrap(), 0);
}

#[tokio::test]
async fn latest_delivery_wins() {
    let (listener, port) = start_webhook().await;

    deliver(port, &whatsapp_payload("wamid.1", "primeira")).await;
    let mut second = whatsapp_payload("wamid.2", "segunda");
    second["entry"][0]["changes"][0]["value"]["messages"][0]["timestamp"] =
        serde_json::json!("1753700060");
    deliver(port, &second).await;

    let latest = listener.get_latest_message().await.unwrap().unwrap();
    assert_eq!(latest.id, "wamid.2");
    assert_eq!(latest.content, "segunda");
}
