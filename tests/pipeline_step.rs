//! Pipeline step contract tests.
//!
//! Each collaborator is a small stub so the fetch → process → persist
//! sequence can be checked without network or disk.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use message_pipeline::error::{ChannelError, DatabaseError, PipelineError};
use message_pipeline::pipeline::{
    DocumentStore, InboundMessage, MessageProcessor, MessageSource, PipelineStep, ProcessResult,
};

/// Source returning a fixed message (or none, or an error).
struct StubSource {
    message: Option<InboundMessage>,
    fail: bool,
}

impl StubSource {
    fn with(content: &str) -> Self {
        Self {
            message: Some(InboundMessage::text("wamid.1", "whatsapp", "5511", content)),
            fail: false,
        }
    }

    fn empty() -> Self {
        Self {
            message: None,
            fail: false,
        }
    }
}

#[async_trait]
impl MessageSource for StubSource {
    fn name(&self) -> &str {
        "stub"
    }

    async fn get_latest_message(&self) -> Result<Option<InboundMessage>, ChannelError> {
        if self.fail {
            return Err(ChannelError::Unavailable {
                name: "stub".into(),
                reason: "connection reset".into(),
            });
        }
        Ok(self.message.clone())
    }
}

/// Processor returning a canned `{status, data, error}` object.
struct StubProcessor {
    response: serde_json::Value,
    seen: Mutex<Vec<String>>,
}

impl StubProcessor {
    fn new(response: serde_json::Value) -> Self {
        Self {
            response,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageProcessor for StubProcessor {
    async fn process(&self, message: &InboundMessage) -> ProcessResult {
        self.seen.lock().unwrap().push(message.content.clone());
        ProcessResult::from_value(&self.response)
    }
}

/// Store recording every save.
#[derive(Default)]
struct RecordingStore {
    saved: Mutex<Vec<serde_json::Value>>,
    fail: bool,
}

impl RecordingStore {
    fn saved(&self) -> Vec<serde_json::Value> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn save(&self, data: &serde_json::Value) -> Result<String, DatabaseError> {
        if self.fail {
            return Err(DatabaseError::Query("disk full".into()));
        }
        let mut saved = self.saved.lock().unwrap();
        saved.push(data.clone());
        Ok(format!("doc-{}", saved.len()))
    }
}

fn step(
    source: StubSource,
    processor: Arc<StubProcessor>,
    store: Arc<RecordingStore>,
) -> PipelineStep {
    PipelineStep::new(Arc::new(source), processor, store)
}

#[tokio::test]
async fn no_message_fails_without_processing_or_persisting() {
    let processor = Arc::new(StubProcessor::new(serde_json::json!({"status": "success"})));
    let store = Arc::new(RecordingStore::default());

    let err = step(StubSource::empty(), processor.clone(), store.clone())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Failed(_)));
    assert_eq!(err.to_string(), "Nenhuma mensagem recebida");
    assert!(processor.calls().is_empty());
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn zero_length_message_counts_as_no_message() {
    let processor = Arc::new(StubProcessor::new(serde_json::json!({"status": "success"})));
    let store = Arc::new(RecordingStore::default());

    let err = step(StubSource::with(""), processor.clone(), store.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Nenhuma mensagem recebida");
    assert!(processor.calls().is_empty());
}

#[tokio::test]
async fn whitespace_message_reaches_processor() {
    let processor = Arc::new(StubProcessor::new(
        serde_json::json!({"status": "success", "data": {"text": " "}}),
    ));
    let store = Arc::new(RecordingStore::default());

    step(StubSource::with(" "), processor.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(processor.calls(), vec![" ".to_string()]);
    assert_eq!(store.saved().len(), 1);
}

#[tokio::test]
async fn success_persists_data_exactly_once() {
    let processor = Arc::new(StubProcessor::new(
        serde_json::json!({"status": "success", "data": {"text": "hello"}}),
    ));
    let store = Arc::new(RecordingStore::default());

    let outcome = step(StubSource::with("hello"), processor.clone(), store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(processor.calls(), vec!["hello".to_string()]);
    assert_eq!(store.saved(), vec![serde_json::json!({"text": "hello"})]);
    assert_eq!(outcome.message_id, "wamid.1");
    assert_eq!(outcome.document_id, "doc-1");
}

#[tokio::test]
async fn failure_embeds_processor_error() {
    let processor = Arc::new(StubProcessor::new(
        serde_json::json!({"status": "error", "error": "timeout"}),
    ));
    let store = Arc::new(RecordingStore::default());

    let err = step(StubSource::with("hello"), processor, store.clone())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Failed(_)));
    assert_eq!(err.to_string(), "Erro: timeout");
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn failure_without_error_uses_fallback() {
    let processor = Arc::new(StubProcessor::new(serde_json::json!({"status": "error"})));
    let store = Arc::new(RecordingStore::default());

    let err = step(StubSource::with("hello"), processor, store.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Erro: Falha genérica");
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn numeric_error_is_embedded_verbatim() {
    let processor = Arc::new(StubProcessor::new(
        serde_json::json!({"status": "error", "error": 500}),
    ));
    let store = Arc::new(RecordingStore::default());

    let err = step(StubSource::with("hello"), processor, store.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Erro: 500");
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn non_success_status_with_data_is_not_persisted() {
    let processor = Arc::new(StubProcessor::new(
        serde_json::json!({"status": "partial", "data": {"text": "hello"}}),
    ));
    let store = Arc::new(RecordingStore::default());

    let err = step(StubSource::with("hello"), processor, store.clone())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Erro: Falha genérica");
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn fetch_error_fails_the_run() {
    let processor = Arc::new(StubProcessor::new(serde_json::json!({"status": "success"})));
    let store = Arc::new(RecordingStore::default());
    let source = StubSource {
        message: None,
        fail: true,
    };

    let err = step(source, processor.clone(), store.clone())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Fetch(_)));
    assert!(processor.calls().is_empty());
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn persist_error_fails_the_run() {
    let processor = Arc::new(StubProcessor::new(
        serde_json::json!({"status": "success", "data": {"text": "hello"}}),
    ));
    let store = Arc::new(RecordingStore {
        saved: Mutex::new(Vec::new()),
        fail: true,
    });

    let err = step(StubSource::with("hello"), processor, store)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Persist(_)));
}

#[tokio::test]
async fn rerun_with_same_message_persists_again() {
    // Runs are stateless: the same latest message is processed on every run.
    let processor = Arc::new(StubProcessor::new(
        serde_json::json!({"status": "success", "data": {"text": "hello"}}),
    ));
    let store = Arc::new(RecordingStore::default());
    let step = step(StubSource::with("hello"), processor, store.clone());

    step.run().await.unwrap();
    step.run().await.unwrap();

    assert_eq!(store.saved().len(), 2);
}
