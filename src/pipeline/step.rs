//! The pipeline step: fetch the latest message, process it, persist the result.
//!
//! Flow:
//! 1. Fetch → no message fails the run
//! 2. Process → non-success fails the run
//! 3. Persist → only reached on success, exactly one write
//!
//! There is no local recovery. Every failure is returned to the scheduler,
//! whose retry policy is the only recovery path.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::pipeline::types::{DocumentStore, MessageProcessor, MessageSource, ProcessResult};

/// Error text when the source has no message.
pub const NO_MESSAGE_ERROR: &str = "Nenhuma mensagem recebida";

/// Fallback description when the processor fails without one.
pub const GENERIC_FAILURE: &str = "Falha genérica";

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// ID of the processed message.
    pub message_id: String,
    /// ID of the persisted document.
    pub document_id: String,
}

/// One fetch → process → persist pass over the three collaborators.
pub struct PipelineStep {
    source: Arc<dyn MessageSource>,
    processor: Arc<dyn MessageProcessor>,
    store: Arc<dyn DocumentStore>,
}

impl PipelineStep {
    pub fn new(
        source: Arc<dyn MessageSource>,
        processor: Arc<dyn MessageProcessor>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            source,
            processor,
            store,
        }
    }

    /// Execute one run.
    pub async fn run(&self) -> Result<StepOutcome, PipelineError> {
        let message = match self.source.get_latest_message().await? {
            Some(message) if !message.is_empty() => message,
            _ => {
                warn!(source = self.source.name(), "No message available");
                return Err(PipelineError::Failed(NO_MESSAGE_ERROR.to_string()));
            }
        };

        info!(
            id = %message.id,
            channel = %message.channel,
            sender = %message.sender,
            "Processing latest message"
        );

        let result = self.processor.process(&message).await;
        debug!(id = %message.id, outcome = result.label(), "Processor returned");

        match result {
            ProcessResult::Success { data } => {
                let document_id = self.store.save(&data).await?;
                info!(id = %message.id, document_id = %document_id, "Result persisted");
                Ok(StepOutcome {
                    message_id: message.id,
                    document_id,
                })
            }
            ProcessResult::Failure { error } => {
                let detail = error.as_deref().unwrap_or(GENERIC_FAILURE);
                warn!(id = %message.id, error = %detail, "Processing failed");
                Err(processing_failed(error.as_deref()))
            }
        }
    }
}

/// Build the run failure for a non-success processor outcome.
pub fn processing_failed(error: Option<&str>) -> PipelineError {
    PipelineError::Failed(format!("Erro: {}", error.unwrap_or(GENERIC_FAILURE)))
}
