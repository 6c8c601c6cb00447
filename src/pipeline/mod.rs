//! Message processing pipeline — fetch, process, persist.

pub mod step;
pub mod types;

pub use step::{PipelineStep, StepOutcome};
pub use types::{DocumentStore, InboundMessage, MessageProcessor, MessageSource, ProcessResult};
