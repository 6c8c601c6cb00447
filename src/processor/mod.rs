//! Message processors.

pub mod chatgpt;

pub use chatgpt::ChatGptProcessor;
