//! Message pipeline — scheduled WhatsApp → ChatGPT → document store task.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod scheduler;
pub mod store;
