//! Inbound messaging channels.

pub mod whatsapp;

pub use whatsapp::WhatsAppListener;
