//! rendezvous-messaging: client-side orchestration of encrypted messaging.
//!
//! Ties the crypto crate to the backend: protocol selection per session,
//! the send state machine, decryption of stored and live messages, media
//! attachments, configuration and tracing setup.

pub mod config;
pub mod orchestrator;
pub mod payload;
pub mod ports;
pub mod protocol;
pub mod session;
pub mod telemetry;
