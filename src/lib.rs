//! Parley is the message-processing core of an AI chat client.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the event bus, the service container, the plugin
//!   lifecycle contract, the per-message state machine and the feature
//!   services (regeneration, streaming, editing, model selection) that the
//!   [`core::orchestrator::ChatOrchestrator`] sequences.
//! - [`commands`] wraps mutating operations as executable, undoable units
//!   with a bounded history.
//! - [`plugins`] ships the built-in plugins (plain-text rendering and
//!   transcript logging).
//! - [`api`] defines the JSON payloads exchanged with the AI edge functions.
//! - [`cli`] is the thin command-line surface used by the `parley` binary.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod commands;
pub mod core;
pub mod error;
pub mod plugins;
pub mod utils;

pub use crate::error::{ChatError, Result};
