//! polyide - Markup protocol engine for the Poly/ML compiler's IDE mode
//!
//! The compiler runs as a long-lived child process and speaks an
//! escape-framed markup protocol over its standard streams. This crate
//! owns that process, frames outbound compile and query commands,
//! incrementally parses the asynchronous response stream, correlates each
//! response with the request that produced it, and turns the answers into
//! typed editor events (diagnostics, selections, annotations).
//!
//! Layering:
//! - [`markup`] - wire representation and incremental parser
//! - [`models`] - spans, diagnostics, compile results
//! - [`engine`] - request table, dispatcher, editor-facing traits
//! - [`process`] - child process lifecycle and command encoding
//! - [`config`] / [`cli`] - configuration and the JSON-emitting CLI

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod markup;
pub mod models;
pub mod process;

pub use config::EngineConfig;
pub use error::{EngineError, IdeError, IdeResult};
pub use process::PolyProcess;
