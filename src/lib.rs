//! Greetd serves a single, persisted free-text message.
//!
//! The message lives in `<data>/message.json` and is shared by the HTTP
//! service and the command-line tool. The service also exposes health and
//! greeting endpoints, a minimal web UI, a log viewer and API documentation.
//!
//! ## Core Components
//! - [`engine`]: The message store and its atomic JSON persistence.
//! - [`config`]: Layered configuration (defaults, file, environment, flags).
//! - [`server`]: The HTTP router, handlers and HTML pages.
//! - [`logging`]: `env_logger` setup writing to stdout and `<data>/app.log`.

pub mod config;
pub mod engine;
pub mod logging;
pub mod server;
pub mod version;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// The value a freshly created store holds.
pub const DEFAULT_MESSAGE: &str = "Hello, World!";

/// Errors returned by the message store.
#[derive(Error, Debug)]
pub enum Error {
    /// Reading, writing or renaming the backing document failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The backing document exists but is not a valid message document.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A specialized Result type for message store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Read access to the current message.
#[async_trait]
pub trait MessageReader: Send + Sync {
    /// Returns the current message. Never fails.
    async fn get_message(&self) -> String;
}

/// Write access to the current message.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Replaces the message. Returns only once the new value is on disk.
    async fn set_message(&self, message: &str) -> Result<()>;
}

/// Everything the HTTP layer needs from a message store.
pub trait MessageBackend: MessageReader + MessageWriter {}

impl<T: MessageReader + MessageWriter> MessageBackend for T {}
