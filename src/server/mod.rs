//! HTTP service for the message store.
//!
//! [`router::app`] builds the axum route table; [`Server`] binds it to an
//! address and handles graceful shutdown.

pub mod error;
pub mod pages;
pub mod router;

pub use error::ApiError;
pub use pages::{DirectorySource, EmbeddedSource, Pages, TemplateSource};
pub use router::{app, AppState, Server};
