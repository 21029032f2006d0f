//! Error types for the chat server.

use thiserror::Error;

use crate::registry::ConnId;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] shared::FrameError),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("index persistence failed: {0}")]
    Persist(#[from] bincode::Error),
    #[error("failed to load corpus {path}: {source}")]
    Corpus {
        path: String,
        source: std::io::Error,
    },
    #[error("{0:?} cannot be used as an index name")]
    InvalidIndexName(String),
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnId),
    #[error("connection {0} is not reading, outbound queue full")]
    Backlogged(ConnId),
}

/// Bookkeeping failures reported by the connection registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0} is already logged in")]
    DuplicateName(String),
    #[error("connection {0} is not awaiting login")]
    NotPending(ConnId),
}
