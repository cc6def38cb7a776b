//! Backend seam: the game service contract and its HTTP implementation, plus the polling
//! engine that drives a pending command to completion.

mod http;
pub(crate) mod poller;

pub use http::HttpBackend;

use crate::model::{
    CharacterResponse, CommandRequest, CommandResponse, CommandToken, StartResponse,
    StatusResponse,
};
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a single backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("unknown command id {0}")]
    UnknownToken(CommandToken),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether a poll tick that hit this error should simply try again on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport(_) => true,
            BackendError::Http { status, .. } => *status >= 500,
            BackendError::UnknownToken(_) | BackendError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Remote game service. Everything the front end knows about game state arrives through it.
#[async_trait]
pub trait GameBackend: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    async fn start(&self) -> Result<StartResponse, BackendError>;

    async fn command(&self, request: &CommandRequest) -> Result<CommandResponse, BackendError>;

    async fn status(&self, id: &CommandToken) -> Result<StatusResponse, BackendError>;

    async fn character(&self) -> Result<CharacterResponse, BackendError>;
}
