//! Error types for the liveness runtime.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("platform capability unavailable: {0}")]
    Unsupported(&'static str),

    #[error("background worker error: {0}")]
    Worker(String),

    #[error("push manager error: {0}")]
    Push(String),

    #[error("realtime transport error: {0}")]
    Transport(String),

    #[error("server returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("push subscription still missing after validation")]
    SubscriptionUnavailable,

    #[error("{failed} of {total} channels failed to reopen")]
    ChannelsNotReopened { failed: usize, total: usize },

    #[error("manager is not initialized")]
    NotInitialized,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(#[from] pushwarden_core::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
