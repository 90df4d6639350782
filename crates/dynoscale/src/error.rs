//! Autoscaler error types.

use thiserror::Error;

/// Failures reported by a [`PlatformClient`](crate::platform::PlatformClient).
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("platform api error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Errors surfaced to the [`ErrorHandler`](crate::handler::ErrorHandler).
#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("platform error for {process}: {source}")]
    Platform {
        process: String,
        #[source]
        source: PlatformError,
    },

    #[error("state store error: {0}")]
    State(#[from] dynoscale_state::StateError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type AutoscaleResult<T> = Result<T, AutoscaleError>;
