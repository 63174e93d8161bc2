//! Client-facing error kinds.
//!
//! Plumbing inside the store and the CLI stays on `anyhow`; these kinds are
//! what the serving layer maps onto HTTP status codes.

use thiserror::Error;

pub type Result<T, E = NegaBotError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum NegaBotError {
    /// Malformed or out-of-range input.
    #[error("{0}")]
    Validation(String),

    /// Request body could not be decoded.
    #[error("invalid request body: {0}")]
    BadRequest(String),

    /// The model call failed for this input.
    #[error("prediction failed: {0}")]
    Model(String),

    /// No model was loaded at startup.
    #[error("model not loaded")]
    ModelUnavailable,

    /// The prediction log could not be read or written.
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(u64),

    /// A response could not be produced, e.g. serialization failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NegaBotError {
    pub fn storage(err: anyhow::Error) -> Self {
        NegaBotError::Storage(err)
    }

    pub fn status_code(&self) -> u16 {
        match self {
            NegaBotError::Validation(_) => 422,
            NegaBotError::BadRequest(_) => 400,
            NegaBotError::Model(_) => 500,
            NegaBotError::ModelUnavailable => 503,
            NegaBotError::Storage(_) => 500,
            NegaBotError::NotFound(_) => 404,
            NegaBotError::MethodNotAllowed(_) => 405,
            NegaBotError::PayloadTooLarge(_) => 413,
            NegaBotError::Internal(_) => 500,
        }
    }

    /// Short machine-readable tag used in batch error entries.
    pub fn kind(&self) -> &'static str {
        match self {
            NegaBotError::Validation(_) => "validation_error",
            NegaBotError::BadRequest(_) => "bad_request",
            NegaBotError::Model(_) | NegaBotError::ModelUnavailable => "model_error",
            NegaBotError::Storage(_) => "storage_error",
            NegaBotError::NotFound(_) => "not_found",
            NegaBotError::MethodNotAllowed(_) => "method_not_allowed",
            NegaBotError::PayloadTooLarge(_) => "payload_too_large",
            NegaBotError::Internal(_) => "internal_error",
        }
    }
}
