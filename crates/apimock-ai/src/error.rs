use apimock_core::CoreError;
use thiserror::Error;

use crate::generator::UnavailableReason;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("template is empty")]
    EmptyInput,

    #[error("generation capability unavailable: {0}")]
    CapabilityUnavailable(UnavailableReason),

    #[error("model output is not valid JSON: {0}")]
    MalformedJson(#[source] CoreError),

    #[error("generation cancelled")]
    Cancelled,

    #[error("model backend error: {0}")]
    Backend(String),

    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "http")]
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
}
