use apimock_core::MockId;
use apimock_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule transaction rejected: {0}")]
    Transaction(String),

    #[error("mock {id} has no usable template: {template:?}")]
    InvalidTemplate { id: MockId, template: String },

    #[error("invalid url filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("rule table io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rule table json error: {0}")]
    Json(#[from] serde_json::Error),
}
