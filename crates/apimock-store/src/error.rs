use apimock_core::{CoreError, MockId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no mock with id {0}")]
    NotFound(MockId),

    #[error(transparent)]
    Core(#[from] CoreError),
}
