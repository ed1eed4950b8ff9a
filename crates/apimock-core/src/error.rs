use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0} is empty")]
    EmptyInput(&'static str),

    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    InvalidUrl(String),

    #[error("no field at path {0}")]
    PathNotFound(String),
}
