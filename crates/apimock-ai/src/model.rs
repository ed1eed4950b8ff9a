//! The language-model capability, as seen by the generator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// Supported, but the model has to be fetched first.
    Downloadable,
    Downloading,
    /// Not supported on this machine.
    Unavailable,
}

/// One prompt: the instruction text plus a JSON Schema the answer must follow.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    pub instruction: String,
    pub response_constraint: Value,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn availability(&self) -> Result<Availability, GenerationError>;

    /// Start fetching the model.
    async fn request_download(&self) -> Result<(), GenerationError>;

    async fn create_session(
        &self,
        system_prompt: &str,
    ) -> Result<Arc<dyn ModelSession>, GenerationError>;
}

#[async_trait]
pub trait ModelSession: Send + Sync {
    /// Single round trip; no retries.
    async fn prompt(&self, request: &PromptRequest) -> Result<String, GenerationError>;

    async fn destroy(&self);
}
