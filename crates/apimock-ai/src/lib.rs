//! Generation layer: fills annotated templates with realistic mock data using
//! a local language model, constrained by the template's derived schema.

mod error;
mod generator;
mod model;
pub mod prompt;

#[cfg(feature = "http")]
pub mod ollama;

pub use error::GenerationError;
pub use generator::{MockGenerator, Readiness, UnavailableReason};
pub use model::{Availability, LanguageModel, ModelSession, PromptRequest};

#[cfg(feature = "http")]
pub use ollama::OllamaModel;
