//! Core types for apimock: mock records, annotated-JSON templates, schema
//! derivation, the URL pattern compiler, body edits and HAR import.

pub mod edit;
pub mod error;
pub mod har;
pub mod mock;
pub mod schema;
pub mod template;
pub mod url_pattern;

pub use edit::FieldPath;
pub use error::CoreError;
pub use har::{DEFAULT_MARKER, HarArchive, extract_drafts, parse_archive};
pub use mock::{MockDraft, MockId, MockRule, Verb, enforce_status_defaults, validate_endpoint};
pub use schema::{Schema, ScalarType, derive_schema};
pub use template::{
    Annotation, FieldAnnotation, extract_annotation_hints, parse_template,
    sanitize_generated_output,
};
pub use url_pattern::{
    CompiledUrl, VERB_PARAM, WILDCARD, compile, display_path, parse_verb, split_template,
    with_verb,
};
