//! Persisted mock records and the draft a user composes before saving one.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CoreError;
use crate::edit::{self, FieldPath};
use crate::template::parse_template;
use crate::url_pattern::{self, CompiledUrl};

/// Top-level field that carries the response status.
pub const STATUS_FIELD: &str = "ResponseStatus";

/// Error indicators inside [`STATUS_FIELD`]; always zero in a mock body.
pub const STATUS_ERROR_FIELDS: [&str; 2] = ["ErrorModule", "ErrorCode"];

/// Native rule ids are reduced into `1..=RULE_ID_MODULUS`.
pub const RULE_ID_MODULUS: u64 = 65_535;

const MAX_MOCK_ID: i64 = i32::MAX as i64;

static ENDPOINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https?://\S+|/[^\s?]+(\?\S*)?)$").unwrap());

/// Stable identifier of a mock, in `[1, 2^31 - 1]`.
///
/// Deserializes from a number or a numeric string (older records store the
/// id as text, sometimes far outside the range); both are reduced into range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawMockId")]
pub struct MockId(pub i64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMockId {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
}

impl TryFrom<RawMockId> for MockId {
    type Error = String;

    fn try_from(raw: RawMockId) -> Result<Self, Self::Error> {
        let magnitude = match raw {
            RawMockId::Signed(n) => u128::from(n.unsigned_abs()),
            RawMockId::Unsigned(n) => u128::from(n),
            RawMockId::Float(f) if f.is_finite() => f.abs().trunc() as u128,
            RawMockId::Float(f) => return Err(format!("mock id {f} is not a finite number")),
            RawMockId::Text(text) => parse_id_text(&text)?,
        };
        Ok(Self::reduce(magnitude))
    }
}

/// Digits of a textual id, `.` separators ignored. Overlong inputs are folded
/// modulo the id range while parsing.
fn parse_id_text(text: &str) -> Result<u128, String> {
    let digits: Vec<u8> = text
        .trim()
        .trim_start_matches('-')
        .bytes()
        .filter(|b| *b != b'.')
        .collect();
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(format!("mock id {text:?} is not numeric"));
    }

    let modulus = MAX_MOCK_ID as u128;
    let fold = digits.len() > 30;
    Ok(digits.iter().fold(0u128, |acc, d| {
        let next = acc * 10 + u128::from(d - b'0');
        if fold { next % modulus } else { next }
    }))
}

impl MockId {
    /// Keep in-range values; bring anything else into `[1, 2^31 - 1]`.
    fn reduce(magnitude: u128) -> Self {
        let max = MAX_MOCK_ID as u128;
        if (1..=max).contains(&magnitude) {
            Self(magnitude as i64)
        } else {
            Self(((magnitude % max) as i64).max(1))
        }
    }

    /// Generate an id from the current time and a random salt.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let salt = rand::thread_rng().gen_range(0..1000);
        let seed = millis.wrapping_mul(1000).wrapping_add(salt);
        Self(seed.rem_euclid(MAX_MOCK_ID).max(1))
    }

    /// Generate an id that is not in `taken`.
    pub fn generate_unique(taken: &HashSet<MockId>) -> Self {
        let mut id = Self::generate();
        while taken.contains(&id) {
            id = Self(id.0 % MAX_MOCK_ID + 1);
        }
        id
    }

    /// Preferred native rule id: `abs(id) mod 65535`, at least 1.
    pub fn rule_id(self) -> u32 {
        ((self.0.unsigned_abs() % RULE_ID_MODULUS) as u32).max(1)
    }
}

impl fmt::Display for MockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical request verb, carried in the `MT` query parameter. Always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Verb(String);

impl Verb {
    pub fn new(verb: impl AsRef<str>) -> Self {
        Self(verb.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Verb {
    fn default() -> Self {
        Self("GET".into())
    }
}

impl From<String> for Verb {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Verb {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Verb> for String {
    fn from(v: Verb) -> Self {
        v.0
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A saved URL + verb + JSON body substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockRule {
    pub id: MockId,
    /// Endpoint as the user typed it, placeholders included.
    #[serde(default)]
    pub original_url: String,
    /// Compiled, path-rooted template such as `/api/*/status?MT=GET`.
    #[serde(alias = "url")]
    pub url_template: String,
    #[serde(alias = "method", default)]
    pub verb: Verb,
    #[serde(alias = "mockData")]
    pub body: Value,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl MockRule {
    /// Endpoint shown for re-editing: the original input when known.
    pub fn editable_url(&self) -> &str {
        if self.original_url.is_empty() {
            &self.url_template
        } else {
            &self.original_url
        }
    }
}

/// A mock being composed or edited. Owned by the caller and passed
/// explicitly; nothing about it is global.
#[derive(Debug, Clone, PartialEq)]
pub struct MockDraft {
    /// Present when editing a saved mock.
    pub id: Option<MockId>,
    pub original_url: String,
    pub url_template: String,
    pub verb: Verb,
    pub body: Value,
    /// Parsed template the body started from; seeds new array items.
    pub structure: Value,
}

impl MockDraft {
    /// Compose a draft from an endpoint and an annotated template.
    pub fn compose(
        url_input: &str,
        fallback_verb: &Verb,
        template_text: &str,
    ) -> Result<Self, CoreError> {
        let url_input = url_input.trim();
        if url_input.is_empty() {
            return Err(CoreError::EmptyInput("endpoint"));
        }
        if template_text.trim().is_empty() {
            return Err(CoreError::EmptyInput("template"));
        }
        validate_endpoint(url_input)?;

        let structure = parse_template(template_text)?;
        Self::assemble(url_input, fallback_verb, structure)
    }

    /// Wrap a tree produced by the generation adapter.
    pub fn from_generated(
        url_input: &str,
        fallback_verb: &Verb,
        tree: Value,
    ) -> Result<Self, CoreError> {
        let url_input = url_input.trim();
        if url_input.is_empty() {
            return Err(CoreError::EmptyInput("endpoint"));
        }
        validate_endpoint(url_input)?;
        Self::assemble(url_input, fallback_verb, tree)
    }

    /// Re-open a saved mock for editing.
    pub fn from_rule(rule: &MockRule) -> Self {
        let verb = if rule.verb.is_empty() {
            url_pattern::split_template(&rule.url_template)
                .1
                .unwrap_or_default()
        } else {
            rule.verb.clone()
        };

        let mut body = rule.body.clone();
        enforce_status_defaults(&mut body);

        Self {
            id: Some(rule.id),
            original_url: rule.editable_url().to_string(),
            url_template: rule.url_template.clone(),
            verb,
            structure: body.clone(),
            body,
        }
    }

    fn assemble(url_input: &str, fallback_verb: &Verb, tree: Value) -> Result<Self, CoreError> {
        let CompiledUrl { template, verb, .. } = url_pattern::compile(url_input, fallback_verb)?;

        let mut body = tree;
        enforce_status_defaults(&mut body);

        Ok(Self {
            id: None,
            original_url: url_input.to_string(),
            url_template: template,
            verb,
            structure: body.clone(),
            body,
        })
    }

    /// Set a body leaf from raw editor input.
    pub fn set_field(&mut self, path: &str, raw: &str) -> Result<(), CoreError> {
        let path = FieldPath::parse(path)?;
        let current = edit::get(&self.body, &path)
            .ok_or_else(|| CoreError::PathNotFound(path.to_string()))?;
        let value = edit::coerce_input(&path, raw, current);
        edit::set_field(&mut self.body, &path, value)
    }

    pub fn push_array_item(&mut self, path: &str) -> Result<(), CoreError> {
        let path = FieldPath::parse(path)?;
        edit::push_array_item(&mut self.body, &path, Some(&self.structure))
    }

    pub fn remove_array_item(&mut self, path: &str, index: usize) -> Result<(), CoreError> {
        let path = FieldPath::parse(path)?;
        edit::remove_array_item(&mut self.body, &path, index)
    }

    /// Produce the record to persist, assigning an id outside `taken` when the
    /// draft does not have one yet.
    pub fn into_rule(self, taken: &HashSet<MockId>) -> MockRule {
        let id = self.id.unwrap_or_else(|| MockId::generate_unique(taken));
        MockRule {
            id,
            original_url: self.original_url,
            url_template: self.url_template,
            verb: self.verb,
            body: self.body,
            enabled: true,
        }
    }
}

/// Force the status error indicators to zero when the status field is present.
pub fn enforce_status_defaults(tree: &mut Value) {
    if let Some(Value::Object(status)) = tree.get_mut(STATUS_FIELD) {
        for field in STATUS_ERROR_FIELDS {
            status.insert(field.to_string(), Value::from(0));
        }
    }
}

/// Accept a full `http(s)://` URL or a `/`-rooted path with optional query.
pub fn validate_endpoint(text: &str) -> Result<(), CoreError> {
    if ENDPOINT_RE.is_match(text.trim()) {
        Ok(())
    } else {
        Err(CoreError::InvalidUrl(text.to_string()))
    }
}
