//! Annotated-JSON templates.
//!
//! A template is a JSON document that carries block-comment annotations next
//! to its fields and `@`-prefixed meta fields:
//!
//! ```text
//! {
//!   "@ResponseStatus": /* req, xs:object, note:status carrier */,
//!   "ResponseStatus": { "ErrorCode": 0, "ErrorModule": 0 },
//!   "DeviceName": "gate-01" /* req, xs:string, note:display name */
//! }
//! ```
//!
//! Annotations and meta fields never reach the clean value tree. All text
//! scanning here is string-literal aware, so `/*`, `@` or `,}` inside a JSON
//! string value are left alone.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::CoreError;
use crate::mock::enforce_status_defaults;

/// Keys starting with this marker are meta fields.
pub const META_PREFIX: char = '@';

/// Models occasionally emit a field keyed by a single space.
pub const BLANK_KEY: &str = " ";

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```(?:json)?").unwrap());

static FIELD_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)"\s*:"#).unwrap());

/// Annotation carried by a block comment: `/* req, xs:<type>, note:<description> */`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub type_tag: Option<String>,
    pub description: Option<String>,
}

impl Annotation {
    /// Parse the inside of a block comment. Anything that is not an `xs:` or
    /// `note:` part is dropped; descriptions may contain commas.
    pub fn parse(inner: &str) -> Self {
        let mut type_tag = None;
        let mut description: Option<String> = None;
        let mut in_note = false;

        for part in inner.split(',') {
            let trimmed = part.trim();
            if let Some(rest) = trimmed.strip_prefix("xs:") {
                type_tag = Some(rest.trim().to_string());
                in_note = false;
            } else if let Some(rest) = trimmed.strip_prefix("note:") {
                description = Some(rest.trim().to_string());
                in_note = true;
            } else if in_note {
                if let Some(desc) = description.as_mut() {
                    desc.push(',');
                    desc.push_str(part);
                }
            }
        }

        Self {
            type_tag: type_tag.filter(|t| !t.is_empty()),
            description: description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.type_tag.is_none() && self.description.is_none()
    }

    /// Condensed comment form used in generation prompts; empty when the
    /// annotation has neither sub-field.
    pub fn render(&self) -> String {
        let parts: Vec<String> = [
            self.type_tag.as_ref().map(|t| format!("xs:{t}")),
            self.description.as_ref().map(|d| format!("note:{d}")),
        ]
        .into_iter()
        .flatten()
        .collect();

        if parts.is_empty() {
            String::new()
        } else {
            format!("/* {} */", parts.join(", "))
        }
    }
}

/// An annotation together with the field key written closest before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAnnotation {
    pub field: Option<String>,
    pub annotation: Annotation,
}

/// Parse template text into a clean value tree.
///
/// Removes every block comment and every meta field (at any depth), then
/// parses the remainder as JSON.
pub fn parse_template(text: &str) -> Result<Value, CoreError> {
    if text.trim().is_empty() {
        return Err(CoreError::EmptyInput("template"));
    }

    let stripped = strip_annotations(text);
    let stripped = strip_fields(&stripped, is_meta_key);

    let mut tree: Value = serde_json::from_str(stripped.trim())?;
    prune_fields(&mut tree, &is_meta_key);
    Ok(tree)
}

/// Template text with annotations and meta fields removed but otherwise
/// untouched. This is what schema derivation sees.
pub fn strip_for_schema(text: &str) -> String {
    let stripped = strip_annotations(text);
    strip_fields(&stripped, is_meta_key).trim().to_string()
}

/// Condense every annotation comment to its type tag and description.
///
/// Comments with neither collapse to nothing; everything else, including the
/// position of each comment next to its field, is preserved.
pub fn extract_annotation_hints(text: &str) -> String {
    rewrite_comments(text, |inner| Annotation::parse(inner).render()).into_owned()
}

/// List every annotation in the template with the nearest preceding field key.
pub fn field_annotations(text: &str) -> Vec<FieldAnnotation> {
    comment_spans(text)
        .into_iter()
        .map(|(start, end)| {
            let field = FIELD_KEY_RE
                .captures_iter(&text[..start])
                .last()
                .map(|caps| caps[1].to_string());
            FieldAnnotation {
                field,
                annotation: Annotation::parse(&text[start + 2..end - 2]),
            }
        })
        .collect()
}

/// Turn raw model output into a clean value tree.
///
/// Strips code fences, residual annotations, meta fields and blank-space keyed
/// fields, drops the trailing commas those removals leave behind, parses, then
/// prunes blank-space and meta keys at every depth. The status error fields are
/// always zeroed afterwards.
pub fn sanitize_generated_output(raw: &str) -> Result<Value, CoreError> {
    let unfenced = FENCE_RE.replace_all(raw, "");
    let text = strip_annotations(json_span(unfenced.trim()));
    let text = strip_fields(&text, is_generated_noise);
    let text = remove_trailing_commas(&text);

    let mut tree: Value = serde_json::from_str(text.trim())?;
    prune_fields(&mut tree, &is_generated_noise);
    enforce_status_defaults(&mut tree);
    Ok(tree)
}

/// Remove every block comment.
pub fn strip_annotations(text: &str) -> Cow<'_, str> {
    rewrite_comments(text, |_| String::new())
}

/// Remove every object field whose key matches `drop`, at any depth.
pub fn prune_fields(value: &mut Value, drop: &dyn Fn(&str) -> bool) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| !drop(key.as_str()));
            for child in map.values_mut() {
                prune_fields(child, drop);
            }
        }
        Value::Array(items) => {
            for item in items {
                prune_fields(item, drop);
            }
        }
        _ => {}
    }
}

pub fn is_meta_key(key: &str) -> bool {
    key.starts_with(META_PREFIX)
}

fn is_generated_noise(key: &str) -> bool {
    is_meta_key(key) || key == BLANK_KEY
}

// ── Scanning ──

/// Byte offset just past the string literal opening at `start`.
fn string_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Byte offset just past the JSON value starting at `start`. Scalars (and
/// values emptied by comment removal) end before the next `,`, `}` or `]`.
fn value_end(bytes: &[u8], start: usize) -> usize {
    match bytes.get(start) {
        Some(b'"') => string_end(bytes, start),
        Some(b'{') | Some(b'[') => {
            let mut depth = 0usize;
            let mut i = start;
            while i < bytes.len() {
                match bytes[i] {
                    b'"' => {
                        i = string_end(bytes, i);
                        continue;
                    }
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            return i + 1;
                        }
                    }
                    _ => {}
                }
                i += 1;
            }
            bytes.len()
        }
        _ => bytes
            .get(start..)
            .and_then(|rest| rest.iter().position(|b| matches!(b, b',' | b'}' | b']')))
            .map_or(bytes.len(), |p| start + p),
    }
}

/// `(start, end)` byte spans of every block comment outside string literals.
/// Each comment ends at the first `*/` after it opens.
fn comment_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => i = string_end(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let Some(close) = text[i + 2..].find("*/") else {
                    break;
                };
                let end = i + 2 + close + 2;
                spans.push((i, end));
                i = end;
            }
            _ => i += 1,
        }
    }
    spans
}

fn rewrite_comments(text: &str, mut replace: impl FnMut(&str) -> String) -> Cow<'_, str> {
    let spans = comment_spans(text);
    if spans.is_empty() {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    for (start, end) in spans {
        out.push_str(&text[copied..start]);
        out.push_str(&replace(&text[start + 2..end - 2]));
        copied = end;
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}

/// Remove `"key": value` members whose key matches `drop`, together with the
/// comma that separated each from its neighbours.
fn strip_fields(text: &str, drop: impl Fn(&str) -> bool) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'"' {
            i += 1;
            continue;
        }
        let key_end = string_end(bytes, i);
        let colon = skip_ws(bytes, key_end);
        if bytes.get(colon) != Some(&b':') || !drop(&text[i + 1..key_end - 1]) {
            i = key_end;
            continue;
        }

        let mut end = skip_ws(bytes, value_end(bytes, skip_ws(bytes, colon + 1)));
        out.push_str(&text[copied..i]);
        if bytes.get(end) == Some(&b',') {
            end += 1;
        } else {
            // Last member: drop the comma that preceded it.
            out.truncate(out.trim_end().len());
            if out.ends_with(',') {
                out.pop();
            }
        }
        copied = end;
        i = end;
    }

    if copied == 0 {
        return Cow::Borrowed(text);
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}

/// Drop commas directly followed by a closing `}` or `]`.
fn remove_trailing_commas(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => i = string_end(bytes, i),
            b',' if matches!(bytes.get(skip_ws(bytes, i + 1)), Some(b'}') | Some(b']')) => {
                out.push_str(&text[copied..i]);
                copied = i + 1;
                i += 1;
            }
            _ => i += 1,
        }
    }

    if copied == 0 {
        return Cow::Borrowed(text);
    }
    out.push_str(&text[copied..]);
    Cow::Owned(out)
}

/// Narrow model output to its outermost JSON object or array, dropping any
/// prose around it.
fn json_span(text: &str) -> &str {
    let start = text.find(['{', '[']);
    let end = text.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}
