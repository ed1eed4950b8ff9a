//! URL pattern compiler.
//!
//! Turns a user-entered endpoint (full URL or path, optionally with `<...>`
//! placeholders and an `MT=<verb>` query parameter) into a host-free,
//! path-rooted template such as `/api/v1/*/items?MT=GET`.
//!
//! # Rules
//!
//! 1. `<...>` placeholders become `*` before anything else, so they survive
//!    URL parsing unencoded.
//! 2. `http(s)://` input is parsed and its origin discarded; the verb comes
//!    from the `MT` query parameter. Path-only input is split at the first `?`.
//! 3. Path-only input without a leading `/` is rooted with one.
//! 4. Every purely numeric segment except the first becomes `*`. The first
//!    segment is exempt so the API root is never wildcarded.
//! 5. The verb is appended as `?MT=<VERB>`, upper-cased.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::CoreError;
use crate::mock::Verb;

/// Query parameter that carries the logical verb.
pub const VERB_PARAM: &str = "MT";

/// Token that matches any single path segment in a template.
pub const WILDCARD: &str = "*";

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static SCHEME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^https?://").unwrap());
static VERB_QUERY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"MT=([^&]+)").unwrap());

/// Base used to resolve path-only templates.
const RESOLVE_BASE: &str = "http://example.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUrl {
    /// `/<path>?MT=<VERB>`
    pub template: String,
    /// Wildcarded path without the query.
    pub path: String,
    pub verb: Verb,
}

/// Compile an endpoint into its template. The fallback verb applies when the
/// input carries no `MT` parameter.
pub fn compile(raw: &str, fallback: &Verb) -> Result<CompiledUrl, CoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CoreError::EmptyInput("endpoint"));
    }

    let replaced = PLACEHOLDER_RE.replace_all(raw, WILDCARD);

    let (path, verb) = if SCHEME_RE.is_match(&replaced) {
        let url = Url::parse(&replaced).map_err(|e| CoreError::InvalidUrl(format!("{raw}: {e}")))?;
        (url.path().to_string(), query_verb(&url))
    } else {
        let path = replaced.split('?').next().unwrap_or_default().to_string();
        (path, parse_verb(&replaced))
    };

    let verb = verb.filter(|v| !v.is_empty()).unwrap_or_else(|| fallback.clone());
    let path = wildcard_numeric_segments(&path);
    let template = format!("{path}?{VERB_PARAM}={verb}");

    Ok(CompiledUrl {
        template,
        path,
        verb,
    })
}

/// Verb from the first `MT=` occurrence in the query part, if any.
pub fn parse_verb(url: &str) -> Option<Verb> {
    let (_, query) = url.split_once('?')?;
    VERB_QUERY_RE
        .captures(query)
        .map(|caps| Verb::new(&caps[1]))
        .filter(|v| !v.is_empty())
}

/// Split a stored template (or a raw editable URL) into path and verb.
///
/// Resolves against a dummy origin so both forms are accepted; falls back to
/// a plain `?` split when resolution fails.
pub fn split_template(url: &str) -> (String, Option<Verb>) {
    let resolved = Url::parse(RESOLVE_BASE).and_then(|base| base.join(url));
    match resolved {
        Ok(parsed) => (parsed.path().to_string(), query_verb(&parsed)),
        Err(_) => {
            let path = url.split('?').next().unwrap_or_default().to_string();
            (path, parse_verb(url))
        }
    }
}

/// `url` with every `MT` query parameter set to `verb`; one is appended when
/// the query has none. Placeholders and other parameters are kept as typed.
pub fn with_verb(url: &str, verb: &Verb) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, query),
        None => (url, ""),
    };

    let mut found = false;
    let mut params: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((key, _)) if key == VERB_PARAM => {
                found = true;
                format!("{VERB_PARAM}={verb}")
            }
            _ => p.to_string(),
        })
        .collect();
    if !found {
        params.push(format!("{VERB_PARAM}={verb}"));
    }
    format!("{base}?{}", params.join("&"))
}

/// Path shown in listings: placeholders are kept as typed, otherwise numeric
/// segments are rendered as `<ID>`.
pub fn display_path(url: &str) -> String {
    if PLACEHOLDER_RE.is_match(url) {
        return url.split('?').next().unwrap_or_default().to_string();
    }

    match Url::parse(RESOLVE_BASE).and_then(|base| base.join(url)) {
        Ok(parsed) => parsed
            .path()
            .split('/')
            .map(|segment| if is_numeric(segment) { "<ID>" } else { segment })
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => url.to_string(),
    }
}

fn query_verb(url: &Url) -> Option<Verb> {
    url.query_pairs()
        .find(|(key, _)| key == VERB_PARAM)
        .map(|(_, value)| Verb::new(value))
        .filter(|v| !v.is_empty())
}

fn wildcard_numeric_segments(path: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| if i > 0 && is_numeric(s) { WILDCARD } else { s })
        .collect();
    format!("/{}", segments.join("/"))
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
