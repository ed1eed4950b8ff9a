//! Matcher for the declarative engine's URL-filter syntax.
//!
//! | token        | meaning                                               |
//! |--------------|-------------------------------------------------------|
//! | `*`          | any run of characters                                 |
//! | `^`          | a separator (not a letter, digit, `_ - . %`) or end   |
//! | leading `\|\|` | start of the host, optionally after subdomains      |
//! | leading `\|`  | start of the URL                                      |
//! | trailing `\|` | end of the URL                                        |
//!
//! Without anchors a filter matches anywhere in the URL. Matching is
//! case-insensitive.

use regex::Regex;

use crate::RuleError;

const SEPARATOR: &str = r"(?:[^A-Za-z0-9_\-.%]|$)";
const DOMAIN_ANCHOR: &str = r"^[A-Za-z][A-Za-z0-9+.\-]*://(?:[^/?#]*\.)?";

#[derive(Debug, Clone)]
pub struct UrlFilter {
    source: String,
    regex: Regex,
}

impl UrlFilter {
    pub fn parse(filter: &str) -> Result<Self, RuleError> {
        let invalid = |reason: &str| RuleError::InvalidFilter {
            filter: filter.to_string(),
            reason: reason.to_string(),
        };
        if filter.is_empty() {
            return Err(invalid("empty filter"));
        }
        if !filter.is_ascii() {
            return Err(invalid("non-ASCII characters"));
        }

        let (prefix, body) = if let Some(rest) = filter.strip_prefix("||") {
            (DOMAIN_ANCHOR, rest)
        } else if let Some(rest) = filter.strip_prefix('|') {
            ("^", rest)
        } else {
            ("", filter)
        };
        let (body, suffix) = match body.strip_suffix('|') {
            Some(rest) => (rest, "$"),
            None => (body, ""),
        };

        let mut pattern = String::from("(?i)");
        pattern.push_str(prefix);
        for c in body.chars() {
            match c {
                '*' => pattern.push_str(".*"),
                '^' => pattern.push_str(SEPARATOR),
                other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        pattern.push_str(suffix);

        let regex = Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            source: filter.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}
