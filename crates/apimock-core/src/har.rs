//! HAR (HTTP Archive) import: turns recorded API responses into drafts.

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::CoreError;
use crate::mock::{MockDraft, Verb};
use crate::url_pattern::VERB_PARAM;

/// Substring that marks an archived request as an API call.
pub const DEFAULT_MARKER: &str = "ISAPI";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarArchive {
    #[serde(default)]
    pub log: HarLog,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarLog {
    #[serde(default)]
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarEntry {
    #[serde(default)]
    pub request: HarRequest,
    #[serde(default)]
    pub response: HarResponse,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarResponse {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub content: HarContent,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarContent {
    pub text: Option<String>,
}

pub fn parse_archive(text: &str) -> Result<HarArchive, CoreError> {
    if text.trim().is_empty() {
        return Err(CoreError::EmptyInput("archive"));
    }
    Ok(serde_json::from_str(text)?)
}

/// Drafts for every entry whose URL contains `marker` and whose response
/// text is JSON. Entries are not filtered by status.
pub fn extract_drafts(archive: &HarArchive, marker: &str) -> Vec<MockDraft> {
    let drafts: Vec<MockDraft> = archive
        .log
        .entries
        .iter()
        .filter(|entry| entry.request.url.contains(marker))
        .filter_map(entry_draft)
        .collect();

    tracing::info!(
        entries = archive.log.entries.len(),
        imported = drafts.len(),
        marker,
        "extracted mocks from archive"
    );
    drafts
}

fn entry_draft(entry: &HarEntry) -> Option<MockDraft> {
    let url = entry.request.url.as_str();
    let text = entry.response.content.text.as_deref().filter(|t| !t.is_empty())?;
    let body: Value = serde_json::from_str(text).ok()?;

    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(url, error = %e, "skipping archive entry with bad URL");
            return None;
        }
    };
    let verb = parsed
        .query_pairs()
        .find(|(key, _)| key == VERB_PARAM)
        .map(|(_, value)| Verb::new(value))
        .filter(|v| !v.is_empty())
        .unwrap_or_default();

    match MockDraft::from_generated(url, &verb, body) {
        Ok(draft) => Some(draft),
        Err(e) => {
            tracing::debug!(url, error = %e, "skipping archive entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARCHIVE: &str = r#"{
        "log": {
            "entries": [
                {
                    "request": {"url": "http://10.0.0.2/ISAPI/System/deviceInfo?MT=get"},
                    "response": {"status": 200, "content": {"text": "{\"ResponseStatus\":{\"ErrorCode\":5},\"Name\":\"cam\"}"}}
                },
                {
                    "request": {"url": "http://10.0.0.2/ISAPI/Event/12/alarms"},
                    "response": {"status": 500, "content": {"text": "[1,2]"}}
                },
                {
                    "request": {"url": "http://10.0.0.2/static/app.js"},
                    "response": {"status": 200, "content": {"text": "{}"}}
                },
                {
                    "request": {"url": "http://10.0.0.2/ISAPI/html"},
                    "response": {"status": 200, "content": {"text": "<html>"}}
                },
                {
                    "request": {"url": "/ISAPI/relative"},
                    "response": {"status": 200, "content": {"text": "{}"}}
                },
                {
                    "request": {"url": "http://10.0.0.2/ISAPI/empty"},
                    "response": {"status": 204, "content": {}}
                }
            ]
        }
    }"#;

    #[test]
    fn extracts_marked_json_entries() {
        let archive = parse_archive(ARCHIVE).unwrap();
        let drafts = extract_drafts(&archive, DEFAULT_MARKER);
        assert_eq!(drafts.len(), 2);

        assert_eq!(drafts[0].url_template, "/ISAPI/System/deviceInfo?MT=GET");
        assert_eq!(drafts[0].verb.as_str(), "GET");
        assert_eq!(
            drafts[0].original_url,
            "http://10.0.0.2/ISAPI/System/deviceInfo?MT=get"
        );
        assert_eq!(drafts[0].body["ResponseStatus"]["ErrorCode"], 0);

        assert_eq!(drafts[1].url_template, "/ISAPI/Event/*/alarms?MT=GET");
        assert_eq!(drafts[1].body, serde_json::json!([1, 2]));
    }

    #[test]
    fn custom_marker() {
        let archive = parse_archive(ARCHIVE).unwrap();
        let drafts = extract_drafts(&archive, "static");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].url_template, "/static/app.js?MT=GET");
    }

    #[test]
    fn invalid_archive_text() {
        assert!(matches!(parse_archive("nope"), Err(CoreError::MalformedJson(_))));
        assert!(matches!(parse_archive(""), Err(CoreError::EmptyInput(_))));
        let empty = parse_archive("{}").unwrap();
        assert!(extract_drafts(&empty, DEFAULT_MARKER).is_empty());
    }
}
