//! Rule shapes as the declarative engine expects them, and the mapping from a
//! persisted mock to one redirect rule.

use std::fmt;
use std::ops::RangeInclusive;

use apimock_core::MockRule;
use apimock_core::url_pattern::{VERB_PARAM, split_template};
use serde::{Deserialize, Serialize};

use crate::RuleError;

/// Rule ids this tool owns. Ids outside the range are never touched.
pub const MANAGED_RULE_IDS: RangeInclusive<u32> = 1..=65_535;

pub const RULE_PRIORITY: u32 = 1;

/// Physical method of every intercepted call; the logical verb travels in `MT`.
pub const TRANSPORT_METHOD: RequestMethod = RequestMethod::Post;

pub const DATA_URL_PREFIX: &str = "data:application/json,";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: u32,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

fn default_priority() -> u32 {
    RULE_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    Redirect { redirect: Redirect },
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redirect {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub url_filter: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<ResourceType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_methods: Vec<RequestMethod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "main_frame")]
    MainFrame,
    #[serde(rename = "sub_frame")]
    SubFrame,
    #[serde(rename = "script")]
    Script,
    #[serde(rename = "xmlhttprequest")]
    XmlHttpRequest,
    #[serde(rename = "other")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl RequestMethod {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            "head" => Some(Self::Head),
            "options" => Some(Self::Options),
            _ => None,
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Delete => "delete",
            Self::Head => "head",
            Self::Options => "options",
        };
        f.write_str(name)
    }
}

/// One atomic update of the dynamic rule table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTransaction {
    pub remove_rule_ids: Vec<u32>,
    pub add_rules: Vec<Rule>,
}

pub fn is_managed(id: u32) -> bool {
    MANAGED_RULE_IDS.contains(&id)
}

/// Build the redirect rule for `mock` under engine id `rule_id`.
///
/// The filter is `*<path>?MT=<VERB>^`: any origin, the template's path, and
/// the verb value terminated by a separator or the end of the URL.
pub fn build_rule(mock: &MockRule, rule_id: u32) -> Result<Rule, RuleError> {
    let invalid = || RuleError::InvalidTemplate {
        id: mock.id,
        template: mock.url_template.clone(),
    };

    let template = mock.url_template.trim();
    if template.is_empty() {
        return Err(invalid());
    }

    let (path, template_verb) = split_template(template);
    let verb = if mock.verb.is_empty() {
        template_verb.unwrap_or_default()
    } else {
        mock.verb.clone()
    };

    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };
    let url_filter = format!("*{path}?{VERB_PARAM}={verb}^");
    if !url_filter.is_ascii() {
        return Err(invalid());
    }

    let body = serde_json::to_string(&mock.body)?;
    let url = format!("{DATA_URL_PREFIX}{}", urlencoding::encode(&body));

    Ok(Rule {
        id: rule_id,
        priority: RULE_PRIORITY,
        action: RuleAction::Redirect {
            redirect: Redirect { url },
        },
        condition: RuleCondition {
            url_filter,
            resource_types: vec![ResourceType::XmlHttpRequest],
            request_methods: vec![TRANSPORT_METHOD],
        },
    })
}
