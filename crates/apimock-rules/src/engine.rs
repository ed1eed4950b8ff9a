//! The declarative rule engine collaborator and a local implementation.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::filter::UrlFilter;
use crate::rule::{RequestMethod, ResourceType, Rule, RuleTransaction};
use crate::RuleError;

/// Upper bound on the dynamic rule table.
pub const MAX_DYNAMIC_RULES: usize = 30_000;

/// Dynamic rule table of a declarative request-rewriting engine.
#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// Every installed dynamic rule, read fresh.
    async fn dynamic_rules(&self) -> Result<Vec<Rule>, RuleError>;

    /// Remove then add, atomically: either the whole transaction applies or
    /// the table is left untouched.
    async fn apply(&self, transaction: RuleTransaction) -> Result<(), RuleError>;
}

/// A request as seen by the engine.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub url: String,
    pub method: RequestMethod,
    pub resource_type: ResourceType,
}

/// In-process rule table, optionally mirrored to a JSON file.
pub struct MemoryRuleEngine {
    rules: Mutex<Vec<Rule>>,
    path: Option<PathBuf>,
}

impl MemoryRuleEngine {
    pub fn in_memory() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Open or create a rule table file.
    pub fn open(path: &Path) -> Result<Self, RuleError> {
        let rules: Vec<Rule> = match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Vec::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), count = rules.len(), "opened rule table");

        Ok(Self {
            rules: Mutex::new(rules),
            path: Some(path.to_path_buf()),
        })
    }

    /// Highest-priority rule matching `request`; lowest id breaks ties.
    pub async fn evaluate(&self, request: &RequestInfo) -> Result<Option<Rule>, RuleError> {
        let rules = self.rules.lock().await;
        let mut best: Option<&Rule> = None;

        for rule in rules.iter() {
            if !condition_matches(rule, request)? {
                continue;
            }
            best = match best {
                Some(current)
                    if current.priority > rule.priority
                        || (current.priority == rule.priority && current.id <= rule.id) =>
                {
                    Some(current)
                }
                _ => Some(rule),
            };
        }
        Ok(best.cloned())
    }

    fn persist(&self, rules: &[Rule]) -> Result<(), RuleError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, rules)?;
        tmp.write_all(b"\n")?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl RuleEngine for MemoryRuleEngine {
    async fn dynamic_rules(&self) -> Result<Vec<Rule>, RuleError> {
        Ok(self.rules.lock().await.clone())
    }

    async fn apply(&self, transaction: RuleTransaction) -> Result<(), RuleError> {
        let mut rules = self.rules.lock().await;

        let removed: HashSet<u32> = transaction.remove_rule_ids.iter().copied().collect();
        let mut next: Vec<Rule> = rules
            .iter()
            .filter(|r| !removed.contains(&r.id))
            .cloned()
            .collect();
        let mut ids: HashSet<u32> = next.iter().map(|r| r.id).collect();

        for rule in &transaction.add_rules {
            if rule.id == 0 {
                return Err(RuleError::Transaction("rule id must be at least 1".into()));
            }
            if !ids.insert(rule.id) {
                return Err(RuleError::Transaction(format!(
                    "rule id {} is already in use",
                    rule.id
                )));
            }
            UrlFilter::parse(&rule.condition.url_filter)
                .map_err(|e| RuleError::Transaction(format!("rule {}: {e}", rule.id)))?;
        }

        next.extend(transaction.add_rules.iter().cloned());
        if next.len() > MAX_DYNAMIC_RULES {
            return Err(RuleError::Transaction(format!(
                "{} rules exceed the limit of {MAX_DYNAMIC_RULES}",
                next.len()
            )));
        }
        next.sort_by_key(|r| r.id);

        self.persist(&next)?;
        debug!(
            removed = removed.len(),
            added = transaction.add_rules.len(),
            total = next.len(),
            "rule transaction applied"
        );
        *rules = next;
        Ok(())
    }
}

fn condition_matches(rule: &Rule, request: &RequestInfo) -> Result<bool, RuleError> {
    let condition = &rule.condition;
    if !condition.resource_types.is_empty()
        && !condition.resource_types.contains(&request.resource_type)
    {
        return Ok(false);
    }
    if !condition.request_methods.is_empty() && !condition.request_methods.contains(&request.method)
    {
        return Ok(false);
    }
    Ok(UrlFilter::parse(&condition.url_filter)?.matches(&request.url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{RuleAction, RuleCondition};

    fn block(id: u32, filter: &str, priority: u32) -> Rule {
        Rule {
            id,
            priority,
            action: RuleAction::Block,
            condition: RuleCondition {
                url_filter: filter.into(),
                ..Default::default()
            },
        }
    }

    fn xhr(url: &str) -> RequestInfo {
        RequestInfo {
            url: url.into(),
            method: RequestMethod::Post,
            resource_type: ResourceType::XmlHttpRequest,
        }
    }

    #[tokio::test]
    async fn apply_removes_then_adds() {
        let engine = MemoryRuleEngine::in_memory();
        engine
            .apply(RuleTransaction {
                remove_rule_ids: vec![],
                add_rules: vec![block(1, "*/a", 1), block(2, "*/b", 1)],
            })
            .await
            .unwrap();
        engine
            .apply(RuleTransaction {
                remove_rule_ids: vec![1, 99],
                add_rules: vec![block(1, "*/c", 1)],
            })
            .await
            .unwrap();

        let rules = engine.dynamic_rules().await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].condition.url_filter, "*/c");
    }

    #[tokio::test]
    async fn invalid_transactions_leave_table_untouched() {
        let engine = MemoryRuleEngine::in_memory();
        engine
            .apply(RuleTransaction {
                remove_rule_ids: vec![],
                add_rules: vec![block(5, "*/a", 1)],
            })
            .await
            .unwrap();

        for bad in [
            vec![block(0, "*/x", 1)],
            vec![block(5, "*/x", 1)],
            vec![block(6, "*/x", 1), block(6, "*/y", 1)],
            vec![block(7, "", 1)],
        ] {
            let result = engine
                .apply(RuleTransaction {
                    remove_rule_ids: vec![],
                    add_rules: bad,
                })
                .await;
            assert!(matches!(result, Err(RuleError::Transaction(_))));
        }

        let rules = engine.dynamic_rules().await.unwrap();
        assert_eq!(rules, vec![block(5, "*/a", 1)]);
    }

    #[tokio::test]
    async fn evaluate_picks_highest_priority() {
        let engine = MemoryRuleEngine::in_memory();
        engine
            .apply(RuleTransaction {
                remove_rule_ids: vec![],
                add_rules: vec![
                    block(3, "*/api/", 1),
                    block(2, "*/api/x", 1),
                    block(9, "*/api/x", 5),
                ],
            })
            .await
            .unwrap();

        let hit = engine.evaluate(&xhr("http://h/api/x")).await.unwrap().unwrap();
        assert_eq!(hit.id, 9);
        let hit = engine.evaluate(&xhr("http://h/api/y")).await.unwrap().unwrap();
        assert_eq!(hit.id, 3);
        assert!(engine.evaluate(&xhr("http://h/other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_table_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");

        let engine = MemoryRuleEngine::open(&path).unwrap();
        engine
            .apply(RuleTransaction {
                remove_rule_ids: vec![],
                add_rules: vec![block(70_000, "*/outside", 1), block(4, "*/a", 1)],
            })
            .await
            .unwrap();
        drop(engine);

        let reopened = MemoryRuleEngine::open(&path).unwrap();
        let ids: Vec<u32> = reopened
            .dynamic_rules()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, [4, 70_000]);
    }
}
