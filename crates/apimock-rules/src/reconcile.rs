//! Keeps the engine's managed rule subset equal to the enabled mocks.
//!
//! Every reconciliation reads the global flag, the mocks and the installed
//! rules fresh, then submits one full-replace transaction: remove every
//! installed managed id, add the freshly built set. Nothing is cached between
//! runs, so running twice with unchanged state yields the same table.

use std::collections::HashSet;
use std::sync::Arc;

use apimock_core::{MockId, MockRule};
use apimock_store::{GLOBAL_ENABLED_KEY, KeyValueStore, MOCKS_KEY, MockRepository};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::RuleEngine;
use crate::rule::{MANAGED_RULE_IDS, Rule, RuleTransaction, build_rule, is_managed};
use crate::RuleError;

/// Outcome of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub global_enabled: bool,
    /// Managed ids that were installed before the run.
    pub removed: Vec<u32>,
    /// Ids installed by the run.
    pub added: Vec<u32>,
    /// Enabled mocks that produced no rule.
    pub skipped: Vec<MockId>,
}

pub struct Reconciler<S, E> {
    repo: MockRepository<S>,
    engine: Arc<E>,
    lock: Mutex<()>,
}

impl<S, E> Reconciler<S, E>
where
    S: KeyValueStore + 'static,
    E: RuleEngine + 'static,
{
    pub fn new(repo: MockRepository<S>, engine: Arc<E>) -> Self {
        Self {
            repo,
            engine,
            lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Replace the managed rule subset to reflect persisted state.
    ///
    /// Runs are serialised: a call waits for any run in progress to commit.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RuleError> {
        let _guard = self.lock.lock().await;

        let global_enabled = self.repo.global_enabled().await?;
        let (rules, skipped) = if global_enabled {
            plan_rules(&self.repo.mocks().await?)
        } else {
            (Vec::new(), Vec::new())
        };

        let removed: Vec<u32> = self
            .engine
            .dynamic_rules()
            .await?
            .into_iter()
            .map(|r| r.id)
            .filter(|id| is_managed(*id))
            .collect();
        let added: Vec<u32> = rules.iter().map(|r| r.id).collect();

        self.engine
            .apply(RuleTransaction {
                remove_rule_ids: removed.clone(),
                add_rules: rules,
            })
            .await?;

        info!(
            global_enabled,
            removed = removed.len(),
            added = added.len(),
            skipped = skipped.len(),
            "reconciled rule table"
        );
        Ok(ReconcileReport {
            global_enabled,
            removed,
            added,
            skipped,
        })
    }

    /// Reconcile after every store change that touches the mocks or the
    /// global flag. Runs until the returned handle is aborted.
    pub fn watch(self: Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.repo.store().subscribe();
        tokio::spawn(async move {
            loop {
                let relevant = match changes.recv().await {
                    Ok(change) => change.touches(MOCKS_KEY) || change.touches(GLOBAL_ENABLED_KEY),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "missed store changes, reconciling");
                        true
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if relevant {
                    if let Err(e) = self.reconcile().await {
                        warn!(error = %e, "reconciliation failed");
                    }
                }
            }
        })
    }
}

/// Build one rule per enabled mock, in persisted order.
///
/// A mock's engine id is `abs(id) mod 65535` (at least 1). When that id is
/// already taken by an earlier mock, the next free managed id is used,
/// wrapping within the managed range. Mocks whose rule cannot be built are
/// returned as skipped.
pub fn plan_rules(mocks: &[MockRule]) -> (Vec<Rule>, Vec<MockId>) {
    let mut used = HashSet::new();
    let mut rules = Vec::new();
    let mut skipped = Vec::new();

    for mock in mocks.iter().filter(|m| m.enabled) {
        let Some(rule_id) = free_rule_id(mock.id.rule_id(), &used) else {
            warn!(id = %mock.id, "no free rule id left, skipping mock");
            skipped.push(mock.id);
            continue;
        };
        if rule_id != mock.id.rule_id() {
            warn!(id = %mock.id, preferred = mock.id.rule_id(), rule_id, "rule id collision");
        }

        match build_rule(mock, rule_id) {
            Ok(rule) => {
                used.insert(rule_id);
                rules.push(rule);
            }
            Err(e) => {
                warn!(id = %mock.id, error = %e, "skipping mock");
                skipped.push(mock.id);
            }
        }
    }
    (rules, skipped)
}

fn free_rule_id(preferred: u32, used: &HashSet<u32>) -> Option<u32> {
    let start = *MANAGED_RULE_IDS.start();
    let span = MANAGED_RULE_IDS.end() - start + 1;
    (0..span)
        .map(|step| start + (preferred - start + step) % span)
        .find(|id| !used.contains(id))
}
