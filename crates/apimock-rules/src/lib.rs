//! Rule layer: declarative redirect rules built from mocks, a matcher for the
//! engine's URL-filter syntax, and the reconciler that keeps the engine's
//! dynamic rule table in step with the persisted mocks.

mod engine;
mod error;
mod filter;
mod reconcile;
mod rule;

pub use engine::{MAX_DYNAMIC_RULES, MemoryRuleEngine, RequestInfo, RuleEngine};
pub use error::RuleError;
pub use filter::UrlFilter;
pub use reconcile::{ReconcileReport, Reconciler, plan_rules};
pub use rule::{
    DATA_URL_PREFIX, MANAGED_RULE_IDS, RULE_PRIORITY, Redirect, RequestMethod, ResourceType, Rule,
    RuleAction, RuleCondition, RuleTransaction, TRANSPORT_METHOD, build_rule, is_managed,
};
