//! CRUD over the persisted mock collection and the global on/off flag.

use std::collections::HashSet;
use std::sync::Arc;

use apimock_core::url_pattern::{self, VERB_PARAM};
use apimock_core::{MockDraft, MockId, MockRule, Verb, validate_endpoint};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{KeyValueStore, StoreError};

pub const MOCKS_KEY: &str = "mocks";
pub const GLOBAL_ENABLED_KEY: &str = "globalEnabled";

/// Typed access to the `mocks` / `globalEnabled` keys of a [`KeyValueStore`].
///
/// Every mutation is a read-modify-write of the whole collection, issued as
/// one `set` so subscribers see a single change per operation.
pub struct MockRepository<S> {
    store: Arc<S>,
}

impl<S> Clone for MockRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore> MockRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Seed absent keys: an empty collection and the global flag on.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let current = self.store.get(&[MOCKS_KEY, GLOBAL_ENABLED_KEY]).await?;

        let mut seed = Map::new();
        if !current.get(MOCKS_KEY).is_some_and(Value::is_array) {
            seed.insert(MOCKS_KEY.into(), Value::Array(Vec::new()));
        }
        if !current.contains_key(GLOBAL_ENABLED_KEY) {
            seed.insert(GLOBAL_ENABLED_KEY.into(), Value::Bool(true));
        }
        if !seed.is_empty() {
            info!(keys = ?seed.keys().collect::<Vec<_>>(), "seeding store");
            self.store.set(seed).await?;
        }
        Ok(())
    }

    /// Persisted mocks in stored order. Records that do not deserialize are
    /// left out here but stay in the store.
    pub async fn mocks(&self) -> Result<Vec<MockRule>, StoreError> {
        Ok(self.records().await?.into_mocks())
    }

    pub async fn get(&self, id: MockId) -> Result<MockRule, StoreError> {
        self.mocks()
            .await?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    /// Insert, or replace the record with the same id in place.
    pub async fn save(&self, rule: MockRule) -> Result<MockRule, StoreError> {
        let mut records = self.records().await?;
        match records.find_mut(rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => records.push(rule.clone()),
        }
        self.write_records(&records).await?;
        info!(id = %rule.id, template = %rule.url_template, "saved mock");
        Ok(rule)
    }

    /// Persist a draft, assigning an id that is unique in the collection.
    pub async fn save_draft(&self, draft: MockDraft) -> Result<MockRule, StoreError> {
        let taken = self.ids().await?;
        self.save(draft.into_rule(&taken)).await
    }

    /// Append every draft in one write.
    pub async fn import(&self, drafts: Vec<MockDraft>) -> Result<Vec<MockRule>, StoreError> {
        let mut records = self.records().await?;
        let mut taken = records.ids();

        let added: Vec<MockRule> = drafts
            .into_iter()
            .map(|mut draft| {
                draft.id = None;
                let rule = draft.into_rule(&taken);
                taken.insert(rule.id);
                rule
            })
            .collect();

        for rule in &added {
            records.push(rule.clone());
        }
        self.write_records(&records).await?;
        info!(count = added.len(), "imported mocks");
        Ok(added)
    }

    /// Flip `enabled`; returns the new value.
    pub async fn toggle(&self, id: MockId) -> Result<bool, StoreError> {
        let rule = self
            .modify(id, |rule| {
                rule.enabled = !rule.enabled;
                Ok(())
            })
            .await?;
        Ok(rule.enabled)
    }

    pub async fn delete(&self, id: MockId) -> Result<(), StoreError> {
        let mut records = self.records().await?;
        if !records.remove(id) {
            return Err(StoreError::NotFound(id));
        }
        self.write_records(&records).await?;
        info!(%id, "deleted mock");
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<(), StoreError> {
        self.write_records(&Records::default()).await?;
        info!("deleted all mocks");
        Ok(())
    }

    /// Global switch; anything other than an explicit `false` reads as on.
    pub async fn global_enabled(&self) -> Result<bool, StoreError> {
        let got = self.store.get(&[GLOBAL_ENABLED_KEY]).await?;
        Ok(got.get(GLOBAL_ENABLED_KEY) != Some(&Value::Bool(false)))
    }

    pub async fn set_global_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        let mut entries = Map::new();
        entries.insert(GLOBAL_ENABLED_KEY.into(), Value::Bool(enabled));
        self.store.set(entries).await?;
        info!(enabled, "global mocking switched");
        Ok(())
    }

    /// Change the verb and rewrite the `MT` parameter of both the template
    /// and the endpoint as typed.
    pub async fn update_verb(&self, id: MockId, verb: Verb) -> Result<MockRule, StoreError> {
        self.modify(id, |rule| {
            let (path, _) = url_pattern::split_template(&rule.url_template);
            rule.url_template = format!("{path}?{VERB_PARAM}={verb}");
            if !rule.original_url.is_empty() {
                rule.original_url = url_pattern::with_verb(&rule.original_url, &verb);
            }
            rule.verb = verb;
            Ok(())
        })
        .await
    }

    /// Recompile the endpoint. Returns whether the compiled template changed.
    pub async fn update_url(&self, id: MockId, url: &str) -> Result<bool, StoreError> {
        let mut changed = false;
        self.modify(id, |rule| {
            validate_endpoint(url)?;
            let compiled = url_pattern::compile(url, &rule.verb)?;
            changed = compiled.template != rule.url_template;
            rule.original_url = url.trim().to_string();
            rule.url_template = compiled.template;
            rule.verb = compiled.verb;
            Ok(())
        })
        .await?;
        Ok(changed)
    }

    /// Edit one body leaf with the same coercion the draft editor applies.
    pub async fn update_body_field(
        &self,
        id: MockId,
        path: &str,
        raw: &str,
    ) -> Result<MockRule, StoreError> {
        self.modify(id, |rule| {
            let mut draft = MockDraft::from_rule(rule);
            draft.set_field(path, raw)?;
            rule.body = draft.body;
            Ok(())
        })
        .await
    }

    /// Append an item to a body array, seeded from the array's first element.
    pub async fn push_array_item(&self, id: MockId, path: &str) -> Result<MockRule, StoreError> {
        self.modify(id, |rule| {
            let mut draft = MockDraft::from_rule(rule);
            draft.push_array_item(path)?;
            rule.body = draft.body;
            Ok(())
        })
        .await
    }

    pub async fn remove_array_item(
        &self,
        id: MockId,
        path: &str,
        index: usize,
    ) -> Result<MockRule, StoreError> {
        self.modify(id, |rule| {
            let mut draft = MockDraft::from_rule(rule);
            draft.remove_array_item(path, index)?;
            rule.body = draft.body;
            Ok(())
        })
        .await
    }

    // ── Helpers ──

    async fn ids(&self) -> Result<HashSet<MockId>, StoreError> {
        Ok(self.records().await?.ids())
    }

    async fn records(&self) -> Result<Records, StoreError> {
        let mut got = self.store.get(&[MOCKS_KEY]).await?;
        Ok(match got.remove(MOCKS_KEY) {
            Some(Value::Array(raw)) => Records::parse(raw),
            _ => Records::default(),
        })
    }

    async fn modify<F>(&self, id: MockId, edit: F) -> Result<MockRule, StoreError>
    where
        F: FnOnce(&mut MockRule) -> Result<(), apimock_core::CoreError>,
    {
        let mut records = self.records().await?;
        let rule = records.find_mut(id).ok_or(StoreError::NotFound(id))?;
        edit(rule)?;
        let updated = rule.clone();
        self.write_records(&records).await?;
        Ok(updated)
    }

    async fn write_records(&self, records: &Records) -> Result<(), StoreError> {
        let mut entries = Map::new();
        entries.insert(MOCKS_KEY.into(), records.to_value()?);
        self.store.set(entries).await
    }
}

/// The persisted array as read. Entries that do not deserialize are carried
/// verbatim, in place, so writing the collection back never drops them.
#[derive(Default)]
struct Records(Vec<Record>);

enum Record {
    Mock(MockRule),
    Unreadable(Value),
}

impl Records {
    fn parse(raw: Vec<Value>) -> Self {
        let records = raw
            .into_iter()
            .enumerate()
            .map(|(index, value)| match serde_json::from_value::<MockRule>(value.clone()) {
                Ok(rule) => Record::Mock(rule),
                Err(e) => {
                    warn!(index, error = %e, "unreadable mock record kept as is");
                    Record::Unreadable(value)
                }
            })
            .collect();
        Self(records)
    }

    fn mocks(&self) -> impl Iterator<Item = &MockRule> {
        self.0.iter().filter_map(|record| match record {
            Record::Mock(rule) => Some(rule),
            Record::Unreadable(_) => None,
        })
    }

    fn into_mocks(self) -> Vec<MockRule> {
        self.0
            .into_iter()
            .filter_map(|record| match record {
                Record::Mock(rule) => Some(rule),
                Record::Unreadable(_) => None,
            })
            .collect()
    }

    fn ids(&self) -> HashSet<MockId> {
        self.mocks().map(|m| m.id).collect()
    }

    fn find_mut(&mut self, id: MockId) -> Option<&mut MockRule> {
        self.0.iter_mut().find_map(|record| match record {
            Record::Mock(rule) if rule.id == id => Some(rule),
            _ => None,
        })
    }

    fn push(&mut self, rule: MockRule) {
        self.0.push(Record::Mock(rule));
    }

    /// Remove the mock with `id`; returns whether one was present.
    fn remove(&mut self, id: MockId) -> bool {
        let before = self.0.len();
        self.0
            .retain(|record| !matches!(record, Record::Mock(rule) if rule.id == id));
        self.0.len() != before
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        self.0
            .iter()
            .map(|record| match record {
                Record::Mock(rule) => serde_json::to_value(rule),
                Record::Unreadable(value) => Ok(value.clone()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalStore;
    use serde_json::json;

    fn repo() -> MockRepository<LocalStore> {
        MockRepository::new(Arc::new(LocalStore::in_memory()))
    }

    fn draft(url: &str) -> MockDraft {
        MockDraft::compose(url, &Verb::default(), r#"{"ResponseStatus":{"ErrorCode":1},"Name":"x"}"#)
            .unwrap()
    }

    #[tokio::test]
    async fn initialize_seeds_only_missing_keys() {
        let repo = repo();
        repo.set_global_enabled(false).await.unwrap();
        repo.initialize().await.unwrap();

        assert!(!repo.global_enabled().await.unwrap());
        assert!(repo.mocks().await.unwrap().is_empty());
        let raw = repo.store().get(&[MOCKS_KEY]).await.unwrap();
        assert_eq!(raw[MOCKS_KEY], json!([]));
    }

    #[tokio::test]
    async fn global_flag_defaults_to_on() {
        assert!(repo().global_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn save_inserts_then_replaces() {
        let repo = repo();
        let saved = repo.save_draft(draft("/api/1/a")).await.unwrap();
        repo.save_draft(draft("/api/2/b")).await.unwrap();

        let mut edited = MockDraft::from_rule(&saved);
        edited.set_field("Name", "y").unwrap();
        repo.save_draft(edited).await.unwrap();

        let mocks = repo.mocks().await.unwrap();
        assert_eq!(mocks.len(), 2);
        assert_eq!(mocks[0].id, saved.id);
        assert_eq!(mocks[0].body["Name"], "y");
    }

    #[tokio::test]
    async fn toggle_and_delete() {
        let repo = repo();
        let rule = repo.save_draft(draft("/api/x")).await.unwrap();

        assert!(!repo.toggle(rule.id).await.unwrap());
        assert!(repo.toggle(rule.id).await.unwrap());

        repo.delete(rule.id).await.unwrap();
        assert!(matches!(
            repo.delete(rule.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            repo.toggle(MockId(99)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn import_assigns_distinct_ids() {
        let repo = repo();
        let added = repo
            .import(vec![draft("/a"), draft("/b"), draft("/c")])
            .await
            .unwrap();
        let ids: HashSet<MockId> = added.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(repo.mocks().await.unwrap().len(), 3);

        repo.delete_all().await.unwrap();
        assert!(repo.mocks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_verb_rewrites_template() {
        let repo = repo();
        let rule = repo.save_draft(draft("/api/<id>/x?MT=GET")).await.unwrap();

        let updated = repo.update_verb(rule.id, Verb::new("put")).await.unwrap();
        assert_eq!(updated.verb.as_str(), "PUT");
        assert_eq!(updated.url_template, "/api/*/x?MT=PUT");
        assert_eq!(updated.original_url, "/api/<id>/x?MT=PUT");
        assert_eq!(MockDraft::from_rule(&updated).original_url, "/api/<id>/x?MT=PUT");
    }

    #[tokio::test]
    async fn update_url_reports_change() {
        let repo = repo();
        let rule = repo.save_draft(draft("/api/<id>/x")).await.unwrap();

        assert!(!repo.update_url(rule.id, "/api/<other>/x").await.unwrap());
        assert!(repo.update_url(rule.id, "/api/<id>/y").await.unwrap());

        let stored = repo.get(rule.id).await.unwrap();
        assert_eq!(stored.url_template, "/api/*/y?MT=GET");
        assert_eq!(stored.original_url, "/api/<id>/y");
    }

    #[tokio::test]
    async fn update_url_rejects_invalid_endpoint() {
        let repo = repo();
        let rule = repo.save_draft(draft("/api/<id>/x")).await.unwrap();

        for bad in ["api x", "/api x", ""] {
            assert!(matches!(
                repo.update_url(rule.id, bad).await,
                Err(StoreError::Core(apimock_core::CoreError::InvalidUrl(_)))
            ));
        }
        assert_eq!(repo.get(rule.id).await.unwrap(), rule);
    }

    #[tokio::test]
    async fn update_body_field_coerces() {
        let repo = repo();
        let rule = repo.save_draft(draft("/api/x")).await.unwrap();

        let updated = repo.update_body_field(rule.id, "Name", "42").await.unwrap();
        assert_eq!(updated.body["Name"], 42);
        let updated = repo
            .update_body_field(rule.id, "ResponseStatus.ErrorCode", "9")
            .await
            .unwrap();
        assert_eq!(updated.body["ResponseStatus"]["ErrorCode"], 0);

        assert!(matches!(
            repo.update_body_field(rule.id, "Missing", "1").await,
            Err(StoreError::Core(_))
        ));
    }

    #[tokio::test]
    async fn array_items_grow_and_shrink() {
        let repo = repo();
        let draft = MockDraft::compose(
            "/api/list",
            &Verb::default(),
            r#"{"Items": [{"Name": "a", "Size": 1}]}"#,
        )
        .unwrap();
        let rule = repo.save_draft(draft).await.unwrap();

        let updated = repo.push_array_item(rule.id, "Items").await.unwrap();
        assert_eq!(updated.body["Items"], json!([{"Name": "a", "Size": 1}, {"Name": "a", "Size": 1}]));

        let updated = repo.remove_array_item(rule.id, "Items", 0).await.unwrap();
        assert_eq!(updated.body["Items"].as_array().unwrap().len(), 1);
        assert!(matches!(
            repo.remove_array_item(rule.id, "Items", 5).await,
            Err(StoreError::Core(_))
        ));
    }

    async fn seed(repo: &MockRepository<LocalStore>, records: Value) {
        let mut entries = Map::new();
        entries.insert(MOCKS_KEY.into(), records);
        repo.store().set(entries).await.unwrap();
    }

    async fn raw_records(repo: &MockRepository<LocalStore>) -> Vec<Value> {
        let mut got = repo.store().get(&[MOCKS_KEY]).await.unwrap();
        match got.remove(MOCKS_KEY) {
            Some(Value::Array(raw)) => raw,
            other => panic!("unexpected mocks value: {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_id_record_survives_writes() {
        let repo = repo();
        seed(
            &repo,
            json!([{
                "id": "1718000123456789",
                "url": "/a/1?MT=GET",
                "method": "GET",
                "mockData": {"ok": true}
            }]),
        )
        .await;

        let legacy = repo.mocks().await.unwrap();
        assert_eq!(legacy.len(), 1);
        assert_eq!(legacy[0].url_template, "/a/1?MT=GET");

        let saved = repo.save_draft(draft("/api/x")).await.unwrap();
        let raw = raw_records(&repo).await;
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0]["id"], json!(legacy[0].id.0));
        assert_eq!(raw[0]["body"], json!({"ok": true}));
        assert_eq!(raw[1]["id"], json!(saved.id.0));
    }

    #[tokio::test]
    async fn unreadable_records_survive_every_write() {
        let repo = repo();
        let unreadable = json!({"nonsense": true});
        seed(
            &repo,
            json!([unreadable.clone(), {"id": 5, "urlTemplate": "/a?MT=GET", "body": {}}]),
        )
        .await;

        repo.save_draft(draft("/api/x")).await.unwrap();
        repo.toggle(MockId(5)).await.unwrap();
        repo.import(vec![draft("/b")]).await.unwrap();
        repo.delete(MockId(5)).await.unwrap();

        let raw = raw_records(&repo).await;
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0], unreadable);
        assert_eq!(repo.mocks().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped() {
        let repo = repo();
        let mut entries = Map::new();
        entries.insert(
            MOCKS_KEY.into(),
            json!([
                {"id": 5, "urlTemplate": "/a?MT=GET", "body": {}},
                {"nonsense": true}
            ]),
        );
        repo.store().set(entries).await.unwrap();

        let mocks = repo.mocks().await.unwrap();
        assert_eq!(mocks.len(), 1);
        assert_eq!(mocks[0].id, MockId(5));
    }
}
