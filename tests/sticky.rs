use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde_json::{json, Value};

use featuregate::{
    BoxError, Client, ClientConfig, EvalOptions, EvaluationReason, PersistentStorage, StickyKey,
    StickyValue, User,
};

type Values = Arc<Mutex<HashMap<StickyKey, HashMap<String, StickyValue>>>>;

/// Storage whose contents outlive the client, like a real database.
#[derive(Clone, Default)]
struct SharedStorage {
    values: Values,
}

impl PersistentStorage for SharedStorage {
    fn load(&self, key: &StickyKey) -> Result<HashMap<String, StickyValue>, BoxError> {
        Ok(self
            .values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, key: &StickyKey, spec_name: &str, value: &StickyValue) -> Result<(), BoxError> {
        self.values
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .insert(spec_name.to_owned(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &StickyKey, spec_name: &str) -> Result<(), BoxError> {
        if let Some(values) = self.values.lock().unwrap().get_mut(key) {
            values.remove(spec_name);
        }
        Ok(())
    }
}

impl SharedStorage {
    fn get(&self, user_id: &str, spec_name: &str) -> Option<StickyValue> {
        self.values
            .lock()
            .unwrap()
            .get(&StickyKey::new(user_id, "userID"))
            .and_then(|values| values.get(spec_name))
            .cloned()
    }
}

/// Experiment open to US and CA users, with everyone allocated to `group`.
fn payload(time: i64, is_active: bool, group: &str) -> String {
    json!({
        "has_updates": true,
        "time": time,
        "feature_gates": [],
        "dynamic_configs": [{
            "name": "pricing_experiment",
            "type": "dynamic_config",
            "entity": "experiment",
            "salt": "pricing",
            "enabled": true,
            "isActive": is_active,
            "defaultValue": {},
            "rules": [
                {
                    "id": "targetingGate",
                    "passPercentage": 100,
                    "conditions": [{"type": "user_field", "operator": "none", "field": "country", "targetValue": ["US", "CA"]}],
                    "returnValue": {},
                    "isTargetingRule": true
                },
                {
                    "id": format!("{group}_rule"),
                    "passPercentage": 100,
                    "conditions": [{"type": "public"}],
                    "returnValue": {"group": group},
                    "groupName": group,
                    "isExperimentGroup": true
                }
            ]
        }],
        "layer_configs": []
    })
    .to_string()
}

fn client(storage: &SharedStorage, payload: String) -> Client {
    let _ = env_logger::builder().is_test(true).try_init();
    let client = ClientConfig::from_server_secret("secret")
        .local_mode(true)
        .bootstrap(payload)
        .persistent_storage(storage.clone())
        .to_client();
    client.initialize().unwrap();
    client
}

#[test]
fn assignment_survives_rule_changes() {
    let storage = SharedStorage::default();
    let user = User::with_user_id("u1").country("US");

    let first = client(&storage, payload(100, true, "Treatment"));
    let result = first.get_config(&user, "pricing_experiment");
    assert_eq!(result.group_name.as_deref(), Some("Treatment"));
    assert!(result.is_experiment_group);
    assert_eq!(storage.get("u1", "pricing_experiment").unwrap().sync_time, 100);

    let second = client(&storage, payload(200, true, "Control"));
    let result = second.get_config(&user, "pricing_experiment");
    assert_eq!(result.group_name.as_deref(), Some("Treatment"));
    assert_eq!(result.get("group"), Some(&Value::from("Treatment")));
    assert_eq!(result.evaluation_details.reason, EvaluationReason::Persisted);
    assert_eq!(result.evaluation_details.config_sync_time, 100);

    // Still targeted, so enforcing targeting keeps the assignment.
    let options = EvalOptions::new().with_enforce_targeting(true);
    let result = second.get_config_with_options(&user, "pricing_experiment", &options);
    assert_eq!(result.group_name.as_deref(), Some("Treatment"));
}

#[test]
fn enforced_targeting_drops_assignment_of_excluded_unit() {
    let storage = SharedStorage::default();
    let first = client(&storage, payload(100, true, "Treatment"));
    first.get_config(&User::with_user_id("u1").country("US"), "pricing_experiment");

    let second = client(&storage, payload(200, true, "Control"));
    let moved = User::with_user_id("u1").country("FR");

    // Without enforcement the persisted assignment wins.
    let result = second.get_config(&moved, "pricing_experiment");
    assert_eq!(result.evaluation_details.reason, EvaluationReason::Persisted);

    let options = EvalOptions::new().with_enforce_targeting(true);
    let result = second.get_config_with_options(&moved, "pricing_experiment", &options);
    assert_eq!(result.rule_id, "targetingGate");
    assert!(!result.is_experiment_group);
    assert!(storage.get("u1", "pricing_experiment").is_none());
}

#[test]
fn inactive_experiment_clears_assignment() {
    let storage = SharedStorage::default();
    let user = User::with_user_id("u1").country("US");
    client(&storage, payload(100, true, "Treatment")).get_config(&user, "pricing_experiment");
    assert!(storage.get("u1", "pricing_experiment").is_some());

    let result =
        client(&storage, payload(200, false, "Control")).get_config(&user, "pricing_experiment");

    assert_eq!(result.group_name.as_deref(), Some("Control"));
    assert_eq!(result.evaluation_details.reason, EvaluationReason::Bootstrap);
    assert!(storage.get("u1", "pricing_experiment").is_none());
}

#[test]
fn non_experiment_configs_are_not_persisted() {
    let storage = SharedStorage::default();
    let payload = json!({
        "has_updates": true,
        "time": 1,
        "feature_gates": [],
        "dynamic_configs": [{
            "name": "plain_config",
            "type": "dynamic_config",
            "salt": "plain",
            "enabled": true,
            "defaultValue": {},
            "rules": [{"id": "all", "passPercentage": 100, "conditions": [{"type": "public"}], "returnValue": {"a": 1}}]
        }],
        "layer_configs": []
    })
    .to_string();

    let result = client(&storage, payload).get_config(&User::with_user_id("u1"), "plain_config");

    assert!(result.value);
    assert!(storage.values.lock().unwrap().is_empty());
}
