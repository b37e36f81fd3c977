//! Local overrides, checked before the rule engine.
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::{user::User, JsonObject};

/// Key of an override that applies to every unit.
const GLOBAL_KEY: &str = "";

/// Overrides of one spec kind: spec name, then unit id (or [`GLOBAL_KEY`]), to value.
struct OverrideMap<V> {
    entries: RwLock<HashMap<String, HashMap<String, V>>>,
}

impl<V> Default for OverrideMap<V> {
    fn default() -> Self {
        OverrideMap {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> OverrideMap<V> {
    fn set(&self, name: &str, value: V, id: Option<&str>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(name.to_owned())
            .or_default()
            .insert(id.unwrap_or(GLOBAL_KEY).to_owned(), value);
    }

    fn remove(&self, name: &str, id: Option<&str>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match id {
            Some(id) => {
                if let Some(by_id) = entries.get_mut(name) {
                    by_id.remove(id);
                    if by_id.is_empty() {
                        entries.remove(name);
                    }
                }
            }
            None => {
                entries.remove(name);
            }
        }
    }

    fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Exact `userID` first, then custom ids ordered by id type, then the global override.
    fn get(&self, name: &str, user: &User) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let by_id = entries.get(name)?;
        user.all_ids()
            .into_iter()
            .chain(std::iter::once(GLOBAL_KEY))
            .find_map(|id| by_id.get(id))
            .cloned()
    }
}

/// Local gate, config and layer overrides.
#[derive(Default)]
pub(crate) struct Overrides {
    gates: OverrideMap<bool>,
    configs: OverrideMap<JsonObject>,
    layers: OverrideMap<JsonObject>,
}

impl Overrides {
    pub fn new() -> Overrides {
        Overrides::default()
    }

    pub fn override_gate(&self, name: &str, value: bool, id: Option<&str>) {
        self.gates.set(name, value, id);
    }

    pub fn override_config(&self, name: &str, value: JsonObject, id: Option<&str>) {
        self.configs.set(name, value, id);
    }

    pub fn override_layer(&self, name: &str, value: JsonObject, id: Option<&str>) {
        self.layers.set(name, value, id);
    }

    pub fn remove_gate_override(&self, name: &str, id: Option<&str>) {
        self.gates.remove(name, id);
    }

    pub fn remove_config_override(&self, name: &str, id: Option<&str>) {
        self.configs.remove(name, id);
    }

    pub fn remove_layer_override(&self, name: &str, id: Option<&str>) {
        self.layers.remove(name, id);
    }

    pub fn remove_all(&self) {
        self.gates.clear();
        self.configs.clear();
        self.layers.clear();
    }

    pub fn gate(&self, name: &str, user: &User) -> Option<bool> {
        self.gates.get(name, user)
    }

    pub fn config(&self, name: &str, user: &User) -> Option<JsonObject> {
        self.configs.get(name, user)
    }

    pub fn layer(&self, name: &str, user: &User) -> Option<JsonObject> {
        self.layers.get(name, user)
    }
}
