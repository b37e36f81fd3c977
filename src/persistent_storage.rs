//! Persistent assignment storage (sticky bucketing).
//!
//! A unit's experiment assignment is written through to host-provided storage the first time it
//! lands in an experiment group, and read back on later evaluations so the assignment stays stable
//! when the spec's rules change.
use std::{collections::HashMap, sync::Arc};

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};

use crate::{
    error::BoxError,
    eval::{EvaluationDetails, EvaluationReason, EvaluationResult, SecondaryExposure},
    JsonObject,
};

/// Storage key for all sticky values of one unit: `"{unit_id}:{id_type}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, From, Into)]
pub struct StickyKey(String);

impl StickyKey {
    /// Key for `unit_id` of type `id_type`.
    pub fn new(unit_id: &str, id_type: &str) -> StickyKey {
        StickyKey(format!("{unit_id}:{id_type}"))
    }

    /// Key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Serialized snapshot of a past [`EvaluationResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyValue {
    /// Value of the result.
    pub value: bool,
    /// Config value of the result.
    pub json_value: JsonObject,
    /// Rule of the result.
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    /// Experiment group.
    pub group_name: Option<String>,
    /// Secondary exposures of the result.
    #[serde(default)]
    pub secondary_exposures: Vec<SecondaryExposure>,
    /// Undelegated secondary exposures of the result.
    #[serde(default)]
    pub undelegated_secondary_exposures: Vec<SecondaryExposure>,
    /// Experiment a layer delegated to.
    #[serde(default)]
    pub config_delegate: Option<String>,
    /// Parameters owned by the experiment.
    #[serde(default)]
    pub explicit_parameters: Option<Vec<String>>,
    /// Sync time of the specs the result was computed from.
    pub sync_time: i64,
    /// Spec version the result was computed from.
    #[serde(default)]
    pub version: Option<u64>,
}

impl StickyValue {
    pub(crate) fn from_result(result: &EvaluationResult) -> StickyValue {
        StickyValue {
            value: result.value,
            json_value: result.json_value.clone(),
            rule_id: result.rule_id.clone(),
            group_name: result.group_name.clone(),
            secondary_exposures: result.secondary_exposures.clone(),
            undelegated_secondary_exposures: result.undelegated_secondary_exposures.clone(),
            config_delegate: result.config_delegate.clone(),
            explicit_parameters: result.explicit_parameters.clone(),
            sync_time: result.evaluation_details.config_sync_time,
            version: result.version,
        }
    }

    pub(crate) fn into_result(self, mut details: EvaluationDetails) -> EvaluationResult {
        details.reason = EvaluationReason::Persisted;
        details.config_sync_time = self.sync_time;
        EvaluationResult {
            value: self.value,
            rule_id: self.rule_id,
            group_name: self.group_name,
            json_value: self.json_value,
            secondary_exposures: self.secondary_exposures,
            undelegated_secondary_exposures: self.undelegated_secondary_exposures,
            explicit_parameters: self.explicit_parameters,
            config_delegate: self.config_delegate,
            is_experiment_group: true,
            version: self.version,
            ..EvaluationResult::empty(details)
        }
    }
}

/// Host-provided storage of sticky values, keyed by [`StickyKey`] and then by spec name.
///
/// Writes may be repeated with identical values; implementations should treat them as idempotent.
pub trait PersistentStorage: Send + Sync {
    /// Load all sticky values stored for `key`.
    fn load(&self, key: &StickyKey) -> Result<HashMap<String, StickyValue>, BoxError>;

    /// Store the sticky value of `spec_name` for `key`.
    fn save(&self, key: &StickyKey, spec_name: &str, value: &StickyValue) -> Result<(), BoxError>;

    /// Remove the sticky value of `spec_name` for `key`.
    fn delete(&self, key: &StickyKey, spec_name: &str) -> Result<(), BoxError>;
}

/// Fail-open wrapper around [`PersistentStorage`]: errors are logged and treated as "no sticky
/// value".
#[derive(Clone)]
pub(crate) struct PersistentAssignments {
    storage: Arc<dyn PersistentStorage>,
}

impl PersistentAssignments {
    pub fn new(storage: Arc<dyn PersistentStorage>) -> PersistentAssignments {
        PersistentAssignments { storage }
    }

    pub fn load(&self, key: &StickyKey, spec_name: &str) -> Option<StickyValue> {
        match self.storage.load(key) {
            Ok(mut values) => values.remove(spec_name),
            Err(err) => {
                log::warn!(target: "featuregate", key = key.as_str(), spec_name; "failed to load persisted assignments: {err}");
                None
            }
        }
    }

    pub fn save(&self, key: &StickyKey, spec_name: &str, result: &EvaluationResult) {
        let value = StickyValue::from_result(result);
        if let Err(err) = self.storage.save(key, spec_name, &value) {
            log::warn!(target: "featuregate", key = key.as_str(), spec_name; "failed to save persisted assignment: {err}");
        }
    }

    pub fn delete(&self, key: &StickyKey, spec_name: &str) {
        if let Err(err) = self.storage.delete(key, spec_name) {
            log::warn!(target: "featuregate", key = key.as_str(), spec_name; "failed to delete persisted assignment: {err}");
        }
    }
}
