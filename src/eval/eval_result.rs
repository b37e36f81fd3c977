use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    snapshot::{Snapshot, SyncSource},
    JsonObject,
};

/// Gate names with this prefix are internal segments and never surface as exposures.
const SEGMENT_PREFIX: &str = "segment:";

/// Why an evaluation produced its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationReason {
    /// Evaluated against specs fetched from the server.
    Network,
    /// Evaluated against bootstrapped specs.
    Bootstrap,
    /// Evaluated against specs read from the data adapter.
    DataAdapter,
    /// No specs have been installed yet.
    Uninitialized,
    /// The spec does not exist in the current snapshot.
    Unrecognized,
    /// A local override was returned.
    LocalOverride,
    /// The spec uses a condition this engine does not support.
    Unsupported,
    /// A persisted sticky assignment was returned.
    Persisted,
}

impl From<SyncSource> for EvaluationReason {
    fn from(source: SyncSource) -> EvaluationReason {
        match source {
            SyncSource::Uninitialized => EvaluationReason::Uninitialized,
            SyncSource::Network => EvaluationReason::Network,
            SyncSource::Bootstrap => EvaluationReason::Bootstrap,
            SyncSource::DataAdapter => EvaluationReason::DataAdapter,
        }
    }
}

/// Record of a nested gate check performed during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecondaryExposure {
    /// Gate name.
    pub gate: String,
    /// Gate value, `"true"` or `"false"`.
    #[serde(rename = "gateValue")]
    pub gate_value: String,
    /// Rule of the gate that determined the value.
    #[serde(rename = "ruleID")]
    pub rule_id: String,
}

/// Freshness and provenance metadata of an [`EvaluationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetails {
    /// Server time of the specs used.
    pub config_sync_time: i64,
    /// Server time of the first installed specs, `-1` if none.
    pub init_time: i64,
    /// Wall clock (epoch milliseconds) at evaluation.
    pub server_time: i64,
    /// Why the result looks the way it does.
    pub reason: EvaluationReason,
}

impl EvaluationDetails {
    pub(crate) fn new(snapshot: &Snapshot, reason: EvaluationReason) -> EvaluationDetails {
        EvaluationDetails {
            config_sync_time: snapshot.last_sync_time,
            init_time: snapshot.initial_sync_time,
            server_time: chrono::Utc::now().timestamp_millis(),
            reason,
        }
    }
}

/// Result of evaluating a gate, dynamic config, experiment or layer.
///
/// Evaluation never fails: problems are reported through [`EvaluationDetails::reason`] and
/// [`EvaluationResult::unsupported`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    /// Gate value, or whether the unit passed the matched rule.
    pub value: bool,
    /// Rule that determined the result. `"default"` if no rule matched, `"disabled"` for disabled
    /// specs, empty if evaluation could not run.
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    /// Experiment group of the matched rule.
    pub group_name: Option<String>,
    /// Id type of the matched rule.
    pub id_type: Option<String>,
    /// Config value.
    pub json_value: JsonObject,
    /// Nested gate checks, deduplicated.
    pub secondary_exposures: Vec<SecondaryExposure>,
    /// Nested gate checks performed before following a layer delegation.
    pub undelegated_secondary_exposures: Vec<SecondaryExposure>,
    /// Parameters owned by the allocated experiment.
    pub explicit_parameters: Option<Vec<String>>,
    /// Experiment a layer delegated to.
    pub config_delegate: Option<String>,
    /// Whether the spec could not be evaluated.
    pub unsupported: bool,
    /// Whether the unit is in an experiment group.
    pub is_experiment_group: bool,
    /// Version of the evaluated spec.
    pub version: Option<u64>,
    /// Freshness metadata.
    pub evaluation_details: EvaluationDetails,
}

impl EvaluationResult {
    /// Result with `value: false` and nothing else set.
    pub(crate) fn empty(details: EvaluationDetails) -> EvaluationResult {
        EvaluationResult {
            value: false,
            rule_id: String::new(),
            group_name: None,
            id_type: None,
            json_value: JsonObject::new(),
            secondary_exposures: Vec::new(),
            undelegated_secondary_exposures: Vec::new(),
            explicit_parameters: None,
            config_delegate: None,
            unsupported: false,
            is_experiment_group: false,
            version: None,
            evaluation_details: details,
        }
    }

    /// Result for a spec that uses an unrecognized condition.
    pub(crate) fn unsupported(
        mut details: EvaluationDetails,
        version: Option<u64>,
    ) -> EvaluationResult {
        details.reason = EvaluationReason::Unsupported;
        EvaluationResult {
            unsupported: true,
            version,
            ..EvaluationResult::empty(details)
        }
    }

    /// Look up a parameter of [`EvaluationResult::json_value`].
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.json_value.get(key)
    }
}

/// Drop segment exposures and duplicates, keeping the first occurrence of each
/// `(gate, gate_value, rule_id)`.
pub(crate) fn clean_exposures(exposures: Vec<SecondaryExposure>) -> Vec<SecondaryExposure> {
    let mut seen = HashSet::new();
    exposures
        .into_iter()
        .filter(|exposure| !exposure.gate.starts_with(SEGMENT_PREFIX))
        .filter(|exposure| {
            seen.insert((
                exposure.gate.clone(),
                exposure.gate_value.clone(),
                exposure.rule_id.clone(),
            ))
        })
        .collect()
}
