//! Wire representation of specs, exactly as received from the server.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{user::USER_ID_TYPE, JsonObject};

/// Gate, dynamic config, experiment or layer as it appears in the specs payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct SpecWire {
    pub name: String,
    #[serde(rename = "type", default)]
    pub spec_type: String,
    pub salt: String,
    pub enabled: bool,
    #[serde(default)]
    pub default_value: Value,
    pub rules: Vec<RuleWire>,
    #[serde(default = "default_id_type")]
    pub id_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_parameters: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_shared_params: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(rename = "targetAppIDs", default, skip_serializing_if = "Option::is_none")]
    pub target_app_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Rule as it appears in the specs payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct RuleWire {
    #[serde(default)]
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    pub pass_percentage: f64,
    pub conditions: Vec<ConditionWire>,
    #[serde(default)]
    pub return_value: Value,
    #[serde(default = "default_id_type")]
    pub id_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_delegate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_experiment_group: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_targeting_rule: Option<bool>,
}

/// Condition as it appears in the specs payload.
///
/// `type` and `operator` are kept as strings here. Unknown values must not fail parsing: they are
/// compiled into an explicit "unknown" arm and surface as unsupported at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ConditionWire {
    #[serde(rename = "type")]
    pub condition_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub target_value: Value,
    #[serde(default = "default_id_type")]
    pub id_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_values: Option<JsonObject>,
}

fn default_id_type() -> String {
    USER_ID_TYPE.to_owned()
}
