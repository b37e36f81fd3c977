//! Spec data model: gates, dynamic configs, experiments and layers.
//!
//! Specs arrive as [`SpecWire`] and are compiled into [`Spec`], where condition types and operators
//! are enums. Every enum that is read from the wire has an explicit `Unknown` arm so an unrecognized
//! combination is reported as unsupported instead of being evaluated by guess.
mod models;

use std::collections::HashSet;

use serde_json::Value;

use crate::JsonObject;

pub use models::{ConditionWire, RuleWire, SpecWire};

/// Rule id that marks the targeting rule of an experiment.
pub(crate) const TARGETING_RULE_ID: &str = "targetingGate";

/// Kind of the spec, derived from the `entity` field (falling back to `type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecKind {
    /// Boolean feature gate.
    Gate,
    /// JSON-valued dynamic config.
    DynamicConfig,
    /// Experiment with groups.
    Experiment,
    /// Layer of parameters shared by experiments.
    Layer,
    /// Autotune (multi-armed bandit) config.
    Autotune,
    /// Internal segment gate.
    Segment,
    /// Holdout gate.
    Holdout,
}

impl SpecKind {
    fn from_wire(entity: Option<&str>, spec_type: &str) -> SpecKind {
        match entity.unwrap_or(spec_type) {
            "feature_gate" => SpecKind::Gate,
            "experiment" => SpecKind::Experiment,
            "layer" => SpecKind::Layer,
            "autotune" => SpecKind::Autotune,
            "segment" => SpecKind::Segment,
            "holdout" => SpecKind::Holdout,
            "dynamic_config" => SpecKind::DynamicConfig,
            _ if spec_type == "feature_gate" => SpecKind::Gate,
            _ => SpecKind::DynamicConfig,
        }
    }
}

/// Compiled spec. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    /// Spec name.
    pub name: String,
    /// Spec kind.
    pub kind: SpecKind,
    /// Salt combined with rule salt and unit id when bucketing.
    pub salt: String,
    /// Value returned when no rule passes. Non-object defaults (gates) compile to an empty object.
    pub default_value: JsonObject,
    /// Disabled specs always evaluate to `disabled`.
    pub enabled: bool,
    /// Id type of the unit for default results.
    pub id_type: String,
    /// Rules in evaluation order.
    pub rules: Vec<Rule>,
    /// Parameters owned by the experiment (as opposed to inherited from its layer).
    pub explicit_parameters: Option<Vec<String>>,
    /// Whether the layer has parameters shared with experiments.
    pub has_shared_params: bool,
    /// Whether the experiment is currently allocating units. `None` if not applicable.
    pub is_active: Option<bool>,
    /// Target apps this spec is delivered to.
    pub target_app_ids: HashSet<String>,
    /// Spec version, if provided.
    pub version: Option<u64>,
}

impl Spec {
    pub(crate) fn is_active(&self) -> bool {
        self.is_active == Some(true)
    }
}

/// Compiled rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Rule id, surfaced as `ruleID` in results.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Salt used for bucketing. Equals `id` if the wire rule has no salt.
    pub salt: String,
    /// Percentage (0..=100) of matching units that pass.
    pub pass_percentage: f64,
    /// Conditions, all of which must pass.
    pub conditions: Vec<Condition>,
    /// Value returned when the rule passes.
    pub return_value: JsonObject,
    /// Spec to hand evaluation off to once the rule matches.
    pub config_delegate: Option<String>,
    /// Experiment group name.
    pub group_name: Option<String>,
    /// Id type used for bucketing.
    pub id_type: String,
    /// Whether passing this rule puts the unit into an experiment group.
    pub is_experiment_group: bool,
    /// Whether this rule is evaluated in targeting-only mode.
    pub is_targeting_rule: bool,
}

/// Compiled condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Value source.
    pub kind: ConditionKind,
    /// Comparison. `None` if the wire condition has no operator.
    pub operator: Option<Operator>,
    /// Field name for field-based sources.
    pub field: Option<String>,
    /// Value to compare against.
    pub target_value: Value,
    /// Id type for unit-based sources.
    pub id_type: String,
    /// Extra source parameters (e.g., `salt` for `user_bucket`).
    pub additional_values: JsonObject,
}

/// Where a condition reads its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionKind {
    /// Always `true`.
    Public,
    /// Passes if the referenced gate passes.
    PassGate,
    /// Passes if the referenced gate fails.
    FailGate,
    /// Passes if any of the referenced gates passes.
    MultiPassGate,
    /// Passes if any of the referenced gates fails.
    MultiFailGate,
    /// User field.
    UserField,
    /// IP-derived field (e.g., country).
    IpBased,
    /// User-agent-derived field.
    UaBased,
    /// Environment tag.
    EnvironmentField,
    /// Current wall-clock time in milliseconds.
    CurrentTime,
    /// Deterministic bucket number in `0..1000`.
    UserBucket,
    /// Unit id for the condition's id type.
    UnitId,
    /// Request-scoped target app id.
    TargetApp,
    /// Unrecognized condition type.
    Unknown(String),
}

impl From<&str> for ConditionKind {
    fn from(value: &str) -> ConditionKind {
        match value.to_ascii_lowercase().as_str() {
            "public" => ConditionKind::Public,
            "pass_gate" => ConditionKind::PassGate,
            "fail_gate" => ConditionKind::FailGate,
            "multi_pass_gate" => ConditionKind::MultiPassGate,
            "multi_fail_gate" => ConditionKind::MultiFailGate,
            "user_field" => ConditionKind::UserField,
            "ip_based" => ConditionKind::IpBased,
            "ua_based" => ConditionKind::UaBased,
            "environment_field" => ConditionKind::EnvironmentField,
            "current_time" => ConditionKind::CurrentTime,
            "user_bucket" => ConditionKind::UserBucket,
            "unit_id" => ConditionKind::UnitId,
            "target_app" => ConditionKind::TargetApp,
            _ => ConditionKind::Unknown(value.to_owned()),
        }
    }
}

/// Comparison applied to the condition value and target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    VersionGt,
    VersionGte,
    VersionLt,
    VersionLte,
    VersionEq,
    VersionNeq,
    /// Case-insensitive membership.
    Any,
    /// Case-insensitive non-membership.
    None,
    AnyCaseSensitive,
    NoneCaseSensitive,
    StrStartsWithAny,
    StrEndsWithAny,
    StrContainsAny,
    StrContainsNone,
    StrMatches,
    Eq,
    Neq,
    Before,
    After,
    On,
    InSegmentList,
    NotInSegmentList,
    ArrayContainsAny,
    ArrayContainsNone,
    ArrayContainsAll,
    NotArrayContainsAll,
    /// Unrecognized operator.
    Unknown(String),
}

impl From<&str> for Operator {
    fn from(value: &str) -> Operator {
        match value.to_ascii_lowercase().as_str() {
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "version_gt" => Operator::VersionGt,
            "version_gte" => Operator::VersionGte,
            "version_lt" => Operator::VersionLt,
            "version_lte" => Operator::VersionLte,
            "version_eq" => Operator::VersionEq,
            "version_neq" => Operator::VersionNeq,
            "any" => Operator::Any,
            "none" => Operator::None,
            "any_case_sensitive" => Operator::AnyCaseSensitive,
            "none_case_sensitive" => Operator::NoneCaseSensitive,
            "str_starts_with_any" => Operator::StrStartsWithAny,
            "str_ends_with_any" => Operator::StrEndsWithAny,
            "str_contains_any" => Operator::StrContainsAny,
            "str_contains_none" => Operator::StrContainsNone,
            "str_matches" => Operator::StrMatches,
            "eq" => Operator::Eq,
            "neq" => Operator::Neq,
            "before" => Operator::Before,
            "after" => Operator::After,
            "on" => Operator::On,
            "in_segment_list" => Operator::InSegmentList,
            "not_in_segment_list" => Operator::NotInSegmentList,
            "array_contains_any" => Operator::ArrayContainsAny,
            "array_contains_none" => Operator::ArrayContainsNone,
            "array_contains_all" => Operator::ArrayContainsAll,
            "not_array_contains_all" => Operator::NotArrayContainsAll,
            _ => Operator::Unknown(value.to_owned()),
        }
    }
}

impl From<SpecWire> for Spec {
    fn from(spec: SpecWire) -> Spec {
        let kind = SpecKind::from_wire(spec.entity.as_deref(), &spec.spec_type);
        Spec {
            kind,
            salt: spec.salt,
            default_value: into_object(spec.default_value),
            enabled: spec.enabled,
            id_type: spec.id_type,
            rules: spec.rules.into_iter().map(Rule::from).collect(),
            explicit_parameters: spec.explicit_parameters,
            has_shared_params: spec.has_shared_params.unwrap_or(false),
            is_active: spec.is_active,
            target_app_ids: spec.target_app_ids.unwrap_or_default().into_iter().collect(),
            version: spec.version,
            name: spec.name,
        }
    }
}

impl From<RuleWire> for Rule {
    fn from(rule: RuleWire) -> Rule {
        let is_targeting_rule = rule.is_targeting_rule == Some(true) || rule.id == TARGETING_RULE_ID;
        Rule {
            salt: rule.salt.unwrap_or_else(|| rule.id.clone()),
            id: rule.id,
            name: rule.name,
            pass_percentage: rule.pass_percentage,
            conditions: rule.conditions.into_iter().map(Condition::from).collect(),
            return_value: into_object(rule.return_value),
            config_delegate: rule.config_delegate.filter(|it| !it.is_empty()),
            group_name: rule.group_name,
            id_type: rule.id_type,
            is_experiment_group: rule.is_experiment_group.unwrap_or(false),
            is_targeting_rule,
        }
    }
}

impl From<ConditionWire> for Condition {
    fn from(condition: ConditionWire) -> Condition {
        Condition {
            kind: ConditionKind::from(condition.condition_type.as_str()),
            operator: condition.operator.as_deref().map(Operator::from),
            field: condition.field,
            target_value: condition.target_value,
            id_type: condition.id_type,
            additional_values: condition.additional_values.unwrap_or_default(),
        }
    }
}

fn into_object(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}
