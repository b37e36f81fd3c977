use std::sync::Arc;

use crate::{
    hashing::Hasher,
    persistent_storage::PersistentAssignments,
    snapshot::Snapshot,
    spec::{Rule, Spec},
    user::User,
};

use super::{
    clean_exposures, eval_conditions::eval_condition, sticky, user_agent::UserAgentParser,
    CountryLookup, EvalOptions, EvaluationDetails, EvaluationReason, EvaluationResult,
    SecondaryExposure,
};

/// Nested gate and delegate evaluations deeper than this are treated as a reference cycle.
pub(crate) const MAX_EVAL_DEPTH: usize = 64;

pub(crate) const DEFAULT_RULE_ID: &str = "default";
pub(crate) const DISABLED_RULE_ID: &str = "disabled";

/// Long-lived state shared by all evaluations.
pub(crate) struct Engine {
    pub hasher: Hasher,
    pub ua_parser: UserAgentParser,
    pub country_lookup: Option<Arc<dyn CountryLookup>>,
    pub environment_tier: Option<String>,
    pub persistent_assignments: Option<PersistentAssignments>,
}

/// Everything a single evaluation call reads.
pub(crate) struct EvalContext<'a> {
    pub engine: &'a Engine,
    pub snapshot: &'a Snapshot,
    pub user: &'a User,
    pub options: &'a EvalOptions,
}

impl EvalContext<'_> {
    pub fn details(&self) -> EvaluationDetails {
        EvaluationDetails::new(self.snapshot, EvaluationReason::from(self.snapshot.source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalMode {
    /// Walk all rules.
    Full,
    /// Walk targeting rules only. `value == true` means targeting excluded the unit.
    TargetingOnly,
}

/// Evaluate `spec` for the context's user.
pub(crate) fn eval_spec(
    ctx: &EvalContext,
    spec: &Spec,
    mode: EvalMode,
    depth: usize,
) -> EvaluationResult {
    if depth > MAX_EVAL_DEPTH {
        log::warn!(target: "featuregate", spec_name = spec.name.as_str(); "evaluation depth exceeded, likely a reference cycle");
        return EvaluationResult::unsupported(ctx.details(), spec.version);
    }

    let base = EvaluationResult {
        id_type: Some(spec.id_type.clone()),
        version: spec.version,
        explicit_parameters: spec.explicit_parameters.clone(),
        ..EvaluationResult::empty(ctx.details())
    };

    if !spec.enabled {
        return EvaluationResult {
            rule_id: DISABLED_RULE_ID.to_owned(),
            json_value: spec.default_value.clone(),
            ..base
        };
    }

    let rules: Vec<&Rule> = match mode {
        EvalMode::Full => spec.rules.iter().collect(),
        EvalMode::TargetingOnly => spec
            .rules
            .iter()
            .filter(|rule| rule.is_targeting_rule)
            .collect(),
    };
    if mode == EvalMode::TargetingOnly && rules.is_empty() {
        return base;
    }

    let mut exposures = Vec::new();
    for rule in rules {
        let Some(passes) = eval_rule(ctx, rule, &mut exposures, depth) else {
            log::warn!(target: "featuregate", spec_name = spec.name.as_str(), rule_id = rule.id.as_str(); "unsupported condition");
            return EvaluationResult::unsupported(ctx.details(), spec.version);
        };
        if !passes {
            continue;
        }

        if let Some(delegate) = &rule.config_delegate {
            if let Some(result) = eval_delegate(ctx, delegate, &exposures, depth) {
                return result;
            }
        }

        let unit_id = ctx.user.unit_id(&rule.id_type);
        let pass =
            ctx.engine
                .hasher
                .passes_percentage(&spec.salt, &rule.salt, unit_id, rule.pass_percentage);
        let exposures = clean_exposures(exposures);

        return EvaluationResult {
            value: pass,
            rule_id: rule.id.clone(),
            group_name: pass.then(|| rule.group_name.clone()).flatten(),
            id_type: Some(rule.id_type.clone()),
            json_value: if pass {
                rule.return_value.clone()
            } else {
                spec.default_value.clone()
            },
            is_experiment_group: pass && rule.is_experiment_group,
            undelegated_secondary_exposures: exposures.clone(),
            secondary_exposures: exposures,
            ..base
        };
    }

    let exposures = clean_exposures(exposures);
    EvaluationResult {
        rule_id: DEFAULT_RULE_ID.to_owned(),
        json_value: spec.default_value.clone(),
        undelegated_secondary_exposures: exposures.clone(),
        secondary_exposures: exposures,
        ..base
    }
}

/// Evaluate every condition of `rule`, appending their exposures.
///
/// All conditions are evaluated even after one fails so that every gate reference is recorded.
/// Returns `None` as soon as a condition is unsupported; the remaining conditions are skipped.
fn eval_rule(
    ctx: &EvalContext,
    rule: &Rule,
    exposures: &mut Vec<SecondaryExposure>,
    depth: usize,
) -> Option<bool> {
    let mut passes = true;
    for condition in &rule.conditions {
        passes &= eval_condition(ctx, condition, exposures, depth)?;
    }
    Some(passes)
}

/// Hand evaluation off to the delegate config. Returns `None` if the delegate does not exist, in
/// which case the delegating rule is evaluated as a regular rule.
fn eval_delegate(
    ctx: &EvalContext,
    delegate: &str,
    exposures: &[SecondaryExposure],
    depth: usize,
) -> Option<EvaluationResult> {
    let delegate_spec = ctx.snapshot.get_config(delegate)?;

    let mut result = sticky::eval_config(ctx, delegate_spec, depth + 1);
    if result.unsupported {
        return Some(result);
    }

    result.config_delegate = Some(delegate.to_owned());
    result.explicit_parameters = delegate_spec.explicit_parameters.clone();
    result.undelegated_secondary_exposures = clean_exposures(exposures.to_vec());
    result.secondary_exposures = clean_exposures(
        exposures
            .iter()
            .cloned()
            .chain(result.secondary_exposures)
            .collect(),
    );
    Some(result)
}

/// Evaluate a gate referenced by name from another spec's condition.
///
/// A missing gate evaluates to `false` with an empty rule id. Returns `None` if the gate is
/// unsupported.
pub(crate) fn eval_gate_reference(
    ctx: &EvalContext,
    name: &str,
    exposures: &mut Vec<SecondaryExposure>,
    depth: usize,
) -> Option<bool> {
    let (value, rule_id) = match ctx.snapshot.get_gate(name) {
        Some(gate) => {
            let result = eval_spec(ctx, gate, EvalMode::Full, depth + 1);
            if result.unsupported {
                return None;
            }
            exposures.extend(result.secondary_exposures);
            (result.value, result.rule_id)
        }
        None => (false, String::new()),
    };

    exposures.push(SecondaryExposure {
        gate: name.to_owned(),
        gate_value: value.to_string(),
        rule_id,
    });
    Some(value)
}
