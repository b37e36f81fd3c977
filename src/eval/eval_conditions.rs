use serde_json::Value;

use crate::{
    hashing::hash_id_list_value,
    spec::{Condition, ConditionKind, Operator},
};

use super::{
    eval_spec::{eval_gate_reference, EvalContext},
    operators::{compare, value_to_string},
    SecondaryExposure,
};

const COUNTRY_FIELD: &str = "country";
const TIER_FIELD: &str = "tier";
const USER_BUCKET_SALT: &str = "salt";

/// Evaluate a single condition. Returns `None` if the condition type or operator is unsupported.
pub(super) fn eval_condition(
    ctx: &EvalContext,
    condition: &Condition,
    exposures: &mut Vec<SecondaryExposure>,
    depth: usize,
) -> Option<bool> {
    let target = &condition.target_value;

    let value = match &condition.kind {
        ConditionKind::Public => return Some(true),
        ConditionKind::PassGate => {
            return eval_gate_reference(ctx, &gate_name(target), exposures, depth)
        }
        ConditionKind::FailGate => {
            return eval_gate_reference(ctx, &gate_name(target), exposures, depth).map(|v| !v)
        }
        ConditionKind::MultiPassGate => return eval_multi_gate(ctx, target, true, exposures, depth),
        ConditionKind::MultiFailGate => {
            return eval_multi_gate(ctx, target, false, exposures, depth)
        }
        ConditionKind::UserField => field_value(ctx, condition),
        ConditionKind::IpBased => field_value(ctx, condition).or_else(|| {
            let field = condition.field.as_deref()?;
            if !field.eq_ignore_ascii_case(COUNTRY_FIELD) {
                return None;
            }
            let ip = ctx.user.ip.as_deref()?;
            ctx.engine
                .country_lookup
                .as_ref()?
                .lookup(ip)
                .map(Value::String)
        }),
        ConditionKind::UaBased => field_value(ctx, condition).or_else(|| {
            let field = condition.field.as_deref()?;
            let user_agent = ctx.user.user_agent.as_deref()?;
            ctx.engine
                .ua_parser
                .get_field(user_agent, field)
                .map(Value::String)
        }),
        ConditionKind::EnvironmentField => {
            let field = condition.field.as_deref().unwrap_or_default();
            ctx.user
                .get_environment_field(field)
                .map(str::to_owned)
                .or_else(|| {
                    field
                        .eq_ignore_ascii_case(TIER_FIELD)
                        .then(|| ctx.engine.environment_tier.clone())
                        .flatten()
                })
                .map(Value::String)
        }
        ConditionKind::CurrentTime => Some(Value::from(chrono::Utc::now().timestamp_millis())),
        ConditionKind::UserBucket => {
            let salt = condition
                .additional_values
                .get(USER_BUCKET_SALT)
                .and_then(value_to_string)
                .unwrap_or_default();
            let unit_id = ctx.user.unit_id(&condition.id_type);
            Some(Value::from(ctx.engine.hasher.user_bucket(&salt, unit_id)))
        }
        ConditionKind::UnitId => {
            let unit_id = ctx.user.unit_id(&condition.id_type);
            (!unit_id.is_empty()).then(|| Value::String(unit_id.to_owned()))
        }
        ConditionKind::TargetApp => ctx.options.target_app_id.clone().map(Value::String),
        ConditionKind::Unknown(_) => return None,
    };

    let operator = condition.operator.as_ref()?;
    match operator {
        Operator::InSegmentList => Some(in_segment_list(ctx, value.as_ref(), target)),
        Operator::NotInSegmentList => Some(!in_segment_list(ctx, value.as_ref(), target)),
        _ => compare(operator, value.as_ref(), target),
    }
}

fn field_value(ctx: &EvalContext, condition: &Condition) -> Option<Value> {
    ctx.user.get_field(condition.field.as_deref()?)
}

fn gate_name(target: &Value) -> String {
    value_to_string(target).unwrap_or_default()
}

/// `multi_pass_gate` passes at the first passing gate, `multi_fail_gate` at the first failing
/// one. Gates after that are not evaluated.
fn eval_multi_gate(
    ctx: &EvalContext,
    target: &Value,
    pass_on: bool,
    exposures: &mut Vec<SecondaryExposure>,
    depth: usize,
) -> Option<bool> {
    let Value::Array(gates) = target else {
        return Some(false);
    };
    for gate in gates {
        let value = eval_gate_reference(ctx, &gate_name(gate), exposures, depth)?;
        if value == pass_on {
            return Some(true);
        }
    }
    Some(false)
}

fn in_segment_list(ctx: &EvalContext, value: Option<&Value>, target: &Value) -> bool {
    let (Some(value), Some(list_name)) = (value.and_then(value_to_string), target.as_str()) else {
        return false;
    };
    ctx.snapshot
        .get_id_list(list_name)
        .is_some_and(|list| list.contains(&hash_id_list_value(&value)))
}
