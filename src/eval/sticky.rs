//! Evaluation through persisted (sticky) assignments.
use crate::{
    persistent_storage::{PersistentAssignments, StickyKey},
    spec::Spec,
};

use super::{
    eval_spec::{eval_spec, EvalContext, EvalMode},
    EvaluationResult,
};

/// Evaluate a dynamic config or experiment, honouring sticky assignments of active experiments.
pub(crate) fn eval_config(ctx: &EvalContext, spec: &Spec, depth: usize) -> EvaluationResult {
    let Some(assignments) = &ctx.engine.persistent_assignments else {
        return eval_spec(ctx, spec, EvalMode::Full, depth);
    };

    let key = sticky_key(ctx, spec);
    match spec.is_active {
        // Not an experiment.
        None => eval_spec(ctx, spec, EvalMode::Full, depth),
        Some(false) => {
            assignments.delete(&key, &spec.name);
            eval_spec(ctx, spec, EvalMode::Full, depth)
        }
        Some(true) => match assignments.load(&key, &spec.name) {
            Some(sticky) if !excluded_by_targeting(ctx, spec, depth) => {
                sticky.into_result(ctx.details())
            }
            _ => eval_and_persist(ctx, assignments, &key, spec, depth),
        },
    }
}

/// Evaluate a layer, honouring its sticky assignment as long as the experiment it delegated to
/// is still active.
pub(crate) fn eval_layer(ctx: &EvalContext, spec: &Spec, depth: usize) -> EvaluationResult {
    let Some(assignments) = &ctx.engine.persistent_assignments else {
        return eval_spec(ctx, spec, EvalMode::Full, depth);
    };

    let key = sticky_key(ctx, spec);
    let Some(sticky) = assignments.load(&key, &spec.name) else {
        return eval_and_persist(ctx, assignments, &key, spec, depth);
    };

    let delegate = sticky
        .config_delegate
        .as_deref()
        .and_then(|name| ctx.snapshot.get_config(name))
        .filter(|delegate| delegate.is_active());
    let Some(delegate) = delegate else {
        assignments.delete(&key, &spec.name);
        return eval_and_persist(ctx, assignments, &key, spec, depth);
    };

    if excluded_by_targeting(ctx, delegate, depth) {
        return eval_and_persist(ctx, assignments, &key, spec, depth);
    }
    sticky.into_result(ctx.details())
}

fn sticky_key(ctx: &EvalContext, spec: &Spec) -> StickyKey {
    StickyKey::new(ctx.user.unit_id(&spec.id_type), &spec.id_type)
}

/// Whether targeting is enforced and no longer admits the unit into `spec`.
fn excluded_by_targeting(ctx: &EvalContext, spec: &Spec, depth: usize) -> bool {
    ctx.options.enforce_targeting && eval_spec(ctx, spec, EvalMode::TargetingOnly, depth).value
}

/// Evaluate fresh and write the outcome through: persisted if the unit landed in an experiment
/// group, otherwise any stale entry is removed.
fn eval_and_persist(
    ctx: &EvalContext,
    assignments: &PersistentAssignments,
    key: &StickyKey,
    spec: &Spec,
    depth: usize,
) -> EvaluationResult {
    let result = eval_spec(ctx, spec, EvalMode::Full, depth);
    if result.unsupported {
        return result;
    }
    if result.is_experiment_group {
        assignments.save(key, &spec.name, &result);
    } else {
        assignments.delete(key, &spec.name);
    }
    result
}

