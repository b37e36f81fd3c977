use std::sync::Arc;

use crate::{
    events::{DiagnosticEvent, DiagnosticsObserver, NoopDiagnosticsObserver},
    hashing::Hasher,
    overrides::Overrides,
    persistent_storage::{PersistentAssignments, PersistentStorage},
    snapshot::Snapshot,
    spec::Spec,
    spec_store::SpecStore,
    user::User,
    JsonObject,
};

use super::{
    eval_spec::{eval_spec, Engine, EvalContext, EvalMode},
    sticky,
    user_agent::UserAgentParser,
    CountryLookup, EvalOptions, EvaluationDetails, EvaluationReason, EvaluationResult,
};

/// Rule id of results produced by a local override.
const OVERRIDE_RULE_ID: &str = "override";

/// Configuration for [`Evaluator`].
pub struct EvaluatorConfig {
    /// Store the evaluator reads snapshots from.
    pub spec_store: Arc<SpecStore>,
    /// Resolves IPs to countries for `ip_based` conditions.
    pub country_lookup: Option<Arc<dyn CountryLookup>>,
    /// Environment tier used when the user carries no `tier` environment tag.
    pub environment_tier: Option<String>,
    /// Storage for sticky assignments.
    pub persistent_storage: Option<Arc<dyn PersistentStorage>>,
    /// Receives an event per evaluation.
    pub observer: Option<Arc<dyn DiagnosticsObserver>>,
}

impl EvaluatorConfig {
    /// Configuration with nothing but the store.
    pub fn new(spec_store: Arc<SpecStore>) -> EvaluatorConfig {
        EvaluatorConfig {
            spec_store,
            country_lookup: None,
            environment_tier: None,
            persistent_storage: None,
            observer: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Gate,
    Config,
    Layer,
}

/// Evaluates gates, configs and layers against the current snapshot of a [`SpecStore`].
///
/// Evaluation is synchronous and never blocks on synchronization: every call clones the current
/// snapshot reference and reads only from it.
pub struct Evaluator {
    spec_store: Arc<SpecStore>,
    engine: Engine,
    overrides: Overrides,
    observer: Arc<dyn DiagnosticsObserver>,
}

impl Evaluator {
    /// Create an evaluator.
    pub fn new(config: EvaluatorConfig) -> Evaluator {
        Evaluator {
            spec_store: config.spec_store,
            engine: Engine {
                hasher: Hasher::new(),
                ua_parser: UserAgentParser::new(),
                country_lookup: config.country_lookup,
                environment_tier: config.environment_tier,
                persistent_assignments: config.persistent_storage.map(PersistentAssignments::new),
            },
            overrides: Overrides::new(),
            observer: config
                .observer
                .unwrap_or_else(|| Arc::new(NoopDiagnosticsObserver)),
        }
    }

    /// Evaluate a feature gate.
    pub fn check_gate(&self, user: &User, name: &str) -> EvaluationResult {
        self.check_gate_with_options(user, name, &EvalOptions::default())
    }

    /// Evaluate a feature gate with per-call options.
    pub fn check_gate_with_options(
        &self,
        user: &User,
        name: &str,
        options: &EvalOptions,
    ) -> EvaluationResult {
        self.evaluate(user, name, options, Target::Gate)
    }

    /// Evaluate a dynamic config or experiment.
    pub fn get_config(&self, user: &User, name: &str) -> EvaluationResult {
        self.get_config_with_options(user, name, &EvalOptions::default())
    }

    /// Evaluate a dynamic config or experiment with per-call options.
    pub fn get_config_with_options(
        &self,
        user: &User,
        name: &str,
        options: &EvalOptions,
    ) -> EvaluationResult {
        self.evaluate(user, name, options, Target::Config)
    }

    /// Evaluate a layer.
    pub fn get_layer(&self, user: &User, name: &str) -> EvaluationResult {
        self.get_layer_with_options(user, name, &EvalOptions::default())
    }

    /// Evaluate a layer with per-call options.
    pub fn get_layer_with_options(
        &self,
        user: &User,
        name: &str,
        options: &EvalOptions,
    ) -> EvaluationResult {
        self.evaluate(user, name, options, Target::Layer)
    }

    /// Name of the layer `experiment` is allocated in.
    pub fn get_experiment_layer(&self, experiment: &str) -> Option<String> {
        self.spec_store
            .get_snapshot()
            .layer_for_experiment(experiment)
            .map(str::to_owned)
    }

    /// Override a gate for `id` (a `userID` or custom id), or for everyone if `id` is `None`.
    pub fn override_gate(&self, name: &str, value: bool, id: Option<&str>) {
        self.overrides.override_gate(name, value, id);
    }

    /// Override a dynamic config or experiment for `id`, or for everyone if `id` is `None`.
    pub fn override_config(&self, name: &str, value: JsonObject, id: Option<&str>) {
        self.overrides.override_config(name, value, id);
    }

    /// Override a layer for `id`, or for everyone if `id` is `None`.
    pub fn override_layer(&self, name: &str, value: JsonObject, id: Option<&str>) {
        self.overrides.override_layer(name, value, id);
    }

    /// Remove a gate override for `id`, or all overrides of the gate if `id` is `None`.
    pub fn remove_gate_override(&self, name: &str, id: Option<&str>) {
        self.overrides.remove_gate_override(name, id);
    }

    /// Remove a config override for `id`, or all overrides of the config if `id` is `None`.
    pub fn remove_config_override(&self, name: &str, id: Option<&str>) {
        self.overrides.remove_config_override(name, id);
    }

    /// Remove a layer override for `id`, or all overrides of the layer if `id` is `None`.
    pub fn remove_layer_override(&self, name: &str, id: Option<&str>) {
        self.overrides.remove_layer_override(name, id);
    }

    /// Remove every override.
    pub fn remove_all_overrides(&self) {
        self.overrides.remove_all();
    }

    fn evaluate(
        &self,
        user: &User,
        name: &str,
        options: &EvalOptions,
        target: Target,
    ) -> EvaluationResult {
        let snapshot = self.spec_store.get_snapshot();
        let result = self.evaluate_snapshot(&snapshot, user, name, options, target);

        log::trace!(target: "featuregate", spec_name = name, value = result.value, rule_id = result.rule_id.as_str(); "evaluated");
        self.observer.on_event(DiagnosticEvent::Evaluated {
            name: name.to_owned(),
            value: result.value,
            rule_id: result.rule_id.clone(),
            reason: result.evaluation_details.reason,
        });
        result
    }

    fn evaluate_snapshot(
        &self,
        snapshot: &Snapshot,
        user: &User,
        name: &str,
        options: &EvalOptions,
        target: Target,
    ) -> EvaluationResult {
        if let Some(result) = self.get_override(snapshot, user, name, target) {
            return result;
        }

        if !snapshot.is_initialized() {
            log::warn!(target: "featuregate", spec_name = name; "evaluating before specs have been synchronized");
            return EvaluationResult::empty(EvaluationDetails::new(
                snapshot,
                EvaluationReason::Uninitialized,
            ));
        }

        let spec: Option<&Arc<Spec>> = match target {
            Target::Gate => snapshot.get_gate(name),
            Target::Config => snapshot.get_config(name),
            Target::Layer => snapshot.get_layer(name),
        };
        let Some(spec) = spec else {
            log::debug!(target: "featuregate", spec_name = name; "spec not found");
            return EvaluationResult::empty(EvaluationDetails::new(
                snapshot,
                EvaluationReason::Unrecognized,
            ));
        };

        let ctx = EvalContext {
            engine: &self.engine,
            snapshot,
            user,
            options,
        };
        match target {
            Target::Gate => eval_spec(&ctx, spec, EvalMode::Full, 0),
            Target::Config => sticky::eval_config(&ctx, spec, 0),
            Target::Layer => sticky::eval_layer(&ctx, spec, 0),
        }
    }

    fn get_override(
        &self,
        snapshot: &Snapshot,
        user: &User,
        name: &str,
        target: Target,
    ) -> Option<EvaluationResult> {
        let (value, json_value) = match target {
            Target::Gate => (self.overrides.gate(name, user)?, JsonObject::new()),
            Target::Config => (true, self.overrides.config(name, user)?),
            Target::Layer => (true, self.overrides.layer(name, user)?),
        };
        Some(EvaluationResult {
            value,
            rule_id: OVERRIDE_RULE_ID.to_owned(),
            json_value,
            ..EvaluationResult::empty(EvaluationDetails::new(
                snapshot,
                EvaluationReason::LocalOverride,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use super::*;
    use crate::{
        events::DiagnosticEvent,
        id_lists::IdList,
        persistent_storage::{tests::MemoryStorage, StickyKey},
        snapshot::{IdLists, SpecSet, SyncSource},
        SecondaryExposure,
    };

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn gate(name: &str, rules: Value) -> Value {
        json!({
            "name": name,
            "type": "feature_gate",
            "salt": format!("{name}_salt"),
            "enabled": true,
            "defaultValue": false,
            "rules": rules
        })
    }

    fn rule(id: &str, pass_percentage: f64, conditions: Value) -> Value {
        json!({
            "id": id,
            "passPercentage": pass_percentage,
            "conditions": conditions,
            "returnValue": true
        })
    }

    fn store(gates: Value, configs: Value, layers: Value, layer_map: Value) -> Arc<SpecStore> {
        let payload = json!({
            "has_updates": true,
            "time": 100,
            "feature_gates": gates,
            "dynamic_configs": configs,
            "layer_configs": layers,
            "layers": layer_map
        });
        let specs = SpecSet::from_json(&serde_json::to_vec(&payload).unwrap())
            .unwrap()
            .unwrap();
        let store = Arc::new(SpecStore::new());
        store.update(|snapshot| snapshot.with_specs(specs, SyncSource::Network));
        store
    }

    fn gates_store(gates: Value) -> Arc<SpecStore> {
        store(gates, json!([]), json!([]), json!({}))
    }

    fn evaluator(store: Arc<SpecStore>) -> Evaluator {
        Evaluator::new(EvaluatorConfig::new(store))
    }

    fn exposure(gate: &str, value: bool, rule_id: &str) -> SecondaryExposure {
        SecondaryExposure {
            gate: gate.to_owned(),
            gate_value: value.to_string(),
            rule_id: rule_id.to_owned(),
        }
    }

    #[test]
    fn uninitialized_and_unrecognized() {
        init();
        let evaluator = evaluator(Arc::new(SpecStore::new()));
        let result = evaluator.check_gate(&User::with_user_id("u"), "g");
        assert!(!result.value);
        assert_eq!(
            result.evaluation_details.reason,
            EvaluationReason::Uninitialized
        );
        assert_eq!(result.evaluation_details.init_time, -1);

        let evaluator = super::tests::evaluator(gates_store(json!([])));
        let result = evaluator.check_gate(&User::with_user_id("u"), "missing");
        assert_eq!(result.evaluation_details.reason, EvaluationReason::Unrecognized);
        assert_eq!(result.rule_id, "");
    }

    #[test]
    fn email_contains_condition() {
        init();
        let evaluator = evaluator(gates_store(json!([gate(
            "nfl_gate",
            json!([rule(
                "rule_nfl",
                100.0,
                json!([{
                    "type": "user_field",
                    "field": "email",
                    "operator": "str_contains_any",
                    "targetValue": ["nfl.com"]
                }])
            )])
        )])));

        let result = evaluator.check_gate(&User::default().email("a@nfl.com"), "nfl_gate");
        assert!(result.value);
        assert_eq!(result.rule_id, "rule_nfl");
        assert_eq!(result.evaluation_details.reason, EvaluationReason::Network);

        let result = evaluator.check_gate(&User::default().email("a@example.com"), "nfl_gate");
        assert!(!result.value);
        assert_eq!(result.rule_id, "default");
    }

    #[test]
    fn disabled_spec_skips_rules() {
        let mut spec = gate("g", json!([rule("r", 100.0, json!([{"type": "public"}]))]));
        spec["enabled"] = json!(false);
        let evaluator = evaluator(gates_store(json!([spec])));

        let result = evaluator.check_gate(&User::with_user_id("u"), "g");
        assert!(!result.value);
        assert_eq!(result.rule_id, "disabled");
    }

    #[test]
    fn first_matching_rule_wins_even_when_roll_fails() {
        let evaluator = evaluator(gates_store(json!([gate(
            "g",
            json!([
                rule("zero", 0.0, json!([{"type": "public"}])),
                rule("full", 100.0, json!([{"type": "public"}]))
            ])
        )])));

        for i in 0..100 {
            let result = evaluator.check_gate(&User::with_user_id(format!("u{i}")), "g");
            assert!(!result.value);
            assert_eq!(result.rule_id, "zero");
        }
    }

    #[test]
    fn gate_references_record_exposures() {
        let evaluator = evaluator(gates_store(json!([
            gate("on", json!([rule("on_rule", 100.0, json!([{"type": "public"}]))])),
            gate("off", json!([])),
            gate("segment:beta", json!([rule("seg_rule", 100.0, json!([{"type": "public"}]))])),
            gate(
                "parent",
                json!([rule(
                    "parent_rule",
                    100.0,
                    json!([
                        {"type": "pass_gate", "targetValue": "on"},
                        {"type": "fail_gate", "targetValue": "off"},
                        {"type": "pass_gate", "targetValue": "segment:beta"},
                        {"type": "pass_gate", "targetValue": "on"}
                    ])
                )])
            )
        ])));

        let result = evaluator.check_gate(&User::with_user_id("u"), "parent");

        assert!(result.value);
        assert_eq!(
            result.secondary_exposures,
            vec![exposure("on", true, "on_rule"), exposure("off", false, "default")]
        );
    }

    #[test]
    fn conditions_do_not_short_circuit() {
        let evaluator = evaluator(gates_store(json!([
            gate("on", json!([rule("on_rule", 100.0, json!([{"type": "public"}]))])),
            gate(
                "parent",
                json!([rule(
                    "parent_rule",
                    100.0,
                    json!([
                        {"type": "user_field", "field": "email", "operator": "any", "targetValue": ["x"]},
                        {"type": "pass_gate", "targetValue": "on"}
                    ])
                )])
            )
        ])));

        let result = evaluator.check_gate(&User::with_user_id("u"), "parent");

        assert!(!result.value);
        assert_eq!(result.rule_id, "default");
        assert_eq!(result.secondary_exposures, vec![exposure("on", true, "on_rule")]);
    }

    #[test]
    fn multi_gates_short_circuit() {
        let evaluator = evaluator(gates_store(json!([
            gate("on", json!([rule("on_rule", 100.0, json!([{"type": "public"}]))])),
            gate("off", json!([])),
            gate(
                "any_on",
                json!([rule(
                    "r",
                    100.0,
                    json!([{"type": "multi_pass_gate", "targetValue": ["off", "on", "never_checked"]}])
                )])
            ),
            gate(
                "any_off",
                json!([rule(
                    "r",
                    100.0,
                    json!([{"type": "multi_fail_gate", "targetValue": ["on", "on"]}])
                )])
            )
        ])));
        let user = User::with_user_id("u");

        let result = evaluator.check_gate(&user, "any_on");
        assert!(result.value);
        assert_eq!(
            result.secondary_exposures,
            vec![exposure("off", false, "default"), exposure("on", true, "on_rule")]
        );

        assert!(!evaluator.check_gate(&user, "any_off").value);
    }

    #[test]
    fn unsupported_condition_surfaces() {
        let mut spec = gate(
            "g",
            json!([
                rule("ok", 100.0, json!([{"type": "user_field", "field": "email", "operator": "any", "targetValue": ["x"]}])),
                rule("bad", 100.0, json!([{"type": "user_field", "field": "email", "operator": "teleports", "targetValue": 1}]))
            ]),
        );
        spec["version"] = json!(7);
        let evaluator = evaluator(gates_store(json!([spec])));

        let result = evaluator.check_gate(&User::with_user_id("u"), "g");

        assert!(result.unsupported);
        assert!(!result.value);
        assert_eq!(result.rule_id, "");
        assert_eq!(result.version, Some(7));
        assert_eq!(result.evaluation_details.reason, EvaluationReason::Unsupported);
        assert_eq!(result.evaluation_details.config_sync_time, 100);
    }

    #[test]
    fn self_reference_is_cut_off() {
        let evaluator = evaluator(gates_store(json!([gate(
            "loop",
            json!([rule("r", 100.0, json!([{"type": "pass_gate", "targetValue": "loop"}]))])
        )])));

        let result = evaluator.check_gate(&User::with_user_id("u"), "loop");

        assert!(result.unsupported);
        assert_eq!(result.evaluation_details.reason, EvaluationReason::Unsupported);
    }

    #[test]
    fn repeated_self_reference_is_cut_off_quickly() {
        let evaluator = evaluator(gates_store(json!([gate(
            "loop",
            json!([rule(
                "r",
                100.0,
                json!([
                    {"type": "pass_gate", "targetValue": "loop"},
                    {"type": "pass_gate", "targetValue": "loop"}
                ])
            )])
        )])));

        let started = std::time::Instant::now();
        let result = evaluator.check_gate(&User::with_user_id("u"), "loop");

        assert!(result.unsupported);
        assert!(result.secondary_exposures.is_empty());
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn unsupported_condition_skips_remaining_conditions() {
        let evaluator = evaluator(gates_store(json!([
            gate("on", json!([rule("on_rule", 100.0, json!([{"type": "public"}]))])),
            gate(
                "g",
                json!([rule(
                    "r",
                    100.0,
                    json!([
                        {"type": "user_field", "field": "email", "operator": "teleports", "targetValue": 1},
                        {"type": "pass_gate", "targetValue": "on"}
                    ])
                )])
            )
        ])));

        let result = evaluator.check_gate(&User::with_user_id("u"), "g");

        assert!(result.unsupported);
        assert!(result.secondary_exposures.is_empty());
    }

    #[test]
    fn segment_list_membership() {
        let store = gates_store(json!([gate(
            "in_list",
            json!([rule(
                "r",
                100.0,
                json!([{"type": "unit_id", "operator": "in_segment_list", "targetValue": "beta_users"}])
            )])
        )]));
        let list = IdList {
            name: "beta_users".to_owned(),
            file_id: "f".to_owned(),
            creation_time: 1,
            url: "u".to_owned(),
            read_bytes: 9,
            ids: [crate::hashing::hash_id_list_value("user-a")].into_iter().collect(),
        };
        store.update(|snapshot| {
            snapshot.with_id_lists(IdLists::from([("beta_users".to_owned(), Arc::new(list))]))
        });
        let evaluator = evaluator(store);

        assert!(evaluator.check_gate(&User::with_user_id("user-a"), "in_list").value);
        assert!(!evaluator.check_gate(&User::with_user_id("user-b"), "in_list").value);
    }

    #[test]
    fn environment_tier_and_target_app() {
        let evaluator = Evaluator::new(EvaluatorConfig {
            environment_tier: Some("staging".to_owned()),
            ..EvaluatorConfig::new(gates_store(json!([
                gate("staging_only", json!([rule("r", 100.0, json!([
                    {"type": "environment_field", "field": "tier", "operator": "any", "targetValue": ["staging"]}
                ]))])),
                gate("app_only", json!([rule("r", 100.0, json!([
                    {"type": "target_app", "operator": "any", "targetValue": ["app-1"]}
                ]))]))
            ])))
        });
        let user = User::with_user_id("u");

        assert!(evaluator.check_gate(&user, "staging_only").value);
        assert!(!evaluator
            .check_gate(&user.clone().environment("tier", "production"), "staging_only")
            .value);

        assert!(!evaluator.check_gate(&user, "app_only").value);
        let options = EvalOptions::new().with_target_app_id("app-1");
        assert!(evaluator.check_gate_with_options(&user, "app_only", &options).value);
    }

    #[test]
    fn ip_country_uses_lookup() {
        let lookup = |ip: &str| (ip == "1.2.3.4").then(|| "NZ".to_owned());
        let evaluator = Evaluator::new(EvaluatorConfig {
            country_lookup: Some(Arc::new(lookup)),
            ..EvaluatorConfig::new(gates_store(json!([gate(
                "nz",
                json!([rule("r", 100.0, json!([
                    {"type": "ip_based", "field": "country", "operator": "any", "targetValue": ["NZ"]}
                ]))])
            )])))
        });

        assert!(evaluator.check_gate(&User::default().ip("1.2.3.4"), "nz").value);
        assert!(!evaluator.check_gate(&User::default().ip("5.6.7.8"), "nz").value);
        assert!(evaluator.check_gate(&User::default().country("NZ"), "nz").value);
    }

    fn layered_store() -> Arc<SpecStore> {
        store(
            json!([
                gate("layer_gate", json!([rule("layer_gate_rule", 100.0, json!([{"type": "public"}]))])),
                gate("exp_gate", json!([rule("exp_gate_rule", 100.0, json!([{"type": "public"}]))]))
            ]),
            json!([{
                "name": "exp",
                "type": "dynamic_config",
                "entity": "experiment",
                "salt": "exp_salt",
                "enabled": true,
                "isActive": true,
                "explicitParameters": ["color"],
                "defaultValue": {"color": "grey", "size": 1},
                "rules": [{
                    "id": "treatment_rule",
                    "groupName": "Treatment",
                    "passPercentage": 100,
                    "isExperimentGroup": true,
                    "conditions": [
                        {"type": "pass_gate", "targetValue": "exp_gate"},
                        {"type": "pass_gate", "targetValue": "layer_gate"}
                    ],
                    "returnValue": {"color": "red", "size": 1}
                }]
            }]),
            json!([{
                "name": "layer",
                "type": "dynamic_config",
                "entity": "layer",
                "salt": "layer_salt",
                "enabled": true,
                "defaultValue": {"color": "grey", "size": 1},
                "rules": [{
                    "id": "alloc",
                    "passPercentage": 100,
                    "conditions": [{"type": "pass_gate", "targetValue": "layer_gate"}],
                    "configDelegate": "exp",
                    "returnValue": {}
                }]
            }]),
            json!({"layer": ["exp"]}),
        )
    }

    #[test]
    fn layer_delegation_splits_exposures() {
        let evaluator = evaluator(layered_store());

        let result = evaluator.get_layer(&User::with_user_id("u"), "layer");

        assert_eq!(result.rule_id, "treatment_rule");
        assert_eq!(result.group_name.as_deref(), Some("Treatment"));
        assert_eq!(result.config_delegate.as_deref(), Some("exp"));
        assert_eq!(result.explicit_parameters, Some(vec!["color".to_owned()]));
        assert_eq!(result.get("color"), Some(&json!("red")));
        assert!(result.is_experiment_group);
        assert_eq!(
            result.undelegated_secondary_exposures,
            vec![exposure("layer_gate", true, "layer_gate_rule")]
        );
        assert_eq!(
            result.secondary_exposures,
            vec![
                exposure("layer_gate", true, "layer_gate_rule"),
                exposure("exp_gate", true, "exp_gate_rule")
            ]
        );
        assert_eq!(evaluator.get_experiment_layer("exp").as_deref(), Some("layer"));
        assert_eq!(evaluator.get_experiment_layer("nope"), None);
    }

    #[test]
    fn missing_delegate_falls_through_to_rule() {
        let evaluator = evaluator(store(
            json!([]),
            json!([]),
            json!([{
                "name": "layer",
                "type": "dynamic_config",
                "salt": "s",
                "enabled": true,
                "defaultValue": {},
                "rules": [{
                    "id": "alloc",
                    "passPercentage": 100,
                    "conditions": [{"type": "public"}],
                    "configDelegate": "gone",
                    "returnValue": {"p": 1}
                }]
            }]),
            json!({}),
        ));

        let result = evaluator.get_layer(&User::with_user_id("u"), "layer");

        assert!(result.value);
        assert_eq!(result.rule_id, "alloc");
        assert_eq!(result.config_delegate, None);
        assert_eq!(result.get("p"), Some(&json!(1)));
    }

    #[test]
    fn overrides_take_precedence() {
        let evaluator = evaluator(gates_store(json!([gate("g", json!([]))])));
        let user = User::with_user_id("u");

        evaluator.override_gate("g", true, Some("u"));
        let result = evaluator.check_gate(&user, "g");
        assert!(result.value);
        assert_eq!(result.rule_id, "override");
        assert_eq!(result.evaluation_details.reason, EvaluationReason::LocalOverride);

        evaluator.override_config(
            "c",
            json!({"k": "v"}).as_object().unwrap().clone(),
            None,
        );
        assert_eq!(evaluator.get_config(&user, "c").get("k"), Some(&json!("v")));

        evaluator.remove_all_overrides();
        assert_eq!(evaluator.check_gate(&user, "g").rule_id, "default");
    }

    #[test]
    fn overrides_apply_before_initialization() {
        let evaluator = evaluator(Arc::new(SpecStore::new()));
        evaluator.override_layer("l", JsonObject::new(), None);
        let result = evaluator.get_layer(&User::default(), "l");
        assert_eq!(result.evaluation_details.reason, EvaluationReason::LocalOverride);
    }

    #[test]
    fn observer_receives_evaluations() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let observer = {
            let events = Arc::clone(&events);
            move |event: DiagnosticEvent| events.lock().unwrap().push(event)
        };
        let evaluator = Evaluator::new(EvaluatorConfig {
            observer: Some(Arc::new(observer)),
            ..EvaluatorConfig::new(gates_store(json!([gate("g", json!([]))])))
        });

        evaluator.check_gate(&User::with_user_id("u"), "g");

        assert_eq!(
            *events.lock().unwrap(),
            vec![DiagnosticEvent::Evaluated {
                name: "g".to_owned(),
                value: false,
                rule_id: "default".to_owned(),
                reason: EvaluationReason::Network,
            }]
        );
    }

    #[test]
    fn layer_sticky_value_requires_active_delegate() {
        let storage = Arc::new(MemoryStorage::default());
        let store = layered_store();
        let evaluator = Evaluator::new(EvaluatorConfig {
            persistent_storage: Some(storage.clone()),
            ..EvaluatorConfig::new(Arc::clone(&store))
        });
        let user = User::with_user_id("u");
        let key = StickyKey::new("u", "userID");

        let first = evaluator.get_layer(&user, "layer");
        assert!(first.is_experiment_group);
        assert!(storage.get(&key, "layer").is_some());
        assert!(storage.get(&key, "exp").is_some());

        let second = evaluator.get_layer(&user, "layer");
        assert_eq!(second.evaluation_details.reason, EvaluationReason::Persisted);
        assert_eq!(second.group_name.as_deref(), Some("Treatment"));

        // Deactivate the experiment: the layer's sticky value is dropped.
        let payload = {
            let mut snapshot_specs = SpecSet::default();
            let current = store.get_snapshot();
            snapshot_specs.time = 200;
            snapshot_specs.gates = current.specs.gates.clone();
            snapshot_specs.layers = current.specs.layers.clone();
            let mut exp = Spec::clone(current.get_config("exp").unwrap());
            exp.is_active = Some(false);
            snapshot_specs.configs.insert("exp".to_owned(), Arc::new(exp));
            snapshot_specs
        };
        store.update(|snapshot| snapshot.with_specs(payload, SyncSource::Network));

        let third = evaluator.get_layer(&user, "layer");
        assert_eq!(third.evaluation_details.reason, EvaluationReason::Network);
        assert!(storage.get(&key, "exp").is_none());
    }

    fn stamped_specs(time: i64) -> SpecSet {
        let payload = json!({
            "has_updates": true,
            "time": time,
            "feature_gates": [],
            "dynamic_configs": [{
                "name": "stamped",
                "type": "dynamic_config",
                "salt": "stamped_salt",
                "enabled": true,
                "defaultValue": {},
                "rules": [{
                    "id": format!("rule_{time}"),
                    "passPercentage": 100,
                    "conditions": [{"type": "public"}],
                    "returnValue": {"time": time}
                }]
            }],
            "layer_configs": []
        });
        SpecSet::from_json(&serde_json::to_vec(&payload).unwrap())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn evaluations_see_whole_snapshots_during_swaps() {
        let store = Arc::new(SpecStore::new());
        store.update(|snapshot| snapshot.with_specs(stamped_specs(1), SyncSource::Network));
        let evaluator = evaluator(Arc::clone(&store));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for time in 2..=200 {
                    let specs = stamped_specs(time);
                    store.update(|snapshot| snapshot.with_specs(specs, SyncSource::Network));
                    let list = IdList {
                        name: "churn".to_owned(),
                        file_id: format!("f{time}"),
                        creation_time: time,
                        url: "u".to_owned(),
                        read_bytes: 0,
                        ids: Default::default(),
                    };
                    store.update(|snapshot| {
                        snapshot.with_id_lists(IdLists::from([("churn".to_owned(), Arc::new(list))]))
                    });
                }
            });

            for _ in 0..4 {
                scope.spawn(|| {
                    let user = User::with_user_id("u");
                    for _ in 0..500 {
                        let result = evaluator.get_config(&user, "stamped");
                        let time = result.evaluation_details.config_sync_time;
                        assert_eq!(result.evaluation_details.reason, EvaluationReason::Network);
                        assert_eq!(result.get("time"), Some(&json!(time)));
                        assert_eq!(result.rule_id, format!("rule_{time}"));
                    }
                });
            }
        });

        assert_eq!(store.get_snapshot().last_sync_time, 200);
        assert!(store.get_snapshot().get_id_list("churn").is_some());
    }

    #[test]
    fn racing_sticky_writes_store_the_same_assignment() {
        init();
        let storage = Arc::new(MemoryStorage::default());
        let store = layered_store();
        let sticky_evaluator = || {
            Evaluator::new(EvaluatorConfig {
                persistent_storage: Some(storage.clone()),
                ..EvaluatorConfig::new(Arc::clone(&store))
            })
        };
        let (first, second) = (sticky_evaluator(), sticky_evaluator());
        let users: Vec<User> = (0..50).map(|i| User::with_user_id(format!("u{i}"))).collect();

        // Both evaluators may load an empty entry and then both save. The last write wins and
        // both writes carry the same deterministic assignment.
        let (a, b) = std::thread::scope(|scope| {
            let run = |evaluator: &Evaluator| {
                users
                    .iter()
                    .map(|user| evaluator.get_config(user, "exp"))
                    .collect::<Vec<_>>()
            };
            let a = scope.spawn(move || run(&first));
            let b = scope.spawn(move || run(&second));
            (a.join().unwrap(), b.join().unwrap())
        });

        for ((user, a), b) in users.iter().zip(a).zip(b) {
            assert_eq!(a.group_name, b.group_name);
            assert_eq!(a.json_value, b.json_value);
            let key = StickyKey::new(user.user_id.as_deref().unwrap(), "userID");
            let stored = storage.get(&key, "exp").unwrap();
            assert_eq!(stored.group_name, a.group_name);
            assert_eq!(stored.json_value, a.json_value);
        }
    }
}
