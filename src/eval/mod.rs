//! Rule evaluation engine.
mod eval_conditions;
mod eval_result;
mod eval_spec;
mod evaluator;
mod operators;
mod sticky;
mod user_agent;

pub use eval_result::{EvaluationDetails, EvaluationReason, EvaluationResult, SecondaryExposure};
pub use evaluator::{Evaluator, EvaluatorConfig};

pub(crate) use eval_result::clean_exposures;

/// Resolves an IP address to a two-letter country code for `ip_based` conditions.
pub trait CountryLookup: Send + Sync {
    /// Country code of `ip`, if known.
    fn lookup(&self, ip: &str) -> Option<String>;
}

impl<T: Fn(&str) -> Option<String> + Send + Sync> CountryLookup for T {
    fn lookup(&self, ip: &str) -> Option<String> {
        self(ip)
    }
}

/// Per-call evaluation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalOptions {
    /// Re-check targeting before honouring a persisted sticky assignment.
    pub enforce_targeting: bool,
    /// App id matched by `target_app` conditions.
    pub target_app_id: Option<String>,
}

impl EvalOptions {
    /// Default options.
    pub fn new() -> EvalOptions {
        EvalOptions::default()
    }

    /// Require sticky assignments to still pass targeting.
    pub fn with_enforce_targeting(mut self, enforce_targeting: bool) -> EvalOptions {
        self.enforce_targeting = enforce_targeting;
        self
    }

    /// Set the app id for `target_app` conditions.
    pub fn with_target_app_id(mut self, target_app_id: impl Into<String>) -> EvalOptions {
        self.target_app_id = Some(target_app_id.into());
        self
    }
}
