//! Engine facade (§6) and the pipeline executor (§4.2, §5): the one
//! stateful, reusable object applications hold onto across many validations.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::config::ValidatorConfig;
use crate::context::{PipelineContext, RuntimeSettings, TypeResolver};
use crate::error::ConfigError;
use crate::interfaces::{FhirPathEvaluator, ProfileResolver, ReferenceResolver, TerminologyService};
use crate::issue::{IssueCode, ValidationIssue, ValidationOutcome};
use crate::plan::{PriorityClass, ValidationPlan};
use crate::steps::primitives::id_regex;
use crate::steps::Phase;

#[derive(Debug, Default)]
struct Counters {
    validations_executed: AtomicU64,
    total_duration_nanos: AtomicU64,
    valid_count: AtomicU64,
}

/// A compiled [`ValidationPlan`] bound to a [`ProfileResolver`] and whatever
/// optional services the caller has wired up. Cheap to clone the `Arc`s out
/// of, expensive to construct (compiles the plan) — build once, validate
/// many times (§3, §6 "Reusable validator").
pub struct Validator {
    plan: ValidationPlan,
    type_resolver: Arc<TypeResolver>,
    terminology: Option<Arc<dyn TerminologyService>>,
    reference_resolver: Option<Arc<dyn ReferenceResolver>>,
    fhirpath: Option<Arc<dyn FhirPathEvaluator>>,
    settings: RuntimeSettings,
    counters: Counters,
}

impl Validator {
    pub fn new(config: ValidatorConfig, profile_resolver: Arc<dyn ProfileResolver>) -> Result<Self, ConfigError> {
        let plan = config.compile()?;
        let settings = RuntimeSettings {
            reference_mode: config.reference.mode,
            terminology_display_as_warning: config.terminology.display_as_warning,
            best_practice: config.constraints.best_practice,
            constraints_mode: config.constraints.mode,
            suppressed_constraints: config.constraints.suppress.clone(),
            allow_modifier_extensions: config.schema.allow_modifier_extensions,
        };
        Ok(Self {
            plan,
            type_resolver: Arc::new(TypeResolver::new(profile_resolver)),
            terminology: None,
            reference_resolver: None,
            fhirpath: None,
            settings,
            counters: Counters::default(),
        })
    }

    pub fn set_profile_resolver(&mut self, resolver: Arc<dyn ProfileResolver>) -> &mut Self {
        self.type_resolver = Arc::new(TypeResolver::new(resolver));
        self
    }

    pub fn set_terminology_service(&mut self, service: Arc<dyn TerminologyService>) -> &mut Self {
        self.terminology = Some(service);
        self
    }

    pub fn set_reference_resolver(&mut self, resolver: Arc<dyn ReferenceResolver>) -> &mut Self {
        self.reference_resolver = Some(resolver);
        self
    }

    pub fn set_fhirpath_evaluator(&mut self, evaluator: Arc<dyn FhirPathEvaluator>) -> &mut Self {
        self.fhirpath = Some(evaluator);
        self
    }

    pub fn plan(&self) -> &ValidationPlan {
        &self.plan
    }

    pub fn validations_executed(&self) -> u64 {
        self.counters.validations_executed.load(Ordering::Relaxed)
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_nanos(self.counters.total_duration_nanos.load(Ordering::Relaxed))
    }

    pub fn valid_count(&self) -> u64 {
        self.counters.valid_count.load(Ordering::Relaxed)
    }

    /// `Validate(ctx, bytes)` (§6): parses JSON, runs the pipeline. Parse
    /// failure is reported as a single `structure` issue, never as an `Err`
    /// (§7 "the engine never throws").
    pub fn validate(&self, ctx: &CancellationToken, bytes: &[u8]) -> ValidationOutcome {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(resource) => self.validate_value(ctx, resource, None),
            Err(e) => self.invalid_json_outcome(e),
        }
    }

    /// `ValidateMap(ctx, map)` (§6): skips JSON parsing entirely.
    pub fn validate_map(&self, ctx: &CancellationToken, resource: Value) -> ValidationOutcome {
        self.validate_value(ctx, resource, None)
    }

    /// `ValidateWithProfiles(ctx, bytes, profileUrls…)` (§6): validates
    /// against `profile_urls` instead of whatever `meta.profile` declares.
    pub fn validate_with_profiles(&self, ctx: &CancellationToken, bytes: &[u8], profile_urls: &[String]) -> ValidationOutcome {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(resource) => self.validate_value(ctx, resource, Some(profile_urls.to_vec())),
            Err(e) => self.invalid_json_outcome(e),
        }
    }

    /// `QuickValidate(ctx, bytes)` (§6): structure-only, no profile
    /// resolution or pipeline execution — just `resourceType` presence and
    /// `id` format.
    pub fn quick_validate(&self, _ctx: &CancellationToken, bytes: &[u8]) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::new();
        let resource: Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                outcome.push(ValidationIssue::error("structure", IssueCode::Structure, "", format!("Invalid JSON: {e}")));
                return outcome;
            }
        };
        if resource.get("resourceType").and_then(Value::as_str).is_none() {
            outcome.push(ValidationIssue::error(
                "structure",
                IssueCode::Structure,
                "",
                "Resource must have a 'resourceType' element",
            ));
            return outcome;
        }
        if let Some(id) = resource.get("id").and_then(Value::as_str) {
            if !id_regex().is_match(id) {
                outcome.push(ValidationIssue::error("structure", IssueCode::Value, "id", format!("Invalid id format: '{id}'")));
            }
        }
        outcome
    }

    /// `ValidateBatch(ctx, bytes[])` (§6): index-preserving parallel
    /// execution over a bounded worker pool (§5 "worker pools").
    pub fn validate_batch(&self, ctx: &CancellationToken, resources: &[Vec<u8>]) -> Vec<ValidationOutcome> {
        if resources.is_empty() {
            return Vec::new();
        }
        let slots: Mutex<Vec<Option<ValidationOutcome>>> = Mutex::new((0..resources.len()).map(|_| None).collect());
        let next = AtomicUsize::new(0);
        let worker_count = self.plan.worker_count.max(1).min(resources.len());
        tracing::debug!(batch_size = resources.len(), worker_count, "starting batch validation");

        thread::scope(|scope| {
            for _ in 0..worker_count {
                let slots = &slots;
                let next = &next;
                scope.spawn(move || loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= resources.len() {
                        break;
                    }
                    if ctx.is_cancelled() {
                        break;
                    }
                    let outcome = self.validate(ctx, &resources[i]);
                    slots.lock().unwrap()[i] = Some(outcome);
                });
            }
        });

        slots
            .into_inner()
            .unwrap()
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    let mut outcome = ValidationOutcome::new();
                    outcome.push(ValidationIssue::processing_warning("batch", "", "validation cancelled before this entry ran"));
                    outcome
                })
            })
            .collect()
    }

    fn invalid_json_outcome(&self, err: serde_json::Error) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::new();
        outcome.push(ValidationIssue::error("structure", IssueCode::Structure, "", format!("Invalid JSON: {err}")));
        outcome
    }

    fn validate_value(&self, ctx: &CancellationToken, resource: Value, profile_override: Option<Vec<String>>) -> ValidationOutcome {
        let started = Instant::now();
        let resource_type = resource.get("resourceType").and_then(Value::as_str).unwrap_or("<unknown>").to_string();
        let outcome = match self.build_context(ctx, resource, profile_override) {
            Ok(pctx) => {
                self.execute(&pctx);
                pctx.into_outcome()
            }
            Err(issue) => {
                let mut outcome = ValidationOutcome::new();
                outcome.push(issue);
                outcome
            }
        };
        tracing::debug!(
            resource_type = %resource_type,
            valid = outcome.valid,
            issue_count = outcome.issues.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "validation run completed"
        );
        self.record(started, &outcome);
        outcome
    }

    fn build_context(
        &self,
        ctx: &CancellationToken,
        resource: Value,
        profile_override: Option<Vec<String>>,
    ) -> Result<PipelineContext, ValidationIssue> {
        let Some(resource_type) = resource.get("resourceType").and_then(Value::as_str).map(str::to_string) else {
            return Err(ValidationIssue::error("structure", IssueCode::Structure, "", "Resource must have a 'resourceType' element"));
        };

        let declared_profiles = profile_override.unwrap_or_else(|| {
            resource
                .get("meta")
                .and_then(|m| m.get("profile"))
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default()
        });

        let root_sd = declared_profiles
            .first()
            .and_then(|url| self.type_resolver.resolve_by_url(ctx, url))
            .or_else(|| self.type_resolver.resolve_by_type(ctx, &resource_type));
        let root_index = root_sd.as_ref().map(|sd| self.type_resolver.index_for(sd));

        Ok(PipelineContext {
            resource_type,
            resource: Arc::new(resource),
            declared_profiles,
            root_sd,
            root_index,
            result: Mutex::new(ValidationOutcome::new()),
            type_resolver: self.type_resolver.clone(),
            cancel: ctx.clone(),
            terminology: self.terminology.clone(),
            reference_resolver: self.reference_resolver.clone(),
            fhirpath: self.fhirpath.clone(),
            settings: self.settings.clone(),
        })
    }

    fn record(&self, started: Instant, outcome: &ValidationOutcome) {
        self.counters.validations_executed.fetch_add(1, Ordering::Relaxed);
        self.counters.total_duration_nanos.fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        if outcome.valid {
            self.counters.valid_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// §4.2 Execution: priority classes run strictly First → Early → Normal
    /// → Late; each class's phases run sequentially or (when every phase in
    /// the class allows it) concurrently.
    fn execute(&self, pctx: &PipelineContext) {
        for class in PriorityClass::ALL {
            if pctx.cancel.is_cancelled() {
                break;
            }
            let (issues, required_failed) = self.run_class(pctx, class);
            pctx.append(issues);
            if required_failed {
                break;
            }
            if self.plan.max_errors > 0 && pctx.error_count() >= self.plan.max_errors {
                break;
            }
        }
    }

    fn run_class(&self, pctx: &PipelineContext, class: PriorityClass) -> (Vec<ValidationIssue>, bool) {
        let phases = self.plan.phases_in(class);
        if phases.is_empty() {
            return (Vec::new(), false);
        }

        let run_concurrently = self.plan.parallel_phases && phases.iter().all(|p| p.parallel());
        let outcomes: Vec<(Vec<ValidationIssue>, bool)> = if run_concurrently {
            let slots: Mutex<Vec<Option<(Vec<ValidationIssue>, bool)>>> = Mutex::new((0..phases.len()).map(|_| None).collect());
            thread::scope(|scope| {
                for (i, phase) in phases.iter().enumerate() {
                    let slots = &slots;
                    scope.spawn(move || {
                        let result = run_phase_with_timeout(phase.as_ref(), pctx, self.plan.phase_timeout);
                        slots.lock().unwrap()[i] = Some(result);
                    });
                }
            });
            slots.into_inner().unwrap().into_iter().map(|s| s.unwrap_or_default()).collect()
        } else {
            let mut outcomes = Vec::with_capacity(phases.len());
            for phase in &phases {
                if pctx.cancel.is_cancelled() {
                    break;
                }
                outcomes.push(run_phase_with_timeout(phase.as_ref(), pctx, self.plan.phase_timeout));
            }
            outcomes
        };

        let mut issues = Vec::new();
        let mut required_failed = false;
        for (phase, (phase_issues, timed_out)) in phases.iter().zip(outcomes) {
            if timed_out && phase.required() {
                required_failed = true;
            }
            issues.extend(phase_issues);
        }
        (issues, required_failed)
    }
}

/// Runs one phase with a deadline. On timeout the phase's contribution is
/// discarded and replaced with a single processing warning; the shared
/// cancellation signal is also tripped so the still-running phase winds
/// down at its next suspension point (§5). This is a best-effort timeout,
/// not a preemptive kill: a phase ignoring its cancellation checks keeps
/// running on its own thread past the deadline, it just no longer holds up
/// the caller.
fn run_phase_with_timeout(phase: &dyn Phase, pctx: &PipelineContext, timeout: Duration) -> (Vec<ValidationIssue>, bool) {
    if timeout.is_zero() {
        return (phase.run(pctx), false);
    }

    let (tx, rx) = std::sync::mpsc::channel();
    let timed_out = thread::scope(|scope| {
        scope.spawn(|| {
            let issues = phase.run(pctx);
            let _ = tx.send(issues);
        });
        rx.recv_timeout(timeout).is_err()
    });

    if timed_out {
        pctx.cancel.cancel();
        tracing::warn!(phase = phase.name(), timeout_ms = timeout.as_millis() as u64, "phase timed out, cancelling the run");
        let warning = ValidationIssue::processing_warning(
            phase.name(),
            "",
            format!("phase '{}' exceeded its {:?} timeout", phase.name(), timeout),
        );
        (vec![warning], true)
    } else {
        (rx.try_recv().unwrap_or_default(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;
    use crate::model::{ElementDefinition, StructureDefinition, StructureDefinitionKind};
    use crate::test_support::StaticProfileResolver;
    use serde_json::json;

    fn patient_sd() -> StructureDefinition {
        let mut sd = StructureDefinition::new("http://hl7.org/fhir/StructureDefinition/Patient", "Patient", StructureDefinitionKind::Resource);
        let mut active = ElementDefinition::new("Patient.active", "Patient.active");
        active.types = vec![crate::model::TypeRef::new("boolean")];
        sd.snapshot = vec![ElementDefinition::new("Patient", "Patient"), active];
        sd
    }

    fn validator_with(sds: Vec<StructureDefinition>) -> Validator {
        let resolver = Arc::new(StaticProfileResolver::from_sds(sds));
        Validator::new(ValidatorConfig::preset(Preset::Server), resolver).unwrap()
    }

    #[test]
    fn invalid_json_yields_one_structure_error() {
        let validator = validator_with(vec![]);
        let ctx = CancellationToken::new();
        let outcome = validator.validate(&ctx, b"not json");
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].code, IssueCode::Structure);
        assert!(outcome.issues[0].diagnostics.starts_with("Invalid JSON"));
    }

    #[test]
    fn missing_resource_type_yields_one_structure_error() {
        let validator = validator_with(vec![]);
        let ctx = CancellationToken::new();
        let outcome = validator.validate(&ctx, br#"{"id":"123"}"#);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].diagnostics, "Resource must have a 'resourceType' element");
    }

    #[test]
    fn quick_validate_rejects_bad_id_format() {
        let validator = validator_with(vec![]);
        let ctx = CancellationToken::new();
        let outcome = validator.quick_validate(&ctx, br#"{"resourceType":"Patient","id":"has spaces"}"#);
        assert!(outcome.issues.iter().any(|i| i.diagnostics.contains("Invalid id format")));
    }

    #[test]
    fn quick_validate_accepts_minimal_resource() {
        let validator = validator_with(vec![]);
        let ctx = CancellationToken::new();
        let outcome = validator.quick_validate(&ctx, br#"{"resourceType":"Patient","id":"x"}"#);
        assert!(outcome.valid);
    }

    #[test]
    fn validate_runs_structure_phase_against_resolved_sd() {
        let validator = validator_with(vec![patient_sd()]);
        let ctx = CancellationToken::new();
        let outcome = validator.validate_map(&ctx, json!({"resourceType": "Patient", "active": "yes"}));
        assert!(outcome.issues.iter().any(|i| i.code == IssueCode::Value));
        assert_eq!(validator.validations_executed(), 1);
    }

    #[test]
    fn validate_batch_preserves_index_order() {
        let validator = validator_with(vec![patient_sd()]);
        let ctx = CancellationToken::new();
        let resources = vec![
            br#"{"resourceType":"Patient","active":true}"#.to_vec(),
            br#"{"id":"123"}"#.to_vec(),
            br#"not json"#.to_vec(),
        ];
        let outcomes = validator.validate_batch(&ctx, &resources);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].valid);
        assert!(!outcomes[1].valid);
        assert!(outcomes[2].issues[0].diagnostics.starts_with("Invalid JSON"));
    }
}
