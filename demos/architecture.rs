//! Three-phase shape of the engine: declarative configuration, a compiled
//! plan, and a reusable [`Validator`] that runs it statelessly, once per
//! resource or in a batch.

use std::sync::Arc;

use fhir_validator_core::cancel::CancellationToken;
use fhir_validator_core::config::{Preset, TerminologyMode, ValidatorConfig};
use fhir_validator_core::interfaces::ProfileResolver;
use fhir_validator_core::model::StructureDefinition;
use fhir_validator_core::validator::Validator;
use serde_json::json;

/// A profile resolver with no registered StructureDefinitions at all;
/// every lookup reports "not found", which is enough to exercise the
/// pipeline's own shape without needing a package cache.
struct EmptyResolver;

impl ProfileResolver for EmptyResolver {
    fn fetch_structure_definition(&self, _ctx: &CancellationToken, _url: &str) -> Option<StructureDefinition> {
        None
    }

    fn fetch_structure_definition_by_type(&self, _ctx: &CancellationToken, _type_name: &str) -> Option<StructureDefinition> {
        None
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Phase 1: Configuration ===");
    let config = ValidatorConfig::builder().preset(Preset::Server).terminology_mode(TerminologyMode::Local).build();
    println!("config built from the Server preset, terminology mode = Local\n");

    println!("=== Phase 2: Compilation ===");
    let plan = config.compile()?;
    println!("plan compiled with {} phases, max_errors={}\n", plan.phases.len(), plan.max_errors);

    println!("=== Phase 3: Execution ===");
    let validator = Validator::new(config, Arc::new(EmptyResolver))?;
    println!("validator created once, reused below\n");

    let ctx = CancellationToken::new();
    let patient = json!({"resourceType": "Patient", "name": [{"family": "Smith"}]});
    let observation = json!({"resourceType": "Observation", "status": "final"});

    let outcome1 = validator.validate_map(&ctx, patient.clone());
    println!("Patient: valid={} issues={}", outcome1.valid, outcome1.issues.len());

    let outcome2 = validator.validate_map(&ctx, observation.clone());
    println!("Observation: valid={} issues={}", outcome2.valid, outcome2.issues.len());

    println!("\n=== Batch validation ===");
    let resources = vec![patient.to_string().into_bytes(), observation.to_string().into_bytes()];
    let outcomes = validator.validate_batch(&ctx, &resources);
    println!("validated {} resources, {} executed so far on this validator", outcomes.len(), validator.validations_executed());

    Ok(())
}
