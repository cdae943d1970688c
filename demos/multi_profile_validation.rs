//! Profile resolution order: an explicit profile override beats
//! `meta.profile`, which in turn beats falling back to the base
//! `resourceType` profile.

use std::sync::Arc;

use fhir_validator_core::cancel::CancellationToken;
use fhir_validator_core::config::{Preset, ValidatorConfig};
use fhir_validator_core::interfaces::ProfileResolver;
use fhir_validator_core::model::{ElementDefinition, StructureDefinition, StructureDefinitionKind, TypeRef};
use fhir_validator_core::validator::Validator;
use serde_json::{json, Value};

const BASE_PATIENT: &str = "http://hl7.org/fhir/StructureDefinition/Patient";
const US_CORE_PATIENT: &str = "http://example.org/fhir/StructureDefinition/USCorePatient";

struct TwoProfileResolver {
    base: StructureDefinition,
    us_core: StructureDefinition,
}

impl ProfileResolver for TwoProfileResolver {
    fn fetch_structure_definition(&self, _ctx: &CancellationToken, url: &str) -> Option<StructureDefinition> {
        match url {
            BASE_PATIENT => Some(self.base.clone()),
            US_CORE_PATIENT => Some(self.us_core.clone()),
            _ => None,
        }
    }

    fn fetch_structure_definition_by_type(&self, _ctx: &CancellationToken, type_name: &str) -> Option<StructureDefinition> {
        (type_name == "Patient").then(|| self.base.clone())
    }
}

fn base_patient_sd() -> StructureDefinition {
    let mut sd = StructureDefinition::new(BASE_PATIENT, "Patient", StructureDefinitionKind::Resource);
    let mut name = ElementDefinition::new("Patient.name", "Patient.name");
    name.types = vec![TypeRef::new("HumanName")];
    sd.snapshot = vec![ElementDefinition::new("Patient", "Patient"), name];
    sd
}

fn us_core_patient_sd() -> StructureDefinition {
    let mut sd = StructureDefinition::new(US_CORE_PATIENT, "Patient", StructureDefinitionKind::Resource);
    let mut name = ElementDefinition::new("Patient.name", "Patient.name");
    name.types = vec![TypeRef::new("HumanName")];
    name.min = 1;
    sd.snapshot = vec![ElementDefinition::new("Patient", "Patient"), name];
    sd
}

fn print_outcome(label: &str, outcome: &fhir_validator_core::ValidationOutcome) {
    println!("  {label}: valid={} issues={}", outcome.valid, outcome.issues.len());
    for issue in &outcome.issues {
        println!("    [{}] {} - {}", issue.severity, issue.code, issue.diagnostics);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let resolver = Arc::new(TwoProfileResolver { base: base_patient_sd(), us_core: us_core_patient_sd() });
    let validator = Validator::new(ValidatorConfig::preset(Preset::Server), resolver)?;
    let ctx = CancellationToken::new();

    println!("=== 1. Explicit profile override ===");
    let patient: Value = json!({"resourceType": "Patient", "id": "example"});
    let outcome = validator.validate_with_profiles(&ctx, patient.to_string().as_bytes(), &[US_CORE_PATIENT.to_string()]);
    print_outcome("against US Core (requires name)", &outcome);

    println!("\n=== 2. meta.profile on the resource ===");
    let with_profile: Value = json!({
        "resourceType": "Patient",
        "id": "example",
        "meta": {"profile": [US_CORE_PATIENT]}
    });
    let outcome = validator.validate_map(&ctx, with_profile);
    print_outcome("meta.profile declares US Core", &outcome);

    println!("\n=== 3. Base profile fallback ===");
    let plain: Value = json!({"resourceType": "Patient", "id": "example"});
    let outcome = validator.validate_map(&ctx, plain);
    print_outcome("no declared profile, falls back to base Patient", &outcome);

    Ok(())
}
