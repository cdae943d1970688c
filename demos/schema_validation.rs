//! Schema-only validation: structure, primitive types, and cardinality,
//! with terminology, references, and slicing all switched off.

use std::sync::Arc;

use fhir_validator_core::cancel::CancellationToken;
use fhir_validator_core::config::{TerminologyMode, ValidatorConfig};
use fhir_validator_core::context::{ConstraintsMode, ReferenceMode};
use fhir_validator_core::interfaces::ProfileResolver;
use fhir_validator_core::model::{ElementDefinition, StructureDefinition, StructureDefinitionKind, TypeRef};
use fhir_validator_core::validator::Validator;
use serde_json::{json, Value};

struct OneResourceResolver(StructureDefinition);

impl ProfileResolver for OneResourceResolver {
    fn fetch_structure_definition(&self, _ctx: &CancellationToken, url: &str) -> Option<StructureDefinition> {
        (url == self.0.url).then(|| self.0.clone())
    }

    fn fetch_structure_definition_by_type(&self, _ctx: &CancellationToken, type_name: &str) -> Option<StructureDefinition> {
        (type_name == self.0.type_name).then(|| self.0.clone())
    }
}

fn patient_sd() -> StructureDefinition {
    let mut sd = StructureDefinition::new("http://hl7.org/fhir/StructureDefinition/Patient", "Patient", StructureDefinitionKind::Resource);
    let mut name = ElementDefinition::new("Patient.name", "Patient.name");
    name.types = vec![TypeRef::new("HumanName")];
    sd.snapshot = vec![ElementDefinition::new("Patient", "Patient"), name];
    sd
}

fn print_outcome(outcome: &fhir_validator_core::ValidationOutcome) {
    println!("  result: {}", if outcome.valid { "VALID" } else { "INVALID" });
    for (i, issue) in outcome.issues.iter().enumerate() {
        println!("    {}. [{}] {} - {}", i + 1, issue.severity, issue.code, issue.diagnostics);
        if let Some(loc) = &issue.location {
            println!("       at {loc}");
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Schema Validation Demo ===\n");

    let config = ValidatorConfig::builder()
        .schema_mode(true)
        .constraints_mode(ConstraintsMode::Off)
        .terminology_mode(TerminologyMode::Off)
        .reference_mode(ReferenceMode::Off)
        .build();
    let plan = config.compile()?;
    println!("plan runs {} phases (schema-focused)", plan.phases.len());

    let resolver = Arc::new(OneResourceResolver(patient_sd()));
    let validator = Validator::new(config, resolver)?;
    let ctx = CancellationToken::new();

    println!("\n1. Valid Patient resource:");
    let valid_patient: Value = json!({"resourceType": "Patient", "id": "example", "name": [{"family": "Smith", "given": ["John"]}]});
    print_outcome(&validator.validate_map(&ctx, valid_patient));

    println!("\n2. Missing resourceType:");
    let no_type: Value = json!({"id": "example", "name": [{"family": "Smith"}]});
    print_outcome(&validator.validate_map(&ctx, no_type));

    println!("\n3. Modifier extension, disallowed by default:");
    let with_modifier: Value = json!({
        "resourceType": "Patient",
        "id": "example",
        "modifierExtension": [{"url": "http://example.org/extension", "valueString": "test"}]
    });

    let strict_config = ValidatorConfig::builder().schema_mode(true).allow_modifier_extensions(false).build();
    let strict_validator = Validator::new(strict_config, Arc::new(OneResourceResolver(patient_sd())))?;
    print_outcome(&strict_validator.validate_map(&ctx, with_modifier));

    Ok(())
}
