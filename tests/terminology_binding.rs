mod support;

use std::sync::Arc;

use fhir_validator_core::cancel::CancellationToken;
use fhir_validator_core::config::{Preset, ValidatorConfig};
use fhir_validator_core::issue::{IssueCode, IssueSeverity};
use fhir_validator_core::model::{Binding, BindingStrength, ElementDefinition, StructureDefinition, StructureDefinitionKind};
use fhir_validator_core::validator::Validator;
use serde_json::json;
use support::{MapTerminology, StaticProfileResolver};

fn observation_sd() -> StructureDefinition {
    let mut sd =
        StructureDefinition::new("http://hl7.org/fhir/StructureDefinition/Observation", "Observation", StructureDefinitionKind::Resource);
    let mut status = ElementDefinition::new("Observation.status", "Observation.status");
    status.binding = Some(Binding {
        strength: BindingStrength::Required,
        value_set: Some("http://hl7.org/fhir/ValueSet/observation-status".to_string()),
    });
    sd.snapshot = vec![ElementDefinition::new("Observation", "Observation"), status];
    sd
}

fn validator_with_terminology() -> Validator {
    let resolver = Arc::new(StaticProfileResolver::from_sds(vec![observation_sd()]));
    let mut validator = Validator::new(ValidatorConfig::preset(Preset::Server), resolver).unwrap();
    let mut terminology = MapTerminology::new();
    terminology.set("http://hl7.org/fhir/ValueSet/observation-status", "final", Some("Final"));
    validator.set_terminology_service(Arc::new(terminology));
    validator
}

#[test]
fn known_code_against_required_binding_is_clean() {
    let validator = validator_with_terminology();
    let ctx = CancellationToken::new();
    let outcome = validator.validate_map(&ctx, json!({"resourceType": "Observation", "status": "final"}));
    assert!(outcome.valid, "{:?}", outcome.issues);
}

#[test]
fn unknown_code_against_required_binding_is_an_error() {
    let validator = validator_with_terminology();
    let ctx = CancellationToken::new();
    let outcome = validator.validate_map(&ctx, json!({"resourceType": "Observation", "status": "bogus"}));
    assert!(!outcome.valid);
    assert!(outcome.issues.iter().any(|i| i.code == IssueCode::CodeInvalid && i.severity == IssueSeverity::Error));
}

#[test]
fn no_terminology_service_registered_is_a_warning_not_an_error() {
    let resolver = Arc::new(StaticProfileResolver::from_sds(vec![observation_sd()]));
    let validator = Validator::new(ValidatorConfig::preset(Preset::Server), resolver).unwrap();
    let ctx = CancellationToken::new();
    let outcome = validator.validate_map(&ctx, json!({"resourceType": "Observation", "status": "final"}));
    assert!(outcome.valid, "{:?}", outcome.issues);
    assert!(outcome.issues.iter().any(|i| i.code == IssueCode::NotSupported));
}
