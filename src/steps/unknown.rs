//! Phase: Unknown Elements (§4.6).

use crate::context::PipelineContext;
use crate::issue::{IssueCode, ValidationIssue};
use crate::plan::PriorityClass;
use crate::types::is_ubiquitous_metadata_key;
use crate::walker;

use super::Phase;

pub struct UnknownElementsPhase;

impl Phase for UnknownElementsPhase {
    fn name(&self) -> &'static str {
        "unknown"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Early
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let Some(root_sd) = pctx.root_sd.clone() else { return issues };

        walker::walk(&pctx.resource, &root_sd, &pctx.type_resolver, &pctx.cancel, &mut |wc| {
            if pctx.cancel.is_cancelled() || wc.is_array_item {
                return;
            }
            if wc.element.is_some() || wc.is_choice_type {
                return;
            }
            if is_ignorable_key(&wc.key) {
                return;
            }
            issues.push(ValidationIssue::error(
                self.name(),
                IssueCode::Structure,
                wc.path.clone(),
                format!("Element '{}' is not declared by the active profile", wc.path),
            ));
        });

        issues
    }
}

fn is_ignorable_key(key: &str) -> bool {
    key.starts_with('_')
        || key == "extension"
        || key == "modifierExtension"
        || is_ubiquitous_metadata_key(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::context::TypeResolver;
    use crate::model::{ElementDefinition, StructureDefinition, StructureDefinitionKind};
    use crate::test_support::StaticProfileResolver;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn ctx_for(resource: serde_json::Value, sd: StructureDefinition) -> PipelineContext {
        let resolver = Arc::new(StaticProfileResolver::from_sds(vec![sd.clone()]));
        PipelineContext {
            resource_type: sd.type_name.clone(),
            resource: Arc::new(resource),
            declared_profiles: vec![],
            root_sd: Some(Arc::new(sd)),
            root_index: None,
            result: Mutex::new(crate::issue::ValidationOutcome::new()),
            type_resolver: Arc::new(TypeResolver::new(resolver)),
            cancel: CancellationToken::new(),
            terminology: None,
            reference_resolver: None,
            fhirpath: None,
            settings: crate::context::RuntimeSettings::default(),
        }
    }

    fn patient_sd() -> StructureDefinition {
        let mut sd = StructureDefinition::new(
            "http://hl7.org/fhir/StructureDefinition/Patient",
            "Patient",
            StructureDefinitionKind::Resource,
        );
        sd.snapshot =
            vec![ElementDefinition::new("Patient", "Patient"), ElementDefinition::new("Patient.active", "Patient.active")];
        sd
    }

    #[test]
    fn flags_field_with_no_element_definition() {
        let pctx = ctx_for(json!({"resourceType": "Patient", "madeUpField": "x"}), patient_sd());
        let issues = UnknownElementsPhase.run(&pctx);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].expression[0], "Patient.madeUpField");
    }

    #[test]
    fn ignores_metadata_and_extension_keys() {
        let pctx = ctx_for(
            json!({"resourceType": "Patient", "id": "1", "meta": {}, "extension": [], "_active": {}}),
            patient_sd(),
        );
        let issues = UnknownElementsPhase.run(&pctx);
        assert!(issues.is_empty());
    }
}
