//! Phase: Structure (§4.3).

use serde_json::{Number, Value};

use crate::context::PipelineContext;
use crate::issue::{IssueCode, ValidationIssue};
use crate::model::ElementDefinition;
use crate::plan::PriorityClass;
use crate::walker;

use super::Phase;

pub struct StructurePhase;

impl Phase for StructurePhase {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::First
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let Some(root_sd) = pctx.root_sd.clone() else {
            issues.push(ValidationIssue::warning(
                self.name(),
                IssueCode::NotFound,
                "",
                format!("No StructureDefinition found for resource type '{}'", pctx.resource_type),
            ));
            return issues;
        };

        walker::walk(&pctx.resource, &root_sd, &pctx.type_resolver, &pctx.cancel, &mut |wc| {
            if pctx.cancel.is_cancelled() || wc.is_array {
                return;
            }
            let Some(ed) = &wc.element else { return };
            if !runtime_type_compatible(wc.value, ed, wc.concrete_type.as_deref()) {
                issues.push(ValidationIssue::error(
                    self.name(),
                    IssueCode::Value,
                    wc.path.clone(),
                    format!(
                        "Value at '{}' has a runtime type incompatible with declared type(s) {:?}",
                        wc.path,
                        ed.type_codes()
                    ),
                ));
            }
        });

        issues
    }
}

fn runtime_type_compatible(value: &Value, ed: &ElementDefinition, concrete_type: Option<&str>) -> bool {
    let codes = ed.type_codes();
    let types: Vec<&str> = match concrete_type {
        Some(ct) => vec![ct],
        None => codes,
    };
    if types.is_empty() {
        return true;
    }
    match value {
        Value::Null => true,
        Value::Bool(_) => types.contains(&"boolean"),
        Value::Number(n) => types.iter().any(|t| number_compatible(n, t)),
        Value::String(_) => types.iter().any(|t| string_compatible(t)),
        Value::Object(_) => types.iter().any(|t| object_compatible(t)),
        Value::Array(_) => true,
    }
}

fn number_compatible(n: &Number, type_code: &str) -> bool {
    match type_code {
        "integer" | "unsignedInt" | "positiveInt" | "integer64" => {
            n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "decimal" => true,
        _ => false,
    }
}

fn string_compatible(type_code: &str) -> bool {
    matches!(
        type_code,
        "string" | "markdown" | "uri" | "url" | "canonical" | "code" | "id" | "oid" | "uuid" | "base64Binary" | "xhtml"
            | "date" | "dateTime" | "time" | "instant"
    )
}

fn object_compatible(type_code: &str) -> bool {
    !crate::types::is_primitive_type(type_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StructureDefinition, StructureDefinitionKind, TypeRef};
    use crate::test_support::StaticProfileResolver;
    use crate::context::TypeResolver;
    use crate::cancel::CancellationToken;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn ctx_for(resource: Value, sd: StructureDefinition) -> PipelineContext {
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

    #[test]
    fn flags_boolean_field_holding_a_string() {
        let mut sd = StructureDefinition::new("http://hl7.org/fhir/StructureDefinition/Patient", "Patient", StructureDefinitionKind::Resource);
        let mut active = crate::model::ElementDefinition::new("Patient.active", "Patient.active");
        active.types = vec![TypeRef::new("boolean")];
        sd.snapshot = vec![crate::model::ElementDefinition::new("Patient", "Patient"), active];

        let pctx = ctx_for(json!({"resourceType": "Patient", "active": "yes"}), sd);
        let issues = StructurePhase.run(&pctx);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::Value);
    }

    #[test]
    fn accepts_matching_boolean() {
        let mut sd = StructureDefinition::new("http://hl7.org/fhir/StructureDefinition/Patient", "Patient", StructureDefinitionKind::Resource);
        let mut active = crate::model::ElementDefinition::new("Patient.active", "Patient.active");
        active.types = vec![TypeRef::new("boolean")];
        sd.snapshot = vec![crate::model::ElementDefinition::new("Patient", "Patient"), active];

        let pctx = ctx_for(json!({"resourceType": "Patient", "active": true}), sd);
        let issues = StructurePhase.run(&pctx);
        assert!(issues.is_empty());
    }
}
