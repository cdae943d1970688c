//! Phase: Cardinality (§4.5).

use crate::context::PipelineContext;
use crate::issue::{IssueCode, ValidationIssue};
use crate::model::element_definition::UNBOUNDED;
use crate::model::ElementDefinition;
use crate::plan::PriorityClass;

use super::{relative_segments, values_at_path, Phase};

pub struct CardinalityPhase;

impl Phase for CardinalityPhase {
    fn name(&self) -> &'static str {
        "cardinality"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Early
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let Some(root_sd) = pctx.root_sd.clone() else { return issues };
        let index = pctx.type_resolver.index_for(&root_sd);

        for ed in &index.elements {
            if ed.is_slice() || ed.path == root_sd.type_name {
                continue;
            }
            let parent_missing_and_optional = ed
                .parent_path()
                .and_then(|p| index.get(p))
                .is_some_and(|parent| parent.min == 0 && count_presence(pctx, parent, &index) == 0);
            if parent_missing_and_optional {
                continue;
            }

            let count = count_presence(pctx, ed, &index);

            if ed.min > 0 && (count as u32) < ed.min {
                issues.push(ValidationIssue::error(
                    self.name(),
                    IssueCode::Required,
                    ed.path.clone(),
                    format!("Element '{}' requires at least {} occurrence(s), found {count}", ed.path, ed.min),
                ));
            }

            let max = ed.max_value();
            if max != UNBOUNDED && max != 1 && (count as i64) > max {
                issues.push(ValidationIssue::error(
                    self.name(),
                    IssueCode::Value,
                    ed.path.clone(),
                    format!("Element '{}' allows at most {max} occurrence(s), found {count}", ed.path),
                ));
            }
            if max == 1 && is_array_at(pctx, ed) {
                issues.push(ValidationIssue::error(
                    self.name(),
                    IssueCode::Structure,
                    ed.path.clone(),
                    format!("Element '{}' is declared 0..1/1..1 but the resource has an array", ed.path),
                ));
            }
        }

        issues
    }
}

/// Counts occurrences of `ed` in the resource, handling choice-type EDs
/// (`value[x]`) by summing every concrete variant actually present.
fn count_presence(pctx: &PipelineContext, ed: &ElementDefinition, index: &crate::model::ElementIndex) -> usize {
    if ed.is_choice_type() {
        return count_choice_presence(pctx, ed, index);
    }
    let segments = relative_segments(&ed.path, &pctx.resource_type);
    values_at_path(&pctx.resource, &segments).into_iter().filter(|v| !v.is_null()).count()
}

fn count_choice_presence(pctx: &PipelineContext, ed: &ElementDefinition, _index: &crate::model::ElementIndex) -> usize {
    let Some(parent_path) = ed.parent_path() else { return 0 };
    let base_name = ed.last_segment().trim_end_matches("[x]");
    let parent_segments = relative_segments(parent_path, &pctx.resource_type);
    let parents = values_at_path(&pctx.resource, &parent_segments);

    parents
        .into_iter()
        .filter(|parent| {
            let serde_json::Value::Object(map) = parent else { return false };
            map.keys().any(|k| {
                k.strip_prefix(base_name).is_some_and(|rest| crate::types::choice_suffix(rest).is_some())
            })
        })
        .count()
}

fn is_array_at(pctx: &PipelineContext, ed: &ElementDefinition) -> bool {
    let Some(parent_path) = ed.parent_path() else { return false };
    let parent_segments = relative_segments(parent_path, &pctx.resource_type);
    let parents = values_at_path(&pctx.resource, &parent_segments);
    let key = ed.last_segment();
    parents.into_iter().any(|parent| matches!(parent.get(key), Some(serde_json::Value::Array(_))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::context::TypeResolver;
    use crate::model::{StructureDefinition, StructureDefinitionKind, TypeRef};
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

    fn sd_with(required_gender: bool, max_given: &str) -> StructureDefinition {
        let mut sd = StructureDefinition::new(
            "http://hl7.org/fhir/StructureDefinition/Patient",
            "Patient",
            StructureDefinitionKind::Resource,
        );
        let mut gender = ElementDefinition::new("Patient.gender", "Patient.gender");
        gender.min = if required_gender { 1 } else { 0 };
        gender.types = vec![TypeRef::new("code")];
        let mut given = ElementDefinition::new("Patient.name.given", "Patient.name.given");
        given.max = max_given.to_string();
        given.types = vec![TypeRef::new("string")];
        sd.snapshot = vec![
            ElementDefinition::new("Patient", "Patient"),
            gender,
            ElementDefinition::new("Patient.name", "Patient.name"),
            given,
        ];
        sd
    }

    #[test]
    fn flags_missing_required_element() {
        let sd = sd_with(true, "*");
        let pctx = ctx_for(json!({"resourceType": "Patient"}), sd);
        let issues = CardinalityPhase.run(&pctx);
        assert!(issues.iter().any(|i| i.code == IssueCode::Required && i.expression[0] == "Patient.gender"));
    }

    #[test]
    fn flags_array_exceeding_max() {
        let sd = sd_with(false, "1");
        let pctx = ctx_for(json!({"resourceType": "Patient", "name": {"given": ["A", "B"]}}), sd);
        let issues = CardinalityPhase.run(&pctx);
        assert!(issues.iter().any(|i| i.code == IssueCode::Structure && i.expression[0] == "Patient.name.given"));
    }

    #[test]
    fn accepts_value_within_bounds() {
        let sd = sd_with(true, "*");
        let pctx = ctx_for(json!({"resourceType": "Patient", "gender": "female"}), sd);
        let issues = CardinalityPhase.run(&pctx);
        assert!(issues.is_empty());
    }
}
