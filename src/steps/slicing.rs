//! Phase: Slicing (§4.12).

use serde_json::Value;

use crate::context::PipelineContext;
use crate::issue::{IssueCode, ValidationIssue};
use crate::model::element_definition::parse_max;
use crate::model::{Discriminator, DiscriminatorType, ElementDefinition, ElementIndex, SlicingRules};
use crate::plan::PriorityClass;

use super::{deep_equal, pattern_matches, relative_segments, values_at_path, Phase};

pub struct SlicingPhase;

impl Phase for SlicingPhase {
    fn name(&self) -> &'static str {
        "slicing"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Normal
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let Some(root_sd) = pctx.root_sd.clone() else { return issues };
        let index = pctx.type_resolver.index_for(&root_sd);

        let sliced_paths: Vec<&str> =
            index.elements.iter().filter(|e| e.slicing.is_some()).map(|e| e.path.as_str()).collect();

        for path in sliced_paths {
            if pctx.cancel.is_cancelled() {
                break;
            }
            let Some(base) = index.base_slicing_element(path) else { continue };
            let Some(slicing) = &base.slicing else { continue };
            let slices = index.named_slices(path);
            if slices.is_empty() {
                continue;
            }

            let segments = relative_segments(path, &pctx.resource_type);
            let array_value = parent_array_at(&pctx.resource, &segments);
            let Some(items) = array_value else { continue };

            issues.extend(validate_sliced_array(
                pctx,
                path,
                slicing.rules,
                slicing.ordered,
                &slicing.discriminator,
                &slices,
                items,
                &index,
            ));
        }

        issues
    }
}

fn parent_array_at<'a>(resource: &'a Value, segments: &[&str]) -> Option<&'a Vec<Value>> {
    let values = values_at_path(resource, segments);
    values.into_iter().find_map(|v| v.as_array())
}

#[allow(clippy::too_many_arguments)]
fn validate_sliced_array(
    pctx: &PipelineContext,
    path: &str,
    rules: SlicingRules,
    ordered: bool,
    discriminators: &[Discriminator],
    slices: &[&ElementDefinition],
    items: &[Value],
    index: &ElementIndex,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut matches: Vec<Option<usize>> = Vec::with_capacity(items.len());
    let mut counts = vec![0usize; slices.len()];

    for item in items {
        let matched = slices.iter().position(|slice| item_matches_slice(item, slice, discriminators));
        if let Some(idx) = matched {
            counts[idx] += 1;
            issues.extend(validate_slice_children(pctx, path, slices[idx], item, index));
        }
        matches.push(matched);
    }

    for (slice, count) in slices.iter().zip(&counts) {
        if *count < slice.min as usize {
            issues.push(ValidationIssue::error(
                "slicing",
                IssueCode::Value,
                path,
                format!("Slice '{}' requires at least {} occurrence(s), found {count}", slice_name(slice), slice.min),
            ));
        }
        let max = parse_max(&slice.max);
        if max != crate::model::UNBOUNDED && (*count as i64) > max {
            issues.push(ValidationIssue::error(
                "slicing",
                IssueCode::Value,
                path,
                format!("Slice '{}' allows at most {max} occurrence(s), found {count}", slice_name(slice)),
            ));
        }
    }

    match rules {
        SlicingRules::Closed => {
            let unmatched = matches.iter().filter(|m| m.is_none()).count();
            if unmatched > 0 {
                issues.push(ValidationIssue::error(
                    "slicing",
                    IssueCode::Value,
                    path,
                    format!("{unmatched} array item(s) did not match any defined slice under closed slicing"),
                ));
            }
        }
        SlicingRules::OpenAtEnd => {
            if let Some(first_unmatched) = matches.iter().position(|m| m.is_none()) {
                let out_of_order = matches[first_unmatched..].iter().any(|m| m.is_some());
                if out_of_order {
                    issues.push(ValidationIssue::error(
                        "slicing",
                        IssueCode::Value,
                        path,
                        "Matched slice items must all precede unmatched items under openAtEnd slicing",
                    ));
                }
            }
        }
        SlicingRules::Open => {}
    }

    if ordered {
        let matched_order: Vec<usize> = matches.iter().filter_map(|m| *m).collect();
        let sorted = is_non_decreasing(&matched_order);
        if !sorted {
            issues.push(ValidationIssue::error(
                "slicing",
                IssueCode::Structure,
                path,
                "Matched slice items must appear in declaration order (ordered slicing)",
            ));
        }
    }

    issues
}

fn is_non_decreasing(values: &[usize]) -> bool {
    values.windows(2).all(|w| w[0] <= w[1])
}

fn slice_name(ed: &ElementDefinition) -> &str {
    ed.slice_name.as_deref().unwrap_or("")
}

fn item_matches_slice(item: &Value, slice: &ElementDefinition, discriminators: &[Discriminator]) -> bool {
    if discriminators.is_empty() {
        return matches_by_fixed_or_pattern(item, slice);
    }
    discriminators.iter().all(|d| discriminator_matches(item, d, slice))
}

fn discriminator_matches(item: &Value, d: &Discriminator, slice: &ElementDefinition) -> bool {
    let segments: Vec<&str> = d.path.split('.').filter(|s| !s.is_empty()).collect();
    let projected = values_at_path(item, &segments);

    match d.kind {
        DiscriminatorType::Value => match &slice.fixed {
            Some(fixed) => {
                let expected = values_at_path(fixed, &segments);
                !projected.is_empty()
                    && projected.len() == expected.len()
                    && projected.iter().zip(&expected).all(|(a, b)| deep_equal(a, b))
            }
            None => false,
        },
        DiscriminatorType::Pattern => match &slice.pattern {
            Some(pattern) => {
                let expected = values_at_path(pattern, &segments);
                !expected.is_empty() && expected.iter().all(|e| projected.iter().any(|p| pattern_matches(e, p)))
            }
            None => false,
        },
        DiscriminatorType::Exists => !projected.is_empty() && projected.iter().any(|v| !v.is_null()),
        DiscriminatorType::Type | DiscriminatorType::Profile => true,
    }
}

fn matches_by_fixed_or_pattern(item: &Value, slice: &ElementDefinition) -> bool {
    if let Some(fixed) = &slice.fixed {
        return deep_equal(fixed, item);
    }
    if let Some(pattern) = &slice.pattern {
        return pattern_matches(pattern, item);
    }
    false
}

fn validate_slice_children(
    pctx: &PipelineContext,
    base_path: &str,
    slice: &ElementDefinition,
    item: &Value,
    index: &ElementIndex,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let slice_prefix = format!("{}:{}", base_path, slice_name(slice));
    for ed in &index.elements {
        if !ed.id.starts_with(&format!("{slice_prefix}.")) {
            continue;
        }
        let Some(expected) = ed.fixed.as_ref().or(ed.pattern.as_ref()) else { continue };
        let is_pattern = ed.fixed.is_none();
        let relative_path = &ed.id[slice_prefix.len() + 1..];
        let segments: Vec<&str> = relative_path.split('.').collect();
        for target in values_at_path(item, &segments) {
            let ok = if is_pattern { pattern_matches(expected, target) } else { deep_equal(expected, target) };
            if !ok {
                issues.push(ValidationIssue::error(
                    "slicing",
                    IssueCode::Value,
                    base_path,
                    format!("Slice '{}' child '{}' does not satisfy its declared value", slice_name(slice), relative_path),
                ));
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::context::TypeResolver;
    use crate::model::{Slicing, StructureDefinition, StructureDefinitionKind};
    use crate::test_support::StaticProfileResolver;
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

    fn sd_with_closed_identifier_slicing() -> StructureDefinition {
        let mut sd = StructureDefinition::new("http://hl7.org/fhir/StructureDefinition/Patient", "Patient", StructureDefinitionKind::Resource);
        let mut base = ElementDefinition::new("Patient.identifier", "Patient.identifier");
        base.max = "*".into();
        base.slicing = Some(Slicing { discriminator: vec![], rules: SlicingRules::Closed, ordered: false });
        let mut mrn = ElementDefinition::new("Patient.identifier:mrn", "Patient.identifier");
        mrn.slice_name = Some("mrn".into());
        mrn.min = 1;
        mrn.max = "1".into();
        mrn.pattern = Some(json!({"system": "http://hospital.org/mrn"}));
        sd.snapshot = vec![ElementDefinition::new("Patient", "Patient"), base, mrn];
        sd
    }

    #[test]
    fn flags_unmatched_item_under_closed_slicing() {
        let resource = json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": "http://hospital.org/mrn", "value": "1"},
                {"system": "http://other.org/x", "value": "2"}
            ]
        });
        let pctx = ctx_for(resource, sd_with_closed_identifier_slicing());
        let issues = SlicingPhase.run(&pctx);
        assert!(issues.iter().any(|i| i.diagnostics.contains("did not match any defined slice")));
    }

    #[test]
    fn accepts_all_items_matching_defined_slices() {
        let resource = json!({
            "resourceType": "Patient",
            "identifier": [{"system": "http://hospital.org/mrn", "value": "1"}]
        });
        let pctx = ctx_for(resource, sd_with_closed_identifier_slicing());
        let issues = SlicingPhase.run(&pctx);
        assert!(issues.is_empty());
    }

    #[test]
    fn flags_slice_below_minimum() {
        let resource = json!({"resourceType": "Patient", "identifier": [{"system": "http://other.org/x", "value": "2"}]});
        let pctx = ctx_for(resource, sd_with_closed_identifier_slicing());
        let issues = SlicingPhase.run(&pctx);
        assert!(issues.iter().any(|i| i.diagnostics.contains("requires at least")));
    }

    fn sd_with_value_discriminator_slicing() -> StructureDefinition {
        let mut sd = StructureDefinition::new("http://hl7.org/fhir/StructureDefinition/Patient", "Patient", StructureDefinitionKind::Resource);
        let mut base = ElementDefinition::new("Patient.identifier", "Patient.identifier");
        base.max = "*".into();
        base.slicing = Some(Slicing {
            discriminator: vec![Discriminator { kind: DiscriminatorType::Value, path: "system".into() }],
            rules: SlicingRules::Open,
            ordered: false,
        });
        let mut mrn = ElementDefinition::new("Patient.identifier:mrn", "Patient.identifier");
        mrn.slice_name = Some("mrn".into());
        mrn.min = 0;
        mrn.max = "1".into();
        mrn.fixed = Some(json!({"system": "http://hospital.org/mrn"}));
        sd.snapshot = vec![ElementDefinition::new("Patient", "Patient"), base, mrn];
        sd
    }

    #[test]
    fn value_discriminator_matches_on_declared_path_only() {
        let resource = json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": "http://hospital.org/mrn", "value": "1"},
                {"system": "http://hospital.org/mrn", "value": "2"}
            ]
        });
        let pctx = ctx_for(resource, sd_with_value_discriminator_slicing());
        let issues = SlicingPhase.run(&pctx);
        assert!(issues.iter().any(|i| i.diagnostics.contains("allows at most")));
    }
}
