//! Phase: References (§4.9).

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::context::{PipelineContext, ReferenceMode};
use crate::issue::{IssueCode, ValidationIssue};
use crate::plan::PriorityClass;

use super::{relative_segments, values_at_path, Phase};

pub struct ReferencesPhase;

impl Phase for ReferencesPhase {
    fn name(&self) -> &'static str {
        "references"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Normal
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if pctx.settings.reference_mode == ReferenceMode::Off {
            return issues;
        }
        let Some(root_sd) = pctx.root_sd.clone() else { return issues };
        let index = pctx.type_resolver.index_for(&root_sd);

        for ed in &index.elements {
            if pctx.cancel.is_cancelled() {
                break;
            }
            if ed.is_slice() {
                continue;
            }
            let is_reference = ed.types.iter().any(|t| t.code == "Reference");
            let is_canonical = ed.types.iter().any(|t| t.code == "canonical");
            if !is_reference && !is_canonical {
                continue;
            }

            let segments = relative_segments(&ed.path, &pctx.resource_type);
            for target in values_at_path(&pctx.resource, &segments) {
                if is_canonical {
                    issues.extend(check_canonical(&ed.path, target));
                } else {
                    issues.extend(check_reference(pctx, ed, target));
                }
            }
        }

        issues
    }
}

fn relative_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z][A-Za-z0-9]*)/([A-Za-z0-9\-.]{1,64})(/_history/[A-Za-z0-9\-.]+)?$").unwrap())
}

fn absolute_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://[^\s]+/([A-Za-z][A-Za-z0-9]*)/([A-Za-z0-9\-.]{1,64})(/_history/[A-Za-z0-9\-.]+)?$").unwrap()
    })
}

enum ParsedReference {
    Relative { resource_type: String },
    Absolute { resource_type: String },
    Contained { local_id: String },
    Urn,
}

fn parse_reference(reference: &str) -> Option<ParsedReference> {
    if let Some(id) = reference.strip_prefix('#') {
        return Some(ParsedReference::Contained { local_id: id.to_string() });
    }
    if reference.starts_with("urn:uuid:") || reference.starts_with("urn:oid:") {
        return Some(ParsedReference::Urn);
    }
    if let Some(caps) = absolute_ref_regex().captures(reference) {
        return Some(ParsedReference::Absolute { resource_type: caps[1].to_string() });
    }
    if let Some(caps) = relative_ref_regex().captures(reference) {
        return Some(ParsedReference::Relative { resource_type: caps[1].to_string() });
    }
    None
}

fn check_reference(pctx: &PipelineContext, ed: &crate::model::ElementDefinition, value: &Value) -> Vec<ValidationIssue> {
    let Value::Object(map) = value else { return Vec::new() };
    let mut issues = Vec::new();

    let reference = map.get("reference").and_then(Value::as_str);
    let identifier = map.get("identifier");
    let display = map.get("display").and_then(Value::as_str);

    if reference.is_none() {
        if identifier.is_none() && display.is_some() {
            issues.push(ValidationIssue::new(
                crate::issue::IssueSeverity::Warning,
                IssueCode::Incomplete,
                "references",
                format!("Reference at '{}' carries only a display, no reference or identifier", ed.path),
                ed.path.clone(),
            ));
        }
        return issues;
    }
    let reference = reference.unwrap();

    let Some(parsed) = parse_reference(reference) else {
        issues.push(ValidationIssue::error(
            "references",
            IssueCode::Value,
            ed.path.clone(),
            format!("'{reference}' is not a recognized reference format"),
        ));
        return issues;
    };

    let declared_type = map.get("type").and_then(Value::as_str).map(str::to_string);
    let target_type = declared_type.or(match &parsed {
        ParsedReference::Relative { resource_type } | ParsedReference::Absolute { resource_type } => Some(resource_type.clone()),
        _ => None,
    });

    if let Some(rt) = &target_type {
        if rt.chars().next().is_some_and(|c| c.is_lowercase()) {
            issues.push(ValidationIssue::warning(
                "references",
                IssueCode::Value,
                ed.path.clone(),
                format!("Reference resource-type segment '{rt}' should be capitalized"),
            ));
        }
        let allowed = allowed_target_types(ed);
        if !allowed.is_empty() && !allowed.iter().any(|a| a == "Resource" || a.eq_ignore_ascii_case(rt)) {
            issues.push(ValidationIssue::error(
                "references",
                IssueCode::Value,
                ed.path.clone(),
                format!("Reference targets '{rt}' but the element only permits {allowed:?}"),
            ));
        }
    }

    if pctx.settings.reference_mode == ReferenceMode::Full {
        match parsed {
            ParsedReference::Contained { local_id } => {
                let found = pctx
                    .resource
                    .get("contained")
                    .and_then(Value::as_array)
                    .is_some_and(|items| items.iter().any(|r| r.get("id").and_then(Value::as_str) == Some(local_id.as_str())));
                if !found {
                    issues.push(ValidationIssue::error(
                        "references",
                        IssueCode::NotFound,
                        ed.path.clone(),
                        format!("No contained resource with id '#{local_id}'"),
                    ));
                }
            }
            ParsedReference::Relative { .. } | ParsedReference::Absolute { .. } | ParsedReference::Urn => {
                if let Some(resolver) = &pctx.reference_resolver {
                    let resolution = resolver.resolve_reference(&pctx.cancel, reference);
                    if !resolution.found {
                        issues.push(ValidationIssue::warning(
                            "references",
                            IssueCode::NotFound,
                            ed.path.clone(),
                            format!("Reference '{reference}' could not be resolved"),
                        ));
                    }
                }
            }
        }
    }

    issues
}

fn check_canonical(path: &str, value: &Value) -> Vec<ValidationIssue> {
    let Some(s) = value.as_str() else { return Vec::new() };
    let base = s.split('|').next().unwrap_or(s);
    if base.starts_with("http://") || base.starts_with("https://") || base.starts_with("urn:") {
        Vec::new()
    } else {
        vec![ValidationIssue::warning(
            "references",
            IssueCode::Value,
            path,
            format!("Canonical reference '{s}' should begin with http://, https://, or urn:"),
        )]
    }
}

fn allowed_target_types(ed: &crate::model::ElementDefinition) -> Vec<String> {
    ed.types
        .iter()
        .filter(|t| t.code == "Reference")
        .flat_map(|t| &t.target_profile)
        .filter_map(|url| url.rsplit('/').next().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::context::{RuntimeSettings, TypeResolver};
    use crate::model::{ElementDefinition, StructureDefinition, StructureDefinitionKind, TypeRef};
    use crate::test_support::StaticProfileResolver;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn ctx_for(resource: Value, sd: StructureDefinition, mode: ReferenceMode) -> PipelineContext {
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
            settings: RuntimeSettings { reference_mode: mode, ..RuntimeSettings::default() },
        }
    }

    fn sd_with_subject() -> StructureDefinition {
        let mut sd = StructureDefinition::new(
            "http://hl7.org/fhir/StructureDefinition/Observation",
            "Observation",
            StructureDefinitionKind::Resource,
        );
        let mut subject = ElementDefinition::new("Observation.subject", "Observation.subject");
        subject.types = vec![TypeRef {
            code: "Reference".into(),
            target_profile: vec!["http://hl7.org/fhir/StructureDefinition/Patient".into()],
            profile: vec![],
        }];
        sd.snapshot = vec![ElementDefinition::new("Observation", "Observation"), subject];
        sd
    }

    #[test]
    fn flags_malformed_reference() {
        let pctx = ctx_for(
            json!({"resourceType": "Observation", "subject": {"reference": "not a reference"}}),
            sd_with_subject(),
            ReferenceMode::TypeOnly,
        );
        let issues = ReferencesPhase.run(&pctx);
        assert!(issues.iter().any(|i| i.code == IssueCode::Value));
    }

    #[test]
    fn flags_target_type_mismatch() {
        let pctx = ctx_for(
            json!({"resourceType": "Observation", "subject": {"reference": "Group/123"}}),
            sd_with_subject(),
            ReferenceMode::TypeOnly,
        );
        let issues = ReferencesPhase.run(&pctx);
        assert!(issues.iter().any(|i| i.diagnostics.contains("only permits")));
    }

    #[test]
    fn accepts_matching_target_type() {
        let pctx = ctx_for(
            json!({"resourceType": "Observation", "subject": {"reference": "Patient/123"}}),
            sd_with_subject(),
            ReferenceMode::TypeOnly,
        );
        let issues = ReferencesPhase.run(&pctx);
        assert!(issues.is_empty());
    }

    #[test]
    fn flags_missing_contained_resource_in_full_mode() {
        let pctx = ctx_for(
            json!({"resourceType": "Observation", "subject": {"reference": "#p1"}}),
            sd_with_subject(),
            ReferenceMode::Full,
        );
        let issues = ReferencesPhase.run(&pctx);
        assert!(issues.iter().any(|i| i.code == IssueCode::NotFound));
    }
}
