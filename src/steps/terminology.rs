//! Phase: Terminology (§4.8).

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::context::PipelineContext;
use crate::issue::{IssueCode, IssueSeverity, ValidationIssue};
use crate::model::{BindingStrength, ElementDefinition, ElementIndex};
use crate::plan::PriorityClass;

use super::{relative_segments, values_at_path, Phase};

pub struct TerminologyPhase;

impl Phase for TerminologyPhase {
    fn name(&self) -> &'static str {
        "terminology"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Normal
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let binding_index = build_binding_index(pctx);

        for (path, ed) in &binding_index {
            if pctx.cancel.is_cancelled() {
                break;
            }
            let Some(binding) = &ed.binding else { continue };
            let Some(value_set) = binding.value_set.as_deref().filter(|vs| !vs.is_empty()) else { continue };

            let segments = relative_segments(path, &pctx.resource_type);
            for target in values_at_path(&pctx.resource, &segments) {
                issues.extend(validate_binding_value(pctx, path, binding.strength, value_set, target));
            }
        }

        issues
    }
}

/// Merges the root profile's eligible bindings with every declared
/// additional profile's, later profiles overriding earlier ones by path
/// (§4.8, the resolved Open Question — this precedence rule applies to the
/// binding index only).
fn build_binding_index(pctx: &PipelineContext) -> HashMap<String, ElementDefinition> {
    let mut map = HashMap::new();
    if let Some(root_sd) = &pctx.root_sd {
        let index = pctx.type_resolver.index_for(root_sd);
        collect_eligible(&index, &mut map);
    }
    for profile_url in &pctx.declared_profiles {
        if let Some(sd) = pctx.type_resolver.resolve_by_url(&pctx.cancel, profile_url) {
            let index = pctx.type_resolver.index_for(&sd);
            collect_eligible(&index, &mut map);
        }
    }
    map
}

fn collect_eligible(index: &ElementIndex, map: &mut HashMap<String, ElementDefinition>) {
    for ed in &index.elements {
        if ed.is_slice() {
            continue;
        }
        let Some(binding) = &ed.binding else { continue };
        if binding.value_set.as_deref().unwrap_or("").is_empty() {
            continue;
        }
        let coding_child = format!("{}.coding", ed.path);
        if !index.named_slices(&coding_child).is_empty() {
            continue;
        }
        map.insert(ed.path.clone(), ed.clone());
    }
}

/// Exposed `pub(crate)` so the extensions phase (§4.10 step 8) can reuse the
/// same dispatch for an extension's `value[x]` binding (the "Coding Helper").
pub(crate) fn validate_binding_value(
    pctx: &PipelineContext,
    path: &str,
    strength: BindingStrength,
    value_set: &str,
    value: &Value,
) -> Vec<ValidationIssue> {
    match value {
        Value::String(code) => {
            let (_, validity, mut always) = validate_single_coding(pctx, path, "", code, None, value_set, strength);
            always.extend(validity);
            always
        }
        Value::Object(map) if map.contains_key("coding") => validate_codeable_concept(pctx, path, strength, value_set, map),
        Value::Object(map) if map.contains_key("system") || map.contains_key("code") => {
            validate_coding_object(pctx, path, strength, value_set, map)
        }
        _ => Vec::new(),
    }
}

fn validate_coding_object(
    pctx: &PipelineContext,
    path: &str,
    strength: BindingStrength,
    value_set: &str,
    obj: &Map<String, Value>,
) -> Vec<ValidationIssue> {
    let system = obj.get("system").and_then(Value::as_str).unwrap_or("");
    let Some(code) = obj.get("code").and_then(Value::as_str) else { return Vec::new() };
    let display = obj.get("display").and_then(Value::as_str);
    let (_, validity, mut always) = validate_single_coding(pctx, path, system, code, display, value_set, strength);
    always.extend(validity);
    always
}

fn validate_codeable_concept(
    pctx: &PipelineContext,
    path: &str,
    strength: BindingStrength,
    value_set: &str,
    obj: &Map<String, Value>,
) -> Vec<ValidationIssue> {
    let Some(codings) = obj.get("coding").and_then(Value::as_array) else { return Vec::new() };
    if codings.is_empty() {
        return Vec::new();
    }

    let mut issues = Vec::new();
    let mut any_valid = false;
    let mut invalid: Vec<(String, ValidationIssue)> = Vec::new();

    for coding in codings {
        let Value::Object(cmap) = coding else { continue };
        let system = cmap.get("system").and_then(Value::as_str).unwrap_or("");
        let Some(code) = cmap.get("code").and_then(Value::as_str) else { continue };
        let display = cmap.get("display").and_then(Value::as_str);

        let (valid, validity, always) = validate_single_coding(pctx, path, system, code, display, value_set, strength);
        issues.extend(always);
        if valid {
            any_valid = true;
        } else if let Some(vi) = validity {
            invalid.push((format!("{system}|{code}"), vi));
        }
    }

    if !any_valid && !invalid.is_empty() {
        if strength == BindingStrength::Required {
            let codes = invalid.iter().map(|(desc, _)| desc.clone()).collect::<Vec<_>>().join(", ");
            issues.push(ValidationIssue::error(
                "terminology",
                IssueCode::CodeInvalid,
                path,
                format!("No coding in the CodeableConcept is valid for value set '{value_set}' (checked: {codes})"),
            ));
        } else {
            issues.extend(invalid.into_iter().map(|(_, vi)| vi));
        }
    }

    issues
}

/// Validates one system/code/display triple. Returns `(valid, validity_issue,
/// always_surfaced_issues)` — `always_surfaced_issues` covers display
/// mismatches and "service unavailable" notices, which are reported
/// regardless of how a CodeableConcept's overall validity is decided.
fn validate_single_coding(
    pctx: &PipelineContext,
    path: &str,
    system: &str,
    code: &str,
    display: Option<&str>,
    value_set: &str,
    strength: BindingStrength,
) -> (bool, Option<ValidationIssue>, Vec<ValidationIssue>) {
    if is_example_domain(system) {
        let issue = ValidationIssue::error(
            "terminology",
            IssueCode::Value,
            path,
            format!("Coding system '{system}' uses a reserved example domain"),
        );
        return (false, Some(issue), Vec::new());
    }

    let Some(service) = &pctx.terminology else {
        return (true, None, vec![unknown_service_issue(path, system)]);
    };

    match service.validate_code(&pctx.cancel, system, code, value_set) {
        None => (true, None, vec![unknown_service_issue(path, system)]),
        Some(cv) => {
            let mut always = Vec::new();
            let validity = (!cv.valid).then(|| {
                ValidationIssue::new(
                    code_not_in_valueset_severity(strength),
                    IssueCode::CodeInvalid,
                    "terminology",
                    format!("Code '{system}|{code}' is not valid for value set '{value_set}'"),
                    path,
                )
            });
            if let (Some(expected), Some(actual)) = (&cv.display, display) {
                if !actual.is_empty() && !expected.eq_ignore_ascii_case(actual) {
                    let severity =
                        if pctx.settings.terminology_display_as_warning { IssueSeverity::Warning } else { IssueSeverity::Error };
                    always.push(ValidationIssue::new(
                        severity,
                        IssueCode::Value,
                        "terminology",
                        format!("Display '{actual}' does not match the value set's expected display '{expected}'"),
                        path,
                    ));
                }
            }
            (cv.valid, validity, always)
        }
    }
}

fn unknown_service_issue(path: &str, system: &str) -> ValidationIssue {
    ValidationIssue::new(
        IssueSeverity::Warning,
        IssueCode::NotSupported,
        "terminology",
        format!("No terminology service available to validate codes from system '{system}'"),
        path,
    )
}

fn code_not_in_valueset_severity(strength: BindingStrength) -> IssueSeverity {
    match strength {
        BindingStrength::Required => IssueSeverity::Error,
        BindingStrength::Extensible => IssueSeverity::Warning,
        BindingStrength::Preferred | BindingStrength::Example => IssueSeverity::Information,
    }
}

const EXAMPLE_DOMAINS: &[&str] = &["example.com", "example.org", "example.net", "example.edu"];

fn is_example_domain(system: &str) -> bool {
    let Some(rest) = system.strip_prefix("http://").or_else(|| system.strip_prefix("https://")) else { return false };
    let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    EXAMPLE_DOMAINS.iter().any(|d| host == *d || host.ends_with(&format!(".{d}")))
}
