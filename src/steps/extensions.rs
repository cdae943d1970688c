//! Phase: Extensions (§4.10).

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::context::PipelineContext;
use crate::issue::{IssueCode, ValidationIssue};
use crate::model::{ElementDefinition, ElementIndex};
use crate::plan::PriorityClass;
use crate::types::choice_suffix;

use super::extension_slicing::{self, SliceOutcome, SubExtensionLookup};
use super::{terminology, Phase};

/// Where a sub-extension's `.url` is resolved: the parent extension's own
/// `ElementIndex`, plus the accumulated element path to look for slicing at
/// (`"Extension"` for a direct child, one more `.extension` per nesting level).
#[derive(Clone)]
struct SubExtensionScope {
    index: Arc<ElementIndex>,
    schema_path: String,
}

pub struct ExtensionsPhase;

impl Phase for ExtensionsPhase {
    fn name(&self) -> &'static str {
        "extensions"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Normal
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let Value::Object(root) = pctx.resource.as_ref() else { return issues };
        scan(pctx, root, &pctx.resource_type, &mut issues);
        issues
    }
}

fn scan(pctx: &PipelineContext, obj: &Map<String, Value>, schema_path: &str, issues: &mut Vec<ValidationIssue>) {
    for (key, child) in obj {
        if pctx.cancel.is_cancelled() {
            return;
        }
        if key == "extension" || key == "modifierExtension" {
            if let Value::Array(items) = child {
                for item in items {
                    if let Value::Object(ext) = item {
                        check_extension(pctx, ext, schema_path, key == "modifierExtension", true, None, issues);
                    }
                }
            }
            continue;
        }
        match child {
            Value::Object(nested) => scan(pctx, nested, &format!("{schema_path}.{key}"), issues),
            Value::Array(items) => {
                for item in items {
                    if let Value::Object(nested) = item {
                        scan(pctx, nested, &format!("{schema_path}.{key}"), issues);
                    }
                }
            }
            _ => {}
        }
    }
}

fn check_extension(
    pctx: &PipelineContext,
    ext: &Map<String, Value>,
    parent_schema_path: &str,
    is_modifier_slot: bool,
    is_top_level: bool,
    sub_extension_scope: Option<SubExtensionScope>,
    issues: &mut Vec<ValidationIssue>,
) {
    let location = format!("{parent_schema_path}.extension");
    let url = ext.get("url").and_then(Value::as_str).unwrap_or("");
    if url.is_empty() {
        issues.push(ValidationIssue::error("extensions", IssueCode::Required, location.clone(), "Extension is missing a url"));
        return;
    }
    if is_top_level && !(url.starts_with("http://") || url.starts_with("https://") || url.starts_with("urn:")) {
        issues.push(ValidationIssue::warning(
            "extensions",
            IssueCode::Value,
            location.clone(),
            format!("Top-level extension url '{url}' should be an absolute URI"),
        ));
    }

    let value_key = ext.keys().find(|k| k.starts_with("value") && k.as_str() != "value");
    let has_nested = ext.get("extension").and_then(Value::as_array).is_some_and(|a| !a.is_empty());
    match (value_key.is_some(), has_nested) {
        (true, true) | (false, false) => {
            issues.push(ValidationIssue::error(
                "extensions",
                IssueCode::Structure,
                location.clone(),
                "Extension must carry exactly one of a value[x] or nested extension(s) (ext-1)",
            ));
        }
        _ => {}
    }

    if is_top_level {
        if let Some(root_sd) = &pctx.root_sd {
            let index = pctx.type_resolver.index_for(root_sd);
            let info = extension_slicing::resolve_extension_slicing(&index, parent_schema_path);
            match extension_slicing::is_extension_allowed(&info, url) {
                SliceOutcome::NotSliced | SliceOutcome::Defined => {}
                SliceOutcome::ClosedMismatch => issues.push(ValidationIssue::error(
                    "extensions",
                    IssueCode::Structure,
                    location.clone(),
                    format!("Extension '{url}' is not one of the slices defined for this closed slicing"),
                )),
                SliceOutcome::OpenMismatch => issues.push(ValidationIssue::information(
                    "extensions",
                    IssueCode::Informational,
                    location.clone(),
                    format!("Extension '{url}' is not one of the profile's defined slices"),
                )),
            }
        }
    }

    if !is_top_level {
        check_sub_extension(pctx, ext, url, &location, sub_extension_scope, value_key, has_nested, issues);
        return;
    }

    let ext_sd = pctx.type_resolver.resolve_by_url(&pctx.cancel, url);
    let Some(ext_sd) = ext_sd else {
        let message = format!("Extension definition '{url}' could not be resolved");
        let issue = if is_modifier_slot && !pctx.settings.allow_modifier_extensions {
            ValidationIssue::error("extensions", IssueCode::NotFound, location.clone(), message)
        } else {
            ValidationIssue::information("extensions", IssueCode::NotFound, location.clone(), message)
        };
        issues.push(issue);
        return;
    };

    if is_modifier_slot && !ext_sd.is_modifier {
        issues.push(ValidationIssue::error(
            "extensions",
            IssueCode::Structure,
            location.clone(),
            format!("Extension '{url}' is not a modifier extension but appears under modifierExtension"),
        ));
    } else if !is_modifier_slot && ext_sd.is_modifier {
        issues.push(ValidationIssue::error(
            "extensions",
            IssueCode::Structure,
            location.clone(),
            format!("Extension '{url}' is a modifier extension but appears under extension"),
        ));
    }

    if !ext_sd.context.is_empty() {
        let last_type = parent_schema_path.rsplit('.').next();
        let matched = ext_sd
            .context
            .iter()
            .any(|c| extension_slicing::context_matches(c, &pctx.resource_type, parent_schema_path, last_type));
        if !matched {
            issues.push(ValidationIssue::warning(
                "extensions",
                IssueCode::BusinessRule,
                location.clone(),
                format!("Extension '{url}' is not declared usable at '{parent_schema_path}'"),
            ));
        }
    }

    if let Some(key) = value_key {
        check_value_typing_and_binding(pctx, ext_sd.get_element_by_path("Extension.value[x]"), key, ext, &location, issues);
    }

    if has_nested {
        if let Value::Array(nested) = &ext["extension"] {
            let scope = SubExtensionScope { index: pctx.type_resolver.index_for(&ext_sd), schema_path: "Extension".to_string() };
            for item in nested {
                if let Value::Object(sub_ext) = item {
                    check_extension(pctx, sub_ext, &location, false, false, Some(scope.clone()), issues);
                }
            }
        }
    }
}

/// Resolves and validates a sub-extension (`is_top_level == false`) against
/// the parent extension's own snapshot, per §4.10 step 4: no global
/// `resolve_by_url`, just a slice-name / fixed-url lookup scoped to
/// `sub_extension_scope`. A parent that defines sub-extensions but not this
/// one is a warning, not an error or an informational — the sub-extension may
/// still be legal, just unprofiled.
fn check_sub_extension(
    pctx: &PipelineContext,
    ext: &Map<String, Value>,
    url: &str,
    location: &str,
    sub_extension_scope: Option<SubExtensionScope>,
    value_key: Option<&String>,
    has_nested: bool,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(scope) = sub_extension_scope else { return };
    match extension_slicing::resolve_sub_extension(&scope.index, &scope.schema_path, url) {
        SubExtensionLookup::NotDefined => {
            issues.push(ValidationIssue::warning(
                "extensions",
                IssueCode::NotFound,
                location.to_string(),
                format!("Sub-extension '{url}' is not defined on the parent extension"),
            ));
        }
        SubExtensionLookup::Found { slice_id, value_element } => {
            if let Some(key) = value_key {
                check_value_typing_and_binding(pctx, value_element, key, ext, location, issues);
            }
            if has_nested {
                if let Value::Array(nested) = &ext["extension"] {
                    let nested_scope = SubExtensionScope { index: scope.index.clone(), schema_path: slice_id };
                    for item in nested {
                        if let Value::Object(sub_ext) = item {
                            check_extension(pctx, sub_ext, location, false, false, Some(nested_scope.clone()), issues);
                        }
                    }
                }
            }
        }
    }
}

fn check_value_typing_and_binding(
    pctx: &PipelineContext,
    value_ed: Option<&ElementDefinition>,
    value_key: &str,
    ext: &Map<String, Value>,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(value_ed) = value_ed else { return };
    let suffix = value_key.strip_prefix("value").and_then(choice_suffix);
    let allowed = value_ed.type_codes();
    let type_matches = suffix.is_some_and(|s| allowed.iter().any(|t| t.eq_ignore_ascii_case(s)));
    if !allowed.is_empty() && !type_matches {
        issues.push(ValidationIssue::error(
            "extensions",
            IssueCode::Value,
            location.to_string(),
            format!("Extension value key '{value_key}' does not match declared type(s) {allowed:?}"),
        ));
        return;
    }

    if let Some(binding) = &value_ed.binding {
        if let Some(value_set) = binding.value_set.as_deref().filter(|vs| !vs.is_empty()) {
            let value = &ext[value_key];
            let binding_issues = terminology::validate_binding_value(pctx, location, binding.strength, value_set, value);
            issues.extend(binding_issues);
        }
    }
}
