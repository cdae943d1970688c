//! Phase: Bundle-type-specific rules (§4.13).

use serde_json::Value;
use std::collections::HashSet;

use crate::context::PipelineContext;
use crate::issue::{IssueCode, ValidationIssue};
use crate::plan::PriorityClass;

use super::Phase;

const ALLOWED_TYPES: &[&str] =
    &["document", "message", "transaction", "batch", "history", "searchset", "collection", "subscription-notification"];

const ALLOWED_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH"];

pub struct BundlePhase;

impl Phase for BundlePhase {
    fn name(&self) -> &'static str {
        "bundle"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Normal
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if pctx.resource_type != "Bundle" {
            return issues;
        }
        let Value::Object(bundle) = pctx.resource.as_ref() else { return issues };

        let bundle_type = bundle.get("type").and_then(Value::as_str);
        match bundle_type {
            None => issues.push(ValidationIssue::error("bundle", IssueCode::Required, "Bundle.type", "Bundle is missing required 'type'")),
            Some(t) if !ALLOWED_TYPES.contains(&t) => issues.push(ValidationIssue::warning(
                "bundle",
                IssueCode::CodeInvalid,
                "Bundle.type",
                format!("Unknown Bundle.type '{t}'"),
            )),
            _ => {}
        }

        let entries: Vec<&Value> = bundle.get("entry").and_then(Value::as_array).map(|a| a.iter().collect()).unwrap_or_default();

        if let Some(t) = bundle_type {
            check_type_rules(t, &entries, &mut issues);
        }
        check_full_url_uniqueness(&entries, &mut issues);

        issues
    }
}

fn check_type_rules(bundle_type: &str, entries: &[&Value], issues: &mut Vec<ValidationIssue>) {
    match bundle_type {
        "document" => {
            if entries.is_empty() {
                issues.push(ValidationIssue::error("bundle", IssueCode::Required, "Bundle.entry", "Document bundle must have at least one entry"));
            } else if entry_resource_type(entries[0]) != Some("Composition") {
                issues.push(ValidationIssue::error(
                    "bundle",
                    IssueCode::Structure,
                    "Bundle.entry[0].resource",
                    "Document bundle's first entry must be a Composition",
                ));
            }
            for (i, entry) in entries.iter().enumerate() {
                if full_url(entry).is_none() {
                    issues.push(ValidationIssue::warning(
                        "bundle",
                        IssueCode::Required,
                        format!("Bundle.entry[{i}]"),
                        "Document bundle entries should carry a fullUrl",
                    ));
                }
            }
        }
        "message" => {
            if entries.is_empty() {
                issues.push(ValidationIssue::error("bundle", IssueCode::Required, "Bundle.entry", "Message bundle must have at least one entry"));
            } else if entry_resource_type(entries[0]) != Some("MessageHeader") {
                issues.push(ValidationIssue::error(
                    "bundle",
                    IssueCode::Structure,
                    "Bundle.entry[0].resource",
                    "Message bundle's first entry must be a MessageHeader",
                ));
            }
        }
        "transaction" | "batch" => {
            for (i, entry) in entries.iter().enumerate() {
                check_transaction_entry(i, entry, issues);
            }
        }
        "history" => {
            for (i, entry) in entries.iter().enumerate() {
                let Value::Object(e) = entry else { continue };
                if e.get("request").is_none() && e.get("response").is_none() {
                    issues.push(ValidationIssue::warning(
                        "bundle",
                        IssueCode::Required,
                        format!("Bundle.entry[{i}]"),
                        "History bundle entries should carry a request or response",
                    ));
                }
            }
        }
        "searchset" => {
            for (i, entry) in entries.iter().enumerate() {
                let Value::Object(e) = entry else { continue };
                let Some(search) = e.get("search") else { continue };
                let mode = search.get("mode").and_then(Value::as_str);
                if let Some(mode) = mode {
                    if !matches!(mode, "match" | "include" | "outcome") {
                        issues.push(ValidationIssue::error(
                            "bundle",
                            IssueCode::CodeInvalid,
                            format!("Bundle.entry[{i}].search.mode"),
                            format!("Invalid search.mode '{mode}'"),
                        ));
                    }
                }
            }
        }
        "collection" => {
            for (i, entry) in entries.iter().enumerate() {
                let Value::Object(e) = entry else { continue };
                if e.get("resource").is_none() {
                    issues.push(ValidationIssue::warning(
                        "bundle",
                        IssueCode::Required,
                        format!("Bundle.entry[{i}]"),
                        "Collection bundle entries should carry a resource",
                    ));
                }
            }
        }
        _ => {}
    }
}

fn check_transaction_entry(index: usize, entry: &Value, issues: &mut Vec<ValidationIssue>) {
    let Value::Object(e) = entry else { return };
    let path = format!("Bundle.entry[{index}].request");
    let Some(request) = e.get("request") else {
        issues.push(ValidationIssue::error("bundle", IssueCode::Required, path, "Transaction/batch entry is missing 'request'"));
        return;
    };

    let method = request.get("method").and_then(Value::as_str);
    match method {
        None => issues.push(ValidationIssue::error("bundle", IssueCode::Required, format!("{path}.method"), "Entry request is missing 'method'")),
        Some(m) if !ALLOWED_METHODS.contains(&m) => issues.push(ValidationIssue::error(
            "bundle",
            IssueCode::CodeInvalid,
            format!("{path}.method"),
            format!("Invalid request.method '{m}'"),
        )),
        _ => {}
    }

    let url = request.get("url").and_then(Value::as_str);
    if url.is_none_or(str::is_empty) {
        issues.push(ValidationIssue::error("bundle", IssueCode::Required, format!("{path}.url"), "Entry request is missing a non-empty 'url'"));
    }

    let Some(method) = method else { return };
    let has_resource = e.get("resource").is_some();
    match method {
        "POST" | "PUT" | "PATCH" if !has_resource => issues.push(ValidationIssue::error(
            "bundle",
            IssueCode::Required,
            format!("Bundle.entry[{index}].resource"),
            format!("Entry method '{method}' must carry a resource"),
        )),
        "GET" | "HEAD" | "DELETE" if has_resource => issues.push(ValidationIssue::warning(
            "bundle",
            IssueCode::Value,
            format!("Bundle.entry[{index}].resource"),
            format!("Entry method '{method}' should not carry a resource"),
        )),
        _ => {}
    }
}

fn check_full_url_uniqueness(entries: &[&Value], issues: &mut Vec<ValidationIssue>) {
    let mut seen: HashSet<&str> = HashSet::new();
    for (i, entry) in entries.iter().enumerate() {
        let Some(url) = full_url(entry) else { continue };
        if !seen.insert(url) {
            let is_urn = url.starts_with("urn:uuid:") || url.starts_with("urn:oid:");
            let message = format!("Duplicate Bundle.entry.fullUrl '{url}'");
            let issue = if is_urn {
                ValidationIssue::warning("bundle", IssueCode::BusinessRule, format!("Bundle.entry[{i}].fullUrl"), message)
            } else {
                ValidationIssue::error("bundle", IssueCode::BusinessRule, format!("Bundle.entry[{i}].fullUrl"), message)
            };
            issues.push(issue);
        }
    }
}

fn full_url(entry: &Value) -> Option<&str> {
    entry.get("fullUrl").and_then(Value::as_str)
}

fn entry_resource_type(entry: &Value) -> Option<&str> {
    entry.get("resource")?.get("resourceType")?.as_str()
}
