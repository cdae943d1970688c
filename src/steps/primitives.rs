//! Phase: Primitives (§4.4).

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

use crate::context::PipelineContext;
use crate::issue::{IssueCode, ValidationIssue};
use crate::plan::PriorityClass;
use crate::types::is_primitive_type;
use crate::walker::{self, WalkContext};

use super::Phase;

pub struct PrimitivesPhase;

impl Phase for PrimitivesPhase {
    fn name(&self) -> &'static str {
        "primitives"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Early
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let Some(root_sd) = pctx.root_sd.clone() else { return issues };

        walker::walk(&pctx.resource, &root_sd, &pctx.type_resolver, &pctx.cancel, &mut |wc| {
            if pctx.cancel.is_cancelled() || wc.is_array || wc.is_object {
                return;
            }
            let Some(type_name) = resolve_primitive_type(wc) else { return };
            if let Some(reason) = validate_primitive(wc.value, &type_name) {
                issues.push(ValidationIssue::error(
                    self.name(),
                    IssueCode::Value,
                    wc.path.clone(),
                    format!("Invalid {type_name} value at '{}': {reason}", wc.path),
                ));
            }
        });

        issues
    }
}

fn resolve_primitive_type(wc: &WalkContext) -> Option<String> {
    if let Some(ct) = &wc.concrete_type {
        return is_primitive_type(ct).then(|| ct.clone());
    }
    if let Some(ed) = &wc.element {
        if let Some(code) = ed.types.first().map(|t| t.code.as_str()) {
            return is_primitive_type(code).then(|| code.to_string());
        }
    }
    fallback_type_for_field(&wc.key).map(|s| s.to_string())
}

const FALLBACK_FIELDS: &[(&str, &str)] = &[
    ("id", "id"),
    ("birthDate", "date"),
    ("date", "dateTime"),
    ("status", "code"),
    ("gender", "code"),
    ("use", "code"),
    ("active", "boolean"),
    ("url", "uri"),
    ("system", "uri"),
    ("version", "string"),
    ("code", "code"),
    ("display", "string"),
    ("lastUpdated", "instant"),
    ("versionId", "id"),
];

fn fallback_type_for_field(key: &str) -> Option<&'static str> {
    FALLBACK_FIELDS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Returns `Some(reason)` when `value` fails the format/range rule for
/// `type_name`, `None` when it passes.
fn validate_primitive(value: &Value, type_name: &str) -> Option<String> {
    match type_name {
        "boolean" => (!value.is_boolean()).then(|| "expected a boolean".to_string()),
        "integer" => check_integer_range(value, i64::from(i32::MIN), i64::from(i32::MAX)),
        "unsignedInt" => check_integer_range(value, 0, i64::from(i32::MAX)),
        "positiveInt" => check_integer_range(value, 1, i64::from(i32::MAX)),
        "integer64" => check_integer64(value),
        "decimal" => check_decimal(value),
        "string" => check_string_no_edge_whitespace(value),
        "markdown" => check_is_string(value),
        "uri" => check_no_whitespace_uri(value, false),
        "url" => check_no_whitespace_uri(value, false),
        "canonical" => check_no_whitespace_uri(value, true),
        "code" => check_code(value),
        "id" => check_regex(value, id_regex(), "must match [A-Za-z0-9-.]{1,64}"),
        "oid" => check_regex(value, oid_regex(), "must be urn:oid: followed by a valid OID"),
        "uuid" => check_regex(value, uuid_regex(), "must be urn:uuid: followed by RFC-4122 hex"),
        "base64Binary" => check_regex(value, base64_regex(), "must be valid base64"),
        "date" => check_date(value),
        "dateTime" => check_date_time(value, false),
        "instant" => check_date_time(value, true),
        "time" => check_time(value),
        "xhtml" => check_xhtml(value),
        _ => None,
    }
}

fn as_str(value: &Value) -> Option<&str> {
    value.as_str()
}

fn check_is_string(value: &Value) -> Option<String> {
    (!value.is_string()).then(|| "expected a string".to_string())
}

fn check_integer_range(value: &Value, min: i64, max: i64) -> Option<String> {
    match value.as_i64() {
        Some(n) if n >= min && n <= max => None,
        Some(_) => Some(format!("out of range [{min}, {max}]")),
        None => Some("expected an integer".to_string()),
    }
}

fn check_integer64(value: &Value) -> Option<String> {
    if value.is_i64() || value.is_u64() {
        return None;
    }
    match value.as_str() {
        Some(s) if s.parse::<i64>().is_ok() => None,
        Some(_) => Some("expected a digit string".to_string()),
        None => Some("expected an integer or digit string".to_string()),
    }
}

fn decimal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?(0|[1-9]\d*)(\.\d+)?([eE][+-]?\d+)?$").unwrap())
}

fn check_decimal(value: &Value) -> Option<String> {
    if value.is_number() {
        return None;
    }
    match as_str(value) {
        Some(s) if decimal_regex().is_match(s) => None,
        _ => Some("expected a number or a decimal-formatted string".to_string()),
    }
}

fn check_string_no_edge_whitespace(value: &Value) -> Option<String> {
    let s = as_str(value)?;
    let bad = s.is_empty() || s.starts_with([' ', '\t']) || s.ends_with([' ', '\t']);
    bad.then(|| "must not have leading or trailing space/tab".to_string())
}

fn check_no_whitespace_uri(value: &Value, is_canonical: bool) -> Option<String> {
    let s = as_str(value)?;
    if s.is_empty() {
        return Some("must be non-empty".to_string());
    }
    let body = if is_canonical { s.split('|').next().unwrap_or(s) } else { s };
    body.chars().any(|c| c.is_whitespace()).then(|| "must not contain whitespace".to_string())
}

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s]+(\x20[^\s]+)*$").unwrap())
}

fn check_code(value: &Value) -> Option<String> {
    let s = as_str(value)?;
    (!code_regex().is_match(s)).then(|| "must be non-space tokens separated by single spaces".to_string())
}

pub(crate) fn id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9\-.]{1,64}$").unwrap())
}

fn oid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^urn:oid:[012](\.(0|[1-9]\d*))+$").unwrap())
}

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^urn:uuid:[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap()
    })
}

fn base64_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$").unwrap())
}

fn check_regex(value: &Value, re: &Regex, reason: &str) -> Option<String> {
    let s = as_str(value)?;
    (!re.is_match(s)).then(|| reason.to_string())
}

fn date_only_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})(-(\d{2})(-(\d{2}))?)?$").unwrap())
}

fn check_date(value: &Value) -> Option<String> {
    let s = as_str(value)?;
    check_date_part_or_mismatch(s)
}

fn validate_date_part(s: &str) -> Option<String> {
    let Some(caps) = date_only_regex().captures(s) else { return None };
    let Some(year) = caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok()) else { return None };
    let month: Option<u32> = caps.get(3).map(|m| m.as_str().parse().unwrap_or(0));
    let day: Option<u32> = caps.get(5).map(|d| d.as_str().parse().unwrap_or(0));
    match (month, day) {
        (None, None) => None,
        (Some(m), None) => (!(1..=12).contains(&m)).then(|| "month out of range".to_string()),
        (Some(m), Some(d)) => {
            if NaiveDate::from_ymd_opt(year, m, d).is_none() {
                Some("not a calendar-valid date".to_string())
            } else {
                None
            }
        }
        (None, Some(_)) => Some("day without month".to_string()),
    }
}

fn check_date_part_or_mismatch(s: &str) -> Option<String> {
    if !date_only_regex().is_match(s) {
        return Some("expected YYYY, YYYY-MM, or YYYY-MM-DD".to_string());
    }
    validate_date_part(s)
}

fn datetime_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4})(-(\d{2})(-(\d{2})(T([01]\d|2[0-3]):[0-5]\d:([0-5]\d|60)(\.\d+)?(Z|[+-]([01]\d|2[0-3]):[0-5]\d)?)?)?)?$").unwrap()
    })
}

fn check_date_time(value: &Value, instant: bool) -> Option<String> {
    let s = as_str(value)?;
    if !datetime_regex().is_match(s) {
        return Some("not a valid FHIR dateTime".to_string());
    }
    if instant {
        let has_time = s.contains('T');
        let has_tz = s.ends_with('Z') || has_tz_offset(s);
        if !has_time || !has_tz {
            return Some("instant requires full time and a timezone".to_string());
        }
    }
    let date_part = s.split('T').next().unwrap_or(s);
    if let Some(reason) = check_date_part_or_mismatch(date_part) {
        return Some(reason);
    }
    None
}

fn has_tz_offset(s: &str) -> bool {
    let tail = &s[s.len().saturating_sub(6)..];
    tail.len() == 6 && (tail.starts_with('+') || tail.starts_with('-')) && tail.as_bytes()[3] == b':'
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d:([0-5]\d|60)(\.\d+)?$").unwrap())
}

fn check_time(value: &Value) -> Option<String> {
    let s = as_str(value)?;
    (!time_regex().is_match(s)).then(|| "expected HH:MM:SS with optional fraction".to_string())
}

fn check_xhtml(value: &Value) -> Option<String> {
    let s = as_str(value)?;
    (!s.trim().starts_with("<div")).then(|| "must begin with <div".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decimal_accepts_number_and_string_form() {
        assert!(validate_primitive(&json!(1.5), "decimal").is_none());
        assert!(validate_primitive(&json!("1.5e10"), "decimal").is_none());
        assert!(validate_primitive(&json!("01.5"), "decimal").is_some());
    }

    #[test]
    fn integer_range_is_enforced() {
        assert!(validate_primitive(&json!(2147483647i64), "integer").is_none());
        assert!(validate_primitive(&json!(2147483648i64), "integer").is_some());
        assert!(validate_primitive(&json!(-2147483648i64), "integer").is_none());
    }

    #[test]
    fn positive_int_rejects_zero() {
        assert!(validate_primitive(&json!(0), "positiveInt").is_some());
        assert!(validate_primitive(&json!(1), "positiveInt").is_none());
    }

    #[test]
    fn date_validates_calendar() {
        assert!(validate_primitive(&json!("2023-02-29"), "date").is_some());
        assert!(validate_primitive(&json!("2024-02-29"), "date").is_none());
        assert!(validate_primitive(&json!("2024"), "date").is_none());
        assert!(validate_primitive(&json!("2024-13"), "date").is_some());
    }

    #[test]
    fn date_time_requires_timezone_for_instant() {
        assert!(validate_primitive(&json!("2024-01-01T10:00:00"), "instant").is_some());
        assert!(validate_primitive(&json!("2024-01-01T10:00:00Z"), "instant").is_none());
        assert!(validate_primitive(&json!("2024-01-01T10:00:00"), "dateTime").is_none());
    }

    #[test]
    fn id_rejects_spaces() {
        assert!(validate_primitive(&json!("has spaces"), "id").is_some());
        assert!(validate_primitive(&json!("abc-123.4"), "id").is_none());
    }

    #[test]
    fn xhtml_requires_div_wrapper() {
        assert!(validate_primitive(&json!("<p>hi</p>"), "xhtml").is_some());
        assert!(validate_primitive(&json!("<div>hi</div>"), "xhtml").is_none());
    }

    #[test]
    fn string_rejects_leading_trailing_whitespace() {
        assert!(validate_primitive(&json!(" hi"), "string").is_some());
        assert!(validate_primitive(&json!("hi"), "string").is_none());
    }
}
