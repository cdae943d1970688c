//! Phase: Constraints / FHIRPath invariants (§4.11).

use serde_json::Value;

use crate::context::{BestPracticeMode, ConstraintsMode, PipelineContext};
use crate::issue::{IssueCode, IssueSeverity, ValidationIssue};
use crate::model::{Constraint, ConstraintSeverity};
use crate::plan::PriorityClass;

use super::{relative_segments, values_at_path, Phase};

pub struct ConstraintsPhase;

impl Phase for ConstraintsPhase {
    fn name(&self) -> &'static str {
        "constraints"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Late
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if pctx.settings.constraints_mode == ConstraintsMode::Off {
            return issues;
        }
        let Some(root_sd) = pctx.root_sd.clone() else { return issues };
        let index = pctx.type_resolver.index_for(&root_sd);

        for ed in &index.elements {
            if pctx.cancel.is_cancelled() {
                break;
            }
            if ed.constraint.is_empty() {
                continue;
            }
            let segments = relative_segments(&ed.path, &pctx.resource_type);
            let targets = values_at_path(&pctx.resource, &segments);

            for constraint in &ed.constraint {
                if pctx.settings.suppressed_constraints.iter().any(|k| k == &constraint.key) {
                    continue;
                }
                for target in &targets {
                    issues.extend(evaluate_constraint(pctx, &ed.path, constraint, target));
                }
            }
        }

        issues
    }
}

fn evaluate_constraint(pctx: &PipelineContext, path: &str, constraint: &Constraint, value: &Value) -> Vec<ValidationIssue> {
    let outcome = match constraint.key.as_str() {
        "ele-1" => Some(evaluate_ele_1(value)),
        "ext-1" => Some(evaluate_ext_1(value)),
        _ if pctx.settings.constraints_mode == ConstraintsMode::BuiltinOnly => return Vec::new(),
        _ => None,
    };

    let result = match outcome {
        Some(result) => result,
        None => match &pctx.fhirpath {
            Some(evaluator) => match evaluator.evaluate(&pctx.cancel, &constraint.expression, value) {
                Some(r) => r,
                None => {
                    return vec![ValidationIssue::processing_warning(
                        "constraints",
                        path,
                        format!("FHIRPath evaluator could not evaluate constraint '{}'", constraint.key),
                    )]
                }
            },
            None => return Vec::new(),
        },
    };

    if result {
        return Vec::new();
    }

    let severity = best_practice_aware_severity(pctx, constraint);
    let message = constraint
        .human
        .clone()
        .unwrap_or_else(|| format!("Constraint '{}' failed: {}", constraint.key, constraint.expression));
    vec![ValidationIssue::new(severity, IssueCode::Invariant, "constraints", message, path)]
}

fn best_practice_aware_severity(pctx: &PipelineContext, constraint: &Constraint) -> IssueSeverity {
    let is_best_practice = constraint.key.starts_with("bp-");
    if is_best_practice {
        return match pctx.settings.best_practice {
            BestPracticeMode::Ignore => IssueSeverity::Information,
            BestPracticeMode::Warn => IssueSeverity::Warning,
            BestPracticeMode::Error => IssueSeverity::Error,
        };
    }
    match constraint.severity {
        ConstraintSeverity::Error => IssueSeverity::Error,
        ConstraintSeverity::Warning => IssueSeverity::Warning,
    }
}

fn evaluate_ele_1(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn evaluate_ext_1(value: &Value) -> bool {
    let Value::Object(map) = value else { return true };
    let has_value = map.keys().any(|k| k.starts_with("value") && k != "value");
    let has_extension = map.get("extension").and_then(Value::as_array).is_some_and(|a| !a.is_empty());
    has_value != has_extension
}
