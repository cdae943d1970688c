//! Phase: Fixed/Pattern (§4.7).

use crate::context::PipelineContext;
use crate::issue::{IssueCode, ValidationIssue};
use crate::plan::PriorityClass;

use super::{deep_equal, pattern_matches, relative_segments, values_at_path, Phase};

pub struct FixedPatternPhase;

impl Phase for FixedPatternPhase {
    fn name(&self) -> &'static str {
        "fixed-pattern"
    }

    fn priority(&self) -> PriorityClass {
        PriorityClass::Normal
    }

    fn run(&self, pctx: &PipelineContext) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        // §4.7: "prefers the pipeline context's root profile over the base
        // type profile" — `root_sd` is already that preference (§3 Pipeline
        // Context: `root_sd` is resolved from `meta.profile[0]` when present).
        let Some(root_sd) = pctx.root_sd.clone() else { return issues };
        let index = pctx.type_resolver.index_for(&root_sd);

        for ed in &index.elements {
            if pctx.cancel.is_cancelled() {
                break;
            }
            let Some(expected) = ed.fixed.as_ref().or(ed.pattern.as_ref()) else { continue };
            let is_pattern = ed.fixed.is_none();

            let segments = relative_segments(&ed.path, &pctx.resource_type);
            let targets = values_at_path(&pctx.resource, &segments);

            for target in targets {
                let matches = if is_pattern { pattern_matches(expected, target) } else { deep_equal(expected, target) };
                if !matches {
                    issues.push(ValidationIssue::error(
                        self.name(),
                        IssueCode::Value,
                        ed.path.clone(),
                        format!(
                            "Value at '{}' does not satisfy the declared {} value",
                            ed.path,
                            if is_pattern { "pattern" } else { "fixed" }
                        ),
                    ));
                }
            }
        }

        issues
    }
}
