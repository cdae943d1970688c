use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of one [`ValidationIssue`]. Ordered from most to least severe so
/// `severity <= IssueSeverity::Error` reads naturally at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueSeverity::Fatal => "fatal",
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Information => "information",
        };
        write!(f, "{s}")
    }
}

impl IssueSeverity {
    pub fn is_error_or_worse(self) -> bool {
        matches!(self, IssueSeverity::Fatal | IssueSeverity::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCode {
    Structure,
    Required,
    Value,
    Invariant,
    CodeInvalid,
    NotFound,
    NotSupported,
    Processing,
    Incomplete,
    BusinessRule,
    Informational,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueCode::Structure => "structure",
            IssueCode::Required => "required",
            IssueCode::Value => "value",
            IssueCode::Invariant => "invariant",
            IssueCode::CodeInvalid => "code-invalid",
            IssueCode::NotFound => "not-found",
            IssueCode::NotSupported => "not-supported",
            IssueCode::Processing => "processing",
            IssueCode::Incomplete => "incomplete",
            IssueCode::BusinessRule => "business-rule",
            IssueCode::Informational => "informational",
        };
        write!(f, "{s}")
    }
}

/// One located deviation between a resource and its profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub diagnostics: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression: Vec<String>,
    pub phase: String,
    /// Convenience accessor mirroring `expression[0]` for callers that only
    /// care about one location; `None` when `expression` is empty.
    #[serde(skip)]
    pub location: Option<String>,
}

impl ValidationIssue {
    pub fn new(
        severity: IssueSeverity,
        code: IssueCode,
        phase: impl Into<String>,
        diagnostics: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let location = if path.is_empty() { None } else { Some(path.clone()) };
        let expression = if path.is_empty() { Vec::new() } else { vec![path] };
        Self { severity, code, diagnostics: diagnostics.into(), expression, phase: phase.into(), location }
    }

    pub fn error(phase: impl Into<String>, code: IssueCode, path: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, phase, diagnostics, path)
    }

    pub fn warning(phase: impl Into<String>, code: IssueCode, path: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Warning, code, phase, diagnostics, path)
    }

    pub fn information(phase: impl Into<String>, code: IssueCode, path: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Information, code, phase, diagnostics, path)
    }

    pub fn processing_warning(phase: impl Into<String>, path: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Warning, IssueCode::Processing, phase, diagnostics, path)
    }
}

/// Ordered sequence of issues produced by one validation run, plus the
/// derived `valid` flag (§3). `release()` is the pooling contract hook;
/// this crate does not pool (§1 Out of scope), so it is a no-op that exists
/// to keep the call-site shape stable for callers that do pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub issues: Vec<ValidationIssue>,
    pub valid: bool,
}

impl ValidationOutcome {
    pub fn new() -> Self {
        Self { issues: Vec::new(), valid: true }
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        if issue.severity.is_error_or_worse() {
            self.valid = false;
        }
        self.issues.push(issue);
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        for issue in issues {
            self.push(issue);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.valid
    }

    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity.is_error_or_worse()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).count()
    }

    /// Returns pooled storage to the allocator. No-op: see struct docs.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_flips_false_on_first_error() {
        let mut outcome = ValidationOutcome::new();
        assert!(outcome.valid);
        outcome.push(ValidationIssue::warning("structure", IssueCode::Structure, "Patient.name", "hmm"));
        assert!(outcome.valid);
        outcome.push(ValidationIssue::error("structure", IssueCode::Structure, "Patient.id", "bad"));
        assert!(!outcome.valid);
        assert_eq!(outcome.error_count(), 1);
    }

    #[test]
    fn fatal_also_counts_as_error() {
        let mut outcome = ValidationOutcome::new();
        outcome.push(ValidationIssue::new(IssueSeverity::Fatal, IssueCode::Structure, "structure", "boom", ""));
        assert_eq!(outcome.error_count(), 1);
        assert!(!outcome.valid);
    }
}
