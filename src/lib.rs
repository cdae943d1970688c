//! Core FHIR R4 resource validation engine.
//!
//! See `SPEC_FULL.md` for the full design. In short: callers hand a resource
//! to [`validator::Validator`], which runs a [`plan::ValidationPlan`] of
//! phases (`steps::*`) over a [`context::PipelineContext`] built by a
//! type-aware [`walker`] and produces a [`issue::ValidationOutcome`].

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod interfaces;
pub mod issue;
pub mod model;
pub mod plan;
pub mod steps;
pub mod stream;
pub mod types;
pub mod validator;
pub mod walker;

#[cfg(test)]
mod test_support;

pub use cancel::CancellationToken;
pub use config::{Preset, ValidatorConfig};
pub use error::ConfigError;
pub use issue::{IssueCode, IssueSeverity, ValidationIssue, ValidationOutcome};
pub use validator::Validator;
