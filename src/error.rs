use thiserror::Error;

/// Raised only from [`crate::config::ValidatorConfig::compile`]; the sole
/// call-level error surface in this crate (see SPEC_FULL.md §7, §10.2).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reference mode 'full' requires terminology to be enabled")]
    TerminologyRequiredForFullReferenceMode,

    #[error("unsupported FHIR version: expected {expected}, got {got}")]
    FhirVersionMismatch { expected: String, got: String },

    #[error("invalid worker count: {0} (must be > 0)")]
    InvalidWorkerCount(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
