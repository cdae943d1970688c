//! Declarative configuration (§6, §10.3): [`ValidatorConfig`] is data, not
//! behavior — it serializes to/from YAML and [`ValidatorConfig::compile`] is
//! the one place it turns into a runnable [`crate::plan::ValidationPlan`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{BestPracticeMode, ConstraintsMode, ReferenceMode};
use crate::error::ConfigError;
use crate::plan::{PriorityClass, ValidationPlan};
use crate::steps::{
    bundle::BundlePhase, cardinality::CardinalityPhase, constraints::ConstraintsPhase,
    extensions::ExtensionsPhase, fixed_pattern::FixedPatternPhase, primitives::PrimitivesPhase,
    references::ReferencesPhase, slicing::SlicingPhase, structure::StructurePhase,
    terminology::TerminologyPhase, unknown::UnknownElementsPhase, Phase,
};

const SUPPORTED_FHIR_VERSION: &str = "R4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminologyMode {
    Off,
    Local,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FhirConfig {
    pub version: String,
}

impl Default for FhirConfig {
    fn default() -> Self {
        Self { version: SUPPORTED_FHIR_VERSION.to_string() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub validate_unknown_elements: bool,
    pub allow_modifier_extensions: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self { validate_unknown_elements: true, allow_modifier_extensions: true }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminologyConfig {
    pub mode: TerminologyMode,
    pub timeout_ms: u64,
    pub display_as_warning: bool,
}

impl Default for TerminologyConfig {
    fn default() -> Self {
        Self { mode: TerminologyMode::Local, timeout_ms: 2_000, display_as_warning: true }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub mode: ReferenceMode,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self { mode: ReferenceMode::TypeOnly }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    pub enabled: bool,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintsConfig {
    pub mode: ConstraintsMode,
    pub best_practice: BestPracticeMode,
    pub suppress: Vec<String>,
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        Self { mode: ConstraintsMode::Full, best_practice: BestPracticeMode::Warn, suppress: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub fail_fast: bool,
    pub max_issues: usize,
    pub parallel_phases: bool,
    pub phase_timeout_ms: u64,
    pub worker_count: usize,
    pub pooling: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self { fail_fast: false, max_issues: 1_000, parallel_phases: false, phase_timeout_ms: 5_000, worker_count: 4, pooling: false }
    }
}

/// A fixed `ValidatorConfig::default()`-like snapshot for a common validation
/// posture, picked off the shelf via [`ValidatorConfig::preset`] or as a
/// builder starting point (§10.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preset {
    /// Fast, tolerant: bulk ingestion into a data lake. No terminology or
    /// reference network calls; unknown elements pass through untouched.
    Ingestion,
    /// Form-entry / authoring tools: local terminology, lenient references,
    /// full constraint checking so authors see invariant violations early.
    Authoring,
    /// General-purpose FHIR server default: local terminology, type-checked
    /// references, full constraints.
    Server,
    /// Strictest posture for publishing conformance artifacts: full
    /// terminology and reference resolution, best-practice violations are
    /// errors.
    Publication,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub fhir: FhirConfig,
    pub schema: SchemaConfig,
    pub terminology: TerminologyConfig,
    pub reference: ReferenceConfig,
    pub extensions: ExtensionsConfig,
    pub constraints: ConstraintsConfig,
    pub exec: ExecConfig,
}

impl ValidatorConfig {
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Ingestion => Self {
                fhir: FhirConfig::default(),
                schema: SchemaConfig { validate_unknown_elements: false, allow_modifier_extensions: true },
                terminology: TerminologyConfig { mode: TerminologyMode::Off, ..TerminologyConfig::default() },
                reference: ReferenceConfig { mode: ReferenceMode::Off },
                extensions: ExtensionsConfig::default(),
                constraints: ConstraintsConfig { mode: ConstraintsMode::BuiltinOnly, ..ConstraintsConfig::default() },
                exec: ExecConfig { max_issues: 100, parallel_phases: true, worker_count: 8, ..ExecConfig::default() },
            },
            Preset::Authoring => Self {
                fhir: FhirConfig::default(),
                schema: SchemaConfig::default(),
                terminology: TerminologyConfig { mode: TerminologyMode::Local, ..TerminologyConfig::default() },
                reference: ReferenceConfig { mode: ReferenceMode::TypeOnly },
                extensions: ExtensionsConfig::default(),
                constraints: ConstraintsConfig { mode: ConstraintsMode::Full, best_practice: BestPracticeMode::Warn, suppress: Vec::new() },
                exec: ExecConfig { max_issues: 200, ..ExecConfig::default() },
            },
            Preset::Server => Self::default(),
            Preset::Publication => Self {
                fhir: FhirConfig::default(),
                schema: SchemaConfig { validate_unknown_elements: true, allow_modifier_extensions: false },
                terminology: TerminologyConfig { mode: TerminologyMode::Full, display_as_warning: false, ..TerminologyConfig::default() },
                reference: ReferenceConfig { mode: ReferenceMode::Full },
                extensions: ExtensionsConfig::default(),
                constraints: ConstraintsConfig { mode: ConstraintsMode::Full, best_practice: BestPracticeMode::Error, suppress: Vec::new() },
                exec: ExecConfig { max_issues: usize::MAX, parallel_phases: false, ..ExecConfig::default() },
            },
        }
    }

    pub fn builder() -> ValidatorConfigBuilder {
        ValidatorConfigBuilder { config: Self::default() }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// The one fallible entry point (§10.2): checks cross-field invariants
    /// and assembles the ordered phase list a [`crate::validator::Validator`]
    /// actually runs.
    pub fn compile(&self) -> Result<ValidationPlan, ConfigError> {
        if self.fhir.version != SUPPORTED_FHIR_VERSION {
            return Err(ConfigError::FhirVersionMismatch {
                expected: SUPPORTED_FHIR_VERSION.to_string(),
                got: self.fhir.version.clone(),
            });
        }
        if self.reference.mode == ReferenceMode::Full && self.terminology.mode == TerminologyMode::Off {
            return Err(ConfigError::TerminologyRequiredForFullReferenceMode);
        }
        if self.exec.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount(0));
        }

        let mut phases: Vec<Arc<dyn Phase>> = vec![Arc::new(StructurePhase), Arc::new(PrimitivesPhase), Arc::new(CardinalityPhase)];
        if self.schema.validate_unknown_elements {
            phases.push(Arc::new(UnknownElementsPhase));
        }
        phases.push(Arc::new(FixedPatternPhase));
        if self.terminology.mode != TerminologyMode::Off {
            phases.push(Arc::new(TerminologyPhase));
        }
        if self.reference.mode != ReferenceMode::Off {
            phases.push(Arc::new(ReferencesPhase));
        }
        if self.extensions.enabled {
            phases.push(Arc::new(ExtensionsPhase));
        }
        phases.push(Arc::new(SlicingPhase));
        phases.push(Arc::new(BundlePhase));
        if self.constraints.mode != ConstraintsMode::Off {
            phases.push(Arc::new(ConstraintsPhase));
        }
        debug_assert!(PriorityClass::ALL.windows(2).all(|w| w[0] < w[1]), "priority classes must stay strictly ordered");

        tracing::info!(phase_count = phases.len(), max_errors = if self.exec.fail_fast { 1 } else { self.exec.max_issues }, "compiled validation plan");

        Ok(ValidationPlan {
            phases,
            max_errors: if self.exec.fail_fast { 1 } else { self.exec.max_issues },
            parallel_phases: self.exec.parallel_phases,
            phase_timeout: Duration::from_millis(self.exec.phase_timeout_ms),
            worker_count: self.exec.worker_count,
            pooling: self.exec.pooling,
        })
    }
}

pub struct ValidatorConfigBuilder {
    config: ValidatorConfig,
}

impl ValidatorConfigBuilder {
    pub fn preset(mut self, preset: Preset) -> Self {
        self.config = ValidatorConfig::preset(preset);
        self
    }

    pub fn schema_mode(mut self, validate_unknown_elements: bool) -> Self {
        self.config.schema.validate_unknown_elements = validate_unknown_elements;
        self
    }

    pub fn allow_modifier_extensions(mut self, allow: bool) -> Self {
        self.config.schema.allow_modifier_extensions = allow;
        self
    }

    pub fn terminology_mode(mut self, mode: TerminologyMode) -> Self {
        self.config.terminology.mode = mode;
        self
    }

    pub fn reference_mode(mut self, mode: ReferenceMode) -> Self {
        self.config.reference.mode = mode;
        self
    }

    pub fn extensions_enabled(mut self, enabled: bool) -> Self {
        self.config.extensions.enabled = enabled;
        self
    }

    pub fn constraints_mode(mut self, mode: ConstraintsMode) -> Self {
        self.config.constraints.mode = mode;
        self
    }

    pub fn best_practice(mut self, mode: BestPracticeMode) -> Self {
        self.config.constraints.best_practice = mode;
        self
    }

    pub fn suppress_constraint(mut self, key: impl Into<String>) -> Self {
        self.config.constraints.suppress.push(key.into());
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.exec.fail_fast = fail_fast;
        self
    }

    pub fn max_issues(mut self, max_issues: usize) -> Self {
        self.config.exec.max_issues = max_issues;
        self
    }

    pub fn parallel_phases(mut self, parallel: bool) -> Self {
        self.config.exec.parallel_phases = parallel;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.exec.worker_count = count;
        self
    }

    pub fn build(self) -> ValidatorConfig {
        self.config
    }
}
