//! Injected service interfaces (§6). The core depends only on these traits;
//! concrete implementations (package-backed profile resolution, a real
//! terminology server, reference indexing, a FHIRPath engine) are out of
//! scope (§1) and are the integrating application's concern.

use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::model::StructureDefinition;

/// Outcome of one `ValidateCode` call.
#[derive(Debug, Clone, Default)]
pub struct CodeValidation {
    pub valid: bool,
    pub code: Option<String>,
    pub system: Option<String>,
    pub display: Option<String>,
}

/// Outcome of one `ResolveReference` call.
#[derive(Debug, Clone, Default)]
pub struct ReferenceResolution {
    pub found: bool,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
}

/// Resolves canonical StructureDefinitions by URL or by base resource/type name.
pub trait ProfileResolver: Send + Sync {
    fn fetch_structure_definition(&self, ctx: &CancellationToken, url: &str) -> Option<StructureDefinition>;
    fn fetch_structure_definition_by_type(&self, ctx: &CancellationToken, type_name: &str) -> Option<StructureDefinition>;
}

/// Validates codes/Codings against ValueSets and CodeSystems.
pub trait TerminologyService: Send + Sync {
    fn validate_code(&self, ctx: &CancellationToken, system: &str, code: &str, value_set: &str) -> Option<CodeValidation>;
    fn expand_value_set(&self, ctx: &CancellationToken, url: &str) -> Option<Value>;
}

/// Resolves `Reference.reference` values to concrete resources.
pub trait ReferenceResolver: Send + Sync {
    fn resolve_reference(&self, ctx: &CancellationToken, reference: &str) -> ReferenceResolution;
}

/// Evaluates a FHIRPath boolean expression against a context value.
pub trait FhirPathEvaluator: Send + Sync {
    fn evaluate(&self, ctx: &CancellationToken, expression: &str, context_value: &Value) -> Option<bool>;
}
