use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::interfaces::{FhirPathEvaluator, ProfileResolver, ReferenceResolver, TerminologyService};
use crate::issue::ValidationOutcome;
use crate::model::{ElementIndex, StructureDefinition};

/// Reference-checking depth (§6 configuration options, `reference.mode`).
/// Also a `config.rs` value type, hence the derives: `steps/*` never depends
/// on `config.rs`, but `config.rs` is free to depend back on this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceMode {
    Off,
    TypeOnly,
    Full,
}

/// How `best-practice` constraints (FHIR's non-normative recommendations)
/// are reported (§6 configuration options).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BestPracticeMode {
    Ignore,
    Warn,
    Error,
}

/// How thoroughly the constraints phase evaluates FHIRPath invariants
/// (§6 configuration options, `constraints.mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintsMode {
    Off,
    BuiltinOnly,
    Full,
}

/// The subset of a compiled [`crate::config::ValidatorConfig`] that phases
/// read at run time. Kept separate from the config builder so `steps/*`
/// never depends on `config.rs`.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub reference_mode: ReferenceMode,
    pub terminology_display_as_warning: bool,
    pub best_practice: BestPracticeMode,
    pub constraints_mode: ConstraintsMode,
    pub suppressed_constraints: Vec<String>,
    pub allow_modifier_extensions: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            reference_mode: ReferenceMode::TypeOnly,
            terminology_display_as_warning: true,
            best_practice: BestPracticeMode::Warn,
            constraints_mode: ConstraintsMode::Full,
            suppressed_constraints: Vec::new(),
            allow_modifier_extensions: true,
        }
    }
}

/// Resolves and caches StructureDefinitions and their [`ElementIndex`] by SD
/// URL, per §3 Lifecycle ("ElementIndexes are cached per SD by path") and §9
/// ("cache SDs by URL and per-SD element indexes by path in an arena keyed
/// on URL"). Shared (`Arc`) across every walk in a validation run, and safe
/// to share across concurrent runs as long as the underlying
/// [`ProfileResolver`] is thread-safe (§5).
pub struct TypeResolver {
    resolver: Arc<dyn ProfileResolver>,
    sd_by_url: Mutex<HashMap<String, Arc<StructureDefinition>>>,
    sd_by_type: Mutex<HashMap<String, Arc<StructureDefinition>>>,
    index_by_url: Mutex<HashMap<String, Arc<ElementIndex>>>,
}

impl TypeResolver {
    pub fn new(resolver: Arc<dyn ProfileResolver>) -> Self {
        Self {
            resolver,
            sd_by_url: Mutex::new(HashMap::new()),
            sd_by_type: Mutex::new(HashMap::new()),
            index_by_url: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve_by_url(&self, ctx: &CancellationToken, url: &str) -> Option<Arc<StructureDefinition>> {
        if let Some(sd) = self.sd_by_url.lock().unwrap().get(url) {
            return Some(sd.clone());
        }
        let sd = Arc::new(self.resolver.fetch_structure_definition(ctx, url)?);
        self.sd_by_url.lock().unwrap().insert(url.to_string(), sd.clone());
        Some(sd)
    }

    pub fn resolve_by_type(&self, ctx: &CancellationToken, type_name: &str) -> Option<Arc<StructureDefinition>> {
        if let Some(sd) = self.sd_by_type.lock().unwrap().get(type_name) {
            return Some(sd.clone());
        }
        let sd = Arc::new(self.resolver.fetch_structure_definition_by_type(ctx, type_name)?);
        self.sd_by_type.lock().unwrap().insert(type_name.to_string(), sd.clone());
        self.sd_by_url.lock().unwrap().insert(sd.url.clone(), sd.clone());
        Some(sd)
    }

    pub fn index_for(&self, sd: &Arc<StructureDefinition>) -> Arc<ElementIndex> {
        if let Some(idx) = self.index_by_url.lock().unwrap().get(&sd.url) {
            return idx.clone();
        }
        let index = Arc::new(ElementIndex::build(&sd.snapshot));
        self.index_by_url.lock().unwrap().insert(sd.url.clone(), index.clone());
        index
    }
}

/// Per-validation mutable context (§3 "Pipeline Context"). Created fresh per
/// validation; the `Arc`s around `resource` and `root_sd` let phases run
/// concurrently (§5) without cloning the resource tree.
pub struct PipelineContext {
    pub resource_type: String,
    pub resource: Arc<Value>,
    pub declared_profiles: Vec<String>,
    pub root_sd: Option<Arc<StructureDefinition>>,
    pub root_index: Option<Arc<ElementIndex>>,
    pub result: Mutex<ValidationOutcome>,
    pub type_resolver: Arc<TypeResolver>,
    pub cancel: CancellationToken,
    pub terminology: Option<Arc<dyn TerminologyService>>,
    pub reference_resolver: Option<Arc<dyn ReferenceResolver>>,
    pub fhirpath: Option<Arc<dyn FhirPathEvaluator>>,
    pub settings: RuntimeSettings,
}

impl PipelineContext {
    pub fn append(&self, issues: impl IntoIterator<Item = crate::issue::ValidationIssue>) {
        self.result.lock().unwrap().extend(issues);
    }

    pub fn error_count(&self) -> usize {
        self.result.lock().unwrap().error_count()
    }

    /// Consumes the context, returning the accumulated outcome. Matches §3's
    /// "released after pipeline completion" lifecycle note.
    pub fn into_outcome(self) -> ValidationOutcome {
        self.result.into_inner().unwrap()
    }
}
