//! In-memory test doubles shared by unit tests across this crate. Grounded in
//! `ferrum-validator`'s `tests/test_support/mod.rs` `OverlayFhirContext`
//! pattern, simplified to stand alone (no base context to layer over).
#![cfg(test)]

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::interfaces::{CodeValidation, FhirPathEvaluator, ProfileResolver, ReferenceResolution, ReferenceResolver, TerminologyService};
use crate::model::StructureDefinition;

pub struct StaticProfileResolver {
    by_url: HashMap<String, StructureDefinition>,
    by_type: HashMap<String, StructureDefinition>,
}

impl StaticProfileResolver {
    pub fn from_sds(sds: Vec<StructureDefinition>) -> Self {
        let mut by_url = HashMap::new();
        let mut by_type = HashMap::new();
        for sd in sds {
            by_type.entry(sd.type_name.clone()).or_insert_with(|| sd.clone());
            by_url.insert(sd.url.clone(), sd);
        }
        Self { by_url, by_type }
    }
}

impl ProfileResolver for StaticProfileResolver {
    fn fetch_structure_definition(&self, _ctx: &CancellationToken, url: &str) -> Option<StructureDefinition> {
        self.by_url.get(url).cloned()
    }

    fn fetch_structure_definition_by_type(&self, _ctx: &CancellationToken, type_name: &str) -> Option<StructureDefinition> {
        self.by_type.get(type_name).cloned()
    }
}

/// Always reports every code invalid — useful for exercising severity
/// mapping without needing a real terminology dataset.
pub struct AlwaysInvalidTerminology;

impl TerminologyService for AlwaysInvalidTerminology {
    fn validate_code(&self, _ctx: &CancellationToken, system: &str, code: &str, _value_set: &str) -> Option<CodeValidation> {
        Some(CodeValidation { valid: false, code: Some(code.to_string()), system: Some(system.to_string()), display: None })
    }

    fn expand_value_set(&self, _ctx: &CancellationToken, _url: &str) -> Option<Value> {
        None
    }
}

/// A terminology double backed by an explicit map of `(system, code) ->
/// display`; anything not in the map is reported invalid.
#[derive(Default)]
pub struct MapTerminology {
    pub valid_codes: HashMap<(String, String), Option<String>>,
}

impl MapTerminology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `code` as valid for `system` (the first argument here is
    /// actually unused by lookup — kept for call-site readability — lookup
    /// key is `(system, code)`), with an optional canonical display.
    pub fn set(&mut self, _value_set_hint: &str, system: &str, code: &str, display: Option<&str>) {
        self.valid_codes.insert((system.to_string(), code.to_string()), display.map(str::to_string));
    }
}

impl TerminologyService for MapTerminology {
    fn validate_code(&self, _ctx: &CancellationToken, system: &str, code: &str, _value_set: &str) -> Option<CodeValidation> {
        match self.valid_codes.get(&(system.to_string(), code.to_string())) {
            Some(display) => Some(CodeValidation {
                valid: true,
                code: Some(code.to_string()),
                system: Some(system.to_string()),
                display: display.clone(),
            }),
            None => Some(CodeValidation { valid: false, code: Some(code.to_string()), system: Some(system.to_string()), display: None }),
        }
    }

    fn expand_value_set(&self, _ctx: &CancellationToken, _url: &str) -> Option<Value> {
        None
    }
}

pub struct NullReferenceResolver;

impl ReferenceResolver for NullReferenceResolver {
    fn resolve_reference(&self, _ctx: &CancellationToken, _reference: &str) -> ReferenceResolution {
        ReferenceResolution::default()
    }
}

/// Resolves references present in an in-memory set, everything else unfound.
#[derive(Default)]
pub struct MapReferenceResolver {
    pub known: Mutex<HashMap<String, (String, String)>>,
}

impl ReferenceResolver for MapReferenceResolver {
    fn resolve_reference(&self, _ctx: &CancellationToken, reference: &str) -> ReferenceResolution {
        match self.known.lock().unwrap().get(reference) {
            Some((rt, id)) => ReferenceResolution { found: true, resource_type: Some(rt.clone()), resource_id: Some(id.clone()) },
            None => ReferenceResolution::default(),
        }
    }
}

pub struct NullFhirPathEvaluator;

impl FhirPathEvaluator for NullFhirPathEvaluator {
    fn evaluate(&self, _ctx: &CancellationToken, _expression: &str, _context_value: &Value) -> Option<bool> {
        None
    }
}
