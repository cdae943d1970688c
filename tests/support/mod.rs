//! Integration-test-facing doubles. A separate copy from `src/test_support.rs`:
//! `tests/*.rs` compile against this crate's public API only, so internal
//! `#[cfg(test)]` items aren't reachable from here.

use std::collections::HashMap;

use fhir_validator_core::cancel::CancellationToken;
use fhir_validator_core::interfaces::{CodeValidation, ProfileResolver, TerminologyService};
use fhir_validator_core::model::StructureDefinition;
use serde_json::Value;

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

/// A terminology double backed by an explicit `(system, code) -> display` map;
/// anything not in the map is reported invalid.
#[derive(Default)]
pub struct MapTerminology {
    pub valid_codes: HashMap<(String, String), Option<String>>,
}

impl MapTerminology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, system: &str, code: &str, display: Option<&str>) {
        self.valid_codes.insert((system.to_string(), code.to_string()), display.map(str::to_string));
    }
}

impl TerminologyService for MapTerminology {
    fn validate_code(&self, _ctx: &CancellationToken, system: &str, code: &str, _value_set: &str) -> Option<CodeValidation> {
        match self.valid_codes.get(&(system.to_string(), code.to_string())) {
            Some(display) => Some(CodeValidation { valid: true, code: Some(code.to_string()), system: Some(system.to_string()), display: display.clone() }),
            None => Some(CodeValidation { valid: false, code: Some(code.to_string()), system: Some(system.to_string()), display: None }),
        }
    }

    fn expand_value_set(&self, _ctx: &CancellationToken, _url: &str) -> Option<Value> {
        None
    }
}
