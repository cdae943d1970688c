use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::element_definition::ElementDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureDefinitionKind {
    Resource,
    ComplexType,
    PrimitiveType,
    Logical,
}

/// One entry of `StructureDefinition.context`, restricted to the forms
/// `ElementDefinition.context.type == "element"` actually uses in practice:
/// a dotted FHIRPath-ish expression (`Patient`, `Patient.name`, `Element`, ...).
pub type ContextExpression = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinition {
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub kind: StructureDefinitionKind,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default, rename = "isModifier")]
    pub is_modifier: bool,
    #[serde(default)]
    pub context: Vec<ContextExpression>,
    #[serde(default)]
    pub snapshot: Vec<ElementDefinition>,
    #[serde(default, rename = "baseDefinition")]
    pub base_definition: Option<String>,
}

impl StructureDefinition {
    pub fn new(url: impl Into<String>, type_name: impl Into<String>, kind: StructureDefinitionKind) -> Self {
        let type_name = type_name.into();
        Self {
            url: url.into(),
            name: type_name.clone(),
            type_name,
            kind,
            is_abstract: false,
            is_modifier: false,
            context: Vec::new(),
            snapshot: Vec::new(),
            base_definition: None,
        }
    }

    pub fn is_resource(&self) -> bool {
        self.kind == StructureDefinitionKind::Resource
    }

    pub fn is_extension(&self) -> bool {
        self.type_name == "Extension"
    }

    pub fn get_root_element(&self) -> Option<&ElementDefinition> {
        self.snapshot.first()
    }

    pub fn get_element_by_path(&self, path: &str) -> Option<&ElementDefinition> {
        self.snapshot.iter().find(|e| e.path == path && !e.is_slice())
    }

    pub fn get_elements(&self, path: &str) -> Vec<&ElementDefinition> {
        self.snapshot.iter().filter(|e| e.path == path).collect()
    }

    /// Direct children of `parent_path` — one level deeper only, matching
    /// `fhir-models::Snapshot::get_children`'s depth-filtered semantics.
    pub fn get_children(&self, parent_path: &str) -> Vec<&ElementDefinition> {
        let target_depth = parent_path.matches('.').count() + 1;
        self.snapshot
            .iter()
            .filter(|e| e.is_descendant_of(parent_path) && e.path.matches('.').count() == target_depth)
            .collect()
    }
}

/// A path-indexed view over one SD's snapshot, built once and cached by SD URL.
///
/// Grounded in `ferrum-validator::steps::profiles::ProfileElementIndex` and the
/// earlier `ElementIndex` in `steps/schema.rs`: three maps built in a single pass
/// over the snapshot so every phase that needs "the ED at this path" or "the
/// children of this path" or "the slices declared at this path" pays for the
/// traversal exactly once per SD.
#[derive(Debug, Clone)]
pub struct ElementIndex {
    pub by_path: HashMap<String, usize>,
    pub children_by_parent: HashMap<String, Vec<usize>>,
    pub slicing_by_path: HashMap<String, Vec<usize>>,
    /// Choice-type (`foo[x]`) elements, keyed by parent path — consulted by
    /// the walker (§4.1) to resolve keys like `valueString` against a
    /// declared `value[x]` element.
    pub choice_by_parent: HashMap<String, Vec<usize>>,
    pub elements: Vec<ElementDefinition>,
}

impl ElementIndex {
    pub fn build(snapshot: &[ElementDefinition]) -> Self {
        let elements = snapshot.to_vec();
        let mut by_path = HashMap::new();
        let mut children_by_parent: HashMap<String, Vec<usize>> = HashMap::new();
        let mut slicing_by_path: HashMap<String, Vec<usize>> = HashMap::new();
        let mut choice_by_parent: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, ed) in elements.iter().enumerate() {
            if !ed.is_slice() {
                by_path.entry(ed.path.clone()).or_insert(idx);
            }
            if let Some(parent) = ed.parent_path() {
                children_by_parent.entry(parent.to_string()).or_default().push(idx);
                if ed.is_choice_type() {
                    choice_by_parent.entry(parent.to_string()).or_default().push(idx);
                }
            }
            if ed.slicing.is_some() || ed.is_slice() {
                slicing_by_path.entry(ed.path.clone()).or_default().push(idx);
            }
        }

        Self { by_path, children_by_parent, slicing_by_path, choice_by_parent, elements }
    }

    /// Resolves a JSON key like `valueString` against a declared `value[x]`
    /// element whose parent path is `parent_path`. Returns the element and
    /// the concrete FHIR type suffix (`"String"`) on match.
    pub fn resolve_choice_variant(&self, parent_path: &str, key: &str) -> Option<(&ElementDefinition, &'static str)> {
        let candidates = self.choice_by_parent.get(parent_path)?;
        for &idx in candidates {
            let ed = &self.elements[idx];
            let base_name = ed.last_segment().trim_end_matches("[x]");
            if let Some(rest) = key.strip_prefix(base_name) {
                if let Some(suffix) = crate::types::choice_suffix(rest) {
                    return Some((ed, suffix));
                }
            }
        }
        None
    }

    pub fn get(&self, path: &str) -> Option<&ElementDefinition> {
        self.by_path.get(path).map(|&idx| &self.elements[idx])
    }

    pub fn children(&self, parent_path: &str) -> Vec<&ElementDefinition> {
        self.children_by_parent
            .get(parent_path)
            .map(|idxs| idxs.iter().map(|&i| &self.elements[i]).collect())
            .unwrap_or_default()
    }

    /// All EDs sharing `path` (base sliced ED plus its slices), in snapshot order.
    pub fn slices_at(&self, path: &str) -> Vec<&ElementDefinition> {
        self.slicing_by_path
            .get(path)
            .map(|idxs| idxs.iter().map(|&i| &self.elements[i]).collect())
            .unwrap_or_default()
    }

    /// Base (non-slice) ED carrying the `slicing` declaration at `path`, if any.
    pub fn base_slicing_element(&self, path: &str) -> Option<&ElementDefinition> {
        self.elements.iter().find(|e| e.path == path && e.slicing.is_some())
    }

    /// Named slices sharing `path`, in declaration order.
    pub fn named_slices(&self, path: &str) -> Vec<&ElementDefinition> {
        self.elements.iter().filter(|e| e.path == path && e.is_slice()).collect()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::element_definition::{ElementDefinition, SlicingRules, Slicing};

    fn sd_with(elements: Vec<ElementDefinition>) -> StructureDefinition {
        let mut sd = StructureDefinition::new(
            "http://hl7.org/fhir/StructureDefinition/Patient",
            "Patient",
            StructureDefinitionKind::Resource,
        );
        sd.snapshot = elements;
        sd
    }

    #[test]
    fn get_children_is_one_level_deep_only() {
        let sd = sd_with(vec![
            ElementDefinition::new("Patient", "Patient"),
            ElementDefinition::new("Patient.name", "Patient.name"),
            ElementDefinition::new("Patient.name.family", "Patient.name.family"),
            ElementDefinition::new("Patient.name.given", "Patient.name.given"),
        ]);
        let children = sd.get_children("Patient");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path, "Patient.name");
    }

    #[test]
    fn element_index_groups_slices_by_path() {
        let mut base = ElementDefinition::new("Patient.extension", "Patient.extension");
        base.slicing = Some(Slicing { discriminator: vec![], rules: SlicingRules::Closed, ordered: false });
        let mut slice = ElementDefinition::new("Patient.extension:race", "Patient.extension");
        slice.slice_name = Some("race".to_string());

        let sd = sd_with(vec![base, slice]);
        let index = ElementIndex::build(&sd.snapshot);
        assert_eq!(index.slices_at("Patient.extension").len(), 2);
        assert_eq!(index.named_slices("Patient.extension").len(), 1);
    }
}
