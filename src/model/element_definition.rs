use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One type reference on an `ElementDefinition.type` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRef {
    pub code: String,
    #[serde(default, rename = "targetProfile", skip_serializing_if = "Vec::is_empty")]
    pub target_profile: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<String>,
}

impl TypeRef {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into(), target_profile: Vec::new(), profile: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub key: String,
    pub severity: ConstraintSeverity,
    #[serde(default)]
    pub human: Option<String>,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub strength: BindingStrength,
    #[serde(default, rename = "valueSet")]
    pub value_set: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscriminatorType {
    Value,
    Pattern,
    Exists,
    Type,
    Profile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discriminator {
    #[serde(rename = "type")]
    pub kind: DiscriminatorType,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlicingRules {
    Closed,
    Open,
    OpenAtEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slicing {
    #[serde(default)]
    pub discriminator: Vec<Discriminator>,
    pub rules: SlicingRules,
    #[serde(default)]
    pub ordered: bool,
}

/// One element in an SD snapshot.
///
/// `max` is kept as the raw FHIR string (`"1"`, `"*"`, `"0"`, ...); use
/// [`ElementDefinition::max_value`] to get the `-1`-for-unbounded integer form
/// invariant §3 calls for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDefinition {
    pub id: String,
    pub path: String,
    #[serde(default, rename = "sliceName")]
    pub slice_name: Option<String>,
    pub min: u32,
    pub max: String,
    #[serde(default, rename = "mustSupport")]
    pub must_support: bool,
    #[serde(default, rename = "type")]
    pub types: Vec<TypeRef>,
    #[serde(default)]
    pub fixed: Option<Value>,
    #[serde(default)]
    pub pattern: Option<Value>,
    #[serde(default)]
    pub binding: Option<Binding>,
    #[serde(default)]
    pub constraint: Vec<Constraint>,
    #[serde(default)]
    pub slicing: Option<Slicing>,
}

/// Sentinel for an unbounded `max`, matching invariant §3's internal `-1` convention.
pub const UNBOUNDED: i64 = -1;

impl ElementDefinition {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        let id = id.into();
        let path = path.into();
        Self {
            id,
            path,
            slice_name: None,
            min: 0,
            max: "1".to_string(),
            must_support: false,
            types: Vec::new(),
            fixed: None,
            pattern: None,
            binding: None,
            constraint: Vec::new(),
            slicing: None,
        }
    }

    /// Parses `max` into `-1` (unbounded) or the literal integer.
    pub fn max_value(&self) -> i64 {
        parse_max(&self.max)
    }

    pub fn is_slice(&self) -> bool {
        self.slice_name.is_some()
    }

    /// The element path with any trailing `:sliceName` segment stripped from `id`
    /// is already excluded from `path` in FHIR snapshots; this returns the parent
    /// path (`path` up to the last `.`).
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rfind('.').map(|idx| &self.path[..idx])
    }

    pub fn is_descendant_of(&self, ancestor_path: &str) -> bool {
        self.path.len() > ancestor_path.len()
            && self.path.starts_with(ancestor_path)
            && self.path.as_bytes()[ancestor_path.len()] == b'.'
    }

    pub fn is_choice_type(&self) -> bool {
        self.path.ends_with("[x]")
    }

    /// The element's own last path segment (`Patient.name.family` -> `family`).
    pub fn last_segment(&self) -> &str {
        match self.path.rfind('.') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    pub fn type_codes(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.code.as_str()).collect()
    }

    pub fn is_required(&self) -> bool {
        self.min > 0
    }

    pub fn is_array(&self) -> bool {
        self.max_value() != 1
    }

    pub fn cardinality_string(&self) -> String {
        format!("{}..{}", self.min, self.max)
    }
}

pub fn parse_max(max: &str) -> i64 {
    if max == "*" {
        UNBOUNDED
    } else {
        max.parse().unwrap_or(UNBOUNDED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_value_parses_star_as_unbounded() {
        let ed = ElementDefinition { max: "*".to_string(), ..ElementDefinition::new("Patient.name", "Patient.name") };
        assert_eq!(ed.max_value(), UNBOUNDED);
    }

    #[test]
    fn max_value_parses_literal_integer() {
        let ed = ElementDefinition { max: "2".to_string(), ..ElementDefinition::new("Patient.name", "Patient.name") };
        assert_eq!(ed.max_value(), 2);
    }

    #[test]
    fn is_descendant_of_requires_dot_boundary() {
        let ed = ElementDefinition::new("Patient.nameFoo", "Patient.nameFoo");
        assert!(!ed.is_descendant_of("Patient.name"));
        let ed2 = ElementDefinition::new("Patient.name.family", "Patient.name.family");
        assert!(ed2.is_descendant_of("Patient.name"));
    }

    #[test]
    fn choice_type_detection() {
        let ed = ElementDefinition::new("Observation.value[x]", "Observation.value[x]");
        assert!(ed.is_choice_type());
    }
}
