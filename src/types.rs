//! Closed, finite FHIR type-name facts shared by the walker (§4.1), the
//! unknown-elements phase (§4.6), and the primitives phase (§4.4). Exposed as
//! constants per SPEC_FULL.md §9 "Choice types".

/// FHIR primitive type codes (lowercase per the spec).
pub const PRIMITIVE_TYPES: &[&str] = &[
    "boolean", "integer", "string", "decimal", "uri", "url", "canonical", "base64Binary",
    "instant", "date", "dateTime", "time", "code", "oid", "id", "markdown", "unsignedInt",
    "positiveInt", "uuid", "xhtml", "integer64",
];

pub fn is_primitive_type(code: &str) -> bool {
    PRIMITIVE_TYPES.contains(&code)
}

/// Two FHIR data types that do not switch SD context when descended into —
/// their children remain indexed in the *current* SD's snapshot at longer
/// paths, per §4.1 step 4.
pub const CONTEXT_PRESERVING_TYPES: &[&str] = &["BackboneElement", "Element"];

pub fn preserves_context(code: &str) -> bool {
    CONTEXT_PRESERVING_TYPES.contains(&code)
}

/// Closed list of capitalized type-name suffixes usable on a choice element
/// (`value[x]` -> `valueString`, `valueCodeableConcept`, ...). Covers every
/// R4 primitive and complex datatype.
pub const CHOICE_TYPE_SUFFIXES: &[&str] = &[
    "Base64Binary", "Boolean", "Canonical", "Code", "Date", "DateTime", "Decimal", "Id",
    "Instant", "Integer", "Integer64", "Markdown", "Oid", "PositiveInt", "String", "Time",
    "UnsignedInt", "Uri", "Url", "Uuid",
    "Address", "Age", "Annotation", "Attachment", "CodeableConcept", "CodeableReference",
    "Coding", "ContactPoint", "Count", "Distance", "Duration", "HumanName", "Identifier",
    "Money", "Period", "Quantity", "Range", "Ratio", "RatioRange", "Reference", "SampledData",
    "Signature", "Timing", "ContactDetail", "Contributor", "DataRequirement", "Expression",
    "ParameterDefinition", "RelatedArtifact", "TriggerDefinition", "UsageContext", "Dosage",
    "Meta",
];

/// Returns the suffix itself when `candidate` is exactly one of the closed
/// choice-type suffixes (longest-match isn't needed: the list has no
/// suffix that is a strict prefix of another).
pub fn choice_suffix(candidate: &str) -> Option<&'static str> {
    CHOICE_TYPE_SUFFIXES.iter().find(|&&s| s == candidate).copied()
}

/// Ubiquitous metadata keys every resource/BackboneElement may carry without
/// an explicit ED (§4.6).
pub const UBIQUITOUS_METADATA_KEYS: &[&str] = &[
    "id", "meta", "versionId", "lastUpdated", "source", "profile", "security", "tag",
    "implicitRules", "language", "text", "status", "div", "contained",
];

pub fn is_ubiquitous_metadata_key(key: &str) -> bool {
    UBIQUITOUS_METADATA_KEYS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_suffix_matches_known_suffixes() {
        assert_eq!(choice_suffix("String"), Some("String"));
        assert_eq!(choice_suffix("CodeableConcept"), Some("CodeableConcept"));
        assert_eq!(choice_suffix("Bogus"), None);
    }

    #[test]
    fn backbone_and_element_preserve_context() {
        assert!(preserves_context("BackboneElement"));
        assert!(preserves_context("Element"));
        assert!(!preserves_context("HumanName"));
    }
}
