//! Extension-Slice Resolver (§4.10.1), a memoizing helper over the active
//! profile consulted by the Extensions phase.

use crate::model::{ElementDefinition, ElementIndex, SlicingRules, StructureDefinition};

/// One resolved extension slicing site: the declared `rules` (absent when
/// the location carries no `slicing` at all) and its defined slices, each
/// paired with the URL it requires.
pub struct ExtensionSliceInfo {
    pub rules: Option<SlicingRules>,
    pub slices: Vec<(String, Option<String>)>,
}

pub enum SliceOutcome {
    NotSliced,
    Defined,
    ClosedMismatch,
    OpenMismatch,
}

/// Normalizes a resource-relative element path by stripping array indices
/// (`name[0].given` -> `name.given`) — callers already strip leading `_` via
/// the walker's `lookup_key` convention, so this only handles indices.
pub fn normalize_element_path(path: &str) -> String {
    path.split('.')
        .map(|segment| segment.split('[').next().unwrap_or(segment))
        .collect::<Vec<_>>()
        .join(".")
}

pub fn resolve_extension_slicing(index: &ElementIndex, schema_path: &str) -> ExtensionSliceInfo {
    let extension_path = format!("{schema_path}.extension");
    let rules = index.base_slicing_element(&extension_path).and_then(|base| base.slicing.as_ref()).map(|s| s.rules);

    let slices = index
        .named_slices(&extension_path)
        .into_iter()
        .map(|slice| {
            let url = slice
                .types
                .iter()
                .filter(|t| t.code == "Extension")
                .find_map(|t| t.profile.first().cloned())
                .or_else(|| {
                    let fixed_url_id = format!("{}.url", slice.id);
                    index
                        .elements
                        .iter()
                        .find(|e| e.id == fixed_url_id)
                        .and_then(|e| e.fixed.as_ref())
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                });
            (slice.slice_name.clone().unwrap_or_default(), url)
        })
        .collect();

    ExtensionSliceInfo { rules, slices }
}

pub fn is_extension_allowed(info: &ExtensionSliceInfo, url: &str) -> SliceOutcome {
    let Some(rules) = info.rules else { return SliceOutcome::NotSliced };
    let matched = info.slices.iter().any(|(_, slice_url)| slice_url.as_deref() == Some(url));
    if matched {
        return SliceOutcome::Defined;
    }
    match rules {
        SlicingRules::Closed => SliceOutcome::ClosedMismatch,
        SlicingRules::Open | SlicingRules::OpenAtEnd => SliceOutcome::OpenMismatch,
    }
}

/// Outcome of locating a sub-extension inside its parent extension's own
/// snapshot (§4.10 step 4). Sub-extension `.url` values are slice names local
/// to the parent (`ombCategory`, `detailed`, `text` on us-core-race) rather
/// than independently published canonicals, so they're never looked up
/// through the profile resolver.
pub enum SubExtensionLookup<'a> {
    Found {
        /// The matched slice's element id (`Extension.extension:ombCategory`),
        /// used to locate its own `.value[x]`/nested-slicing children by id.
        slice_id: String,
        value_element: Option<&'a ElementDefinition>,
    },
    NotDefined,
}

/// Resolves one sub-extension against `index` (the parent extension's own
/// `ElementIndex`), matching by slice type profile or fixed `.url` exactly as
/// [`resolve_extension_slicing`] already does for top-level slices.
/// `schema_path` is the accumulated element path at this nesting depth
/// (`"Extension"` for a direct child, growing by `.extension` per level).
pub fn resolve_sub_extension<'a>(index: &'a ElementIndex, schema_path: &str, url: &str) -> SubExtensionLookup<'a> {
    let info = resolve_extension_slicing(index, schema_path);
    let Some((slice_name, _)) = info.slices.iter().find(|(_, slice_url)| slice_url.as_deref() == Some(url)) else {
        return SubExtensionLookup::NotDefined;
    };
    let slice_id = format!("{schema_path}.extension:{slice_name}");
    let value_element = index.elements.iter().find(|e| e.id == format!("{slice_id}.value[x]"));
    SubExtensionLookup::Found { slice_id, value_element }
}

/// Whether `context_entry` (one `StructureDefinition.context[].expression`)
/// matches the current location (§4.10 step 6), covering the common cases:
/// the universal `Element`/`Resource`/`DomainResource` wildcards, an exact
/// resource-type or path match, and an element-type match (`Address`
/// matching any `.address[*]` slot, compared by last path segment).
pub fn context_matches(context_entry: &str, resource_type: &str, schema_path: &str, last_segment_type: Option<&str>) -> bool {
    if matches!(context_entry, "Element" | "Resource" | "DomainResource") {
        return true;
    }
    if context_entry == resource_type || context_entry == schema_path {
        return true;
    }
    if let Some(t) = last_segment_type {
        if context_entry.eq_ignore_ascii_case(t) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ElementDefinition, Slicing, TypeRef};

    #[test]
    fn resolves_slices_and_detects_closed_mismatch() {
        let mut base = ElementDefinition::new("Patient.extension", "Patient.extension");
        base.slicing = Some(Slicing { discriminator: vec![], rules: SlicingRules::Closed, ordered: false });
        let mut race = ElementDefinition::new("Patient.extension:race", "Patient.extension");
        race.slice_name = Some("race".into());
        race.types = vec![TypeRef { code: "Extension".into(), target_profile: vec![], profile: vec!["http://example.org/race".into()] }];

        let index = ElementIndex::build(&[ElementDefinition::new("Patient", "Patient"), base, race]);
        let info = resolve_extension_slicing(&index, "Patient");
        assert!(matches!(is_extension_allowed(&info, "http://example.org/race"), SliceOutcome::Defined));
        assert!(matches!(is_extension_allowed(&info, "http://example.org/other"), SliceOutcome::ClosedMismatch));
    }

    #[test]
    fn not_sliced_when_no_base_slicing_element() {
        let index = ElementIndex::build(&[ElementDefinition::new("Patient", "Patient")]);
        let info = resolve_extension_slicing(&index, "Patient");
        assert!(matches!(is_extension_allowed(&info, "http://example.org/x"), SliceOutcome::NotSliced));
    }
}
