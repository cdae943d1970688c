//! Type-aware tree walker (§4.1).

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::cancel::CancellationToken;
use crate::context::TypeResolver;
use crate::model::{ElementDefinition, ElementIndex, StructureDefinition};
use crate::types::{is_primitive_type, preserves_context};

/// One visited node, handed to the walker's consumer callback.
pub struct WalkContext<'a> {
    /// Absolute path with array indices, e.g. `Patient.name[0].family`.
    pub path: String,
    /// Schema path without indices, e.g. `Patient.name.family`.
    pub schema_path: String,
    pub key: String,
    pub value: &'a Value,
    pub element: Option<ElementDefinition>,
    pub is_root: bool,
    pub is_array_item: bool,
    pub is_object: bool,
    pub is_array: bool,
    pub is_choice_type: bool,
    pub concrete_type: Option<String>,
    pub type_name: String,
    pub index: Arc<ElementIndex>,
}

impl<'a> WalkContext<'a> {
    pub fn ed_type_codes(&self) -> Vec<&str> {
        self.element.as_ref().map(|e| e.type_codes()).unwrap_or_default()
    }
}

/// Entry point: walk `resource` under `root_sd`'s snapshot, calling `visit`
/// for every field in the tree except the root object itself and its
/// `resourceType` key.
pub fn walk(
    resource: &Value,
    root_sd: &Arc<StructureDefinition>,
    type_resolver: &TypeResolver,
    cancel: &CancellationToken,
    visit: &mut dyn FnMut(&WalkContext),
) {
    let Value::Object(obj) = resource else { return };
    let root_index = type_resolver.index_for(root_sd);
    walk_object(obj, &root_sd.type_name, &root_sd.type_name, root_sd, &root_index, type_resolver, cancel, visit, true);
}

#[allow(clippy::too_many_arguments)]
fn walk_object(
    obj: &Map<String, Value>,
    path: &str,
    schema_path: &str,
    sd: &Arc<StructureDefinition>,
    index: &Arc<ElementIndex>,
    type_resolver: &TypeResolver,
    cancel: &CancellationToken,
    visit: &mut dyn FnMut(&WalkContext),
    is_root: bool,
) {
    for (key, value) in obj {
        if cancel.is_cancelled() {
            return;
        }
        if is_root && key == "resourceType" {
            continue;
        }

        let lookup_key = key.strip_prefix('_').unwrap_or(key.as_str());
        let element_schema_path = format!("{schema_path}.{lookup_key}");
        let element_path = format!("{path}.{key}");

        let mut resolved_ed = index.get(&element_schema_path).cloned();
        let mut concrete_type: Option<String> = None;
        let mut is_choice = false;

        if resolved_ed.is_none() {
            if let Some((ed, suffix)) = index.resolve_choice_variant(schema_path, lookup_key) {
                resolved_ed = Some(ed.clone());
                concrete_type = Some(suffix.to_string());
                is_choice = true;
            }
        }

        let type_name = if is_choice {
            concrete_type.clone().unwrap_or_default()
        } else {
            resolved_ed.as_ref().and_then(|ed| ed.type_codes().first().map(|s| s.to_string())).unwrap_or_default()
        };

        let wc = WalkContext {
            path: element_path.clone(),
            schema_path: element_schema_path.clone(),
            key: key.clone(),
            value,
            element: resolved_ed.clone(),
            is_root: false,
            is_array_item: false,
            is_object: value.is_object(),
            is_array: value.is_array(),
            is_choice_type: is_choice,
            concrete_type: concrete_type.clone(),
            type_name: type_name.clone(),
            index: index.clone(),
        };
        visit(&wc);

        match value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let item_path = format!("{element_path}[{i}]");
                    let item_wc = WalkContext {
                        path: item_path.clone(),
                        schema_path: element_schema_path.clone(),
                        key: key.clone(),
                        value: item,
                        element: resolved_ed.clone(),
                        is_root: false,
                        is_array_item: true,
                        is_object: item.is_object(),
                        is_array: false,
                        is_choice_type: is_choice,
                        concrete_type: concrete_type.clone(),
                        type_name: type_name.clone(),
                        index: index.clone(),
                    };
                    visit(&item_wc);
                    if let Value::Object(item_obj) = item {
                        descend(
                            item_obj,
                            &item_path,
                            &element_schema_path,
                            resolved_ed.as_ref(),
                            sd,
                            index,
                            type_resolver,
                            cancel,
                            visit,
                        );
                    }
                }
            }
            Value::Object(nested) => {
                descend(
                    nested,
                    &element_path,
                    &element_schema_path,
                    resolved_ed.as_ref(),
                    sd,
                    index,
                    type_resolver,
                    cancel,
                    visit,
                );
            }
            _ => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn descend(
    obj: &Map<String, Value>,
    path: &str,
    schema_path: &str,
    element: Option<&ElementDefinition>,
    current_sd: &Arc<StructureDefinition>,
    current_index: &Arc<ElementIndex>,
    type_resolver: &TypeResolver,
    cancel: &CancellationToken,
    visit: &mut dyn FnMut(&WalkContext),
) {
    if cancel.is_cancelled() {
        return;
    }

    if let Some(ed) = element {
        let non_primitive: Vec<&str> =
            ed.types.iter().map(|t| t.code.as_str()).filter(|c| !is_primitive_type(c)).collect();
        if non_primitive.len() == 1 {
            let code = non_primitive[0];
            if !preserves_context(code) {
                let type_ref = ed.types.iter().find(|t| t.code == code);
                let resolved = match type_ref.and_then(|t| t.profile.first()) {
                    Some(url) => type_resolver.resolve_by_url(cancel, url),
                    None => type_resolver.resolve_by_type(cancel, code),
                };
                if let Some(new_sd) = resolved {
                    let new_index = type_resolver.index_for(&new_sd);
                    let new_schema_root = new_sd.type_name.clone();
                    walk_object(obj, path, &new_schema_root, &new_sd, &new_index, type_resolver, cancel, visit, false);
                    return;
                }
                // Missing SD: keep walking under the current (now mismatched)
                // index. Descendant paths won't resolve to any ED, matching
                // §4.1's "children reported with no ED".
            }
        }
    }
    walk_object(obj, path, schema_path, current_sd, current_index, type_resolver, cancel, visit, false);
}
