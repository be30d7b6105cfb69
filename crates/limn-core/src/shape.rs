//! Post-processing chain for trees returned by the graph query adapter.
//!
//! Four ordered, structure-preserving transforms: frame, filter properties,
//! link values, expand identifier labels. Each is a pure visitor over the
//! `Scalar | List | Map` shape of [`serde_json::Value`]; the lookups they
//! need (labels, formatter URLs) are collected up front by the resolver and
//! passed in as plain maps.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map as JsonMap, Value};

use crate::config::{is_entity_id, Context};

/// Properties that are never rewritten into `{value, url}` references.
pub const PLAIN_PROPERTIES: &[&str] = &[
    "id",
    "label",
    "type",
    "description",
    "date modified",
    "coordinate location",
    "coords",
];

/// Project the raw tree onto the closed shape declared by the context:
/// the identifier, the type, and every non-prefix context property. Requires
/// a node of the declared entity type; yields an empty record otherwise.
#[must_use]
pub fn frame(tree: &Value, context: &Context, entity_type: &str) -> JsonMap<String, Value> {
    let Some(graph) = tree.get("@graph").and_then(Value::as_array) else {
        return JsonMap::new();
    };
    let id_alias = context.id_alias();
    for node in graph.iter().filter_map(Value::as_object) {
        if !matches_type(node, entity_type) {
            continue;
        }
        let mut framed = JsonMap::new();
        if let Some(id) = node.get(id_alias) {
            framed.insert(id_alias.to_string(), id.clone());
        }
        if let Some(t) = node.get("@type") {
            framed.insert("@type".to_string(), t.clone());
        }
        for name in context.property_names() {
            if name == id_alias {
                continue;
            }
            if let Some(value) = node.get(name) {
                framed.insert(name.to_string(), value.clone());
            }
        }
        return framed;
    }
    JsonMap::new()
}

fn matches_type(node: &JsonMap<String, Value>, entity_type: &str) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == entity_type,
        Some(Value::Array(types)) => types.iter().any(|t| t == entity_type),
        _ => false,
    }
}

/// Drop graph-internal bookkeeping properties and values that are empty
/// after recursive filtering.
#[must_use]
pub fn filter_props(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(filter_props)
                .filter(|v| !is_empty(v))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !is_bookkeeping(k))
                .map(|(k, v)| (k, filter_props(v)))
                .filter(|(_, v)| !is_empty(v))
                .collect(),
        ),
        other => other,
    }
}

fn is_bookkeeping(key: &str) -> bool {
    key.starts_with("p:P")
        || key.starts_with("wikibase:")
        || matches!(
            key,
            "rdfs:label" | "schema:description" | "schema:version" | "skos:altLabel"
        )
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Keys that are candidates for formatter URL resolution: every map key in
/// the tree that is not a plain property or a framing keyword.
#[must_use]
pub fn collect_linkable_keys(value: &Value) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    collect_keys(value, &mut keys);
    keys
}

fn collect_keys(value: &Value, keys: &mut BTreeSet<String>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_keys(item, keys);
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                if !PLAIN_PROPERTIES.contains(&key.as_str()) && !key.starts_with('@') {
                    keys.insert(key.clone());
                }
                collect_keys(nested, keys);
            }
        }
        _ => {}
    }
}

/// Rewrite scalar values of formatted-external-identifier properties into
/// `{value, url}` references using the supplied formatter templates.
/// Properties with no formatter are left unchanged.
#[must_use]
pub fn link_values(value: Value, formatters: &BTreeMap<String, Vec<String>>) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| link_values(v, formatters))
                .filter(|v| !is_empty(v))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = link_values(v, formatters);
                    let v = match formatters.get(&k).filter(|f| !f.is_empty()) {
                        Some(templates) if !PLAIN_PROPERTIES.contains(&k.as_str()) => {
                            to_references(v, templates)
                        }
                        _ => v,
                    };
                    (k, v)
                })
                .collect(),
        ),
        other => other,
    }
}

fn to_references(value: Value, templates: &[String]) -> Value {
    match value {
        Value::String(s) => {
            let mut refs: Vec<Value> = templates
                .iter()
                .map(|t| reference(&s, t))
                .collect();
            if refs.len() == 1 {
                refs.remove(0)
            } else {
                Value::Array(refs)
            }
        }
        Value::Array(items) => Value::Array(
            templates
                .iter()
                .flat_map(|t| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|s| reference(s, t))
                        .collect::<Vec<_>>()
                })
                .collect(),
        ),
        other => other,
    }
}

fn reference(value: &str, template: &str) -> Value {
    let mut map = JsonMap::new();
    map.insert("value".to_string(), Value::String(value.to_string()));
    map.insert(
        "url".to_string(),
        Value::String(template.replace("$1", value)),
    );
    Value::Object(map)
}

/// Gather every string in the tree that looks like an entity identifier.
#[must_use]
pub fn collect_entity_ids(value: &Value) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    collect_ids(value, &mut ids);
    ids
}

fn collect_ids(value: &Value, ids: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            if is_entity_id(s) {
                ids.insert(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_ids(item, ids);
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                collect_ids(nested, ids);
            }
        }
        _ => {}
    }
}

/// Replace identifier-shaped strings with `{id, value, url}` objects using
/// resolved labels and a browsable URL builder. Empty results are pruned
/// from the containing structure.
#[must_use]
pub fn expand_id_labels<F>(value: Value, labels: &BTreeMap<String, String>, entity_url: &F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) if is_entity_id(&s) => {
            let mut expanded = JsonMap::new();
            let label = labels.get(&s).cloned().unwrap_or_else(|| s.clone());
            expanded.insert("id".to_string(), Value::String(s.clone()));
            expanded.insert("value".to_string(), Value::String(label));
            if let Some(url) = entity_url(&s) {
                expanded.insert("url".to_string(), Value::String(url));
            }
            Value::Object(expanded)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| expand_id_labels(v, labels, entity_url))
                .filter(|v| !is_empty(v))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_id_labels(v, labels, entity_url)))
                .filter(|(_, v)| !is_empty(v))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;
    use serde_json::json;

    fn wd_context() -> Context {
        Registry::default().context("wd", "en").unwrap()
    }

    fn tree(node: Value) -> Value {
        json!({ "@context": {}, "@graph": [node] })
    }

    #[test]
    fn test_frame_projects_context_shape() {
        let framed = frame(
            &tree(json!({
                "id": "wd:Q90",
                "@type": "entity",
                "label": "Paris",
                "coords": "Point(2.35 48.85)",
                "p:P625": {"ps:P625": "Point(2.35 48.85)"},
                "prov:wasDerivedFrom": "_:b0",
            })),
            &wd_context(),
            "entity",
        );
        assert_eq!(framed.get("id").unwrap(), "wd:Q90");
        assert_eq!(framed.get("label").unwrap(), "Paris");
        assert_eq!(framed.get("coords").unwrap(), "Point(2.35 48.85)");
        assert!(!framed.contains_key("p:P625"));
        assert!(!framed.contains_key("prov:wasDerivedFrom"));
    }

    #[test]
    fn test_frame_requires_declared_type() {
        let framed = frame(
            &tree(json!({"id": "wd:Q90", "@type": "other", "label": "Paris"})),
            &wd_context(),
            "entity",
        );
        assert!(framed.is_empty());
    }

    #[test]
    fn test_frame_empty_graph_yields_empty_record() {
        let framed = frame(&json!({"@graph": []}), &wd_context(), "entity");
        assert!(framed.is_empty());
    }

    #[test]
    fn test_filter_drops_bookkeeping_and_empties() {
        let filtered = filter_props(json!({
            "label": "Paris",
            "rdfs:label": "Paris",
            "skos:altLabel": "City of Light",
            "wikibase:statements": 42,
            "p:P625": {"ps:P625": "x"},
            "image": {"wikibase:rank": "normal"},
            "country": "wd:Q142",
        }));
        let map = filtered.as_object().unwrap();
        assert!(map.contains_key("label"));
        assert!(map.contains_key("country"));
        assert!(!map.contains_key("rdfs:label"));
        assert!(!map.contains_key("skos:altLabel"));
        assert!(!map.contains_key("wikibase:statements"));
        assert!(!map.contains_key("p:P625"));
        // image became an empty object after recursive filtering
        assert!(!map.contains_key("image"));
    }

    #[test]
    fn test_link_values_wraps_with_formatter() {
        let mut formatters = BTreeMap::new();
        formatters.insert(
            "ISNI".to_string(),
            vec!["https://isni.org/isni/$1".to_string()],
        );
        let linked = link_values(json!({"ISNI": "0000 0001"}), &formatters);
        assert_eq!(
            linked,
            json!({"ISNI": {"value": "0000 0001", "url": "https://isni.org/isni/0000 0001"}})
        );
    }

    #[test]
    fn test_link_values_no_formatter_leaves_scalar() {
        let linked = link_values(json!({"ISNI": "0000 0001"}), &BTreeMap::new());
        assert_eq!(linked, json!({"ISNI": "0000 0001"}));
    }

    #[test]
    fn test_link_values_skips_plain_properties() {
        let mut formatters = BTreeMap::new();
        formatters.insert("label".to_string(), vec!["https://x/$1".to_string()]);
        let linked = link_values(json!({"label": "Paris"}), &formatters);
        assert_eq!(linked, json!({"label": "Paris"}));
    }

    #[test]
    fn test_link_values_list_cross_product() {
        let mut formatters = BTreeMap::new();
        formatters.insert(
            "VIAF ID".to_string(),
            vec!["https://viaf.org/viaf/$1".to_string()],
        );
        let linked = link_values(json!({"VIAF ID": ["1", "2"]}), &formatters);
        assert_eq!(
            linked,
            json!({"VIAF ID": [
                {"value": "1", "url": "https://viaf.org/viaf/1"},
                {"value": "2", "url": "https://viaf.org/viaf/2"},
            ]})
        );
    }

    #[test]
    fn test_collect_linkable_keys() {
        let keys = collect_linkable_keys(&json!({
            "id": "wd:Q90",
            "label": "Paris",
            "@type": "entity",
            "ISNI": "x",
            "nested": [{"VIAF ID": "y"}],
        }));
        assert!(keys.contains("ISNI"));
        assert!(keys.contains("VIAF ID"));
        assert!(keys.contains("nested"));
        assert!(!keys.contains("id"));
        assert!(!keys.contains("label"));
        assert!(!keys.contains("@type"));
    }

    #[test]
    fn test_collect_entity_ids() {
        let ids = collect_entity_ids(&json!({
            "id": "wd:Q90",
            "country": "wd:Q142",
            "label": "Paris",
            "list": ["Q1", "not an id"],
        }));
        assert_eq!(
            ids.into_iter().collect::<Vec<_>>(),
            vec!["Q1", "wd:Q142", "wd:Q90"]
        );
    }

    #[test]
    fn test_expand_id_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("wd:Q142".to_string(), "France".to_string());
        let expanded = expand_id_labels(json!({"country": "wd:Q142"}), &labels, &|id| {
            Some(format!("https://www.wikidata.org/entity/{}", &id[3..]))
        });
        assert_eq!(
            expanded,
            json!({"country": {
                "id": "wd:Q142",
                "value": "France",
                "url": "https://www.wikidata.org/entity/Q142",
            }})
        );
    }

    #[test]
    fn test_expand_prunes_empty_values() {
        let expanded = expand_id_labels(
            json!({"empty": "", "list": ["", "x"], "keep": "y"}),
            &BTreeMap::new(),
            &|_| None,
        );
        assert_eq!(expanded, json!({"list": ["x"], "keep": "y"}));
    }
}
