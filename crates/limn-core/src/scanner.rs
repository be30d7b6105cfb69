//! Document marker scanning. Authors embed entity, map, and component
//! markers in the source markup; the scanner extracts them into structured
//! records, tracks which sections each applies to, and enriches entities
//! from the public graph in one batch query.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::client::HttpClient;
use crate::config::Registry;
use crate::dom::{Element, Node};
use crate::error::Result;
use crate::resolver::parse_point;
use crate::sparql;

const DEFAULT_MAP_ZOOM: f64 = 5.0;

/// An entity referenced by the document, accumulated across all of its
/// markers. `part_of` holds sections where the entity appears inline;
/// `apply_to` holds sections a textless marker tags for alias matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnotationEntity {
    pub qid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub coords: Vec<(f64, f64)>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub part_of: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub apply_to: BTreeSet<String>,
}

impl AnnotationEntity {
    fn for_qid(qid: &str) -> Self {
        Self {
            qid: qid.to_string(),
            ..Self::default()
        }
    }

    /// Every name this entity can be matched by in running text.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        if let Some(label) = &self.label {
            names.push(label);
        }
        names.extend(self.aliases.iter().map(String::as_str));
        names
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapFigure {
    pub id: String,
    pub center: String,
    pub zoom: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub part_of: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomComponent {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub entities: Vec<AnnotationEntity>,
    pub maps: Vec<MapFigure>,
    pub components: Vec<CustomComponent>,
}

#[derive(Default)]
struct Accumulator {
    order: Vec<String>,
    entities: BTreeMap<String, AnnotationEntity>,
    maps: Vec<MapFigure>,
    components: Vec<CustomComponent>,
}

impl Accumulator {
    fn entity(&mut self, qid: &str) -> &mut AnnotationEntity {
        let Self {
            order, entities, ..
        } = self;
        entities.entry(qid.to_string()).or_insert_with(|| {
            order.push(qid.to_string());
            AnnotationEntity::for_qid(qid)
        })
    }
}

/// Scan the article tree for markers. Textless entity markers, valid map
/// markers, and component markers are removed from the tree; inline entity
/// markers stay and gain the `entity` class. Entities keep first-appearance
/// order.
pub fn scan(article: &mut Element) -> ScanResult {
    let mut acc = Accumulator::default();
    let scope = article.attr("id").unwrap_or("article").to_string();
    walk(article, &scope, &mut acc);

    let Accumulator {
        order,
        mut entities,
        maps,
        components,
    } = acc;
    ScanResult {
        entities: order
            .into_iter()
            .filter_map(|qid| entities.remove(&qid))
            .collect(),
        maps,
        components,
    }
}

fn walk(el: &mut Element, scope: &str, acc: &mut Accumulator) {
    let children = mem::take(&mut el.children);
    for mut node in children {
        let keep = match &mut node {
            Node::Element(child) if is_entity_marker(child) => {
                absorb_entity_marker(child, scope, acc)
            }
            Node::Element(child) if is_map_marker(child) => {
                absorb_map_marker(child, scope, acc);
                true
            }
            Node::Element(child) if is_component_marker(child) => {
                acc.components.push(component_from(child));
                false
            }
            Node::Element(child) => {
                let child_scope = section_scope(child).map(String::from);
                walk(child, child_scope.as_deref().unwrap_or(scope), acc);
                true
            }
            _ => true,
        };
        if keep {
            el.children.push(node);
        }
    }
}

fn section_scope(el: &Element) -> Option<&str> {
    if el.tag == "section" || el.tag == "article" {
        el.attr("id")
    } else {
        None
    }
}

fn is_entity_marker(el: &Element) -> bool {
    el.tag == "span" && (el.attr("data-entity").is_some() || el.has_class("entity"))
}

fn is_map_marker(el: &Element) -> bool {
    el.tag == "div" && (el.attr("data-map").is_some() || el.has_class("map"))
}

fn is_component_marker(el: &Element) -> bool {
    el.attr("data-component").is_some() || el.has_class("component")
}

/// Record an entity marker. Returns whether the node stays in the tree.
fn absorb_entity_marker(el: &mut Element, scope: &str, acc: &mut Accumulator) -> bool {
    let data = el.data_attrs();
    let qid = data
        .get("qid")
        .or_else(|| data.get("entity"))
        .filter(|v| !v.is_empty())
        .cloned();
    let Some(qid) = qid else {
        debug!(scope, "entity marker without identifier left in place");
        return true;
    };

    let text = el.text();
    let entity = acc.entity(&qid);
    if let Some(label) = data.get("label") {
        entity.label.get_or_insert_with(|| label.clone());
    }
    if let Some(title) = data.get("title") {
        entity.title.get_or_insert_with(|| title.clone());
    }
    if let Some(description) = data.get("description") {
        entity.description.get_or_insert_with(|| description.clone());
    }
    if let Some(category) = data.get("category") {
        entity.category.get_or_insert_with(|| category.clone());
    }
    if let Some(aliases) = data.get("aliases") {
        for alias in split_list(aliases) {
            if !entity.aliases.contains(&alias) {
                entity.aliases.push(alias);
            }
        }
    }

    if text.trim().is_empty() {
        entity.apply_to.insert(scope.to_string());
        false
    } else {
        entity.part_of.insert(scope.to_string());
        if entity.label.is_none() {
            entity.label = Some(text.trim().to_string());
        }
        el.add_class("entity");
        el.set_attr("data-qid", &qid);
        true
    }
}

/// Record a map marker and convert it in place into a figure container with
/// a generated sequential id. Malformed markers stay untouched.
fn absorb_map_marker(el: &mut Element, scope: &str, acc: &mut Accumulator) {
    let data = el.data_attrs();
    let Some(center) = data.get("center").cloned() else {
        debug!(scope, "map marker without center left in place");
        return;
    };
    let id = format!("map-{}", acc.maps.len() + 1);
    let zoom = data
        .get("zoom")
        .and_then(|z| z.parse().ok())
        .unwrap_or(DEFAULT_MAP_ZOOM);
    let overlays = data
        .get("overlays")
        .map(|v| split_list(v))
        .unwrap_or_default();

    el.tag = "figure".to_string();
    el.set_attr("id", &id);
    el.add_class("map");

    acc.maps.push(MapFigure {
        id,
        center,
        zoom,
        overlays,
        part_of: BTreeSet::from([scope.to_string()]),
    });
}

fn component_from(el: &Element) -> CustomComponent {
    let mut params = el.data_attrs();
    let name = params
        .remove("component")
        .filter(|v| !v.is_empty())
        .or_else(|| el.attr("name").map(String::from))
        .unwrap_or_default();
    let src = params
        .remove("src")
        .or_else(|| el.attr("src").map(String::from));
    CustomComponent { name, src, params }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Enrich scanned entities from the public graph with one batch query.
/// Marker-provided fields win; the batch result only fills gaps.
pub async fn enrich(
    client: &HttpClient,
    registry: &Registry,
    entities: &mut [AnnotationEntity],
    language: &str,
) -> Result<()> {
    if entities.is_empty() {
        return Ok(());
    }
    let qids: Vec<String> = entities.iter().map(|e| e.qid.clone()).collect();
    let query = registry.batch_query(&qids, language);
    let context = registry.batch_context(language)?;
    let Some(tree) =
        sparql::construct(client, &query, &context, &registry.batch_endpoint).await?
    else {
        debug!("batch enrichment returned no data");
        return Ok(());
    };

    let nodes = tree
        .get("@graph")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for node in &nodes {
        let Some(qid) = node.get("qid").and_then(Value::as_str) else {
            continue;
        };
        let bare = qid.trim_start_matches("wd:");
        if let Some(entity) = entities
            .iter_mut()
            .find(|e| e.qid.trim_start_matches("wd:") == bare)
        {
            apply_batch_node(entity, node);
        }
    }
    Ok(())
}

fn apply_batch_node(entity: &mut AnnotationEntity, node: &Value) {
    if entity.label.is_none() {
        entity.label = first_string(node.get("label"));
    }
    if entity.description.is_none() {
        entity.description = first_string(node.get("description"));
    }
    for alias in string_values(node.get("aliases")) {
        if !entity.aliases.contains(&alias) {
            entity.aliases.push(alias);
        }
    }
    for image in string_values(node.get("images")) {
        if !entity.images.contains(&image) {
            entity.images.push(image);
        }
    }
    for point in string_values(node.get("coords")) {
        if let Some(pair) = parse_point(&point) {
            if !entity.coords.contains(&pair) {
                entity.coords.push(pair);
            }
        }
    }
}

fn first_string(value: Option<&Value>) -> Option<String> {
    string_values(value).into_iter().next()
}

fn string_values(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}
