//! Entity resolution: fetch an identifier from its primary graph and its
//! cross-referenced counterpart in the secondary graph concurrently, shape
//! both raw trees into records, and reconcile them into one.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map as JsonMap, Value};
use tracing::{debug, info, warn};

use crate::cache::MemoCache;
use crate::client::HttpClient;
use crate::config::{Context, Qid, Registry, SAME_AS_PROPERTY};
use crate::error::{Error, Result};
use crate::lookup::LookupService;
use crate::shape;
use crate::sparql;
use crate::wiki;

/// A resolved entity: property names to scalars, references, or lists.
pub type EntityRecord = JsonMap<String, Value>;

pub struct Resolver {
    client: HttpClient,
    registry: Arc<Registry>,
    lookups: LookupService,
}

impl Resolver {
    #[must_use]
    pub fn new(client: HttpClient, registry: Arc<Registry>, cache: Arc<dyn MemoCache>) -> Self {
        let lookups = LookupService::new(client.clone(), Arc::clone(&registry), cache);
        Self {
            client,
            registry,
            lookups,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve an identifier into a merged entity record. The identifier may
    /// be namespace-qualified; unqualified identifiers use the configured
    /// default namespace.
    pub async fn resolve(
        &self,
        identifier: &str,
        language: &str,
        entity_type: &str,
    ) -> Result<EntityRecord> {
        let primary = Qid::parse(identifier, &self.registry.default_ns)?;
        self.registry.graph(&primary.ns)?;
        info!(%primary, language, entity_type, "resolving entity");

        // Cross-reference absence (or failure) is normal: degrade to
        // primary-only.
        let secondary = match self.secondary_qid(&primary, language).await {
            Ok(secondary) => secondary,
            Err(e) => {
                debug!(%primary, error = %e, "secondary identifier lookup failed");
                None
            }
        };
        debug!(?secondary, "cross-reference lookup complete");

        // The two fetches have independent latency and no ordering
        // dependency until merge.
        let secondary_fetch = async {
            match &secondary {
                Some(qid) => self.fetch_record(qid, language, entity_type).await,
                None => Ok(None),
            }
        };
        let (primary_record, secondary_record) = tokio::join!(
            self.fetch_record(&primary, language, entity_type),
            secondary_fetch,
        );
        let primary_record = primary_record?;
        let secondary_record = secondary_record?;

        if primary_record.is_none() && secondary_record.is_none() {
            return Err(Error::NotFound(primary.qualified()));
        }

        let mut merged = merge_records(primary_record, secondary_record);
        normalize_record(&mut merged);
        merged.insert("language".to_string(), Value::String(language.to_string()));

        // Best-effort enrichment: a summary failure never invalidates the
        // rest of the record.
        if let Some(page) = wikipedia_page(&merged) {
            match wiki::fetch_summary(&self.client, &page).await {
                Ok(summary) => {
                    merged.insert("wikipedia_summary".to_string(), summary);
                }
                Err(e) => warn!(page, error = %e, "summary enrichment failed"),
            }
        }

        Ok(merged)
    }

    /// Find the counterpart identifier in the other configured graph via the
    /// same-as link, querying the default graph.
    async fn secondary_qid(&self, primary: &Qid, language: &str) -> Result<Option<Qid>> {
        let default_ns = self.registry.default_ns.clone();
        let graph = self.registry.graph(&default_ns)?;
        let context = self.registry.context(&default_ns, language)?;

        let (pattern, secondary_ns) = if primary.ns == default_ns {
            (
                format!("{default_ns}:{} wdt:{SAME_AS_PROPERTY} ?qid", primary.local),
                self.registry.public_ns.clone(),
            )
        } else {
            let public_context = self
                .registry
                .context(&self.registry.public_ns, language)?;
            let iri = public_context.expand(&format!("{}:{}", primary.ns, primary.local));
            (
                format!("?qid wdt:{SAME_AS_PROPERTY} <{iri}>"),
                default_ns.clone(),
            )
        };
        let query = format!(
            "{}SELECT ?qid WHERE {{ {pattern} }}",
            context.sparql_prefixes()
        );

        let bindings = sparql::select(&self.client, &query, &graph.sparql_endpoint).await?;
        let qid = sparql::binding_values(&bindings, "qid")
            .first()
            .and_then(|iri| iri.rsplit('/').next().map(String::from))
            .and_then(|local| Qid::parse(&local, &secondary_ns).ok());
        Ok(qid)
    }

    /// Fetch one identifier's record: CONSTRUCT query, then the shaping
    /// chain (frame, filter, link, expand).
    async fn fetch_record(
        &self,
        qid: &Qid,
        language: &str,
        entity_type: &str,
    ) -> Result<Option<EntityRecord>> {
        let graph = self.registry.graph(&qid.ns)?;
        let context = self.registry.context(&qid.ns, language)?;
        let query = entity_query(&context, &qid.local, entity_type, language);

        let Some(tree) =
            sparql::construct(&self.client, &query, &context, &graph.sparql_endpoint).await?
        else {
            return Ok(None);
        };

        let framed = shape::frame(&tree, &context, entity_type);
        if framed.is_empty() {
            return Ok(None);
        }
        let filtered = shape::filter_props(Value::Object(framed));

        let formatters = self.collect_formatters(&filtered, &qid.ns, language).await;
        let linked = shape::link_values(filtered, &formatters);

        let labels = self.collect_labels(&linked, &qid.ns, language).await;
        let registry = Arc::clone(&self.registry);
        let default_ns = qid.ns.clone();
        let expanded = shape::expand_id_labels(linked, &labels, &|id| {
            let qid = Qid::parse(id, &default_ns).ok()?;
            let graph = registry.graph(&qid.ns).ok()?;
            Some(graph.entity_url(&qid.local))
        });

        match expanded {
            Value::Object(record) if !record.is_empty() => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    async fn collect_formatters(
        &self,
        value: &Value,
        ns: &str,
        language: &str,
    ) -> BTreeMap<String, Vec<String>> {
        let mut formatters = BTreeMap::new();
        for key in shape::collect_linkable_keys(value) {
            match self.lookups.formatter_urls(&key, ns, language).await {
                Ok(templates) if !templates.is_empty() => {
                    formatters.insert(key, templates);
                }
                Ok(_) => {}
                Err(e) => debug!(key, error = %e, "formatter lookup failed"),
            }
        }
        formatters
    }

    async fn collect_labels(
        &self,
        value: &Value,
        ns: &str,
        language: &str,
    ) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for id in shape::collect_entity_ids(value) {
            let qualified = if id.contains(':') {
                id.clone()
            } else {
                format!("{ns}:{id}")
            };
            match self.lookups.label(&qualified, language).await {
                Ok(label) if !label.is_empty() => {
                    labels.insert(id, label);
                }
                Ok(_) => {}
                Err(e) => debug!(id, error = %e, "label lookup failed"),
            }
        }
        labels
    }
}

/// CONSTRUCT query for one identifier, including its wikipedia page link.
fn entity_query(context: &Context, local: &str, entity_type: &str, language: &str) -> String {
    let ns = &context.ns;
    format!(
        "{prefixes}CONSTRUCT {{\n  {ns}:{local} a \"{entity_type}\" .\n  {ns}:{local} ?p ?o .\n  {ns}:{local} schema:isPartOf ?wikipedia_page .\n}} WHERE {{\n  {ns}:{local} ?p ?o .\n  OPTIONAL {{\n    ?wikipedia_page schema:about {ns}:{local} .\n    FILTER(STRSTARTS(STR(?wikipedia_page), 'https://{language}.wikipedia.org'))\n  }}\n}}",
        prefixes = context.sparql_prefixes()
    )
}

/// Merge the secondary record into the primary one. Absent properties are
/// copied; list-valued collisions append only values whose canonical
/// serialization is new; list-to-non-list collisions keep the primary value.
/// `id.alt` records the counterpart identifier when both records exist.
#[must_use]
pub fn merge_records(
    primary: Option<EntityRecord>,
    secondary: Option<EntityRecord>,
) -> EntityRecord {
    let had_primary = primary.is_some();
    let mut merged = primary.unwrap_or_default();

    let Some(secondary) = secondary else {
        return merged;
    };
    let secondary_id = secondary.get("id").and_then(id_string);

    for (key, value) in secondary {
        match merged.get_mut(&key) {
            Some(Value::Array(existing)) => {
                let seen: Vec<String> = existing.iter().map(canonical).collect();
                let incoming = match value {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                for item in incoming {
                    if !seen.contains(&canonical(&item)) {
                        existing.push(item);
                    }
                }
            }
            // Non-list collision: the secondary value is superseded.
            Some(_) => {}
            None => {
                merged.insert(key, value);
            }
        }
    }

    if had_primary {
        if let Some(alt) = secondary_id {
            if let Some(Value::Object(id)) = merged.get_mut("id") {
                id.insert("alt".to_string(), Value::String(alt));
            }
        }
    }

    merged
}

/// Canonical order-independent serialization; object keys are sorted by the
/// default `serde_json` map.
fn canonical(value: &Value) -> String {
    value.to_string()
}

fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

/// Deterministic post-merge normalization: rename the type-shape key, drop
/// the noisy "described at URL" property, and parse point geometry.
pub fn normalize_record(record: &mut EntityRecord) {
    if let Some(t) = record.remove("@type") {
        record.insert("type".to_string(), t);
    }
    record.remove("described at URL");

    if let Some(coords) = record.remove("coords") {
        let values = match coords {
            Value::Array(items) => items,
            other => vec![other],
        };
        let parsed: Vec<Value> = values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => parse_point(&s).map(|(lat, lon)| json!([lat, lon])),
                already @ Value::Array(_) => Some(already),
                _ => None,
            })
            .collect();
        if !parsed.is_empty() {
            record.insert("coords".to_string(), Value::Array(parsed));
        }
    }
}

/// Parse a `Point(lon lat)` literal into `(lat, lon)`. Note the input order
/// is `lon lat`; the output is reversed.
#[must_use]
pub fn parse_point(s: &str) -> Option<(f64, f64)> {
    let inner = s.strip_prefix("Point(")?.strip_suffix(')')?;
    let mut parts = inner.split_whitespace();
    let lon: f64 = parts.next()?.parse().ok()?;
    let lat: f64 = parts.next()?.parse().ok()?;
    Some((lat, lon))
}

fn wikipedia_page(record: &EntityRecord) -> Option<String> {
    match record.get("wikipedia_page")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items
            .iter()
            .find_map(|v| v.as_str().map(String::from)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;

    fn record(value: Value) -> EntityRecord {
        value.as_object().cloned().unwrap()
    }

    fn paris_primary() -> EntityRecord {
        record(json!({
            "id": {"id": "jstor:Q17", "value": "Paris", "url": "https://kg.jstor.org/entity/Q17"},
            "@type": "entity",
            "label": "Paris",
            "aliases": ["City of Light"],
        }))
    }

    fn paris_secondary() -> EntityRecord {
        record(json!({
            "id": {"id": "wd:Q90", "value": "Paris", "url": "https://www.wikidata.org/entity/Q90"},
            "@type": "entity",
            "label": "Paris",
            "aliases": ["City of Light", "Paname"],
            "description": "capital of France",
            "coords": "Point(2.3514 48.8575)",
        }))
    }

    #[test]
    fn test_merge_copies_absent_properties() {
        let merged = merge_records(Some(paris_primary()), Some(paris_secondary()));
        assert_eq!(merged.get("description").unwrap(), "capital of France");
    }

    #[test]
    fn test_merge_appends_only_new_list_values() {
        let merged = merge_records(Some(paris_primary()), Some(paris_secondary()));
        let aliases = merged.get("aliases").unwrap().as_array().unwrap();
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases[0], "City of Light");
        assert_eq!(aliases[1], "Paname");
    }

    #[test]
    fn test_merge_is_idempotent_on_repeated_secondary() {
        let once = merge_records(Some(paris_primary()), Some(paris_secondary()));
        let twice = merge_records(Some(once.clone()), Some(paris_secondary()));
        assert_eq!(Value::Object(once), Value::Object(twice));
    }

    #[test]
    fn test_merge_sets_alt_identifier() {
        let merged = merge_records(Some(paris_primary()), Some(paris_secondary()));
        assert_eq!(merged["id"]["alt"], "wd:Q90");
    }

    #[test]
    fn test_merge_without_secondary_leaves_primary() {
        let merged = merge_records(Some(paris_primary()), None);
        assert!(merged["id"].get("alt").is_none());
        assert_eq!(merged.get("label").unwrap(), "Paris");
    }

    #[test]
    fn test_merge_secondary_only_sets_no_alt() {
        let merged = merge_records(None, Some(paris_secondary()));
        assert_eq!(merged["id"]["id"], "wd:Q90");
        assert!(merged["id"].get("alt").is_none());
    }

    #[test]
    fn test_merge_non_list_collision_keeps_primary() {
        let primary = record(json!({"label": "Paris"}));
        let secondary = record(json!({"label": ["Paris", "Lutetia"]}));
        let merged = merge_records(Some(primary), Some(secondary));
        assert_eq!(merged.get("label").unwrap(), "Paris");
    }

    #[test]
    fn test_parse_point_reverses_to_lat_lon() {
        let (lat, lon) = parse_point("Point(2.3514 48.8575)").unwrap();
        assert!((lat - 48.8575).abs() < f64::EPSILON);
        assert!((lon - 2.3514).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_point_rejects_malformed() {
        assert!(parse_point("Point(2.3514)").is_none());
        assert!(parse_point("2.3514 48.8575").is_none());
        assert!(parse_point("Point(a b)").is_none());
    }

    #[test]
    fn test_normalize_renames_type_and_drops_noise() {
        let mut merged = record(json!({
            "@type": "entity",
            "described at URL": "https://example.org/x",
            "label": "Paris",
        }));
        normalize_record(&mut merged);
        assert_eq!(merged.get("type").unwrap(), "entity");
        assert!(!merged.contains_key("@type"));
        assert!(!merged.contains_key("described at URL"));
    }

    #[test]
    fn test_normalize_parses_coords_list() {
        let mut merged = record(json!({
            "coords": ["Point(2.3514 48.8575)", "Point(-77.0635 38.9139)"],
        }));
        normalize_record(&mut merged);
        assert_eq!(
            merged.get("coords").unwrap(),
            &json!([[48.8575, 2.3514], [38.9139, -77.0635]])
        );
    }

    #[test]
    fn test_normalize_parses_scalar_coords() {
        let mut merged = record(json!({"coords": "Point(2.3514 48.8575)"}));
        normalize_record(&mut merged);
        assert_eq!(merged.get("coords").unwrap(), &json!([[48.8575, 2.3514]]));
    }

    #[test]
    fn test_entity_query_declares_prefixes_and_page_link() {
        let context = Registry::default().context("jstor", "en").unwrap();
        let query = entity_query(&context, "Q17", "entity", "en");
        assert!(query.contains("PREFIX jstor: <http://kg.jstor.org/entity/>"));
        assert!(query.contains("jstor:Q17 a \"entity\""));
        assert!(query.contains("https://en.wikipedia.org"));
    }
}
