//! Label and formatter-URL lookups against the external label service and
//! the configured graphs. Every lookup is memoized per
//! (operation, identifier/label, namespace, language) through the injected
//! cache so repeated calls within a resolution session issue no network
//! calls.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::cache::{memo_key, MemoCache};
use crate::client::{ensure_success, HttpClient};
use crate::config::{is_entity_id, Registry, SAME_AS_PROPERTY};
use crate::error::Result;
use crate::sparql;

/// Property carrying formatter URL templates on the public graph.
const FORMATTER_URL_PROPERTY: &str = "P1630";

pub struct LookupService {
    client: HttpClient,
    registry: Arc<Registry>,
    cache: Arc<dyn MemoCache>,
}

impl LookupService {
    #[must_use]
    pub fn new(client: HttpClient, registry: Arc<Registry>, cache: Arc<dyn MemoCache>) -> Self {
        Self {
            client,
            registry,
            cache,
        }
    }

    /// Human-readable label for an identifier in the requested language.
    pub async fn label(&self, qualified: &str, language: &str) -> Result<String> {
        let key = memo_key("label", &[qualified, language]);
        if let Some(cached) = self.cache.get(&key).await {
            if let Some(label) = cached.as_str() {
                return Ok(label.to_string());
            }
        }
        let url = format!(
            "{}/label/{qualified}?language={language}",
            self.registry.service_endpoint
        );
        let resp = ensure_success(self.client.get(&url, "text/plain").await?)?;
        let label = resp.text().await?;
        debug!(qualified, language, label, "resolved label");
        self.cache.put(&key, json!(label)).await;
        Ok(label)
    }

    /// Look a property identifier up by its plain-text label. Absence is
    /// normal: unknown labels yield `None`.
    pub async fn property_id_from_label(
        &self,
        label: &str,
        ns: &str,
        language: &str,
    ) -> Result<Option<String>> {
        let key = memo_key("find", &[label, ns, language]);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached.as_str().map(String::from));
        }
        let url = format!("{}/find", self.registry.service_endpoint);
        let body = json!({
            "ns": ns,
            "text": label,
            "type": "property",
            "language": language,
        });
        let resp = self.client.post_json(&url, &body).await?;
        let id = if resp.status().is_success() {
            resp.json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_str).map(String::from))
        } else {
            None
        };
        debug!(label, ns, language, ?id, "property lookup by label");
        self.cache
            .put(&key, id.as_deref().map_or(Value::Null, Value::from))
            .await;
        Ok(id)
    }

    /// Formatter URL templates for a property reference. The reference may
    /// already be an identifier or a plain-text label needing lookup first;
    /// non-property references yield no templates.
    pub async fn formatter_urls(
        &self,
        property: &str,
        ns: &str,
        language: &str,
    ) -> Result<Vec<String>> {
        let key = memo_key("formatters", &[property, ns, language]);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(string_list(&cached));
        }

        let pid = if is_entity_id(property) {
            Some(property.rsplit(':').next().unwrap_or(property).to_string())
        } else {
            self.property_id_from_label(property, ns, language).await?
        };
        let templates = match pid {
            Some(pid) if pid.starts_with('P') => self.fetch_formatters(&pid, ns, language).await?,
            _ => Vec::new(),
        };

        self.cache.put(&key, json!(templates)).await;
        Ok(templates)
    }

    async fn fetch_formatters(&self, pid: &str, ns: &str, language: &str) -> Result<Vec<String>> {
        let graph = self.registry.graph(ns)?;
        let context = self.registry.context(ns, language)?;
        let query = formatter_query(
            pid,
            &context.expand(&format!("{ns}:")),
            &context.expand("wdt:"),
            self.registry.public_ns == ns,
            &self.registry.batch_endpoint,
        );
        let bindings = sparql::select(&self.client, &query, &graph.sparql_endpoint).await?;
        let templates = sparql::binding_values(&bindings, "formatterUrl");
        debug!(pid, ns, count = templates.len(), "formatter url lookup");
        Ok(templates)
    }
}

/// Build the formatter URL query: a direct lookup when the property lives on
/// the public graph, otherwise a federated hop through the counterpart graph
/// via the same-as link.
fn formatter_query(
    pid: &str,
    entity_prefix: &str,
    direct_prefix: &str,
    is_public: bool,
    public_endpoint: &str,
) -> String {
    if is_public {
        format!(
            "SELECT ?formatterUrl WHERE {{\n  <{entity_prefix}{pid}> <{direct_prefix}{FORMATTER_URL_PROPERTY}> ?formatterUrl .\n}}"
        )
    } else {
        format!(
            "SELECT ?formatterUrl WHERE {{\n  <{entity_prefix}{pid}> <{direct_prefix}{SAME_AS_PROPERTY}> ?wdItem .\n  SERVICE <{public_endpoint}> {{\n    ?wdItem <http://www.wikidata.org/prop/direct/{FORMATTER_URL_PROPERTY}> ?formatterUrl .\n  }}\n}}"
        )
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
