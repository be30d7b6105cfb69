use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map as JsonMap, Value};

use crate::error::{Error, Result};

const WIKIDATA_CONTEXT: &str = include_str!("../sparql/wikidata_context.json");
const JSTOR_CONTEXT: &str = include_str!("../sparql/jstor_context.json");
const ENTITIES_QUERY: &str = include_str!("../sparql/entities.rq");
const ENTITIES_CONTEXT: &str = include_str!("../sparql/entities_context.json");

pub const DEFAULT_NAMESPACE: &str = "jstor";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_ENTITY_TYPE: &str = "entity";

/// Property linking an entity to its counterpart in the other graph.
pub const SAME_AS_PROPERTY: &str = "P4";

/// Returns true if the string looks like a (possibly namespace-qualified)
/// graph identifier, e.g. `Q90`, `P31`, or `wd:Q90`.
pub fn is_entity_id(s: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[a-z][a-z0-9]*:)?[QP][0-9]+$").expect("valid identifier pattern")
    });
    re.is_match(s)
}

/// A namespace-qualified graph identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Qid {
    pub ns: String,
    pub local: String,
}

impl Qid {
    /// Parse an identifier, applying `default_ns` when unqualified.
    pub fn parse(s: &str, default_ns: &str) -> Result<Self> {
        let (ns, local) = match s.split_once(':') {
            Some((ns, local)) => (ns, local),
            None => (default_ns, s),
        };
        if !is_entity_id(local) {
            return Err(Error::InvalidIdentifier(s.to_string()));
        }
        Ok(Self {
            ns: ns.to_string(),
            local: local.to_string(),
        })
    }

    #[must_use]
    pub fn qualified(&self) -> String {
        format!("{}:{}", self.ns, self.local)
    }

    #[must_use]
    pub fn is_property(&self) -> bool {
        self.local.starts_with('P')
    }
}

impl std::fmt::Display for Qid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ns, self.local)
    }
}

/// Per-namespace knowledge graph endpoint configuration.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// SPARQL endpoint for the namespace.
    pub sparql_endpoint: String,
    /// Browsable entity page prefix, e.g. `https://www.wikidata.org/entity/`.
    pub entity_url_prefix: String,
    /// Type code for the default entity kind within the graph.
    pub entity_type_code: String,
    context_template: &'static str,
}

impl GraphConfig {
    #[must_use]
    pub fn entity_url(&self, local: &str) -> String {
        format!("{}{}", self.entity_url_prefix, local)
    }
}

/// The set of configured knowledge graphs plus the shared service endpoints.
#[derive(Debug, Clone)]
pub struct Registry {
    graphs: BTreeMap<String, GraphConfig>,
    pub default_ns: String,
    /// The general-purpose public graph among the configured namespaces.
    pub public_ns: String,
    /// Base URL of the label / find service.
    pub service_endpoint: String,
    /// Public graph endpoint used for batch document-entity resolution.
    pub batch_endpoint: String,
}

impl Default for Registry {
    fn default() -> Self {
        let mut graphs = BTreeMap::new();
        graphs.insert(
            "jstor".to_string(),
            GraphConfig {
                sparql_endpoint:
                    "https://kg-query.jstor.org/proxy/wdqs/bigdata/namespace/wdq/sparql"
                        .to_string(),
                entity_url_prefix: "https://kg.jstor.org/entity/".to_string(),
                entity_type_code: "Q13".to_string(),
                context_template: JSTOR_CONTEXT,
            },
        );
        graphs.insert(
            "wd".to_string(),
            GraphConfig {
                sparql_endpoint: "https://query.wikidata.org/sparql".to_string(),
                entity_url_prefix: "https://www.wikidata.org/entity/".to_string(),
                entity_type_code: "Q35120".to_string(),
                context_template: WIKIDATA_CONTEXT,
            },
        );
        Self {
            graphs,
            default_ns: DEFAULT_NAMESPACE.to_string(),
            public_ns: "wd".to_string(),
            service_endpoint: "https://lo7kh865s6.execute-api.us-east-1.amazonaws.com/prod"
                .to_string(),
            batch_endpoint: "https://query.wikidata.org/sparql".to_string(),
        }
    }
}

impl Registry {
    pub fn graph(&self, ns: &str) -> Result<&GraphConfig> {
        self.graphs
            .get(ns)
            .ok_or_else(|| Error::UnknownNamespace(ns.to_string()))
    }

    #[must_use]
    pub fn namespaces(&self) -> Vec<&str> {
        self.graphs.keys().map(String::as_str).collect()
    }

    /// The counterpart namespace of `ns` among the two configured graphs.
    pub fn counterpart(&self, ns: &str) -> Result<&str> {
        self.graph(ns)?;
        self.graphs
            .keys()
            .map(String::as_str)
            .find(|other| *other != ns)
            .ok_or_else(|| Error::UnknownNamespace(ns.to_string()))
    }

    /// Vocabulary context for a (namespace, language) pair. Deterministic:
    /// the same inputs always yield the same term map.
    pub fn context(&self, ns: &str, language: &str) -> Result<Context> {
        let graph = self.graph(ns)?;
        Context::from_template(graph.context_template, ns, language)
    }

    /// Shared context used to frame batch document-entity results.
    pub fn batch_context(&self, language: &str) -> Result<Context> {
        Context::from_template(ENTITIES_CONTEXT, "wd", language)
    }

    /// Batch query template with the `VALUES (?item) {}` placeholder filled
    /// with the given identifiers.
    #[must_use]
    pub fn batch_query(&self, qids: &[String], language: &str) -> String {
        let values = qids
            .iter()
            .map(|qid| format!("(wd:{})", qid.trim_start_matches("wd:")))
            .collect::<Vec<_>>()
            .join(" ");
        ENTITIES_QUERY
            .replace("VALUES (?item) {}", &format!("VALUES (?item) {{ {values} }}"))
            .replace("'en'", &format!("'{language}'"))
    }
}

/// A vocabulary mapping from short property/type names to full identifiers,
/// scoped to a (namespace, language) pair. Used identically for query
/// construction and result framing so names round-trip.
#[derive(Debug, Clone)]
pub struct Context {
    terms: JsonMap<String, Value>,
    pub ns: String,
    pub language: String,
}

impl Context {
    pub fn from_template(template: &str, ns: &str, language: &str) -> Result<Self> {
        let substituted = template.replace("\"en\"", &format!("\"{language}\""));
        let parsed: Value = serde_json::from_str(&substituted)?;
        let terms = parsed
            .get("@context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            terms,
            ns: ns.to_string(),
            language: language.to_string(),
        })
    }

    #[must_use]
    pub fn terms(&self) -> &JsonMap<String, Value> {
        &self.terms
    }

    /// Prefix bindings: terms whose definition is a bare vocabulary IRI.
    #[must_use]
    pub fn prefixes(&self) -> Vec<(&str, &str)> {
        self.terms
            .iter()
            .filter_map(|(name, def)| {
                def.as_str()
                    .filter(|iri| iri.ends_with('/') || iri.ends_with('#'))
                    .map(|iri| (name.as_str(), iri))
            })
            .collect()
    }

    /// Non-prefix terms: the human-readable property names of the context.
    #[must_use]
    pub fn property_names(&self) -> Vec<&str> {
        self.terms
            .iter()
            .filter(|(_, def)| !Self::is_prefix_def(def))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    fn is_prefix_def(def: &Value) -> bool {
        def.as_str()
            .is_some_and(|iri| iri.ends_with('/') || iri.ends_with('#'))
    }

    /// Name of the term aliased to `@id` (`id` or `qid` in the shipped
    /// contexts).
    #[must_use]
    pub fn id_alias(&self) -> &str {
        self.terms
            .iter()
            .find(|(_, def)| def.as_str() == Some("@id"))
            .map_or("id", |(name, _)| name.as_str())
    }

    /// Expand a compact form (`wdt:P31`) or pass a full IRI through.
    #[must_use]
    pub fn expand(&self, compact: &str) -> String {
        if compact.starts_with("http://") || compact.starts_with("https://") {
            return compact.to_string();
        }
        if let Some((prefix, local)) = compact.split_once(':') {
            if let Some(iri) = self.terms.get(prefix).and_then(Value::as_str) {
                return format!("{iri}{local}");
            }
        }
        compact.to_string()
    }

    /// Full IRI for a context term, if the term defines one.
    #[must_use]
    pub fn term_iri(&self, name: &str) -> Option<String> {
        let def = self.terms.get(name)?;
        let compact = match def {
            Value::String(s) if s != "@id" && s != "@type" => s.as_str(),
            Value::Object(map) => map.get("@id")?.as_str()?,
            _ => return None,
        };
        Some(self.expand(compact))
    }

    /// Compact a full IRI: term names first, then longest-prefix bindings,
    /// otherwise the IRI unchanged.
    #[must_use]
    pub fn compact(&self, iri: &str) -> String {
        for (name, _) in &self.terms {
            if self.term_iri(name).as_deref() == Some(iri) {
                return name.clone();
            }
        }
        let mut best: Option<(&str, &str)> = None;
        for (name, prefix) in self.prefixes() {
            if iri.starts_with(prefix) && best.map_or(true, |(_, b)| prefix.len() > b.len()) {
                best = Some((name, prefix));
            }
        }
        match best {
            Some((name, prefix)) => format!("{name}:{}", &iri[prefix.len()..]),
            None => iri.to_string(),
        }
    }

    /// `PREFIX` header lines for query construction.
    #[must_use]
    pub fn sparql_prefixes(&self) -> String {
        self.prefixes()
            .iter()
            .map(|(name, iri)| format!("PREFIX {name}: <{iri}>\n"))
            .collect()
    }
}
