use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map as JsonMap, Value};
use sophia::api::prelude::*;
use tracing::debug;

use crate::client::HttpClient;
use crate::config::Context;
use crate::error::{Error, Result};

const RDF_TYPE_IRI: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

const NTRIPLES: &str = "application/n-triples";
const SPARQL_JSON: &str = "application/sparql-results+json";

/// Execute a CONSTRUCT query and reshape the returned triples as a nested
/// JSON tree framed by `context`. A non-success status is "no data for this
/// identifier", not an error.
pub async fn construct(
    client: &HttpClient,
    sparql: &str,
    context: &Context,
    endpoint: &str,
) -> Result<Option<Value>> {
    let resp = client
        .post_form(endpoint, &[("query", sparql)], NTRIPLES)
        .await?;
    if !resp.status().is_success() {
        debug!(endpoint, status = %resp.status(), "construct query returned no data");
        return Ok(None);
    }
    let body = resp.text().await?;
    Ok(Some(tree_from_ntriples(&body, context)?))
}

/// Execute a SELECT query and return its result bindings. A non-success
/// status yields an empty binding set.
pub async fn select(
    client: &HttpClient,
    sparql: &str,
    endpoint: &str,
) -> Result<Vec<JsonMap<String, Value>>> {
    let resp = client
        .post_form(endpoint, &[("query", sparql)], SPARQL_JSON)
        .await?;
    if !resp.status().is_success() {
        debug!(endpoint, status = %resp.status(), "select query returned no data");
        return Ok(Vec::new());
    }
    let body: Value = resp.json().await?;
    let bindings = body
        .pointer("/results/bindings")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(bindings
        .into_iter()
        .filter_map(|b| b.as_object().cloned())
        .collect())
}

/// Extract the plain values bound to `var` from SELECT bindings.
#[must_use]
pub fn binding_values(bindings: &[JsonMap<String, Value>], var: &str) -> Vec<String> {
    bindings
        .iter()
        .filter_map(|b| b.get(var)?.get("value")?.as_str().map(String::from))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Iri(String),
    BlankNode(String),
    Literal { lexical: String, language: Option<String> },
}

/// Parse an N-Triples response into a triple store and re-serialize it as a
/// JSON tree under `context`. The result always has the container form
/// `{"@context": ..., "@graph": [...]}` so downstream consumers see one
/// shape. Pure: no network.
pub fn tree_from_ntriples(nt: &str, context: &Context) -> Result<Value> {
    let triples = parse_triples(nt)?;
    let id_alias = context.id_alias().to_string();

    // Group objects per (subject, compacted predicate), honoring the
    // context's language filters on literal values.
    let mut nodes: BTreeMap<String, BTreeMap<String, Vec<Value>>> = BTreeMap::new();
    let mut subjects: Vec<String> = Vec::new();
    for (s, p, o) in &triples {
        let subject = match s {
            Term::Iri(iri) => context.compact(iri),
            Term::BlankNode(b) => format!("_:{b}"),
            Term::Literal { .. } => continue,
        };
        let key = if p == RDF_TYPE_IRI {
            "@type".to_string()
        } else {
            context.compact(p)
        };
        let value = match o {
            Term::Iri(iri) => Value::String(context.compact(iri)),
            Term::BlankNode(b) => Value::String(format!("_:{b}")),
            Term::Literal { lexical, language } => {
                if let (Some(want), Some(got)) = (term_language(context, &key), language.as_ref())
                {
                    if want != *got {
                        continue;
                    }
                }
                Value::String(lexical.clone())
            }
        };
        if !subjects.contains(&subject) {
            subjects.push(subject.clone());
        }
        let values = nodes.entry(subject).or_default().entry(key).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    // Subjects referenced as objects get inlined one level into their
    // referrers and dropped from the top-level graph.
    let referenced: BTreeSet<String> = nodes
        .values()
        .flat_map(|props| props.values().flatten())
        .filter_map(Value::as_str)
        .filter(|s| nodes.contains_key(*s))
        .map(String::from)
        .collect();

    let mut graph = Vec::new();
    for subject in &subjects {
        if referenced.contains(subject) {
            continue;
        }
        graph.push(Value::Object(build_node(
            subject, &nodes, &id_alias, true,
        )));
    }

    Ok(json!({
        "@context": Value::Object(context.terms().clone()),
        "@graph": graph,
    }))
}

fn build_node(
    subject: &str,
    nodes: &BTreeMap<String, BTreeMap<String, Vec<Value>>>,
    id_alias: &str,
    inline: bool,
) -> JsonMap<String, Value> {
    let mut node = JsonMap::new();
    node.insert(id_alias.to_string(), Value::String(subject.to_string()));
    if let Some(props) = nodes.get(subject) {
        for (key, values) in props {
            let rendered: Vec<Value> = values
                .iter()
                .map(|v| match v.as_str() {
                    Some(target) if inline && target != subject && nodes.contains_key(target) => {
                        Value::Object(build_node(target, nodes, id_alias, false))
                    }
                    _ => v.clone(),
                })
                .collect();
            let value = if rendered.len() == 1 {
                rendered.into_iter().next().unwrap_or(Value::Null)
            } else {
                Value::Array(rendered)
            };
            node.insert(key.clone(), value);
        }
    }
    node
}

fn term_language(context: &Context, term: &str) -> Option<String> {
    context
        .terms()
        .get(term)?
        .get("@language")?
        .as_str()
        .map(String::from)
}

fn parse_triples(nt: &str) -> Result<Vec<(Term, String, Term)>> {
    let reader = std::io::BufReader::new(std::io::Cursor::new(nt.as_bytes()));
    let mut out: Vec<(Term, String, Term)> = Vec::new();
    sophia::turtle::parser::nt::parse_bufread(reader)
        .try_for_each_triple(|t| -> std::result::Result<(), Error> {
            let subject = parse_term(&t.s().to_string())?;
            let Term::Iri(predicate) = parse_term(&t.p().to_string())? else {
                return Ok(());
            };
            let object = parse_term(&t.o().to_string())?;
            out.push((subject, predicate, object));
            Ok(())
        })
        .map_err(|e| Error::Rdf(e.to_string()))?;
    Ok(out)
}

/// Parse a term from its N-Triples display form.
fn parse_term(term: &str) -> Result<Term> {
    let s = term.trim();

    if let Some(iri) = s.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return Ok(Term::Iri(iri.to_string()));
    }
    if let Some(label) = s.strip_prefix("_:") {
        return Ok(Term::BlankNode(label.to_string()));
    }
    if s.starts_with('"') {
        let mut end_quote = None;
        let mut escaped = false;
        for (i, ch) in s.char_indices().skip(1) {
            if ch == '"' && !escaped {
                end_quote = Some(i);
                break;
            }
            escaped = ch == '\\' && !escaped;
        }
        let Some(end) = end_quote else {
            return Err(Error::Rdf(format!("unterminated literal: {s}")));
        };
        let lexical = unescape(&s[1..end]);
        let rest = s[end + 1..].trim();
        let language = rest
            .strip_prefix('@')
            .map(|lang| lang.split('-').next().unwrap_or(lang).to_string());
        return Ok(Term::Literal { lexical, language });
    }

    Err(Error::Rdf(format!("unsupported term form: {s}")))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
