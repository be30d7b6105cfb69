//! Alias tagging and the document annotation pipeline: sectionize, scan
//! markers, enrich entities, wrap in-scope alias occurrences in entity
//! spans, inject the data script, and prune emptied paragraphs.

use std::collections::BTreeSet;
use std::mem;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::client::HttpClient;
use crate::config::Registry;
use crate::dom::{self, Element, Node};
use crate::error::Result;
use crate::scanner::{self, AnnotationEntity, CustomComponent, MapFigure, ScanResult};

#[derive(Debug, Serialize)]
pub struct AnnotatedDocument {
    pub html: String,
    pub entities: Vec<AnnotationEntity>,
    pub maps: Vec<MapFigure>,
    pub components: Vec<CustomComponent>,
}

pub struct Annotator {
    client: HttpClient,
    registry: Arc<Registry>,
}

impl Annotator {
    #[must_use]
    pub fn new(client: HttpClient, registry: Arc<Registry>) -> Self {
        Self { client, registry }
    }

    /// Run the full pipeline over raw document markup.
    pub async fn annotate(&self, html: &str, language: &str) -> Result<AnnotatedDocument> {
        let root = dom::parse_document(html);
        let content = match root.find("body") {
            Some(body) => body.children.clone(),
            None => root.children.clone(),
        };
        let mut article = dom::sectionize(content);
        let mut result = scanner::scan(&mut article);
        info!(
            entities = result.entities.len(),
            maps = result.maps.len(),
            components = result.components.len(),
            "scanned document markers"
        );

        // Enrichment is best effort; marker data alone still annotates.
        if let Err(e) =
            scanner::enrich(&self.client, &self.registry, &mut result.entities, language).await
        {
            warn!(error = %e, "batch entity enrichment failed");
        }

        tag_entities(&mut article, &result.entities);
        inject_data(&mut article, &result);
        dom::remove_empty_paragraphs(&mut article);

        Ok(AnnotatedDocument {
            html: article.to_html(),
            entities: result.entities,
            maps: result.maps,
            components: result.components,
        })
    }
}

/// Outcome of matching one text node. Distinguishes "nothing matched, keep
/// the node" from a replacement node sequence.
#[derive(Debug, PartialEq)]
pub enum TagOutcome {
    Unchanged,
    Replaced(Vec<Node>),
}

#[derive(Debug, Clone)]
struct Candidate {
    /// ASCII-lowercased name, matched against the folded text.
    pattern: String,
    label: String,
    qid: String,
    apply_to: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Match {
    start: usize,
    end: usize,
    candidate: usize,
}

/// Wrap alias occurrences of the given entities in entity spans. Every
/// known name competes for text spans; whether an accepted span is wrapped
/// or left as plain text depends on the `apply_to` scopes its markers
/// named.
pub fn tag_entities(article: &mut Element, entities: &[AnnotationEntity]) {
    let candidates = build_candidates(entities);
    if candidates.is_empty() {
        return;
    }
    let mut scopes = vec![article.attr("id").unwrap_or("article").to_string()];
    walk(article, &mut scopes, &candidates);
}

fn build_candidates(entities: &[AnnotationEntity]) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    for entity in entities {
        let label = entity
            .label
            .clone()
            .unwrap_or_else(|| entity.qid.clone());
        for name in entity.names() {
            let pattern = name.to_ascii_lowercase();
            if pattern.is_empty()
                || candidates
                    .iter()
                    .any(|c| c.qid == entity.qid && c.pattern == pattern)
            {
                continue;
            }
            candidates.push(Candidate {
                pattern,
                label: label.clone(),
                qid: entity.qid.clone(),
                apply_to: entity.apply_to.clone(),
            });
        }
    }
    candidates
}

fn walk(el: &mut Element, scopes: &mut Vec<String>, candidates: &[Candidate]) {
    // Never retag existing annotations or link/script content.
    if el.tag == "script" || el.tag == "style" || el.tag == "a" || el.has_class("entity") {
        return;
    }
    let pushed = match el.attr("id") {
        Some(id) if el.tag == "section" => {
            scopes.push(id.to_string());
            true
        }
        _ => false,
    };

    let children = mem::take(&mut el.children);
    for node in children {
        match node {
            Node::Text(text) => match tag_text(&text, candidates, scopes) {
                TagOutcome::Replaced(nodes) => el.children.extend(nodes),
                TagOutcome::Unchanged => el.children.push(Node::Text(text)),
            },
            Node::Element(mut child) => {
                walk(&mut child, scopes, candidates);
                el.children.push(Node::Element(child));
            }
            other => el.children.push(other),
        }
    }

    if pushed {
        scopes.pop();
    }
}

/// Match candidates against one text node. Matching is ASCII
/// case-insensitive literal substring search; overlapping matches resolve
/// deterministically to the earliest start, then the longest pattern, then
/// lexicographic pattern order. A match touching an accepted span's
/// boundary is rejected. Every accepted span is consumed; only in-scope
/// spans are wrapped, the rest stay plain text.
fn tag_text(text: &str, candidates: &[Candidate], scopes: &[String]) -> TagOutcome {
    if candidates.is_empty() || text.trim().is_empty() {
        return TagOutcome::Unchanged;
    }
    let folded = text.to_ascii_lowercase();

    let mut matches: Vec<Match> = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        for (start, _) in folded.match_indices(&candidate.pattern) {
            matches.push(Match {
                start,
                end: start + candidate.pattern.len(),
                candidate: index,
            });
        }
    }
    if matches.is_empty() {
        return TagOutcome::Unchanged;
    }

    matches.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then((b.end - b.start).cmp(&(a.end - a.start)))
            .then(candidates[a.candidate].pattern.cmp(&candidates[b.candidate].pattern))
    });

    let mut accepted: Vec<Match> = Vec::new();
    let mut prev_end: Option<usize> = None;
    for m in matches {
        if prev_end.map_or(true, |end| m.start > end) {
            prev_end = Some(m.end);
            accepted.push(m);
        }
    }

    let mut nodes = Vec::new();
    let mut plain = String::new();
    let mut pos = 0usize;
    let mut wrapped = false;
    for m in &accepted {
        plain.push_str(&text[pos..m.start]);
        let candidate = &candidates[m.candidate];
        let in_scope = scopes.iter().any(|scope| candidate.apply_to.contains(scope));
        if in_scope {
            if !plain.is_empty() {
                nodes.push(Node::Text(mem::take(&mut plain)));
            }
            let mut span = Element::new("span")
                .with_attr("class", "entity inferred")
                .with_attr("title", &candidate.label)
                .with_attr("data-qid", &candidate.qid);
            span.push_text(&text[m.start..m.end]);
            nodes.push(Node::Element(span));
            wrapped = true;
        } else {
            plain.push_str(&text[m.start..m.end]);
        }
        pos = m.end;
    }
    if !wrapped {
        return TagOutcome::Unchanged;
    }
    plain.push_str(&text[pos..]);
    if !plain.is_empty() {
        nodes.push(Node::Text(plain));
    }
    TagOutcome::Replaced(nodes)
}

/// Append the embedded data payload the viewer reads at load.
fn inject_data(article: &mut Element, result: &ScanResult) {
    let data = json!({
        "entities": result.entities,
        "maps": result.maps,
        "customComponents": result.components,
    });
    let mut script = Element::new("script").with_attr("type", "text/javascript");
    script.push_text(&format!("window.data = {data};"));
    article.children.push(Node::Element(script));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{parse_fragment, sectionize};

    fn entity(qid: &str, label: &str, aliases: &[&str], apply_to: &[&str]) -> AnnotationEntity {
        AnnotationEntity {
            qid: qid.to_string(),
            label: Some(label.to_string()),
            aliases: aliases.iter().map(ToString::to_string).collect(),
            apply_to: apply_to.iter().map(ToString::to_string).collect(),
            ..AnnotationEntity::default()
        }
    }

    fn scope(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    #[test]
    fn test_tag_text_wraps_match() {
        let entities = [entity("Q90", "Paris", &[], &["s"])];
        let candidates = build_candidates(&entities);
        let TagOutcome::Replaced(nodes) =
            tag_text("I saw Paris today", &candidates, &scope("s"))
        else {
            panic!("expected replacement");
        };
        assert_eq!(dom::serialize(&nodes), "I saw <span class=\"entity inferred\" title=\"Paris\" data-qid=\"Q90\">Paris</span> today");
    }

    #[test]
    fn test_tag_text_is_case_insensitive_preserving_original() {
        let entities = [entity("Q90", "Paris", &[], &["s"])];
        let candidates = build_candidates(&entities);
        let TagOutcome::Replaced(nodes) =
            tag_text("PARIS calling", &candidates, &scope("s"))
        else {
            panic!("expected replacement");
        };
        assert!(dom::serialize(&nodes).contains(">PARIS</span>"));
    }

    #[test]
    fn test_tag_text_matches_inside_words() {
        let entities = [entity("Q90", "Paris", &[], &["s"])];
        let candidates = build_candidates(&entities);
        let TagOutcome::Replaced(nodes) =
            tag_text("A Parisian cafe", &candidates, &scope("s"))
        else {
            panic!("expected replacement");
        };
        assert_eq!(
            dom::serialize(&nodes),
            "A <span class=\"entity inferred\" title=\"Paris\" data-qid=\"Q90\">Paris</span>ian cafe"
        );
    }

    #[test]
    fn test_no_match_leaves_node_untouched() {
        let entities = [entity("Q90", "Paris", &[], &["s"])];
        let candidates = build_candidates(&entities);
        assert_eq!(
            tag_text("nothing here", &candidates, &scope("s")),
            TagOutcome::Unchanged
        );
    }

    #[test]
    fn test_longest_pattern_wins_at_same_start() {
        let entities = [
            entity("Q60", "New York", &[], &["s"]),
            entity("Q61", "New York City", &[], &["s"]),
        ];
        let candidates = build_candidates(&entities);
        let TagOutcome::Replaced(nodes) =
            tag_text("in New York City today", &candidates, &scope("s"))
        else {
            panic!("expected replacement");
        };
        let html = dom::serialize(&nodes);
        assert!(html.contains("data-qid=\"Q61\""));
        assert!(html.contains(">New York City</span>"));
        assert!(!html.contains("data-qid=\"Q60\""));
    }

    #[test]
    fn test_accepted_matches_are_sorted_and_disjoint() {
        let entities = [
            entity("Q60", "New York", &[], &["s"]),
            entity("Q61", "New York City", &[], &["s"]),
        ];
        let candidates = build_candidates(&entities);
        let TagOutcome::Replaced(nodes) =
            tag_text("New York and New York City", &candidates, &scope("s"))
        else {
            panic!("expected replacement");
        };
        let html = dom::serialize(&nodes);
        assert!(html.contains(">New York</span> and "));
        assert!(html.ends_with(">New York City</span>"));
    }

    #[test]
    fn test_match_touching_accepted_boundary_is_rejected() {
        let entities = [
            entity("Q1", "New", &[], &["s"]),
            entity("Q2", "York", &[], &["s"]),
        ];
        let candidates = build_candidates(&entities);
        let TagOutcome::Replaced(nodes) = tag_text("NewYork", &candidates, &scope("s"))
        else {
            panic!("expected replacement");
        };
        let html = dom::serialize(&nodes);
        assert!(html.contains("data-qid=\"Q1\""));
        assert!(html.ends_with("</span>York"));
        assert!(!html.contains("data-qid=\"Q2\""));
    }

    #[test]
    fn test_out_of_scope_longer_alias_blocks_shorter_match() {
        let entities = [
            entity("Q61", "New York City", &[], &["elsewhere"]),
            entity("Q62", "York", &[], &["s"]),
        ];
        let candidates = build_candidates(&entities);
        // "New York City" wins the span even though it is out of scope, so
        // nothing gets wrapped.
        assert_eq!(
            tag_text("New York City Hall", &candidates, &scope("s")),
            TagOutcome::Unchanged
        );
    }

    #[test]
    fn test_out_of_scope_match_elsewhere_leaves_in_scope_match_tagged() {
        let entities = [
            entity("Q90", "Paris", &[], &["s"]),
            entity("Q84", "London", &[], &["elsewhere"]),
        ];
        let candidates = build_candidates(&entities);
        let TagOutcome::Replaced(nodes) =
            tag_text("Paris and London", &candidates, &scope("s"))
        else {
            panic!("expected replacement");
        };
        let html = dom::serialize(&nodes);
        assert!(html.contains("data-qid=\"Q90\""));
        assert!(!html.contains("data-qid=\"Q84\""));
        assert!(html.ends_with("</span> and London"));
    }

    #[test]
    fn test_alias_matches_use_entity_label_as_title() {
        let entities = [entity("Q90", "Paris", &["City of Light"], &["s"])];
        let candidates = build_candidates(&entities);
        let TagOutcome::Replaced(nodes) =
            tag_text("the city of light shines", &candidates, &scope("s"))
        else {
            panic!("expected replacement");
        };
        let html = dom::serialize(&nodes);
        assert!(html.contains("title=\"Paris\""));
        assert!(html.contains(">city of light</span>"));
    }

    #[test]
    fn test_tagging_is_scoped_to_marked_sections() {
        let mut article = sectionize(
            parse_fragment("<h1>A</h1><p>Paris here</p><h1>B</h1><p>Paris there</p>").children,
        );
        let entities = [entity("Q90", "Paris", &[], &["section-1"])];
        tag_entities(&mut article, &entities);
        let html = article.to_html();
        assert!(html.contains("<p><span class=\"entity inferred\" title=\"Paris\" data-qid=\"Q90\">Paris</span> here</p>"));
        assert!(html.contains("<p>Paris there</p>"));
    }

    #[test]
    fn test_article_scope_applies_to_nested_sections() {
        let mut article =
            sectionize(parse_fragment("<h1>A</h1><h2>B</h2><p>Paris deep</p>").children);
        let entities = [entity("Q90", "Paris", &[], &["article"])];
        tag_entities(&mut article, &entities);
        assert!(article.to_html().contains("data-qid=\"Q90\""));
    }

    #[test]
    fn test_anchor_and_existing_annotation_content_is_skipped() {
        let mut article = sectionize(
            parse_fragment(
                "<p><a href=\"/x\">Paris</a> and <span class=\"entity\" data-qid=\"Q90\">Paris</span></p>",
            )
            .children,
        );
        let entities = [entity("Q90", "Paris", &[], &["article"])];
        tag_entities(&mut article, &entities);
        let html = article.to_html();
        assert!(html.contains("<a href=\"/x\">Paris</a>"));
        assert!(!html.contains("inferred"));
    }

    #[test]
    fn test_inject_data_appends_script() {
        let mut article = Element::new("article").with_attr("id", "article");
        let result = ScanResult {
            entities: vec![entity("Q90", "Paris", &[], &["article"])],
            maps: Vec::new(),
            components: Vec::new(),
        };
        inject_data(&mut article, &result);
        let html = article.to_html();
        assert!(html.contains("<script type=\"text/javascript\">window.data = {"));
        assert!(html.contains("\"qid\":\"Q90\""));
        assert!(html.contains("\"customComponents\":[]"));
    }

    #[test]
    fn test_annotated_span_survives_rescan() {
        let mut article =
            sectionize(parse_fragment("<h1>A</h1><p>Paris again</p>").children);
        let entities = [entity("Q90", "Paris", &[], &["article"])];
        tag_entities(&mut article, &entities);

        let mut rescan = dom::parse_fragment(&article.to_html());
        let result = scanner::scan(&mut rescan);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].qid, "Q90");
        assert!(result.entities[0].part_of.contains("section-1"));
    }
}
