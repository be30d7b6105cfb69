//! Owned, mutable HTML tree. Documents are parsed leniently through
//! `scraper` and converted into a tree the annotation passes can splice,
//! restructure, and reserialize.

use std::collections::BTreeMap;

use ego_tree::NodeRef;
use scraper::Html;

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: [&str; 13] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Elements whose text content is emitted verbatim.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.attrs.iter_mut().find(|(k, _)| k == name) {
            entry.1 = value.to_string();
        } else {
            self.attrs.push((name.to_string(), value.to_string()));
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    #[must_use]
    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|v| v.split_whitespace().any(|c| c == class))
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let merged = match self.attr("class") {
            Some(existing) => format!("{existing} {class}"),
            None => class.to_string(),
        };
        self.set_attr("class", &merged);
    }

    /// All `data-*` attributes keyed by their name with the prefix stripped.
    #[must_use]
    pub fn data_attrs(&self) -> BTreeMap<String, String> {
        self.attrs
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix("data-").map(|name| (name.to_string(), v.clone()))
            })
            .collect()
    }

    /// Concatenated descendant text.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    pub fn push_text(&mut self, text: &str) {
        self.children.push(Node::Text(text.to_string()));
    }

    /// First descendant element with the given tag, depth first.
    #[must_use]
    pub fn find(&self, tag: &str) -> Option<&Element> {
        for child in &self.children {
            if let Node::Element(el) = child {
                if el.tag == tag {
                    return Some(el);
                }
                if let Some(found) = el.find(tag) {
                    return Some(found);
                }
            }
        }
        None
    }

    pub fn find_mut(&mut self, tag: &str) -> Option<&mut Element> {
        for child in &mut self.children {
            if let Node::Element(el) = child {
                if el.tag == tag {
                    return Some(el);
                }
                if let Some(found) = el.find_mut(tag) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Recursively drop child elements the predicate matches, subtree
    /// included.
    pub fn remove_elements_where(&mut self, pred: &impl Fn(&Element) -> bool) {
        self.children.retain(|node| match node {
            Node::Element(el) => !pred(el),
            _ => true,
        });
        for child in &mut self.children {
            if let Node::Element(el) = child {
                el.remove_elements_where(pred);
            }
        }
    }

    #[must_use]
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        serialize_element(self, &mut out);
        out
    }
}

fn collect_text(children: &[Node], out: &mut String) {
    for child in children {
        match child {
            Node::Text(t) => out.push_str(t),
            Node::Element(el) => collect_text(&el.children, out),
            Node::Comment(_) => {}
        }
    }
}

/// Parse a full document. The returned element is the `<html>` root; the
/// parser repairs unclosed tags and stray markup as browsers do.
#[must_use]
pub fn parse_document(html: &str) -> Element {
    let doc = Html::parse_document(html);
    convert_children(doc.tree.root())
        .into_iter()
        .find_map(|node| match node {
            Node::Element(el) if el.tag == "html" => Some(el),
            _ => None,
        })
        .unwrap_or_else(|| Element::new("html"))
}

/// Parse a fragment of markup. The fragment's nodes become the children of
/// a synthetic container element.
#[must_use]
pub fn parse_fragment(html: &str) -> Element {
    let doc = Html::parse_fragment(html);
    let mut container = Element::new("html");
    container.children = convert_children(doc.tree.root());
    // The fragment parser wraps content in an html element; unwrap it.
    if container.children.len() == 1 {
        if let Node::Element(el) = &container.children[0] {
            if el.tag == "html" {
                return el.clone();
            }
        }
    }
    container
}

fn convert_children(node: NodeRef<'_, scraper::Node>) -> Vec<Node> {
    node.children().filter_map(convert_node).collect()
}

fn convert_node(node: NodeRef<'_, scraper::Node>) -> Option<Node> {
    match node.value() {
        scraper::Node::Element(el) => {
            let element = Element {
                tag: el.name().to_string(),
                attrs: el
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                children: convert_children(node),
            };
            Some(Node::Element(element))
        }
        scraper::Node::Text(t) => Some(Node::Text(t.text.to_string())),
        scraper::Node::Comment(c) => Some(Node::Comment(c.comment.to_string())),
        _ => None,
    }
}

#[must_use]
pub fn serialize(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        serialize_node(node, &mut out);
    }
    out
}

fn serialize_node(node: &Node, out: &mut String) {
    match node {
        Node::Element(el) => serialize_element(el, out),
        Node::Text(t) => out.push_str(&escape_text(t)),
        Node::Comment(c) => {
            out.push_str("<!--");
            out.push_str(c);
            out.push_str("-->");
        }
    }
}

fn serialize_element(el: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for (name, value) in &el.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&el.tag.as_str()) {
        return;
    }
    if RAW_TEXT_ELEMENTS.contains(&el.tag.as_str()) {
        for child in &el.children {
            if let Node::Text(t) = child {
                out.push_str(t);
            }
        }
    } else {
        for child in &el.children {
            serialize_node(child, out);
        }
    }
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// Restructure a flat node stream into nested `<section>` elements keyed by
/// heading depth, all wrapped in an `<article>`. Section ids encode the
/// nesting path, e.g. `section-2-1` for the first subsection of the second
/// section.
#[must_use]
pub fn sectionize(nodes: Vec<Node>) -> Element {
    struct Frame {
        level: u8,
        ordinal: usize,
        element: Element,
        child_sections: usize,
    }

    let mut article = Element::new("article").with_attr("id", "article");
    let mut article_sections = 0usize;
    let mut stack: Vec<Frame> = Vec::new();

    fn attach(article: &mut Element, stack: &mut Vec<Frame>, node: Node) {
        match stack.last_mut() {
            Some(frame) => frame.element.children.push(node),
            None => article.children.push(node),
        }
    }

    fn close_one(article: &mut Element, stack: &mut Vec<Frame>) {
        if let Some(frame) = stack.pop() {
            attach(article, stack, Node::Element(frame.element));
        }
    }

    for node in nodes {
        let level = match &node {
            Node::Element(el) => heading_level(&el.tag),
            _ => None,
        };
        let Some(level) = level else {
            attach(&mut article, &mut stack, node);
            continue;
        };

        while stack.last().is_some_and(|frame| frame.level >= level) {
            close_one(&mut article, &mut stack);
        }

        let ordinal = match stack.last_mut() {
            Some(parent) => {
                parent.child_sections += 1;
                parent.child_sections
            }
            None => {
                article_sections += 1;
                article_sections
            }
        };
        let mut path: Vec<String> = stack.iter().map(|f| f.ordinal.to_string()).collect();
        path.push(ordinal.to_string());
        let id = format!("section-{}", path.join("-"));

        let mut section = Element::new("section").with_attr("id", &id);
        section.children.push(node);
        stack.push(Frame {
            level,
            ordinal,
            element: section,
            child_sections: 0,
        });
    }

    while !stack.is_empty() {
        close_one(&mut article, &mut stack);
    }
    article
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

/// Drop `<p>` elements left with no rendered content, i.e. only whitespace
/// text and `<br>` children.
pub fn remove_empty_paragraphs(root: &mut Element) {
    root.remove_elements_where(&|el| el.tag == "p" && paragraph_is_empty(el));
}

fn paragraph_is_empty(el: &Element) -> bool {
    el.children.iter().all(|child| match child {
        Node::Text(t) => t.trim().is_empty(),
        Node::Element(inner) => inner.tag == "br",
        Node::Comment(_) => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_reserialize() {
        let root = parse_document("<html><body><p class=\"x\">hi &amp; bye</p></body></html>");
        let body = root.find("body").unwrap();
        assert_eq!(
            serialize(&body.children),
            "<p class=\"x\">hi &amp; bye</p>"
        );
    }

    #[test]
    fn test_parser_repairs_unclosed_tags() {
        let root = parse_document("<html><body><p>one<p>two</body></html>");
        let body = root.find("body").unwrap();
        assert_eq!(serialize(&body.children), "<p>one</p><p>two</p>");
    }

    #[test]
    fn test_void_elements_have_no_closing_tag() {
        let mut p = Element::new("p");
        p.children.push(Node::Element(Element::new("br")));
        assert_eq!(p.to_html(), "<p><br></p>");
    }

    #[test]
    fn test_script_text_is_not_escaped() {
        let mut script = Element::new("script");
        script.push_text("window.data = {\"a\": 1 < 2};");
        assert_eq!(
            script.to_html(),
            "<script>window.data = {\"a\": 1 < 2};</script>"
        );
    }

    #[test]
    fn test_attr_and_class_helpers() {
        let mut el = Element::new("span").with_attr("class", "entity primary");
        assert!(el.has_class("entity"));
        assert!(!el.has_class("ent"));
        el.add_class("entity");
        assert_eq!(el.attr("class").unwrap(), "entity primary");
        el.add_class("inferred");
        assert!(el.has_class("inferred"));
    }

    #[test]
    fn test_data_attrs_strip_prefix() {
        let el = Element::new("span")
            .with_attr("data-qid", "Q90")
            .with_attr("data-aliases", "a|b")
            .with_attr("class", "entity");
        let data = el.data_attrs();
        assert_eq!(data.get("qid").unwrap(), "Q90");
        assert_eq!(data.get("aliases").unwrap(), "a|b");
        assert!(!data.contains_key("class"));
    }

    #[test]
    fn test_sectionize_nests_by_heading_level() {
        let root = parse_fragment(
            "<h1>A</h1><p>a</p><h2>B</h2><p>b</p><h1>C</h1><p>c</p>",
        );
        let article = sectionize(root.children);
        let html = article.to_html();
        assert!(html.starts_with("<article id=\"article\">"));
        assert!(html.contains("<section id=\"section-1\"><h1>A</h1><p>a</p><section id=\"section-1-1\"><h2>B</h2><p>b</p></section></section>"));
        assert!(html.contains("<section id=\"section-2\"><h1>C</h1><p>c</p></section>"));
    }

    #[test]
    fn test_sectionize_preamble_stays_on_article() {
        let root = parse_fragment("<p>intro</p><h1>A</h1><p>a</p>");
        let article = sectionize(root.children);
        match &article.children[0] {
            Node::Element(el) => assert_eq!(el.tag, "p"),
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_remove_empty_paragraphs() {
        let mut root = parse_fragment("<p>keep</p><p> <br> </p><p></p>");
        remove_empty_paragraphs(&mut root);
        assert_eq!(serialize(&root.children), "<p>keep</p>");
    }

    #[test]
    fn test_text_concatenates_descendants() {
        let root = parse_fragment("<p>one <b>two</b> three</p>");
        assert_eq!(root.text(), "one two three");
    }
}
