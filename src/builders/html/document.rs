//! Lossless HTML document model.
//!
//! The document is a flat list of nodes produced by a regex tokenizer.
//! Untouched nodes serialize back to their exact source text; only elements
//! that were edited are re-rendered. That is enough for reference rewriting
//! and head back-fill, which never need a real tree.

use regex::Regex;
use std::fmt::Write as _;

use crate::transform::TransformError;

/// Elements whose content is raw text up to the matching close tag.
const RAW_TEXT: [&str; 4] = ["script", "style", "title", "textarea"];

struct Patterns {
    tag: Regex,
    attr: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, TransformError> {
        let build = |p: &str| Regex::new(p).map_err(|e| TransformError::Other(format!("failed to compile pattern: {}", e)));
        Ok(Self {
            tag: build(
                r#"(?s)<!--.*?-->|<!(?i:doctype)[^>]*>|</(?P<end>[A-Za-z][A-Za-z0-9:-]*)\s*>|<(?P<start>[A-Za-z][A-Za-z0-9:-]*)(?P<attrs>(?:\s+[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)\s*(?P<close>/?)>"#,
            )?,
            attr: build(
                r#"(?P<name>[^\s"'>/=]+)(?:\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<uq>[^\s"'=<>`]+)))?"#,
            )?,
        })
    }
}

/// One attribute; the value is kept in its source (entity-encoded) form.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Attr {
    name: String,
    value: Option<String>,
}

/// A start tag plus, for raw-text elements, its content and close tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lowercase tag name
    pub name: String,
    tag: String,
    attrs: Vec<Attr>,
    raw: String,
    self_closing: bool,
    content: Option<String>,
    close: String,
    modified: bool,
    removed: bool,
    replacement: Option<String>,
}

impl Element {
    /// Decoded attribute value (`Some("")` for a bare attribute).
    pub fn attr(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_deref().map(decode_entities).unwrap_or_default())
    }

    /// Whether the attribute is present.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Set (or add) an attribute to a plain-text value.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        let encoded = escape_attr(value);
        match self.attrs.iter_mut().find(|a| a.name.eq_ignore_ascii_case(name)) {
            Some(attr) => attr.value = Some(encoded),
            None => self.attrs.push(Attr { name: name.to_string(), value: Some(encoded) }),
        }
        self.modified = true;
    }

    /// Raw text content of a `<script>`/`<style>`/`<title>`/`<textarea>`.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Whether the element has been removed or replaced.
    pub fn is_detached(&self) -> bool {
        self.removed || self.replacement.is_some()
    }

    fn render(&self, out: &mut String) {
        if self.removed {
            return;
        }
        if let Some(replacement) = &self.replacement {
            out.push_str(replacement);
            return;
        }
        if self.modified {
            out.push('<');
            out.push_str(&self.tag);
            for attr in &self.attrs {
                match &attr.value {
                    Some(value) => {
                        let _ = write!(out, " {}=\"{}\"", attr.name, value.replace('"', "&quot;"));
                    }
                    None => {
                        let _ = write!(out, " {}", attr.name);
                    }
                }
            }
            out.push_str(if self.self_closing { " />" } else { ">" });
        } else {
            out.push_str(&self.raw);
        }
        if let Some(content) = &self.content {
            out.push_str(content);
            out.push_str(&self.close);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Markup(String),
    Element(Element),
    EndTag { name: String, raw: String },
    Inserted(String),
}

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    /// Tokenize `source`. Never fails on malformed markup; unrecognized text
    /// is kept verbatim.
    pub fn parse(source: &str) -> Result<Self, TransformError> {
        let re = Patterns::compile()?;
        let mut nodes = Vec::new();
        let mut pos = 0;

        while let Some(caps) = re.tag.captures_at(source, pos) {
            let Some(whole) = caps.get(0) else { break };
            if whole.start() > pos {
                nodes.push(Node::Text(source[pos..whole.start()].to_string()));
            }
            pos = whole.end();

            if let Some(end) = caps.name("end") {
                nodes.push(Node::EndTag { name: end.as_str().to_ascii_lowercase(), raw: whole.as_str().to_string() });
                continue;
            }
            let Some(start) = caps.name("start") else {
                nodes.push(Node::Markup(whole.as_str().to_string()));
                continue;
            };

            let name = start.as_str().to_ascii_lowercase();
            let attrs = caps
                .name("attrs")
                .map(|a| {
                    re.attr
                        .captures_iter(a.as_str())
                        .filter_map(|c| {
                            let name = c.name("name")?.as_str().to_string();
                            let value = c.name("dq").or(c.name("sq")).or(c.name("uq")).map(|v| v.as_str().to_string());
                            Some(Attr { name, value })
                        })
                        .collect()
                })
                .unwrap_or_default();
            let self_closing = caps.name("close").is_some_and(|c| !c.as_str().is_empty());

            let (content, close) = if RAW_TEXT.contains(&name.as_str()) && !self_closing {
                let rest = &source[pos..];
                let lower = rest.to_ascii_lowercase();
                match lower.find(&format!("</{}", name)) {
                    Some(at) => {
                        let close_end = rest[at..].find('>').map(|i| at + i + 1).unwrap_or(rest.len());
                        pos += close_end;
                        (Some(rest[..at].to_string()), rest[at..close_end].to_string())
                    }
                    None => {
                        pos = source.len();
                        (Some(rest.to_string()), String::new())
                    }
                }
            } else {
                (None, String::new())
            };

            nodes.push(Node::Element(Element {
                name,
                tag: start.as_str().to_string(),
                attrs,
                raw: whole.as_str().to_string(),
                self_closing,
                content,
                close,
                modified: false,
                removed: false,
                replacement: None,
            }));
        }
        if pos < source.len() {
            nodes.push(Node::Text(source[pos..].to_string()));
        }
        Ok(Self { nodes })
    }

    /// Render the document.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) | Node::Markup(text) | Node::Inserted(text) => out.push_str(text),
                Node::EndTag { raw, .. } => out.push_str(raw),
                Node::Element(element) => element.render(&mut out),
            }
        }
        out
    }

    /// Attached elements with their node index, in document order.
    pub fn elements(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.nodes.iter().enumerate().filter_map(|(i, node)| match node {
            Node::Element(e) if !e.is_detached() => Some((i, e)),
            _ => None,
        })
    }

    /// Element at a node index.
    pub fn element(&self, index: usize) -> Option<&Element> {
        match self.nodes.get(index) {
            Some(Node::Element(e)) => Some(e),
            _ => None,
        }
    }

    /// Mutable element at a node index.
    pub fn element_mut(&mut self, index: usize) -> Option<&mut Element> {
        match self.nodes.get_mut(index) {
            Some(Node::Element(e)) => Some(e),
            _ => None,
        }
    }

    /// Drop an element (and its content) from the output.
    pub fn remove(&mut self, index: usize) {
        if let Some(element) = self.element_mut(index) {
            element.removed = true;
        }
    }

    /// Render `markup` in place of an element.
    pub fn replace(&mut self, index: usize, markup: impl Into<String>) {
        if let Some(element) = self.element_mut(index) {
            element.replacement = Some(markup.into());
        }
    }

    /// First attached element named `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.elements().find(|(_, e)| e.name == name).map(|(i, _)| i)
    }

    /// First `<meta name=...>` with the given name.
    pub fn find_meta(&self, meta_name: &str) -> Option<usize> {
        self.elements()
            .find(|(_, e)| e.name == "meta" && e.attr("name").is_some_and(|n| n.eq_ignore_ascii_case(meta_name)))
            .map(|(i, _)| i)
    }

    /// Insert markup at the end of `<head>`.
    ///
    /// Without a `</head>` the markup goes right after `<head>`, then after
    /// `<html>`, then after the doctype. Node indices after the insertion
    /// point shift.
    pub fn insert_in_head(&mut self, markup: &str) {
        let at = self
            .nodes
            .iter()
            .position(|n| matches!(n, Node::EndTag { name, .. } if name == "head"))
            .or_else(|| self.find("head").map(|i| i + 1))
            .or_else(|| self.find("html").map(|i| i + 1))
            .or_else(|| {
                self.nodes
                    .iter()
                    .position(|n| matches!(n, Node::Markup(m) if m.to_ascii_lowercase().starts_with("<!doctype")))
                    .map(|i| i + 1)
            })
            .unwrap_or(0);
        self.nodes.insert(at, Node::Inserted(format!("{}\n", markup)));
    }

    /// Add `<title>` unless the document already has one.
    pub fn ensure_title(&mut self, title: &str) -> bool {
        if self.find("title").is_some() {
            return false;
        }
        self.insert_in_head(&format!("<title>{}</title>", escape_text(title)));
        true
    }

    /// Add `<meta name content>` unless one with that name exists.
    pub fn ensure_meta(&mut self, name: &str, content: &str) -> bool {
        if self.find_meta(name).is_some() {
            return false;
        }
        self.insert_in_head(&format!("<meta name=\"{}\" content=\"{}\">", escape_attr(name), escape_attr(content)));
        true
    }

    /// Add `<base href>` unless the document already has a base.
    pub fn ensure_base(&mut self, href: &str) -> bool {
        if self.find("base").is_some() {
            return false;
        }
        self.insert_in_head(&format!("<base href=\"{}\">", escape_attr(href)));
        true
    }

    /// Set `<html lang>` unless it is already set.
    pub fn ensure_lang(&mut self, lang: &str) -> bool {
        match self.find("html").and_then(|i| self.element_mut(i)) {
            Some(html) if !html.has_attr("lang") => {
                html.set_attr("lang", lang);
                true
            }
            _ => false,
        }
    }
}

fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

fn escape_text(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
