//! Purpose: Decode and render Atom feeds/entries with protocol namespaces resolved.
//! Exports: `AtomDocument`, `XmlElement`, `XmlNode`, `AtomEntry`, `parse_entry`, `render_entry`.
//! Role: The only module that touches raw XML; callers get plain records or path queries.
//! Invariants: Query prefixes are limited to `atom`, `zapi`, `zxfer`.
//! Invariants: An entry without a `content` element is always an error carrying the raw markup.
//! Invariants: `parse_entry(&render_entry(e)) == e` for every entry.
use crate::core::error::{Error, ErrorKind};
use crate::core::format::unparsable;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;
use std::collections::HashMap;

type ApiResult<T> = Result<T, Error>;

pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
pub const ZAPI_NS: &str = "http://zotero.org/ns/api";
pub const ZXFER_NS: &str = "http://zotero.org/ns/transfer";

const PREFIXES: [(&str, &str); 3] = [("atom", ATOM_NS), ("zapi", ZAPI_NS), ("zxfer", ZXFER_NS)];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name as written, e.g. `zapi:key`.
    pub qname: String,
    pub namespace: Option<String>,
    pub local_name: String,
    /// Raw attributes in document order, namespace declarations included.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated descendant text.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Child markup re-serialized, without the element's own tags.
    pub fn inner_xml(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            write_node(child, &mut out);
        }
        out
    }

    fn matches(&self, step: &Step) -> bool {
        self.local_name == step.local && self.namespace.as_deref() == Some(step.namespace)
    }
}

fn collect_text(element: &XmlElement, out: &mut String) {
    for child in &element.children {
        match child {
            XmlNode::Text(text) => out.push_str(text),
            XmlNode::Element(inner) => collect_text(inner, out),
        }
    }
}

struct Step {
    namespace: &'static str,
    local: String,
}

fn parse_path(path: &str) -> ApiResult<Vec<Step>> {
    path.trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (prefix, local) = segment.split_once(':').ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("query step must be prefixed: {segment}"))
            })?;
            let namespace = PREFIXES
                .iter()
                .find(|(known, _)| *known == prefix)
                .map(|(_, namespace)| *namespace)
                .ok_or_else(|| {
                    Error::new(ErrorKind::Usage)
                        .with_message(format!("unknown namespace prefix: {prefix}"))
                })?;
            Ok(Step {
                namespace,
                local: local.to_string(),
            })
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtomDocument {
    root: XmlElement,
}

impl AtomDocument {
    pub fn parse(body: &str) -> ApiResult<Self> {
        let root = parse_tree(body)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    pub fn is_feed(&self) -> bool {
        self.root.local_name == "feed" && self.root.namespace.as_deref() == Some(ATOM_NS)
    }

    /// Evaluates a prefixed path such as `/atom:feed/atom:entry/zapi:key`.
    /// An absolute path must name the root; a relative one starts below it.
    pub fn select(&self, path: &str) -> ApiResult<Vec<&XmlElement>> {
        let steps = parse_path(path)?;
        let mut current: Vec<&XmlElement> = vec![&self.root];
        let mut remaining = steps.as_slice();
        if path.starts_with('/') {
            match remaining.split_first() {
                Some((first, rest)) if self.root.matches(first) => remaining = rest,
                Some(_) => return Ok(Vec::new()),
                None => return Ok(current),
            }
        }
        for step in remaining {
            current = current
                .into_iter()
                .flat_map(|element| element.child_elements().filter(|child| child.matches(step)))
                .collect();
        }
        Ok(current)
    }

    pub fn select_text(&self, path: &str) -> ApiResult<Option<String>> {
        Ok(self.select(path)?.first().map(|element| element.text()))
    }

    pub fn total_results(&self) -> Option<u64> {
        self.select_text("zapi:totalResults")
            .ok()
            .flatten()
            .and_then(|text| text.trim().parse().ok())
    }

    /// Entries of a feed, or the document itself when it is a single entry.
    pub fn entries(&self) -> ApiResult<Vec<AtomEntry>> {
        if self.is_feed() {
            self.select("atom:entry")?
                .into_iter()
                .map(AtomEntry::from_element)
                .collect()
        } else {
            Ok(vec![AtomEntry::from_element(&self.root)?])
        }
    }
}

/// One object as carried by an Atom entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtomEntry {
    pub key: Option<String>,
    pub version: Option<String>,
    pub content: String,
}

impl AtomEntry {
    pub fn from_element(element: &XmlElement) -> ApiResult<Self> {
        let key = single_child(element, ZAPI_NS, "key").map(XmlElement::text);
        let version = single_child(element, ZAPI_NS, "version").map(XmlElement::text);
        let content = single_child(element, ATOM_NS, "content").ok_or_else(|| {
            let mut raw = String::new();
            write_element(element, &mut raw);
            unparsable("atom entry has no content element", &raw)
        })?;
        let content = if content.child_elements().next().is_some() {
            content.inner_xml()
        } else {
            content.text()
        };
        Ok(Self {
            key,
            version,
            content,
        })
    }

    pub fn version_number(&self) -> Option<u64> {
        self.version.as_deref().and_then(|v| v.trim().parse().ok())
    }

    pub fn content_json(&self) -> ApiResult<Value> {
        serde_json::from_str(&self.content).map_err(|err| {
            unparsable("atom content is not json", &self.content).with_source(err)
        })
    }
}

fn single_child<'e>(
    element: &'e XmlElement,
    namespace: &str,
    local: &str,
) -> Option<&'e XmlElement> {
    element
        .child_elements()
        .find(|child| child.local_name == local && child.namespace.as_deref() == Some(namespace))
}

pub fn parse_entry(xml: &str) -> ApiResult<AtomEntry> {
    let root = parse_tree(xml)?;
    AtomEntry::from_element(&root)
}

pub fn render_entry(entry: &AtomEntry) -> String {
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push_str(&format!(
        r#"<entry xmlns="{ATOM_NS}" xmlns:zapi="{ZAPI_NS}" xmlns:zxfer="{ZXFER_NS}">"#
    ));
    if let Some(key) = &entry.key {
        out.push_str(&format!("<zapi:key>{}</zapi:key>", escape(key.as_str())));
    }
    if let Some(version) = &entry.version {
        out.push_str(&format!(
            "<zapi:version>{}</zapi:version>",
            escape(version.as_str())
        ));
    }
    out.push_str(&format!(
        r#"<content type="application/json">{}</content>"#,
        escape(entry.content.as_str())
    ));
    out.push_str("</entry>");
    out
}

fn parse_tree(body: &str) -> ApiResult<XmlElement> {
    let mut reader = Reader::from_str(body);
    let mut scopes: Vec<HashMap<String, String>> = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|err| {
            let position = reader.buffer_position();
            unparsable(format!("invalid xml at byte {position}: {err}"), body)
        })?;
        match event {
            Event::Start(start) => {
                let element = open_element(&start, &mut scopes, body)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&start, &mut scopes, body)?;
                scopes.pop();
                attach(XmlNode::Element(element), &mut stack, &mut root);
            }
            Event::End(_) => {
                scopes.pop();
                if let Some(element) = stack.pop() {
                    attach(XmlNode::Element(element), &mut stack, &mut root);
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|err| unparsable(format!("invalid xml text: {err}"), body))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Text(text.into_owned()));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(unparsable("xml document ended inside an element", body));
    }
    root.ok_or_else(|| unparsable("xml document has no root element", body))
}

fn attach(node: XmlNode, stack: &mut [XmlElement], root: &mut Option<XmlElement>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if let XmlNode::Element(element) = node {
                root.get_or_insert(element);
            }
        }
    }
}

fn open_element(
    start: &BytesStart<'_>,
    scopes: &mut Vec<HashMap<String, String>>,
    body: &str,
) -> ApiResult<XmlElement> {
    let qname = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    let mut declared = HashMap::new();
    for attr in start.attributes() {
        let attr =
            attr.map_err(|err| unparsable(format!("invalid xml attribute: {err}"), body))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| unparsable(format!("invalid xml attribute value: {err}"), body))?
            .into_owned();
        if key == "xmlns" {
            declared.insert(String::new(), value.clone());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declared.insert(prefix.to_string(), value.clone());
        }
        attributes.push((key, value));
    }
    scopes.push(declared);

    let (prefix, local_name) = match qname.split_once(':') {
        Some((prefix, local)) => (prefix.to_string(), local.to_string()),
        None => (String::new(), qname.clone()),
    };
    let namespace = scopes
        .iter()
        .rev()
        .find_map(|scope| scope.get(&prefix))
        .cloned();
    Ok(XmlElement {
        qname,
        namespace,
        local_name,
        attributes,
        children: Vec::new(),
    })
}

fn write_node(node: &XmlNode, out: &mut String) {
    match node {
        XmlNode::Text(text) => out.push_str(&escape(text.as_str())),
        XmlNode::Element(element) => write_element(element, out),
    }
}

fn write_element(element: &XmlElement, out: &mut String) {
    out.push('<');
    out.push_str(&element.qname);
    for (key, value) in &element.attributes {
        out.push_str(&format!(" {key}=\"{}\"", escape(value.as_str())));
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        write_node(child, out);
    }
    out.push_str("</");
    out.push_str(&element.qname);
    out.push('>');
}
