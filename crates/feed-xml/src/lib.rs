//! A small owned-element XML layer.
//!
//! METS documents arrive from many sources with many prefix conventions,
//! so matching is by *local* name throughout: `descendants("event")` finds
//! `PREMIS:event`, `premis:event` and a default-namespace `event` alike.
//! Parsed trees are owned and mutable, which lets the METS assembler lift
//! provenance subtrees out of one document, rewrite identifiers, and
//! re-serialize them under its own prefix.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parse error at byte {position}: {source}")]
    Parse {
        position: u64,
        source: quick_xml::Error,
    },
    #[error("XML attribute error: {0}")]
    Attr(String),
    #[error("document has no root element")]
    NoRoot,
    #[error("unbalanced element nesting")]
    Unbalanced,
}

/// One XML attribute; `local` is the name with any prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub local: String,
    pub value: String,
}

/// Element content in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An owned XML element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Qualified name as written in the source.
    pub name: String,
    /// Local part of the name.
    pub local: String,
    pub attrs: Vec<Attr>,
    pub children: Vec<Node>,
}

/// A parsed document.
#[derive(Debug, Clone)]
pub struct Document {
    root: Element,
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

impl Document {
    /// Parse a complete document. Whitespace-only text runs are dropped;
    /// comments, processing instructions and the prolog are ignored.
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader.read_event().map_err(|source| XmlError::Parse {
                position: reader.buffer_position() as u64,
                source,
            })?;
            match event {
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let elem = element_from_start(&start)?;
                    place(&mut stack, &mut root, elem)?;
                }
                Event::End(_) => {
                    let elem = stack.pop().ok_or(XmlError::Unbalanced)?;
                    place(&mut stack, &mut root, elem)?;
                }
                Event::Text(text) => {
                    let content = text.unescape().map_err(|source| XmlError::Parse {
                        position: reader.buffer_position() as u64,
                        source,
                    })?;
                    if !content.trim().is_empty() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(Node::Text(content.into_owned()));
                        }
                    }
                }
                Event::CData(data) => {
                    let content = String::from_utf8_lossy(data.as_ref()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(content));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Unbalanced);
        }
        root.map(|root| Document { root }).ok_or(XmlError::NoRoot)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element, XmlError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Attr(e.to_string()))?;
        let attr_name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Attr(e.to_string()))?
            .into_owned();
        attrs.push(Attr {
            local: local_part(&attr_name).to_owned(),
            name: attr_name,
            value,
        });
    }
    Ok(Element {
        local: local_part(&name).to_owned(),
        name,
        attrs,
        children: Vec::new(),
    })
}

fn place(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    elem: Element,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(elem));
    } else if root.is_none() {
        *root = Some(elem);
    } else {
        return Err(XmlError::Unbalanced);
    }
    Ok(())
}

impl Element {
    /// Create an element with a qualified name.
    pub fn new(name: &str) -> Self {
        Element {
            local: local_part(name).to_owned(),
            name: name.to_owned(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// First attribute whose local name matches, ignoring prefixes.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.local == local)
            .map(|a| a.value.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(attr) = self.attrs.iter_mut().find(|a| a.name == name) {
            attr.value = value.to_owned();
            return;
        }
        self.attrs.push(Attr {
            name: name.to_owned(),
            local: local_part(name).to_owned(),
            value: value.to_owned(),
        });
    }

    /// Direct element children.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First direct child with the given local name.
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.local == local)
    }

    pub fn child_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Element(e) if e.local == local => Some(e),
            _ => None,
        })
    }

    /// All descendant elements with the given local name, depth-first in
    /// document order. Includes `self` when it matches.
    pub fn descendants<'a>(&'a self, local: &'a str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.walk(&mut |e| {
            if e.local == local {
                found.push(e);
            }
        });
        found
    }

    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Element)) {
        visit(self);
        for child in self.elements() {
            child.walk(visit);
        }
    }

    /// Concatenated text content of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Replace all content with a single text node.
    pub fn set_text(&mut self, text: &str) {
        self.children = vec![Node::Text(text.to_owned())];
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// A copy of this subtree with every element renamed to
    /// `prefix:localname` (bare local names when `prefix` is empty) and
    /// namespace declaration attributes dropped. Used when adopting
    /// provenance subtrees into a document with its own prefix
    /// conventions.
    pub fn reprefixed(&self, prefix: &str) -> Element {
        let name = if prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{prefix}:{}", self.local)
        };
        Element {
            local: self.local.clone(),
            name,
            attrs: self
                .attrs
                .iter()
                .filter(|a| a.name != "xmlns" && !a.name.starts_with("xmlns:"))
                .cloned()
                .collect(),
            children: self
                .children
                .iter()
                .map(|node| match node {
                    Node::Element(e) => Node::Element(e.reprefixed(prefix)),
                    Node::Text(t) => Node::Text(t.clone()),
                })
                .collect(),
        }
    }

    /// Serialize this subtree as-is, with two-space indentation.
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        self.write_to(&mut writer);
        String::from_utf8_lossy(&writer.into_inner().into_inner()).into_owned()
    }

    /// Shorthand for `reprefixed(prefix).to_xml()`.
    pub fn to_xml_with_prefix(&self, prefix: &str) -> String {
        self.reprefixed(prefix).to_xml()
    }

    fn write_to(&self, writer: &mut Writer<Cursor<Vec<u8>>>) {
        let mut start = BytesStart::new(self.name.as_str());
        for attr in &self.attrs {
            start.push_attribute((attr.name.as_str(), attr.value.as_str()));
        }
        if self.children.is_empty() {
            let _ = writer.write_event(Event::Empty(start));
            return;
        }
        let _ = writer.write_event(Event::Start(start));
        for node in &self.children {
            match node {
                Node::Element(e) => e.write_to(writer),
                Node::Text(t) => {
                    let _ = writer.write_event(Event::Text(BytesText::new(t)));
                }
            }
        }
        let _ = writer.write_event(Event::End(BytesEnd::new(self.name.as_str())));
    }
}

/// Convenience wrapper producing a standalone document string with an XML
/// declaration.
pub fn document_string(root_serialized: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
    let mut out = String::from_utf8_lossy(&writer.into_inner().into_inner()).into_owned();
    out.push('\n');
    out.push_str(root_serialized);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<METS:mets xmlns:METS="http://www.loc.gov/METS/" OBJID="test.001">
  <METS:dmdSec ID="DMD1">
    <METS:mdWrap MDTYPE="MARC">
      <METS:xmlData>
        <record><leader>01142cam</leader></record>
      </METS:xmlData>
    </METS:mdWrap>
  </METS:dmdSec>
  <PREMIS:event xmlns:PREMIS="info:lc/xmlns/premis-v2">
    <PREMIS:eventType>capture</PREMIS:eventType>
  </PREMIS:event>
</METS:mets>"#;

    #[test]
    fn matching_ignores_prefixes() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert_eq!(doc.root().local, "mets");
        assert_eq!(doc.root().attr("OBJID"), Some("test.001"));

        let events = doc.root().descendants("event");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].child("eventType").unwrap().text(), "capture");
    }

    #[test]
    fn whitespace_runs_are_dropped_but_element_text_survives() {
        let doc = Document::parse(SAMPLE).unwrap();
        let record = doc.root().descendants("record")[0];
        assert_eq!(record.text(), "01142cam");
        // xmlData's only child is the record element, not whitespace.
        let xmldata = doc.root().descendants("xmlData")[0];
        assert_eq!(xmldata.elements().count(), 1);
    }

    #[test]
    fn reprefixing_drops_namespace_declarations() {
        let doc = Document::parse(SAMPLE).unwrap();
        let event = doc.root().descendants("event")[0].clone();
        let xml = event.to_xml_with_prefix("PREMIS");
        assert!(xml.starts_with("<PREMIS:event"));
        assert!(!xml.contains("xmlns"));
        assert!(xml.contains("<PREMIS:eventType>capture</PREMIS:eventType>"));
    }

    #[test]
    fn mutation_replaces_text_in_place() {
        let mut doc = Document::parse(SAMPLE).unwrap();
        let root = doc.root_mut();
        let dmd = root.child_mut("dmdSec").unwrap();
        dmd.set_attr("ID", "DMD9");
        assert_eq!(doc.root().child("dmdSec").unwrap().attr("ID"), Some("DMD9"));
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(Document::parse("<a><b></a>").is_err());
        assert!(Document::parse("no xml here").is_err());
    }

    #[test]
    fn empty_elements_round_trip() {
        let doc = Document::parse(r#"<m><f LOCTYPE="URL"/></m>"#).unwrap();
        let f = doc.root().child("f").unwrap();
        assert_eq!(f.attr("LOCTYPE"), Some("URL"));
        assert!(f.children.is_empty());
    }
}
